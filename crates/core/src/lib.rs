pub mod broker;
pub mod config;
pub mod content_parser;
pub mod control;
pub mod error;
pub mod job_store;
pub mod link_extractor;
pub mod models;
pub mod rate_limiter;
pub mod robots;

pub use broker::Broker;
pub use config::*;
pub use content_parser::ContentParser;
pub use control::{ControlMessage, JobStatusEvent};
pub use error::*;
pub use job_store::{InMemoryJobStore, JobStore};
pub use link_extractor::LinkExtractor;
pub use models::*;
pub use rate_limiter::{FetchOutcome, RateLimiter};
pub use robots::RobotsCache;