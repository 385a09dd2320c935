use clap::Parser;
use core::broker::Broker;
use core::config::Config;
use core::content_parser::ContentParser;
use core::job_store::{InMemoryJobStore, JobStore};
use core::link_extractor::LinkExtractor;
use core::models::Job;
use core::rate_limiter::RateLimiter;
use core::robots::RobotsCache;
use satellite::control::{run_control_listener, ControlState};
use satellite::crawl_loop::CrawlLoopDeps;
use satellite::fetcher::Fetcher;
use satellite::satellite::SatelliteCrawler;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "satellite")]
#[command(about = "Stateless crawl worker that executes jobs popped from the coordinator's queue")]
struct Cli {
    /// Stable identifier this satellite heartbeats and subscribes under.
    /// Defaults to a fresh UUID so multiple satellites never collide.
    #[arg(long)]
    satellite_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "satellite=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let satellite_id = cli
        .satellite_id
        .or_else(|| std::env::var("SATELLITE_ID").ok())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let config = Config::from_env()?;
    let broker = Broker::connect(&config.redis_url, &config.queue).await?;
    // JobStore here is the same in-memory implementation the coordinator
    // uses for standalone/demo runs; a real deployment points both
    // processes at the same durable store (§2, JobStore is external).
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());

    let control = Arc::new(ControlState::default());
    tokio::spawn(run_control_listener(
        broker.clone(),
        satellite_id.clone(),
        control.clone(),
    ));

    let rate_limiter = Arc::new(RateLimiter::with_jitter(
        config.rate_limiter.clone(),
        config.crawler.delay_seconds,
        config.anti_detection.ml_rate_optimization,
        config.anti_detection.human_like_delays,
    ));
    let robots = Arc::new(RobotsCache::new(
        reqwest::Client::new(),
        Duration::from_secs(3600),
    ));
    let link_extractor = Arc::new(LinkExtractor::new());
    let content_parser = Arc::new(ContentParser::new());

    let broker_for_factory = broker.clone();
    let store_for_factory = store.clone();
    let control_for_factory = control.clone();
    let rate_limiter_for_factory = rate_limiter.clone();
    let robots_for_factory = robots.clone();
    let link_extractor_for_factory = link_extractor.clone();
    let content_parser_for_factory = content_parser.clone();
    let satellite_id_for_factory = satellite_id.clone();

    let deps_factory = Arc::new(move |job: &Job| -> CrawlLoopDeps {
        let fetcher = Arc::new(Fetcher::new(&job.config.user_agent, job.config.follow_redirects));
        CrawlLoopDeps {
            broker: broker_for_factory.clone(),
            store: store_for_factory.clone(),
            rate_limiter: rate_limiter_for_factory.clone(),
            robots: robots_for_factory.clone(),
            link_extractor: link_extractor_for_factory.clone(),
            content_parser: content_parser_for_factory.clone(),
            fetcher,
            control: control_for_factory.clone(),
            satellite_id: satellite_id_for_factory.clone(),
        }
    });

    info!(satellite_id = %satellite_id, "satellite starting");
    let crawler = SatelliteCrawler {
        satellite_id,
        broker,
        store,
        control,
        deps_factory,
    };
    crawler.run().await;
    Ok(())
}
