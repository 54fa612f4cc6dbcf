use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;

use price_aggregator::config::EngineConfig;
use price_aggregator::query::QueryFacade;
use price_aggregator::scheduler::CollectorScheduler;
use price_aggregator::sources::{HttpSource, PriceSource, SyntheticSource};
use price_aggregator::store::ObservationStore;

#[derive(Parser, Debug)]
#[command(name = "price-aggregator")]
#[command(about = "Multi-source price aggregation engine and collector scheduler")]
struct Args {
    /// Path to engine configuration file
    #[arg(short, long, default_value = "engine.toml")]
    config: String,

    /// Override the configured collection interval, in seconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Collect but never log resolved prices — useful for smoke-testing a config
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn build_source(
    name: &str,
    cfg: &price_aggregator::config::SourceConfig,
    pairs: &[String],
    token_mappings: &HashMap<String, HashMap<String, String>>,
) -> Arc<dyn PriceSource> {
    if let Some(base_url) = &cfg.base_url {
        let symbol_map: HashMap<String, String> = pairs
            .iter()
            .map(|p| {
                let symbol = token_mappings
                    .get(p)
                    .and_then(|by_source| by_source.get(name))
                    .cloned()
                    .unwrap_or_else(|| p.clone());
                (p.clone(), symbol)
            })
            .collect();
        Arc::new(HttpSource::new(name.to_string(), base_url.clone(), symbol_map, "/price", Some("/volume".to_string())))
    } else {
        let base_price = cfg.synthetic_base_price.unwrap_or(100.0);
        let mut source = SyntheticSource::new(name.to_string(), seed_for(name));
        for pair in pairs {
            source = source.with_base_price(pair.clone(), base_price);
        }
        Arc::new(source)
    }
}

fn seed_for(name: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    log::info!("Starting price aggregation engine");

    let mut config = EngineConfig::load(&args.config)?;
    if let Some(interval_secs) = args.interval {
        config.collector.collect_interval_ms = interval_secs * 1000;
    }

    log::info!(
        "Loaded configuration: {} pairs, {} sources, interval {}ms",
        config.collector.pairs.len(),
        config.collector.sources.len(),
        config.collector.collect_interval_ms,
    );

    if args.dry_run {
        log::warn!("Running in dry-run mode — collected prices will not be logged");
    }

    let store = Arc::new(ObservationStore::new(&config.aggregation));
    let facade = Arc::new(QueryFacade::new(Arc::clone(&store), config.aggregation.clone()));

    let sources: HashMap<String, Arc<dyn PriceSource>> = config
        .collector
        .sources
        .iter()
        .filter(|(_, cfg)| cfg.enabled)
        .map(|(name, cfg)| {
            (
                name.clone(),
                build_source(name, cfg, &config.collector.pairs, &config.collector.token_mappings),
            )
        })
        .collect();

    let scheduler = Arc::new(CollectorScheduler::new(config.collector.clone(), sources, Arc::clone(&facade)));
    scheduler.start();
    log::info!("Collector scheduler started");

    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());
    let mut health_check = tokio::time::interval(std::time::Duration::from_secs(60));

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutdown requested, stopping collector");
                break;
            }
            _ = health_check.tick() => {
                let (ticks, success, failure, timeouts) = scheduler.metrics.snapshot();
                let success_ratio = if success + failure == 0 {
                    1.0
                } else {
                    success as f64 / (success + failure) as f64
                };
                log::info!(
                    "health check: ticks={ticks} success={success} failure={failure} timeouts={timeouts} success_ratio={success_ratio:.2}"
                );
                let stats = facade.stats();
                log::info!(
                    "engine stats: pairs={} observations={} points_processed={} outliers_detected={} calculations_performed={}",
                    stats.store.pairs,
                    stats.store.total_observations,
                    stats.metrics.points_processed,
                    stats.metrics.outliers_detected,
                    stats.metrics.calculations_performed,
                );
                if !args.dry_run {
                    for pair in &config.collector.pairs {
                        match facade.current_price(pair, None) {
                            Ok(price) => log::info!("{pair}: {} via {} (confidence {:.2})", price.price, price.algorithm, price.confidence),
                            Err(e) => log::debug!("{pair}: no price available yet ({e})"),
                        }
                    }
                }
            }
        }
    }

    scheduler.stop().await;
    log::info!("Collector scheduler stopped cleanly");
    Ok(())
}
