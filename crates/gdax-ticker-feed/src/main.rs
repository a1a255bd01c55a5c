/*
[INPUT]:  CLI arguments, optional YAML configuration, persisted settings, OS shutdown signals
[OUTPUT]: Running ticker feed logging price and connection events, graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use gdax_ticker_adapter::Product;
use gdax_ticker_feed::{
    Feed, FeedConfig, JsonSettingsStore, ProductCatalog, SettingsStore, restore_subscriptions,
};

#[derive(Parser, Debug)]
#[command(name = "gdax-ticker", version, about = "GDAX ticker feed client")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    /// Write logs to a daily rolling file in DIR instead of stdout
    #[arg(long = "log-dir", value_name = "DIR")]
    log_dir: Option<PathBuf>,
    /// Subscribe to a product (e.g. BTC-USD) and remember it; repeatable
    #[arg(long = "product", value_name = "ID")]
    products: Vec<Product>,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let _log_guard = init_tracing(&args.log_level, args.log_dir.as_deref())?;

    info!(
        config_path = ?args.config_path,
        dry_run = args.dry_run,
        "starting gdax-ticker"
    );

    let config = FeedConfig::load(args.config_path.as_deref()).context("load config")?;
    config.validate().context("validate config")?;
    let catalog = ProductCatalog::from_config(&config.products).context("build product catalog")?;
    info!(products = catalog.len(), endpoint = %config.endpoint, "configuration loaded");

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let store = match &config.settings_path {
        Some(path) => JsonSettingsStore::open(path.clone()).await,
        None => JsonSettingsStore::new().await,
    }
    .context("open settings store")?;
    info!(path = %store.path().display(), "settings store opened");

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let feed = Feed::start(config).context("start feed")?;
    feed.on_connection_state_changed(|state| {
        info!(%state, "connection state");
    });
    feed.on_price_updated(|product, update| {
        info!(
            %product,
            sequence = update.sequence,
            price = update.price,
            best_bid = update.best_bid,
            best_ask = update.best_ask,
            change_24h = ?update.change_24h(),
            "price updated"
        );
    });

    restore_subscriptions(&feed, &catalog, &store)
        .await
        .context("restore subscriptions")?;

    for product in &args.products {
        if !catalog.contains(product) {
            warn!(%product, "product is not in the configured catalog");
        }
        store
            .set_subscribed(product, true)
            .await
            .with_context(|| format!("persist subscription for {product}"))?;
        feed.subscribe(product.clone());
    }

    shutdown.cancelled().await;
    info!("shutdown signal received");

    feed.stop();
    feed.join().await;
    info!(dropped_updates = feed.dropped_updates(), "feed shutdown complete");

    Ok(())
}

fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;

    let Some(log_dir) = log_dir else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow!(err))
            .context("initialize tracing subscriber")?;
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "gdax-ticker.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(Some(guard))
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
