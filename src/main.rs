//! ATM Option Logger - market-hours collection loop
//!
//! Loads config, logs in if needed, downloads the instrument universes once and
//! then runs one collection cycle per interval while the market is open.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atm_option_logger::{
    clock::now_ist,
    collector::{ExpiryResolver, ResilientCaller, SnapshotAggregator},
    config::Config,
    kite::{AccessToken, CommandTokenRefresher, KiteClient, NoLoginCommand, TokenRefresher},
    schedule::{log_completeness, market_phase, pipeline_tick_point, wait_until_open, MarketPhase, TickStats},
    sinks::{InfluxWriter, SinkFanout, SnapshotFileSink, TimeSeriesWriter},
};

#[derive(Parser, Debug)]
#[command(name = "atm-logger")]
#[command(about = "Collect ATM option-chain snapshots for NIFTY, SENSEX and BANKNIFTY")]
struct Args {
    /// Run a single cycle now and exit
    #[arg(long)]
    once: bool,

    /// Keep polling outside 09:15-15:30 IST
    #[arg(long, env = "IGNORE_MARKET_HOURS")]
    ignore_market_hours: bool,

    /// Seconds between cycles (overrides LOOP_INTERVAL_SECS)
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();
    let args = Args::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(secs) = args.interval_secs {
        config.loop_interval = Duration::from_secs(secs.max(1));
    }

    info!("🚀 ATM option logger starting");
    info!(
        interval_secs = config.loop_interval.as_secs(),
        dynamic_expiries = config.use_dynamic_expiries,
        raw_dir = %config.raw_snapshot_dir.display(),
        "Configuration loaded"
    );

    let token = Arc::new(AccessToken::new(
        config.kite_api_key.clone(),
        config.kite_access_token.clone().unwrap_or_default(),
    ));
    let refresher: Arc<dyn TokenRefresher> = match &config.kite_login_cmd {
        Some(cmd) => Arc::new(CommandTokenRefresher::new(cmd.clone())),
        None => Arc::new(NoLoginCommand),
    };

    if config.kite_access_token.is_none() {
        match refresher.refresh().await {
            Ok(fresh) => {
                token.set(fresh);
                info!("🔐 Obtained Kite access token");
            }
            Err(e) => warn!(error = %e, "No initial access token, calls will retry login on auth failure"),
        }
    }

    let client = KiteClient::new(config.kite_api_base.clone(), token.clone())?;

    let series: Option<Arc<dyn TimeSeriesWriter>> = match &config.influx {
        Some(influx) => {
            info!(url = %influx.url, bucket = %influx.bucket, "📈 InfluxDB sink enabled");
            Some(Arc::new(InfluxWriter::new(influx)?))
        }
        None => {
            info!("InfluxDB not configured, writing snapshot files only");
            None
        }
    };
    let sinks = SinkFanout::new(SnapshotFileSink::new(&config.raw_snapshot_dir), series);

    let caller = ResilientCaller::new(refresher, token, config.retry);
    let mut aggregator = SnapshotAggregator::new(
        Arc::new(client),
        caller,
        ExpiryResolver::new(config.use_dynamic_expiries),
        sinks,
    )
    .await;
    if aggregator.universes().is_empty() {
        warn!("Both instrument universes are empty, no option legs can be resolved");
    }

    if args.once {
        run_cycle(&mut aggregator, &config.app_env).await;
        return Ok(());
    }

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Ctrl-C received, stopping after the current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    });

    if !args.ignore_market_hours {
        tokio::select! {
            phase = wait_until_open() => {
                if phase != MarketPhase::Open {
                    info!("Market already closed for the day");
                    return Ok(());
                }
            }
            _ = shutdown_rx.changed() => return Ok(()),
        }
    }

    info!(interval_secs = config.loop_interval.as_secs(), "Starting main loop");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if !args.ignore_market_hours {
            match market_phase(now_ist()) {
                MarketPhase::Open => {}
                MarketPhase::PreOpen => {
                    sleep(Duration::from_secs(5)).await;
                    continue;
                }
                MarketPhase::Closed | MarketPhase::Weekend => {
                    info!("🔕 Market closed");
                    break;
                }
            }
        }

        run_cycle(&mut aggregator, &config.app_env).await;

        tokio::select! {
            _ = sleep(config.loop_interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    info!("Stopping logger");
    Ok(())
}

async fn run_cycle(aggregator: &mut SnapshotAggregator, env: &str) {
    let loop_start = Instant::now();
    let snapshot = aggregator.collect().await;
    let collect_duration = loop_start.elapsed();

    log_completeness(&snapshot);

    if !aggregator.sinks().has_time_series() {
        return;
    }
    let stats = TickStats {
        loop_duration: loop_start.elapsed(),
        collect_duration,
        legs_written: snapshot.legs.len(),
        overview_written: snapshot.overview_aggregates.len(),
    };
    aggregator
        .sinks()
        .write_point(&pipeline_tick_point(env, &stats, now_ist()))
        .await;
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atm_option_logger=info,atm_logger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // cwd + parents
    let _ = dotenv::dotenv();

    // Also the crate root, for runs started from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
