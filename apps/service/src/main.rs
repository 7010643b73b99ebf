mod config;
mod database;
mod error;
mod monitoring;
mod pool;
mod preferences;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::Config;
use crate::database::{LibsqlSampleStore, MemorySampleStore, SampleFilter, SampleStore};
use crate::monitoring::events::LinkStateWatcher;
use crate::monitoring::report::{LogAlerter, ProbeAlerter, ReportDispatcher, SysfsConnectivity, WebhookReporter};
use crate::monitoring::sources::{ConnectivitySource, LocationSource, ProbeSource, WifiSignalSource};
use crate::monitoring::sysfs::SysfsRoot;
use crate::monitoring::timing::probe_timeout_for;
use crate::monitoring::wake::platform_wake_lock;
use crate::monitoring::{
    FieldSource, MonitorController, MonitorLoop, ReachabilityProbe, SampleAggregator, SchedulerEnv,
};
use crate::preferences::Preferences;

/// How often the link watcher polls interface state
const LINK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Periodic network-state sampler
#[derive(Parser)]
#[command(name = "netmon", version, about)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Sample continuously until interrupted. SIGHUP reloads the config.
    Run {
        /// Keep samples in memory instead of the configured database
        #[arg(long)]
        memory: bool,
    },

    /// Probe reachability once and print the result
    Probe {
        #[arg(long)]
        host: Option<String>,

        /// Sampling interval the probe timeout is derived from
        #[arg(long)]
        interval_millis: Option<u64>,
    },

    /// Print stored samples, oldest first
    Samples {
        /// Only samples at or after this timestamp (ms since epoch)
        #[arg(long)]
        since: Option<i64>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete all but the most recent samples
    Prune {
        #[arg(long)]
        keep: u64,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    let cli = Cli::parse();
    let config_path = config::resolve_path(cli.config.as_ref())?;
    let config = Config::from_config(Some(&config_path))?;

    match cli.command.unwrap_or(Command::Run { memory: false }) {
        Command::Run { memory } => run(config_path, config, memory).await,
        Command::Probe { host, interval_millis } => probe_once(&config, host, interval_millis).await,
        Command::Samples { since, limit } => print_samples(&config, since, limit).await,
        Command::Prune { keep } => prune(&config, keep).await,
        Command::Config => {
            println!("{}", config);
            Ok(())
        }
    }
}

async fn run(config_path: PathBuf, config: Config, memory: bool) -> Result<()> {
    let store: Arc<dyn SampleStore> =
        if memory { Arc::new(MemorySampleStore::new()) } else { Arc::new(open_store(&config).await?) };

    let sysfs = SysfsRoot::default();
    let wake_lock = platform_wake_lock();
    let env = SchedulerEnv {
        wake_lock: wake_lock.clone(),
        network_events: Arc::new(LinkStateWatcher::new(sysfs.clone(), LINK_POLL_INTERVAL)),
        alarm_mode: config.scheduler.alarm_mode,
    };

    let settings = config.settings();
    let probe_source = if config.probe.enabled {
        Some(Arc::new(ProbeSource::new(
            Arc::new(ReachabilityProbe::new()?),
            settings.probe_host.clone(),
            Duration::from_millis(settings.interval_millis),
        )))
    } else {
        None
    };

    let mut sources: Vec<Arc<dyn FieldSource>> = vec![
        Arc::new(ConnectivitySource::new(sysfs.clone())),
        Arc::new(WifiSignalSource::new(sysfs.clone())),
    ];
    if config.location.enabled {
        sources.push(Arc::new(LocationSource::new(Duration::from_secs(
            config.location.refresh_interval_secs,
        ))?));
    }
    if let Some(probe) = &probe_source {
        sources.push(probe.clone());
    }
    let aggregator = Arc::new(SampleAggregator::new(sources));

    let mut monitor_loop = MonitorLoop::new(
        aggregator.clone(),
        store.clone(),
        wake_lock,
        Duration::from_millis(settings.wake_interval_millis),
        settings.retention_count,
    );
    if let Some(url) = &config.report.webhook_url {
        let reporter: Arc<dyn ReportDispatcher> = Arc::new(WebhookReporter::new(
            url.clone(),
            Duration::from_millis(config.report.interval_millis),
            store.clone(),
        )?);
        monitor_loop = monitor_loop.with_reporter(reporter);
    }
    if config.alert.enabled {
        let alerter: Arc<dyn ProbeAlerter> = Arc::new(LogAlerter::new(
            Arc::new(SysfsConnectivity::new(sysfs)),
            Duration::from_millis(config.alert.min_interval_millis),
        ));
        monitor_loop = monitor_loop.with_alerter(alerter);
    }

    let preferences = Arc::new(Preferences::new(settings));
    let mut controller =
        MonitorController::new(env, preferences.clone(), Arc::new(monitor_loop), aggregator);
    if let Some(probe) = probe_source {
        controller = controller.with_probe_source(probe);
    }

    controller.start().await;
    let reload = tokio::spawn(reload_on_hangup(config_path, config, preferences));
    controller.run_until(wait_for_shutdown_signal()).await;
    reload.abort();

    info!("Monitoring stopped");
    Ok(())
}

async fn open_store(config: &Config) -> Result<LibsqlSampleStore> {
    let path = &config.storage.database_path;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    LibsqlSampleStore::open(&path.to_string_lossy())
        .await
        .with_context(|| format!("Failed to open sample database {}", path.display()))
}

/// Re-read the config on every SIGHUP and push the live settings into the
/// preferences. Settings that need a restart are only reported.
async fn reload_on_hangup(path: PathBuf, mut current: Config, preferences: Arc<Preferences>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Config reload disabled, cannot listen for SIGHUP: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        match Config::load(&path) {
            Ok(config) => {
                match preferences.apply(config.settings()) {
                    Ok(changed) => {
                        info!("Reloaded {} ({} live settings changed)", path.display(), changed);
                        warn_about_restart_only_changes(&current, &config);
                        current = config;
                    }
                    Err(e) => warn!("Ignoring config reload from {}: {:#}", path.display(), e),
                }
            }
            Err(e) => warn!("Ignoring config reload from {}: {}", path.display(), e),
        }
    }
}

fn warn_about_restart_only_changes(old: &Config, new: &Config) {
    let sections = [
        ("scheduler.alarm_mode", old.scheduler.alarm_mode != new.scheduler.alarm_mode),
        ("probe.enabled", old.probe.enabled != new.probe.enabled),
        ("storage.database_path", old.storage.database_path != new.storage.database_path),
        ("report", old.report != new.report),
        ("alert", old.alert != new.alert),
        ("location", old.location != new.location),
    ];
    for (name, changed) in sections {
        if changed {
            warn!("Change to {} takes effect after a restart", name);
        }
    }
}

/// Wait for a shutdown signal (CTRL+C or SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            None
        }
    };
    let terminate = async {
        match sigterm.as_mut() {
            Some(sigterm) => {
                sigterm.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received CTRL+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

async fn probe_once(config: &Config, host: Option<String>, interval_millis: Option<u64>) -> Result<()> {
    let host = host.unwrap_or_else(|| config.probe.host.clone());
    monitoring::validation::validate_probe_host(&host)?;
    let interval = Duration::from_millis(interval_millis.unwrap_or(config.scheduler.interval_millis));
    let timeout = probe_timeout_for(interval);

    let outcome = ReachabilityProbe::new()?.probe(&host, timeout).await;
    println!("Host: {} (timeout {:?} per test)", host, timeout);
    for (name, value) in outcome.into_fields().iter() {
        println!("  {}: {}", name, value);
    }
    println!("  Connectivity: {}", outcome.connectivity_class());
    Ok(())
}

async fn print_samples(config: &Config, since: Option<i64>, limit: Option<usize>) -> Result<()> {
    let store = open_store(config).await?;
    let mut filter = since.map(SampleFilter::since).unwrap_or_default();
    if let Some(limit) = limit {
        filter = filter.with_limit(limit);
    }

    for sample in store.query_ordered_by_timestamp(Some(&filter)).await? {
        println!("{}", serde_json::to_string(&sample)?);
    }
    Ok(())
}

async fn prune(config: &Config, keep: u64) -> Result<()> {
    let store = open_store(config).await?;
    let deleted = store.prune_keeping_most_recent(keep).await?;
    println!(
        "Deleted {} samples from {}, {} remain",
        deleted,
        config.storage.database_path.display(),
        store.count().await?
    );
    Ok(())
}
