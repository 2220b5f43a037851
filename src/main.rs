use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use srv6_steer::{
    config::{Overrides, Settings, default_config_path},
    lifecycle::LifecycleManager,
    link::SysfsLinks,
    route::IpRoute,
    sys::PinnedLoader,
};
use std::sync::Arc;
use tokio::signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tracing::{Level, info, warn};

#[derive(Parser)]
#[command(name = "srv6_steer", version, about = "Steer an SRv6 prefix through a BPF fast path fed with link bandwidth", long_about = None)]
struct Cli {
    /// Config file, defaults to the per-user config dir
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Destination prefix the route is installed for
    #[arg(long)]
    prefix: Option<String>,

    /// Next hop of the route
    #[arg(long)]
    gateway: Option<String>,

    /// Sampling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// EMA span, alpha = 2 / (span + 1)
    #[arg(long)]
    ema_span: Option<i64>,

    /// bandwidth-ema, byte-rate-ema or raw-windowed-diff
    #[arg(long)]
    policy: Option<String>,

    /// Route metric
    #[arg(long)]
    priority: Option<u32>,

    /// Upper bound of one blocking event read, in milliseconds
    #[arg(long)]
    drain_deadline_ms: Option<u64>,

    #[arg(long)]
    max_consecutive_failures: Option<u32>,

    /// Write raw counters to raw_stats_<ts>.ndjson
    #[arg(long)]
    log_raw_stats: bool,

    /// Write smoothed values to raw_ema_<ts>.ndjson
    #[arg(long)]
    log_raw_ema: bool,

    #[arg(long)]
    archive_dir: Option<String>,

    /// bpffs directory holding prog, bw_bits_per_sec and log_entries
    #[arg(long)]
    pin_dir: Option<String>,

    #[arg(long)]
    sysfs_root: Option<String>,

    #[arg(long, short = 'l', default_value = "info")]
    log_level: Level,

    /// Shorthand for --log-level debug
    #[arg(long, short)]
    debug: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides::default()
            .set("prefix", self.prefix.clone())
            .set("gateway", self.gateway.clone())
            .set("interval_ms", self.interval_ms)
            .set("ema_span", self.ema_span)
            .set("policy", self.policy.clone())
            .set("priority", self.priority)
            .set("drain_deadline_ms", self.drain_deadline_ms)
            .set("max_consecutive_failures", self.max_consecutive_failures)
            .set("log_raw_stats", self.log_raw_stats.then_some(true))
            .set("log_raw_ema", self.log_raw_ema.then_some(true))
            .set("archive_dir", self.archive_dir.clone())
            .set("pin_dir", self.pin_dir.clone())
            .set("sysfs_root", self.sysfs_root.clone())
    }
}

async fn terminate() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!("SIGTERM handler not installed: {}", err);
            let _ = ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.debug { Level::DEBUG } else { cli.log_level };
    tracing_subscriber::fmt().with_max_level(level).init();

    let path = match cli.config.clone() {
        Some(path) => Some(path),
        None => default_config_path()
            .inspect_err(|err| warn!("no default config file: {}", err))
            .ok(),
    };
    let config = Settings::load(path.as_deref(), cli.overrides())
        .and_then(Settings::validate)
        .context("invalid configuration")?;
    info!(
        "steering {} via {} with {} every {:?}",
        config.prefix, config.gateway, config.policy, config.interval
    );

    let loader = PinnedLoader::new(config.pin_dir.clone());
    let links = SysfsLinks::new(config.sysfs_root.clone());
    let manager = LifecycleManager::new(Arc::new(config), loader, links, IpRoute::default());
    manager.run(terminate()).await?;
    Ok(())
}
