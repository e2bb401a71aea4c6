//! dnsd - answers A and PTR queries over UDP from a static record file

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use dnsd::config::Settings;
use dnsd::dns_server::DnsServer;
use dnsd::service::reload::{self, TableSource};
use dnsd::service::metrics;
use dnsd::table::RecordTable;
use dnsd::types::DEFAULT_TTL;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// local time stamps instead of the default UTC
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "dnsd")]
#[command(about = "Small static DNS server answering A and PTR queries", long_about = None)]
struct Args {
    /// Log every loaded record and every received packet
    #[arg(short, long)]
    verbose: bool,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0")]
    interface: IpAddr,

    /// Record file with `<name> <ipv4>` lines
    #[arg(short, long, default_value = "/etc/dnsd.conf")]
    config: PathBuf,

    /// TTL of answers, in seconds
    #[arg(short, long, default_value_t = DEFAULT_TTL, value_parser = clap::value_parser!(u32).range(1..))]
    ttl: u32,

    #[arg(short, long, default_value_t = 53, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Write logs to the rolling log file instead of stdout
    #[arg(short = 'd', long)]
    detach_logs: bool,

    #[arg(long, default_value = "logs/dnsd.log")]
    log_file: PathBuf,

    /// Poll the record file for changes at this interval (e.g. 30s, 5m)
    #[arg(long, value_parser = reload::parse_interval)]
    reload: Option<Duration>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics: Option<SocketAddr>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_logging(&args)?;

    // datagrams are served strictly one after another
    let runtime = tokio::runtime::Builder::new_current_thread()
        .thread_name("dnsd")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if !args.detach_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stdout).with_timer(LocalTimer))
            .init();
        return Ok(None);
    }

    if let Some(dir) = args.log_file.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory '{}'", dir.display()))?;
    }
    // rotate at local midnight, keep 30 days
    let file_appender = RollingFileAppender::new(&args.log_file, RollingConditionBasic::new().daily(), 30)
        .with_context(|| format!("Failed to open log file '{}'", args.log_file.display()))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .init();
    Ok(Some(guard))
}

async fn async_main(args: Args) -> Result<()> {
    info!("Starting dnsd version {}", env!("CARGO_PKG_VERSION"));
    metrics::set_build_info();

    let settings = Settings { ttl: args.ttl, verbose: args.verbose };
    let (table_tx, _) = watch::channel(Arc::new(RecordTable::new()));
    let source = Arc::new(TableSource::new(args.config.clone(), settings, table_tx));
    let count = source.reload()?;
    info!("Loaded {} records from {}", count, args.config.display());

    let mut tasks = Vec::new();
    if let Some(addr) = args.metrics {
        let (_, handle) = metrics::serve(addr).await?;
        tasks.push(handle);
    }
    if let Some(interval) = args.reload {
        tasks.push(reload::spawn_watcher(source.clone(), interval));
    }
    #[cfg(unix)]
    tasks.push(reload::spawn_hangup_listener(source.clone())?);

    let server = DnsServer::bind(SocketAddr::new(args.interface, args.port), settings).await?;
    info!("Accepting UDP packets on {}", server.local_addr()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!("Failed to listen for interrupt: {}", e);
                // dropping the sender would stop the server
                std::future::pending::<()>().await;
            }
        }
    });

    server.run(source.subscribe(), shutdown_rx).await?;

    for task in tasks {
        task.abort();
    }
    Ok(())
}
