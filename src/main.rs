use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::signal::{signal, SigHandler, SigSet, Signal};
use nix::unistd::getuid;
use tracing::info;
use tracing_subscriber::EnvFilter;

use poolhttpd::config::{
    DEFAULT_HOST, DEFAULT_INDEX_NAME, DEFAULT_MAX_REQUEST_LENGTH, DEFAULT_MIME_TYPE,
    DEFAULT_PORT, DEFAULT_WORKERS,
};
use poolhttpd::{AccessLogTarget, Config, WorkerPool};

const COPYRIGHT: &str = "copyright (c) 2021 Tom Dryer";

#[derive(Parser, Debug)]
#[command(version, about = "Serve a directory over HTTP with a fixed pool of worker threads.")]
struct Args {
    /// Directory to serve.
    wwwroot: PathBuf,

    /// Port to listen on [default: 8080, or 80 if running as root]. Pass 0 to let the system
    /// choose any free port.
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind the listening socket to.
    #[arg(long, default_value = DEFAULT_HOST)]
    addr: String,

    /// Number of worker threads, i.e. how many connections are served at once.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Default file to serve when a directory is requested.
    #[arg(long, default_value = DEFAULT_INDEX_NAME)]
    index: String,

    /// Seconds a single read or write on a connection may take before it is dropped.
    #[arg(long, default_value_t = 1)]
    timeout: u64,

    /// Largest accepted request head in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_REQUEST_LENGTH)]
    maxrequest: usize,

    /// Append the access log to this file instead of stdout.
    #[arg(long, conflicts_with_all = ["syslog", "no_log"])]
    log: Option<PathBuf>,

    /// Use syslog for the access log.
    #[arg(long, conflicts_with = "no_log")]
    syslog: bool,

    /// Don't write an access log.
    #[arg(long)]
    no_log: bool,

    /// Parse this file for extension to MIME type associations.
    #[arg(long)]
    mimetypes: Option<PathBuf>,

    /// Files with unknown extensions are served as this type.
    #[arg(long, default_value = DEFAULT_MIME_TYPE)]
    default_mimetype: String,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.wwwroot);
        config.bind_host = self.addr;
        config.bind_port = self
            .port
            .unwrap_or(if getuid().is_root() { 80 } else { DEFAULT_PORT });
        config.worker_count = self.workers;
        config.index_name = self.index;
        config.io_timeout = Duration::from_secs(self.timeout);
        config.max_request_len = self.maxrequest;
        config.mimetypes_file = self.mimetypes;
        config.default_mimetype = self.default_mimetype;
        config.access_log = match (self.log, self.syslog, self.no_log) {
            (Some(path), _, _) => AccessLogTarget::File(path),
            (None, true, _) => AccessLogTarget::Syslog,
            (None, false, true) => AccessLogTarget::Off,
            (None, false, false) => AccessLogTarget::Stdout,
        };
        config
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Args::parse().into_config();

    info!(
        "{}/{}, {}.",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        COPYRIGHT,
    );

    // Block the stop signals before any worker exists. Workers inherit the mask, so the signals
    // are only ever delivered to the sigwait below.
    let mut stop_signals = SigSet::empty();
    stop_signals.add(Signal::SIGINT);
    stop_signals.add(Signal::SIGTERM);
    stop_signals
        .thread_block()
        .context("failed to block SIGINT and SIGTERM")?;
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .context("failed to set SIGPIPE handler")?;

    let mut pool = WorkerPool::start(config).context("failed to start server")?;

    let caught = stop_signals
        .wait()
        .context("failed to wait for SIGINT or SIGTERM")?;
    info!("caught {:?}, stopping", caught);
    pool.shutdown();

    pool.stats()
        .print()
        .context("failed to print usage statistics")?;
    Ok(())
}
