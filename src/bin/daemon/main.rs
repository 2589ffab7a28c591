mod config;
mod server;
mod utils;

use clap::Parser;
use config::DaemonConfig;
use server::connection_log::ConnectionLog;
use server::reaper::ChildReaper;
use server::server::DaemonServer;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use utils::error::Result;

/// rexecd - run shell commands for TCP clients
///
/// Every connected client can execute arbitrary commands with the daemon's
/// privileges. There is no authentication; never expose it beyond a trusted
/// network.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// TCP port to listen on
    port: u16,

    /// Listen queue length
    backlog: Option<i32>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPv4 address to bind (default 0.0.0.0)
    #[arg(long)]
    bind: Option<Ipv4Addr>,

    /// Connection log file (default connections.log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Also write the diagnostic trace to this file
    #[arg(long)]
    trace_file: Option<PathBuf>,
}

impl Cli {
    /// Merge the configuration file with command-line overrides
    fn into_config(self) -> Result<DaemonConfig> {
        let mut config = DaemonConfig::load(self.config.as_deref())?;

        config.port = self.port;
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(log_file) = self.log_file {
            config.log_path = log_file;
        }
        if let Some(trace_file) = self.trace_file {
            config.trace_file = Some(trace_file);
        }

        config.validate()?;
        Ok(config)
    }
}

#[async_std::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage errors exit 1 like every other setup failure
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rexecd: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config()?;
    let _trace_guard = utils::tracing::setup_tracing(config.trace_file.as_deref())?;

    tracing::warn!(
        "Clients are not authenticated and can run any command as this user; \
         keep the daemon on a trusted network"
    );

    let shutdown_rx = utils::signals::install_shutdown_handler()?;
    let (log, log_writer) = ConnectionLog::open(&config.log_path)?;
    let (reaper, _reaper_task) = ChildReaper::spawn(log.clone());
    let stats = reaper.stats();

    let mut daemon_server = match DaemonServer::new(&config, log, reaper) {
        Ok(daemon_server) => daemon_server,
        Err(e) => {
            log_writer.close().await;
            return Err(e);
        }
    };
    tracing::info!(
        address = %daemon_server.local_addr(),
        log = %config.log_path.display(),
        "Daemon server ready"
    );
    let outcome = daemon_server.run(shutdown_rx).await;

    tracing::info!(
        live_workers = stats.live(),
        reaped_workers = stats.reaped(),
        "Shutting down daemon server"
    );
    // Queued connection log entries must reach the file before exit
    log_writer.close().await;
    outcome
}
