mod logging;
mod shutdown;

use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use hopper_core::app::commands;
use hopper_core::{BrokerBuilder, BrokerConfig, Client, Server};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "hopper")]
#[command(version)]
#[command(about = "In-memory job broker with blocking result retrieval")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the broker in the foreground
    Serve(BrokerArgs),

    /// Start a background broker unless one already answers
    Start(BrokerArgs),

    /// Ask the running broker to stop
    Stop(BrokerArgs),

    /// Report whether a broker answers, with its counters
    Status(BrokerArgs),
}

#[derive(Args, Debug, Clone)]
struct BrokerArgs {
    /// TOML config file
    #[arg(long, env = "HOPPER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8989
    #[arg(long, env = "HOPPER_LISTEN")]
    listen: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "HOPPER_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, env = "HOPPER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Seconds between reaper sweeps
    #[arg(long, env = "HOPPER_GC_INTERVAL")]
    gc_interval: Option<u64>,

    /// Seconds a posted result is kept
    #[arg(long, env = "HOPPER_RESULT_TTL")]
    result_ttl: Option<u64>,
}

impl BrokerArgs {
    /// Config file (or defaults) with flags layered on top.
    fn load(&self) -> hopper_core::Result<BrokerConfig> {
        let mut config = BrokerConfig::load(self.config.as_deref())?;
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(path) = &self.log_file {
            config.log_file = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(secs) = self.gc_interval {
            config.gc_interval_secs = secs;
        }
        if let Some(secs) = self.result_ttl {
            config.result_ttl_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

async fn serve(config: BrokerConfig) -> hopper_core::Result<()> {
    let runtime = BrokerBuilder::new(config)
        .with_default_commands()?
        .expect_commands(&commands::ALL)
        .build()?;
    let server = Server::bind(runtime).await?;
    let shutdown = shutdown::install_shutdown_handler();
    server.run(shutdown).await
}

async fn probe(config: &BrokerConfig) -> Option<hopper_core::observability::BrokerCounts> {
    let mut client = Client::connect(&config.listen_addr, PROBE_TIMEOUT).await.ok()?;
    client.status().await.ok()
}

/// Re-run this executable as `serve` with the remaining arguments, detached
/// from our stdin.
fn spawn_background() -> std::io::Result<u32> {
    let exe = std::env::current_exe()?;
    let child = std::process::Command::new(exe)
        .arg("serve")
        .args(std::env::args_os().skip(2))
        .stdin(Stdio::null())
        .spawn()?;
    Ok(child.id())
}

async fn run(cli: Cli) -> hopper_core::Result<ExitCode> {
    match cli.command {
        Command::Serve(args) => {
            let config = args.load()?;
            let _guard = logging::init(&config.log_level, config.log_file.as_deref())?;
            serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Start(args) => {
            let config = args.load()?;
            if probe(&config).await.is_some() {
                println!("hopper is already running on {}", config.listen_addr);
                return Ok(ExitCode::SUCCESS);
            }
            let pid = spawn_background()?;
            println!("started hopper on {} (pid {pid})", config.listen_addr);
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop(args) => {
            let config = args.load()?;
            let stopped = match Client::connect(&config.listen_addr, PROBE_TIMEOUT).await {
                Ok(mut client) => client.stop_server().await.is_ok(),
                Err(_) => false,
            };
            if stopped {
                println!("hopper on {} is stopping", config.listen_addr);
                Ok(ExitCode::SUCCESS)
            } else {
                println!("no hopper running on {}", config.listen_addr);
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Status(args) => {
            let config = args.load()?;
            match probe(&config).await {
                Some(counts) => {
                    println!("hopper is running on {}", config.listen_addr);
                    println!(
                        "ready={} reserved={} delayed={} tubes={} sessions={} results={} waiting={}",
                        counts.queue.ready,
                        counts.queue.reserved,
                        counts.queue.delayed,
                        counts.queue.tubes,
                        counts.queue.sessions,
                        counts.cache.items,
                        counts.queue.waiters + counts.cache.waiters,
                    );
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    println!("no hopper running on {}", config.listen_addr);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("hopper: {e}");
            ExitCode::FAILURE
        }
    }
}
