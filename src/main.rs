//! Node Supervisor - launch, watch and attach to a local Ethereum node.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use node_supervisor::config::{ConfigLoader, NodeConfig};
use node_supervisor::display;
use node_supervisor::options::{
    DefaultPaths, SpawnOptions, BIN_DIR_KEY, DATADIR_KEY, IPC_PATH_KEY,
};
use node_supervisor::supervisor::{self, NodeSupervisor};

#[derive(Parser)]
#[command(
    name = "node-supervisor",
    about = "Launch, watch and attach to a local Ethereum node",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the node and supervise it until interrupted.
    Run {
        /// Data directory passed to the node.
        #[arg(long)]
        datadir: Option<PathBuf>,
        /// IPC endpoint passed to the node.
        #[arg(long)]
        ipcpath: Option<PathBuf>,
        /// Directory holding the node binary.
        #[arg(long)]
        bin_dir: Option<PathBuf>,
        /// Extra node flag, as `name` or `name=value`. Repeatable.
        #[arg(long = "flag", value_name = "NAME[=VALUE]")]
        flags: Vec<String>,
    },
    /// Attach to an already running node over its IPC endpoint.
    Attach,
    /// Print the default data directory and IPC endpoint.
    Paths,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<NodeConfig, String> {
    let loader = match path {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    loader.load().map_err(|e| e.to_string())
}

fn spawn_options(
    datadir: Option<PathBuf>,
    ipcpath: Option<PathBuf>,
    bin_dir: Option<PathBuf>,
    flags: &[String],
) -> Option<SpawnOptions> {
    let mut options = SpawnOptions::new();
    for (key, path) in [
        (DATADIR_KEY, datadir),
        (IPC_PATH_KEY, ipcpath),
        (BIN_DIR_KEY, bin_dir),
    ] {
        if let Some(path) = path {
            options.insert(key, Some(path.to_string_lossy().into_owned()));
        }
    }
    for flag in flags {
        let flag = flag.trim_start_matches('-');
        match flag.split_once('=') {
            Some((name, value)) => options.insert(name, Some(value.to_string())),
            None => options.insert(flag, None),
        }
    }
    (!options.is_empty()).then_some(options)
}

/// Print events until ctrl-c, then stop.
async fn supervise(node: &NodeSupervisor) {
    let mut events = node.subscribe();
    let mut status = node.watch_status();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = events.recv() => display::print_event(&event),
            Ok(()) = status.changed() => display::print_status(*status.borrow_and_update()),
        }
    }
    node.stop(None).await;
    while let Some(event) = events.try_recv() {
        display::print_event(&event);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Paths => {
            let defaults = DefaultPaths::detect().map_err(|e| e.to_string())?;
            display::print_paths(&defaults.datadir, &defaults.ipc_path);
            Ok(())
        }
        Commands::Run {
            datadir,
            ipcpath,
            bin_dir,
            flags,
        } => {
            let config = load_config(cli.config)?;
            let node = supervisor::init(NodeSupervisor::new(config)).map_err(|e| e.to_string())?;
            let options = spawn_options(datadir, ipcpath, bin_dir, &flags);
            tracing::info!(?options, "Starting node supervisor");

            let mut events = node.subscribe();
            if !node.start(options).await.map_err(|e| e.to_string())? {
                for event in events.drain() {
                    display::print_event(&event);
                }
                return Err("node did not start".to_string());
            }
            for event in events.drain() {
                display::print_event(&event);
            }
            supervise(node).await;
            Ok(())
        }
        Commands::Attach => {
            let config = load_config(cli.config)?;
            let node = supervisor::init(NodeSupervisor::new(config)).map_err(|e| e.to_string())?;
            let mut events = node.subscribe();
            node.connect_to_local().await.map_err(|e| e.to_string())?;
            for event in events.drain() {
                display::print_event(&event);
            }
            supervise(node).await;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            display::print_error(&message);
            ExitCode::FAILURE
        }
    }
}
