use std::path::PathBuf;

use clap::Parser;
use colored::*;
use env_logger::Builder;
use log::{debug, info, LevelFilter};
use tokio::runtime::Runtime;

use fdbsync::config::{self, Overrides};
use fdbsync::{serve, Error, Result};

#[derive(Parser, Debug)]
#[clap(name = "fdbsync", rename_all = "kebab-case")]
/// Keep VXLAN FDB entries in sync with BGP learned siblings
pub struct Args {
    /// Path to fdbsync config.toml (built-in defaults if omitted)
    config_path: Option<PathBuf>,
    /// BIRD control socket, overrides the config file
    #[clap(long)]
    bird_socket: Option<PathBuf>,
    /// Seconds between reconciliation passes, overrides the config file
    #[clap(long)]
    interval: Option<u64>,
    /// Show debug logs (additive for trace logs)
    #[clap(short, parse(from_occurrences))]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let (fdbsync_level, other_level) = match args.verbose {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("fdbsync"), fdbsync_level)
        .filter(None, other_level)
        .init();
    info!("Logging at levels {}/{}", fdbsync_level, other_level);

    if let Err(err) = run(args) {
        eprintln!("{}", err.to_string().red());
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let overrides = Overrides {
        bird_socket: args.bird_socket,
        poll_interval: args.interval,
    };
    let config = config::load(args.config_path.as_deref(), overrides)?;
    debug!("Using {:?}", config);

    let runtime = Runtime::new().map_err(|err| Error::io("failed to start runtime", err))?;
    runtime.block_on(serve(config))
}
