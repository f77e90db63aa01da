use std::path::PathBuf;

use clap::Parser;
use log::error;

use bgce::config::Config;
use bgce::display::{DisplayBackend, DrmBackend};
use bgce::orchestrator::{self, ServerOptions};

/// A minimal console display server.
#[derive(Parser, Debug)]
#[command(name = "bgce", version, about)]
struct Args {
    /// Path to the listening Unix stream socket.
    #[arg(long, default_value = "/tmp/bgce.sock")]
    socket_path: PathBuf,

    /// Preferred scanout width, used if the display doesn't dictate one.
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Preferred scanout height, used if the display doesn't dictate one.
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Path to the config file. Defaults to ~/.config/bgce.conf.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let config_path = args.config.or_else(Config::default_path);
    let config = match config_path {
        Some(path) => Config::load(&path).unwrap_or_else(|e| {
            error!("failed to load config from {path:?}: {e}, using defaults");
            Config::default()
        }),
        None => Config::default(),
    };

    let options = ServerOptions {
        socket_path: args.socket_path,
        preferred_width: args.width,
        preferred_height: args.height,
        config,
    };

    let backend: Box<dyn DisplayBackend + Send> = Box::new(DrmBackend::new());
    if let Err(e) = orchestrator::run(options, backend) {
        error!("bgce exited with error: {e}");
        std::process::exit(1);
    }
}
