//! Engine entry point

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use triarb::infrastructure::logging::init_logging;
use triarb::{Config, Runner};

#[derive(Parser)]
#[command(name = "triarb", about = "Triangular arbitrage engine", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_logging(Path::new("logs"));

    let mut runner = match Runner::initialize(config) {
        Ok(runner) => runner,
        Err(e) => {
            tracing::error!(error = %e, "initialization failed");
            return ExitCode::FAILURE;
        }
    };

    runner.run();
    runner.shutdown();

    ExitCode::SUCCESS
}
