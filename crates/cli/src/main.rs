mod args;
mod output;
mod runner;

use clap::Parser;
use kestrel_common::KestrelError;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use args::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match runner::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ (KestrelError::Config(_) | KestrelError::TargetParse(_))) => {
            error!("{}", e);
            ExitCode::from(1)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt().with_env_filter(filter).compact().init();
}
