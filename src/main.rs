mod cli;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "fsredirect=info,warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout is reserved for command output.
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn main() -> ExitCode {
    let args = cli::Cli::parse();
    init_tracing(args.log_json);

    match cli::run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
