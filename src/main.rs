//! Command line entry point of the performance regression pipeline.

use clap::Parser;
use env_logger::Env;
use log::error;

use perfci::cli::{execute, Cli};

#[tokio::main]
async fn main() {
    // stdout carries the outcome or the worker response, logs go to stderr
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}
