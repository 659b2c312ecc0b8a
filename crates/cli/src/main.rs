mod args;
mod output;
mod runner;

use anyhow::Result;
use clap::Parser;

use args::Cli;
use runner::run;
use subdex_telemetry::{init_tracing, install_prometheus};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    if let Some(addr) = cli.metrics_addr {
        install_prometheus(addr)?;
    }

    run(cli).await
}
