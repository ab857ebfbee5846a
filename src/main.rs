use anyhow::Result;
use clap::Parser;

use otterstack::cli::{self, Cli};
use otterstack::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    cli::run(cli).await
}
