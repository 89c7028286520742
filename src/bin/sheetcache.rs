use clap::Parser;
use sheetcache::cli::{commands, Cli};
use sheetcache::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.log_format);

    commands::execute(cli).await
}
