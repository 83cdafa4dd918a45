use clap::Parser;
use insiderflow_cli::commands;
use insiderflow_cli::config::{Cli, Command};
use insiderflow_cli::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);
    tracing::info!("insiderflow v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Ingest(args) => {
            let report = commands::ingest(args).await?;
            if !report.failed.is_empty() {
                anyhow::bail!("{} work item(s) failed and need redelivery", report.failed.len());
            }
        }
        Command::Extract(args) => commands::extract(&args)?,
        Command::Partitions(args) => {
            commands::partitions(&args)?;
        }
    }
    Ok(())
}
