use anyhow::Result;
use clap::Parser;
use mortality_cli::cli::{self, Cli, Commands};
use mortality_cli::{logger, mock_regression};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_logging(cli.json_logs);

    match cli.command {
        Commands::Run(args) => cli::run_command(args).await,
        Commands::MockServer { port, error_rate } => {
            mock_regression::start_mock_server(port, error_rate).await
        }
    }
}
