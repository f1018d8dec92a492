use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = carto_cli::Cli::parse();
    carto_cli::run(cli).await
}
