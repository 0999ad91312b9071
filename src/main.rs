use anyhow::Result;
use clap::Parser;
use kapso_middleware::config::Config;
use kapso_middleware::gateway;
use tracing_subscriber::EnvFilter;

/// Webhook middleware between Kapso WhatsApp deliveries and agent services.
#[derive(Parser, Debug)]
#[command(name = "kapso-middleware", version, about)]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kapso_middleware=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    gateway::run(&cli.host, cli.port, config).await
}
