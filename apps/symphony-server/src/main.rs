use std::net::SocketAddr;

use clap::Parser;
use symphony_config::Settings;

#[derive(Debug, Parser)]
#[command(name = "symphony-server")]
struct Args {
    /// Override the HOST/PORT environment bind address.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env()?;
    let listen = match args.listen {
        Some(listen) => listen,
        None => format!("{}:{}", settings.host, settings.port).parse()?,
    };

    symphony_server::run_server(settings, listen).await
}
