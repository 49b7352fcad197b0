use std::path::PathBuf;

use clap::Parser;
use journeygrid::{relay::server, RelayConfig, RelayService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relay-server")]
#[command(about = "Relay journey prompts to a language model over a websocket")]
struct Args {
    /// YAML file with relay settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:3000
    #[arg(long)]
    bind: Option<String>,

    /// Chat model used for completions
    #[arg(long)]
    model: Option<String>,

    /// Upper bound on tokens per completion
    #[arg(long)]
    max_tokens: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,relay_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RelayConfig::from_yaml_file(path)?,
        None => RelayConfig::default(),
    }
    .with_env_overrides();
    if let Some(bind) = args.bind {
        config = config.with_bind(bind);
    }
    if let Some(model) = args.model {
        config = config.with_model(model);
    }
    if let Some(max_tokens) = args.max_tokens {
        config = config.with_max_tokens(max_tokens);
    }

    let addr = config.socket_addr()?;
    let provider = config.build_provider()?;
    tracing::info!(provider = provider.name(), model = %config.model, "relay configured");

    let mut service = RelayService::new(provider, config.model.clone())?;
    if let Some(temperature) = config.temperature {
        service = service.with_temperature(temperature);
    }
    if let Some(max_tokens) = config.max_tokens {
        service = service.with_max_tokens(max_tokens);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    server::serve(listener, service.into_state()).await?;
    Ok(())
}
