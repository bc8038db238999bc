//! Tidewire command-line client entry point.

mod config;

use std::path::PathBuf;

use clap::Parser;
use tidewire_realtime::{ChannelEvent, ClientOptions, Realtime, StaticAuth};
use tracing_subscriber::EnvFilter;

/// Attach to a channel, optionally publish a message, and print traffic
/// until interrupted.
#[derive(Debug, Parser)]
#[command(name = "tidewire", version, about)]
struct Args {
    /// TOML file with client options.
    #[arg(short, long, env = "TIDEWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Service endpoint, overriding the config file.
    #[arg(short, long, env = "TIDEWIRE_ENDPOINT")]
    endpoint: Option<String>,

    /// API key.
    #[arg(short, long, env = "TIDEWIRE_KEY", conflicts_with = "token")]
    key: Option<String>,

    /// Bearer token, used instead of a key.
    #[arg(short, long, env = "TIDEWIRE_TOKEN")]
    token: Option<String>,

    /// Channel to attach to.
    #[arg(long, default_value = "demo")]
    channel: String,

    /// Publish this message after attaching. Parsed as JSON when possible.
    #[arg(short, long)]
    message: Option<String>,

    /// Name of the published message.
    #[arg(long, default_value = "message")]
    name: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting tidewire");

    let options = config::load(args.config.as_deref(), args.endpoint.as_deref())?;
    tracing::info!(endpoint = %options.endpoint, format = ?options.format, "configuration loaded");

    let auth = match (&args.key, &args.token) {
        (Some(key), _) => StaticAuth::key(key),
        (None, Some(token)) => StaticAuth::token(token),
        (None, None) => anyhow::bail!("either --key or --token is required"),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, options, auth))?;

    tracing::info!("closed cleanly");
    Ok(())
}

async fn run(args: Args, options: ClientOptions, auth: StaticAuth) -> anyhow::Result<()> {
    let client = Realtime::new(options, auth);
    client.on(None, |change| {
        let (previous, current) = (change.previous, change.current);
        match &change.reason {
            Some(reason) => println!("connection {previous} -> {current} ({reason})"),
            None => println!("connection {previous} -> {current}"),
        }
    });

    client.connect().await?;
    if let Some(id) = client.connection_id() {
        tracing::info!(connection_id = %id, "connected");
    }

    let channel = client.channel(&args.channel);
    let name = args.channel.clone();
    channel.on(None, move |event| match event {
        ChannelEvent::StateChanged(change) => {
            println!("channel {name}: {} -> {}", change.previous, change.current)
        }
        ChannelEvent::Error(reason) => println!("channel {name}: {reason}"),
    });
    channel.subscribe(None, |message| {
        let name = message.name.as_deref().unwrap_or("-");
        match &message.data {
            Some(data) => println!("[{name}] {data}"),
            None => println!("[{name}]"),
        }
    });
    channel.attach().await?;
    tracing::info!(channel = %args.channel, "attached");

    if let Some(text) = &args.message {
        let data = serde_json::from_str(text)
            .unwrap_or_else(|_| serde_json::Value::String(text.clone()));
        channel.publish(args.name.as_str(), data).await?;
        tracing::info!(channel = %args.channel, name = %args.name, "published");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupted, closing");
    client.close().await?;
    Ok(())
}
