//! Pilet gateway CLI entry point

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

use pilet_gateway::config::normalize_prefix;
use pilet_gateway::loader::ModuleLoader;
use pilet_gateway::{Config, Host};

/// Pilet - serve scripted HTTP plugins published on a manifest feed
#[derive(Parser)]
#[command(name = "pilet", version, about)]
struct Cli {
    /// Manifest feed URL
    #[arg(long)]
    feed_url: Option<Url>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Path prefix plugins are mounted under
    #[arg(long)]
    prefix: Option<String>,

    /// Do not subscribe to feed change notifications
    #[arg(long)]
    no_watch: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve plugins (default)
    Serve,
    /// Print the descriptors currently on the feed
    Feed,
    /// Load a single plugin and print its exports
    Inspect {
        /// Entry module URL
        location: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,pilet_gateway=info",
        1 => "info,pilet_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(feed_url) = cli.feed_url {
        config.feed_url = feed_url;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(prefix) = cli.prefix.as_deref() {
        config.api_prefix = normalize_prefix(prefix);
    }
    if cli.no_watch {
        config.watch = false;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Feed => print_feed(config).await,
        Command::Inspect { location } => inspect(&location, config.load_timeout).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        feed = %config.feed_url,
        prefix = %config.api_prefix,
        port = config.port,
        "starting pilet gateway"
    );
    Host::new(config)?.run().await?;
    Ok(())
}

async fn print_feed(config: Config) -> anyhow::Result<()> {
    let host = Host::new(config)?;
    let mut descriptors = host.feed().fetch_all().await?;
    descriptors.sort_by(|a, b| a.name.cmp(&b.name));

    if descriptors.is_empty() {
        println!("No plugins published.");
        return Ok(());
    }
    for descriptor in descriptors {
        println!("{}@{}  {}", descriptor.name, descriptor.version, descriptor.location);
    }
    Ok(())
}

async fn inspect(location: &str, timeout: Duration) -> anyhow::Result<()> {
    let loader = ModuleLoader::new(reqwest::Client::new(), timeout);
    let exports = loader.try_load(location).await?;

    println!("{location}");
    if exports.is_empty() {
        println!("  (no exports)");
    }
    for (name, binding) in exports.bindings() {
        println!("  {name}  {binding}");
    }
    if !exports.has_setup() {
        println!("warning: no setup(router) export, plugin would register no routes");
    }
    Ok(())
}
