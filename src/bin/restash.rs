//! restash — command-line client for REST resources
//!
//! Reads and prints resources through the same cache and resource layer the
//! library exposes. The credential comes from `RESTASH_TOKEN`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use restash::config::{Config, TOKEN_ENV_VAR};
use restash::{ApiClient, EnvToken, HttpResource, QueryCache, Resource};
use serde_json::{Map, Value};

/// Restash CLI
#[derive(Parser)]
#[command(name = "restash")]
#[command(version = restash::PKG_VERSION)]
#[command(about = "Cache-aware REST resource client")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "RESTASH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List items of a resource
    List {
        /// Resource name (e.g. "agent")
        resource: String,
        /// List parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Fetch one item of a resource
    Get {
        /// Resource name
        resource: String,
        /// Item id
        id: String,
    },

    /// Print version information
    Version,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Command::Version = args.command {
        println!("restash {}", restash::version_string());
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;
    let client = ApiClient::new(
        config.client_config(),
        Arc::new(EnvToken::new(TOKEN_ENV_VAR)),
    )?;
    let cache = QueryCache::new(config.cache_config());
    let resource = |name: &str| {
        Resource::new(
            name,
            HttpResource::<Value>::new(client.clone(), config.resource_path(name)),
            cache.clone(),
        )
    };

    match args.command {
        Command::List {
            resource: name,
            params,
        } => {
            let query = (!params.is_empty()).then(|| {
                Value::Object(
                    params
                        .into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect::<Map<_, _>>(),
                )
            });
            let page = resource(&name).fetch_list(query).await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::Get { resource: name, id } => {
            let item = resource(&name).fetch_detail(&id).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::Version => {}
    }

    Ok(())
}
