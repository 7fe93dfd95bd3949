//! Operator tooling for the card notification aggregation state kept in the
//! coordination store.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trove_config::{Config, ConfigLoad, ConfigLoader};
use trove_core::{
    AggregationKey, StoreKeys, admin::AggregationAdmin, connect_store,
    ports::CoordinationStore,
};
use trove_model::{CardId, UserId};

#[derive(Parser, Debug)]
#[command(
    name = "trove-ctl",
    about = "Inspect and repair card notification aggregation state"
)]
struct Cli {
    /// Path to trove.toml (defaults to TROVE_CONFIG_PATH, then ./trove.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the buffer, lock and queued flush jobs for one aggregation key
    Inspect(KeyArgs),
    /// List flush jobs in the due index
    Due {
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Include jobs whose window has not closed yet
        #[arg(long)]
        all: bool,
    },
    /// Drop the buffer, lock and queued jobs for one key without notifying
    Purge(KeyArgs),
    /// Validate configuration and coordination store connectivity
    Check,
}

#[derive(Args, Debug)]
struct KeyArgs {
    /// Card the events were recorded against
    #[arg(long)]
    card: CardId,
    /// User who saved the card
    #[arg(long)]
    actor: UserId,
    /// Owner of the card it was saved via
    #[arg(long)]
    recipient: UserId,
}

impl KeyArgs {
    fn key(&self) -> AggregationKey {
        AggregationKey::new(self.card, &self.actor, &self.recipient)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Inspect(args) => {
            let snapshot = admin(&config).await?.inspect(&args.key()).await?;
            print_json(&snapshot)
        }
        Command::Due { limit, all } => {
            let cutoff = if all {
                i64::MAX
            } else {
                chrono::Utc::now().timestamp_millis()
            };
            let jobs = admin(&config).await?.due(cutoff, limit).await?;
            print_json(&jobs)
        }
        Command::Purge(args) => {
            let report = admin(&config).await?.purge(&args.key()).await?;
            print_json(&report)
        }
        Command::Check => run_check(&config).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad { config, warnings } =
        loader.load().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => warn!(hint = %hint, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
    }

    Ok(config)
}

async fn open_store(config: &Config) -> Result<Arc<dyn CoordinationStore>> {
    connect_store(config)
        .await
        .context("failed to connect to the coordination store")
}

async fn admin(config: &Config) -> Result<AggregationAdmin> {
    let store = open_store(config).await?;
    Ok(AggregationAdmin::new(
        store,
        StoreKeys::new(config.aggregation.key_prefix.clone()),
        config.aggregation.window,
    ))
}

async fn run_check(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    store
        .ping()
        .await
        .context("coordination store did not answer PING")?;

    let backend = if config.redis.is_some() {
        "redis"
    } else {
        "in-memory"
    };
    println!("coordination store: {backend} (reachable)");
    println!("key prefix: {}", config.aggregation.key_prefix);
    println!(
        "aggregation window: {} ms (entry ttl {} ms)",
        config.aggregation.window.as_millis(),
        config.entry_ttl().as_millis()
    );
    println!(
        "flush triggers: timer={} sweeper={}",
        config.flush.timer, config.flush.sweeper.enabled
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}
