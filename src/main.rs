use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use skylark_sync::config;
use skylark_sync::db::{self, LocalStore, SqliteStore};
use skylark_sync::gateway::SkylarkClient;
use skylark_sync::model::Item;
use skylark_sync::sync::SyncEngine;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one sync pass against the CMS and print the resulting diff
    Sync {
        /// Physically remove soft-deleted items after the pass
        #[arg(long)]
        purge: bool,
    },
    /// List active items in feed order
    List {
        /// Only items under this divider id
        #[arg(long)]
        divider: Option<String>,
    },
    /// List dividers
    Dividers {
        /// Case-insensitive title substring
        #[arg(long)]
        title: Option<String>,
    },
    /// Mark an item as favorite
    Favorite {
        id: String,
        /// Clear the flag instead
        #[arg(long)]
        off: bool,
    },
    /// Remove soft-deleted items
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    match args.command {
        Command::Sync { purge } => {
            let gateway = Arc::new(SkylarkClient::from_config(&cfg)?);
            let engine = SyncEngine::new(store.clone(), gateway, cfg.app.collection.clone());
            let outcome = engine
                .sync_with_timeout(cfg.sync_timeout(), |items| {
                    info!(items = items.len(), "loaded local snapshot")
                })
                .await;
            match outcome {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome.diff)?);
                    print_items(&outcome.items);
                }
                Err(err) => {
                    error!(%err, "sync failed");
                    let message = err.user_message();
                    return Err(anyhow::Error::new(err).context(message));
                }
            }
            if purge {
                let removed = store.purge_deleted().await?;
                info!(removed, "purged soft-deleted items");
            }
        }
        Command::List { divider } => {
            let items = store.fetch_active_items(divider.as_deref()).await?;
            print_items(&items);
        }
        Command::Dividers { title } => {
            for divider in store.fetch_dividers(title.as_deref()).await? {
                println!("{}\t{}", divider.id, divider.title);
            }
        }
        Command::Favorite { id, off } => {
            if !store.set_favorite(&id, !off).await? {
                anyhow::bail!("no item with id {id}");
            }
            println!("{id}: favorite={}", !off);
        }
        Command::Purge => {
            let removed = store.purge_deleted().await?;
            println!("removed {removed} items");
        }
    }
    Ok(())
}

fn print_items(items: &[Item]) {
    for (pos, item) in items.iter().enumerate() {
        let star = if item.is_favorite { "*" } else { " " };
        println!(
            "{pos:>3} {star} {}\t{}\t{}",
            item.id,
            item.title,
            item.divider_id.as_deref().unwrap_or("-")
        );
    }
}
