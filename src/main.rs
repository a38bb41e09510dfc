use anyhow::Context;
use clap::{Parser as ClapParser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};

use feedspool::{
    FeedImporter, HttpParser, ImporterConfig, MemoryLeaseStore, PgStorage, RefreshScheduler,
    Storage,
};

#[derive(ClapParser)]
#[command(name = "feedspool", about = "Feed aggregator management commands")]
struct Cli {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a feed URL (or local file), creating it on first sight.
    Import {
        url: String,
        /// Refresh even if the feed was refreshed recently.
        #[arg(long)]
        force: bool,
        /// Treat the source as a path on disk.
        #[arg(long)]
        local: bool,
    },
    /// Refresh every known feed once.
    RefreshAll {
        #[arg(long)]
        force: bool,
    },
    /// Run the background refresh scheduler until interrupted.
    Serve,
    /// Delete all but the most recently published posts per feed.
    Expire {
        #[arg(long, default_value_t = 20)]
        keep: usize,
    },
    /// List known feeds with their status.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = ImporterConfig::default();
    let storage = PgStorage::connect(&cli.database_url)
        .await
        .context("failed to connect to database")?;
    storage.migrate().await.context("migrations failed")?;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let parser = Arc::new(HttpParser::new(&config).context("failed to build HTTP client")?);
    let importer = Arc::new(FeedImporter::new(parser, storage.clone(), config.clone()));

    match cli.command {
        Command::Import { url, force, local } => {
            let feed = importer.import_feed(&url, force, local).await?;
            info!("imported {} ({})", feed.name, feed.feed_url);
        }
        Command::RefreshAll { force } => {
            let feeds = storage.all_feeds().await?;
            info!("refreshing {} feeds", feeds.len());
            for mut feed in feeds {
                match importer.update_feed(&mut feed, None, force).await {
                    Ok(outcome) => info!("{}: {:?}", feed.feed_url, outcome),
                    Err(err) => error!("{}: {}", feed.feed_url, err),
                }
            }
        }
        Command::Serve => {
            let leases = Arc::new(MemoryLeaseStore::new());
            let scheduler = RefreshScheduler::new(importer, leases, config);
            scheduler.start().await;
            tokio::signal::ctrl_c().await?;
            scheduler.stop().await;
        }
        Command::Expire { keep } => {
            let feeds = storage.all_feeds().await?;
            let mut total = 0;
            for feed in feeds {
                total += importer.expire_old_posts(&feed, keep).await?;
            }
            info!("expired {} posts", total);
        }
        Command::List => {
            for feed in storage.all_feeds().await? {
                let status = feed
                    .last_error
                    .map(|e| e.as_str())
                    .unwrap_or(if feed.is_active { "ok" } else { "inactive" });
                let refreshed = feed
                    .date_last_refresh
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}\t{}\t{}\tlast refresh: {}",
                    feed.name, feed.feed_url, status, refreshed
                );
            }
        }
    }

    Ok(())
}
