mod common;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use common::{doc, entry_with_guid, Script, ScriptedParser};
use feedspool::scheduler::lease_key;
use feedspool::storage::MemoryStorage;
use feedspool::types::{Feed, ImporterConfig, Result};
use feedspool::{FeedImporter, LeaseStore, MemoryLeaseStore, RefreshScheduler, Storage};

const URL: &str = "https://example.com/feed.xml";

fn build(
    config: ImporterConfig,
) -> (
    Arc<ScriptedParser>,
    Arc<MemoryStorage>,
    Arc<MemoryLeaseStore>,
    RefreshScheduler,
) {
    common::init_tracing();
    let parser = Arc::new(ScriptedParser::new());
    let storage = Arc::new(MemoryStorage::new());
    let leases = Arc::new(MemoryLeaseStore::new());
    let importer = Arc::new(FeedImporter::new(
        parser.clone(),
        storage.clone(),
        config.clone(),
    ));
    let scheduler = RefreshScheduler::new(importer, leases.clone(), config);
    (parser, storage, leases, scheduler)
}

#[tokio::test]
async fn lease_is_mutually_exclusive_until_released() {
    let leases = MemoryLeaseStore::new();
    let ttl = Duration::from_secs(60);

    assert!(leases.acquire("k", ttl).await, "free lease can be taken");
    assert!(!leases.acquire("k", ttl).await, "held lease cannot be retaken");

    leases.release("k").await;
    assert!(leases.acquire("k", ttl).await, "released lease is free again");
}

#[tokio::test]
async fn expired_lease_does_not_strand_the_key() {
    let leases = MemoryLeaseStore::new();
    let ttl = Duration::from_millis(50);

    assert!(leases.acquire("k", ttl).await);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(
        leases.acquire("k", ttl).await,
        "a crashed holder's lease lapses with its TTL"
    );
}

#[tokio::test]
async fn enqueued_feed_is_imported() -> Result<()> {
    let (parser, storage, _, scheduler) = build(ImporterConfig::default());
    parser
        .script(
            URL,
            Script::Doc(doc(
                Some(200),
                "Example",
                vec![entry_with_guid("A", b"g1", None)],
            )),
        )
        .await;

    scheduler.enqueue(URL);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let feed = storage.feed_by_url(URL).await?.expect("worker imported the feed");
    assert_eq!(storage.post_count(feed.id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn held_lease_skips_the_refresh() -> Result<()> {
    let (parser, storage, leases, scheduler) = build(ImporterConfig::default());
    parser
        .script(
            URL,
            Script::Doc(doc(
                Some(200),
                "Example",
                vec![entry_with_guid("A", b"g1", None)],
            )),
        )
        .await;

    assert!(leases.acquire(&lease_key(URL), Duration::from_secs(60)).await);

    scheduler.enqueue(URL);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        storage.feed_by_url(URL).await?.is_none(),
        "another holder's import must not run concurrently"
    );

    leases.release(&lease_key(URL)).await;
    scheduler.enqueue(URL);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(storage.feed_by_url(URL).await?.is_some(), "runs once the lease frees");
    Ok(())
}

#[tokio::test]
async fn run_pending_dispatches_only_due_feeds() -> Result<()> {
    let (parser, storage, _, scheduler) = build(ImporterConfig::default());

    let due = Feed::new("https://example.com/due.xml", "due", "");
    storage.get_or_create_feed(due).await?;

    let mut fresh = Feed::new("https://example.com/fresh.xml", "fresh", "");
    fresh.date_last_refresh = Some(Utc::now());
    storage.get_or_create_feed(fresh).await?;

    let mut inactive = Feed::new("https://example.com/inactive.xml", "inactive", "");
    inactive.is_active = false;
    storage.get_or_create_feed(inactive).await?;

    parser
        .script(
            "https://example.com/due.xml",
            Script::Doc(doc(Some(200), "due", vec![entry_with_guid("A", b"g1", None)])),
        )
        .await;

    let dispatched = scheduler.run_pending().await?;
    assert_eq!(dispatched, 1, "only the stale active feed is due");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let feed = storage
        .feed_by_url("https://example.com/due.xml")
        .await?
        .unwrap();
    assert_eq!(storage.post_count(feed.id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn unrequested_feeds_stop_refreshing_when_limited() -> Result<()> {
    let mut config = ImporterConfig::default();
    config.last_requested_limit = Some(chrono::Duration::hours(1));
    let (_, storage, _, scheduler) = build(config);

    let mut stale = Feed::new("https://example.com/unread.xml", "unread", "");
    stale.date_last_requested = Some(Utc::now() - chrono::Duration::hours(3));
    storage.get_or_create_feed(stale).await?;

    let dispatched = scheduler.run_pending().await?;
    assert_eq!(dispatched, 0, "feeds nobody reads are left alone");
    Ok(())
}
