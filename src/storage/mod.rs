pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::types::{Feed, Post, Result};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

/// Persistence contract the import pipeline needs.
///
/// Lookups that key a uniqueness assumption (`posts_by_guid`,
/// `posts_by_title_and_date`) return every matching row: a result with more
/// than one element is how a violated assumption surfaces, and the upserter
/// repairs it. `get_or_create_feed` is atomic per row, but nothing here
/// serializes two concurrent inserts of the same post identity — the import
/// lease is advisory, so callers must tolerate duplicates appearing.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>>;

    /// Find the feed with this URL or insert `defaults`. The boolean is true
    /// when the row was created.
    async fn get_or_create_feed(&self, defaults: Feed) -> Result<(Feed, bool)>;

    async fn save_feed(&self, feed: &Feed) -> Result<()>;

    async fn all_feeds(&self) -> Result<Vec<Feed>>;

    async fn posts_by_guid(&self, feed_id: Uuid, guid: &str) -> Result<Vec<Post>>;

    async fn posts_by_title_and_date(
        &self,
        feed_id: Uuid,
        title: &str,
        date: NaiveDate,
    ) -> Result<Vec<Post>>;

    async fn create_post(&self, post: &Post) -> Result<()>;

    async fn update_post(&self, post: &Post) -> Result<()>;

    async fn delete_posts(&self, ids: &[Uuid]) -> Result<u64>;

    /// Posts for a feed ordered most-recently-published first
    /// (`date_published` desc, then `date_updated` desc).
    async fn posts_for_feed(&self, feed_id: Uuid, limit: Option<usize>) -> Result<Vec<Post>>;

    async fn post_count(&self, feed_id: Uuid) -> Result<u64>;
}
