use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::storage::Storage;
use crate::types::{Feed, Post, Result};

/// In-memory backend: the default for tests and useful for embedding the
/// pipeline without a database.
#[derive(Default)]
pub struct MemoryStorage {
    feeds: RwLock<HashMap<Uuid, Feed>>,
    posts: RwLock<HashMap<Uuid, Post>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn order_posts(posts: &mut [Post]) {
    posts.sort_by(|a, b| {
        b.date_published
            .cmp(&a.date_published)
            .then(b.date_updated.cmp(&a.date_updated))
    });
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let feeds = self.feeds.read().await;
        Ok(feeds.values().find(|f| f.feed_url == url).cloned())
    }

    async fn get_or_create_feed(&self, defaults: Feed) -> Result<(Feed, bool)> {
        let mut feeds = self.feeds.write().await;
        if let Some(existing) = feeds.values().find(|f| f.feed_url == defaults.feed_url) {
            return Ok((existing.clone(), false));
        }
        feeds.insert(defaults.id, defaults.clone());
        Ok((defaults, true))
    }

    async fn save_feed(&self, feed: &Feed) -> Result<()> {
        let mut feeds = self.feeds.write().await;
        feeds.insert(feed.id, feed.clone());
        Ok(())
    }

    async fn all_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self.feeds.read().await;
        let mut all: Vec<Feed> = feeds.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.feed_url.cmp(&b.feed_url)));
        Ok(all)
    }

    async fn posts_by_guid(&self, feed_id: Uuid, guid: &str) -> Result<Vec<Post>> {
        let posts = self.posts.read().await;
        let mut matches: Vec<Post> = posts
            .values()
            .filter(|p| p.feed_id == feed_id && p.guid == guid)
            .cloned()
            .collect();
        matches.sort_by_key(|p| p.date_created);
        Ok(matches)
    }

    async fn posts_by_title_and_date(
        &self,
        feed_id: Uuid,
        title: &str,
        date: NaiveDate,
    ) -> Result<Vec<Post>> {
        let posts = self.posts.read().await;
        let mut matches: Vec<Post> = posts
            .values()
            .filter(|p| p.feed_id == feed_id && p.title == title && p.date_published == date)
            .cloned()
            .collect();
        matches.sort_by_key(|p| p.date_created);
        Ok(matches)
    }

    async fn create_post(&self, post: &Post) -> Result<()> {
        let mut posts = self.posts.write().await;
        posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn update_post(&self, post: &Post) -> Result<()> {
        let mut posts = self.posts.write().await;
        posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn delete_posts(&self, ids: &[Uuid]) -> Result<u64> {
        let mut posts = self.posts.write().await;
        let mut deleted = 0;
        for id in ids {
            if posts.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn posts_for_feed(&self, feed_id: Uuid, limit: Option<usize>) -> Result<Vec<Post>> {
        let posts = self.posts.read().await;
        let mut matches: Vec<Post> = posts
            .values()
            .filter(|p| p.feed_id == feed_id)
            .cloned()
            .collect();
        order_posts(&mut matches);
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn post_count(&self, feed_id: Uuid) -> Result<u64> {
        let posts = self.posts.read().await;
        Ok(posts.values().filter(|p| p.feed_id == feed_id).count() as u64)
    }
}
