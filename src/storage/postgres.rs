use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::storage::Storage;
use crate::types::{Category, Enclosure, Feed, FeedErrorKind, ImportError, Post, Result};

/// PostgreSQL backend.
///
/// Category/enclosure lists live as JSONB on their owning row. There is
/// deliberately no unique index on (feed_id, guid): concurrent duplicate
/// inserts are repaired by the upserter, not rejected here.
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ImportError::Storage(e.to_string()))?;
        info!("database migrations applied");
        Ok(())
    }
}

fn feed_from_row(row: &PgRow) -> Result<Feed> {
    let categories: serde_json::Value = row.try_get("categories")?;
    Ok(Feed {
        id: row.try_get("id")?,
        feed_url: row.try_get("feed_url")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        link: row.try_get("link")?,
        http_etag: row.try_get("http_etag")?,
        http_last_modified: row.try_get::<Option<DateTime<Utc>>, _>("http_last_modified")?,
        date_last_refresh: row.try_get::<Option<DateTime<Utc>>, _>("date_last_refresh")?,
        date_last_requested: row.try_get::<Option<DateTime<Utc>>, _>("date_last_requested")?,
        is_active: row.try_get("is_active")?,
        update_frequency_hours: row
            .try_get::<Option<i32>, _>("update_frequency_hours")?
            .map(|h| h as u32),
        last_error: row
            .try_get::<Option<String>, _>("last_error")?
            .as_deref()
            .and_then(FeedErrorKind::parse),
        sort: row.try_get("sort")?,
        categories: serde_json::from_value(categories).unwrap_or_default(),
        date_created: row.try_get("date_created")?,
        date_changed: row.try_get("date_changed")?,
    })
}

fn post_from_row(row: &PgRow) -> Result<Post> {
    let categories: serde_json::Value = row.try_get("categories")?;
    let enclosures: serde_json::Value = row.try_get("enclosures")?;
    Ok(Post {
        id: row.try_get("id")?,
        feed_id: row.try_get("feed_id")?,
        title: row.try_get("title")?,
        link: row.try_get("link")?,
        content: row.try_get("content")?,
        guid: row.try_get("guid")?,
        author: row.try_get("author")?,
        date_published: row.try_get::<NaiveDate, _>("date_published")?,
        date_updated: row.try_get("date_updated")?,
        categories: serde_json::from_value(categories).unwrap_or_default(),
        enclosures: serde_json::from_value(enclosures).unwrap_or_default(),
        date_created: row.try_get("date_created")?,
    })
}

fn categories_json(categories: &[Category]) -> serde_json::Value {
    serde_json::to_value(categories).unwrap_or_default()
}

fn enclosures_json(enclosures: &[Enclosure]) -> serde_json::Value {
    serde_json::to_value(enclosures).unwrap_or_default()
}

#[async_trait]
impl Storage for PgStorage {
    async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let row = sqlx::query("SELECT * FROM feeds WHERE feed_url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(feed_from_row).transpose()
    }

    async fn get_or_create_feed(&self, defaults: Feed) -> Result<(Feed, bool)> {
        let result = sqlx::query(
            r#"
            INSERT INTO feeds (id, feed_url, name, description, link, http_etag,
                http_last_modified, date_last_refresh, date_last_requested, is_active,
                update_frequency_hours, last_error, sort, categories, date_created, date_changed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (feed_url) DO NOTHING
            "#,
        )
        .bind(defaults.id)
        .bind(&defaults.feed_url)
        .bind(&defaults.name)
        .bind(&defaults.description)
        .bind(&defaults.link)
        .bind(&defaults.http_etag)
        .bind(defaults.http_last_modified)
        .bind(defaults.date_last_refresh)
        .bind(defaults.date_last_requested)
        .bind(defaults.is_active)
        .bind(defaults.update_frequency_hours.map(|h| h as i32))
        .bind(defaults.last_error.map(|e| e.as_str()))
        .bind(defaults.sort)
        .bind(categories_json(&defaults.categories))
        .bind(defaults.date_created)
        .bind(defaults.date_changed)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;
        let feed = self
            .feed_by_url(&defaults.feed_url)
            .await?
            .ok_or_else(|| ImportError::Storage("feed vanished during get_or_create".to_string()))?;
        Ok((feed, created))
    }

    async fn save_feed(&self, feed: &Feed) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET feed_url = $2, name = $3, description = $4, link = $5, http_etag = $6,
                http_last_modified = $7, date_last_refresh = $8, date_last_requested = $9,
                is_active = $10, update_frequency_hours = $11, last_error = $12, sort = $13,
                categories = $14, date_changed = $15
            WHERE id = $1
            "#,
        )
        .bind(feed.id)
        .bind(&feed.feed_url)
        .bind(&feed.name)
        .bind(&feed.description)
        .bind(&feed.link)
        .bind(&feed.http_etag)
        .bind(feed.http_last_modified)
        .bind(feed.date_last_refresh)
        .bind(feed.date_last_requested)
        .bind(feed.is_active)
        .bind(feed.update_frequency_hours.map(|h| h as i32))
        .bind(feed.last_error.map(|e| e.as_str()))
        .bind(feed.sort)
        .bind(categories_json(&feed.categories))
        .bind(feed.date_changed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_feeds(&self) -> Result<Vec<Feed>> {
        let rows = sqlx::query("SELECT * FROM feeds ORDER BY name, feed_url")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(feed_from_row).collect()
    }

    async fn posts_by_guid(&self, feed_id: Uuid, guid: &str) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            "SELECT * FROM posts WHERE feed_id = $1 AND guid = $2 ORDER BY date_created",
        )
        .bind(feed_id)
        .bind(guid)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(post_from_row).collect()
    }

    async fn posts_by_title_and_date(
        &self,
        feed_id: Uuid,
        title: &str,
        date: NaiveDate,
    ) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM posts
            WHERE feed_id = $1 AND title = $2 AND date_published = $3
            ORDER BY date_created
            "#,
        )
        .bind(feed_id)
        .bind(title)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(post_from_row).collect()
    }

    async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, feed_id, title, link, content, guid, author,
                date_published, date_updated, categories, enclosures, date_created)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(post.id)
        .bind(post.feed_id)
        .bind(&post.title)
        .bind(&post.link)
        .bind(&post.content)
        .bind(&post.guid)
        .bind(&post.author)
        .bind(post.date_published)
        .bind(post.date_updated)
        .bind(categories_json(&post.categories))
        .bind(enclosures_json(&post.enclosures))
        .bind(post.date_created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET title = $2, link = $3, content = $4, guid = $5, author = $6,
                date_published = $7, date_updated = $8, categories = $9, enclosures = $10
            WHERE id = $1
            "#,
        )
        .bind(post.id)
        .bind(&post.title)
        .bind(&post.link)
        .bind(&post.content)
        .bind(&post.guid)
        .bind(&post.author)
        .bind(post.date_published)
        .bind(post.date_updated)
        .bind(categories_json(&post.categories))
        .bind(enclosures_json(&post.enclosures))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_posts(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM posts WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn posts_for_feed(&self, feed_id: Uuid, limit: Option<usize>) -> Result<Vec<Post>> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query(
                    r#"
                    SELECT * FROM posts WHERE feed_id = $1
                    ORDER BY date_published DESC, date_updated DESC
                    LIMIT $2
                    "#,
                )
                .bind(feed_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM posts WHERE feed_id = $1
                    ORDER BY date_published DESC, date_updated DESC
                    "#,
                )
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(post_from_row).collect()
    }

    async fn post_count(&self, feed_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE feed_id = $1")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
