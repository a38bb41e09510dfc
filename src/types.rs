use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::utils::text::clip;

/// Column limits, enforced by clipping before every write. Parser output is
/// untrusted length-wise.
pub const FEED_NAME_MAX: usize = 200;
pub const FEED_LINK_MAX: usize = 200;
pub const POST_TITLE_MAX: usize = 200;
pub const POST_LINK_MAX: usize = 200;
pub const POST_GUID_MAX: usize = 200;
pub const POST_AUTHOR_MAX: usize = 50;

pub const DEFAULT_TITLE: &str = "(no title)";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub feed_url: String,
    pub name: String,
    pub description: String,
    /// The link the channel claims for itself; can differ from `feed_url`.
    pub link: String,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<DateTime<Utc>>,
    pub date_last_refresh: Option<DateTime<Utc>>,
    pub date_last_requested: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Advisory per-feed refresh cadence; never computed by the core.
    pub update_frequency_hours: Option<u32>,
    pub last_error: Option<FeedErrorKind>,
    pub sort: i32,
    pub categories: Vec<Category>,
    pub date_created: DateTime<Utc>,
    pub date_changed: DateTime<Utc>,
}

impl Feed {
    pub fn new(feed_url: &str, name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            feed_url: feed_url.to_string(),
            name: clip(name, FEED_NAME_MAX),
            description: description.to_string(),
            link: String::new(),
            http_etag: None,
            http_last_modified: None,
            date_last_refresh: None,
            date_last_requested: None,
            is_active: true,
            update_frequency_hours: None,
            last_error: None,
            sort: 0,
            categories: Vec::new(),
            date_created: now,
            date_changed: now,
        }
    }

    /// Refreshed recently enough that a new refresh is suppressed absent a
    /// force flag.
    pub fn is_fresh(&self, min_interval: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.date_last_refresh
            .map(|last| now - last < min_interval)
            .unwrap_or(false)
    }

    pub fn record_error(&mut self, kind: FeedErrorKind, now: DateTime<Utc>) {
        self.last_error = Some(kind);
        self.date_changed = now;
    }

    pub fn add_categories(&mut self, categories: Vec<Category>) {
        merge_categories(&mut self.categories, categories);
    }
}

/// Classification of the last failed refresh attempt, kept on the feed so
/// presentation layers can explain failures without reading logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedErrorKind {
    /// The fetch exceeded its deadline; retryable.
    Timeout,
    /// The URL resolved to 404; terminal until the operator intervenes.
    NotFound,
    /// Any other rejected status or unexpected parse failure.
    Generic,
}

impl FeedErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedErrorKind::Timeout => "timeout",
            FeedErrorKind::NotFound => "not_found",
            FeedErrorKind::Generic => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "timeout" => Some(FeedErrorKind::Timeout),
            "not_found" => Some(FeedErrorKind::NotFound),
            "error" => Some(FeedErrorKind::Generic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub title: String,
    pub link: String,
    pub content: String,
    /// Empty when the entry carried no GUID and none was derived.
    pub guid: String,
    pub author: String,
    /// Calendar date, deliberately not a timestamp: it is half of the
    /// no-GUID identity key and must stay stable across same-day re-imports
    /// of entries whose timestamps are synthetic.
    pub date_published: NaiveDate,
    pub date_updated: DateTime<Utc>,
    pub categories: Vec<Category>,
    pub enclosures: Vec<Enclosure>,
    pub date_created: DateTime<Utc>,
}

/// Category attached to a feed or post, identified by (name, domain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub domain: String,
}

/// Media attachment for a post, identified by (url, kind, length).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    pub kind: String,
    pub length: u64,
}

/// Attach categories idempotently: (name, domain) pairs already present are
/// not duplicated.
pub fn merge_categories(existing: &mut Vec<Category>, incoming: Vec<Category>) {
    for category in incoming {
        if !existing.contains(&category) {
            existing.push(category);
        }
    }
}

pub fn merge_enclosures(existing: &mut Vec<Enclosure>, incoming: Vec<Enclosure>) {
    for enclosure in incoming {
        if !existing.contains(&enclosure) {
            existing.push(enclosure);
        }
    }
}

/// The normalized field set handed to the upserter for one entry.
#[derive(Debug, Clone)]
pub struct PostFields {
    pub title: String,
    pub link: String,
    pub content: String,
    pub guid: String,
    pub author: String,
    pub date_published: NaiveDate,
    pub date_updated: DateTime<Utc>,
    pub categories: Vec<Category>,
    pub enclosures: Vec<Enclosure>,
}

impl PostFields {
    /// Clip every string field to its column limit. Applied silently before
    /// any write.
    pub fn clipped(mut self) -> Self {
        self.title = clip(&self.title, POST_TITLE_MAX);
        self.link = clip(&self.link, POST_LINK_MAX);
        self.guid = clip(&self.guid, POST_GUID_MAX);
        self.author = clip(&self.author, POST_AUTHOR_MAX);
        self
    }

    pub fn into_post(self, feed_id: Uuid, now: DateTime<Utc>) -> Post {
        Post {
            id: Uuid::new_v4(),
            feed_id,
            title: self.title,
            link: self.link,
            content: self.content,
            guid: self.guid,
            author: self.author,
            date_published: self.date_published,
            date_updated: self.date_updated,
            categories: self.categories,
            enclosures: self.enclosures,
            date_created: now,
        }
    }

    /// Overwrite an existing post's fields in place, keeping its identity.
    pub fn apply_to(self, post: &mut Post) {
        post.title = self.title;
        post.link = self.link;
        post.content = self.content;
        post.guid = self.guid;
        post.author = self.author;
        post.date_published = self.date_published;
        post.date_updated = self.date_updated;
        merge_categories(&mut post.categories, self.categories);
        merge_enclosures(&mut post.enclosures, self.enclosures);
    }
}

/// One raw item from a parsed feed document, prior to normalization.
/// Field presence and validity are unpredictable per feed.
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    /// Raw bytes: supplied GUIDs are not guaranteed to be valid UTF-8.
    pub guid: Option<Vec<u8>>,
    /// Multi-value content field; the first value wins.
    pub content: Vec<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
    pub date: Option<DateTime<Utc>>,
    pub categories: Vec<Category>,
    pub enclosures: Vec<Enclosure>,
}

/// Feed-level metadata from a parsed document.
#[derive(Debug, Clone, Default)]
pub struct FeedChannel {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub categories: Vec<Category>,
}

/// What the parser collaborator hands back for one source.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    /// HTTP-like status; `None` for local sources, treated as accepted.
    pub status: Option<u16>,
    /// Possibly-redirected final URL (the redirect target for 3xx).
    pub href: String,
    pub channel: FeedChannel,
    pub entries: Vec<RawEntry>,
    pub etag: Option<String>,
    /// Raw Last-Modified header value; parsed best-effort by the importer.
    pub last_modified: Option<String>,
}

impl ParsedDocument {
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, Some(301) | Some(302) | Some(307))
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == Some(304)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Statuses the importer will process entries for.
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, None | Some(200..=299) | Some(304))
    }
}

/// How one refresh attempt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Refresh suppressed: last refresh within the minimum interval.
    Skipped,
    /// HTTP 304, nothing to process.
    NotModified,
    /// Entries processed; carries how many were imported.
    Updated(usize),
    /// The failure was recorded on the feed instead of raised.
    Failed(FeedErrorKind),
}

/// What the upserter did for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Duplicate rows for the identity were repaired before the write.
    ConflictResolved,
}

/// Immutable importer/scheduler configuration, passed in at construction.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    pub user_agent: String,
    /// Per-fetch deadline, distinct from any client-wide default.
    pub fetch_timeout: Duration,
    /// Feeds refreshed more recently than this are skipped unless forced.
    pub min_refresh_interval: chrono::Duration,
    /// Cadence of the periodic refresh sweep.
    pub refresh_every: chrono::Duration,
    /// Stop refreshing feeds nobody requested for this long. `None` disables.
    pub last_requested_limit: Option<chrono::Duration>,
    /// Most entries stored per refresh.
    pub post_limit: usize,
    /// Word bound for post bodies.
    pub entry_word_limit: usize,
    pub store_categories: bool,
    pub store_enclosures: bool,
    /// Run `update_feed` as part of `import_feed`.
    pub update_on_import: bool,
    /// Per-feed import lease lifetime; a crashed worker's lease lapses after
    /// this.
    pub lease_ttl: Duration,
    /// Spread periodic dispatch over this window to avoid a thundering herd.
    pub dispatch_window: Option<Duration>,
    /// Concurrent refresh workers.
    pub workers: usize,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            user_agent: "feedspool/0.1".to_string(),
            fetch_timeout: Duration::from_secs(10),
            min_refresh_interval: chrono::Duration::minutes(20),
            refresh_every: chrono::Duration::hours(3),
            last_requested_limit: None,
            post_limit: 20,
            entry_word_limit: 100,
            store_categories: false,
            store_enclosures: false,
            update_on_import: true,
            lease_ttl: Duration::from_secs(3 * 60),
            dispatch_window: None,
            workers: 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse error: {0}")]
    Parse(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("feed not found: {url}")]
    NotFound { url: String },

    #[error("feed rejected with status {status:?}: {url}")]
    Critical { url: String, status: Option<u16> },

    #[error("redirect loop at {url}")]
    RedirectLoop { url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ImportError {
    /// The feed-level classification a failure is recorded as.
    pub fn classify(&self) -> FeedErrorKind {
        match self {
            ImportError::Timeout { .. } => FeedErrorKind::Timeout,
            ImportError::NotFound { .. } => FeedErrorKind::NotFound,
            _ => FeedErrorKind::Generic,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
