use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::content::{extract_content, ContentFilter, PassthroughFilter};
use crate::normalize::{derive_guid, order_by_date};
use crate::parser::Parser;
use crate::storage::Storage;
use crate::types::{
    Feed, FeedErrorKind, ImportError, ImporterConfig, ParsedDocument, PostFields, RawEntry,
    RefreshOutcome, Result, UpsertOutcome, DEFAULT_TITLE, FEED_LINK_MAX,
};
use crate::upsert::upsert_post;
use crate::utils::text::clip;

/// Imports and refreshes feeds: resolves the feed row, fetches and parses
/// the document, runs entries through normalization and upsert, and keeps
/// the feed's refresh bookkeeping and error classification.
///
/// First-time imports surface hard failures to the caller; refreshes of a
/// known feed record failures on the feed and never raise, so a background
/// worker loop cannot be crashed by one bad feed.
pub struct FeedImporter {
    parser: Arc<dyn Parser>,
    storage: Arc<dyn Storage>,
    filter: Arc<dyn ContentFilter>,
    config: ImporterConfig,
}

enum ImportStep {
    Done(Feed),
    Redirected(String),
}

impl FeedImporter {
    pub fn new(parser: Arc<dyn Parser>, storage: Arc<dyn Storage>, config: ImporterConfig) -> Self {
        Self {
            parser,
            storage,
            filter: Arc::new(PassthroughFilter),
            config,
        }
    }

    /// Replace the content post-processing hook (sanitization, tracker
    /// stripping).
    pub fn with_content_filter(mut self, filter: Arc<dyn ContentFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &ImporterConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    /// Import the feed at `url`, creating its row if this is the first
    /// sighting. Redirects are followed by reattempting the import against
    /// the new location; revisiting a URL already seen in this call (a
    /// self-redirect included) is a configuration error.
    pub async fn import_feed(&self, url: &str, force: bool, local: bool) -> Result<Feed> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut url = url.trim().to_string();
        loop {
            seen.insert(url.clone());
            match self.import_feed_once(&url, force, local).await? {
                ImportStep::Done(feed) => return Ok(feed),
                ImportStep::Redirected(href) => {
                    if seen.contains(&href) {
                        return Err(ImportError::RedirectLoop { url: href });
                    }
                    debug!("import of {} redirected to {}", url, href);
                    url = href;
                }
            }
        }
    }

    async fn import_feed_once(&self, url: &str, force: bool, local: bool) -> Result<ImportStep> {
        if let Some(mut feed) = self.storage.feed_by_url(url).await? {
            debug!("feed {} already known, updating", url);
            if self.config.update_on_import {
                self.update_feed(&mut feed, None, force).await?;
            }
            return Ok(ImportStep::Done(feed));
        }

        let document = match self.parser.parse(url, None, None, local).await {
            Ok(document) => document,
            Err(err) => {
                // The URL is remembered even when the first fetch fails, so
                // the operator can see the classification on the feed row.
                warn!("first import of {} failed: {}", url, err);
                self.create_failed_feed(url, err.classify()).await?;
                return Err(match err {
                    timeout @ ImportError::Timeout { .. } => timeout,
                    _ => ImportError::Critical {
                        url: url.to_string(),
                        status: None,
                    },
                });
            }
        };

        if document.is_redirect() {
            let href = document.href.trim().to_string();
            if href.is_empty() || href == url {
                return Err(ImportError::RedirectLoop {
                    url: url.to_string(),
                });
            }
            return Ok(ImportStep::Redirected(href));
        }

        if document.is_not_found() {
            self.create_failed_feed(url, FeedErrorKind::NotFound).await?;
            return Err(ImportError::NotFound {
                url: url.to_string(),
            });
        }

        if !document.is_accepted() {
            self.create_failed_feed(url, FeedErrorKind::Generic).await?;
            return Err(ImportError::Critical {
                url: url.to_string(),
                status: document.status,
            });
        }

        let name = document
            .channel
            .title
            .as_deref()
            .unwrap_or(DEFAULT_TITLE)
            .trim();
        let description = document.channel.description.as_deref().unwrap_or("");
        let mut defaults = Feed::new(url, name, description);
        if let Some(link) = &document.channel.link {
            defaults.link = clip(link, FEED_LINK_MAX);
        }

        let (mut feed, created) = self.storage.get_or_create_feed(defaults).await?;
        if created {
            info!("created feed {} ({})", feed.name, feed.feed_url);
        }

        if self.config.store_categories && !document.channel.categories.is_empty() {
            feed.add_categories(document.channel.categories.clone());
            self.storage.save_feed(&feed).await?;
        }

        if self.config.update_on_import {
            self.update_feed(&mut feed, Some(document), force).await?;
        }
        Ok(ImportStep::Done(feed))
    }

    async fn create_failed_feed(&self, url: &str, kind: FeedErrorKind) -> Result<Feed> {
        let mut defaults = Feed::new(url, DEFAULT_TITLE, "");
        defaults.record_error(kind, Utc::now());
        let (mut feed, created) = self.storage.get_or_create_feed(defaults).await?;
        if !created && feed.last_error != Some(kind) {
            feed.record_error(kind, Utc::now());
            self.storage.save_feed(&feed).await?;
        }
        Ok(feed)
    }

    /// Refresh one feed. Fetches with conditional-GET semantics when no
    /// document is supplied, processes entries, and updates the feed's
    /// refresh metadata. Fetch and parse failures are recorded on the feed
    /// and returned as an outcome, never raised.
    pub async fn update_feed(
        &self,
        feed: &mut Feed,
        document: Option<ParsedDocument>,
        force: bool,
    ) -> Result<RefreshOutcome> {
        let now = Utc::now();
        if !force && feed.is_fresh(self.config.min_refresh_interval, now) {
            debug!("feed {} was refreshed recently, skipping", feed.feed_url);
            return Ok(RefreshOutcome::Skipped);
        }

        let mut document = match document {
            Some(document) => document,
            None => {
                // Preconditions are dropped on force so the server sends a
                // full document again.
                let (etag, modified) = if force {
                    (None, None)
                } else {
                    (
                        feed.http_etag.clone(),
                        feed.http_last_modified.map(format_http_date),
                    )
                };
                match self
                    .parser
                    .parse(&feed.feed_url, etag.as_deref(), modified.as_deref(), false)
                    .await
                {
                    Ok(document) => document,
                    Err(err) => return self.record_failure(feed, err).await,
                }
            }
        };

        // A moved document updates the unique feed URL and the fetch is
        // reattempted once against the new location.
        if document.is_redirect() {
            let href = document.href.trim().to_string();
            if href.is_empty() || href == feed.feed_url {
                let err = ImportError::RedirectLoop {
                    url: feed.feed_url.clone(),
                };
                return self.record_failure(feed, err).await;
            }
            debug!("feed {} moved to {}", feed.feed_url, href);
            feed.feed_url = href.clone();
            document = match self.parser.parse(&href, None, None, false).await {
                Ok(next) if next.is_redirect() => {
                    return self
                        .record_failure(feed, ImportError::RedirectLoop { url: href })
                        .await;
                }
                Ok(next) => next,
                Err(err) => return self.record_failure(feed, err).await,
            };
        }

        if document.is_not_modified() && !force {
            debug!("feed {} not modified", feed.feed_url);
            return Ok(RefreshOutcome::NotModified);
        }

        if document.is_not_found() {
            let err = ImportError::NotFound {
                url: feed.feed_url.clone(),
            };
            return self.record_failure(feed, err).await;
        }

        if !document.is_accepted() {
            let err = ImportError::Critical {
                url: feed.feed_url.clone(),
                status: document.status,
            };
            return self.record_failure(feed, err).await;
        }

        let entries = order_by_date(
            std::mem::take(&mut document.entries),
            Some(self.config.post_limit),
        );
        let mut imported = 0usize;
        for entry in &entries {
            self.import_entry(feed, entry).await?;
            imported += 1;
        }

        if self.config.store_categories && !document.channel.categories.is_empty() {
            feed.add_categories(document.channel.categories.clone());
        }

        feed.date_last_refresh = Some(now);
        feed.http_etag = document.etag.clone();
        // Best effort: a malformed Last-Modified never aborts the refresh.
        feed.http_last_modified = document.last_modified.as_deref().and_then(parse_http_date);
        // A successful refresh clears any previous classification.
        feed.last_error = None;
        feed.date_changed = now;
        self.storage.save_feed(feed).await?;

        info!("refreshed {}: {} entries", feed.feed_url, imported);
        Ok(RefreshOutcome::Updated(imported))
    }

    async fn record_failure(&self, feed: &mut Feed, err: ImportError) -> Result<RefreshOutcome> {
        let kind = err.classify();
        warn!(
            "refresh of {} failed, recording {}: {}",
            feed.feed_url,
            kind.as_str(),
            err
        );
        feed.record_error(kind, Utc::now());
        self.storage.save_feed(feed).await?;
        Ok(RefreshOutcome::Failed(kind))
    }

    async fn import_entry(&self, feed: &Feed, entry: &RawEntry) -> Result<UpsertOutcome> {
        let guid = derive_guid(entry);
        let content = extract_content(entry, self.filter.as_ref(), self.config.entry_word_limit);

        // order_by_date wrote derived dates onto both slots; the fallbacks
        // only matter for entries that bypassed it.
        let updated = entry.updated.or(entry.published).unwrap_or_else(Utc::now);
        let published = entry.published.unwrap_or(updated);

        let fields = PostFields {
            title: entry
                .title
                .as_deref()
                .unwrap_or(DEFAULT_TITLE)
                .trim()
                .to_string(),
            link: entry
                .link
                .clone()
                .unwrap_or_else(|| feed.feed_url.clone()),
            content,
            guid,
            author: entry.author.as_deref().unwrap_or("").trim().to_string(),
            date_published: published.date_naive(),
            date_updated: updated,
            categories: if self.config.store_categories {
                entry.categories.clone()
            } else {
                Vec::new()
            },
            enclosures: if self.config.store_enclosures {
                entry.enclosures.clone()
            } else {
                Vec::new()
            },
        };

        let (_, outcome) = upsert_post(self.storage.as_ref(), feed, fields).await?;
        Ok(outcome)
    }

    /// Retention sweep: delete all but the `max_posts` most recently
    /// published posts of a feed. Returns how many were deleted.
    pub async fn expire_old_posts(&self, feed: &Feed, max_posts: usize) -> Result<u64> {
        let posts = self.storage.posts_for_feed(feed.id, None).await?;
        if posts.len() <= max_posts {
            return Ok(0);
        }
        let expired: Vec<Uuid> = posts[max_posts..].iter().map(|p| p.id).collect();
        let deleted = self.storage.delete_posts(&expired).await?;
        info!("expired {} posts for {}", deleted, feed.feed_url);
        Ok(deleted)
    }
}

fn format_http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
