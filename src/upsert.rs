use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::Storage;
use crate::types::{Feed, Post, PostFields, Result, UpsertOutcome};

/// Find-or-create the post an entry resolves to, overwriting fields on the
/// existing-row path. Exactly one live row for the resolved identity remains
/// after this returns.
///
/// With a GUID the identity is (feed, guid). The store does not serialize
/// concurrent inserts of the same identity, so the lookup can legitimately
/// return several rows; in that case the earliest row is kept, the rest are
/// deleted, and the lookup is retried exactly once before the write.
///
/// Without a GUID the identity is inferred from (feed, title, published
/// date). Dateless and titleless entries collapse onto the same key, so each
/// candidate is checked field-by-field — `link`, then `title`, then
/// `content`; the first field non-empty on both sides decides — and a match
/// is updated in place while no match means a genuinely new post.
pub async fn upsert_post(
    storage: &dyn Storage,
    feed: &Feed,
    fields: PostFields,
) -> Result<(Post, UpsertOutcome)> {
    let fields = fields.clipped();

    if !fields.guid.is_empty() {
        upsert_by_guid(storage, feed, fields).await
    } else {
        upsert_by_title_and_date(storage, feed, fields).await
    }
}

async fn upsert_by_guid(
    storage: &dyn Storage,
    feed: &Feed,
    fields: PostFields,
) -> Result<(Post, UpsertOutcome)> {
    let mut matches = storage.posts_by_guid(feed.id, &fields.guid).await?;
    let mut repaired = false;

    if matches.len() > 1 {
        warn!(
            "feed {}: {} duplicate rows for guid {:?}, repairing",
            feed.feed_url,
            matches.len(),
            fields.guid
        );
        let dupes: Vec<Uuid> = matches.iter().skip(1).map(|p| p.id).collect();
        storage.delete_posts(&dupes).await?;
        matches = storage.posts_by_guid(feed.id, &fields.guid).await?;
        repaired = true;
    }

    match matches.into_iter().next() {
        Some(mut post) => {
            fields.apply_to(&mut post);
            storage.update_post(&post).await?;
            let outcome = if repaired {
                UpsertOutcome::ConflictResolved
            } else {
                UpsertOutcome::Updated
            };
            Ok((post, outcome))
        }
        None => {
            let post = fields.into_post(feed.id, Utc::now());
            storage.create_post(&post).await?;
            let outcome = if repaired {
                UpsertOutcome::ConflictResolved
            } else {
                UpsertOutcome::Created
            };
            Ok((post, outcome))
        }
    }
}

async fn upsert_by_title_and_date(
    storage: &dyn Storage,
    feed: &Feed,
    fields: PostFields,
) -> Result<(Post, UpsertOutcome)> {
    let candidates = storage
        .posts_by_title_and_date(feed.id, &fields.title, fields.date_published)
        .await?;

    match candidates.into_iter().find(|c| is_same_post(c, &fields)) {
        Some(mut post) => {
            debug!(
                "feed {}: entry {:?} matched existing post {}",
                feed.feed_url, fields.title, post.id
            );
            fields.apply_to(&mut post);
            storage.update_post(&post).await?;
            Ok((post, UpsertOutcome::Updated))
        }
        None => {
            let post = fields.into_post(feed.id, Utc::now());
            storage.create_post(&post).await?;
            Ok((post, UpsertOutcome::Created))
        }
    }
}

/// Decide whether a stored candidate and incoming fields are the same post.
/// The first of `link`, `title`, `content` that is non-empty on both sides
/// decides by exact equality; nothing comparable means not the same.
fn is_same_post(candidate: &Post, fields: &PostFields) -> bool {
    let pairs = [
        (&candidate.link, &fields.link),
        (&candidate.title, &fields.title),
        (&candidate.content, &fields.content),
    ];
    for (stored, incoming) in pairs {
        if !stored.is_empty() && !incoming.is_empty() {
            return stored == incoming;
        }
    }
    false
}
