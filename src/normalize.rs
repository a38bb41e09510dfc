use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::types::RawEntry;

/// Seconds between synthetic fallback dates for consecutive dateless
/// entries, so they keep a total order in reverse source order.
const FALLBACK_STEP_SECS: i64 = 30;

/// Decode raw bytes into a byte-safe string: valid UTF-8 passes through
/// trimmed, anything else is base64-encoded rather than rejected.
pub fn safe_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim().to_string(),
        Err(_) => BASE64.encode(bytes),
    }
}

/// Canonical identifier for an entry.
///
/// A non-empty supplied GUID wins. Entries without one get a deterministic
/// identity: a SHA-256 over (title, link, author), so the same entry derives
/// the same GUID on every import and distinct entries collide only with
/// hash-collision probability.
pub fn derive_guid(entry: &RawEntry) -> String {
    if let Some(raw) = &entry.guid {
        let supplied = safe_text(raw);
        if !supplied.is_empty() {
            return supplied;
        }
    }

    let mut hasher = Sha256::new();
    for field in [&entry.title, &entry.link, &entry.author] {
        hasher.update(field.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

/// Canonical timestamp for an entry: `updated`, else `published`, else
/// `date`, else a synthetic fallback stepping 30 seconds back per ordinal so
/// dateless entries still sort newest-first in source order.
///
/// The result is written back onto absent `updated`/`published` slots;
/// downstream storage must see a consistent timestamp even for entries with
/// no usable date metadata.
pub fn derive_date(entry: &mut RawEntry, fallback_ordinal: usize, now: DateTime<Utc>) -> DateTime<Utc> {
    let date = entry
        .updated
        .or(entry.published)
        .or(entry.date)
        .unwrap_or_else(|| now - Duration::seconds(FALLBACK_STEP_SECS * fallback_ordinal as i64));

    entry.updated.get_or_insert(date);
    entry.published.get_or_insert(date);
    date
}

/// Order a batch of raw entries date-descending (most recent first) and
/// truncate to `limit`.
///
/// Each entry's effective date is derived with its source position as the
/// fallback ordinal, so ties among dateless entries preserve reverse source
/// order; entries sharing a real date keep their relative order (stable
/// sort). Entries are mutated: the derived date becomes authoritative for
/// downstream storage.
pub fn order_by_date(entries: Vec<RawEntry>, limit: Option<usize>) -> Vec<RawEntry> {
    let now = Utc::now();
    let mut dated: Vec<(DateTime<Utc>, RawEntry)> = entries
        .into_iter()
        .enumerate()
        .map(|(ordinal, mut entry)| {
            let date = derive_date(&mut entry, ordinal, now);
            (date, entry)
        })
        .collect();

    dated.sort_by(|a, b| b.0.cmp(&a.0));
    if let Some(limit) = limit {
        dated.truncate(limit);
    }
    dated.into_iter().map(|(_, entry)| entry).collect()
}
