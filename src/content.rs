use crate::types::RawEntry;
use crate::utils::text::truncate_html_words;

/// Post-processing hook applied to every post body before truncation.
///
/// This is where sanitization and tracker stripping plug in; the importer
/// treats it as a black box. Returning an error degrades the body to the
/// empty string: an unparseable body must never fail the entry.
pub trait ContentFilter: Send + Sync {
    fn apply(&self, content: &str) -> Result<String, String>;
}

/// Default filter: no transformation.
pub struct PassthroughFilter;

impl ContentFilter for PassthroughFilter {
    fn apply(&self, content: &str) -> Result<String, String> {
        Ok(content.to_string())
    }
}

/// Extract the body for a post from a raw entry.
///
/// Preference order: first `content` value, else `description`, else
/// `summary`, else empty. The injected filter runs first, then the
/// word-count bound with HTML-aware truncation.
pub fn extract_content(entry: &RawEntry, filter: &dyn ContentFilter, word_limit: usize) -> String {
    let raw = entry
        .content
        .first()
        .cloned()
        .or_else(|| entry.description.clone())
        .or_else(|| entry.summary.clone())
        .unwrap_or_default();

    let filtered = match filter.apply(&raw) {
        Ok(content) => content,
        Err(reason) => {
            tracing::debug!("content filter rejected body, storing empty: {}", reason);
            return String::new();
        }
    };

    truncate_html_words(&filtered, word_limit)
}
