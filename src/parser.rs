use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::types::{
    Category, Enclosure, FeedChannel, ImportError, ImporterConfig, ParsedDocument, RawEntry, Result,
};

/// Feed document source: a URL fetched over HTTP, or a path on disk.
///
/// Implementations must raise `ImportError::Timeout` when the fetch exceeds
/// its deadline and must surface redirects in the returned document rather
/// than following them — the importer owns redirect resolution.
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(
        &self,
        source: &str,
        etag: Option<&str>,
        modified: Option<&str>,
        local: bool,
    ) -> Result<ParsedDocument>;
}

/// HTTP parser: conditional GET via reqwest, document parsing via feed-rs.
pub struct HttpParser {
    client: Client,
    timeout: Duration,
}

impl HttpParser {
    pub fn new(config: &ImporterConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            timeout: config.fetch_timeout,
        })
    }

    async fn parse_remote(
        &self,
        source: &str,
        etag: Option<&str>,
        modified: Option<&str>,
    ) -> Result<ParsedDocument> {
        let mut request = self.client.get(source).timeout(self.timeout);
        if let Some(etag) = etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(modified) = modified {
            request = request.header("If-Modified-Since", modified);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ImportError::Timeout {
                    url: source.to_string(),
                }
            } else {
                ImportError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        debug!("fetched {} -> {}", source, status);

        if matches!(status, 301 | 302 | 307) {
            let location = response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            // Location may be relative; resolve against the request URL.
            let href = Url::parse(source)?
                .join(location)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| location.to_string());
            return Ok(ParsedDocument {
                status: Some(status),
                href,
                ..ParsedDocument::default()
            });
        }

        let response_etag = header_string(&response, "etag");
        let response_modified = header_string(&response, "last-modified");

        if status == 304 {
            return Ok(ParsedDocument {
                status: Some(status),
                href: source.to_string(),
                etag: response_etag.or_else(|| etag.map(str::to_string)),
                last_modified: response_modified.or_else(|| modified.map(str::to_string)),
                ..ParsedDocument::default()
            });
        }

        if !(200..300).contains(&status) {
            // Error bodies are not feed documents; report the status alone.
            return Ok(ParsedDocument {
                status: Some(status),
                href: source.to_string(),
                ..ParsedDocument::default()
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ImportError::Timeout {
                    url: source.to_string(),
                }
            } else {
                ImportError::Http(e)
            }
        })?;

        let mut document = parse_document(bytes.as_ref())?;
        document.status = Some(status);
        document.href = source.to_string();
        document.etag = response_etag;
        document.last_modified = response_modified;
        Ok(document)
    }

    async fn parse_local(&self, source: &str) -> Result<ParsedDocument> {
        let bytes = tokio::fs::read(source).await?;
        let mut document = parse_document(&bytes)?;
        document.href = source.to_string();
        Ok(document)
    }
}

#[async_trait]
impl Parser for HttpParser {
    async fn parse(
        &self,
        source: &str,
        etag: Option<&str>,
        modified: Option<&str>,
        local: bool,
    ) -> Result<ParsedDocument> {
        if local {
            self.parse_local(source).await
        } else {
            self.parse_remote(source, etag, modified).await
        }
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Map a feed-rs document onto the parser-neutral structures.
fn parse_document(bytes: &[u8]) -> Result<ParsedDocument> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| ImportError::Parse(e.to_string()))?;

    let channel = FeedChannel {
        title: feed.title.map(|t| t.content),
        description: feed.description.map(|d| d.content),
        link: feed.links.first().map(|l| l.href.clone()),
        categories: feed.categories.iter().map(category_from).collect(),
    };

    let entries = feed.entries.into_iter().map(raw_entry_from).collect();

    Ok(ParsedDocument {
        status: None,
        href: String::new(),
        channel,
        entries,
        etag: None,
        last_modified: None,
    })
}

fn raw_entry_from(entry: feed_rs::model::Entry) -> RawEntry {
    let enclosures = entry
        .media
        .iter()
        .flat_map(|media| media.content.iter())
        .filter_map(|content| {
            content.url.as_ref().map(|url| Enclosure {
                url: url.to_string(),
                kind: content
                    .content_type
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_default(),
                length: content.size.unwrap_or(0),
            })
        })
        .collect();

    RawEntry {
        guid: (!entry.id.is_empty()).then(|| entry.id.clone().into_bytes()),
        title: entry.title.map(|t| t.content),
        link: entry.links.first().map(|l| l.href.clone()),
        author: entry.authors.first().map(|a| a.name.clone()),
        content: entry.content.and_then(|c| c.body).into_iter().collect(),
        description: entry.summary.map(|s| s.content),
        summary: None,
        updated: entry.updated,
        published: entry.published,
        date: None,
        categories: entry.categories.iter().map(category_from).collect(),
        enclosures,
    }
}

fn category_from(category: &feed_rs::model::Category) -> Category {
    Category {
        name: category.term.clone(),
        domain: category.scheme.clone().unwrap_or_default(),
    }
}
