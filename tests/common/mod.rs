#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use feedspool::types::{FeedChannel, ImportError, ParsedDocument, RawEntry, Result};
use feedspool::Parser;

/// One scripted parser response.
#[derive(Clone)]
pub enum Script {
    Doc(ParsedDocument),
    Timeout,
}

/// Parser stub fed from per-source response queues. The last script for a
/// source repeats once the queue is down to one entry.
#[derive(Default)]
pub struct ScriptedParser {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
}

impl ScriptedParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, source: &str, script: Script) {
        self.scripts
            .lock()
            .await
            .entry(source.to_string())
            .or_default()
            .push_back(script);
    }
}

#[async_trait]
impl Parser for ScriptedParser {
    async fn parse(
        &self,
        source: &str,
        _etag: Option<&str>,
        _modified: Option<&str>,
        _local: bool,
    ) -> Result<ParsedDocument> {
        let mut scripts = self.scripts.lock().await;
        let queue = scripts
            .get_mut(source)
            .ok_or_else(|| ImportError::Parse(format!("no script for {}", source)))?;
        let script = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| ImportError::Parse(format!("script exhausted for {}", source)))?
        };
        match script {
            Script::Doc(doc) => Ok(doc),
            Script::Timeout => Err(ImportError::Timeout {
                url: source.to_string(),
            }),
        }
    }
}

pub fn doc(status: Option<u16>, title: &str, entries: Vec<RawEntry>) -> ParsedDocument {
    ParsedDocument {
        status,
        href: String::new(),
        channel: FeedChannel {
            title: Some(title.to_string()),
            description: Some("test feed".to_string()),
            ..FeedChannel::default()
        },
        entries,
        etag: None,
        last_modified: None,
    }
}

pub fn redirect(status: u16, href: &str) -> ParsedDocument {
    ParsedDocument {
        status: Some(status),
        href: href.to_string(),
        ..ParsedDocument::default()
    }
}

pub fn entry(title: &str) -> RawEntry {
    RawEntry {
        title: Some(title.to_string()),
        ..RawEntry::default()
    }
}

pub fn entry_with_guid(title: &str, guid: &[u8], published: Option<DateTime<Utc>>) -> RawEntry {
    RawEntry {
        title: Some(title.to_string()),
        guid: Some(guid.to_vec()),
        published,
        ..RawEntry::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

pub fn date(spec: &str) -> DateTime<Utc> {
    spec.parse::<DateTime<Utc>>().expect("valid test date")
}
