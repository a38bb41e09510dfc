mod common;

use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedspool::types::{ImportError, ImporterConfig, Result};
use feedspool::{HttpParser, Parser};

const FEED_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0">
  <channel>
    <title>Lifehacker</title>
    <link>https://example.com/</link>
    <description>Tech tricks</description>
    <item>
      <title>First post</title>
      <link>https://example.com/posts/1</link>
      <guid>Lifehacker-5147831</guid>
      <pubDate>Fri, 06 Feb 2009 12:30:00 GMT</pubDate>
      <description>Body of the first post</description>
    </item>
    <item>
      <title>Second post</title>
      <link>https://example.com/posts/2</link>
      <guid>Lifehacker-5147832</guid>
      <pubDate>Thu, 05 Feb 2009 09:00:00 GMT</pubDate>
      <description>Body of the second post</description>
    </item>
  </channel>
</rss>"#;

fn parser() -> HttpParser {
    common::init_tracing();
    HttpParser::new(&ImporterConfig::default()).expect("client builds")
}

#[tokio::test]
async fn parses_a_feed_document() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(FEED_XML, "application/rss+xml")
                .insert_header("ETag", "\"v1\"")
                .insert_header("Last-Modified", "Fri, 06 Feb 2009 12:30:00 GMT"),
        )
        .mount(&server)
        .await;

    let url = format!("{}/feed.xml", server.uri());
    let document = parser().parse(&url, None, None, false).await?;

    assert_eq!(document.status, Some(200));
    assert_eq!(document.channel.title.as_deref(), Some("Lifehacker"));
    assert_eq!(document.etag.as_deref(), Some("\"v1\""));
    assert_eq!(
        document.last_modified.as_deref(),
        Some("Fri, 06 Feb 2009 12:30:00 GMT")
    );
    assert_eq!(document.entries.len(), 2);

    let first = &document.entries[0];
    assert_eq!(first.title.as_deref(), Some("First post"));
    assert_eq!(first.link.as_deref(), Some("https://example.com/posts/1"));
    assert_eq!(first.guid.as_deref(), Some(b"Lifehacker-5147831".as_ref()));
    assert!(first.published.is_some(), "pubDate parsed");
    assert!(
        first.description.as_deref().unwrap_or("").contains("first post"),
        "description carried through"
    );
    Ok(())
}

#[tokio::test]
async fn sends_conditional_headers_and_reports_not_modified() -> Result<()> {
    let server = MockServer::start().await;
    // Only matches when the preconditions are actually on the request.
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header("If-None-Match", "\"v1\""))
        .and(header("If-Modified-Since", "Fri, 06 Feb 2009 12:30:00 GMT"))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let url = format!("{}/feed.xml", server.uri());
    let document = parser()
        .parse(
            &url,
            Some("\"v1\""),
            Some("Fri, 06 Feb 2009 12:30:00 GMT"),
            false,
        )
        .await?;

    assert!(document.is_not_modified());
    assert!(document.entries.is_empty());
    Ok(())
}

#[tokio::test]
async fn reports_not_found_without_parsing_the_body() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(404).set_body_string("<html>gone</html>"))
        .mount(&server)
        .await;

    let url = format!("{}/feed.xml", server.uri());
    let document = parser().parse(&url, None, None, false).await?;
    assert!(document.is_not_found());
    assert!(document.entries.is_empty());
    Ok(())
}

#[tokio::test]
async fn surfaces_redirects_with_resolved_location() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/moved.xml"))
        .mount(&server)
        .await;

    let url = format!("{}/feed.xml", server.uri());
    let document = parser().parse(&url, None, None, false).await?;

    assert!(document.is_redirect());
    assert_eq!(
        document.href,
        format!("{}/moved.xml", server.uri()),
        "relative Location resolved against the request URL"
    );
    Ok(())
}

#[tokio::test]
async fn slow_responses_raise_timeout() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(FEED_XML, "application/rss+xml")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut config = ImporterConfig::default();
    config.fetch_timeout = Duration::from_millis(200);
    let parser = HttpParser::new(&config).expect("client builds");

    let url = format!("{}/feed.xml", server.uri());
    let err = parser
        .parse(&url, None, None, false)
        .await
        .expect_err("deadline must fire");
    assert!(matches!(err, ImportError::Timeout { .. }), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn parses_a_local_file() -> Result<()> {
    let dir = std::env::temp_dir().join("feedspool-parser-test");
    std::fs::create_dir_all(&dir)?;
    let file = dir.join("local_feed.xml");
    std::fs::write(&file, FEED_XML)?;

    let source = file.to_string_lossy().to_string();
    let document = parser().parse(&source, None, None, true).await?;

    assert_eq!(document.status, None, "local sources carry no HTTP status");
    assert!(document.is_accepted());
    assert_eq!(document.channel.title.as_deref(), Some("Lifehacker"));
    assert_eq!(document.entries.len(), 2);
    Ok(())
}

#[tokio::test]
async fn unparseable_body_is_a_parse_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("this is not xml"))
        .mount(&server)
        .await;

    let url = format!("{}/feed.xml", server.uri());
    let err = parser()
        .parse(&url, None, None, false)
        .await
        .expect_err("garbage body cannot parse");
    assert!(matches!(err, ImportError::Parse(_)), "got {:?}", err);
    Ok(())
}
