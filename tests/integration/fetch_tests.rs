//! Plain document fetches: robots.txt, status classification, content types

use crate::{harness, harness_at, url};
use sumi_sluice::fetch::RetryWindow;
use sumi_sluice::store::ActivityKind;
use sumi_sluice::ResultSignal;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PLAIN: &str = r#"
    [fetcher]
    user-agent = "SluiceBot/1.0"
    from-address = "crawler@example.com"
"#;

#[tokio::test]
async fn test_fetch_simple_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/page.html"))
        .and(header("user-agent", "SluiceBot/1.0"))
        .and(header("from", "crawler@example.com"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html><body>Hello</body></html>"),
        )
        .expect(2)
        .mount(&server)
        .await;

    let h = harness(&server, PLAIN);
    let document = url(&server, "/docs/page.html");

    let outcome = h.engine.fetch(&document).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::VersionNeeded);
    assert!(outcome.diagnostic.is_none());
    let fetched = outcome.document.unwrap();
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.text(), "<html><body>Hello</body></html>");
    let version = outcome.version.unwrap();
    assert_eq!(version.status, 200);
    assert_eq!(version.checksum.len(), 64);

    // robots.txt now comes from the cache
    let again = h.engine.fetch(&document).await.unwrap();
    assert_eq!(again.signal, ResultSignal::VersionNeeded);
    assert_eq!(again.version.unwrap().checksum, version.checksum);

    let fetches = h.log.records_of(ActivityKind::Fetch);
    assert_eq!(fetches.len(), 3);
    assert_eq!(fetches[0].result_code.as_deref(), Some("404"));
    assert_eq!(fetches[1].result_code.as_deref(), Some("200"));
    assert_eq!(fetches[1].byte_count, Some(31));

    // the connection went back to its pool
    assert_eq!(h.engine.registry().live_connections(), 1);
}

#[tokio::test]
async fn test_robots_disallow() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/\n"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/secret.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("public"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, PLAIN);

    let outcome = h.engine.fetch(&url(&server, "/private/secret.html")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::NoDocument);
    assert_eq!(outcome.activity_code, Some("-11"));
    assert_eq!(outcome.diagnostic.as_deref(), Some("robots.txt says so"));
    assert!(outcome.document.is_none());

    let outcome = h.engine.fetch(&url(&server, "/public.html")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::VersionNeeded);

    let parses = h.log.records_of(ActivityKind::RobotsParse);
    assert_eq!(parses.len(), 1);
    assert_eq!(parses[0].result_code.as_deref(), Some("SUCCESS"));

    let rejected: Vec<_> = h
        .log
        .records_of(ActivityKind::Fetch)
        .into_iter()
        .filter(|r| r.result_code.as_deref() == Some("-11"))
        .collect();
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].target.ends_with("/private/secret.html"));
}

#[tokio::test]
async fn test_robots_ignored_when_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let h = harness(
        &server,
        r#"
        [fetcher]
        user-agent = "SluiceBot/1.0"
        obey-robots = false
        "#,
    );

    let outcome = h.engine.fetch(&url(&server, "/page")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::VersionNeeded);
}

#[tokio::test]
async fn test_status_classification() {
    let server = MockServer::start().await;
    Mock::given(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(path("/moved"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/elsewhere"))
        .mount(&server)
        .await;

    let h = harness(&server, PLAIN);

    let outcome = h.engine.fetch(&url(&server, "/missing")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::NoVersion);
    assert_eq!(outcome.diagnostic.as_deref(), Some("it failed to fetch (status=404)"));

    let outcome = h.engine.fetch(&url(&server, "/down")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::RetryDocument);
    assert_eq!(outcome.retry, Some(RetryWindow::SERVICE_INTERRUPTION));

    // redirects are not followed; the redirect itself is the document
    let outcome = h.engine.fetch(&url(&server, "/moved")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::VersionNeeded);
    let document = outcome.document.unwrap();
    assert_eq!(document.status, 301);
    assert_eq!(document.header("location"), Some("/elsewhere"));
}

#[tokio::test]
async fn test_unindexable_content_type() {
    let server = MockServer::start().await;
    Mock::given(path("/image.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0u8; 64]),
        )
        .mount(&server)
        .await;

    let h = harness(
        &server,
        r#"
        [fetcher]
        user-agent = "SluiceBot/1.0"
        obey-robots = false
        indexable-content-types = ["text/html", "text/plain"]
        "#,
    );

    let outcome = h.engine.fetch(&url(&server, "/image.png")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::NoVersion);
    assert_eq!(
        outcome.diagnostic.as_deref(),
        Some("content type not indexable ('image/png')")
    );
    assert!(outcome.document.is_none());

    // the body was never read
    let fetches = h.log.records_of(ActivityKind::Fetch);
    assert_eq!(fetches[0].byte_count, Some(0));
}

#[tokio::test]
async fn test_connection_refused_is_retried() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let uri = format!("http://127.0.0.1:{}", port);
    let h = harness_at(
        &uri,
        r#"
        [fetcher]
        user-agent = "SluiceBot/1.0"
        obey-robots = false
        connect-timeout-ms = 2000
        "#,
    );

    let outcome = h.engine.fetch(&format!("{}/gone", uri)).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::RetryDocument);
    assert!(outcome.retry.is_some());
    assert_eq!(h.engine.registry().live_connections(), 0);

    let fetches = h.log.records_of(ActivityKind::Fetch);
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].result_code.as_deref(), Some("CONNECTFAILED"));
}

#[tokio::test]
async fn test_basic_credentials_sent() {
    let server = MockServer::start().await;
    Mock::given(path("/members/index.html"))
        .and(header("authorization", "Basic YWxpY2U6c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("members only"))
        .mount(&server)
        .await;
    Mock::given(path("/members/index.html"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(&server)
        .await;

    let h = harness(
        &server,
        r#"
        [fetcher]
        user-agent = "SluiceBot/1.0"
        obey-robots = false

        [[access-credential]]
        url-regex = "/members/"
        type = "basic"
        username = "alice"
        password = "secret"
        "#,
    );

    let outcome = h.engine.fetch(&url(&server, "/members/index.html")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::VersionNeeded);
    assert_eq!(outcome.document.unwrap().text(), "members only");
}
