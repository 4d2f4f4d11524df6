//! Login sequence walks against a mock portal

use crate::{harness, url};
use std::time::Duration;
use sumi_sluice::session::LogonEndCode;
use sumi_sluice::store::ActivityKind;
use sumi_sluice::ResultSignal;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN_FORM: &str = r#"<html><body>
<form name="login" action="/login/submit" method="post">
  <input type="text" name="user">
  <input type="password" name="password">
  <input type="hidden" name="csrf" value="t0k3n">
  <input type="submit" value="Sign in">
</form>
</body></html>"#;

const WELCOME: &str = "<html><body>Welcome back</body></html>";

const PORTAL: &str = r#"
    [fetcher]
    user-agent = "SluiceBot/1.0"

    [[session-credential]]
    url-regex = "/app/"

    [[session-credential.auth-page]]
    url-regex = "/app/"
    kind = "form"
    match-regex = "^login$"

    [[session-credential.auth-page.parameter]]
    name-regex = "^user$"
    value = "alice"

    [[session-credential.auth-page.parameter]]
    name-regex = "^password$"
    value = "secret"

    [[session-credential.auth-page]]
    url-regex = "/login/submit"
    kind = "redirection"
    match-regex = "/app/"
"#;

/// Mounts a portal whose `/app/` pages demand a session cookie
async fn mount_portal(server: &MockServer, submit_delay: Duration) {
    Mock::given(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/app/"))
        .and(header("cookie", "session=ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string(WELCOME))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/app/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_FORM))
        .with_priority(10)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login/submit"))
        .and(body_string_contains("user=alice"))
        .and(body_string_contains("password=secret"))
        .and(body_string_contains("csrf=t0k3n"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/app/landing")
                .insert_header("set-cookie", "session=ok; Path=/")
                .set_delay(submit_delay),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_walk_and_cookie_reuse() {
    let server = MockServer::start().await;
    mount_portal(&server, Duration::ZERO).await;

    let h = harness(&server, PORTAL);
    let document = url(&server, "/app/landing");

    let outcome = h.engine.fetch(&document).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::VersionNeeded);
    assert_eq!(outcome.document.unwrap().text(), WELCOME);

    // landing (form), submit (302), landing again
    let codes: Vec<_> = h
        .log
        .records_of(ActivityKind::Fetch)
        .into_iter()
        .filter(|r| !r.target.ends_with("/robots.txt"))
        .filter_map(|r| r.result_code)
        .collect();
    assert_eq!(codes, vec!["200", "302", "200"]);

    let starts = h.log.records_of(ActivityKind::LogonStart);
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].target, "/app/");
    let ends = h.log.records_of(ActivityKind::LogonEnd);
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].result_code.as_deref(), Some(LogonEndCode::Ok.as_str()));

    assert!(!h.gate.is_held("webcrawler:session:/app/"));

    let saved = h.stores.cookies.read_cookies("/app/").unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].set_cookie, "session=ok; Path=/");

    // a later document starts from the saved session
    let outcome = h.engine.fetch(&url(&server, "/app/reports")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::VersionNeeded);
    assert_eq!(outcome.document.unwrap().text(), WELCOME);
    assert_eq!(h.log.records_of(ActivityKind::LogonStart).len(), 1);
}

#[tokio::test]
async fn test_login_gate_is_exclusive() {
    let server = MockServer::start().await;
    mount_portal(&server, Duration::from_millis(500)).await;

    // robots.txt has its own gate; keep it out of the race
    let h = harness(
        &server,
        &PORTAL.replace("[fetcher]\n", "[fetcher]\n    obey-robots = false\n"),
    );
    let first = url(&server, "/app/landing");
    let second = url(&server, "/app/reports");

    let (a, b) = tokio::join!(h.engine.fetch(&first), h.engine.fetch(&second));
    let mut signals = vec![a.unwrap(), b.unwrap()];
    signals.sort_by_key(|o| o.signal == ResultSignal::RetryDocument);

    assert_eq!(signals[0].signal, ResultSignal::VersionNeeded);
    assert_eq!(signals[0].document.as_ref().unwrap().text(), WELCOME);
    assert_eq!(signals[1].signal, ResultSignal::RetryDocument);
    assert_eq!(
        signals[1].diagnostic.as_deref(),
        Some("login sequence already in progress")
    );

    assert_eq!(h.log.records_of(ActivityKind::LogonStart).len(), 1);
    assert!(!h.gate.is_held("webcrawler:session:/app/"));
}

#[tokio::test]
async fn test_ambiguous_form_match_is_no_match() {
    let server = MockServer::start().await;
    Mock::given(path("/app/landing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_FORM))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(
        &server,
        r#"
        [fetcher]
        user-agent = "SluiceBot/1.0"
        obey-robots = false

        [[session-credential]]
        url-regex = "/app/"

        [[session-credential.auth-page]]
        url-regex = "/app/"
        kind = "form"
        match-regex = "^log"

        [[session-credential.auth-page]]
        url-regex = "/app/landing"
        kind = "form"
        "#,
    );

    let outcome = h.engine.fetch(&url(&server, "/app/landing")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::VersionNeeded);
    assert_eq!(outcome.document.unwrap().text(), LOGIN_FORM);
    let diagnostic = outcome.diagnostic.unwrap();
    assert!(diagnostic.contains("ambiguous form match"), "{}", diagnostic);
    assert!(h.log.records_of(ActivityKind::LogonStart).is_empty());
}

#[tokio::test]
async fn test_failed_submit_ends_sequence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app/landing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_FORM))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login/submit"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let h = harness(
        &server,
        &PORTAL.replace("[fetcher]\n", "[fetcher]\n    obey-robots = false\n"),
    );

    let outcome = h.engine.fetch(&url(&server, "/app/landing")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::RetryDocument);
    let diagnostic = outcome.diagnostic.unwrap();
    assert!(
        diagnostic.starts_with(&format!("for login sequence url '{}': ", url(&server, "/login/submit"))),
        "{}",
        diagnostic
    );
    assert!(diagnostic.contains("status=500"), "{}", diagnostic);

    let ends = h.log.records_of(ActivityKind::LogonEnd);
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].result_code.as_deref(), Some("LINKTARGETUNSUITABLE"));
    assert!(!h.gate.is_held("webcrawler:session:/app/"));
    assert!(h.stores.cookies.read_cookies("/app/").unwrap().is_empty());
}

#[tokio::test]
async fn test_login_walk_hop_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app/landing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_FORM))
        .mount(&server)
        .await;
    // the portal keeps bouncing back to the form
    Mock::given(method("POST"))
        .and(path("/login/submit"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/app/landing"))
        .mount(&server)
        .await;

    let h = harness(
        &server,
        &PORTAL.replace(
            "[fetcher]\n",
            "[fetcher]\n    obey-robots = false\n    max-login-hops = 4\n",
        ),
    );

    let outcome = h.engine.fetch(&url(&server, "/app/landing")).await.unwrap();
    assert_eq!(outcome.signal, ResultSignal::RetryDocument);
    assert!(outcome.diagnostic.unwrap().contains("exceeded 4 hops"));

    let ends = h.log.records_of(ActivityKind::LogonEnd);
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].result_code.as_deref(), Some("HOPLIMIT"));
    assert!(!h.gate.is_held("webcrawler:session:/app/"));
}
