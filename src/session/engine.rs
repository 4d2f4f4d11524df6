//! Document fetch driver
//!
//! [`SessionEngine::fetch`] is the single entry point a crawl driver calls
//! per document. Each pass over the current URL resolves the host, checks
//! robots.txt (for the document itself only), fetches through the throttled
//! connection layer and evaluates the page against the document's login
//! sequence. The [`SessionMachine`] decides what comes next.
//!
//! Contention for pools and gates never escapes as an error: it becomes a
//! `RetryDocument` result. Only store failures and shutdown are returned as
//! `Err`.

use crate::config::{Config, FetcherConfig};
use crate::fetch::{
    bin_names, is_fetchable_status, is_service_interruption, ConnectionKey, ConnectionSettings,
    FetchError, FetchRequest, RetryWindow, ThrottledConnection, TransportRegistry,
    TransportSettings,
};
use crate::robots::cache::{cache_key, event_name, failure_ttl, robots_key, success_ttl};
use crate::robots::{CachedRobots, RobotsRuleSet};
use crate::session::cookies::SessionCookies;
use crate::session::credentials::{CredentialsDescription, LoginSequence, PageCredential};
use crate::session::gates::{dns_event, session_event, EventGuard};
use crate::session::login_page::{self, PageView, SubmitMethod};
use crate::session::machine::{
    LoginVerdict, LogonEndCode, LogonEvent, Next, NextHop, PassResult, ResultSignal,
    SessionMachine, SessionState, Verdict,
};
use crate::store::{ActivityKind, ActivityRecord, ActivityRecorder, EventGate, Stores};
use crate::throttle::{ThrottleDescription, ThrottleRegistry, DEFAULT_IDLE_TIMEOUT};
use crate::{ConfigError, SluiceError};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, FROM, LOCATION};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::{Host, Url};

/// Process result code: the host did not resolve
pub const CODE_NO_ADDRESS: &str = "-10";
/// Process result code: robots.txt forbids the fetch
pub const CODE_ROBOTS: &str = "-11";
/// Process result code: the URL is malformed
pub const CODE_MALFORMED_URL: &str = "-12";
/// Process result code: the scheme is not http(s)
pub const CODE_UNSUPPORTED_SCHEME: &str = "-13";

/// How long a DNS answer (or "does not resolve") stays cached
pub fn dns_ttl() -> ChronoDuration {
    ChronoDuration::hours(6)
}

/// A fetched page
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchedDocument {
    /// The body as text, with invalid UTF-8 replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// What the caller needs to build a version string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInputs {
    /// SHA-256 of the body, hex encoded
    pub checksum: String,
    /// Response headers, names lowercased, sorted
    pub headers: Vec<(String, String)>,
    pub status: u16,
}

impl VersionInputs {
    pub fn from_document(document: &FetchedDocument) -> Self {
        let mut headers: Vec<(String, String)> = document
            .headers
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_lowercase(), value.to_string()))
            })
            .collect();
        headers.sort();

        Self {
            checksum: hex::encode(Sha256::digest(&document.body)),
            headers,
            status: document.status,
        }
    }
}

/// The result of fetching one document
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub signal: ResultSignal,
    pub diagnostic: Option<String>,
    /// Process result code recorded against the document, if any
    pub activity_code: Option<&'static str>,
    pub retry: Option<RetryWindow>,
    /// The fetched page, when `signal` is `VersionNeeded`
    pub document: Option<FetchedDocument>,
    pub version: Option<VersionInputs>,
}

impl FetchOutcome {
    fn rejected(code: &'static str, message: String) -> Self {
        Self {
            signal: ResultSignal::NoDocument,
            diagnostic: Some(message),
            activity_code: Some(code),
            retry: None,
            document: None,
            version: None,
        }
    }
}

enum Resolution {
    Address(IpAddr),
    Unresolvable,
    InProgress,
}

enum RobotsCheck {
    Allowed,
    Disallowed,
    InProgress,
}

struct RawResponse {
    status: u16,
    headers: HeaderMap,
    cookies: Vec<String>,
    body: Option<Vec<u8>>,
}

enum Attempt {
    Response(RawResponse),
    Contended,
    Failed(FetchError),
}

/// Per-document walk state
struct Walk {
    machine: SessionMachine,
    sequence: Option<Arc<LoginSequence>>,
    cookies: SessionCookies,
    gate: Option<EventGuard>,
    page: Option<FetchedDocument>,
    notes: Vec<String>,
}

/// The fetch engine: throttles, credentials, stores and gates for a crawl
pub struct SessionEngine {
    settings: FetcherConfig,
    connection: ConnectionSettings,
    throttles: ThrottleDescription,
    credentials: CredentialsDescription,
    registry: Arc<TransportRegistry>,
    stores: Stores,
    gate: Arc<dyn EventGate>,
    recorder: Arc<dyn ActivityRecorder>,
    cancel: CancellationToken,
}

impl SessionEngine {
    /// Builds an engine from a validated configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The crawl configuration
    /// * `stores` - Robots/DNS cache and cookie store
    /// * `gate` - Event gate service
    /// * `recorder` - Activity sink
    ///
    /// # Returns
    ///
    /// * `Ok(SessionEngine)` - Ready to fetch
    /// * `Err(ConfigError)` - A throttle or credential pattern did not compile
    pub fn new(
        config: &Config,
        stores: Stores,
        gate: Arc<dyn EventGate>,
        recorder: Arc<dyn ActivityRecorder>,
    ) -> Result<Self, ConfigError> {
        let fetcher = config.fetcher.clone();
        let connection = ConnectionSettings {
            transport: TransportSettings {
                user_agent: fetcher.user_agent.clone(),
                connect_timeout: Duration::from_millis(fetcher.connect_timeout_ms),
            },
            socket_timeout: Duration::from_millis(fetcher.socket_timeout_ms),
            pool_retry_limit: fetcher.pool_retry_limit,
        };

        Ok(Self {
            registry: Arc::new(ThrottleRegistry::new(fetcher.global_connection_limit)),
            throttles: ThrottleDescription::from_config(&config.throttle)?,
            credentials: CredentialsDescription::from_config(
                &config.access_credentials,
                &config.session_credentials,
            )?,
            settings: fetcher,
            connection,
            stores,
            gate,
            recorder,
            cancel: CancellationToken::new(),
        })
    }

    /// Shares a registry with other engines instead of owning one
    pub fn with_registry(mut self, registry: Arc<TransportRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Cancelling this token interrupts every fetch in progress
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    pub fn throttles(&self) -> &ThrottleDescription {
        &self.throttles
    }

    pub fn credentials(&self) -> &CredentialsDescription {
        &self.credentials
    }

    /// Closes connections idle for longer than the default idle timeout
    pub fn flush_idle(&self) {
        self.registry.flush_idle(DEFAULT_IDLE_TIMEOUT);
    }

    /// Fetches one document, walking its login sequence if needed
    ///
    /// # Arguments
    ///
    /// * `document` - The document identifier (its URL)
    ///
    /// # Returns
    ///
    /// * `Ok(FetchOutcome)` - The classified result
    /// * `Err(SluiceError::Interrupted)` - The engine was cancelled
    /// * `Err(SluiceError::Store)` - A store failed
    pub async fn fetch(&self, document: &str) -> crate::Result<FetchOutcome> {
        let result = self.fetch_document(document).await;
        if let Err(SluiceError::Store(e)) = &result {
            tracing::error!("Store failure while fetching '{}': {}", document, e);
        }
        result
    }

    async fn fetch_document(&self, document: &str) -> crate::Result<FetchOutcome> {
        let url = match Url::parse(document) {
            Ok(url) => url,
            Err(e) => return Ok(self.reject(document, CODE_MALFORMED_URL, format!("was not a valid URL: {}", e))),
        };
        if !matches!(url.scheme(), "http" | "https") {
            let message = format!("has unsupported scheme '{}'", url.scheme());
            return Ok(self.reject(document, CODE_UNSUPPORTED_SCHEME, message));
        }
        if url.host().is_none() {
            return Ok(self.reject(document, CODE_MALFORMED_URL, "has no host".to_string()));
        }

        let sequence = self.credentials.login_sequence(&url);
        let cookies = match &sequence {
            Some(sequence) => SessionCookies::from_saved(self.stores.cookies.read_cookies(sequence.key())?),
            None => SessionCookies::new(),
        };

        let mut walk = Walk {
            machine: SessionMachine::new(url, self.settings.max_login_hops),
            sequence,
            cookies,
            gate: None,
            page: None,
            notes: Vec::new(),
        };

        let result = self.drive(&mut walk).await;

        if let Some(guard) = walk.gate.take() {
            let reason = match &result {
                Err(e) => e.to_string(),
                Ok(_) => "walk ended while holding the gate".to_string(),
            };
            self.record_logon_end(&walk, LogonEndCode::Aborted, Some(reason));
            guard.complete();
        }

        let verdict = result?;

        if verdict.signal == ResultSignal::VersionNeeded {
            if let Some(sequence) = &walk.sequence {
                if walk.cookies.is_changed() {
                    tracing::debug!("Saving cookies for login sequence '{}'", sequence.key());
                    self.stores
                        .cookies
                        .write_cookies(sequence.key(), &walk.cookies.to_saved())?;
                }
            }
        }

        if let Some(code) = verdict.activity_code {
            let mut record = ActivityRecord::now(ActivityKind::Fetch, document).with_result(code);
            if let Some(message) = &verdict.message {
                record = record.with_message(message.clone());
            }
            self.recorder.record(record);
        }

        let mut diagnostics: Vec<String> = verdict.message.into_iter().collect();
        diagnostics.append(&mut walk.notes);
        let page = match verdict.signal {
            ResultSignal::VersionNeeded => walk.page.take(),
            _ => None,
        };

        tracing::debug!(
            "Document '{}' finished with {}{}",
            document,
            verdict.signal,
            if diagnostics.is_empty() {
                String::new()
            } else {
                format!(" because {}", diagnostics.join("; "))
            }
        );

        Ok(FetchOutcome {
            signal: verdict.signal,
            diagnostic: (!diagnostics.is_empty()).then(|| diagnostics.join("; ")),
            activity_code: verdict.activity_code,
            retry: verdict.retry,
            version: page.as_ref().map(VersionInputs::from_document),
            document: page,
        })
    }

    fn reject(&self, document: &str, code: &'static str, message: String) -> FetchOutcome {
        tracing::debug!("Document '{}' {}", document, message);
        self.recorder.record(
            ActivityRecord::now(ActivityKind::Fetch, document)
                .with_result(code)
                .with_message(message.clone()),
        );
        FetchOutcome::rejected(code, message)
    }

    async fn drive(&self, walk: &mut Walk) -> crate::Result<Verdict> {
        let mut next = walk.machine.start();
        loop {
            let transition = match next {
                Next::Fetch(hop) => {
                    let pass = self.pass(walk, hop).await?;
                    walk.machine.on_pass(pass)
                }
                Next::AcquireGate => {
                    walk.gate = walk
                        .sequence
                        .as_ref()
                        .and_then(|sequence| EventGuard::try_begin(&self.gate, session_event(sequence.key())));
                    walk.machine.on_gate(walk.gate.is_some())
                }
                Next::Done(verdict) => return Ok(verdict),
            };

            for event in transition.logon {
                match event {
                    LogonEvent::Started => self.record_logon_start(walk),
                    LogonEvent::Ended { code, message } => {
                        self.record_logon_end(walk, code, message);
                        if let Some(guard) = walk.gate.take() {
                            guard.complete();
                        }
                    }
                }
            }
            next = transition.next;
        }
    }

    fn record_logon_start(&self, walk: &Walk) {
        let key = walk.sequence.as_ref().map(|s| s.key()).unwrap_or_default();
        tracing::info!(
            "For document '{}', beginning login sequence '{}'",
            walk.machine.document(),
            key
        );
        self.recorder
            .record(ActivityRecord::now(ActivityKind::LogonStart, key).with_result("OK"));
    }

    fn record_logon_end(&self, walk: &Walk, code: LogonEndCode, message: Option<String>) {
        let key = walk.sequence.as_ref().map(|s| s.key()).unwrap_or_default();
        tracing::info!(
            "For document '{}', login sequence '{}' ended: {}",
            walk.machine.document(),
            key,
            code.as_str()
        );
        let mut record = ActivityRecord::now(ActivityKind::LogonEnd, key).with_result(code.as_str());
        if let Some(message) = message {
            record = record.with_message(message);
        }
        self.recorder.record(record);
    }

    /// One pass over `hop`: resolve, check robots, fetch, evaluate
    async fn pass(&self, walk: &mut Walk, hop: NextHop) -> crate::Result<PassResult> {
        let url = hop.url.clone();

        if !matches!(url.scheme(), "http" | "https") {
            return Ok(PassResult::failed(
                ResultSignal::NoDocument,
                format!("has unsupported scheme '{}'", url.scheme()),
            )
            .with_activity_code(CODE_UNSUPPORTED_SCHEME));
        }
        let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
            return Ok(PassResult::failed(ResultSignal::NoDocument, "was not a valid URL: no host")
                .with_activity_code(CODE_MALFORMED_URL));
        };
        let host = host.to_lowercase();

        let ip = match self.resolve(&url).await? {
            Resolution::Address(ip) => ip,
            Resolution::Unresolvable => {
                return Ok(PassResult::failed(ResultSignal::NoDocument, "ip address not found")
                    .with_activity_code(CODE_NO_ADDRESS))
            }
            Resolution::InProgress => {
                return Ok(PassResult::failed(
                    ResultSignal::RetryDocument,
                    "dns prerequisite already in progress",
                ))
            }
        };

        let key = self.connection_key(&url, &host, ip, port);

        // Login-sequence pages are exempt from robots.txt.
        if walk.machine.at_document() && self.settings.obey_robots {
            match self.check_robots(&url, &key).await? {
                RobotsCheck::Allowed => {}
                RobotsCheck::Disallowed => {
                    return Ok(PassResult::failed(ResultSignal::NoDocument, "robots.txt says so")
                        .with_activity_code(CODE_ROBOTS))
                }
                RobotsCheck::InProgress => {
                    return Ok(PassResult::failed(
                        ResultSignal::RetryDocument,
                        "robots prerequisite already in progress",
                    ))
                }
            }
        }

        let in_login = walk.machine.state() == SessionState::Login;
        let cookie = walk
            .sequence
            .as_ref()
            .and_then(|_| walk.cookies.header_for(&url));
        let request = self.build_request(&url, &hop, cookie);
        let fetch_type = if in_login { "login" } else { "standard" };

        let response = match self.throttled_fetch(key, request, fetch_type, true).await? {
            Attempt::Response(response) => response,
            Attempt::Contended => {
                return Ok(PassResult::failed(
                    ResultSignal::RetryDocument,
                    "connection pool busy",
                ))
            }
            Attempt::Failed(e) => {
                return Ok(PassResult::failed(ResultSignal::RetryDocument, e.to_string())
                    .with_retry(e.retry_window()))
            }
        };

        let status = response.status;
        if is_service_interruption(status) {
            return Ok(PassResult::failed(
                ResultSignal::RetryDocument,
                format!("service interruption (status={})", status),
            )
            .with_retry(Some(RetryWindow::SERVICE_INTERRUPTION)));
        }
        if !is_fetchable_status(status) {
            return Ok(PassResult::failed(
                ResultSignal::NoVersion,
                format!("it failed to fetch (status={})", status),
            ));
        }

        if in_login {
            walk.cookies.merge(&url, &response.cookies);
        }

        let Some(body) = response.body else {
            let content_type = response
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            return Ok(PassResult::failed(
                ResultSignal::NoVersion,
                format!("content type not indexable ('{}')", content_type),
            ));
        };

        let page = FetchedDocument {
            url: url.clone(),
            status,
            headers: response.headers,
            body,
        };

        let login = match &walk.sequence {
            Some(sequence) => {
                let text = page.text();
                let view = PageView {
                    url: &url,
                    status,
                    location: page.header(LOCATION.as_str()),
                    body: &text,
                };
                let evaluation = login_page::evaluate(sequence, &view);
                if let Some(kind) = evaluation.ambiguous {
                    walk.notes.push(format!(
                        "ambiguous {} match for login sequence '{}' on '{}'",
                        kind.as_str(),
                        sequence.key(),
                        url
                    ));
                }
                match evaluation.target {
                    Some(target) => LoginVerdict::LoginPage(NextHop::from_target(target)),
                    None => LoginVerdict::NotLoginPage,
                }
            }
            None => LoginVerdict::NotLoginPage,
        };

        walk.page = Some(page);
        Ok(PassResult::fetched(login))
    }

    fn connection_key(&self, url: &Url, host: &str, ip: IpAddr, port: u16) -> ConnectionKey {
        ConnectionKey::new(url.scheme(), host, port, bin_names(url))
            .with_ip(Some(ip))
            .with_credential(self.credentials.page_credential(url).map(PageCredential::identity))
            .with_trust(url.scheme() == "https" && self.settings.trust_all_certificates)
            .with_proxy(self.settings.proxy_url.clone())
    }

    fn build_request(&self, url: &Url, hop: &NextHop, cookie: Option<String>) -> FetchRequest {
        let mut request = FetchRequest::get(url.clone());

        if let Some(form) = &hop.submission {
            request.method = match form.method {
                SubmitMethod::Get => Method::GET,
                SubmitMethod::Post => Method::POST,
            };
            request.form = form.pairs();
        }

        if let Some(from) = self.settings.from_address.as_deref() {
            if let Ok(value) = HeaderValue::from_str(from) {
                request.headers.insert(FROM, value);
            }
        }
        if let Some(cookie) = cookie {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    request.headers.insert(COOKIE, value);
                }
                Err(e) => tracing::debug!("Not sending unusable cookie header for '{}': {}", url, e),
            }
        }

        request.basic_auth = self.credentials.page_credential(url).map(PageCredential::basic_auth);
        request
    }

    /// Signs out a connection, runs one exchange, and hands the connection back
    async fn throttled_fetch(
        &self,
        key: ConnectionKey,
        request: FetchRequest,
        fetch_type: &str,
        indexable_only: bool,
    ) -> crate::Result<Attempt> {
        let obtained = ThrottledConnection::obtain(
            &self.registry,
            &self.throttles,
            key,
            &self.connection,
            &self.cancel,
            Arc::clone(&self.recorder),
        )
        .await;

        let mut connection = match obtained {
            Ok(Some(connection)) => connection,
            Ok(None) => return Ok(Attempt::Contended),
            Err(FetchError::Interrupted) => return Err(SluiceError::Interrupted),
            Err(e) => return Ok(Attempt::Failed(e)),
        };

        connection.begin_fetch(fetch_type);
        let result = self.exchange(&mut connection, request, indexable_only).await;
        connection.done_fetch();
        connection.close();

        match result {
            Ok(response) => Ok(Attempt::Response(response)),
            Err(FetchError::Interrupted) => Err(SluiceError::Interrupted),
            Err(e) => Ok(Attempt::Failed(e)),
        }
    }

    async fn exchange(
        &self,
        connection: &mut ThrottledConnection,
        request: FetchRequest,
        indexable_only: bool,
    ) -> Result<RawResponse, FetchError> {
        let status = connection.execute_fetch(request).await?;
        let wants_body =
            is_fetchable_status(status) && (!indexable_only || self.is_indexable(status, connection.headers()));
        let body = if wants_body {
            Some(connection.read_body().await?)
        } else {
            None
        };

        Ok(RawResponse {
            status,
            headers: connection.headers().clone(),
            cookies: connection.set_cookies().to_vec(),
            body,
        })
    }

    /// Whether a response is worth keeping, judged by its content type
    fn is_indexable(&self, status: u16, headers: &HeaderMap) -> bool {
        if status != 200 || self.settings.indexable_content_types.is_empty() {
            return true;
        }
        let media_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default();
        self.settings
            .indexable_content_types
            .iter()
            .any(|t| t.trim().eq_ignore_ascii_case(&media_type))
    }

    /// Resolves the URL's host through the DNS cache
    async fn resolve(&self, url: &Url) -> crate::Result<Resolution> {
        let host = match url.host() {
            Some(Host::Ipv4(ip)) => return Ok(Resolution::Address(IpAddr::V4(ip))),
            Some(Host::Ipv6(ip)) => return Ok(Resolution::Address(IpAddr::V6(ip))),
            Some(Host::Domain(host)) => host.to_lowercase(),
            None => return Ok(Resolution::Unresolvable),
        };

        let key = format!("DNS_{}", host);
        let now = Utc::now();
        if let Some(entry) = self.stores.cache.lookup(&key)? {
            if entry.is_live(now) {
                match entry.value.as_deref().map(str::parse::<IpAddr>) {
                    None => return Ok(Resolution::Unresolvable),
                    Some(Ok(ip)) => return Ok(Resolution::Address(ip)),
                    Some(Err(_)) => tracing::debug!("Ignoring unreadable DNS cache entry for '{}'", host),
                }
            }
        }

        let Some(_guard) = EventGuard::try_begin(&self.gate, dns_event(&host)) else {
            return Ok(Resolution::InProgress);
        };

        let answer = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SluiceError::Interrupted),
            answer = tokio::net::lookup_host((host.as_str(), 0)) => answer,
        };
        let ip = match answer {
            Ok(mut addresses) => addresses.next().map(|address| address.ip()),
            Err(e) => {
                tracing::debug!("Host '{}' did not resolve: {}", host, e);
                None
            }
        };

        let value = ip.map(|ip| ip.to_string());
        self.stores.cache.write(&key, value.as_deref(), now + dns_ttl())?;
        Ok(match ip {
            Some(ip) => Resolution::Address(ip),
            None => Resolution::Unresolvable,
        })
    }

    /// Checks robots.txt for the URL, fetching and caching it when needed
    async fn check_robots(&self, url: &Url, key: &ConnectionKey) -> crate::Result<RobotsCheck> {
        let Some(robots) = robots_key(url) else {
            return Ok(RobotsCheck::Allowed);
        };
        let user_agent = self.settings.user_agent.as_str();
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let verdict = |allowed: bool| {
            if allowed {
                RobotsCheck::Allowed
            } else {
                RobotsCheck::Disallowed
            }
        };

        let cached_key = cache_key(&robots);
        let now = Utc::now();
        if let Some(entry) = self.stores.cache.lookup(&cached_key)? {
            if entry.is_live(now) {
                let cached = CachedRobots::from_entry(&entry, &key.host);
                return Ok(verdict(cached.is_allowed(user_agent, &path)));
            }
        }

        let Some(_guard) = EventGuard::try_begin(&self.gate, event_name(&robots)) else {
            return Ok(RobotsCheck::InProgress);
        };

        let robots_url = url.join("/robots.txt")?;
        let request = self.build_request(&robots_url, &NextHop::plain(robots_url.clone()), None);
        let (body, ttl) = match self.throttled_fetch(key.clone(), request, "robots", false).await? {
            Attempt::Response(RawResponse {
                status: 200,
                body: Some(body),
                ..
            }) => (Some(String::from_utf8_lossy(&body).into_owned()), success_ttl()),
            Attempt::Response(response) => {
                tracing::debug!("No robots.txt at '{}' (status={})", robots_url, response.status);
                (None, success_ttl())
            }
            Attempt::Failed(e) => {
                tracing::debug!("Could not fetch '{}': {}", robots_url, e);
                (None, failure_ttl())
            }
            Attempt::Contended => return Ok(RobotsCheck::InProgress),
        };

        self.stores.cache.write(&cached_key, body.as_deref(), now + ttl)?;

        let Some(text) = body else {
            return Ok(RobotsCheck::Allowed);
        };
        let parsed = RobotsRuleSet::parse(&text, &key.host);
        let mut record = ActivityRecord::now(ActivityKind::RobotsParse, robots_url.as_str())
            .with_result(parsed.status.as_code());
        if let Some(description) = parsed.description {
            record = record.with_message(description);
        }
        self.recorder.record(record);

        Ok(verdict(parsed.rules.is_fetch_allowed(user_agent, &path)))
    }
}
