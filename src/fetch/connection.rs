//! Throttled, pooled connections
//!
//! A [`ThrottledConnection`] is obtained from the registry for one fetch at a
//! time. Its body is read in fixed-size chunks, each one admitted by the
//! bandwidth throttle of every bin the connection belongs to. Dropping the
//! connection at any point ends the fetch and hands its pool slots back
//! exactly once.

use crate::fetch::classify::FetchError;
use crate::fetch::executor::{ChunkReceiver, FetchExecutor, FetchRequest, Milestone};
use crate::fetch::transport::{ConnectionKey, PooledTransport, TransportSettings};
use crate::store::{ActivityKind, ActivityRecord, ActivityRecorder};
use crate::throttle::{Admission, BinSet, Slot, ThrottleDescription, ThrottleRegistry, READ_CHUNK_LENGTH};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Registry type used by the fetch layer
pub type TransportRegistry = ThrottleRegistry<PooledTransport>;

const INITIAL_POOL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_POOL_BACKOFF: Duration = Duration::from_secs(2);

/// Settings shared by every connection
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub transport: TransportSettings,
    pub socket_timeout: Duration,
    /// Blocked admissions tolerated before giving up
    pub pool_retry_limit: u32,
}

/// A connection signed out of the pool for one fetch at a time
pub struct ThrottledConnection {
    bins: Option<BinSet<PooledTransport>>,
    transport: Option<PooledTransport>,
    socket_timeout: Duration,
    cancel: CancellationToken,
    recorder: Arc<dyn ActivityRecorder>,
    broken: bool,

    active: bool,
    fetch_type: String,
    url: String,
    started_at: DateTime<Utc>,
    started: Instant,
    status: Option<u16>,
    headers: HeaderMap,
    cookies: Vec<String>,
    executor: Option<FetchExecutor>,
    body: Option<ChunkReceiver>,
    pending: Vec<u8>,
    pending_pos: usize,
    bytes_read: u64,
    error: Option<FetchError>,
}

impl ThrottledConnection {
    /// Signs a connection out of the pool, waiting while bins are busy
    ///
    /// # Arguments
    ///
    /// * `registry` - Shared bin registry
    /// * `description` - Per-bin limits
    /// * `key` - The identity the connection must have
    /// * `settings` - Timeouts and retry limit
    /// * `cancel` - Shutdown token
    /// * `recorder` - Where fetch activity is reported
    ///
    /// # Returns
    ///
    /// * `Ok(Some(conn))` - A connection reserved in every bin
    /// * `Ok(None)` - The bins stayed busy for `pool_retry_limit` attempts
    /// * `Err(FetchError::Interrupted)` - Cancelled while waiting
    /// * `Err(_)` - The client could not be set up
    pub async fn obtain(
        registry: &TransportRegistry,
        description: &ThrottleDescription,
        key: ConnectionKey,
        settings: &ConnectionSettings,
        cancel: &CancellationToken,
        recorder: Arc<dyn ActivityRecorder>,
    ) -> Result<Option<Self>, FetchError> {
        let mut attempts = 0u32;
        let mut backoff = INITIAL_POOL_BACKOFF;
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Interrupted);
            }

            tracing::trace!(
                "Attempting to get connection to {}://{}:{} ({} ms)",
                key.protocol,
                key.host,
                key.port,
                started.elapsed().as_millis()
            );

            let wait = match registry.try_acquire(&key.bins, description, &|t: &PooledTransport| t.matches(&key)) {
                Admission::Granted { bins, slot } => {
                    let transport = match slot {
                        Slot::Reused(transport) => transport,
                        Slot::New(token) => match PooledTransport::open(key.clone(), &settings.transport, token) {
                            Ok(transport) => transport,
                            Err(e) => {
                                bins.discard();
                                return Err(e);
                            }
                        },
                    };
                    tracing::debug!(
                        "Got connection to {}://{}:{} ({} ms)",
                        key.protocol,
                        key.host,
                        key.port,
                        started.elapsed().as_millis()
                    );
                    return Ok(Some(Self::new(bins, transport, settings.socket_timeout, cancel, recorder)));
                }
                Admission::Blocked => {
                    attempts += 1;
                    if attempts >= settings.pool_retry_limit {
                        tracing::debug!(
                            "No connection to {}://{}:{} after {} attempts",
                            key.protocol,
                            key.host,
                            key.port,
                            attempts
                        );
                        return Ok(None);
                    }
                    let wait = backoff;
                    backoff = (backoff * 2).min(MAX_POOL_BACKOFF);
                    wait
                }
                Admission::TooSoon(wait) => {
                    tracing::debug!(
                        "Waiting {} ms before starting fetch on {}://{}:{}",
                        wait.as_millis(),
                        key.protocol,
                        key.host,
                        key.port
                    );
                    wait
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Interrupted),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn new(
        bins: BinSet<PooledTransport>,
        transport: PooledTransport,
        socket_timeout: Duration,
        cancel: &CancellationToken,
        recorder: Arc<dyn ActivityRecorder>,
    ) -> Self {
        Self {
            bins: Some(bins),
            transport: Some(transport),
            socket_timeout,
            cancel: cancel.clone(),
            recorder,
            broken: false,
            active: false,
            fetch_type: String::new(),
            url: String::new(),
            started_at: Utc::now(),
            started: Instant::now(),
            status: None,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            executor: None,
            body: None,
            pending: Vec::new(),
            pending_pos: 0,
            bytes_read: 0,
            error: None,
        }
    }

    /// Starts a fetch; `fetch_type` only labels the activity record
    pub fn begin_fetch(&mut self, fetch_type: &str) {
        self.done_fetch();
        self.fetch_type = fetch_type.to_string();
        self.url.clear();
        self.started_at = Utc::now();
        self.started = Instant::now();
        self.status = None;
        self.headers.clear();
        self.cookies.clear();
        self.executor = None;
        self.body = None;
        self.pending.clear();
        self.pending_pos = 0;
        self.bytes_read = 0;
        self.error = None;
        if let Some(bins) = self.bins.as_mut() {
            bins.begin_fetch();
        }
        self.active = true;
    }

    /// Sends the request and waits for headers, cookies and the body stream
    ///
    /// # Returns
    ///
    /// * `Ok(status)` - The response status; read the body with `read_body`
    /// * `Err(FetchError)` - Classified failure (or `Interrupted`)
    pub async fn execute_fetch(&mut self, request: FetchRequest) -> Result<u16, FetchError> {
        self.url = request.url.to_string();
        let client = match &self.transport {
            Some(transport) => transport.client().clone(),
            None => return Err(self.fail(FetchError::Io("connection closed".to_string()))),
        };

        self.executor = Some(FetchExecutor::spawn(client, request, self.socket_timeout, &self.cancel));

        match self.milestone().await? {
            Milestone::Headers { status, headers } => {
                self.status = Some(status);
                self.headers = headers;
            }
            other => return Err(self.unexpected(other)),
        }
        match self.milestone().await? {
            Milestone::Cookies(cookies) => self.cookies = cookies,
            other => return Err(self.unexpected(other)),
        }
        match self.milestone().await? {
            Milestone::Body(chunks) => self.body = Some(chunks),
            other => return Err(self.unexpected(other)),
        }

        Ok(self.status.unwrap_or_default())
    }

    async fn milestone(&mut self) -> Result<Milestone, FetchError> {
        let result = match self.executor.as_mut() {
            Some(executor) => executor.next_milestone().await,
            None => Err(FetchError::NoResponse("no request in flight".to_string())),
        };
        result.map_err(|e| self.fail(e))
    }

    fn unexpected(&mut self, milestone: Milestone) -> FetchError {
        let error = match milestone {
            Milestone::Failed(e) => e,
            other => FetchError::Io(format!("unexpected milestone {:?}", other)),
        };
        self.fail(error)
    }

    fn fail(&mut self, error: FetchError) -> FetchError {
        self.broken = true;
        self.error = Some(error.clone());
        error
    }

    /// Reads the whole body through the bandwidth throttle
    pub async fn read_body(&mut self) -> Result<Vec<u8>, FetchError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Reads at most one throttled chunk; `Ok(None)` at end of body
    pub async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError> {
        let tickets = match self.bins.as_ref() {
            Some(bins) => bins.begin_read(READ_CHUNK_LENGTH).await,
            None => Vec::new(),
        };

        match self.next_bytes(READ_CHUNK_LENGTH).await {
            Ok(chunk) => {
                let actual = chunk.as_ref().map_or(0, Vec::len);
                BinSet::<PooledTransport>::end_read(tickets, actual);
                self.bytes_read += actual as u64;
                Ok(chunk)
            }
            Err(e) => {
                // An unfinished calibration read re-opens calibration.
                drop(tickets);
                Err(self.fail(e))
            }
        }
    }

    async fn next_bytes(&mut self, max: usize) -> Result<Option<Vec<u8>>, FetchError> {
        loop {
            if self.pending_pos < self.pending.len() {
                let end = (self.pending_pos + max).min(self.pending.len());
                let chunk = self.pending[self.pending_pos..end].to_vec();
                self.pending_pos = end;
                return Ok(Some(chunk));
            }

            let Some(chunks) = self.body.as_mut() else {
                return Ok(None);
            };

            let received = tokio::select! {
                _ = self.cancel.cancelled() => return Err(FetchError::Interrupted),
                received = tokio::time::timeout(self.socket_timeout, chunks.recv()) => received,
            };

            match received {
                Err(_) => return Err(FetchError::SocketTimeout),
                Ok(None) => {
                    self.body = None;
                    return Ok(None);
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(bytes))) => {
                    self.pending = bytes;
                    self.pending_pos = 0;
                }
            }
        }
    }

    /// Ends the current fetch: logs the summary line and records the activity
    pub fn done_fetch(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.executor = None;
        self.body = None;
        if let Some(bins) = self.bins.as_mut() {
            bins.end_fetch();
        }

        let status = self
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let error = self.error.as_ref().map(ToString::to_string).unwrap_or_default();
        tracing::info!(
            "FETCH {}|{}|{}+{}|{}|{}|{}",
            self.fetch_type,
            self.url,
            self.started_at.timestamp_millis(),
            self.started.elapsed().as_millis(),
            status,
            self.bytes_read,
            error
        );

        let mut record = ActivityRecord::now(ActivityKind::Fetch, self.url.clone()).with_bytes(self.bytes_read);
        record.started_at = self.started_at;
        record = match (&self.error, self.status) {
            (Some(e), _) => record.with_result(e.code()).with_message(e.to_string()),
            (None, Some(status)) => record.with_result(status.to_string()),
            (None, None) => record,
        };
        self.recorder.record(record);
    }

    /// Ends any fetch and returns the connection to the pool
    pub fn close(mut self) {
        self.settle();
    }

    fn settle(&mut self) {
        self.done_fetch();
        if let Some(bins) = self.bins.take() {
            match self.transport.take() {
                Some(transport) if !self.broken => bins.release(transport),
                _ => bins.discard(),
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a response header, if it is valid text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw Set-Cookie values of the response
    pub fn set_cookies(&self) -> &[String] {
        &self.cookies
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bin_names(&self) -> Vec<String> {
        self.bins.as_ref().map(BinSet::names).unwrap_or_default()
    }
}

impl Drop for ThrottledConnection {
    fn drop(&mut self) {
        self.settle();
    }
}
