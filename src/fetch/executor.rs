//! Request execution off the caller's task
//!
//! The request runs in a spawned worker that reports three ordered milestones
//! over a channel: response headers, cookies, then the body chunk stream. The
//! caller waits for each with the socket timeout, and can stop the worker at
//! any point by cancelling its token or dropping the executor.

use crate::fetch::classify::FetchError;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Client, Method};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// One HTTP request as the session layer builds it
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Form fields: appended to the query for GET, sent as the body for POST
    pub form: Vec<(String, String)>,
    pub basic_auth: Option<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            form: Vec::new(),
            basic_auth: None,
        }
    }
}

/// Receiver of body chunks, produced by [`Milestone::Body`]
pub type ChunkReceiver = mpsc::Receiver<Result<Vec<u8>, FetchError>>;

/// Progress reported by the worker, in this order
#[derive(Debug)]
pub enum Milestone {
    Headers { status: u16, headers: HeaderMap },
    Cookies(Vec<String>),
    Body(ChunkReceiver),
    Failed(FetchError),
}

/// Handle on a running request
#[derive(Debug)]
pub struct FetchExecutor {
    milestones: mpsc::Receiver<Milestone>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
    socket_timeout: Duration,
}

impl FetchExecutor {
    /// Starts a request in a new worker
    ///
    /// # Arguments
    ///
    /// * `client` - The pooled transport's client
    /// * `request` - What to send
    /// * `socket_timeout` - Longest wait for any single milestone or chunk
    /// * `parent` - Cancelling it stops the worker
    pub fn spawn(client: Client, request: FetchRequest, socket_timeout: Duration, parent: &CancellationToken) -> Self {
        let (tx, milestones) = mpsc::channel(3);
        let cancel = parent.child_token();
        let worker = tokio::spawn(run(client, request, tx, cancel.clone()));
        Self {
            milestones,
            cancel,
            worker,
            socket_timeout,
        }
    }

    /// Waits for the next milestone
    ///
    /// # Returns
    ///
    /// * `Ok(Milestone)` - The next milestone (possibly `Failed`)
    /// * `Err(FetchError::SocketTimeout)` - Nothing arrived within the socket timeout
    /// * `Err(FetchError::Interrupted)` - The executor was cancelled
    /// * `Err(FetchError::NoResponse)` - The worker stopped without reporting
    pub async fn next_milestone(&mut self) -> Result<Milestone, FetchError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(FetchError::Interrupted),
            received = tokio::time::timeout(self.socket_timeout, self.milestones.recv()) => match received {
                Err(_) => Err(FetchError::SocketTimeout),
                Ok(Some(milestone)) => Ok(milestone),
                Ok(None) => Err(FetchError::NoResponse("worker stopped".to_string())),
            },
        }
    }

    /// Stops the worker; the underlying connection is dropped with it
    pub fn abort(&self) {
        self.cancel.cancel();
        self.worker.abort();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for FetchExecutor {
    fn drop(&mut self) {
        self.abort();
    }
}

fn build(client: &Client, request: FetchRequest) -> reqwest::RequestBuilder {
    let mut url = request.url;
    let is_get = request.method == Method::GET;
    if is_get && !request.form.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(request.form.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    let mut builder = client.request(request.method, url).headers(request.headers);
    if let Some((user, password)) = request.basic_auth {
        builder = builder.basic_auth(user, Some(password));
    }
    if !is_get && !request.form.is_empty() {
        builder = builder.form(&request.form);
    }
    builder
}

async fn run(client: Client, request: FetchRequest, tx: mpsc::Sender<Milestone>, cancel: CancellationToken) {
    let send = build(&client, request).send();
    let mut response = tokio::select! {
        _ = cancel.cancelled() => return,
        result = send => match result {
            Ok(response) => response,
            Err(e) => {
                let _ = tx.send(Milestone::Failed(FetchError::from_reqwest(&e))).await;
                return;
            }
        },
    };

    let headers = response.headers().clone();
    let cookies: Vec<String> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();

    let status = response.status().as_u16();
    if tx.send(Milestone::Headers { status, headers }).await.is_err() {
        return;
    }
    if tx.send(Milestone::Cookies(cookies)).await.is_err() {
        return;
    }

    let (chunk_tx, chunk_rx) = mpsc::channel(1);
    if tx.send(Milestone::Body(chunk_rx)).await.is_err() {
        return;
    }
    drop(tx);

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = response.chunk() => chunk,
        };
        match chunk {
            Ok(Some(bytes)) => {
                if chunk_tx.send(Ok(bytes.to_vec())).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = chunk_tx.send(Err(FetchError::from_reqwest(&e))).await;
                return;
            }
        }
    }
}
