//! Throttled fetch layer
//!
//! This module turns pool admissions into live HTTP exchanges:
//! - `classify`: failure classes and their retry windows
//! - `transport`: connection identity and client construction
//! - `executor`: request execution in an abortable worker
//! - `connection`: the pooled, throttled connection handle

mod classify;
mod connection;
mod executor;
mod transport;

pub use classify::{is_fetchable_status, is_service_interruption, FetchError, RetryWindow};
pub use connection::{ConnectionSettings, ThrottledConnection, TransportRegistry};
pub use executor::{ChunkReceiver, FetchExecutor, FetchRequest, Milestone};
pub use transport::{ConnectionKey, PooledTransport, TransportSettings};

use url::Url;

/// Bin names a URL's connections are accounted under
pub fn bin_names(url: &Url) -> Vec<String> {
    vec![url.host_str().map(str::to_lowercase).unwrap_or_default()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_names() {
        let url = Url::parse("https://Docs.Example.com/a").unwrap();
        assert_eq!(bin_names(&url), vec!["docs.example.com".to_string()]);

        let url = Url::parse("data:text/plain,hi").unwrap();
        assert_eq!(bin_names(&url), vec![String::new()]);
    }
}
