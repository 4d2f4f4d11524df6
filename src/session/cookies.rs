//! Session cookie jar
//!
//! The jar for a document starts from the cookies persisted for its login
//! sequence, supplies the `Cookie` header of every request, and collects the
//! `Set-Cookie` values seen during a login walk so they can be persisted once
//! the walk has produced a document.

use crate::store::SessionCookie;
use cookie_store::CookieStore as Jar;
use url::Url;

/// Cookies for one login sequence, as used while fetching one document
#[derive(Debug, Default)]
pub struct SessionCookies {
    jar: Jar,
    saved: Vec<SessionCookie>,
    changed: bool,
}

impl SessionCookies {
    /// An empty jar
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the jar from persisted cookies
    ///
    /// Cookies that no longer parse (or whose origin is not a URL) are skipped.
    pub fn from_saved(saved: Vec<SessionCookie>) -> Self {
        let mut jar = Jar::default();
        for cookie in &saved {
            let parsed = Url::parse(&cookie.origin)
                .map_err(|e| e.to_string())
                .and_then(|origin| jar.parse(&cookie.set_cookie, &origin).map_err(|e| e.to_string()));
            if let Err(e) = parsed {
                tracing::debug!("Skipping saved cookie from '{}': {}", cookie.origin, e);
            }
        }
        Self {
            jar,
            saved,
            changed: false,
        }
    }

    /// Merges the `Set-Cookie` values of a response fetched from `url`
    pub fn merge(&mut self, url: &Url, set_cookies: &[String]) {
        for raw in set_cookies {
            if let Err(e) = self.jar.parse(raw, url) {
                tracing::debug!("Ignoring cookie from '{}': {}", url, e);
                continue;
            }

            let name = cookie_name(raw);
            let host = url.host_str().unwrap_or_default();
            self.saved.retain(|existing| {
                cookie_name(&existing.set_cookie) != name || origin_host(&existing.origin) != host
            });
            self.saved.push(SessionCookie {
                origin: url.to_string(),
                set_cookie: raw.clone(),
            });
            self.changed = true;
        }
    }

    /// `Cookie` header value for a request to `url`, if any cookie applies
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let pairs: Vec<String> = self
            .jar
            .get_request_values(url)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    /// Whether `merge` accepted anything since the jar was built
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Cookies to persist for the sequence
    pub fn to_saved(&self) -> Vec<SessionCookie> {
        self.saved.clone()
    }
}

fn cookie_name(set_cookie: &str) -> &str {
    set_cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split('=').next())
        .map(str::trim)
        .unwrap_or_default()
}

fn origin_host(origin: &str) -> String {
    Url::parse(origin)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_default()
}
