//! Page and session credentials compiled from configuration
//!
//! Both kinds are ordered `(url regex, credential)` lists. A URL matched by
//! more than one entry of the same list gets no credential at all: guessing
//! between two logins is worse than not logging in.

use crate::config::{
    AccessCredentialEntry, AccessCredentialKind, AuthPageKind, SessionCredentialEntry,
};
use crate::ConfigError;
use regex::Regex;
use std::sync::Arc;
use url::Url;

/// A credential sent with every request to matching URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCredential {
    Basic { username: String, password: String },
}

impl PageCredential {
    /// Identity used in connection keys; never contains the secret
    pub fn identity(&self) -> String {
        match self {
            PageCredential::Basic { username, .. } => format!("basic:{}", username),
        }
    }

    pub fn basic_auth(&self) -> (String, String) {
        match self {
            PageCredential::Basic { username, password } => (username.clone(), password.clone()),
        }
    }
}

/// Form field override
#[derive(Debug, Clone)]
pub struct LoginParameter {
    pub name: Regex,
    pub value: String,
}

/// How one page of a login sequence is recognized and left
#[derive(Debug, Clone)]
pub struct LoginPage {
    pub url_pattern: Regex,
    pub kind: AuthPageKind,
    /// Form name, link target, redirection target or content pattern; `None` matches anything
    pub match_pattern: Option<Regex>,
    pub override_target: Option<String>,
    pub parameters: Vec<LoginParameter>,
}

/// An authentication sequence and its page descriptors
#[derive(Debug, Clone)]
pub struct LoginSequence {
    key: String,
    pages: Vec<LoginPage>,
}

impl LoginSequence {
    pub fn new(key: impl Into<String>, pages: Vec<LoginPage>) -> Self {
        Self {
            key: key.into(),
            pages,
        }
    }

    /// The sequence key; cookies and the login gate are keyed by it
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Page descriptors whose URL pattern is found in `url`, in configuration order
    pub fn pages_for<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a LoginPage> + 'a {
        self.pages.iter().filter(move |page| page.url_pattern.is_match(url))
    }
}

/// All credentials of a crawl
#[derive(Debug, Clone, Default)]
pub struct CredentialsDescription {
    access: Vec<(Regex, PageCredential)>,
    sessions: Vec<(Regex, Arc<LoginSequence>)>,
}

impl CredentialsDescription {
    /// Compiles the credential sections of the configuration
    ///
    /// # Arguments
    ///
    /// * `access` - `[[access-credential]]` entries
    /// * `sessions` - `[[session-credential]]` entries
    ///
    /// # Returns
    ///
    /// * `Ok(CredentialsDescription)` - Every pattern compiled
    /// * `Err(ConfigError::InvalidPattern)` - A pattern did not compile
    pub fn from_config(
        access: &[AccessCredentialEntry],
        sessions: &[SessionCredentialEntry],
    ) -> Result<Self, ConfigError> {
        let access = access
            .iter()
            .map(|entry| {
                let credential = match entry.kind {
                    AccessCredentialKind::Basic => PageCredential::Basic {
                        username: entry.username.clone(),
                        password: entry.password.clone(),
                    },
                };
                Ok((compile(&entry.url_regex)?, credential))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let sessions = sessions
            .iter()
            .map(|entry| {
                let pages = entry
                    .auth_pages
                    .iter()
                    .map(|page| {
                        Ok(LoginPage {
                            url_pattern: compile(&page.url_regex)?,
                            kind: page.kind,
                            match_pattern: page.match_regex.as_deref().map(compile).transpose()?,
                            override_target: page
                                .override_target_url
                                .clone()
                                .filter(|target| !target.is_empty()),
                            parameters: page
                                .parameters
                                .iter()
                                .map(|p| {
                                    Ok(LoginParameter {
                                        name: compile(&p.name_regex)?,
                                        value: p.value.clone(),
                                    })
                                })
                                .collect::<Result<Vec<_>, ConfigError>>()?,
                        })
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                let sequence = LoginSequence::new(entry.url_regex.clone(), pages);
                Ok((compile(&entry.url_regex)?, Arc::new(sequence)))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { access, sessions })
    }

    /// The page credential for a URL, if exactly one entry matches
    pub fn page_credential(&self, url: &Url) -> Option<&PageCredential> {
        single_match(&self.access, url.as_str(), "access credential")
    }

    /// The login sequence for a URL, if exactly one entry matches
    pub fn login_sequence(&self, url: &Url) -> Option<Arc<LoginSequence>> {
        single_match(&self.sessions, url.as_str(), "session credential").cloned()
    }

    pub fn access_count(&self) -> usize {
        self.access.len()
    }

    pub fn sequence_keys(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(|(_, sequence)| sequence.key())
    }
}

fn single_match<'a, T>(entries: &'a [(Regex, T)], url: &str, what: &str) -> Option<&'a T> {
    let mut matches = entries.iter().filter(|(pattern, _)| pattern.is_match(url));
    let first = matches.next()?;
    if matches.next().is_some() {
        tracing::warn!("More than one {} matches '{}'; using none", what, url);
        return None;
    }
    Some(&first.1)
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))
}
