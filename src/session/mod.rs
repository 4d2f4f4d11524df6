//! Crawl-session login handling and the document fetch driver
//!
//! This module provides:
//! - Credential and login-sequence descriptions compiled from configuration
//! - Login page detection (forms, links, redirections, content)
//! - The per-document session state machine
//! - The engine tying DNS, robots, throttled fetches and login walks together

pub mod cookies;
pub mod credentials;
mod engine;
pub mod gates;
pub mod login_page;
pub mod machine;

pub use cookies::SessionCookies;
pub use credentials::{CredentialsDescription, LoginPage, LoginParameter, LoginSequence, PageCredential};
pub use engine::{
    dns_ttl, FetchOutcome, FetchedDocument, SessionEngine, VersionInputs, CODE_MALFORMED_URL,
    CODE_NO_ADDRESS, CODE_ROBOTS, CODE_UNSUPPORTED_SCHEME,
};
pub use gates::EventGuard;
pub use login_page::{FormSubmission, LoginEvaluation, LoginTarget, PageView};
pub use machine::{LogonEndCode, ResultSignal, SessionMachine, SessionState};
