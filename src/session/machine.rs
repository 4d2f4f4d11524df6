//! Crawl-session state machine
//!
//! The machine decides what happens after each pass over the current URL of
//! a document: fetch another URL, take the login gate, or finish. It performs
//! no I/O; the engine executes the returned [`Next`] step and reports back.
//!
//! A document starts in `Normal` at its own URL. Finding a login page while
//! `Normal` asks for the sequence's gate; holding it puts the machine in
//! `Login`, where each login page names the next URL to visit. The walk ends
//! when a fetched page is no longer a login page, when no next URL can be
//! found, when a login page cannot be fetched, or when the hop bound is hit.

use crate::fetch::RetryWindow;
use crate::session::login_page::{FormSubmission, LoginTarget};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Normal,
    Login,
}

/// Final verdict for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSignal {
    /// Drop the document
    NoDocument,
    /// Keep the document with an empty version
    NoVersion,
    /// The document was fetched and needs processing
    VersionNeeded,
    /// Try the document again later
    RetryDocument,
}

impl ResultSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSignal::NoDocument => "NO_DOCUMENT",
            ResultSignal::NoVersion => "NO_VERSION",
            ResultSignal::VersionNeeded => "VERSION_NEEDED",
            ResultSignal::RetryDocument => "RETRY_DOCUMENT",
        }
    }
}

impl std::fmt::Display for ResultSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result codes recorded when a login walk ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonEndCode {
    Ok,
    NextLinkNotFound,
    LinkTargetUnsuitable,
    HopLimit,
    Aborted,
}

impl LogonEndCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogonEndCode::Ok => "OK",
            LogonEndCode::NextLinkNotFound => "NEXTLINKNOTFOUND",
            LogonEndCode::LinkTargetUnsuitable => "LINKTARGETUNSUITABLE",
            LogonEndCode::HopLimit => "HOPLIMIT",
            LogonEndCode::Aborted => "ABORTED",
        }
    }
}

/// A URL to fetch, with the form to submit to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHop {
    pub url: Url,
    pub submission: Option<FormSubmission>,
}

impl NextHop {
    pub fn plain(url: Url) -> Self {
        Self { url, submission: None }
    }

    /// The hop a login target leads to; `None` when it names no URL
    pub fn from_target(target: LoginTarget) -> Option<Self> {
        match target {
            LoginTarget::Form(form) => Some(Self {
                url: form.action.clone(),
                submission: Some(form),
            }),
            LoginTarget::Link(url) | LoginTarget::Redirection(url) => Some(Self::plain(url)),
            LoginTarget::Content(url) => url.map(Self::plain),
        }
    }
}

/// How the fetched page relates to the login sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginVerdict {
    NotLoginPage,
    /// A login page, with where it leads (if anywhere)
    LoginPage(Option<NextHop>),
}

/// What one pass over the current URL produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassResult {
    pub signal: ResultSignal,
    pub message: Option<String>,
    /// Process result code to record against the document
    pub activity_code: Option<&'static str>,
    pub retry: Option<RetryWindow>,
    /// Only meaningful when `signal` is `VersionNeeded`
    pub login: LoginVerdict,
}

impl PassResult {
    pub fn fetched(login: LoginVerdict) -> Self {
        Self {
            signal: ResultSignal::VersionNeeded,
            message: None,
            activity_code: None,
            retry: None,
            login,
        }
    }

    pub fn failed(signal: ResultSignal, message: impl Into<String>) -> Self {
        Self {
            signal,
            message: Some(message.into()),
            activity_code: None,
            retry: None,
            login: LoginVerdict::NotLoginPage,
        }
    }

    pub fn with_activity_code(mut self, code: &'static str) -> Self {
        self.activity_code = Some(code);
        self
    }

    pub fn with_retry(mut self, retry: Option<RetryWindow>) -> Self {
        self.retry = retry;
        self
    }
}

/// Login walk bookkeeping the engine must perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogonEvent {
    /// The gate was taken; record the start
    Started,
    /// Release the gate and record the end
    Ended { code: LogonEndCode, message: Option<String> },
}

/// The document's final result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub signal: ResultSignal,
    pub message: Option<String>,
    pub activity_code: Option<&'static str>,
    pub retry: Option<RetryWindow>,
}

/// What the engine does next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Fetch(NextHop),
    /// Try the sequence's gate and report with [`SessionMachine::on_gate`]
    AcquireGate,
    Done(Verdict),
}

/// One step of the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Logon bookkeeping, in order
    pub logon: Vec<LogonEvent>,
    pub next: Next,
}

impl Transition {
    fn to(next: Next) -> Self {
        Self {
            logon: Vec::new(),
            next,
        }
    }

    fn with_logon(mut self, event: LogonEvent) -> Self {
        self.logon.push(event);
        self
    }
}

/// Per-document session state
#[derive(Debug, Clone)]
pub struct SessionMachine {
    document: Url,
    current: Url,
    state: SessionState,
    hops: u32,
    max_hops: u32,
    /// Login page waiting for the gate
    pending: Option<PassResult>,
}

impl SessionMachine {
    /// A machine for `document` allowing at most `max_hops` login hops
    pub fn new(document: Url, max_hops: u32) -> Self {
        Self {
            current: document.clone(),
            document,
            state: SessionState::Normal,
            hops: 0,
            max_hops,
            pending: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn document(&self) -> &Url {
        &self.document
    }

    pub fn current(&self) -> &Url {
        &self.current
    }

    /// Whether the current URL is the document itself
    pub fn at_document(&self) -> bool {
        self.current == self.document
    }

    /// Login hops taken so far
    pub fn hops(&self) -> u32 {
        self.hops
    }

    /// The first step: fetch the document
    pub fn start(&self) -> Next {
        Next::Fetch(NextHop::plain(self.document.clone()))
    }

    /// Advances after a pass over the current URL
    pub fn on_pass(&mut self, pass: PassResult) -> Transition {
        if pass.signal != ResultSignal::VersionNeeded {
            if self.state == SessionState::Login {
                self.state = SessionState::Normal;
                let message = format!(
                    "Page was unsuitable for a login sequence because: {}",
                    pass.message.as_deref().unwrap_or("unknown")
                );
                return self.finish(pass).with_logon(LogonEvent::Ended {
                    code: LogonEndCode::LinkTargetUnsuitable,
                    message: Some(message),
                });
            }
            return self.finish(pass);
        }

        let is_login_page = matches!(pass.login, LoginVerdict::LoginPage(_));
        match (self.state, is_login_page) {
            (SessionState::Normal, true) => {
                self.pending = Some(pass);
                Transition::to(Next::AcquireGate)
            }
            (SessionState::Login, false) => {
                self.state = SessionState::Normal;
                let ended = LogonEvent::Ended {
                    code: LogonEndCode::Ok,
                    message: None,
                };
                if !self.at_document() {
                    self.current = self.document.clone();
                    return Transition::to(self.start()).with_logon(ended);
                }
                self.finish(pass).with_logon(ended)
            }
            (SessionState::Login, true) => self.follow(pass),
            (SessionState::Normal, false) => self.finish(pass),
        }
    }

    /// Advances after trying the login gate
    pub fn on_gate(&mut self, acquired: bool) -> Transition {
        let Some(pass) = self.pending.take() else {
            return self.finish(PassResult::failed(
                ResultSignal::RetryDocument,
                "no login page awaiting the gate",
            ));
        };

        if !acquired {
            return self.finish(PassResult::failed(
                ResultSignal::RetryDocument,
                "login sequence already in progress",
            ));
        }

        self.state = SessionState::Login;
        let mut transition = self.follow(pass);
        transition.logon.insert(0, LogonEvent::Started);
        transition
    }

    /// Moves on from a login page while in `Login`
    ///
    /// Every call counts as a hop, including a return to the document when the
    /// page leads nowhere, so a document that keeps presenting a dead-end login
    /// page still ends at the hop bound.
    fn follow(&mut self, pass: PassResult) -> Transition {
        let LoginVerdict::LoginPage(next) = pass.login else {
            return self.finish(pass);
        };

        self.hops += 1;
        if self.hops > self.max_hops {
            self.state = SessionState::Normal;
            let message = format!("login sequence exceeded {} hops", self.max_hops);
            if let Some(hop) = next {
                self.current = hop.url;
            }
            let transition = self.finish(PassResult::failed(ResultSignal::RetryDocument, message.clone()));
            return transition.with_logon(LogonEvent::Ended {
                code: LogonEndCode::HopLimit,
                message: Some(message),
            });
        }

        let Some(hop) = next else {
            self.state = SessionState::Normal;
            self.current = self.document.clone();
            return Transition::to(self.start()).with_logon(LogonEvent::Ended {
                code: LogonEndCode::NextLinkNotFound,
                message: Some("Could not find a usable link to the next page".to_string()),
            });
        };

        self.current = hop.url.clone();
        Transition::to(Next::Fetch(hop))
    }

    /// Ends the walk, charging login-sequence failures to the document
    fn finish(&mut self, pass: PassResult) -> Transition {
        let mut verdict = Verdict {
            signal: pass.signal,
            message: pass.message,
            activity_code: pass.activity_code,
            retry: pass.retry,
        };

        if !self.at_document() {
            verdict.activity_code = None;
            verdict.message = verdict
                .message
                .map(|message| format!("for login sequence url '{}': {}", self.current, message));
            if verdict.signal != ResultSignal::VersionNeeded {
                verdict.signal = ResultSignal::RetryDocument;
            }
        }

        Transition::to(Next::Done(verdict))
    }
}
