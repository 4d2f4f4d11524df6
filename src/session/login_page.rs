//! Login page detection
//!
//! A fetched page is a login page when one of its sequence's page descriptors
//! finds what it describes on it: a named form, a link, a redirection, or a
//! piece of content. The detected thing also yields the next URL to visit.

use crate::config::AuthPageKind;
use crate::session::credentials::{LoginParameter, LoginSequence};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// What the detector looks at
#[derive(Debug, Clone, Copy)]
pub struct PageView<'a> {
    pub url: &'a Url,
    pub status: u16,
    /// `Location` header, if any
    pub location: Option<&'a str>,
    pub body: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMethod {
    Get,
    Post,
}

/// How overrides treat a form field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    /// Text-like fields; an override replaces the value
    FreeForm,
    /// Radio buttons and single selects; one value of the family is enabled
    Exclusive,
    /// Checkboxes and multiple selects; any subset of values is enabled
    Inclusive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: String,
    pub category: FieldCategory,
    pub enabled: bool,
}

/// A form ready to submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    pub action: Url,
    pub method: SubmitMethod,
    fields: Vec<FormField>,
}

impl FormSubmission {
    pub fn new(action: Url, method: SubmitMethod, fields: Vec<FormField>) -> Self {
        Self {
            action,
            method,
            fields,
        }
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    /// Applies parameter overrides in order
    ///
    /// Each parameter applies to every field whose name its regex finds.
    /// Free-form fields take the value. Exclusive families enable only the
    /// field carrying the value. Inclusive families are cleared once per
    /// family, then the field carrying the value is enabled.
    pub fn apply_overrides(&mut self, parameters: &[LoginParameter]) {
        let mut cleared: HashSet<String> = HashSet::new();

        for parameter in parameters {
            for index in 0..self.fields.len() {
                if !parameter.name.is_match(&self.fields[index].name) {
                    continue;
                }
                match self.fields[index].category {
                    FieldCategory::FreeForm => self.fields[index].value = parameter.value.clone(),
                    FieldCategory::Exclusive => {
                        let field = &mut self.fields[index];
                        field.enabled = field.value == parameter.value;
                    }
                    FieldCategory::Inclusive => {
                        let name = self.fields[index].name.clone();
                        if cleared.insert(name.clone()) {
                            for field in self.fields.iter_mut().filter(|f| f.name == name) {
                                field.enabled = false;
                            }
                        }
                        if self.fields[index].value == parameter.value {
                            self.fields[index].enabled = true;
                        }
                    }
                }
            }
        }
    }

    /// Name/value pairs of the enabled fields, in document order
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter(|f| f.enabled)
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect()
    }
}

/// The way out of a login page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginTarget {
    Form(FormSubmission),
    Link(Url),
    Redirection(Url),
    /// Content matched; the target is the override URL, if configured
    Content(Option<Url>),
}

impl LoginTarget {
    pub fn kind(&self) -> AuthPageKind {
        match self {
            LoginTarget::Form(_) => AuthPageKind::Form,
            LoginTarget::Link(_) => AuthPageKind::Link,
            LoginTarget::Redirection(_) => AuthPageKind::Redirection,
            LoginTarget::Content(_) => AuthPageKind::Content,
        }
    }
}

/// Result of evaluating a page against a login sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginEvaluation {
    /// Highest-precedence unambiguous match
    pub target: Option<LoginTarget>,
    /// Kind that matched more than once, disqualifying itself and every lower kind
    pub ambiguous: Option<AuthPageKind>,
    /// Number of descriptors whose URL pattern applied
    pub descriptors: usize,
}

impl LoginEvaluation {
    pub fn is_login_page(&self) -> bool {
        self.target.is_some()
    }
}

/// Evaluates a fetched page against every applicable page descriptor
///
/// Precedence is form, then link, then redirection, then content. A kind
/// found by more than one descriptor is ambiguous: it is logged and it and
/// every lower kind count as no match.
///
/// # Arguments
///
/// * `sequence` - The login sequence the document belongs to
/// * `page` - The fetched page
///
/// # Returns
///
/// The evaluation; `is_login_page()` tells whether the page is part of the sequence
pub fn evaluate(sequence: &LoginSequence, page: &PageView<'_>) -> LoginEvaluation {
    let url = page.url.as_str();
    let descriptors: Vec<_> = sequence.pages_for(url).collect();
    if descriptors.is_empty() {
        return LoginEvaluation::default();
    }

    let document = Html::parse_document(page.body);
    let mut forms = Vec::new();
    let mut links = Vec::new();
    let mut redirections = Vec::new();
    let mut contents = Vec::new();

    for descriptor in &descriptors {
        let pattern = descriptor.match_pattern.as_ref();
        let override_target = descriptor
            .override_target
            .as_deref()
            .and_then(|target| resolve(page.url, target));

        match descriptor.kind {
            AuthPageKind::Form => {
                if let Some(mut form) = find_form(&document, page.url, pattern) {
                    form.apply_overrides(&descriptor.parameters);
                    forms.push(form);
                }
            }
            AuthPageKind::Link => {
                if let Some(link) = find_link(&document, page.url, pattern) {
                    links.push(override_target.unwrap_or(link));
                }
            }
            AuthPageKind::Redirection => {
                if let Some(target) = find_redirection(page, pattern) {
                    redirections.push(override_target.unwrap_or(target));
                }
            }
            AuthPageKind::Content => {
                if pattern.map_or(false, |p| p.is_match(page.body)) {
                    contents.push(override_target);
                }
            }
        }
    }

    let (target, ambiguous) = choose(forms, links, redirections, contents);
    match (&target, ambiguous) {
        (_, Some(kind)) => tracing::warn!(
            "Document '{}' matches more than one {} descriptor for sequence '{}'; treating as no match",
            url,
            kind.as_str(),
            sequence.key()
        ),
        (Some(target), None) => tracing::debug!(
            "Document '{}' matches {}, so determined to be login page for sequence '{}'",
            url,
            target.kind().as_str(),
            sequence.key()
        ),
        (None, None) => tracing::debug!(
            "Document '{}' did not match expected form, link, redirection, or content for sequence '{}'",
            url,
            sequence.key()
        ),
    }

    LoginEvaluation {
        target,
        ambiguous,
        descriptors: descriptors.len(),
    }
}

fn choose(
    forms: Vec<FormSubmission>,
    links: Vec<Url>,
    redirections: Vec<Url>,
    contents: Vec<Option<Url>>,
) -> (Option<LoginTarget>, Option<AuthPageKind>) {
    match single(forms) {
        Found::One(form) => return (Some(LoginTarget::Form(form)), None),
        Found::Many => return (None, Some(AuthPageKind::Form)),
        Found::None => {}
    }
    match single(links) {
        Found::One(link) => return (Some(LoginTarget::Link(link)), None),
        Found::Many => return (None, Some(AuthPageKind::Link)),
        Found::None => {}
    }
    match single(redirections) {
        Found::One(target) => return (Some(LoginTarget::Redirection(target)), None),
        Found::Many => return (None, Some(AuthPageKind::Redirection)),
        Found::None => {}
    }
    match single(contents) {
        Found::One(target) => (Some(LoginTarget::Content(target)), None),
        Found::Many => (None, Some(AuthPageKind::Content)),
        Found::None => (None, None),
    }
}

enum Found<T> {
    None,
    One(T),
    Many,
}

fn single<T>(mut found: Vec<T>) -> Found<T> {
    match found.len() {
        0 => Found::None,
        1 => found.pop().map_or(Found::None, Found::One),
        _ => Found::Many,
    }
}

/// Finds the first form whose name (empty when absent) matches
pub fn find_form(document: &Html, page_url: &Url, name_pattern: Option<&Regex>) -> Option<FormSubmission> {
    let form_selector = Selector::parse("form").ok()?;

    for form in document.select(&form_selector) {
        let name = form.value().attr("name").unwrap_or("");
        if !name_pattern.map_or(true, |p| p.is_match(name)) {
            continue;
        }

        let action = match form.value().attr("action").map(str::trim).filter(|a| !a.is_empty()) {
            Some(action) => match page_url.join(action) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!("Form '{}' on '{}' has unusable action '{}': {}", name, page_url, action, e);
                    continue;
                }
            },
            None => page_url.clone(),
        };

        let method = match form.value().attr("method") {
            Some(m) if m.eq_ignore_ascii_case("post") => SubmitMethod::Post,
            _ => SubmitMethod::Get,
        };

        return Some(FormSubmission::new(action, method, collect_fields(form)?));
    }

    None
}

fn collect_fields(form: ElementRef<'_>) -> Option<Vec<FormField>> {
    let control_selector = Selector::parse("input, select, textarea").ok()?;
    let option_selector = Selector::parse("option").ok()?;
    let mut fields = Vec::new();

    for control in form.select(&control_selector) {
        let element = control.value();
        let Some(name) = element.attr("name") else {
            continue;
        };

        match element.name() {
            "input" => {
                let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
                let value = element.attr("value");
                let checked = element.attr("checked").is_some();
                let field = match kind.as_str() {
                    "submit" => free_form(name, value.unwrap_or("Submit Form")),
                    "text" | "password" | "hidden" | "email" => free_form(name, value.unwrap_or("")),
                    "radio" => FormField {
                        name: name.to_string(),
                        value: value.unwrap_or("").to_string(),
                        category: FieldCategory::Exclusive,
                        enabled: checked,
                    },
                    "checkbox" => FormField {
                        name: name.to_string(),
                        value: value.unwrap_or("on").to_string(),
                        category: FieldCategory::Inclusive,
                        enabled: checked,
                    },
                    _ => continue,
                };
                fields.push(field);
            }
            "select" => {
                let category = if element.attr("multiple").is_some() {
                    FieldCategory::Inclusive
                } else {
                    FieldCategory::Exclusive
                };
                let start = fields.len();
                for option in control.select(&option_selector) {
                    let value = option
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| option.text().collect::<String>().trim().to_string());
                    fields.push(FormField {
                        name: name.to_string(),
                        value,
                        category,
                        enabled: option.value().attr("selected").is_some(),
                    });
                }
                // A single select with nothing selected submits its first option.
                if category == FieldCategory::Exclusive && !fields[start..].iter().any(|f| f.enabled) {
                    if let Some(first) = fields.get_mut(start) {
                        first.enabled = true;
                    }
                }
            }
            "textarea" => fields.push(free_form(name, &control.text().collect::<String>())),
            _ => {}
        }
    }

    Some(fields)
}

fn free_form(name: &str, value: &str) -> FormField {
    FormField {
        name: name.to_string(),
        value: value.to_string(),
        category: FieldCategory::FreeForm,
        enabled: true,
    }
}

/// Finds the first `<a href>`, `<link href>` or `<frame src>` with a matching absolute http(s) URL
pub fn find_link(document: &Html, page_url: &Url, pattern: Option<&Regex>) -> Option<Url> {
    let selector = Selector::parse("a[href], link[href], frame[src]").ok()?;

    document
        .select(&selector)
        .filter_map(|element| {
            let raw = element.value().attr("href").or_else(|| element.value().attr("src"))?;
            resolve(page_url, raw)
        })
        .find(|url| pattern.map_or(true, |p| p.is_match(url.as_str())))
}

/// The redirection target of a 301/302 response, if it matches
pub fn find_redirection(page: &PageView<'_>, pattern: Option<&Regex>) -> Option<Url> {
    if !matches!(page.status, 301 | 302) {
        return None;
    }
    let target = resolve(page.url, page.location?)?;
    pattern.map_or(true, |p| p.is_match(target.as_str())).then_some(target)
}

/// Resolves a raw reference against a page URL, keeping only http(s) results
fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let url = base.join(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::credentials::LoginPage;

    const LOGIN_HTML: &str = r#"
        <html><body>
          <form name="search" action="/search"><input type="text" name="q"></form>
          <form name="login" action="/login/submit" method="POST">
            <input type="hidden" name="token" value="abc">
            <input type="text" name="user">
            <input type="password" name="pass">
            <input type="radio" name="mode" value="fast" checked>
            <input type="radio" name="mode" value="safe">
            <input type="checkbox" name="opt" value="a" checked>
            <input type="checkbox" name="opt" value="b" checked>
            <select name="lang"><option value="en">English</option><option value="fr">French</option></select>
            <textarea name="note">hi</textarea>
            <input type="submit" name="go">
          </form>
          <a href="mailto:admin@example.com">mail</a>
          <a href="/help">help</a>
          <a href="/session/start?x=1">start</a>
        </body></html>
    "#;

    fn page_url() -> Url {
        Url::parse("http://portal.test/login").unwrap()
    }

    fn descriptor(kind: AuthPageKind, pattern: Option<&str>) -> LoginPage {
        LoginPage {
            url_pattern: Regex::new("/login").unwrap(),
            kind,
            match_pattern: pattern.map(|p| Regex::new(p).unwrap()),
            override_target: None,
            parameters: Vec::new(),
        }
    }

    fn parameter(name: &str, value: &str) -> LoginParameter {
        LoginParameter {
            name: Regex::new(name).unwrap(),
            value: value.to_string(),
        }
    }

    fn view<'a>(url: &'a Url, body: &'a str) -> PageView<'a> {
        PageView {
            url,
            status: 200,
            location: None,
            body,
        }
    }

    #[test]
    fn test_find_named_form() {
        let url = page_url();
        let document = Html::parse_document(LOGIN_HTML);
        let form = find_form(&document, &url, Some(&Regex::new("^login$").unwrap())).unwrap();

        assert_eq!(form.action.as_str(), "http://portal.test/login/submit");
        assert_eq!(form.method, SubmitMethod::Post);
        assert_eq!(
            form.pairs(),
            vec![
                ("token".to_string(), "abc".to_string()),
                ("user".to_string(), String::new()),
                ("pass".to_string(), String::new()),
                ("mode".to_string(), "fast".to_string()),
                ("opt".to_string(), "a".to_string()),
                ("opt".to_string(), "b".to_string()),
                ("lang".to_string(), "en".to_string()),
                ("note".to_string(), "hi".to_string()),
                ("go".to_string(), "Submit Form".to_string()),
            ]
        );
    }

    #[test]
    fn test_unnamed_pattern_takes_first_form() {
        let url = page_url();
        let document = Html::parse_document(LOGIN_HTML);
        let form = find_form(&document, &url, None).unwrap();
        assert_eq!(form.action.path(), "/search");
        assert_eq!(form.method, SubmitMethod::Get);
    }

    #[test]
    fn test_overrides_by_category() {
        let url = page_url();
        let document = Html::parse_document(LOGIN_HTML);
        let mut form = find_form(&document, &url, Some(&Regex::new("login").unwrap())).unwrap();

        form.apply_overrides(&[
            parameter("^user$", "crawler"),
            parameter("^pass$", "secret"),
            parameter("^mode$", "safe"),
            parameter("^opt$", "b"),
            parameter("^lang$", "fr"),
        ]);

        let pairs = form.pairs();
        assert!(pairs.contains(&("user".to_string(), "crawler".to_string())));
        assert!(pairs.contains(&("pass".to_string(), "secret".to_string())));
        assert!(pairs.contains(&("mode".to_string(), "safe".to_string())));
        assert!(!pairs.contains(&("mode".to_string(), "fast".to_string())));
        // The checkbox family is cleared once, then only "b" is enabled.
        assert!(pairs.contains(&("opt".to_string(), "b".to_string())));
        assert!(!pairs.contains(&("opt".to_string(), "a".to_string())));
        assert!(pairs.contains(&("lang".to_string(), "fr".to_string())));
        assert!(!pairs.contains(&("lang".to_string(), "en".to_string())));
    }

    #[test]
    fn test_inclusive_family_accumulates() {
        let url = page_url();
        let document = Html::parse_document(LOGIN_HTML);
        let mut form = find_form(&document, &url, Some(&Regex::new("login").unwrap())).unwrap();

        form.apply_overrides(&[parameter("^opt$", "a"), parameter("^opt$", "b")]);
        let opts: Vec<_> = form.pairs().into_iter().filter(|(n, _)| n == "opt").collect();
        assert_eq!(opts.len(), 2);
    }

    #[test]
    fn test_find_link_skips_non_http() {
        let url = page_url();
        let document = Html::parse_document(LOGIN_HTML);

        let first = find_link(&document, &url, None).unwrap();
        assert_eq!(first.as_str(), "http://portal.test/help");

        let preferred = find_link(&document, &url, Some(&Regex::new("session").unwrap())).unwrap();
        assert_eq!(preferred.as_str(), "http://portal.test/session/start?x=1");

        assert!(find_link(&document, &url, Some(&Regex::new("nowhere").unwrap())).is_none());
    }

    #[test]
    fn test_find_redirection() {
        let url = Url::parse("http://portal.test/login/submit").unwrap();
        let mut page = PageView {
            url: &url,
            status: 302,
            location: Some("/app/landing"),
            body: "",
        };
        let pattern = Regex::new("/app/").unwrap();
        assert_eq!(
            find_redirection(&page, Some(&pattern)).unwrap().as_str(),
            "http://portal.test/app/landing"
        );

        page.status = 200;
        assert!(find_redirection(&page, Some(&pattern)).is_none());
    }

    #[test]
    fn test_form_outranks_link() {
        let url = page_url();
        let sequence = LoginSequence::new(
            "portal",
            vec![
                descriptor(AuthPageKind::Link, Some("session")),
                descriptor(AuthPageKind::Form, Some("^login$")),
            ],
        );

        let evaluation = evaluate(&sequence, &view(&url, LOGIN_HTML));
        assert!(evaluation.is_login_page());
        assert_eq!(evaluation.descriptors, 2);
        assert!(matches!(evaluation.target, Some(LoginTarget::Form(_))));
    }

    #[test]
    fn test_duplicate_kind_blocks_lower_kinds() {
        let url = page_url();
        let sequence = LoginSequence::new(
            "portal",
            vec![
                descriptor(AuthPageKind::Form, Some("login")),
                descriptor(AuthPageKind::Form, Some("^log")),
                descriptor(AuthPageKind::Link, Some("session")),
            ],
        );

        let evaluation = evaluate(&sequence, &view(&url, LOGIN_HTML));
        assert!(!evaluation.is_login_page());
        assert_eq!(evaluation.ambiguous, Some(AuthPageKind::Form));
    }

    #[test]
    fn test_content_match_uses_override() {
        let url = page_url();
        let mut with_override = descriptor(AuthPageKind::Content, Some("Please sign in"));
        with_override.override_target = Some("/sso".to_string());
        let sequence = LoginSequence::new("portal", vec![with_override]);

        let evaluation = evaluate(&sequence, &view(&url, "<p>Please sign in</p>"));
        assert_eq!(
            evaluation.target,
            Some(LoginTarget::Content(Some(Url::parse("http://portal.test/sso").unwrap())))
        );

        let evaluation = evaluate(&sequence, &view(&url, "<p>Welcome back</p>"));
        assert!(!evaluation.is_login_page());
    }

    #[test]
    fn test_page_outside_sequence() {
        let url = Url::parse("http://portal.test/home").unwrap();
        let sequence = LoginSequence::new("portal", vec![descriptor(AuthPageKind::Form, None)]);
        let evaluation = evaluate(&sequence, &view(&url, LOGIN_HTML));
        assert_eq!(evaluation, LoginEvaluation::default());
    }
}
