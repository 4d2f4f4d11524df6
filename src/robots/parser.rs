//! robots.txt parsing and fetch-permission checks
//!
//! The parser never fails. Malformed lines are logged and skipped, and a body
//! that turns out to be HTML yields an empty (allow-all) rule set.

use crate::robots::matcher::path_matches;
use std::fmt;

/// Outcome of parsing a robots.txt body, reported to the activity log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsParseStatus {
    /// Every line was understood
    Success,
    /// Some lines were malformed and skipped
    Errors,
    /// The body looked like an HTML page; parsing stopped
    Html,
}

impl RobotsParseStatus {
    /// Activity result code for this status
    pub fn as_code(&self) -> &'static str {
        match self {
            RobotsParseStatus::Success => "SUCCESS",
            RobotsParseStatus::Errors => "ERRORS",
            RobotsParseStatus::Html => "HTML",
        }
    }
}

impl fmt::Display for RobotsParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// One `User-agent` group and its rules, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRecord {
    pub agents: Vec<String>,
    pub allows: Vec<String>,
    pub disallows: Vec<String>,
}

impl RobotsRecord {
    /// True if `agent_upper` contains one of this record's agent tokens
    fn matches_agent_substring(&self, agent_upper: &str) -> bool {
        self.agents.iter().any(|agent| {
            let token = agent.trim().to_uppercase();
            !token.is_empty() && agent_upper.contains(&token)
        })
    }

    fn has_wildcard_agent(&self) -> bool {
        self.agents.iter().any(|agent| agent.trim() == "*")
    }

    /// Allow beats Disallow when both apply
    fn is_path_allowed(&self, path: &str) -> bool {
        if self.allows.iter().any(|spec| path_matches(path, spec)) {
            return true;
        }
        !self.disallows.iter().any(|spec| path_matches(path, spec))
    }
}

/// Ordered robots.txt records for one host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRuleSet {
    records: Vec<RobotsRecord>,
}

/// A parsed rule set together with how the parse went
#[derive(Debug, Clone)]
pub struct RobotsParse {
    pub rules: RobotsRuleSet,
    pub status: RobotsParseStatus,
    /// Description of the last problem seen, if any
    pub description: Option<String>,
}

impl RobotsRuleSet {
    /// Rule set with no records; allows everything
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Builds a rule set directly from records
    pub fn from_records(records: Vec<RobotsRecord>) -> Self {
        Self { records }
    }

    /// Returns the parsed records in file order
    pub fn records(&self) -> &[RobotsRecord] {
        &self.records
    }

    /// Parses a robots.txt body
    ///
    /// # Arguments
    ///
    /// * `text` - The raw robots.txt content
    /// * `host` - Host name, used only in log messages
    pub fn parse(text: &str, host: &str) -> RobotsParse {
        let mut records = Vec::new();
        let mut record: Option<RobotsRecord> = None;
        let mut seen_action = false;
        let mut found_errors = false;
        let mut description = None;

        for raw_line in text.lines() {
            let line = match raw_line.find('#') {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            };
            let trimmed = line.trim();

            match split_directive(trimmed) {
                Some((Directive::UserAgent, value)) => {
                    if seen_action {
                        records.extend(record.take());
                        seen_action = false;
                    }
                    record
                        .get_or_insert_with(RobotsRecord::default)
                        .agents
                        .push(value.to_string());
                }
                Some((directive @ (Directive::Allow | Directive::Disallow), value)) => {
                    match record.as_mut() {
                        Some(current) => {
                            // An empty value lets everything through
                            if !value.is_empty() {
                                if directive == Directive::Allow {
                                    current.allows.push(value.to_string());
                                } else {
                                    current.disallows.push(value.to_string());
                                }
                            }
                            seen_action = true;
                        }
                        None => {
                            let problem = format!("{} without User-agent", directive.name());
                            tracing::warn!("Bad robots.txt file format from '{}': {}", host, problem);
                            description = Some(problem);
                            found_errors = true;
                        }
                    }
                }
                Some((Directive::CrawlDelay, _)) => {}
                None => {
                    if trimmed.is_empty() {
                        continue;
                    }
                    let readable = make_readable(line);
                    tracing::warn!("Unknown robots.txt line from '{}': '{}'", host, readable);
                    if line.contains("<html") || line.contains("<HTML") {
                        return RobotsParse {
                            rules: RobotsRuleSet::allow_all(),
                            status: RobotsParseStatus::Html,
                            description: Some("Robots file contained HTML, skipped".to_string()),
                        };
                    }
                    description = Some(format!("Unknown robots.txt line: '{}'", readable));
                    found_errors = true;
                }
            }
        }
        records.extend(record);

        let status = if found_errors {
            RobotsParseStatus::Errors
        } else {
            description = None;
            RobotsParseStatus::Success
        };

        RobotsParse {
            rules: RobotsRuleSet { records },
            status,
            description,
        }
    }

    /// Decides whether `user_agent` may fetch `path`
    ///
    /// The first record naming a token contained in the user agent wins
    /// outright. Failing that, the first `*` record applies. With no
    /// applicable record the fetch is allowed.
    pub fn is_fetch_allowed(&self, user_agent: &str, path: &str) -> bool {
        let agent_upper = user_agent.to_uppercase();
        let record = self
            .records
            .iter()
            .find(|r| r.matches_agent_substring(&agent_upper))
            .or_else(|| self.records.iter().find(|r| r.has_wildcard_agent()));

        match record {
            Some(record) => record.is_path_allowed(path),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    UserAgent,
    Disallow,
    Allow,
    CrawlDelay,
}

impl Directive {
    fn name(&self) -> &'static str {
        match self {
            Directive::UserAgent => "User-agent",
            Directive::Disallow => "Disallow",
            Directive::Allow => "Allow",
            Directive::CrawlDelay => "Crawl-delay",
        }
    }
}

/// Splits a trimmed line into a directive and its value; the colon is optional
fn split_directive(line: &str) -> Option<(Directive, &str)> {
    const DIRECTIVES: [(&str, Directive); 4] = [
        ("user-agent", Directive::UserAgent),
        ("disallow", Directive::Disallow),
        ("allow", Directive::Allow),
        ("crawl-delay", Directive::CrawlDelay),
    ];

    for (prefix, directive) in DIRECTIVES {
        let Some(head) = line.get(..prefix.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(prefix) {
            continue;
        }
        let rest = &line[prefix.len()..];
        let rest = rest.strip_prefix(':').unwrap_or(rest);
        return Some((directive, rest.trim()));
    }
    None
}

/// Renders control characters as `^X` so they survive in log output
fn make_readable(line: &str) -> String {
    line.chars()
        .map(|c| {
            if (c as u32) < 0x20 {
                format!("^{}", char::from(c as u8 + b'@'))
            } else {
                c.to_string()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_file() {
        let parsed = RobotsRuleSet::parse(
            "User-agent: *\nDisallow: /private\nAllow: /private/ok\n",
            "example.com",
        );
        assert_eq!(parsed.status, RobotsParseStatus::Success);
        assert_eq!(parsed.rules.records().len(), 1);
        assert!(parsed.description.is_none());

        let record = &parsed.rules.records()[0];
        assert_eq!(record.agents, vec!["*"]);
        assert_eq!(record.disallows, vec!["/private"]);
        assert_eq!(record.allows, vec!["/private/ok"]);
    }

    #[test]
    fn test_first_matching_record_wins_entirely() {
        let rules = RobotsRuleSet::from_records(vec![
            RobotsRecord {
                agents: vec!["GoogleBot".to_string()],
                allows: vec![],
                disallows: vec!["/priv".to_string()],
            },
            RobotsRecord {
                agents: vec!["*".to_string()],
                allows: vec!["/priv/ok".to_string()],
                disallows: vec![],
            },
        ]);

        assert!(!rules.is_fetch_allowed("GoogleBot/2.0", "/priv/ok"));
        assert!(rules.is_fetch_allowed("OtherBot", "/priv/ok"));
    }

    #[test]
    fn test_allow_beats_disallow_in_same_record() {
        let parsed = RobotsRuleSet::parse(
            "User-agent: *\nDisallow: /priv\nAllow: /priv/ok\n",
            "example.com",
        );
        assert!(parsed.rules.is_fetch_allowed("AnyBot", "/priv/ok/page"));
        assert!(!parsed.rules.is_fetch_allowed("AnyBot", "/priv/secret"));
        assert!(parsed.rules.is_fetch_allowed("AnyBot", "/public"));
    }

    #[test]
    fn test_agent_match_is_case_insensitive_substring() {
        let parsed = RobotsRuleSet::parse(
            "User-agent: sluicebot\nDisallow: /\n\nUser-agent: *\nDisallow:\n",
            "example.com",
        );
        assert!(!parsed.rules.is_fetch_allowed("Mozilla/5.0 (compatible; SluiceBot/1.0)", "/x"));
        assert!(parsed.rules.is_fetch_allowed("OtherBot", "/x"));
    }

    #[test]
    fn test_no_applicable_record_allows() {
        let parsed = RobotsRuleSet::parse("User-agent: badbot\nDisallow: /\n", "example.com");
        assert!(parsed.rules.is_fetch_allowed("GoodBot", "/anything"));
        assert!(RobotsRuleSet::allow_all().is_fetch_allowed("GoodBot", "/anything"));
    }

    #[test]
    fn test_consecutive_agents_share_record() {
        let parsed = RobotsRuleSet::parse(
            "User-agent: a\nUser-agent: b\nDisallow: /x\nUser-agent: c\nDisallow: /y\n",
            "example.com",
        );
        let records = parsed.rules.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].agents, vec!["a", "b"]);
        assert_eq!(records[1].agents, vec!["c"]);
    }

    #[test]
    fn test_directives_without_colon_and_comments() {
        let parsed = RobotsRuleSet::parse(
            "USER-AGENT *   # everyone\ndisallow /tmp # scratch\n",
            "example.com",
        );
        assert_eq!(parsed.status, RobotsParseStatus::Success);
        assert!(!parsed.rules.is_fetch_allowed("bot", "/tmp/file"));
    }

    #[test]
    fn test_empty_disallow_ends_agent_list() {
        let parsed = RobotsRuleSet::parse(
            "User-agent: a\nDisallow:\nUser-agent: b\nDisallow: /\n",
            "example.com",
        );
        let records = parsed.rules.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].disallows.is_empty());
        assert!(parsed.rules.is_fetch_allowed("a", "/page"));
        assert!(!parsed.rules.is_fetch_allowed("b", "/page"));
    }

    #[test]
    fn test_crawl_delay_ignored_without_error() {
        let parsed = RobotsRuleSet::parse(
            "User-agent: *\nCrawl-delay: 10\nDisallow: /a\n",
            "example.com",
        );
        assert_eq!(parsed.status, RobotsParseStatus::Success);
        assert!(!parsed.rules.is_fetch_allowed("bot", "/a"));
    }

    #[test]
    fn test_rule_before_agent_is_error() {
        let parsed = RobotsRuleSet::parse("Disallow: /\nUser-agent: *\nAllow: /\n", "example.com");
        assert_eq!(parsed.status, RobotsParseStatus::Errors);
        assert_eq!(
            parsed.description.as_deref(),
            Some("Disallow without User-agent")
        );
        assert!(parsed.rules.is_fetch_allowed("bot", "/"));
    }

    #[test]
    fn test_unknown_line_is_skipped() {
        let parsed = RobotsRuleSet::parse(
            "User-agent: *\nSitemap: https://example.com/sitemap.xml\nDisallow: /a\n",
            "example.com",
        );
        assert_eq!(parsed.status, RobotsParseStatus::Errors);
        assert!(!parsed.rules.is_fetch_allowed("bot", "/a"));
    }

    #[test]
    fn test_html_body_aborts_to_allow_all() {
        let parsed = RobotsRuleSet::parse(
            "User-agent: *\nDisallow: /\n<html><body>Not found</body></html>\n",
            "example.com",
        );
        assert_eq!(parsed.status, RobotsParseStatus::Html);
        assert!(parsed.rules.records().is_empty());
        assert!(parsed.rules.is_fetch_allowed("bot", "/"));
    }

    #[test]
    fn test_make_readable() {
        assert_eq!(make_readable("a\u{1}b"), "a^Ab");
        assert_eq!(make_readable("plain"), "plain");
    }
}
