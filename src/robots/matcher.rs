//! Wildcard path matching for robots.txt Allow/Disallow rules
//!
//! Rules are prefix matches extended with two metacharacters:
//! - `*` matches zero or more characters (runs of `*` collapse to one)
//! - `$` as the last character anchors the rule to the end of the path
//!
//! robots.txt bodies come from the network, so every match runs against a
//! step budget. A match that exhausts its budget is reported as no match.

/// Default number of comparison steps a single match may take
pub const DEFAULT_STEP_BUDGET: usize = 100_000;

/// Checks whether `path` matches the robots rule `spec` using the default budget
///
/// # Example
///
/// ```
/// use sumi_sluice::robots::path_matches;
///
/// assert!(path_matches("/a/b/c", "/a/*c"));
/// assert!(path_matches("/a/b", "/a/b$"));
/// assert!(!path_matches("/a/bx", "/a/b$"));
/// ```
pub fn path_matches(path: &str, spec: &str) -> bool {
    PathMatcher::new(DEFAULT_STEP_BUDGET).matches(path, spec)
}

/// Backtracking matcher with a hard cap on total work
#[derive(Debug, Clone, Copy)]
pub struct PathMatcher {
    budget: usize,
}

impl PathMatcher {
    /// Creates a matcher that gives up after `budget` comparison steps
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    /// Matches `path` against `spec`
    ///
    /// # Returns
    ///
    /// * `true` - The rule applies to the path
    /// * `false` - The rule does not apply, or the budget ran out
    pub fn matches(&self, path: &str, spec: &str) -> bool {
        let mut remaining = self.budget;
        let result = match_from(path.as_bytes(), 0, spec.as_bytes(), 0, &mut remaining);
        if remaining == 0 && !result {
            tracing::warn!(
                "robots rule '{}' exceeded its match budget against path of length {}",
                spec,
                path.len()
            );
        }
        result
    }
}

fn match_from(
    path: &[u8],
    mut path_index: usize,
    spec: &[u8],
    mut spec_index: usize,
    remaining: &mut usize,
) -> bool {
    loop {
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;

        if spec_index == spec.len() {
            return true;
        }
        let spec_char = spec[spec_index];
        spec_index += 1;

        if spec_char == b'*' {
            while spec_index < spec.len() && spec[spec_index] == b'*' {
                spec_index += 1;
            }
            loop {
                if match_from(path, path_index, spec, spec_index, remaining) {
                    return true;
                }
                if path_index == path.len() || *remaining == 0 {
                    return false;
                }
                path_index += 1;
            }
        }

        if spec_char == b'$' && spec_index == spec.len() {
            return path_index == path.len();
        }

        if path_index == path.len() || path[path_index] != spec_char {
            return false;
        }
        path_index += 1;
    }
}
