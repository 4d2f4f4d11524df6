//! Robots.txt handling module
//!
//! This module provides the wildcard path matcher, the robots.txt parser and
//! the cache policy used by the robots gate in the session engine.

pub mod cache;
mod matcher;
mod parser;

pub use cache::CachedRobots;
pub use matcher::{path_matches, PathMatcher, DEFAULT_STEP_BUDGET};
pub use parser::{RobotsParse, RobotsParseStatus, RobotsRecord, RobotsRuleSet};
