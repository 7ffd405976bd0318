//! File matching rules used to select savegame files
//!
//! A [`FileMatcher`] is a pure predicate over a path relative to the
//! savegame directory. Paths always use `/` as separator.

use crate::error::{Error, Result};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a matcher interprets its pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    /// Shell glob (`*`, `?`, `[...]`) against the whole relative path
    Glob,
    /// Regular expression searched anywhere in the path
    Regex,
    /// Exact filename, or a directory prefix when the pattern ends with `/`
    Filename,
}

impl MatcherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatcherKind::Glob => "glob",
            MatcherKind::Regex => "regex",
            MatcherKind::Filename => "filename",
        }
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatcherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "glob" => Ok(MatcherKind::Glob),
            "regex" => Ok(MatcherKind::Regex),
            "filename" => Ok(MatcherKind::Filename),
            other => Err(Error::InvalidMatcherKind(other.to_string())),
        }
    }
}

/// Compiled form of a pattern
#[derive(Debug, Clone)]
enum Compiled {
    Glob(Pattern),
    Regex(Regex),
    Filename,
    /// Pattern failed to compile; matches nothing
    Never,
}

/// Serialized representation of a matcher
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatcherConfig {
    #[serde(rename = "type")]
    kind: String,
    pattern: String,
}

/// A single include or ignore rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MatcherConfig", into = "MatcherConfig")]
pub struct FileMatcher {
    kind: MatcherKind,
    pattern: String,
    compiled: Compiled,
}

impl FileMatcher {
    /// Create a matcher from an already validated kind.
    ///
    /// Patterns that do not compile are kept but never match.
    pub fn new(kind: MatcherKind, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let compiled = match kind {
            MatcherKind::Glob => match Pattern::new(&pattern) {
                Ok(p) => Compiled::Glob(p),
                Err(e) => {
                    tracing::warn!("Invalid glob pattern {:?}: {}", pattern, e);
                    Compiled::Never
                }
            },
            MatcherKind::Regex => match Regex::new(&pattern) {
                Ok(re) => Compiled::Regex(re),
                Err(e) => {
                    tracing::warn!("Invalid regex pattern {:?}: {}", pattern, e);
                    Compiled::Never
                }
            },
            MatcherKind::Filename => Compiled::Filename,
        };

        Self {
            kind,
            pattern,
            compiled,
        }
    }

    /// Create a matcher from a kind name such as `"glob"`
    pub fn parse(kind: &str, pattern: impl Into<String>) -> Result<Self> {
        Ok(Self::new(kind.parse()?, pattern))
    }

    pub fn glob(pattern: impl Into<String>) -> Self {
        Self::new(MatcherKind::Glob, pattern)
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::new(MatcherKind::Regex, pattern)
    }

    pub fn filename(pattern: impl Into<String>) -> Self {
        Self::new(MatcherKind::Filename, pattern)
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Test a path relative to the savegame directory
    pub fn matches(&self, rel_path: &str) -> bool {
        match &self.compiled {
            Compiled::Glob(pattern) => pattern.matches(rel_path),
            Compiled::Regex(re) => re.is_match(rel_path),
            Compiled::Filename => {
                if rel_path == self.pattern {
                    return true;
                }
                match self.pattern.strip_suffix('/') {
                    Some(dir) => rel_path == dir || rel_path.starts_with(&self.pattern),
                    None => false,
                }
            }
            Compiled::Never => false,
        }
    }
}

impl PartialEq for FileMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.pattern == other.pattern
    }
}

impl Eq for FileMatcher {}

impl TryFrom<MatcherConfig> for FileMatcher {
    type Error = Error;

    fn try_from(config: MatcherConfig) -> Result<Self> {
        Self::parse(&config.kind, config.pattern)
    }
}

impl From<FileMatcher> for MatcherConfig {
    fn from(matcher: FileMatcher) -> Self {
        MatcherConfig {
            kind: matcher.kind.as_str().to_string(),
            pattern: matcher.pattern,
        }
    }
}

/// Include iff some include rule matches (or there are none) and no ignore rule does
pub fn is_included(rel_path: &str, include: &[FileMatcher], ignore: &[FileMatcher]) -> bool {
    let included = include.is_empty() || include.iter().any(|m| m.matches(rel_path));
    included && !ignore.iter().any(|m| m.matches(rel_path))
}
