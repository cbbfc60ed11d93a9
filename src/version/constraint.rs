//! Semantic version constraints as written in package dependencies.
//!
//! The accepted grammar is the one package authors already use:
//!
//! - comparators `=`, `!=`, `>`, `>=`, `<`, `<=`
//! - tilde `~1.2.3` (or `~>1.2.3`) and caret `^1.2.3`, both allowing patch
//!   updates only: `>=1.2.3 <1.3.0`
//! - bare versions mean exactly that version (`1.2.3`, partial `1.2` allows any patch)
//! - wildcards `*`, `x`, `1.x`, `1.2.*`
//! - hyphen ranges `1.0 - 2.0` (inclusive on both ends)
//! - comparators separated by whitespace or commas are ANDed
//! - `||` separates alternatives
//! - a leading `v` on a version is ignored (`>=v1.0.0`)
//!
//! Pre-release versions only match when an alternative mentions a pre-release.

use regex::Regex;
use semver::{Comparator, Version};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::core::PkgError;

static HYPHEN_RANGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(\S+)\s+-\s+(\S+)\s*$").ok());

const OPERATORS: [&str; 9] = ["!=", ">=", "<=", "~>", "=", ">", "<", "^", "~"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Matches(Comparator),
    Excludes(Comparator),
}

impl Term {
    fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Matches(c) => c.matches(version),
            Self::Excludes(c) => !c.matches(version),
        }
    }

    fn has_prerelease(&self) -> bool {
        match self {
            Self::Matches(c) | Self::Excludes(c) => !c.pre.is_empty(),
        }
    }
}

/// A parsed constraint such as `>=1.0.0 <2.0.0 || ^3.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    original: String,
    alternatives: Vec<Vec<Term>>,
}

impl Constraint {
    pub fn parse(constraint: &str) -> Result<Self, PkgError> {
        let invalid = |reason: String| PkgError::InvalidConstraint {
            constraint: constraint.to_string(),
            reason,
        };

        if constraint.trim().is_empty() {
            return Err(invalid("constraint is empty".to_string()));
        }

        let mut alternatives = Vec::new();
        for alternative in constraint.split("||") {
            if alternative.trim().is_empty() {
                return Err(invalid("empty alternative around '||'".to_string()));
            }

            let mut terms = Vec::new();
            for comparator in split_comparators(alternative).map_err(invalid)? {
                if let Some(term) = parse_term(&comparator).map_err(invalid)? {
                    terms.push(term);
                }
            }
            alternatives.push(terms);
        }

        Ok(Self {
            original: constraint.to_string(),
            alternatives,
        })
    }

    /// Whether `version` satisfies any alternative.
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|terms| {
            if !version.pre.is_empty() && !terms.iter().any(Term::has_prerelease) {
                return false;
            }
            terms.iter().all(|t| t.matches(version))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl FromStr for Constraint {
    type Err = PkgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// Split one alternative into comparator strings, expanding hyphen ranges and
/// joining operators written apart from their version (`>= 1.0`).
fn split_comparators(alternative: &str) -> Result<Vec<String>, String> {
    if let Some(re) = HYPHEN_RANGE.as_ref()
        && let Some(caps) = re.captures(alternative)
    {
        return Ok(vec![format!(">={}", &caps[1]), format!("<={}", &caps[2])]);
    }

    let mut comparators = Vec::new();
    let mut pending_op: Option<String> = None;
    for token in alternative.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        if OPERATORS.contains(&token) {
            if pending_op.is_some() {
                return Err(format!("operator '{token}' follows another operator"));
            }
            pending_op = Some(token.to_string());
            continue;
        }
        match pending_op.take() {
            Some(op) => comparators.push(format!("{op}{token}")),
            None => comparators.push(token.to_string()),
        }
    }

    if let Some(op) = pending_op {
        return Err(format!("operator '{op}' has no version"));
    }
    Ok(comparators)
}

/// Parse a single comparator. Returns `None` for a match-anything wildcard.
fn parse_term(comparator: &str) -> Result<Option<Term>, String> {
    let op = OPERATORS.iter().find(|op| comparator.starts_with(*op)).copied().unwrap_or("");
    let version = comparator[op.len()..].trim();
    let version = version.strip_prefix(['v', 'V']).unwrap_or(version);

    if version.is_empty() {
        return Err(format!("'{comparator}' has no version"));
    }
    if matches!(version, "*" | "x" | "X") && matches!(op, "" | "=" | ">=") {
        return Ok(None);
    }

    let (negate, op) = match op {
        "!=" => (true, "="),
        "~>" | "^" => (false, "~"),
        "" => (false, "="),
        other => (false, other),
    };

    let parsed = Comparator::from_str(&format!("{op}{version}"))
        .map_err(|e| format!("'{comparator}': {e}"))?;
    Ok(Some(if negate {
        Term::Excludes(parsed)
    } else {
        Term::Matches(parsed)
    }))
}
