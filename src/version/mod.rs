//! Version handling for registry tags and dependency constraints.
//!
//! - [`constraint`] - Constraint parsing and matching
//! - [`parse_tag`] - Lenient parsing of registry tags as semantic versions
//! - [`select_highest`] - Pick the highest tag satisfying a constraint
//!
//! Registry tags are often written `v1.2.3` or as partial versions (`1.2`).
//! Both are accepted; the tag's original spelling is kept so the chosen tag
//! can be pulled back from the registry verbatim.

pub mod constraint;

pub use constraint::Constraint;

use semver::Version;

/// A registry tag that parses as a semantic version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagVersion {
    pub version: Version,
    /// The tag exactly as listed by the registry.
    pub original: String,
}

/// Parse a tag as a semantic version, coercing `v` prefixes and partial versions.
///
/// Returns `None` for tags that are not versions (`latest`, `main`, digests).
pub fn parse_tag(tag: &str) -> Option<TagVersion> {
    let cleaned = tag.trim().trim_start_matches(['v', 'V']);

    // Split off pre-release/build so the numeric core can be padded.
    let core_end = cleaned.find(['-', '+']).unwrap_or(cleaned.len());
    let (core, suffix) = cleaned.split_at(core_end);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty()
        || parts.len() > 3
        || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    Version::parse(&padded).ok().map(|version| TagVersion {
        version,
        original: tag.to_string(),
    })
}

/// Parse every tag, discarding non-versions, and return the highest one
/// satisfying `constraint`.
pub fn select_highest<'a>(
    constraint: &Constraint,
    tags: impl IntoIterator<Item = &'a str>,
) -> Option<TagVersion> {
    let mut versions: Vec<TagVersion> = tags.into_iter().filter_map(parse_tag).collect();
    versions.sort_by(|a, b| a.version.cmp(&b.version));
    versions.into_iter().rev().find(|v| constraint.matches(&v.version))
}
