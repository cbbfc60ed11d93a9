//! Deterministic record names derived from package names and image references.

use sha2::{Digest, Sha256};

const MAX_NAME_PREFIX: usize = 50;
const MAX_HASH_PREFIX: usize = 12;
const MAX_LABEL_INDEX: usize = 62;

/// Turn an arbitrary string into a DNS-1123 label.
///
/// Lowercase letters and digits are kept, `.` `/` `:` `-` become `-`
/// (except at the first, the 63rd and the last position), everything else is
/// dropped. At most 63 input bytes are considered and the result never starts
/// or ends with `-`.
pub fn to_dns_label(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut cut = String::with_capacity(bytes.len().min(MAX_LABEL_INDEX + 1));

    for (i, &b) in bytes.iter().enumerate() {
        if b.is_ascii_lowercase() || b.is_ascii_digit() {
            cut.push(b as char);
        }
        if matches!(b, b'.' | b'/' | b':' | b'-')
            && i != 0
            && i != MAX_LABEL_INDEX
            && i != bytes.len() - 1
        {
            cut.push('-');
        }
        if i == MAX_LABEL_INDEX {
            break;
        }
    }

    cut.trim_matches('-').to_string()
}

/// Friendly, content-addressed revision name: `<name[..50]>-<hash[..12]>` as a DNS label.
pub fn friendly_id(name: &str, hash: &str) -> String {
    to_dns_label(&format!("{}-{}", truncate(name, MAX_NAME_PREFIX), truncate(hash, MAX_HASH_PREFIX)))
}

/// Hex SHA-256 of `value`, used where no registry digest is available.
pub fn stable_hash(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_dns_label_repository_path() {
        assert_eq!(to_dns_label("org/provider-srl"), "org-provider-srl");
        assert_eq!(to_dns_label("yndd/ndd-provider"), "yndd-ndd-provider");
    }

    #[test]
    fn test_to_dns_label_drops_invalid_characters() {
        assert_eq!(to_dns_label("Reg.IO/Org_x:v1"), "eg--rgx-v1");
        assert_eq!(to_dns_label("/leading"), "leading");
        assert_eq!(to_dns_label("trailing/"), "trailing");
        assert_eq!(to_dns_label("a--b"), "a--b");
    }

    #[test]
    fn test_to_dns_label_truncates() {
        let long = "a".repeat(100);
        assert_eq!(to_dns_label(&long).len(), 63);

        let mut dashed = "b".repeat(62);
        dashed.push_str("/cccc");
        let label = to_dns_label(&dashed);
        assert_eq!(label, "b".repeat(62));
    }

    #[test]
    fn test_friendly_id() {
        assert_eq!(
            friendly_id("provider-srl", "0123456789abcdef0123"),
            "provider-srl-0123456789ab"
        );

        let name = "n".repeat(70);
        let id = friendly_id(&name, "abcdef");
        assert_eq!(id, format!("{}-abcdef", "n".repeat(50)));
    }

    #[test]
    fn test_stable_hash_is_deterministic() {
        assert_eq!(stable_hash("reg.io/org/prov:v1"), stable_hash("reg.io/org/prov:v1"));
        assert_ne!(stable_hash("reg.io/org/prov:v1"), stable_hash("reg.io/org/prov:v2"));
        assert_eq!(stable_hash("").len(), 64);
    }
}
