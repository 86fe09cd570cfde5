// Cache key derivation.
// SHA-256 over length-prefixed fields so no two field tuples share an encoding.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::error::{LensError, Result};
use crate::model::{Fingerprint, IssueRef};

/// Feed one field into the hasher as `<len>:<bytes>;`.
fn update_field(hasher: &mut Sha256, field: &[u8]) {
    hasher.update(field.len().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(field);
    hasher.update(b";");
}

/// Digest of the user-editable issue content.
///
/// Labels are taken as a sorted set so upstream ordering never changes the hash.
pub fn content_hash(title: &str, body: &str, labels: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, b"title");
    update_field(&mut hasher, title.as_bytes());
    update_field(&mut hasher, b"body");
    update_field(&mut hasher, body.as_bytes());
    update_field(&mut hasher, b"labels");
    update_field(&mut hasher, labels.len().to_string().as_bytes());
    for label in labels {
        update_field(&mut hasher, label.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Derive the cache key for an analysis of `issue` at `content_hash` under `prompt_version`.
pub fn build(issue: &IssueRef, content_hash: &str, prompt_version: &str) -> Result<Fingerprint> {
    if issue.owner.trim().is_empty() || issue.name.trim().is_empty() {
        return Err(LensError::InvalidInput(
            "repository owner and name are required".into(),
        ));
    }

    let mut hasher = Sha256::new();
    // Owner and repo names are case-insensitive on GitHub.
    update_field(&mut hasher, issue.owner.to_ascii_lowercase().as_bytes());
    update_field(&mut hasher, issue.name.to_ascii_lowercase().as_bytes());
    update_field(&mut hasher, issue.number.to_string().as_bytes());
    update_field(&mut hasher, content_hash.as_bytes());
    update_field(&mut hasher, prompt_version.as_bytes());

    Ok(Fingerprint::from_hex(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn issue() -> IssueRef {
        IssueRef::new("acme", "core", 42).unwrap()
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build(&issue(), "h1", "v1").unwrap();
        let b = build(&issue(), "h1", "v1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_every_field_changes_fingerprint() {
        let base = build(&issue(), "h1", "v1").unwrap();
        let other_number = IssueRef::new("acme", "core", 43).unwrap();
        let other_repo = IssueRef::new("acme", "web", 42).unwrap();

        assert_ne!(base, build(&other_number, "h1", "v1").unwrap());
        assert_ne!(base, build(&other_repo, "h1", "v1").unwrap());
        assert_ne!(base, build(&issue(), "h2", "v1").unwrap());
        assert_ne!(base, build(&issue(), "h1", "v2").unwrap());
    }

    #[test]
    fn test_separators_are_unambiguous() {
        // "ab" + "c" must not collide with "a" + "bc".
        let left = IssueRef {
            owner: "ab".into(),
            name: "c".into(),
            number: 1,
        };
        let right = IssueRef {
            owner: "a".into(),
            name: "bc".into(),
            number: 1,
        };
        assert_ne!(
            build(&left, "h", "v").unwrap(),
            build(&right, "h", "v").unwrap()
        );
    }

    #[test]
    fn test_owner_case_is_ignored() {
        let upper = IssueRef::new("Acme", "Core", 42).unwrap();
        assert_eq!(
            build(&upper, "h1", "v1").unwrap(),
            build(&issue(), "h1", "v1").unwrap()
        );
    }

    #[test]
    fn test_rejects_empty_repository() {
        let bad = IssueRef {
            owner: String::new(),
            name: "core".into(),
            number: 1,
        };
        assert!(matches!(
            build(&bad, "h", "v"),
            Err(LensError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_content_hash_detects_edits() {
        let base = content_hash("Crash", "on start", &labels(&["bug"]));
        assert_eq!(base, content_hash("Crash", "on start", &labels(&["bug"])));
        assert_ne!(base, content_hash("Crash!", "on start", &labels(&["bug"])));
        assert_ne!(base, content_hash("Crash", "on start.", &labels(&["bug"])));
        assert_ne!(base, content_hash("Crash", "on start", &labels(&["bug", "p1"])));
        assert_ne!(base, content_hash("Crash", "on start", &labels(&[])));
    }

    #[test]
    fn test_content_hash_field_boundaries() {
        assert_ne!(
            content_hash("ab", "c", &labels(&[])),
            content_hash("a", "bc", &labels(&[]))
        );
        assert_ne!(
            content_hash("t", "", &labels(&["a,b"])),
            content_hash("t", "", &labels(&["a", "b"]))
        );
    }
}
