//! Deterministic, collision-resistant derived names for objects owned by a
//! build request (workspace PVCs, manifest `ConfigMap`s, upload/artifact
//! pods, auth secrets).
//!
//! `derived_name` is a pure function: equal inputs always produce equal
//! outputs, the result never exceeds [`crate::constants::MAX_DERIVED_NAME_LEN`]
//! characters, and distinct `base` values produce distinct outputs whenever
//! the base alone would have overflowed the limit.

use sha2::{Digest, Sha256};

use crate::constants::{DERIVED_NAME_HASH_PREFIX_LEN, MAX_DERIVED_NAME_LEN};

/// Build `<base>-<suffix>`, truncating `base` and appending an 8-char hex
/// prefix of `sha256(base + suffix)` whenever the naive concatenation would
/// exceed the Kubernetes 63-character subdomain limit.
#[must_use]
pub fn derived_name(base: &str, suffix: &str) -> String {
    let naive = format!("{base}-{suffix}");
    if naive.len() <= MAX_DERIVED_NAME_LEN {
        return naive;
    }

    let hash = hash_prefix(base, suffix);
    // Reserve room for "-<suffix>-<hash>".
    let reserved = 1 + suffix.len() + 1 + hash.len();
    let max_base_len = MAX_DERIVED_NAME_LEN.saturating_sub(reserved);
    let truncated_base = truncate_chars(base, max_base_len);

    format!("{truncated_base}-{suffix}-{hash}")
}

fn hash_prefix(base: &str, suffix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    hasher.update(b"/");
    hasher.update(suffix.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..DERIVED_NAME_HASH_PREFIX_LEN / 2])
}

/// Truncate on a char boundary, never splitting a UTF-8 sequence.
fn truncate_chars(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn short_names_pass_through() {
        assert_eq!(derived_name("t1", "workspace"), "t1-workspace");
    }

    #[test]
    fn pure_function() {
        let a = derived_name("a-very-long-image-build-name-that-goes-on-and-on-forever", "manifest");
        let b = derived_name("a-very-long-image-build-name-that-goes-on-and-on-forever", "manifest");
        assert_eq!(a, b);
    }

    #[rstest]
    #[case("a-very-long-image-build-name-that-goes-on-and-on-forever-and-ever", "manifest")]
    #[case("another-extremely-long-image-build-name-padded-out-to-overflow-the-limit", "push-auth")]
    fn never_exceeds_limit(#[case] base: &str, #[case] suffix: &str) {
        let name = derived_name(base, suffix);
        assert!(name.len() <= MAX_DERIVED_NAME_LEN, "{name} is too long");
    }

    #[test]
    fn distinct_long_bases_produce_distinct_names() {
        let base_len = MAX_DERIVED_NAME_LEN + 20;
        let base_a = "a".repeat(base_len);
        let base_b = "b".repeat(base_len);
        assert_ne!(derived_name(&base_a, "workspace"), derived_name(&base_b, "workspace"));
    }

    #[test]
    fn is_valid_k8s_subdomain_charset() {
        let name = derived_name(&"x".repeat(100), "push-auth");
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }
}
