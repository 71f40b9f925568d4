//! Request fingerprinting for the artifact cache.

/// Normalize a request for fingerprinting: lowercase, whitespace collapsed
/// to single spaces, trimmed.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable cache key for a request: blake3 of the normalized text.
pub fn fingerprint(text: &str) -> String {
    blake3::hash(normalize(text).as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn case_and_whitespace_do_not_change_the_fingerprint() {
        assert_eq!(
            fingerprint("Show   Open Demands"),
            fingerprint("show open demands")
        );
        assert_eq!(
            fingerprint("  show open demands \n"),
            fingerprint("show open demands")
        );
    }

    #[test]
    fn distinct_requests_get_distinct_fingerprints() {
        assert_ne!(
            fingerprint("show open demands"),
            fingerprint("show closed demands")
        );
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(s in ".{0,120}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }
    }
}
