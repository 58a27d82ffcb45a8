//! Deterministic suite content hash
//!
//! Two builds with equal source descriptors, file lists and filter produce
//! bit-identical hashes, so the on-disk suite directory is content
//! addressed.

use sha2::{Digest, Sha256};

use crate::source::SourceDescriptor;

/// Format tag folded into every hash; bump when the canonical encoding or
/// the script format changes.
pub const SUITE_FORMAT_VERSION: &str = "benchmarkoor-suite-v1";

/// Lowercase hex SHA-256 over a canonical line encoding of the inputs.
pub fn suite_hash(
    sources: &[SourceDescriptor],
    files: &[String],
    filter: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(SUITE_FORMAT_VERSION.as_bytes());
    hasher.update(b"\n");
    for source in sources {
        hasher.update(source.canonical_line().as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"filter:");
    hasher.update(filter.unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    for file in files {
        hasher.update(b"file:");
        hasher.update(file.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<SourceDescriptor> {
        vec![SourceDescriptor::Git {
            repo: "https://github.com/ethereum/execution-spec-tests".to_string(),
            sha: "abc123".to_string(),
            dir: "fixtures/blockchain_tests_engine_x".to_string(),
        }]
    }

    #[test]
    fn test_equal_inputs_equal_hash() {
        let files = vec!["a.json".to_string(), "b.json".to_string()];
        let first = suite_hash(&sources(), &files, Some("cancun"));
        let second = suite_hash(&sources(), &files, Some("cancun"));
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_eq!(first, first.to_lowercase());
    }

    #[test]
    fn test_hash_depends_on_every_input() {
        let files = vec!["a.json".to_string()];
        let base = suite_hash(&sources(), &files, None);

        let other_files = vec!["b.json".to_string()];
        assert_ne!(base, suite_hash(&sources(), &other_files, None));

        assert_ne!(base, suite_hash(&sources(), &files, Some("x")));

        let local = vec![SourceDescriptor::LocalDir {
            path: "./fixtures".to_string(),
        }];
        assert_ne!(base, suite_hash(&local, &files, None));
    }
}
