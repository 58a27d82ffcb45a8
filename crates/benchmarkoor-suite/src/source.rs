//! Suite sources and fixture file discovery

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use benchmarkoor_config::SuiteSource;

use crate::error::{Result, SuiteError};

/// Canonical description of a source, persisted in `summary.json` and
/// folded into the suite hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SourceDescriptor {
    Git { repo: String, sha: String, dir: String },
    LocalDir { path: String },
}

impl SourceDescriptor {
    /// One line of the canonical hash encoding.
    pub fn canonical_line(&self) -> String {
        match self {
            Self::Git { repo, sha, dir } => format!("source:git:{repo}:{sha}:{dir}"),
            Self::LocalDir { path } => format!("source:local_dir:{path}"),
        }
    }
}

/// A resolved source: its descriptor plus the directory to walk.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub descriptor: SourceDescriptor,
    pub root: PathBuf,
    pub warmup: bool,
}

/// Resolve a configured source to a walkable directory.
pub fn resolve_source(source: &SuiteSource) -> Result<ResolvedSource> {
    let (descriptor, root) = match (&source.git, &source.local_dir) {
        (Some(git), None) => {
            let descriptor = SourceDescriptor::Git {
                repo: git.repo.clone(),
                sha: git.sha.clone(),
                dir: git.dir.clone(),
            };
            (descriptor, Path::new(&git.checkout).join(&git.dir))
        }
        (None, Some(local_dir)) => {
            let descriptor = SourceDescriptor::LocalDir {
                path: local_dir.clone(),
            };
            (descriptor, PathBuf::from(local_dir))
        }
        _ => return Err(SuiteError::InvalidSource),
    };

    if !root.is_dir() {
        return Err(SuiteError::MissingSourceDir {
            source_name: descriptor.canonical_line(),
            dir: root.display().to_string(),
        });
    }

    Ok(ResolvedSource {
        descriptor,
        root,
        warmup: source.warmup,
    })
}

/// Recursively list `.json` files under `root`, as sorted relative paths
/// with `/` separators.
pub fn discover_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(root: &Path, dir: &Path, files: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(relative);
        }
    }
    Ok(())
}

/// Whether a relative path passes the configured substring filter.
pub fn matches_filter(relative: &str, filter: Option<&str>) -> bool {
    match filter {
        Some(filter) if !filter.is_empty() => relative.contains(filter),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_is_sorted_and_relative() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub/b.json"), "{}").expect("write");
        std::fs::write(dir.path().join("a.json"), "{}").expect("write");
        std::fs::write(dir.path().join("notes.txt"), "skip me").expect("write");

        let files = discover_files(dir.path()).expect("discover");
        assert_eq!(files, vec!["a.json".to_string(), "sub/b.json".to_string()]);
    }

    #[test]
    fn test_filter_is_substring_on_relative_path() {
        assert!(matches_filter("cancun/blob.json", Some("cancun")));
        assert!(matches_filter("cancun/blob.json", Some("blob")));
        assert!(!matches_filter("paris/simple.json", Some("cancun")));
        assert!(matches_filter("anything.json", None));
        assert!(matches_filter("anything.json", Some("")));
    }

    #[test]
    fn test_missing_source_dir_is_an_error() {
        let source = SuiteSource {
            git: None,
            local_dir: Some("/definitely/not/here".to_string()),
            warmup: false,
        };
        let err = resolve_source(&source).expect_err("missing dir");
        assert!(matches!(err, SuiteError::MissingSourceDir { .. }));
    }
}
