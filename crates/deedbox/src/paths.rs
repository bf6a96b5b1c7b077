//! Document path handling.
//!
//! Document paths are slash-separated and relative to a root. They come
//! from remote listings and HTTP path parameters, so they are validated
//! before being joined onto a local directory.

use std::path::{Component, Path, PathBuf};

use deedbox_core::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Normalize a document path: backslashes become slashes, leading slashes
/// and `.` segments are dropped. `..` segments and empty paths are rejected.
pub fn normalize(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for seg in path.split(['/', '\\']) {
        match seg {
            "" | "." => continue,
            ".." => {
                return Err(Error::Config(format!(
                    "path escapes the document root: {}",
                    path
                )))
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return Err(Error::Config(format!("invalid document path: {:?}", path)));
    }
    Ok(parts.join("/"))
}

/// Join a document path onto `root`, refusing anything that would escape it.
pub fn resolve_under(root: &Path, path: &str) -> Result<PathBuf> {
    let normalized = normalize(path)?;
    let mut out = root.to_path_buf();
    for seg in normalized.split('/') {
        out.push(seg);
    }
    Ok(out)
}

/// Slash-separated form of `path` relative to `root`.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Case-insensitive include filter over document paths.
#[derive(Debug, Clone)]
pub struct IncludeFilter {
    set: GlobSet,
}

impl IncludeFilter {
    pub fn new(patterns: &[String]) -> anyhow::Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(
                GlobBuilder::new(pattern)
                    .case_insensitive(true)
                    .literal_separator(false)
                    .build()?,
            );
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.set.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/leases/unit5.txt").unwrap(), "leases/unit5.txt");
        assert_eq!(normalize("leases\\./unit5.txt").unwrap(), "leases/unit5.txt");
        assert!(normalize("../etc/passwd").is_err());
        assert!(normalize("leases/../../x").is_err());
        assert!(normalize("/").is_err());
    }

    #[test]
    fn test_resolve_under() {
        let root = Path::new("/srv/docs");
        assert_eq!(
            resolve_under(root, "leases/unit5.txt").unwrap(),
            PathBuf::from("/srv/docs/leases/unit5.txt")
        );
        assert!(resolve_under(root, "leases/../../secret").is_err());
    }

    #[test]
    fn test_relative_slash_path() {
        let root = Path::new("/srv/docs");
        assert_eq!(
            relative_slash_path(root, Path::new("/srv/docs/a/b.pdf")).as_deref(),
            Some("a/b.pdf")
        );
        assert_eq!(relative_slash_path(root, Path::new("/other/b.pdf")), None);
    }

    #[test]
    fn test_include_filter_case_insensitive() {
        let filter = IncludeFilter::new(&["**/*.pdf".to_string(), "**/*.txt".to_string()]).unwrap();
        assert!(filter.is_match("leases/Unit5.PDF"));
        assert!(filter.is_match("notes.txt"));
        assert!(!filter.is_match("photos/house.jpg"));
    }
}
