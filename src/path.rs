//! Logical path normalization and root-prefix translation.
//!
//! Logical paths are forward-slash separated, relative to an adapter's root,
//! with no leading slash and no `.`/`..` segments. The empty string denotes
//! the root itself. [`PathPrefixer`] maps logical paths to physical locations
//! and back; for any normalized `p`, `strip(apply(p)) == p`.

use crate::StorageError;

/// Normalize a raw path into its logical form.
///
/// Backslashes are rewritten to forward slashes, empty and `.` segments are
/// dropped, and `..` segments consume the previous one. The result has no
/// leading or trailing slash; the root normalizes to `""`.
///
/// # Errors
///
/// [`StorageError::InvalidPath`] if a `..` segment would climb above the root.
///
/// # Examples
///
/// ```rust
/// use storfs::path::normalize;
///
/// assert_eq!(normalize("/a//b/./c").unwrap(), "a/b/c");
/// assert_eq!(normalize("a\\b").unwrap(), "a/b");
/// assert_eq!(normalize("a/../b").unwrap(), "b");
/// assert!(normalize("../etc/passwd").is_err());
/// ```
pub fn normalize(path: &str) -> Result<String, StorageError> {
    let path = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(StorageError::InvalidPath {
                        path: path.clone(),
                        reason: "path traversal above root",
                    });
                }
            }
            other => segments.push(other),
        }
    }

    Ok(segments.join("/"))
}

/// Logical parent of a normalized path. The root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Owns a root prefix and converts logical paths to physical ones and back.
///
/// An empty root disables prefixing entirely; a non-empty prefix always ends
/// in exactly one separator.
///
/// # Examples
///
/// ```rust
/// use storfs::path::PathPrefixer;
///
/// let prefixer = PathPrefixer::new("/srv/files/");
/// assert_eq!(prefixer.apply("a/b.txt"), "/srv/files/a/b.txt");
/// assert_eq!(prefixer.strip("/srv/files/a/b.txt").unwrap(), "a/b.txt");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixer {
    prefix: String,
}

impl PathPrefixer {
    /// Create a prefixer from a configured root. Trailing separators are
    /// collapsed into the single one the prefix carries.
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let prefix = if root.is_empty() {
            String::new()
        } else {
            let mut trimmed = root.trim_end_matches(['/', '\\']).to_string();
            trimmed.push('/');
            trimmed
        };
        Self { prefix }
    }

    /// The current prefix (empty, or ending in exactly one `/`).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Map a logical path to its physical location.
    pub fn apply(&self, path: &str) -> String {
        let mut physical = self.prefix.clone();
        physical.push_str(path.trim_start_matches(['/', '\\']));
        physical
    }

    /// Map a physical location back to its logical path.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidPath`] if the input does not start with the
    /// current prefix.
    pub fn strip(&self, physical: &str) -> Result<String, StorageError> {
        match physical.strip_prefix(&self.prefix) {
            Some(rest) => Ok(rest.to_string()),
            None => Err(StorageError::InvalidPath {
                path: physical.to_string(),
                reason: "path is outside the configured prefix",
            }),
        }
    }
}
