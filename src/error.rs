//! Error types for the storage adapter contract.

use std::io;

/// Error type shared by every storage adapter.
///
/// Expected, recoverable conditions (a missing source, a destination that is
/// already taken) get their own variants so callers can match on them.
/// Backend transport faults are carried in [`StorageError::Io`] and
/// [`StorageError::Protocol`] with the operation that hit them.
/// Uses `#[non_exhaustive]` for forward compatibility.
///
/// # Examples
///
/// ```rust
/// use storfs::StorageError;
///
/// let err = StorageError::NotFound { path: "missing.txt".into() };
/// assert_eq!(err.to_string(), "not found: missing.txt");
/// ```
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Path does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// The logical path that was not found.
        path: String,
    },

    /// Path already exists when it shouldn't.
    #[error("{operation}: already exists: {path}")]
    AlreadyExists {
        /// The logical path that already exists.
        path: String,
        /// The operation that failed.
        operation: &'static str,
    },

    /// Entry exists but cannot be opened or inspected.
    #[error("unreadable: {path}")]
    Unreadable {
        /// The logical path that could not be read.
        path: String,
    },

    /// Permission denied for operation.
    #[error("{operation}: permission denied: {path}")]
    PermissionDenied {
        /// The logical path where permission was denied.
        path: String,
        /// The operation that was denied.
        operation: &'static str,
    },

    /// Entry kind is not supported by the configured policy
    /// (e.g. a symlink encountered under the disallow policy).
    #[error("{operation}: not supported: {path}")]
    NotSupported {
        /// The logical path of the offending entry.
        path: String,
        /// The operation that refused it.
        operation: &'static str,
    },

    /// A directory could not be created or is still missing after creation.
    #[error("could not create directory: {path}")]
    DirectoryCreationFailed {
        /// The directory that could not be created.
        path: String,
    },

    /// Session establishment or configuration failed. Fatal: the connection
    /// is torn down and the adapter must reconnect before further use.
    #[error("connection failure for {host}:{port}: {context}")]
    ConnectionFailure {
        /// Remote host.
        host: String,
        /// Remote port.
        port: u16,
        /// What went wrong (includes the username where relevant).
        context: String,
    },

    /// Path failed normalization or did not match the configured prefix.
    #[error("invalid path: {path} ({reason})")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// I/O error with context.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The logical path involved in the operation.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The backend answered a data operation with an unexpected reply.
    #[error("{operation}: unexpected reply: {reply}")]
    Protocol {
        /// The operation that got the reply.
        operation: &'static str,
        /// The offending reply line.
        reply: String,
    },
}

impl StorageError {
    /// Wrap an `io::Error`, promoting the common kinds to their typed
    /// variants so callers can keep matching on `NotFound` and friends.
    pub fn io(operation: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound { path },
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied { path, operation },
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists { path, operation },
            _ => StorageError::Io {
                operation,
                path,
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = StorageError::NotFound {
            path: "missing".into(),
        };
        assert_eq!(err.to_string(), "not found: missing");
    }

    #[test]
    fn already_exists_display() {
        let err = StorageError::AlreadyExists {
            path: "taken".into(),
            operation: "write",
        };
        assert_eq!(err.to_string(), "write: already exists: taken");
    }

    #[test]
    fn connection_failure_display() {
        let err = StorageError::ConnectionFailure {
            host: "ftp.example.com".into(),
            port: 21,
            context: "login failed for user bob".into(),
        };
        let text = err.to_string();
        assert!(text.contains("ftp.example.com:21"));
        assert!(text.contains("bob"));
    }

    #[test]
    fn io_not_found_promotes() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "test");
        let err = StorageError::io("read", "a.txt", io_err);
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[test]
    fn io_permission_denied_promotes() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "test");
        let err = StorageError::io("read", "a.txt", io_err);
        assert!(matches!(
            err,
            StorageError::PermissionDenied {
                operation: "read",
                ..
            }
        ));
    }

    #[test]
    fn io_already_exists_promotes() {
        let io_err = io::Error::new(io::ErrorKind::AlreadyExists, "test");
        let err = StorageError::io("create_dir", "d", io_err);
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[test]
    fn io_other_stays_io() {
        let io_err = io::Error::other("test");
        let err = StorageError::io("read", "a.txt", io_err);
        assert!(matches!(err, StorageError::Io { .. }));
    }
}
