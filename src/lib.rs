//! # storfs
//!
//! Backend-agnostic file and directory storage with **local-disk and FTP
//! adapters**.
//!
//! Application code talks to one behavioral contract, [`StorageAdapter`],
//! in terms of *logical paths* (relative, forward-slash separated) and a
//! unified [`Metadata`] model. Each adapter maps that contract onto its
//! backend: [`LocalAdapter`] onto a rooted subtree of the local filesystem,
//! [`FtpAdapter`] onto a remote FTP or explicit-FTPS session.
//!
//! ---
//!
//! ## Quick Start
//!
//! A typical usage pattern with any backend:
//!
//! ```rust
//! use storfs::{StorageAdapter, StorageError, Visibility, WriteOptions};
//!
//! // Generic function that works with any adapter
//! fn publish(adapter: &mut dyn StorageAdapter, report: &[u8]) -> Result<(), StorageError> {
//!     let options = WriteOptions::with_visibility(Visibility::Public);
//!     adapter.put("reports/latest.txt", report, &options)?;
//!     for entry in adapter.list_contents("reports", false)? {
//!         println!("{}", entry?.path);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ---
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`StorageAdapter`] | The backend contract — read, write, list, metadata |
//! | [`LocalAdapter`] | Backend rooted at a local directory |
//! | [`FtpAdapter`] | Backend over a blocking FTP / FTPS session |
//! | [`Metadata`] | Unified entry metadata (type, size, timestamp, visibility) |
//! | [`Visibility`] | Portable public/private access level |
//! | [`PermissionMap`] | Visibility-to-mode translation table |
//! | [`StorageError`] | Comprehensive error type with context |
//!
//! ---
//!
//! ## Logical Paths
//!
//! Every operation takes logical paths: relative, `/`-separated, with the
//! empty string naming the adapter's root. Paths are normalized on entry
//! (separator unification, `.`/`..` resolution) and any traversal that
//! would escape the root is rejected with [`StorageError::InvalidPath`]
//! before touching the backend. See [`path::normalize`].
//!
//! ---
//!
//! ## Error Handling
//!
//! All operations return `Result<T, StorageError>`. Expected conditions are
//! typed variants, and errors include context:
//!
//! ```rust
//! use storfs::StorageError;
//!
//! let err = StorageError::NotFound { path: "missing.txt".into() };
//! assert_eq!(err.to_string(), "not found: missing.txt");
//!
//! let err = StorageError::AlreadyExists { path: "taken.txt".into(), operation: "write" };
//! assert_eq!(err.to_string(), "write: already exists: taken.txt");
//! ```
//!
//! ---
//!
//! ## Concurrency
//!
//! Adapter methods take `&mut self`: an adapter instance is one blocking
//! session and is not safe for concurrent use. In particular the FTP
//! adapter serializes everything through a single control connection whose
//! working directory is session state. Use one instance per concurrent
//! task; instances over the same backend are independent.
//!
//! ---
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Enable serialization for [`Metadata`], [`DirectoryEntry`], [`FtpConfig`], etc. |

mod adapter;
mod error;
mod ftp;
#[cfg(unix)]
mod local;
pub mod path;
mod types;

// Public re-exports - error types
pub use error::StorageError;

// Public re-exports - core types
pub use types::{DirectoryEntry, EntryType, Metadata, PermissionMap, Visibility, WriteOptions};

// Public re-exports - the adapter contract
pub use adapter::{Listing, StorageAdapter};

// Public re-exports - local backend (Unix permission semantics)
#[cfg(unix)]
pub use local::{LinkHandling, LocalAdapter};

// Public re-exports - FTP backend
pub use ftp::{ConnectionState, FtpAdapter, FtpConfig, FtpConnectionManager, TransferMode};

// Public re-exports - path utilities
pub use path::PathPrefixer;
