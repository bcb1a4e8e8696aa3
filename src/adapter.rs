//! The storage adapter contract.

use std::io::Read;

use crate::{DirectoryEntry, Metadata, StorageError, Visibility, WriteOptions};

/// One behavioral contract over heterogeneous storage backends.
///
/// Every operation takes logical paths (see [`crate::path::normalize`]) and
/// returns a typed result: expected conditions such as a missing source or an
/// occupied destination surface as [`StorageError::NotFound`] /
/// [`StorageError::AlreadyExists`], while backend transport faults surface as
/// [`StorageError::Io`] or [`StorageError::Protocol`]. Precondition checks
/// run before any mutation is attempted, so a failed precondition leaves no
/// partial side effects. No operation retries; retry policy belongs to the
/// caller.
///
/// # Concurrency
///
/// Methods take `&mut self`: an adapter instance is a single blocking
/// session and is not safe for concurrent use. The FTP adapter in particular
/// serializes every operation through one control connection whose working
/// directory is part of the session state. Callers that need concurrency use
/// one adapter instance per concurrent task.
///
/// # Object Safety
///
/// The trait is object-safe and can be used as `&mut dyn StorageAdapter`.
pub trait StorageAdapter {
    /// Check whether a regular file exists at `path`.
    fn has_file(&mut self, path: &str) -> Result<bool, StorageError>;

    /// Check whether a directory exists at `path`.
    fn has_dir(&mut self, path: &str) -> Result<bool, StorageError>;

    /// Read the full contents of a file.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if `path` does not resolve to a file
    /// - [`StorageError::Unreadable`] if it exists but cannot be opened
    fn read(&mut self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Open a file for reading as a scoped stream.
    ///
    /// The returned reader owns whatever backend resources it needs; dropping
    /// it releases them on every exit path.
    ///
    /// # Errors
    ///
    /// Same conditions as [`read`](Self::read).
    fn open_read(&mut self, path: &str) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Write a new file. Strict create semantics.
    ///
    /// # Errors
    ///
    /// - [`StorageError::AlreadyExists`] if a file is already present
    fn write(
        &mut self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), StorageError>;

    /// Streamed variant of [`write`](Self::write).
    fn write_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<(), StorageError>;

    /// Overwrite an existing file. Never creates.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no file exists at `path`
    fn update(
        &mut self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), StorageError>;

    /// Streamed variant of [`update`](Self::update).
    fn update_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<(), StorageError>;

    /// Create or overwrite unconditionally. Idempotent.
    fn put(
        &mut self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), StorageError>;

    /// Streamed variant of [`put`](Self::put).
    fn put_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<(), StorageError>;

    /// Rename a file. Ensures the destination's parent directory exists,
    /// inheriting the source parent's mode where the backend exposes one.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the source is absent
    /// - [`StorageError::AlreadyExists`] if the destination is present
    fn rename(&mut self, path: &str, new_path: &str) -> Result<(), StorageError>;

    /// Copy a file. Same precondition and parent-directory semantics as
    /// [`rename`](Self::rename).
    fn copy(&mut self, path: &str, new_path: &str) -> Result<(), StorageError>;

    /// Delete a file.
    fn delete_file(&mut self, path: &str) -> Result<(), StorageError>;

    /// Delete a directory, removing all descendants first (child-first).
    ///
    /// A failure partway through is reported as an error; descendants removed
    /// before the failure stay removed.
    fn delete_dir(&mut self, path: &str) -> Result<(), StorageError>;

    /// Create a directory, tolerating pre-existing intermediate segments.
    ///
    /// Target-exists policy is per-adapter: local errors with
    /// [`StorageError::AlreadyExists`] if the target exists at all; FTP
    /// silently reuses existing segments.
    fn create_dir(&mut self, path: &str, options: &WriteOptions) -> Result<(), StorageError>;

    /// List the contents of a directory.
    ///
    /// The listing is finite and recomputed fresh on every call. With
    /// `recursive = false` only immediate children are produced.
    fn list_contents(&mut self, directory: &str, recursive: bool)
    -> Result<Listing, StorageError>;

    /// Metadata for a single path.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the path does not exist
    fn metadata(&mut self, path: &str) -> Result<Metadata, StorageError>;

    /// Translate `visibility` through the permission table and apply it.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the path does not exist
    fn set_visibility(&mut self, path: &str, visibility: Visibility)
    -> Result<(), StorageError>;
}

/// Iterator over listing entries.
///
/// Wraps a boxed iterator so backends can stream entries lazily (the local
/// adapter walks a directory-handle worklist) or hand over a pre-collected
/// batch (the FTP adapter parses a full server response).
///
/// - Outer `Result` (from [`StorageAdapter::list_contents`]) = "can I open
///   this directory?"
/// - Inner `Result` (per item) = "can I read this entry?"
pub struct Listing(Box<dyn Iterator<Item = Result<DirectoryEntry, StorageError>> + Send>);

impl Listing {
    /// Create from any compatible iterator.
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<DirectoryEntry, StorageError>> + Send + 'static,
    {
        Self(Box::new(iter))
    }

    /// Create from a pre-collected vector.
    pub fn from_vec(entries: Vec<DirectoryEntry>) -> Self {
        Self(Box::new(entries.into_iter().map(Ok)))
    }

    /// Collect all entries, short-circuiting on the first error.
    pub fn collect_all(self) -> Result<Vec<DirectoryEntry>, StorageError> {
        self.collect()
    }
}

impl Iterator for Listing {
    type Item = Result<DirectoryEntry, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}
