//! Storage adapter over a local directory tree.
//!
//! Permission semantics are Unix: visibility is derived from and written to
//! the mode bits, so this adapter is only available on Unix targets.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::sys::stat::{Mode, umask};
use tracing::debug;

use crate::adapter::{Listing, StorageAdapter};
use crate::path::{PathPrefixer, normalize, parent};
use crate::{
    DirectoryEntry, EntryType, Metadata, PermissionMap, StorageError, Visibility, WriteOptions,
};

/// Symlink policy for traversal operations.
///
/// The two flags are independent and may be combined; `disallow_links` wins
/// when both are set. With neither flag, symlinks are reported as
/// [`EntryType::Symlink`] entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHandling {
    /// Omit symlinks from listings silently.
    pub skip_links: bool,
    /// Fail traversal with [`StorageError::NotSupported`] upon encountering
    /// a symlink.
    pub disallow_links: bool,
}

impl Default for LinkHandling {
    fn default() -> Self {
        Self {
            skip_links: false,
            disallow_links: true,
        }
    }
}

impl LinkHandling {
    /// Silently omit symlinks.
    pub const SKIP: Self = Self {
        skip_links: true,
        disallow_links: false,
    };

    /// Report symlinks as entries.
    pub const ALLOW: Self = Self {
        skip_links: false,
        disallow_links: false,
    };
}

/// Restores the previous process umask when dropped.
///
/// The override is scoped strictly to a directory-creation call so the
/// configured mode is not clipped by an ambient mask.
struct UmaskGuard {
    previous: Mode,
}

impl UmaskGuard {
    fn clear() -> Self {
        Self {
            previous: umask(Mode::empty()),
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.previous);
    }
}

/// Storage adapter backed by a local directory tree.
///
/// The root is created if missing and must be readable. Every mutating
/// operation with create-only or update-only semantics asserts
/// presence/absence before touching the filesystem.
#[derive(Debug)]
pub struct LocalAdapter {
    prefixer: PathPrefixer,
    permissions: PermissionMap,
    link_handling: LinkHandling,
}

impl LocalAdapter {
    /// Create an adapter rooted at `root` with default permissions and the
    /// default (disallow) symlink policy.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::with_config(root, PermissionMap::default(), LinkHandling::default())
    }

    /// Create an adapter with an explicit permission table and symlink policy.
    pub fn with_config(
        root: impl Into<PathBuf>,
        permissions: PermissionMap,
        link_handling: LinkHandling,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        let root = match fs::symlink_metadata(&root) {
            Ok(meta) if meta.is_symlink() => fs::canonicalize(&root)
                .map_err(|e| StorageError::io("resolve_root", root.to_string_lossy(), e))?,
            _ => root,
        };

        let root_str = root.to_string_lossy().into_owned();
        ensure_directory(&root, &root_str, permissions.dir_public)?;

        fs::read_dir(&root).map_err(|_| StorageError::Unreadable {
            path: root_str.clone(),
        })?;

        Ok(Self {
            prefixer: PathPrefixer::new(root_str),
            permissions,
            link_handling,
        })
    }

    /// The physical prefix every logical path is resolved against.
    pub fn prefixer(&self) -> &PathPrefixer {
        &self.prefixer
    }

    /// Normalize a logical path and resolve its physical location.
    fn locate(&self, path: &str) -> Result<(String, PathBuf), StorageError> {
        let logical = normalize(path)?;
        let physical = PathBuf::from(self.prefixer.apply(&logical));
        Ok((logical, physical))
    }

    fn assert_file_present(&self, physical: &Path, logical: &str) -> Result<(), StorageError> {
        if physical.is_file() {
            Ok(())
        } else {
            Err(StorageError::NotFound {
                path: logical.to_string(),
            })
        }
    }

    fn assert_file_absent(
        &self,
        physical: &Path,
        logical: &str,
        operation: &'static str,
    ) -> Result<(), StorageError> {
        if physical.is_file() {
            Err(StorageError::AlreadyExists {
                path: logical.to_string(),
                operation,
            })
        } else {
            Ok(())
        }
    }

    /// Ensure the parent directory of a file location exists, then land the
    /// contents and apply any requested visibility afterwards.
    fn write_contents(
        &self,
        logical: &str,
        physical: &Path,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let parent_logical = parent(logical);
        let parent_physical = PathBuf::from(self.prefixer.apply(parent_logical));
        ensure_directory(&parent_physical, parent_logical, self.permissions.dir_public)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(physical)
            .map_err(|e| StorageError::io("write", logical, e))?;
        io::copy(contents, &mut file).map_err(|e| StorageError::io("write", logical, e))?;
        file.flush().map_err(|e| StorageError::io("write", logical, e))?;

        if let Some(visibility) = options.visibility {
            self.chmod(physical, logical, EntryType::File, visibility)?;
        }

        Ok(())
    }

    fn chmod(
        &self,
        physical: &Path,
        logical: &str,
        entry_type: EntryType,
        visibility: Visibility,
    ) -> Result<(), StorageError> {
        let mode = self.permissions.mode_for(entry_type, visibility);
        fs::set_permissions(physical, fs::Permissions::from_mode(mode))
            .map_err(|e| StorageError::io("set_visibility", logical, e))
    }

    /// Mode bits of the directory containing `physical`, used to let
    /// rename/copy destinations inherit their source parent's mode.
    fn parent_mode(&self, physical: &Path) -> Option<u32> {
        let parent = physical.parent()?;
        let meta = fs::metadata(parent).ok()?;
        Some(meta.mode() & 0o7777)
    }

    /// Collect the subtree under `physical` so removal can run child-first.
    ///
    /// Entries append in pre-order, so iterating the result in reverse
    /// visits every directory after its descendants.
    fn collect_subtree(
        &self,
        physical: &Path,
    ) -> Result<Vec<(PathBuf, EntryType)>, StorageError> {
        let mut stack = vec![physical.to_path_buf()];
        let mut entries = Vec::new();

        while let Some(dir) = stack.pop() {
            let reader = fs::read_dir(&dir).map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => StorageError::Unreadable {
                    path: dir.to_string_lossy().into_owned(),
                },
                _ => StorageError::io("delete_dir", dir.to_string_lossy(), e),
            })?;

            for entry in reader {
                let entry =
                    entry.map_err(|e| StorageError::io("delete_dir", dir.to_string_lossy(), e))?;
                let file_type = entry.file_type().map_err(|e| match e.kind() {
                    io::ErrorKind::PermissionDenied => StorageError::Unreadable {
                        path: entry.path().to_string_lossy().into_owned(),
                    },
                    _ => StorageError::io("delete_dir", entry.path().to_string_lossy(), e),
                })?;

                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path.clone());
                    entries.push((path, EntryType::Directory));
                } else if file_type.is_symlink() {
                    entries.push((path, EntryType::Symlink));
                } else {
                    entries.push((path, EntryType::File));
                }
            }
        }

        Ok(entries)
    }
}

/// mkdir -p with the given mode under a scoped umask override. Fatal if the
/// directory is still missing afterwards.
fn ensure_directory(physical: &Path, logical: &str, mode: u32) -> Result<(), StorageError> {
    if !physical.is_dir() {
        debug!(path = %physical.display(), mode = format_args!("{mode:o}"), "creating directory");
        let guard = UmaskGuard::clear();
        let result = DirBuilder::new().recursive(true).mode(mode).create(physical);
        drop(guard);

        if result.is_err() || !physical.is_dir() {
            return Err(StorageError::DirectoryCreationFailed {
                path: logical.to_string(),
            });
        }
    }
    Ok(())
}

impl StorageAdapter for LocalAdapter {
    fn has_file(&mut self, path: &str) -> Result<bool, StorageError> {
        let (_, physical) = self.locate(path)?;
        Ok(physical.is_file())
    }

    fn has_dir(&mut self, path: &str) -> Result<bool, StorageError> {
        let (_, physical) = self.locate(path)?;
        Ok(physical.is_dir())
    }

    fn read(&mut self, path: &str) -> Result<Vec<u8>, StorageError> {
        let (logical, physical) = self.locate(path)?;
        match fs::read(&physical) {
            Ok(bytes) => Ok(bytes),
            Err(_) => {
                self.assert_file_present(&physical, &logical)?;
                Err(StorageError::Unreadable { path: logical })
            }
        }
    }

    fn open_read(&mut self, path: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let (logical, physical) = self.locate(path)?;
        match fs::File::open(&physical) {
            Ok(file) if physical.is_file() => Ok(Box::new(file)),
            _ => {
                self.assert_file_present(&physical, &logical)?;
                Err(StorageError::Unreadable { path: logical })
            }
        }
    }

    fn write(
        &mut self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        self.write_stream(path, &mut &contents[..], options)
    }

    fn write_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let (logical, physical) = self.locate(path)?;
        self.assert_file_absent(&physical, &logical, "write")?;
        self.write_contents(&logical, &physical, contents, options)
    }

    fn update(
        &mut self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        self.update_stream(path, &mut &contents[..], options)
    }

    fn update_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let (logical, physical) = self.locate(path)?;
        self.assert_file_present(&physical, &logical)?;
        self.write_contents(&logical, &physical, contents, options)
    }

    fn put(
        &mut self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        self.put_stream(path, &mut &contents[..], options)
    }

    fn put_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let (logical, physical) = self.locate(path)?;
        self.write_contents(&logical, &physical, contents, options)
    }

    fn rename(&mut self, path: &str, new_path: &str) -> Result<(), StorageError> {
        let (logical, physical) = self.locate(path)?;
        let (new_logical, new_physical) = self.locate(new_path)?;

        self.assert_file_present(&physical, &logical)?;
        self.assert_file_absent(&new_physical, &new_logical, "rename")?;

        let mode = self
            .parent_mode(&physical)
            .unwrap_or(self.permissions.dir_public);
        let dest_parent_logical = parent(&new_logical);
        let dest_parent = PathBuf::from(self.prefixer.apply(dest_parent_logical));
        ensure_directory(&dest_parent, dest_parent_logical, mode)?;

        fs::rename(&physical, &new_physical).map_err(|e| StorageError::io("rename", logical, e))
    }

    fn copy(&mut self, path: &str, new_path: &str) -> Result<(), StorageError> {
        let (logical, physical) = self.locate(path)?;
        let (new_logical, new_physical) = self.locate(new_path)?;

        self.assert_file_present(&physical, &logical)?;
        self.assert_file_absent(&new_physical, &new_logical, "copy")?;

        let mode = self
            .parent_mode(&physical)
            .unwrap_or(self.permissions.dir_public);
        let dest_parent_logical = parent(&new_logical);
        let dest_parent = PathBuf::from(self.prefixer.apply(dest_parent_logical));
        ensure_directory(&dest_parent, dest_parent_logical, mode)?;

        fs::copy(&physical, &new_physical)
            .map(|_| ())
            .map_err(|e| StorageError::io("copy", logical, e))
    }

    fn delete_file(&mut self, path: &str) -> Result<(), StorageError> {
        let (logical, physical) = self.locate(path)?;
        fs::remove_file(&physical).map_err(|e| StorageError::io("delete_file", logical, e))
    }

    fn delete_dir(&mut self, path: &str) -> Result<(), StorageError> {
        let (logical, physical) = self.locate(path)?;
        if !physical.is_dir() {
            return Err(StorageError::NotFound { path: logical });
        }

        let entries = self.collect_subtree(&physical)?;
        debug!(path = %logical, entries = entries.len(), "deleting directory tree");

        // Child-first: reverse of pre-order collection.
        for (entry_path, entry_type) in entries.iter().rev() {
            let result = match entry_type {
                EntryType::Directory => fs::remove_dir(entry_path),
                // Remove the link itself, never what it points at.
                EntryType::Symlink | EntryType::File => fs::remove_file(entry_path),
            };
            result
                .map_err(|e| StorageError::io("delete_dir", entry_path.to_string_lossy(), e))?;
        }

        fs::remove_dir(&physical).map_err(|e| StorageError::io("delete_dir", logical, e))
    }

    fn create_dir(&mut self, path: &str, options: &WriteOptions) -> Result<(), StorageError> {
        let (logical, physical) = self.locate(path)?;

        if physical.exists() {
            return Err(StorageError::AlreadyExists {
                path: logical,
                operation: "create_dir",
            });
        }

        let visibility = options.visibility.unwrap_or(Visibility::Public);
        let mode = self.permissions.mode_for(EntryType::Directory, visibility);
        ensure_directory(&physical, &logical, mode)
    }

    fn list_contents(
        &mut self,
        directory: &str,
        recursive: bool,
    ) -> Result<Listing, StorageError> {
        let (logical, physical) = self.locate(directory)?;
        if !physical.is_dir() {
            return Err(StorageError::NotFound { path: logical });
        }

        let reader = match fs::read_dir(&physical) {
            Ok(reader) => reader,
            Err(e) => return Err(StorageError::io("list_contents", logical, e)),
        };

        Ok(Listing::new(LocalListing {
            stack: vec![(logical, reader)],
            recursive,
            prefixer: self.prefixer.clone(),
            link_handling: self.link_handling,
        }))
    }

    fn metadata(&mut self, path: &str) -> Result<Metadata, StorageError> {
        let (logical, physical) = self.locate(path)?;
        let meta = fs::metadata(&physical).map_err(|e| StorageError::io("metadata", logical, e))?;

        let visibility = Some(Visibility::from_mode(meta.mode() & 0o7777));
        if meta.is_dir() {
            Ok(Metadata {
                entry_type: EntryType::Directory,
                size: None,
                timestamp: Some(meta.mtime()),
                visibility,
            })
        } else {
            Ok(Metadata::file(meta.len(), Some(meta.mtime()), visibility))
        }
    }

    fn set_visibility(
        &mut self,
        path: &str,
        visibility: Visibility,
    ) -> Result<(), StorageError> {
        let (logical, physical) = self.locate(path)?;
        if !physical.exists() {
            return Err(StorageError::NotFound { path: logical });
        }

        let entry_type = if physical.is_dir() {
            EntryType::Directory
        } else {
            EntryType::File
        };
        self.chmod(&physical, &logical, entry_type, visibility)
    }
}

/// Lazy traversal over a worklist of open directory handles.
///
/// Recursive descent is pre-order: a directory entry is produced before its
/// children, and its handle goes on top of the stack so children come out
/// before remaining siblings.
/// Each worklist entry keeps the logical path of the directory its handle
/// reads, so iteration errors can name where they happened.
struct LocalListing {
    stack: Vec<(String, fs::ReadDir)>,
    recursive: bool,
    prefixer: PathPrefixer,
    link_handling: LinkHandling,
}

impl LocalListing {
    fn logical_path(&self, physical: &Path) -> Result<String, StorageError> {
        self.prefixer.strip(&physical.to_string_lossy())
    }
}

impl Iterator for LocalListing {
    type Item = Result<DirectoryEntry, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (dir_logical, reader) = self.stack.last_mut()?;
            let entry = match reader.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    let path = dir_logical.clone();
                    return Some(Err(StorageError::io("list_contents", path, e)));
                }
                None => {
                    self.stack.pop();
                    continue;
                }
            };

            let physical = entry.path();
            let logical = match self.logical_path(&physical) {
                Ok(logical) => logical,
                Err(e) => return Some(Err(e)),
            };
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => return Some(Err(StorageError::io("list_contents", logical, e))),
            };

            if file_type.is_symlink() {
                if self.link_handling.disallow_links {
                    return Some(Err(StorageError::NotSupported {
                        path: logical,
                        operation: "list_contents",
                    }));
                }
                if self.link_handling.skip_links {
                    continue;
                }
                let timestamp = fs::symlink_metadata(&physical).ok().map(|m| m.mtime());
                return Some(Ok(DirectoryEntry {
                    path: logical,
                    entry_type: EntryType::Symlink,
                    size: None,
                    timestamp,
                }));
            }

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => return Some(Err(StorageError::io("list_contents", logical, e))),
            };

            if file_type.is_dir() {
                if self.recursive {
                    match fs::read_dir(&physical) {
                        Ok(reader) => self.stack.push((logical.clone(), reader)),
                        Err(e) => {
                            return Some(Err(StorageError::io("list_contents", logical, e)));
                        }
                    }
                }
                return Some(Ok(DirectoryEntry {
                    path: logical,
                    entry_type: EntryType::Directory,
                    size: None,
                    timestamp: Some(meta.mtime()),
                }));
            }

            return Some(Ok(DirectoryEntry {
                path: logical,
                entry_type: EntryType::File,
                size: Some(meta.len()),
                timestamp: Some(meta.mtime()),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_link_handling_disallows() {
        let handling = LinkHandling::default();
        assert!(handling.disallow_links);
        assert!(!handling.skip_links);
    }

    #[test]
    fn root_is_created_on_construction() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested/root");
        let adapter = LocalAdapter::new(&root).unwrap();
        assert!(root.is_dir());
        assert!(adapter.prefixer().prefix().ends_with("/root/"));
    }

    #[test]
    fn locate_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let mut adapter = LocalAdapter::new(tmp.path()).unwrap();
        assert!(matches!(
            adapter.read("../outside"),
            Err(StorageError::InvalidPath { .. })
        ));
    }
}
