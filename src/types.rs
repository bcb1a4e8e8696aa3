//! Core value types for the storage adapter contract.

/// Type of a storage entry.
///
/// A closed variant so traversal sites can dispatch exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

/// Public/private classification of an entry's access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Visibility {
    /// Readable by group and others.
    Public,
    /// Owner-only access.
    Private,
}

impl Visibility {
    /// Derive visibility from a Unix mode: an entry is public when the
    /// group/other read bits (`0o044`) are set.
    pub const fn from_mode(mode: u32) -> Self {
        if mode & 0o044 != 0 {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

/// Maps `(entry type, visibility)` to a numeric permission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PermissionMap {
    /// Mode for public files.
    pub file_public: u32,
    /// Mode for private files.
    pub file_private: u32,
    /// Mode for public directories.
    pub dir_public: u32,
    /// Mode for private directories.
    pub dir_private: u32,
}

impl PermissionMap {
    /// Look up the mode for an entry type and visibility. Symlinks take the
    /// file modes.
    pub const fn mode_for(&self, entry_type: EntryType, visibility: Visibility) -> u32 {
        match (entry_type, visibility) {
            (EntryType::Directory, Visibility::Public) => self.dir_public,
            (EntryType::Directory, Visibility::Private) => self.dir_private,
            (EntryType::File | EntryType::Symlink, Visibility::Public) => self.file_public,
            (EntryType::File | EntryType::Symlink, Visibility::Private) => self.file_private,
        }
    }
}

impl Default for PermissionMap {
    fn default() -> Self {
        Self {
            file_public: 0o644,
            file_private: 0o600,
            dir_public: 0o755,
            dir_private: 0o700,
        }
    }
}

/// Metadata for a storage entry.
///
/// Directories may carry no size, timestamp, or visibility; files backed by a
/// real filesystem always resolve concrete values.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metadata {
    /// Type of the entry.
    pub entry_type: EntryType,
    /// Size in bytes, when known.
    pub size: Option<u64>,
    /// Last modification time as epoch seconds, when known.
    pub timestamp: Option<i64>,
    /// Visibility classification, when known.
    pub visibility: Option<Visibility>,
}

impl Metadata {
    /// File metadata with concrete values.
    pub fn file(size: u64, timestamp: Option<i64>, visibility: Option<Visibility>) -> Self {
        Self {
            entry_type: EntryType::File,
            size: Some(size),
            timestamp,
            visibility,
        }
    }

    /// Directory metadata with no size, timestamp, or visibility.
    pub fn directory() -> Self {
        Self {
            entry_type: EntryType::Directory,
            size: None,
            timestamp: None,
            visibility: None,
        }
    }

    /// Returns `true` if this is a regular file.
    #[inline]
    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }

    /// Returns `true` if this is a directory.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }
}

/// A single entry produced by a listing operation.
///
/// Ordering is backend-dependent and not guaranteed stable across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirectoryEntry {
    /// Logical path of the entry, relative to the adapter root.
    pub path: String,
    /// Type of the entry.
    pub entry_type: EntryType,
    /// Size in bytes (present only for files).
    pub size: Option<u64>,
    /// Last modification time as epoch seconds, when known.
    pub timestamp: Option<i64>,
}

/// Per-call options for write-style operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteOptions {
    /// Visibility to apply after the contents land. `None` keeps the
    /// backend's default.
    pub visibility: Option<Visibility>,
}

impl WriteOptions {
    /// Options requesting a specific visibility.
    pub const fn with_visibility(visibility: Visibility) -> Self {
        Self {
            visibility: Some(visibility),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_from_mode_bit_test() {
        assert_eq!(Visibility::from_mode(0o644), Visibility::Public);
        assert_eq!(Visibility::from_mode(0o640), Visibility::Public);
        assert_eq!(Visibility::from_mode(0o604), Visibility::Public);
        assert_eq!(Visibility::from_mode(0o600), Visibility::Private);
        assert_eq!(Visibility::from_mode(0o700), Visibility::Private);
    }

    #[test]
    fn permission_map_defaults() {
        let map = PermissionMap::default();
        assert_eq!(map.mode_for(EntryType::File, Visibility::Public), 0o644);
        assert_eq!(map.mode_for(EntryType::File, Visibility::Private), 0o600);
        assert_eq!(map.mode_for(EntryType::Directory, Visibility::Public), 0o755);
        assert_eq!(
            map.mode_for(EntryType::Directory, Visibility::Private),
            0o700
        );
    }

    #[test]
    fn permission_map_symlinks_use_file_modes() {
        let map = PermissionMap::default();
        assert_eq!(map.mode_for(EntryType::Symlink, Visibility::Public), 0o644);
    }

    #[test]
    fn metadata_constructors() {
        let file = Metadata::file(42, Some(1_700_000_000), Some(Visibility::Public));
        assert!(file.is_file());
        assert_eq!(file.size, Some(42));

        let dir = Metadata::directory();
        assert!(dir.is_dir());
        assert_eq!(dir.size, None);
        assert_eq!(dir.timestamp, None);
        assert_eq!(dir.visibility, None);
    }

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EntryType>();
        assert_send_sync::<Visibility>();
        assert_send_sync::<PermissionMap>();
        assert_send_sync::<Metadata>();
        assert_send_sync::<DirectoryEntry>();
        assert_send_sync::<WriteOptions>();
    }
}
