//! Integration tests for the local-disk adapter.

#![cfg(unix)]

use std::collections::BTreeSet;
use std::io::Read;

use storfs::{
    EntryType, LinkHandling, LocalAdapter, PermissionMap, StorageAdapter, StorageError,
    Visibility, WriteOptions,
};

fn adapter(tmp: &tempfile::TempDir) -> LocalAdapter {
    LocalAdapter::new(tmp.path()).unwrap()
}

fn paths(adapter: &mut LocalAdapter, dir: &str, recursive: bool) -> BTreeSet<String> {
    adapter
        .list_contents(dir, recursive)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect()
}

#[test]
fn write_is_strict_create() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);
    let opts = WriteOptions::default();

    fs.write("a.txt", b"first", &opts).unwrap();
    let err = fs.write("a.txt", b"second", &opts).unwrap_err();
    assert!(matches!(
        err,
        StorageError::AlreadyExists {
            operation: "write",
            ..
        }
    ));

    // The failed write left the original contents untouched.
    assert_eq!(fs.read("a.txt").unwrap(), b"first");
}

#[test]
fn update_requires_existing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);
    let opts = WriteOptions::default();

    let err = fs.update("a.txt", b"data", &opts).unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
    assert!(!fs.has_file("a.txt").unwrap());

    fs.write("a.txt", b"v1", &opts).unwrap();
    fs.update("a.txt", b"v2", &opts).unwrap();
    assert_eq!(fs.read("a.txt").unwrap(), b"v2");
}

#[test]
fn put_upserts() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);
    let opts = WriteOptions::default();

    fs.put("a.txt", b"v1", &opts).unwrap();
    fs.put("a.txt", b"v2", &opts).unwrap();
    assert_eq!(fs.read("a.txt").unwrap(), b"v2");
}

#[test]
fn write_creates_intermediate_directories() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);

    fs.write("a/b/c.txt", b"hi", &WriteOptions::default()).unwrap();
    assert!(fs.has_dir("a").unwrap());
    assert!(fs.has_dir("a/b").unwrap());
    assert_eq!(fs.read("a/b/c.txt").unwrap(), b"hi");
}

#[test]
fn open_read_streams_contents() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);
    fs.write("a.txt", b"streamed", &WriteOptions::default()).unwrap();

    let mut reader = fs.open_read("a.txt").unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"streamed");

    assert!(matches!(
        fs.open_read("missing.txt"),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn rename_preconditions_and_move() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);
    let opts = WriteOptions::default();

    assert!(matches!(
        fs.rename("missing.txt", "dest.txt"),
        Err(StorageError::NotFound { .. })
    ));

    fs.write("src.txt", b"payload", &opts).unwrap();
    fs.write("taken.txt", b"other", &opts).unwrap();
    assert!(matches!(
        fs.rename("src.txt", "taken.txt"),
        Err(StorageError::AlreadyExists { .. })
    ));
    // A failed precondition leaves both files as they were.
    assert_eq!(fs.read("src.txt").unwrap(), b"payload");
    assert_eq!(fs.read("taken.txt").unwrap(), b"other");

    fs.rename("src.txt", "moved/dest.txt").unwrap();
    assert!(!fs.has_file("src.txt").unwrap());
    assert_eq!(fs.read("moved/dest.txt").unwrap(), b"payload");
}

#[test]
fn copy_keeps_source() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);

    fs.write("src.txt", b"payload", &WriteOptions::default()).unwrap();
    fs.copy("src.txt", "copies/dest.txt").unwrap();
    assert_eq!(fs.read("src.txt").unwrap(), b"payload");
    assert_eq!(fs.read("copies/dest.txt").unwrap(), b"payload");
}

#[test]
fn delete_file_reports_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);

    fs.write("a.txt", b"x", &WriteOptions::default()).unwrap();
    fs.delete_file("a.txt").unwrap();
    assert!(!fs.has_file("a.txt").unwrap());
    assert!(matches!(
        fs.delete_file("a.txt"),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn delete_dir_removes_subtree() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);
    let opts = WriteOptions::default();

    fs.write("d/a.txt", b"1", &opts).unwrap();
    fs.write("d/sub/b.txt", b"2", &opts).unwrap();
    fs.delete_dir("d").unwrap();
    assert!(!fs.has_dir("d").unwrap());

    assert!(matches!(
        fs.delete_dir("d"),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn create_dir_rejects_existing_target() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);
    let opts = WriteOptions::default();

    fs.create_dir("a/b/c", &opts).unwrap();
    assert!(fs.has_dir("a/b/c").unwrap());
    assert!(matches!(
        fs.create_dir("a/b/c", &opts),
        Err(StorageError::AlreadyExists { .. })
    ));
}

#[test]
fn listing_shallow_and_recursive() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);
    let opts = WriteOptions::default();

    fs.write("d/a.txt", b"1", &opts).unwrap();
    fs.write("d/sub/b.txt", b"2", &opts).unwrap();

    let shallow = paths(&mut fs, "d", false);
    assert_eq!(
        shallow,
        BTreeSet::from(["d/a.txt".to_string(), "d/sub".to_string()])
    );

    let deep = paths(&mut fs, "d", true);
    assert_eq!(
        deep,
        BTreeSet::from([
            "d/a.txt".to_string(),
            "d/sub".to_string(),
            "d/sub/b.txt".to_string(),
        ])
    );

    // Every recursive entry under a subdirectory has a shallow counterpart
    // somewhere up its ancestry.
    for path in &deep {
        let top = path.split('/').take(2).collect::<Vec<_>>().join("/");
        assert!(shallow.contains(&top), "{path} has no shallow ancestor");
    }

    assert!(matches!(
        fs.list_contents("missing", false),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn listing_errors_name_the_directory_being_read() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);
    let opts = WriteOptions::default();
    fs.write("d/a.txt", b"1", &opts).unwrap();
    fs.create_dir("d/sub", &opts).unwrap();

    let locked = tmp.path().join("d/sub");
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
    if std::fs::read_dir(&locked).is_ok() {
        // Privileged runs ignore the mode bits, so the failure cannot be
        // provoked this way.
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let result: Result<Vec<_>, _> = fs.list_contents("d", true).unwrap().collect();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
    match result {
        Err(StorageError::PermissionDenied { path, operation }) => {
            assert_eq!(path, "d/sub");
            assert_eq!(operation, "list_contents");
        }
        other => panic!("expected PermissionDenied naming d/sub, got {other:?}"),
    }
}

#[test]
fn metadata_reports_both_kinds() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);

    fs.write("d/a.txt", b"12345", &WriteOptions::default()).unwrap();

    let file = fs.metadata("d/a.txt").unwrap();
    assert!(file.is_file());
    assert_eq!(file.size, Some(5));
    assert!(file.timestamp.is_some());

    let dir = fs.metadata("d").unwrap();
    assert!(dir.is_dir());

    assert!(matches!(
        fs.metadata("missing"),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn visibility_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);

    fs.write(
        "secret.txt",
        b"x",
        &WriteOptions::with_visibility(Visibility::Private),
    )
    .unwrap();
    assert_eq!(
        fs.metadata("secret.txt").unwrap().visibility,
        Some(Visibility::Private)
    );

    fs.set_visibility("secret.txt", Visibility::Public).unwrap();
    assert_eq!(
        fs.metadata("secret.txt").unwrap().visibility,
        Some(Visibility::Public)
    );

    assert!(matches!(
        fs.set_visibility("missing", Visibility::Public),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn custom_permission_map_applies() {
    let tmp = tempfile::tempdir().unwrap();
    let map = PermissionMap {
        file_public: 0o640,
        file_private: 0o600,
        dir_public: 0o750,
        dir_private: 0o700,
    };
    let mut fs =
        LocalAdapter::with_config(tmp.path(), map, LinkHandling::default()).unwrap();

    fs.write(
        "a.txt",
        b"x",
        &WriteOptions::with_visibility(Visibility::Public),
    )
    .unwrap();
    // 0o640 still carries the group-read bit, so it reads back as public.
    assert_eq!(
        fs.metadata("a.txt").unwrap().visibility,
        Some(Visibility::Public)
    );
}

#[test]
fn symlink_policy_disallow_fails_traversal() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);
    fs.write("real.txt", b"x", &WriteOptions::default()).unwrap();
    std::os::unix::fs::symlink(tmp.path().join("real.txt"), tmp.path().join("link")).unwrap();

    let result: Result<Vec<_>, _> = fs.list_contents("", false).unwrap().collect();
    assert!(matches!(
        result,
        Err(StorageError::NotSupported {
            operation: "list_contents",
            ..
        })
    ));
}

#[test]
fn symlink_policy_skip_omits_links() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs =
        LocalAdapter::with_config(tmp.path(), PermissionMap::default(), LinkHandling::SKIP)
            .unwrap();
    fs.write("real.txt", b"x", &WriteOptions::default()).unwrap();
    std::os::unix::fs::symlink(tmp.path().join("real.txt"), tmp.path().join("link")).unwrap();

    assert_eq!(
        paths(&mut fs, "", false),
        BTreeSet::from(["real.txt".to_string()])
    );
}

#[test]
fn symlink_policy_allow_reports_links() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs =
        LocalAdapter::with_config(tmp.path(), PermissionMap::default(), LinkHandling::ALLOW)
            .unwrap();
    fs.write("real.txt", b"x", &WriteOptions::default()).unwrap();
    std::os::unix::fs::symlink(tmp.path().join("real.txt"), tmp.path().join("link")).unwrap();

    let entries: Vec<_> = fs
        .list_contents("", false)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let link = entries.iter().find(|e| e.path == "link").unwrap();
    assert_eq!(link.entry_type, EntryType::Symlink);
    assert_eq!(link.size, None);
}

#[test]
fn traversal_is_rejected_before_touching_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fs = adapter(&tmp);

    for path in ["../escape.txt", "a/../../escape.txt"] {
        assert!(matches!(
            fs.write(path, b"x", &WriteOptions::default()),
            Err(StorageError::InvalidPath { .. })
        ));
    }
    assert!(!tmp.path().parent().unwrap().join("escape.txt").exists());
}
