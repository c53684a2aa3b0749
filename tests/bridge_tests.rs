//! Kernel-bridge semantics: open matrix, mount guards, magic paths.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use std::ffi::OsStr;

use drivefs::drive::fake::make_text_file;
use drivefs::fs::bridge::DUMP_NAME;
use drivefs::fs::system::{DUMP_HANDLE, ROOT_HANDLE};
use drivefs::fs::{Fs as _, FsError, OpenFlags};

use common::{ino_of, initial_records, new_fs, new_fs_with_records, readdir_names};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_matrix_rejects_unsupported_combinations() {
    let (_drive, fs) = new_fs(true);
    let file_one = ino_of(&fs, ROOT_HANDLE, "file one").await;

    assert!(matches!(
        fs.open(file_one, OpenFlags::RDWR).await,
        Err(FsError::AccessDenied)
    ));
    assert!(matches!(
        fs.open(file_one, OpenFlags::WRONLY).await,
        Err(FsError::AccessDenied)
    ));
    assert!(matches!(
        fs.open(file_one, OpenFlags::RDONLY | OpenFlags::EXCL).await,
        Err(FsError::NotSupported)
    ));

    let reader = fs.open(file_one, OpenFlags::RDONLY).await.unwrap();
    assert!(reader.keep_cache, "read-only opens keep the kernel cache");
    fs.release(file_one, reader.fh).await.unwrap();

    let writer = fs
        .open(file_one, OpenFlags::WRONLY | OpenFlags::TRUNC)
        .await
        .unwrap();
    assert!(!writer.keep_cache);
    fs.release(file_one, writer.fh).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_only_mount_rejects_every_mutation() {
    let (_drive, fs) = new_fs(false);
    let file_one = ino_of(&fs, ROOT_HANDLE, "file one").await;

    assert!(matches!(
        fs.open(file_one, OpenFlags::WRONLY | OpenFlags::TRUNC).await,
        Err(FsError::Perm)
    ));
    assert!(matches!(
        fs.setattr_size(file_one, Some(0)).await,
        Err(FsError::Perm)
    ));
    assert!(matches!(
        fs.create(ROOT_HANDLE, OsStr::new("x.txt"), 0o100_644, OpenFlags::WRONLY)
            .await,
        Err(FsError::NotSupported)
    ));
    assert!(matches!(
        fs.mkdir(ROOT_HANDLE, OsStr::new("newdir"), 0o755).await,
        Err(FsError::NotSupported)
    ));
    assert!(matches!(
        fs.rename(
            ROOT_HANDLE,
            OsStr::new("file one"),
            ROOT_HANDLE,
            OsStr::new("file 1")
        )
        .await,
        Err(FsError::NotSupported)
    ));
    assert!(matches!(
        fs.unlink(ROOT_HANDLE, OsStr::new("file one")).await,
        Err(FsError::NotSupported)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn directory_only_operations_reject_files() {
    let (_drive, fs) = new_fs(true);
    let file_one = ino_of(&fs, ROOT_HANDLE, "file one").await;

    assert!(matches!(
        fs.readdir(file_one).await,
        Err(FsError::NotSupported)
    ));
    assert!(matches!(
        fs.lookup(file_one, OsStr::new("child")).await,
        Err(FsError::NotSupported)
    ));
    assert!(matches!(
        fs.create(file_one, OsStr::new("x.txt"), 0o100_644, OpenFlags::WRONLY)
            .await,
        Err(FsError::NotSupported)
    ));
    assert!(matches!(
        fs.mkdir(file_one, OsStr::new("d"), 0o755).await,
        Err(FsError::NotSupported)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn opening_a_directory_yields_a_listing_only_handle() {
    let (_drive, fs) = new_fs(false);
    let dir_one = ino_of(&fs, ROOT_HANDLE, "dir one").await;

    let opened = fs.open(dir_one, OpenFlags::RDONLY).await.unwrap();
    assert_eq!(opened.fh, 0);
    assert!(fs.readdir(dir_one).await.is_ok());
    // The sentinel handle reads nothing.
    assert!(matches!(
        fs.read(dir_one, opened.fh, 0, 16).await,
        Err(FsError::Stale)
    ));
    fs.release(dir_one, opened.fh).await.unwrap();

    assert!(matches!(
        fs.open(dir_one, OpenFlags::WRONLY).await,
        Err(FsError::NotSupported)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lookup_of_missing_child_is_not_found() {
    let (_drive, fs) = new_fs(false);
    assert!(matches!(
        fs.lookup(ROOT_HANDLE, OsStr::new("no such thing")).await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mkdir_then_list() {
    let (_drive, fs) = new_fs(true);
    let attr = fs.mkdir(ROOT_HANDLE, OsStr::new("newdir"), 0o755).await.unwrap();
    assert!(attr.is_dir);

    assert_eq!(
        readdir_names(&fs, ROOT_HANDLE).await,
        ["dir one", "dir two", "file one", "newdir"]
    );
    let newdir = ino_of(&fs, ROOT_HANDLE, "newdir").await;
    assert_eq!(newdir, attr.ino);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_with_directory_mode_creates_a_directory() {
    let (_drive, fs) = new_fs(true);
    let mode = (libc::S_IFDIR as u32) | 0o755;
    let created = fs
        .create(ROOT_HANDLE, OsStr::new("as-dir"), mode, OpenFlags::WRONLY)
        .await
        .unwrap();
    assert!(created.attr.is_dir);
    fs.release(created.attr.ino, created.fh).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dump_lists_the_cached_tree() {
    let (_drive, fs) = new_fs(false);

    let dump = fs.lookup(ROOT_HANDLE, OsStr::new(DUMP_NAME)).await.unwrap();
    assert_eq!(dump.ino, DUMP_HANDLE);
    assert!(!dump.is_dir);

    let opened = fs.open(DUMP_HANDLE, OpenFlags::RDONLY).await.unwrap();
    let text_bytes = fs.read(DUMP_HANDLE, opened.fh, 0, 1 << 20).await.unwrap();
    let text = String::from_utf8(text_bytes.to_vec()).unwrap();
    fs.release(DUMP_HANDLE, opened.fh).await.unwrap();

    // One line per cached node, with a marker where children are unlisted.
    assert!(text.contains("root"));
    assert!(text.contains("file_one_id"));
    assert!(text.contains("<unknown children>"));
    // The magic file itself is not part of the tree.
    assert!(!text.contains(DUMP_NAME));

    let attr = fs.getattr(DUMP_HANDLE).await.unwrap();
    assert_eq!(attr.size as usize, text.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dump_shrinks_when_a_node_is_trashed() {
    let (_drive, fs) = new_fs(true);
    let _ = readdir_names(&fs, ROOT_HANDLE).await;

    fs.unlink(ROOT_HANDLE, OsStr::new("file one")).await.unwrap();
    let text = fs.system().dump_text();
    assert!(!text.contains("file_one_id"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_sibling_names_resolve_to_one_of_them() {
    let mut records = initial_records();
    records.push(make_text_file("dup_a_id", "dup.txt", "root"));
    records.push(make_text_file("dup_b_id", "dup.txt", "root"));
    let (_drive, fs) = new_fs_with_records(false, records);

    // First match wins; either sibling is acceptable, but the answer must be
    // one of them.
    let attr = fs.lookup(ROOT_HANDLE, OsStr::new("dup.txt")).await.unwrap();
    let a = fs.system().node_by_id("dup_a_id").unwrap().handle();
    let b = fs.system().node_by_id("dup_b_id").unwrap().handle();
    assert!(attr.ino == a || attr.ino == b);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_inode_is_not_found() {
    let (_drive, fs) = new_fs(false);
    assert!(matches!(fs.getattr(9999).await, Err(FsError::NotFound)));
    assert!(matches!(
        fs.readdir(9999).await,
        Err(FsError::NotFound | FsError::NotSupported)
    ));
}
