//! End-to-end scenarios against the in-memory fake drive.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use std::ffi::OsStr;

use bytes::Bytes;
use drivefs::drive::fake::{RenameCall, make_text_file};
use drivefs::drive::{Change, ChangeStats};
use drivefs::fs::system::ROOT_HANDLE;
use drivefs::fs::{Fs as _, FsError, OpenFlags};

use common::{ino_of, new_fs, read_to_string, readdir_names};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_and_read() {
    let (_drive, fs) = new_fs(false);

    assert_eq!(
        readdir_names(&fs, ROOT_HANDLE).await,
        ["dir one", "dir two", "file one"]
    );

    let dir_one = ino_of(&fs, ROOT_HANDLE, "dir one").await;
    assert!(readdir_names(&fs, dir_one).await.is_empty());

    let dir_two = ino_of(&fs, ROOT_HANDLE, "dir two").await;
    assert_eq!(readdir_names(&fs, dir_two).await, ["file two"]);

    let file_one = ino_of(&fs, ROOT_HANDLE, "file one").await;
    assert_eq!(read_to_string(&fs, file_one).await, "content for file_one_id");

    let file_two = ino_of(&fs, dir_two, "file two").await;
    assert_eq!(read_to_string(&fs, file_two).await, "content for file_two_id");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_empty_then_close() {
    let (_drive, fs) = new_fs(true);

    let dir_two = ino_of(&fs, ROOT_HANDLE, "dir two").await;
    let created = fs
        .create(dir_two, OsStr::new("amanda.txt"), 0o100_644, OpenFlags::WRONLY)
        .await
        .unwrap();
    fs.release(created.attr.ino, created.fh).await.unwrap();

    assert_eq!(
        readdir_names(&fs, dir_two).await,
        ["amanda.txt", "file two"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_write_close_read_back() {
    let (_drive, fs) = new_fs(true);

    let dir_two = ino_of(&fs, ROOT_HANDLE, "dir two").await;
    let created = fs
        .create(dir_two, OsStr::new("amanda.txt"), 0o100_644, OpenFlags::WRONLY)
        .await
        .unwrap();
    let ino = created.attr.ino;

    let written = fs
        .write(ino, created.fh, 0, Bytes::from_static(b"written for amanda"))
        .await
        .unwrap();
    assert_eq!(written, 18);

    // A stat between write and close must already report the written size.
    let attr = fs.getattr(ino).await.unwrap();
    assert_eq!(attr.size, 18);

    fs.flush(ino, created.fh).await.unwrap();
    fs.release(ino, created.fh).await.unwrap();

    assert_eq!(read_to_string(&fs, ino).await, "written for amanda");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rename_same_parent() {
    let (drive, fs) = new_fs(true);

    fs.rename(
        ROOT_HANDLE,
        OsStr::new("file one"),
        ROOT_HANDLE,
        OsStr::new("file one.one"),
    )
    .await
    .unwrap();

    assert_eq!(
        readdir_names(&fs, ROOT_HANDLE).await,
        ["dir one", "dir two", "file one.one"]
    );

    // Same-parent renames must not pass parent ids to the remote.
    assert_eq!(
        drive.rename_calls(),
        vec![RenameCall {
            id: "file_one_id".into(),
            new_name: Some("file one.one".into()),
            old_parent_id: None,
            new_parent_id: None,
        }]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rename_cross_parent() {
    let (drive, fs) = new_fs(true);

    fs.rename(
        ROOT_HANDLE,
        OsStr::new("file one"),
        ROOT_HANDLE,
        OsStr::new("file one.one"),
    )
    .await
    .unwrap();

    let dir_one = ino_of(&fs, ROOT_HANDLE, "dir one").await;
    assert!(readdir_names(&fs, dir_one).await.is_empty());

    fs.rename(
        ROOT_HANDLE,
        OsStr::new("file one.one"),
        dir_one,
        OsStr::new("file one.one"),
    )
    .await
    .unwrap();

    assert_eq!(readdir_names(&fs, ROOT_HANDLE).await, ["dir one", "dir two"]);
    assert_eq!(readdir_names(&fs, dir_one).await, ["file one.one"]);

    let cross = drive.rename_calls().pop().unwrap();
    assert_eq!(
        cross,
        RenameCall {
            id: "file_one_id".into(),
            new_name: Some("file one.one".into()),
            old_parent_id: Some("root".into()),
            new_parent_id: Some("dir_one_id".into()),
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_then_change_feed_create() {
    let (_drive, fs) = new_fs(true);
    let system = fs.system().clone();

    let dir_two = ino_of(&fs, ROOT_HANDLE, "dir two").await;
    assert_eq!(readdir_names(&fs, dir_two).await, ["file two"]);

    fs.unlink(ROOT_HANDLE, OsStr::new("file one")).await.unwrap();
    assert_eq!(readdir_names(&fs, ROOT_HANDLE).await, ["dir one", "dir two"]);

    let mut stats = ChangeStats::default();
    system.apply_change(
        &Change {
            id: "file_three_id".into(),
            removed: false,
            record: Some(make_text_file("file_three_id", "file three", "dir_two_id")),
        },
        &mut stats,
    );
    assert_eq!(
        stats,
        ChangeStats {
            changed: 1,
            ignored: 0
        }
    );

    assert_eq!(readdir_names(&fs, dir_two).await, ["file three", "file two"]);
    let file_three = ino_of(&fs, dir_two, "file three").await;
    assert_eq!(
        read_to_string(&fs, file_three).await,
        "content for file_three_id"
    );

    system.apply_change(
        &Change {
            id: "file_three_id".into(),
            removed: true,
            record: None,
        },
        &mut stats,
    );
    assert_eq!(
        stats,
        ChangeStats {
            changed: 2,
            ignored: 0
        }
    );

    assert_eq!(readdir_names(&fs, dir_two).await, ["file two"]);
    assert!(matches!(
        fs.lookup(dir_two, OsStr::new("file three")).await,
        Err(FsError::NotFound)
    ));
    assert!(system.indices_consistent());
}
