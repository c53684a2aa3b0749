//! Change-application protocol tests.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use std::ffi::OsStr;
use std::sync::Arc;

use drivefs::drive::fake::{FakeDrive, make_dir, make_text_file};
use drivefs::drive::{Change, ChangeStats, NodeRecord};
use drivefs::fs::system::ROOT_HANDLE;
use drivefs::fs::{DriveFs, Fs as _, FsError};

use common::{
    RecordingInvalidator, ino_of, initial_records, load_root, mount_config, new_fs, readdir_names,
};

fn updated(record: NodeRecord) -> Change {
    Change {
        id: record.id.clone(),
        removed: false,
        record: Some(record),
    }
}

fn removed(id: &str) -> Change {
    Change {
        id: id.to_owned(),
        removed: true,
        record: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_renames_in_place() {
    let (_drive, fs) = new_fs(false);
    load_root(&fs).await;

    let mut stats = ChangeStats::default();
    fs.system().apply_change(
        &updated(make_text_file("file_one_id", "renamed.txt", "root")),
        &mut stats,
    );
    assert_eq!(stats.changed, 1);

    assert_eq!(
        readdir_names(&fs, ROOT_HANDLE).await,
        ["dir one", "dir two", "renamed.txt"]
    );
    assert!(matches!(
        fs.lookup(ROOT_HANDLE, OsStr::new("file one")).await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_reparents_across_loaded_dirs() {
    let (_drive, fs) = new_fs(false);
    load_root(&fs).await;
    let dir_two = ino_of(&fs, ROOT_HANDLE, "dir two").await;
    let _ = readdir_names(&fs, dir_two).await;

    let mut stats = ChangeStats::default();
    fs.system().apply_change(
        &updated(make_text_file("file_one_id", "file one", "dir_two_id")),
        &mut stats,
    );
    assert_eq!(stats.changed, 1);

    assert_eq!(readdir_names(&fs, ROOT_HANDLE).await, ["dir one", "dir two"]);
    assert_eq!(readdir_names(&fs, dir_two).await, ["file one", "file two"]);
    assert!(fs.system().indices_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trashed_record_is_a_removal() {
    let (_drive, fs) = new_fs(false);
    load_root(&fs).await;

    let mut record = make_text_file("file_one_id", "file one", "root");
    record.trashed = true;
    let mut stats = ChangeStats::default();
    fs.system().apply_change(&updated(record), &mut stats);

    assert_eq!(stats.changed, 1);
    assert!(fs.system().node_by_id("file_one_id").is_none());
    assert_eq!(readdir_names(&fs, ROOT_HANDLE).await, ["dir one", "dir two"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn record_turning_excluded_is_a_removal() {
    let (_drive, fs) = new_fs(false);
    load_root(&fs).await;
    let mut stats = ChangeStats::default();

    // A rename can introduce a path separator...
    fs.system().apply_change(
        &updated(make_text_file("file_one_id", "has/slash", "root")),
        &mut stats,
    );
    assert!(fs.system().node_by_id("file_one_id").is_none());

    // ...and ownership can be handed away.
    let mut record = make_text_file("file_two_id", "file two", "dir_two_id");
    record.owned_by_me = false;
    let dir_two = ino_of(&fs, ROOT_HANDLE, "dir two").await;
    let _ = readdir_names(&fs, dir_two).await;
    fs.system().apply_change(&updated(record), &mut stats);

    assert_eq!(stats.changed, 2);
    assert!(fs.system().node_by_id("file_two_id").is_none());
    assert!(readdir_names(&fs, dir_two).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_ignored_until_some_parent_has_listed_children() {
    let (_drive, fs) = new_fs(false);
    load_root(&fs).await;

    // dir two is cached but its children were never listed: out of scope.
    let mut stats = ChangeStats::default();
    fs.system().apply_change(
        &updated(make_text_file("file_three_id", "file three", "dir_two_id")),
        &mut stats,
    );
    assert_eq!(
        stats,
        ChangeStats {
            changed: 0,
            ignored: 1
        }
    );
    assert!(fs.system().node_by_id("file_three_id").is_none());

    // Ignoring was safe: a listing materializes the node from the remote.
    // (The fake drive doesn't know this record, so list through the feed
    // instead once the parent is ready.)
    let dir_two = ino_of(&fs, ROOT_HANDLE, "dir two").await;
    let _ = readdir_names(&fs, dir_two).await;
    fs.system().apply_change(
        &updated(make_text_file("file_three_id", "file three", "dir_two_id")),
        &mut stats,
    );
    assert_eq!(
        stats,
        ChangeStats {
            changed: 1,
            ignored: 1
        }
    );
    assert_eq!(readdir_names(&fs, dir_two).await, ["file three", "file two"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removal_of_unknown_id_is_ignored() {
    let (_drive, fs) = new_fs(false);
    load_root(&fs).await;

    let mut stats = ChangeStats::default();
    fs.system().apply_change(&removed("never_heard_of_it"), &mut stats);
    assert_eq!(
        stats,
        ChangeStats {
            changed: 0,
            ignored: 1
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_update_hints_kernel_invalidation() {
    let invalidator = RecordingInvalidator::default();
    let handles = Arc::clone(&invalidator.handles);

    let drive = Arc::new(FakeDrive::new(initial_records()));
    let fs = DriveFs::with_invalidator(drive, mount_config(false), Box::new(invalidator));
    load_root(&fs).await;
    let file_one = ino_of(&fs, ROOT_HANDLE, "file one").await;

    let mut stats = ChangeStats::default();
    fs.system().apply_change(
        &updated(make_text_file("file_one_id", "file one", "root")),
        &mut stats,
    );

    assert!(handles.lock().unwrap().contains(&file_one));

    // Directory metadata updates carry no content to invalidate.
    handles.lock().unwrap().clear();
    fs.system().apply_change(
        &updated(make_dir("dir_one_id", "dir one", "root")),
        &mut stats,
    );
    assert!(handles.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dir_flag_follows_the_record() {
    let (_drive, fs) = new_fs(false);
    load_root(&fs).await;

    let node = fs.system().node_by_id("file_one_id").unwrap();
    assert!(!node.is_dir());

    let mut stats = ChangeStats::default();
    fs.system().apply_change(
        &updated(make_dir("file_one_id", "file one", "root")),
        &mut stats,
    );
    assert!(node.is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_changes_drain_through_the_feed() {
    let (drive, fs) = new_fs(false);
    load_root(&fs).await;
    let dir_two = ino_of(&fs, ROOT_HANDLE, "dir two").await;
    let _ = readdir_names(&fs, dir_two).await;

    drive.queue_change(updated(make_text_file(
        "file_three_id",
        "file three",
        "dir_two_id",
    )));
    drive.queue_change(removed("file_three_id"));

    let (stats, result) = fs.system().poll_changes_once().await;
    assert!(result.is_ok());
    assert_eq!(
        stats,
        ChangeStats {
            changed: 2,
            ignored: 0
        }
    );
    assert_eq!(readdir_names(&fs, dir_two).await, ["file two"]);
    assert!(fs.system().indices_consistent());
}
