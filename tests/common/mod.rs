#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use drivefs::config::MountConfig;
use drivefs::drive::fake::{FakeDrive, make_dir, make_text_file};
use drivefs::drive::NodeRecord;
use drivefs::fs::system::ROOT_HANDLE;
use drivefs::fs::{CacheInvalidator, DriveFs, Fs as _, OpenFlags};

/// The canonical initial remote state shared by most tests.
pub fn initial_records() -> Vec<NodeRecord> {
    vec![
        make_dir("root", "", ""),
        make_dir("dir_one_id", "dir one", "root"),
        make_dir("dir_two_id", "dir two", "root"),
        make_text_file("file_one_id", "file one", "root"),
        make_text_file("file_two_id", "file two", "dir_two_id"),
    ]
}

pub fn mount_config(writeable: bool) -> MountConfig {
    MountConfig {
        writeable,
        owned_only: true,
        poll_interval: Duration::from_millis(10),
    }
}

/// Build a filesystem over a fake drive seeded with [`initial_records`].
pub fn new_fs(writeable: bool) -> (Arc<FakeDrive>, DriveFs) {
    new_fs_with_records(writeable, initial_records())
}

pub fn new_fs_with_records(writeable: bool, records: Vec<NodeRecord>) -> (Arc<FakeDrive>, DriveFs) {
    let drive = Arc::new(FakeDrive::new(records));
    let fs = DriveFs::new(drive.clone(), mount_config(writeable));
    (drive, fs)
}

/// An invalidator that records every hinted handle.
#[derive(Default)]
pub struct RecordingInvalidator {
    pub handles: Arc<Mutex<Vec<u64>>>,
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, handle: u64) {
        self.handles.lock().unwrap().push(handle);
    }
}

/// Resolve a child inode by name.
pub async fn ino_of(fs: &DriveFs, parent: u64, name: &str) -> u64 {
    fs.lookup(parent, OsStr::new(name))
        .await
        .unwrap_or_else(|e| panic!("lookup of {name:?} failed: {e}"))
        .ino
}

/// Directory listing as a sorted list of names.
pub async fn readdir_names(fs: &DriveFs, ino: u64) -> Vec<String> {
    fs.readdir(ino)
        .await
        .expect("readdir failed")
        .into_iter()
        .map(|entry| entry.name)
        .collect()
}

/// Full open/read/release cycle returning the file's content.
pub async fn read_to_string(fs: &DriveFs, ino: u64) -> String {
    let opened = fs.open(ino, OpenFlags::RDONLY).await.expect("open failed");
    let data = fs
        .read(ino, opened.fh, 0, 64 * 1024)
        .await
        .expect("read failed");
    fs.release(ino, opened.fh).await.expect("release failed");
    String::from_utf8(data.to_vec()).expect("content is not utf-8")
}

/// Load the root's children so later assertions see a populated tree.
pub async fn load_root(fs: &DriveFs) {
    let _ = readdir_names(fs, ROOT_HANDLE).await;
}
