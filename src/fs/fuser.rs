//! Adapter between `fuser` callbacks and the [`Fs`] trait.
//!
//! Each kernel request is spawned as a task on the tokio runtime and replied
//! to from there, so slow remote calls never stall the fuser dispatch thread.

use std::ffi::OsStr;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use fuser::{
    ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen,
    ReplyWrite, Request, TimeOrNow,
};
use tracing::Instrument as _;
use tracing::debug;

use crate::fs::{Fs, NodeAttr, OpenFlags};

const ATTR_TTL: Duration = Duration::from_secs(1);
const BLOCK_SIZE: u32 = 4096;

/// Adapts any [`Fs`] to the fuser callback interface.
pub struct FuserAdapter<F: Fs> {
    fs: Arc<F>,
    runtime: tokio::runtime::Handle,
    /// `(uid, gid)` reported as the owner of every node.
    owner: (u32, u32),
}

impl<F: Fs> FuserAdapter<F> {
    pub fn new(fs: F, runtime: tokio::runtime::Handle, owner: (u32, u32)) -> Self {
        Self {
            fs: Arc::new(fs),
            runtime,
            owner,
        }
    }

    fn spawn<Fut>(&self, span: tracing::Span, f: impl FnOnce(Arc<F>) -> Fut + Send + 'static)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(f(fs).instrument(span));
    }
}

impl<F: Fs> fuser::Filesystem for FuserAdapter<F> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_owned();
        let span = tracing::debug_span!("FuserAdapter::lookup", parent, ?name);
        let owner = self.owner;
        self.spawn(span, move |fs| async move {
            match fs.lookup(parent, &name).await {
                Ok(attr) => {
                    let f_attr = to_attr(attr, owner);
                    debug!(?f_attr, "replying...");
                    reply.entry(&ATTR_TTL, &f_attr, 0);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let span = tracing::debug_span!("FuserAdapter::getattr", ino);
        let owner = self.owner;
        self.spawn(span, move |fs| async move {
            match fs.getattr(ino).await {
                Ok(attr) => reply.attr(&ATTR_TTL, &to_attr(attr, owner)),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors the fuser setattr API")]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let span = tracing::debug_span!("FuserAdapter::setattr", ino, ?size);
        let owner = self.owner;
        self.spawn(span, move |fs| async move {
            match fs.setattr_size(ino, size).await {
                Ok(attr) => reply.attr(&ATTR_TTL, &to_attr(attr, owner)),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let span = tracing::debug_span!("FuserAdapter::readdir", ino, offset);
        self.spawn(span, move |fs| async move {
            let entries = match fs.readdir(ino).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                    return;
                }
            };

            #[expect(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                reason = "fuser offsets are non-negative and fit usize on 64-bit targets"
            )]
            for (i, entry) in entries.iter().enumerate().skip(offset as usize) {
                let kind = if entry.is_dir {
                    fuser::FileType::Directory
                } else {
                    fuser::FileType::RegularFile
                };
                let Ok(next): Result<i64, _> = (i + 1).try_into() else {
                    reply.error(libc::EIO);
                    return;
                };
                if reply.add(entry.ino, next, kind, &entry.name) {
                    debug!("reply buffer full, stopping readdir");
                    break;
                }
            }
            reply.ok();
        });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let flags = OpenFlags::from(flags);
        let span = tracing::debug_span!("FuserAdapter::open", ino, ?flags);
        self.spawn(span, move |fs| async move {
            match fs.open(ino, flags).await {
                Ok(opened) => {
                    let open_flags = if opened.keep_cache {
                        fuser::consts::FOPEN_KEEP_CACHE
                    } else {
                        0
                    };
                    debug!(fh = opened.fh, "replying...");
                    reply.opened(opened.fh, open_flags);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors the fuser read API")]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let span = tracing::debug_span!("FuserAdapter::read", ino, fh, offset, size);
        self.spawn(span, move |fs| async move {
            match fs.read(ino, fh, offset.cast_unsigned(), size).await {
                Ok(data) => {
                    debug!(read_bytes = data.len(), "replying...");
                    reply.data(&data);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors the fuser write API")]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let data = Bytes::copy_from_slice(data);
        let span = tracing::debug_span!("FuserAdapter::write", ino, fh, offset, len = data.len());
        self.spawn(span, move |fs| async move {
            match fs.write(ino, fh, offset.cast_unsigned(), data).await {
                Ok(written) => reply.written(written),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let span = tracing::debug_span!("FuserAdapter::flush", ino, fh);
        self.spawn(span, move |fs| async move {
            match fs.flush(ino, fh).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let span = tracing::debug_span!("FuserAdapter::release", ino, fh);
        self.spawn(span, move |fs| async move {
            match fs.release(ino, fh).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let name = name.to_owned();
        let flags = OpenFlags::from(flags);
        let span = tracing::debug_span!("FuserAdapter::create", parent, ?name);
        let owner = self.owner;
        self.spawn(span, move |fs| async move {
            match fs.create(parent, &name, mode, flags).await {
                Ok(created) => {
                    reply.created(&ATTR_TTL, &to_attr(created.attr, owner), 0, created.fh, 0);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = name.to_owned();
        let span = tracing::debug_span!("FuserAdapter::mkdir", parent, ?name);
        let owner = self.owner;
        self.spawn(span, move |fs| async move {
            match fs.mkdir(parent, &name, mode).await {
                Ok(attr) => reply.entry(&ATTR_TTL, &to_attr(attr, owner), 0),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name = name.to_owned();
        let newname = newname.to_owned();
        let span = tracing::debug_span!("FuserAdapter::rename", parent, ?name, newparent, ?newname);
        self.spawn(span, move |fs| async move {
            match fs.rename(parent, &name, newparent, &newname).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_owned();
        let span = tracing::debug_span!("FuserAdapter::unlink", parent, ?name);
        self.spawn(span, move |fs| async move {
            match fs.unlink(parent, &name).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_owned();
        let span = tracing::debug_span!("FuserAdapter::rmdir", parent, ?name);
        self.spawn(span, move |fs| async move {
            match fs.unlink(parent, &name).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }
}

/// Convert a [`NodeAttr`] into what fuser replies with.
fn to_attr(attr: NodeAttr, owner: (u32, u32)) -> fuser::FileAttr {
    let (uid, gid) = owner;
    fuser::FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: if attr.is_dir {
            fuser::FileType::Directory
        } else {
            fuser::FileType::RegularFile
        },
        perm: attr.perm,
        nlink: if attr.is_dir { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}
