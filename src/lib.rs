//! drivefs: mount a remote cloud drive as a local filesystem, without syncing.
//!
//! The library is split in two halves. [`drive`] abstracts the backing object
//! store behind the [`drive::RemoteDrive`] trait, with a live REST-backed
//! implementation and an in-memory fake. [`fs`] owns the cached node tree,
//! the phantom-file machinery that materializes remote content into local
//! scratch files, and the FUSE bridge.

pub mod config;
pub mod drive;
pub mod fs;
pub mod trc;
