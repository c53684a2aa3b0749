//! Rust client for the Google Drive v3 REST API.
//!
//! This crate only speaks HTTP: it knows the wire models, the endpoints, and
//! how to keep an OAuth access token fresh. Everything filesystem-shaped
//! lives in the `drivefs` crate on top of this one.

mod auth;
mod client;
mod error;
mod models;

pub use auth::Authenticator;
pub use client::DriveApi;
pub use error::ApiError;
pub use models::{ChangeItem, ChangeList, DriveFile, FileList, StartPageToken};

/// MIME type the API uses to mark folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// OAuth scope for read-only access to the user's drive.
pub const SCOPE_READONLY: &str = "https://www.googleapis.com/auth/drive.readonly";

/// OAuth scope for full access to the user's drive.
pub const SCOPE_FULL: &str = "https://www.googleapis.com/auth/drive";
