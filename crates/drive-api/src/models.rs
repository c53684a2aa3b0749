//! Serde models for the Drive v3 wire format.
//!
//! Numeric fields the API encodes as strings (`size`, `version`) are kept as
//! strings here; callers convert them at their own boundary.

use serde::{Deserialize, Serialize};

/// File metadata record.
///
/// Every field is optional because the API only returns what the request's
/// `fields` selector asked for.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveFile {
    pub id: Option<String>,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub file_extension: Option<String>,
    /// RFC 3339 timestamp.
    pub created_time: Option<String>,
    /// RFC 3339 timestamp.
    pub modified_time: Option<String>,
    /// Byte size, encoded as a decimal string.
    pub size: Option<String>,
    /// Monotonically increasing revision counter, encoded as a decimal string.
    pub version: Option<String>,
    pub parents: Option<Vec<String>>,
    pub owned_by_me: Option<bool>,
    pub trashed: Option<bool>,
}

/// One page of a file listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileList {
    pub next_page_token: Option<String>,
    pub files: Vec<DriveFile>,
}

/// One entry of the incremental change feed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeItem {
    pub file_id: Option<String>,
    pub removed: Option<bool>,
    /// Absent when the file was removed or access was lost.
    pub file: Option<DriveFile>,
}

/// One page of the change feed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeList {
    pub new_start_page_token: Option<String>,
    pub next_page_token: Option<String>,
    pub changes: Vec<ChangeItem>,
}

/// Response of `changes/startPageToken`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPageToken {
    pub start_page_token: String,
}

/// Error envelope the API wraps failures in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ErrorBody {
    pub message: String,
}

/// The `installed` section of a downloaded OAuth client secret file.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InstalledSecret {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ClientSecretFile {
    pub installed: InstalledSecret,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Persisted token cache, compatible across runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct CachedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp after which `access_token` is stale.
    #[serde(default)]
    pub expires_at: Option<u64>,
}
