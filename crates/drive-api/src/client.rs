//! The Drive v3 endpoint surface used by the filesystem.

use std::sync::Arc;

use tokio::io::{AsyncSeekExt as _, AsyncWriteExt as _};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::ApiError;
use crate::models::{ChangeList, DriveFile, ErrorEnvelope, FileList, StartPageToken};
use crate::{Authenticator, FOLDER_MIME_TYPE};

const BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";

/// Metadata fields requested for every file record.
const FILE_FIELDS: &str = "id, name, ownedByMe, createdTime, modifiedTime, size, version, \
                           parents, fileExtension, mimeType, trashed";

/// How many records to request per listing page.
const PAGE_SIZE: u32 = 1000;

/// A connected Drive API client. Cheap to clone.
#[derive(Clone)]
pub struct DriveApi {
    http: reqwest::Client,
    auth: Arc<Authenticator>,
    base: String,
    upload_base: String,
}

impl DriveApi {
    #[must_use]
    pub fn new(auth: Authenticator) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth: Arc::new(auth),
            base: BASE_URL.to_owned(),
            upload_base: UPLOAD_URL.to_owned(),
        }
    }

    /// Override both endpoint bases. Intended for tests against a stub server.
    #[must_use]
    pub fn with_base_urls(mut self, base: &str, upload_base: &str) -> Self {
        self.base = base.trim_end_matches('/').to_owned();
        self.upload_base = upload_base.trim_end_matches('/').to_owned();
        self
    }

    async fn bearer(&self) -> Result<String, ApiError> {
        self.auth.access_token().await
    }

    /// Decode a response, converting non-2xx statuses into [`ApiError::Status`].
    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let body = resp.bytes().await.unwrap_or_default();
        let message = serde_json::from_slice::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        Err(ApiError::Status { status, message })
    }

    /// Fetch one file's metadata.
    #[instrument(skip(self))]
    pub async fn get_file(&self, id: &str) -> Result<DriveFile, ApiError> {
        let resp = self
            .http
            .get(format!("{}/files/{id}", self.base))
            .bearer_auth(self.bearer().await?)
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// List one page of files matching `query`.
    #[instrument(skip(self))]
    pub async fn list_files(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, ApiError> {
        let fields = format!("nextPageToken, files({FILE_FIELDS})");
        let page_size = PAGE_SIZE.to_string();
        let mut req = self
            .http
            .get(format!("{}/files", self.base))
            .bearer_auth(self.bearer().await?)
            .query(&[
                ("q", query),
                ("fields", fields.as_str()),
                ("pageSize", page_size.as_str()),
            ]);
        if let Some(token) = page_token {
            req = req.query(&[("pageToken", token)]);
        }
        Self::decode(req.send().await?).await
    }

    /// Create a file or folder under `parent_id`.
    #[instrument(skip(self))]
    pub async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        dir: bool,
    ) -> Result<DriveFile, ApiError> {
        let mut body = serde_json::json!({
            "name": name,
            "parents": [parent_id],
        });
        if dir {
            body["mimeType"] = serde_json::Value::from(FOLDER_MIME_TYPE);
        }
        let resp = self
            .http
            .post(format!("{}/files", self.base))
            .bearer_auth(self.bearer().await?)
            .query(&[("fields", FILE_FIELDS)])
            .json(&body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// Patch a file's name and/or parents. Omitted arguments are left alone.
    #[instrument(skip(self))]
    pub async fn update_file(
        &self,
        id: &str,
        new_name: Option<&str>,
        remove_parents: Option<&str>,
        add_parents: Option<&str>,
    ) -> Result<DriveFile, ApiError> {
        let mut body = serde_json::Map::new();
        if let Some(name) = new_name {
            body.insert("name".to_owned(), serde_json::Value::from(name));
        }
        let mut req = self
            .http
            .patch(format!("{}/files/{id}", self.base))
            .bearer_auth(self.bearer().await?)
            .query(&[("fields", FILE_FIELDS)])
            .json(&serde_json::Value::Object(body));
        if let Some(parents) = remove_parents {
            req = req.query(&[("removeParents", parents)]);
        }
        if let Some(parents) = add_parents {
            req = req.query(&[("addParents", parents)]);
        }
        Self::decode(req.send().await?).await
    }

    /// Move a file to the trash.
    #[instrument(skip(self))]
    pub async fn trash_file(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let resp = self
            .http
            .patch(format!("{}/files/{id}", self.base))
            .bearer_auth(self.bearer().await?)
            .json(&serde_json::json!({ "trashed": true }))
            .send()
            .await?;
        Self::decode::<DriveFile>(resp).await.map(|_| ())
    }

    /// Stream a file's content into `file`, honoring `cancel` between chunks.
    ///
    /// Returns the number of bytes written, which may be short of the full
    /// content when the download was cancelled mid-stream.
    #[instrument(skip(self, file))]
    pub async fn download_to(
        &self,
        id: &str,
        file: &mut tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<u64, ApiError> {
        if cancel.is_cancelled() {
            debug!(id, "download aborted before starting");
            return Err(ApiError::Cancelled);
        }

        let resp = self
            .http
            .get(format!("{}/files/{id}", self.base))
            .bearer_auth(self.bearer().await?)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, message });
        }

        let mut resp = resp;
        let mut written: u64 = 0;
        while let Some(chunk) = resp.chunk().await? {
            if cancel.is_cancelled() {
                debug!(id, written, "download aborted mid-stream");
                file.flush().await?;
                return Err(ApiError::Cancelled);
            }
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(id, written, "download complete");
        Ok(written)
    }

    /// Replace a file's content with the (rewound) local file.
    #[instrument(skip(self, file))]
    pub async fn upload_from(
        &self,
        id: &str,
        mut file: tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        file.seek(std::io::SeekFrom::Start(0)).await?;

        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));
        let send = self
            .http
            .patch(format!("{}/files/{id}", self.upload_base))
            .bearer_auth(self.bearer().await?)
            .query(&[("uploadType", "media")])
            .body(body)
            .send();

        let resp = tokio::select! {
            resp = send => resp?,
            () = cancel.cancelled() => return Err(ApiError::Cancelled),
        };
        Self::decode::<DriveFile>(resp).await.map(|_| ())
    }

    /// Fetch the cursor marking "now" in the change feed.
    #[instrument(skip(self))]
    pub async fn start_page_token(&self) -> Result<String, ApiError> {
        let resp = self
            .http
            .get(format!("{}/changes/startPageToken", self.base))
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        Self::decode::<StartPageToken>(resp)
            .await
            .map(|t| t.start_page_token)
    }

    /// List one page of the change feed starting at `page_token`.
    #[instrument(skip(self))]
    pub async fn list_changes(&self, page_token: &str) -> Result<ChangeList, ApiError> {
        let fields = format!(
            "newStartPageToken, nextPageToken, changes(fileId, removed, file({FILE_FIELDS}))"
        );
        let page_size = PAGE_SIZE.to_string();
        let resp = self
            .http
            .get(format!("{}/changes", self.base))
            .bearer_auth(self.bearer().await?)
            .query(&[
                ("pageToken", page_token),
                ("fields", fields.as_str()),
                ("includeRemoved", "true"),
                ("restrictToMyDrive", "true"),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await?;
        Self::decode(resp).await
    }
}
