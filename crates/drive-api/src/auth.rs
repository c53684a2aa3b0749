//! OAuth 2.0 installed-application flow.
//!
//! The access token is cached on disk so repeated mounts don't re-prompt.
//! When the cache is missing the user is sent to the consent URL and pastes
//! the authorization code back on stdin.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::models::{CachedToken, ClientSecretFile, InstalledSecret, TokenResponse};

/// Redirect URI for the out-of-band (copy/paste) flow.
const OOB_REDIRECT: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Refresh this long before the reported expiry, to absorb clock skew.
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

struct TokenState {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: SystemTime,
}

/// Manages the OAuth credential pair for a single user and scope.
pub struct Authenticator {
    http: reqwest::Client,
    secret: InstalledSecret,
    token_path: PathBuf,
    scope: String,
    state: tokio::sync::Mutex<TokenState>,
}

impl Authenticator {
    /// Build an authenticator from the client secret file and token cache.
    ///
    /// Runs the interactive consent flow if no usable cached token exists.
    pub async fn from_files(
        secret_path: &Path,
        token_path: &Path,
        scope: &str,
    ) -> Result<Self, ApiError> {
        let raw = std::fs::read(secret_path).map_err(|e| {
            ApiError::Auth(format!(
                "unable to read client secret file {}: {e}",
                secret_path.display()
            ))
        })?;
        let secret: ClientSecretFile = serde_json::from_slice(&raw)
            .map_err(|e| ApiError::Auth(format!("unable to parse client secret file: {e}")))?;

        let http = reqwest::Client::new();
        let state = match load_cached_token(token_path) {
            Some(tok) => tok,
            None => {
                let tok = consent_flow(&http, &secret.installed, scope).await?;
                save_cached_token(token_path, &tok);
                tok
            }
        };

        Ok(Self {
            http,
            secret: secret.installed,
            token_path: token_path.to_path_buf(),
            scope: scope.to_owned(),
            state: tokio::sync::Mutex::new(state),
        })
    }

    /// Return a valid access token, refreshing it if stale.
    pub async fn access_token(&self) -> Result<String, ApiError> {
        let mut state = self.state.lock().await;
        if SystemTime::now() < state.expires_at {
            return Ok(state.access_token.clone());
        }

        let Some(refresh) = state.refresh_token.clone() else {
            return Err(ApiError::Auth(
                "access token expired and no refresh token is cached; delete the token cache and \
                 re-authorize"
                    .to_owned(),
            ));
        };

        debug!("refreshing expired access token");
        let resp: TokenResponse = self
            .http
            .post(&self.secret.token_uri)
            .form(&[
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("refresh_token", refresh.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ApiError::Auth(format!("token refresh rejected: {e}")))?
            .json()
            .await?;

        state.access_token = resp.access_token.clone();
        state.expires_at = expiry_from_now(resp.expires_in);
        if resp.refresh_token.is_some() {
            state.refresh_token = resp.refresh_token;
        }
        save_cached_token(&self.token_path, &state);
        Ok(resp.access_token)
    }

    /// The scope this authenticator was created with.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

fn expiry_from_now(expires_in: Option<u64>) -> SystemTime {
    let lifetime = Duration::from_secs(expires_in.unwrap_or(3600));
    SystemTime::now() + lifetime.saturating_sub(EXPIRY_SLACK)
}

fn load_cached_token(path: &Path) -> Option<TokenState> {
    let raw = std::fs::read(path).ok()?;
    let cached: CachedToken = serde_json::from_slice(&raw)
        .map_err(|e| warn!(path = %path.display(), "ignoring malformed token cache: {e}"))
        .ok()?;
    Some(TokenState {
        access_token: cached.access_token,
        refresh_token: cached.refresh_token,
        expires_at: cached
            .expires_at
            .map_or(UNIX_EPOCH, |secs| UNIX_EPOCH + Duration::from_secs(secs)),
    })
}

fn save_cached_token(path: &Path, state: &TokenState) {
    let cached = CachedToken {
        access_token: state.access_token.clone(),
        refresh_token: state.refresh_token.clone(),
        expires_at: state
            .expires_at
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs()),
    };
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(&cached)?;
        std::fs::write(path, body)
    };
    match write() {
        Ok(()) => info!(path = %path.display(), "saved credential cache"),
        Err(e) => warn!(path = %path.display(), "unable to save credential cache: {e}"),
    }
}

/// Run the interactive consent flow: print the URL, read the code, exchange it.
async fn consent_flow(
    http: &reqwest::Client,
    secret: &InstalledSecret,
    scope: &str,
) -> Result<TokenState, ApiError> {
    let auth_url = url::Url::parse_with_params(
        &secret.auth_uri,
        &[
            ("client_id", secret.client_id.as_str()),
            ("redirect_uri", OOB_REDIRECT),
            ("response_type", "code"),
            ("scope", scope),
            ("access_type", "offline"),
        ],
    )
    .map_err(|e| ApiError::Auth(format!("malformed auth_uri in client secret: {e}")))?;

    println!("Go to the following link in your browser, then paste the authorization code:");
    println!("{auth_url}");

    let mut code = String::new();
    std::io::stdin()
        .read_line(&mut code)
        .map_err(|e| ApiError::Auth(format!("unable to read authorization code: {e}")))?;
    let code = code.trim();
    if code.is_empty() {
        return Err(ApiError::Auth("empty authorization code".to_owned()));
    }

    let resp: TokenResponse = http
        .post(&secret.token_uri)
        .form(&[
            ("client_id", secret.client_id.as_str()),
            ("client_secret", secret.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", OOB_REDIRECT),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?
        .error_for_status()
        .map_err(|e| ApiError::Auth(format!("code exchange rejected: {e}")))?
        .json()
        .await?;

    Ok(TokenState {
        access_token: resp.access_token,
        refresh_token: resp.refresh_token,
        expires_at: expiry_from_now(resp.expires_in),
    })
}
