// =============================================================================
// GOOGLE OAUTH2 ACCESS TOKENS
// =============================================================================
//
// Drive and Docs calls both need a bearer token with the `drive` and
// `documents` scopes. Two kinds of credentials are supported:
//
// 1. **Service account**: a JSON key downloaded from the Cloud console. We sign
//    a JWT with the private key and trade it for an access token. Files must be
//    shared with the service account email, or `GOOGLE_DRIVE_SUBJECT` set to a
//    user the account may impersonate (domain-wide delegation).
// 2. **Authorized user**: a `token.json` holding a refresh token, as written by
//    Google's installed-app quickstart flow. We refresh it and write the new
//    access token back so the next run can reuse it.
//
// Running the browser consent flow to create `token.json` in the first place
// is not done here.
//
// **Environment Variables:**
// - `GOOGLE_SERVICE_ACCOUNT_KEY` - Path to service account JSON file
// - `GOOGLE_SERVICE_ACCOUNT_JSON` - Service account JSON content (alternative)
// - `GOOGLE_DRIVE_SUBJECT` - User to impersonate with the service account
// - `GOOGLE_TOKEN_FILE` - Authorized user token file (default `token.json`)

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use crate::core::drive::DriveError;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const DOCUMENTS_SCOPE: &str = "https://www.googleapis.com/auth/documents";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_TOKEN_FILE: &str = "token.json";

/// Tokens this close to expiry are treated as already expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

// =============================================================================
// CREDENTIAL FILES
// =============================================================================

/// Service account credentials from the JSON key file.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountCredentials {
    /// The service account email (used as issuer in JWT).
    client_email: String,

    /// The private key in PEM format.
    private_key: String,

    /// The token URI (where to exchange JWT for access token).
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

/// Authorized user token file (`token.json`).
///
/// Fields we don't use are carried along so rewriting the file keeps them.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthorizedUserFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    refresh_token: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    client_id: String,
    client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// JWT claims for Google OAuth2.
#[derive(Debug, Serialize)]
struct JwtClaims {
    /// Issuer (service account email).
    iss: String,

    /// Space separated scopes.
    scope: String,

    /// Audience (token endpoint).
    aud: String,

    /// Issued at (Unix timestamp).
    iat: i64,

    /// Expiration (Unix timestamp, max 1 hour from iat).
    exp: i64,

    /// User to act on behalf of.
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
}

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Cached access token with expiration.
#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + Duration::seconds(EXPIRY_MARGIN_SECS)
    }
}

enum Credentials {
    ServiceAccount {
        credentials: ServiceAccountCredentials,
        subject: Option<String>,
    },
    AuthorizedUser {
        file: AuthorizedUserFile,
        /// Where to write refreshed tokens. `None` when loaded from a string.
        path: Option<PathBuf>,
    },
}

// =============================================================================
// AUTHENTICATOR
// =============================================================================

/// Hands out access tokens, refreshing them when they are about to expire.
pub struct GoogleAuth {
    credentials: Credentials,
    scopes: Vec<String>,
    client: Client,
    cached_token: RwLock<Option<CachedToken>>,
    /// Held for the whole refresh so concurrent callers share one exchange and
    /// one token file write.
    refresh_lock: Mutex<()>,
}

impl GoogleAuth {
    fn new(credentials: Credentials, cached: Option<CachedToken>) -> Self {
        Self {
            credentials,
            scopes: vec![DRIVE_SCOPE.to_string(), DOCUMENTS_SCOPE.to_string()],
            client: Client::new(),
            cached_token: RwLock::new(cached),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Creates a service account authenticator from JSON key content.
    pub fn service_account_from_json(json: &str) -> Result<Self, DriveError> {
        let credentials: ServiceAccountCredentials = serde_json::from_str(json)
            .map_err(|e| DriveError::Auth(format!("Invalid service account key: {}", e)))?;

        Ok(Self::new(
            Credentials::ServiceAccount {
                credentials,
                subject: None,
            },
            None,
        ))
    }

    /// Creates a service account authenticator from a JSON key file path.
    pub async fn service_account_from_file(path: impl AsRef<Path>) -> Result<Self, DriveError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DriveError::Auth(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::service_account_from_json(&content)
    }

    /// Creates an authorized user authenticator from token file content.
    /// Refreshed tokens are kept in memory only.
    pub fn authorized_user_from_json(json: &str) -> Result<Self, DriveError> {
        let file: AuthorizedUserFile = serde_json::from_str(json)
            .map_err(|e| DriveError::Auth(format!("Invalid token file: {}", e)))?;

        let cached = match (&file.token, file.expiry) {
            (Some(token), Some(expires_at)) => Some(CachedToken {
                token: token.clone(),
                expires_at,
            }),
            _ => None,
        };

        Ok(Self::new(Credentials::AuthorizedUser { file, path: None }, cached))
    }

    /// Creates an authorized user authenticator from a token file, writing
    /// refreshed tokens back to it.
    pub async fn authorized_user_from_file(path: impl AsRef<Path>) -> Result<Self, DriveError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DriveError::Auth(format!("Cannot read {}: {}", path.display(), e)))?;

        let mut auth = Self::authorized_user_from_json(&content)?;
        if let Credentials::AuthorizedUser { path: target, .. } = &mut auth.credentials {
            *target = Some(path.to_path_buf());
        }
        Ok(auth)
    }

    /// Act on behalf of `subject`. Only meaningful for service accounts.
    pub fn with_subject(mut self, subject: Option<String>) -> Self {
        if let Credentials::ServiceAccount { subject: current, .. } = &mut self.credentials {
            *current = subject;
        } else if subject.is_some() {
            tracing::warn!("Ignoring impersonation subject for authorized user credentials");
        }
        self
    }

    /// Picks credentials from the environment. An explicit token file wins,
    /// then a service account key, then `GOOGLE_TOKEN_FILE` / `token.json`.
    pub async fn from_env(token_file: Option<&Path>) -> Result<Self, DriveError> {
        if let Some(path) = token_file {
            return Self::authorized_user_from_file(path).await;
        }

        let subject = std::env::var("GOOGLE_DRIVE_SUBJECT").ok();

        if let Ok(path) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            return Ok(Self::service_account_from_file(&path)
                .await?
                .with_subject(subject));
        }

        if let Ok(json) = std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON") {
            return Ok(Self::service_account_from_json(&json)?.with_subject(subject));
        }

        let path = std::env::var("GOOGLE_TOKEN_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TOKEN_FILE));
        if path.exists() {
            return Self::authorized_user_from_file(&path).await;
        }

        Err(DriveError::Auth(format!(
            "No credentials found. Set GOOGLE_SERVICE_ACCOUNT_KEY, GOOGLE_SERVICE_ACCOUNT_JSON \
             or provide an authorized user token file ({}).",
            path.display()
        )))
    }

    /// Gets a valid access token, refreshing if necessary.
    pub async fn access_token(&self) -> Result<String, DriveError> {
        if let Some(token) = self.fresh_cached_token().await {
            return Ok(token);
        }

        let _refreshing = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh_cached_token().await {
            return Ok(token);
        }

        let fresh = self.fetch_new_token().await?;
        let token = fresh.token.clone();

        {
            let mut cached = self.cached_token.write().await;
            *cached = Some(fresh.clone());
        }

        if let Credentials::AuthorizedUser {
            file,
            path: Some(path),
        } = &self.credentials
        {
            // Losing the write only costs an extra refresh next run.
            if let Err(e) = persist_token(path, file, &fresh).await {
                tracing::warn!("Failed to update token file {}: {}", path.display(), e);
            }
        }

        Ok(token)
    }

    async fn fresh_cached_token(&self) -> Option<String> {
        let cached = self.cached_token.read().await;
        cached
            .as_ref()
            .filter(|token| token.is_fresh(Utc::now()))
            .map(|token| token.token.clone())
    }

    async fn fetch_new_token(&self) -> Result<CachedToken, DriveError> {
        let (token_uri, form) = match &self.credentials {
            Credentials::ServiceAccount {
                credentials,
                subject,
            } => {
                let claims = jwt_claims(credentials, subject.clone(), &self.scopes, Utc::now());
                let key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
                    .map_err(|e| DriveError::Auth(format!("Invalid private key: {}", e)))?;
                let jwt = encode(&Header::new(Algorithm::RS256), &claims, &key)
                    .map_err(|e| DriveError::Auth(format!("Failed to sign JWT: {}", e)))?;

                (
                    credentials.token_uri.as_str(),
                    vec![
                        (
                            "grant_type",
                            "urn:ietf:params:oauth:grant-type:jwt-bearer".to_string(),
                        ),
                        ("assertion", jwt),
                    ],
                )
            }
            Credentials::AuthorizedUser { file, .. } => (
                file.token_uri.as_str(),
                vec![
                    ("grant_type", "refresh_token".to_string()),
                    ("refresh_token", file.refresh_token.clone()),
                    ("client_id", file.client_id.clone()),
                    ("client_secret", file.client_secret.clone()),
                ],
            ),
        };

        tracing::debug!("Requesting new access token from {}", token_uri);

        let response = self
            .client
            .post(token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| DriveError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DriveError::Auth(format!(
                "Token exchange failed ({}): {}",
                status, text
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| DriveError::Auth(e.to_string()))?;

        Ok(CachedToken {
            token: token_response.access_token,
            expires_at: Utc::now() + Duration::seconds(token_response.expires_in.unwrap_or(3600)),
        })
    }
}

fn jwt_claims(
    credentials: &ServiceAccountCredentials,
    subject: Option<String>,
    scopes: &[String],
    now: DateTime<Utc>,
) -> JwtClaims {
    let iat = now.timestamp();
    JwtClaims {
        iss: credentials.client_email.clone(),
        scope: scopes.join(" "),
        aud: credentials.token_uri.clone(),
        iat,
        exp: iat + 3600,
        sub: subject,
    }
}

async fn persist_token(
    path: &Path,
    file: &AuthorizedUserFile,
    token: &CachedToken,
) -> Result<(), DriveError> {
    let mut updated = file.clone();
    updated.token = Some(token.token.clone());
    updated.expiry = Some(token.expires_at);

    let text = serde_json::to_string_pretty(&updated).map_err(|e| DriveError::Auth(e.to_string()))?;
    tokio::fs::write(path, text)
        .await
        .map_err(|e| DriveError::Auth(e.to_string()))
}
