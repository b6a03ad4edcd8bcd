use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::google_auth::GoogleAuth;
use crate::core::drive::{DriveClient, DriveError};
use crate::core::folders::FolderRecord;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, parents)";
const PAGE_SIZE: &str = "1000";

/// One page of `files.list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub files: Vec<FolderRecord>,
}

#[derive(Debug, Deserialize)]
struct FileId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PermissionReply {
    #[serde(default)]
    id: Option<String>,
}

/// Drive v3 REST client covering folders, copies and permissions.
pub struct GoogleDriveClient {
    client: Client,
    auth: Arc<GoogleAuth>,
    base_url: String,
}

impl GoogleDriveClient {
    pub fn new(auth: Arc<GoogleAuth>) -> Self {
        Self {
            client: Client::new(),
            auth,
            base_url: DRIVE_API_URL.to_string(),
        }
    }

    async fn bearer(&self) -> Result<String, DriveError> {
        Ok(format!("Bearer {}", self.auth.access_token().await?))
    }

    async fn post_for_id(&self, url: &str, body: &Value, context: &str) -> Result<String, DriveError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", self.bearer().await?)
            .query(&[("fields", "id")])
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(context, e))?;

        let reply: FileId = ensure_success(response, context)
            .await?
            .json()
            .await
            .map_err(|e| request_error(context, e))?;
        Ok(reply.id)
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    async fn root_folder_id(&self) -> Result<String, DriveError> {
        let url = format!("{}/files/root", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer().await?)
            .query(&[("fields", "id")])
            .send()
            .await
            .map_err(|e| request_error("files.get(root)", e))?;

        let root: FileId = ensure_success(response, "files.get(root)")
            .await?
            .json()
            .await
            .map_err(|e| request_error("files.get(root)", e))?;
        Ok(root.id)
    }

    async fn list_folders(&self) -> Result<Vec<FolderRecord>, DriveError> {
        let url = format!("{}/files", self.base_url);
        let query = folder_query();
        let mut folders = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, &str)> = vec![
                ("q", query.as_str()),
                ("fields", LIST_FIELDS),
                ("pageSize", PAGE_SIZE),
                ("spaces", "drive"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            tracing::debug!("Listing Drive folders (page token: {:?})", page_token);

            let response = self
                .client
                .get(&url)
                .header("Authorization", self.bearer().await?)
                .query(&params)
                .send()
                .await
                .map_err(|e| request_error("files.list", e))?;

            let page: FileList = ensure_success(response, "files.list")
                .await?
                .json()
                .await
                .map_err(|e| request_error("files.list", e))?;

            folders.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!("Listed {} Drive folder(s)", folders.len());
        Ok(folders)
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, DriveError> {
        let url = format!("{}/files", self.base_url);
        self.post_for_id(&url, &folder_metadata(name, parent_id), "files.create")
            .await
    }

    async fn copy_file(
        &self,
        file_id: &str,
        new_name: &str,
        parent_id: Option<&str>,
    ) -> Result<String, DriveError> {
        let url = format!("{}/files/{}/copy", self.base_url, file_id);
        self.post_for_id(&url, &copy_metadata(new_name, parent_id), "files.copy")
            .await
    }

    async fn create_permission(
        &self,
        file_id: &str,
        email: &str,
    ) -> Result<Option<String>, DriveError> {
        let url = format!("{}/files/{}/permissions", self.base_url, file_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer().await?)
            .query(&[("fields", "id")])
            .json(&reader_permission(email))
            .send()
            .await
            .map_err(|e| request_error("permissions.create", e))?;

        let reply: PermissionReply = ensure_success(response, "permissions.create")
            .await?
            .json()
            .await
            .map_err(|e| request_error("permissions.create", e))?;
        Ok(reply.id)
    }
}

/// Turn a non-2xx response into an error carrying Google's message.
pub(crate) async fn ensure_success(response: Response, context: &str) -> Result<Response, DriveError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(DriveError::Api(format!("{} failed ({}): {}", context, status, text)))
}

pub(crate) fn request_error(context: &str, error: reqwest::Error) -> DriveError {
    DriveError::Api(format!("{} failed: {}", context, error))
}

/// Parse a saved `files.list` reply.
pub fn parse_file_list(json: &str) -> Result<Vec<FolderRecord>, serde_json::Error> {
    let list: FileList = serde_json::from_str(json)?;
    Ok(list.files)
}

/// Folders the caller owns. Folders merely shared with the caller have no
/// visible parent and would make the whole listing unresolvable.
fn folder_query() -> String {
    format!(
        "mimeType='{}' and trashed=false and 'me' in owners",
        FOLDER_MIME_TYPE
    )
}

fn folder_metadata(name: &str, parent_id: &str) -> Value {
    json!({
        "name": name,
        "mimeType": FOLDER_MIME_TYPE,
        "parents": [parent_id],
    })
}

fn copy_metadata(new_name: &str, parent_id: Option<&str>) -> Value {
    let mut body = json!({ "name": new_name });
    if let Some(parent) = parent_id {
        body["parents"] = json!([parent]);
    }
    body
}

fn reader_permission(email: &str) -> Value {
    json!({
        "type": "user",
        "role": "reader",
        "emailAddress": email,
    })
}
