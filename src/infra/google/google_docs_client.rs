use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::google_auth::GoogleAuth;
use super::google_drive_client::{ensure_success, request_error};
use crate::core::drive::{BatchUpdateResponse, DocsClient, DriveError, Replacement};

const DOCS_API_URL: &str = "https://docs.googleapis.com/v1";

/// Client for editing Google Docs through `documents.batchUpdate`.
pub struct GoogleDocsClient {
    client: Client,
    auth: Arc<GoogleAuth>,
    base_url: String,
}

impl GoogleDocsClient {
    pub fn new(auth: Arc<GoogleAuth>) -> Self {
        Self {
            client: Client::new(),
            auth,
            base_url: DOCS_API_URL.to_string(),
        }
    }

    /// Extracts the file ID from a Docs/Drive URL, or passes a bare ID through.
    pub fn extract_doc_id(url_or_id: &str) -> Option<String> {
        let url_or_id = url_or_id.trim();
        if url_or_id.contains("google.com") {
            if let Some(start) = url_or_id.find("/d/") {
                let after_d = &url_or_id[start + 3..];
                let end = after_d
                    .find(|c: char| c == '/' || c == '?' || c == '#')
                    .unwrap_or(after_d.len());
                let id = &after_d[..end];
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
            if let Some(start) = url_or_id.find("id=") {
                let after = &url_or_id[start + 3..];
                let end = after.find('&').unwrap_or(after.len());
                if end > 0 {
                    return Some(after[..end].to_string());
                }
            }
        } else if !url_or_id.is_empty() && !url_or_id.contains('/') && !url_or_id.contains(' ') {
            return Some(url_or_id.to_string());
        }
        None
    }
}

#[async_trait]
impl DocsClient for GoogleDocsClient {
    async fn batch_update(
        &self,
        document_id: &str,
        replacements: &[Replacement],
    ) -> Result<BatchUpdateResponse, DriveError> {
        let url = format!("{}/documents/{}:batchUpdate", self.base_url, document_id);
        let requests: Vec<_> = replacements.iter().map(Replacement::to_request).collect();

        tracing::debug!(
            "Sending {} replacement(s) to document {}",
            requests.len(),
            document_id
        );

        let token = self.auth.access_token().await?;
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .map_err(|e| request_error("documents.batchUpdate", e))?;

        ensure_success(response, "documents.batchUpdate")
            .await?
            .json()
            .await
            .map_err(|e| request_error("documents.batchUpdate", e))
    }
}
