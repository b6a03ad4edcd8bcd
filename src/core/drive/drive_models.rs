use serde::Deserialize;
use serde_json::{json, Value};

/// A single `replaceAllText` edit: every occurrence of `token` in the
/// document becomes `new_value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub token: String,
    pub new_value: String,
    pub match_case: bool,
}

impl Replacement {
    pub fn new(token: impl Into<String>, new_value: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            new_value: new_value.into(),
            match_case: true,
        }
    }

    /// The request object in the shape `documents.batchUpdate` expects.
    pub fn to_request(&self) -> Value {
        json!({
            "replaceAllText": {
                "containsText": {
                    "text": self.token,
                    "matchCase": self.match_case,
                },
                "replaceText": self.new_value,
            }
        })
    }
}

/// Reply from `documents.batchUpdate`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateResponse {
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub replies: Vec<Value>,
}

impl BatchUpdateResponse {
    /// Total occurrences changed across all `replaceAllText` replies.
    pub fn occurrences_changed(&self) -> u64 {
        self.replies
            .iter()
            .filter_map(|reply| reply.pointer("/replaceAllText/occurrencesChanged"))
            .filter_map(Value::as_u64)
            .sum()
    }
}

/// Everything needed to turn a template into a finished document.
#[derive(Debug, Clone)]
pub struct TemplateRequest {
    pub template_id: String,
    pub new_file_name: String,
    pub replacements: Vec<Replacement>,
    /// Full folder path for the new file. `None` means the drive root.
    pub folder: Option<String>,
    /// Email address to grant read access to once the document is filled in.
    pub share_with: Option<String>,
}

/// What `generate_from_template` produced.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub document_id: String,
    pub occurrences_changed: u64,
    pub share_link: Option<String>,
}

/// Link handed out after sharing a file.
pub fn open_link(file_id: &str) -> String {
    format!("https://drive.google.com/open?id={}", file_id)
}
