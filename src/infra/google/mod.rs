// Google infra layer.
// - `google_auth.rs` turns credentials into OAuth2 access tokens.
// - `google_drive_client.rs` talks to the Drive v3 API.
// - `google_docs_client.rs` talks to the Docs v1 API.

#[path = "google_auth.rs"]
pub mod google_auth;

#[path = "google_drive_client.rs"]
pub mod google_drive_client;

#[path = "google_docs_client.rs"]
pub mod google_docs_client;

pub use google_auth::GoogleAuth;
pub use google_docs_client::GoogleDocsClient;
pub use google_drive_client::{parse_file_list, GoogleDriveClient};
