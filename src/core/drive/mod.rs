pub mod drive_models;
pub mod drive_service;

pub use drive_models::{BatchUpdateResponse, Replacement, TemplateRequest};
pub use drive_service::{DocsClient, DriveClient, DriveError, DriveService};
