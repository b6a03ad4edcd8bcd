use async_trait::async_trait;
use thiserror::Error;

use super::drive_models::{
    open_link, BatchUpdateResponse, GeneratedDocument, Replacement, TemplateRequest,
};
use crate::core::folders::{
    join_path, normalize_path, resolve_with_root, DirectoryTree, FolderRecord,
    MalformedHierarchy, ROOT_PATH,
};

/// Errors raised while working with Drive and Docs.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("Google API error: {0}")]
    Api(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error(transparent)]
    Hierarchy(#[from] MalformedHierarchy),
    #[error("Folder not found: {0}")]
    UnknownFolder(String),
    #[error("Invalid folder path: {0}")]
    InvalidPath(String),
    #[error("No permission was granted on {0}")]
    PermissionNotGranted(String),
}

/// The Drive calls the service needs. Every method is one remote request (or
/// one paginated listing) with no logic of its own.
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Identifier of the caller's "My Drive" root.
    async fn root_folder_id(&self) -> Result<String, DriveError>;
    /// Every folder visible to the caller, fully paginated.
    async fn list_folders(&self) -> Result<Vec<FolderRecord>, DriveError>;
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, DriveError>;
    async fn copy_file(
        &self,
        file_id: &str,
        new_name: &str,
        parent_id: Option<&str>,
    ) -> Result<String, DriveError>;
    /// Grant `email` reader access. Returns the permission id, if Drive gave one back.
    async fn create_permission(
        &self,
        file_id: &str,
        email: &str,
    ) -> Result<Option<String>, DriveError>;
}

/// The Docs calls the service needs.
#[async_trait]
pub trait DocsClient: Send + Sync {
    async fn batch_update(
        &self,
        document_id: &str,
        replacements: &[Replacement],
    ) -> Result<BatchUpdateResponse, DriveError>;
}

/// Folder, copy, share and template operations on top of the raw clients.
///
/// Folder paths are always looked up in a freshly resolved tree. After creating
/// a folder the tree is resolved again rather than patched.
pub struct DriveService<C: DriveClient, D: DocsClient> {
    drive: C,
    docs: D,
}

impl<C, D> DriveService<C, D>
where
    C: DriveClient,
    D: DocsClient,
{
    pub fn new(drive: C, docs: D) -> Self {
        Self { drive, docs }
    }

    /// List every folder and resolve the full path of each one.
    pub async fn folders(&self) -> Result<DirectoryTree, DriveError> {
        Ok(self.listing().await?.1)
    }

    /// The raw folder records together with the tree resolved from them.
    async fn listing(&self) -> Result<(Vec<FolderRecord>, DirectoryTree), DriveError> {
        let (root_id, records) =
            tokio::try_join!(self.drive.root_folder_id(), self.drive.list_folders())?;

        let tree = resolve_with_root(&records, &root_id)?;
        tracing::debug!(folders = tree.folder_count(), "Resolved drive folder tree");
        Ok((records, tree))
    }

    /// Create `name` directly under an existing folder.
    pub async fn create_folder(&self, name: &str, parent_path: &str) -> Result<String, DriveError> {
        validate_name(name)?;
        let tree = self.folders().await?;
        let parent_id = tree
            .id_for(parent_path)
            .ok_or_else(|| DriveError::UnknownFolder(parent_path.to_string()))?;

        let id = self.drive.create_folder(name, parent_id).await?;
        tracing::info!(
            "Created folder '{}' under {} ({})",
            name,
            parent_path,
            id
        );
        Ok(id)
    }

    /// Make sure every folder along `path` exists, creating the missing ones,
    /// and return the id of the last one.
    ///
    /// Each segment is matched by name among the children of the folder found
    /// for the previous segment. Once one segment had to be created, the rest
    /// are created under it without looking them up.
    pub async fn ensure_folder(&self, path: &str) -> Result<String, DriveError> {
        let segments = split_path(path)?;
        let (records, tree) = self.listing().await?;

        let mut current_path = ROOT_PATH.to_string();
        let mut current_id = tree.root_id().to_string();
        let mut created = false;

        for segment in segments {
            current_path = join_path(&current_path, segment);
            let existing = if created {
                None
            } else {
                child_named(&records, &current_id, segment)
            };

            match existing {
                Some(id) => current_id = id.to_string(),
                None => {
                    current_id = self.drive.create_folder(segment, &current_id).await?;
                    created = true;
                    tracing::info!("Created folder {} ({})", current_path, current_id);
                }
            }
        }

        if created {
            // The listing may lag behind the create; the id we just got is
            // authoritative either way.
            match self.folders().await {
                Ok(tree) if tree.contains_path(&current_path) => {}
                Ok(_) => tracing::warn!("Folder {} not visible in listing yet", current_path),
                Err(e) => tracing::warn!(
                    "Folder tree no longer resolves after creating {}: {}",
                    current_path,
                    e
                ),
            }
        }

        Ok(current_id)
    }

    /// Copy a file under a new name. When `folder` is given the copy lands in
    /// that folder, which is created first if it doesn't exist yet.
    pub async fn copy_file(
        &self,
        template_id: &str,
        new_name: &str,
        folder: Option<&str>,
    ) -> Result<String, DriveError> {
        let parent_id = match folder {
            Some(path) => Some(self.ensure_folder(path).await?),
            None => None,
        };

        let id = self
            .drive
            .copy_file(template_id, new_name, parent_id.as_deref())
            .await?;
        tracing::info!("Copied {} to '{}' ({})", template_id, new_name, id);
        Ok(id)
    }

    /// Give `email` read access and return a link to the file.
    pub async fn share_file(&self, file_id: &str, email: &str) -> Result<String, DriveError> {
        match self.drive.create_permission(file_id, email).await? {
            Some(permission_id) => {
                tracing::info!(
                    "Shared {} with {} (permission {})",
                    file_id,
                    email,
                    permission_id
                );
                Ok(open_link(file_id))
            }
            None => Err(DriveError::PermissionNotGranted(file_id.to_string())),
        }
    }

    /// Copy a template into place, fill in the replacements and optionally share it.
    pub async fn generate_from_template(
        &self,
        request: &TemplateRequest,
    ) -> Result<GeneratedDocument, DriveError> {
        let folder = request.folder.as_deref().unwrap_or(ROOT_PATH);

        let document_id = self
            .copy_file(&request.template_id, &request.new_file_name, Some(folder))
            .await?;

        let response = self
            .docs
            .batch_update(&document_id, &request.replacements)
            .await?;
        let occurrences_changed = response.occurrences_changed();
        tracing::info!(
            "Applied {} replacement(s) to {}: {} occurrence(s) changed",
            request.replacements.len(),
            response.document_id,
            occurrences_changed
        );

        let share_link = match &request.share_with {
            Some(email) => Some(self.share_file(&document_id, email).await?),
            None => None,
        };

        Ok(GeneratedDocument {
            document_id,
            occurrences_changed,
            share_link,
        })
    }
}

/// Split a full folder path into its names. `/` yields no names.
fn split_path(path: &str) -> Result<Vec<&str>, DriveError> {
    let normalized =
        normalize_path(path).ok_or_else(|| DriveError::InvalidPath(path.to_string()))?;
    if normalized == ROOT_PATH {
        return Ok(Vec::new());
    }

    let segments: Vec<&str> = normalized[1..].split('/').collect();
    if segments.iter().any(|s| s.trim().is_empty()) {
        return Err(DriveError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Id of the folder called `name` directly under `parent_id`.
fn child_named<'a>(records: &'a [FolderRecord], parent_id: &str, name: &str) -> Option<&'a str> {
    records
        .iter()
        .find(|record| record.parent_id() == Some(parent_id) && record.name == name)
        .map(|record| record.id.as_str())
}

fn validate_name(name: &str) -> Result<(), DriveError> {
    if name.trim().is_empty() || name.contains('/') {
        return Err(DriveError::InvalidPath(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::folders::HierarchyReason;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeDriveState {
        folders: Vec<FolderRecord>,
        next_id: usize,
        list_calls: usize,
        copies: Vec<(String, String, Option<String>)>,
        permissions: Vec<(String, String)>,
        refuse_permissions: bool,
    }

    /// In-memory drive rooted at "root". State is shared so tests can look at
    /// it after handing the client to the service.
    #[derive(Clone, Default)]
    struct FakeDrive {
        state: Arc<Mutex<FakeDriveState>>,
    }

    impl FakeDrive {
        fn with_folders(folders: Vec<FolderRecord>) -> Self {
            let drive = Self::default();
            drive.state.lock().unwrap().folders = folders;
            drive
        }
    }

    #[async_trait]
    impl DriveClient for FakeDrive {
        async fn root_folder_id(&self) -> Result<String, DriveError> {
            Ok("root".to_string())
        }

        async fn list_folders(&self) -> Result<Vec<FolderRecord>, DriveError> {
            let mut state = self.state.lock().unwrap();
            state.list_calls += 1;
            Ok(state.folders.clone())
        }

        async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, DriveError> {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = format!("new-{}", state.next_id);
            state.folders.push(FolderRecord::new(id.clone(), name, parent_id));
            Ok(id)
        }

        async fn copy_file(
            &self,
            file_id: &str,
            new_name: &str,
            parent_id: Option<&str>,
        ) -> Result<String, DriveError> {
            let mut state = self.state.lock().unwrap();
            state.copies.push((
                file_id.to_string(),
                new_name.to_string(),
                parent_id.map(str::to_string),
            ));
            Ok(format!("copy-{}", state.copies.len()))
        }

        async fn create_permission(
            &self,
            file_id: &str,
            email: &str,
        ) -> Result<Option<String>, DriveError> {
            let mut state = self.state.lock().unwrap();
            if state.refuse_permissions {
                return Ok(None);
            }
            state
                .permissions
                .push((file_id.to_string(), email.to_string()));
            Ok(Some("perm-1".to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct FakeDocs {
        updates: Arc<Mutex<Vec<(String, Vec<Replacement>)>>>,
    }

    #[async_trait]
    impl DocsClient for FakeDocs {
        async fn batch_update(
            &self,
            document_id: &str,
            replacements: &[Replacement],
        ) -> Result<BatchUpdateResponse, DriveError> {
            self.updates
                .lock()
                .unwrap()
                .push((document_id.to_string(), replacements.to_vec()));

            Ok(BatchUpdateResponse {
                document_id: document_id.to_string(),
                replies: replacements
                    .iter()
                    .map(|_| serde_json::json!({ "replaceAllText": { "occurrencesChanged": 2 } }))
                    .collect(),
            })
        }
    }

    fn existing_folders() -> Vec<FolderRecord> {
        vec![
            FolderRecord::new("1", "Docs", "root"),
            FolderRecord::new("2", "Templates", "1"),
        ]
    }

    fn make_service(drive: &FakeDrive, docs: &FakeDocs) -> DriveService<FakeDrive, FakeDocs> {
        DriveService::new(drive.clone(), docs.clone())
    }

    #[tokio::test]
    async fn folders_resolves_listing() {
        let drive = FakeDrive::with_folders(existing_folders());
        let service = make_service(&drive, &FakeDocs::default());

        let tree = service.folders().await.unwrap();
        assert_eq!(tree.id_for("/Docs/Templates"), Some("2"));
        assert_eq!(tree.root_id(), "root");
    }

    #[tokio::test]
    async fn folders_surfaces_malformed_listing() {
        let drive = FakeDrive::with_folders(vec![
            FolderRecord::new("1", "Docs", "root"),
            FolderRecord::new("2", "Docs", "root"),
        ]);
        let service = make_service(&drive, &FakeDocs::default());

        match service.folders().await {
            Err(DriveError::Hierarchy(err)) => {
                assert!(matches!(err.reason, HierarchyReason::PathCollision { .. }))
            }
            other => panic!("expected hierarchy error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn create_folder_needs_existing_parent() {
        let drive = FakeDrive::with_folders(existing_folders());
        let service = make_service(&drive, &FakeDocs::default());

        let id = service.create_folder("Reports", "/Docs").await.unwrap();
        assert_eq!(id, "new-1");
        assert_eq!(
            service.folders().await.unwrap().id_for("/Docs/Reports"),
            Some("new-1")
        );

        let missing = service.create_folder("Reports", "/Nowhere").await;
        assert!(matches!(missing, Err(DriveError::UnknownFolder(p)) if p == "/Nowhere"));

        let bad_name = service.create_folder("a/b", "/").await;
        assert!(matches!(bad_name, Err(DriveError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn ensure_folder_creates_every_missing_level() {
        let drive = FakeDrive::with_folders(existing_folders());
        let service = make_service(&drive, &FakeDocs::default());

        let id = service
            .ensure_folder("/Docs/Invoices/2024/")
            .await
            .unwrap();

        let tree = service.folders().await.unwrap();
        assert_eq!(tree.id_for("/Docs/Invoices"), Some("new-1"));
        assert_eq!(tree.id_for("/Docs/Invoices/2024"), Some(id.as_str()));

        let state = drive.state.lock().unwrap();
        // One initial listing, one after creating, one for the check above.
        assert_eq!(state.list_calls, 3);
    }

    #[tokio::test]
    async fn ensure_folder_walks_parents_not_path_text() {
        // A root folder literally named "a/b" must not stand in for /a/b.
        let drive = FakeDrive::with_folders(vec![FolderRecord::new("1", "a/b", "root")]);
        let service = make_service(&drive, &FakeDocs::default());

        let id = service.ensure_folder("/a/b").await.unwrap();
        assert_eq!(id, "new-2");

        let state = drive.state.lock().unwrap();
        let created: Vec<_> = state
            .folders
            .iter()
            .skip(1)
            .map(|f| (f.id.as_str(), f.name.as_str(), f.parent_id()))
            .collect();
        assert_eq!(
            created,
            vec![("new-1", "a", Some("root")), ("new-2", "b", Some("new-1"))]
        );
    }

    #[tokio::test]
    async fn ensure_folder_creates_below_a_fresh_segment_without_lookup() {
        // /Docs/Templates exists, but once /Fresh is created its Templates
        // child is new too, whatever the listing says.
        let drive = FakeDrive::with_folders(existing_folders());
        let service = make_service(&drive, &FakeDocs::default());

        let id = service.ensure_folder("/Fresh/Templates").await.unwrap();
        assert_eq!(id, "new-2");
        assert_eq!(
            service.folders().await.unwrap().id_for("/Fresh/Templates"),
            Some("new-2")
        );
    }

    #[tokio::test]
    async fn ensure_folder_reuses_existing_path() {
        let drive = FakeDrive::with_folders(existing_folders());
        let service = make_service(&drive, &FakeDocs::default());

        assert_eq!(service.ensure_folder("/Docs/Templates").await.unwrap(), "2");
        assert_eq!(service.ensure_folder("/").await.unwrap(), "root");
        assert_eq!(drive.state.lock().unwrap().next_id, 0);
    }

    #[tokio::test]
    async fn ensure_folder_rejects_bad_paths() {
        let service = make_service(&FakeDrive::default(), &FakeDocs::default());

        for path in ["Docs", "/Docs//Templates", "", "/ /x"] {
            assert!(
                matches!(service.ensure_folder(path).await, Err(DriveError::InvalidPath(_))),
                "{:?} should be rejected",
                path
            );
        }
    }

    #[tokio::test]
    async fn copy_without_folder_keeps_drive_default() {
        let drive = FakeDrive::with_folders(existing_folders());
        let service = make_service(&drive, &FakeDocs::default());

        let id = service.copy_file("tmpl", "Letter", None).await.unwrap();
        assert_eq!(id, "copy-1");

        let state = drive.state.lock().unwrap();
        assert_eq!(
            state.copies,
            vec![("tmpl".to_string(), "Letter".to_string(), None)]
        );
        assert_eq!(state.list_calls, 0);
    }

    #[tokio::test]
    async fn share_returns_open_link() {
        let drive = FakeDrive::default();
        let service = make_service(&drive, &FakeDocs::default());

        let link = service.share_file("abc", "user@example.com").await.unwrap();
        assert_eq!(link, "https://drive.google.com/open?id=abc");
        assert_eq!(
            drive.state.lock().unwrap().permissions,
            vec![("abc".to_string(), "user@example.com".to_string())]
        );
    }

    #[tokio::test]
    async fn share_without_permission_id_is_an_error() {
        let drive = FakeDrive::default();
        drive.state.lock().unwrap().refuse_permissions = true;
        let service = make_service(&drive, &FakeDocs::default());

        let result = service.share_file("abc", "user@example.com").await;
        assert!(matches!(result, Err(DriveError::PermissionNotGranted(id)) if id == "abc"));
    }

    #[tokio::test]
    async fn generate_defaults_to_root_folder() {
        let drive = FakeDrive::with_folders(existing_folders());
        let docs = FakeDocs::default();
        let service = make_service(&drive, &docs);

        let request = TemplateRequest {
            template_id: "tmpl".to_string(),
            new_file_name: "Invoice 42".to_string(),
            replacements: vec![
                Replacement::new("{{number}}", "42"),
                Replacement::new("{{customer}}", "ACME"),
            ],
            folder: None,
            share_with: None,
        };

        let generated = service.generate_from_template(&request).await.unwrap();
        assert_eq!(generated.document_id, "copy-1");
        assert_eq!(generated.occurrences_changed, 4);
        assert!(generated.share_link.is_none());

        let state = drive.state.lock().unwrap();
        assert_eq!(state.copies[0].2.as_deref(), Some("root"));

        let updates = docs.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "copy-1");
        assert_eq!(updates[0].1, request.replacements);
    }

    #[tokio::test]
    async fn generate_into_new_folder_and_share() {
        let drive = FakeDrive::with_folders(existing_folders());
        let docs = FakeDocs::default();
        let service = make_service(&drive, &docs);

        let request = TemplateRequest {
            template_id: "tmpl".to_string(),
            new_file_name: "Offer".to_string(),
            replacements: vec![Replacement::new("{{name}}", "Ada")],
            folder: Some("/Docs/Offers".to_string()),
            share_with: Some("ada@example.com".to_string()),
        };

        let generated = service.generate_from_template(&request).await.unwrap();
        assert_eq!(
            generated.share_link.as_deref(),
            Some("https://drive.google.com/open?id=copy-1")
        );

        let state = drive.state.lock().unwrap();
        assert_eq!(state.copies[0].2.as_deref(), Some("new-1"));
        assert_eq!(
            state.permissions,
            vec![("copy-1".to_string(), "ada@example.com".to_string())]
        );
    }

    #[test]
    fn split_path_segments() {
        assert_eq!(split_path("/").unwrap(), Vec::<&str>::new());
        assert_eq!(split_path("/a/b/").unwrap(), vec!["a", "b"]);
        assert!(split_path("a/b").is_err());
    }
}
