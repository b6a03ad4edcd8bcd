// Folder tree reconstruction.
// Drive only tells us each folder's parent, never its children, so the full
// path of every folder has to be rebuilt client-side from a flat listing.
// Everything in here is pure: no I/O, no Drive types, no async.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Path of the drive root.
pub const ROOT_PATH: &str = "/";

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// One folder as returned by a folder listing.
///
/// Only the first parent is used. Drive still models multi-parent items even
/// though it no longer lets you create them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "parents")]
    pub parent_ids: Vec<String>,
}

impl FolderRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_ids: vec![parent_id.into()],
        }
    }

    /// The effective parent of this folder.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_ids.first().map(String::as_str)
    }
}

/// The result of one resolution: every folder path and its identifier, both ways.
///
/// Built fresh from a listing snapshot. It goes stale as soon as a folder is
/// created remotely, so callers resolve again instead of patching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTree {
    root_id: String,
    paths_by_id: HashMap<String, String>,
    ids_by_path: BTreeMap<String, String>,
}

impl DirectoryTree {
    /// Identifier of the folder at `/`.
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Translate a user supplied path (`/Docs/Templates`, trailing slash allowed)
    /// into the folder identifier.
    pub fn id_for(&self, path: &str) -> Option<&str> {
        self.ids_by_path
            .get(normalize_path(path)?)
            .map(String::as_str)
    }

    /// Translate an identifier back into its full path.
    pub fn path_for(&self, id: &str) -> Option<&str> {
        self.paths_by_id.get(id).map(String::as_str)
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.id_for(path).is_some()
    }

    /// Number of folders in the tree, not counting the root.
    pub fn folder_count(&self) -> usize {
        self.ids_by_path.len() - 1
    }

    /// All `(path, id)` pairs in path order, root first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.ids_by_path
            .iter()
            .map(|(path, id)| (path.as_str(), id.as_str()))
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Why a listing could not be turned into a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HierarchyReason {
    /// No parent id falls outside the record set, so there is nothing to call the root.
    NoRoot,
    /// More than one parent id falls outside the record set.
    AmbiguousRoot { candidates: Vec<String> },
    /// Records left over once nothing more could be resolved (cycle or dangling parent).
    Unresolved { ids: Vec<String> },
    /// Two folders ended up on the same path (same name under one parent).
    PathCollision { path: String, ids: Vec<String> },
    /// The same identifier was reached twice while walking the tree.
    DuplicateId { id: String },
}

impl HierarchyReason {
    /// Stable short code so callers can branch on the failure without matching fields.
    pub fn code(&self) -> &'static str {
        match self {
            HierarchyReason::NoRoot => "no_root",
            HierarchyReason::AmbiguousRoot { .. } => "ambiguous_root",
            HierarchyReason::Unresolved { .. } => "unresolved",
            HierarchyReason::PathCollision { .. } => "path_collision",
            HierarchyReason::DuplicateId { .. } => "duplicate_id",
        }
    }
}

impl fmt::Display for HierarchyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyReason::NoRoot => write!(f, "no root folder could be identified"),
            HierarchyReason::AmbiguousRoot { candidates } => {
                write!(f, "multiple root candidates: {}", candidates.join(", "))
            }
            HierarchyReason::Unresolved { ids } => write!(
                f,
                "{} folder(s) unreachable from the root: {}",
                ids.len(),
                ids.join(", ")
            ),
            HierarchyReason::PathCollision { path, ids } => {
                write!(f, "path {} is shared by folders {}", path, ids.join(", "))
            }
            HierarchyReason::DuplicateId { id } => write!(f, "folder id {} listed twice", id),
        }
    }
}

/// The listing does not describe a single-rooted tree.
///
/// Always structural. Retrying with the same listing gives the same answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed folder hierarchy ({}): {reason}", .reason.code())]
pub struct MalformedHierarchy {
    pub reason: HierarchyReason,
}

impl From<HierarchyReason> for MalformedHierarchy {
    fn from(reason: HierarchyReason) -> Self {
        Self { reason }
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Rebuild the directory tree, inferring the root by elimination: the root is
/// the one parent id that never shows up as a record of its own.
pub fn resolve(records: &[FolderRecord]) -> Result<DirectoryTree, MalformedHierarchy> {
    let root_id = find_root(records)?;
    build_tree(records, root_id)
}

/// Rebuild the directory tree under a root id the caller already knows.
pub fn resolve_with_root(
    records: &[FolderRecord],
    root_id: &str,
) -> Result<DirectoryTree, MalformedHierarchy> {
    build_tree(records, root_id.to_string())
}

fn find_root(records: &[FolderRecord]) -> Result<String, MalformedHierarchy> {
    let ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();

    let mut candidates: Vec<&str> = records
        .iter()
        .filter_map(FolderRecord::parent_id)
        .filter(|parent| !ids.contains(parent))
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    match candidates.len() {
        0 => Err(HierarchyReason::NoRoot.into()),
        1 => Ok(candidates[0].to_string()),
        _ => Err(HierarchyReason::AmbiguousRoot {
            candidates: candidates.into_iter().map(str::to_string).collect(),
        }
        .into()),
    }
}

/// Breadth-first walk out from the root over a parent -> children index.
/// Listing order doesn't matter; whatever the walk never reaches is either on
/// a cycle or hangs off a parent we don't know about.
fn build_tree(records: &[FolderRecord], root_id: String) -> Result<DirectoryTree, MalformedHierarchy> {
    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        if let Some(parent) = record.parent_id() {
            children.entry(parent).or_default().push(index);
        }
    }

    let mut paths_by_id: HashMap<String, String> = HashMap::with_capacity(records.len() + 1);
    paths_by_id.insert(root_id.clone(), ROOT_PATH.to_string());

    let mut resolved = vec![false; records.len()];
    let mut queue: VecDeque<&str> = VecDeque::from([root_id.as_str()]);

    while let Some(parent) = queue.pop_front() {
        let Some(child_indices) = children.get(parent) else {
            continue;
        };
        let parent_path = paths_by_id[parent].clone();

        for &index in child_indices {
            let record = &records[index];
            if paths_by_id.contains_key(&record.id) {
                return Err(HierarchyReason::DuplicateId {
                    id: record.id.clone(),
                }
                .into());
            }

            paths_by_id.insert(record.id.clone(), join_path(&parent_path, &record.name));
            resolved[index] = true;
            queue.push_back(record.id.as_str());
        }
    }

    let mut unresolved: Vec<String> = records
        .iter()
        .zip(&resolved)
        .filter(|(_, done)| !**done)
        .map(|(record, _)| record.id.clone())
        .collect();
    if !unresolved.is_empty() {
        unresolved.sort();
        return Err(HierarchyReason::Unresolved { ids: unresolved }.into());
    }

    let ids_by_path = invert(&paths_by_id)?;

    Ok(DirectoryTree {
        root_id,
        paths_by_id,
        ids_by_path,
    })
}

fn invert(paths_by_id: &HashMap<String, String>) -> Result<BTreeMap<String, String>, MalformedHierarchy> {
    // Sorted so the reported collision is the same on every run.
    let mut pairs: Vec<(&String, &String)> = paths_by_id.iter().map(|(id, path)| (path, id)).collect();
    pairs.sort();

    for window in pairs.windows(2) {
        let (path, first) = window[0];
        let (next_path, second) = window[1];
        if path == next_path {
            return Err(HierarchyReason::PathCollision {
                path: path.clone(),
                ids: vec![first.clone(), second.clone()],
            }
            .into());
        }
    }

    Ok(pairs
        .into_iter()
        .map(|(path, id)| (path.clone(), id.clone()))
        .collect())
}

// ============================================================================
// PATH HELPERS
// ============================================================================

/// Append a folder name to a parent path.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Strip trailing slashes; `None` for anything not rooted at `/`.
pub fn normalize_path(path: &str) -> Option<&str> {
    if !path.starts_with('/') {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    Some(if trimmed.is_empty() { ROOT_PATH } else { trimmed })
}
