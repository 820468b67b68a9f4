//! Storage for files clients upload into a session.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

/// A file uploaded by a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFileRec {
    /// Client-assigned file ID, unique within the session.
    pub file_id: String,
    /// Original filename.
    pub name: String,
    /// MIME type reported by the client.
    pub mimetype: String,
    /// Contents.
    pub data: Arc<Vec<u8>>,
}

/// Per-session uploaded file storage, addressable under a base path.
pub trait UploadedFileManager: Send + Sync {
    /// URL prefix uploads are accepted under.
    fn base_path(&self) -> &str;

    /// Store a file for a session, replacing one with the same ID.
    fn add_file(&self, session_id: &str, file: UploadedFileRec);

    /// Files of a session matching `file_ids`, in the requested order.
    /// Unknown IDs are skipped.
    fn get_files(&self, session_id: &str, file_ids: &[&str]) -> Vec<UploadedFileRec>;

    /// Remove one file. Returns whether it existed.
    fn remove_file(&self, session_id: &str, file_id: &str) -> bool;

    /// Remove everything a session uploaded. Called on session shutdown.
    fn remove_session_files(&self, session_id: &str);

    /// Upload URL for a file.
    fn get_upload_url(&self, session_id: &str, file_id: &str) -> String {
        format!("{}/{session_id}/{file_id}", self.base_path())
    }
}

/// In-memory uploaded file storage.
pub struct MemoryUploadedFileManager {
    base_path: String,
    files_by_session: DashMap<String, HashMap<String, UploadedFileRec>>,
}

impl MemoryUploadedFileManager {
    /// Create storage accepting uploads under `base_path`.
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            files_by_session: DashMap::new(),
        }
    }

    /// Number of sessions with at least one stored file.
    pub fn session_count(&self) -> usize {
        self.files_by_session.len()
    }
}

impl UploadedFileManager for MemoryUploadedFileManager {
    fn base_path(&self) -> &str {
        &self.base_path
    }

    fn add_file(&self, session_id: &str, file: UploadedFileRec) {
        debug!(session_id, file_id = %file.file_id, "uploaded file stored");
        let _ = self
            .files_by_session
            .entry(session_id.to_owned())
            .or_default()
            .insert(file.file_id.clone(), file);
    }

    fn get_files(&self, session_id: &str, file_ids: &[&str]) -> Vec<UploadedFileRec> {
        let Some(files) = self.files_by_session.get(session_id) else {
            return Vec::new();
        };
        file_ids
            .iter()
            .filter_map(|id| files.get(*id).cloned())
            .collect()
    }

    fn remove_file(&self, session_id: &str, file_id: &str) -> bool {
        let removed = self
            .files_by_session
            .get_mut(session_id)
            .is_some_and(|mut files| files.remove(file_id).is_some());
        // Drop empty per-session maps so session_count stays meaningful
        let _ = self
            .files_by_session
            .remove_if(session_id, |_, files| files.is_empty());
        removed
    }

    fn remove_session_files(&self, session_id: &str) {
        if let Some((_, files)) = self.files_by_session.remove(session_id) {
            debug!(session_id, count = files.len(), "session uploads removed");
        }
    }
}
