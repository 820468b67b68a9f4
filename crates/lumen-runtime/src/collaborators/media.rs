//! Media file storage (images, audio, video produced by scripts).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// One stored media file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaFile {
    /// Raw bytes.
    pub data: Arc<Vec<u8>>,
    /// MIME type, e.g. `image/png`.
    pub mimetype: String,
    /// Download filename, if the script supplied one.
    pub filename: Option<String>,
}

/// Storage for media produced by script runs, addressable under a base path.
pub trait MediaFileStorage: Send + Sync {
    /// URL prefix files are served under.
    fn base_path(&self) -> &str;

    /// Store bytes and return the new file ID.
    fn load_and_get_id(&self, data: Vec<u8>, mimetype: &str, filename: Option<&str>) -> String;

    /// Fetch a stored file.
    fn get_file(&self, file_id: &str) -> Option<MediaFile>;

    /// URL a client can fetch the file from.
    fn get_url(&self, file_id: &str) -> Option<String>;

    /// Remove a file. Returns whether it existed.
    fn delete_file(&self, file_id: &str) -> bool;
}

/// In-memory media storage.
pub struct MemoryMediaFileStorage {
    base_path: String,
    files: DashMap<String, MediaFile>,
}

impl MemoryMediaFileStorage {
    /// Create storage serving under `base_path` (trailing `/` trimmed).
    pub fn new(base_path: impl Into<String>) -> Self {
        let mut base_path = base_path.into();
        while base_path.len() > 1 && base_path.ends_with('/') {
            let _ = base_path.pop();
        }
        Self {
            base_path,
            files: DashMap::new(),
        }
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no files are stored.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl MediaFileStorage for MemoryMediaFileStorage {
    fn base_path(&self) -> &str {
        &self.base_path
    }

    fn load_and_get_id(&self, data: Vec<u8>, mimetype: &str, filename: Option<&str>) -> String {
        let file_id = Uuid::now_v7().simple().to_string();
        debug!(file_id, mimetype, bytes = data.len(), "media file stored");
        let _ = self.files.insert(
            file_id.clone(),
            MediaFile {
                data: Arc::new(data),
                mimetype: mimetype.to_owned(),
                filename: filename.map(str::to_owned),
            },
        );
        file_id
    }

    fn get_file(&self, file_id: &str) -> Option<MediaFile> {
        self.files.get(file_id).map(|f| f.value().clone())
    }

    fn get_url(&self, file_id: &str) -> Option<String> {
        self.files
            .contains_key(file_id)
            .then(|| format!("{}/{file_id}", self.base_path))
    }

    fn delete_file(&self, file_id: &str) -> bool {
        self.files.remove(file_id).is_some()
    }
}
