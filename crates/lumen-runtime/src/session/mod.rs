//! Per-client sessions: the execution lifecycle, its outbound queue, and the
//! client handle messages are delivered to.

pub mod app_session;
pub mod client;
pub mod queue;

use std::sync::Arc;

use tokio::sync::Notify;

pub use app_session::{AppSession, AppSessionState};
pub use client::{ChannelSessionClient, ClientDisconnected, SessionClient};
pub use queue::ForwardMsgQueue;

#[cfg(test)]
pub use client::MockSessionClient;

use crate::collaborators::{
    CacheStorageManager, ComponentRegistry, LocalComponentRegistry, MediaFileStorage,
    MemoryCacheStorageManager, MemoryMediaFileStorage, MemoryUploadedFileManager,
    UploadedFileManager,
};
use crate::engine::ScriptEngine;

/// Collaborators shared by every session of a runtime.
#[derive(Clone)]
pub struct SessionServices {
    /// Runs scripts.
    pub script_engine: Arc<dyn ScriptEngine>,
    /// Per-session uploaded files.
    pub uploaded_file_manager: Arc<dyn UploadedFileManager>,
    /// Cached function results.
    pub cache_storage_manager: Arc<dyn CacheStorageManager>,
    /// Media produced by scripts.
    pub media_file_storage: Arc<dyn MediaFileStorage>,
    /// Registered extension components.
    pub component_registry: Arc<dyn ComponentRegistry>,
    /// Signalled whenever a session enqueues a message.
    pub message_enqueued: Arc<Notify>,
}

impl SessionServices {
    /// In-memory collaborators around `script_engine`.
    pub fn in_memory(script_engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            script_engine,
            uploaded_file_manager: Arc::new(MemoryUploadedFileManager::new("/_lumen/upload")),
            cache_storage_manager: Arc::new(MemoryCacheStorageManager::new()),
            media_file_storage: Arc::new(MemoryMediaFileStorage::new("/_lumen/media")),
            component_registry: Arc::new(LocalComponentRegistry::new()),
            message_enqueued: Arc::new(Notify::new()),
        }
    }
}

impl std::fmt::Debug for SessionServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionServices")
            .field("uploads", &self.uploaded_file_manager.base_path())
            .field("media", &self.media_file_storage.base_path())
            .finish_non_exhaustive()
    }
}
