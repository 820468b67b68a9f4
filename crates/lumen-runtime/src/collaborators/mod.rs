//! Narrow interfaces to the collaborators a session uses, with in-memory
//! implementations.
//!
//! The runtime never looks inside these; it wires them into sessions and
//! passes them through to the script engine.

pub mod cache;
pub mod components;
pub mod media;
pub mod uploads;

pub use cache::{
    CacheStorage, CacheStorageContext, CacheStorageManager, MemoryCacheStorage,
    MemoryCacheStorageManager,
};
pub use components::{ComponentRegistry, LocalComponentRegistry, RegisteredComponent};
pub use media::{MediaFile, MediaFileStorage, MemoryMediaFileStorage};
pub use uploads::{MemoryUploadedFileManager, UploadedFileManager, UploadedFileRec};
