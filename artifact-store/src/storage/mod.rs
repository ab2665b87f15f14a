use chrono::{DateTime, Utc};

use crate::error::Result;

pub mod details;
pub mod driver;
pub mod location;
pub mod lock;
pub mod quota;
pub mod stream;

pub use details::{DirectoryInfo, DocumentInfo, FileDetails, SimpleDirectoryInfo};
pub use location::Location;
pub use stream::{ByteStream, ScopedByteStream, byte_stream};

/// Location-addressed storage consumed by the repository layer.
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    /// Stores `stream` at `location`, replacing any existing file atomically.
    async fn put(&self, location: &Location, stream: ByteStream) -> Result<()>;

    /// Opens `location` for reading. The returned stream holds the location's read lock.
    async fn get(&self, location: &Location) -> Result<ScopedByteStream>;

    async fn stat(&self, location: &Location) -> Result<FileDetails>;

    /// Deletes a file, or a directory with everything below it.
    async fn remove(&self, location: &Location) -> Result<()>;

    /// Immediate children of `location`.
    async fn list(&self, location: &Location) -> Result<Vec<Location>>;

    async fn last_modified(&self, location: &Location) -> Result<DateTime<Utc>>;

    /// Size of a file in bytes; `-1` for directories, and the whole repository for the root.
    async fn size(&self, location: &Location) -> Result<i64>;

    async fn exists(&self, location: &Location) -> bool;

    /// Bytes occupied by the whole repository.
    async fn usage(&self) -> Result<i64> {
        self.size(&Location::empty()).await
    }

    async fn can_hold(&self, content_length: u64) -> Result<bool>;

    async fn is_full(&self) -> Result<bool>;

    async fn shutdown(&self);
}
