//! Storage engine of an artifact repository: location-addressed files under a root directory,
//! guarded by per-location read/write locks.

pub mod config;
pub mod error;
pub mod storage;
pub mod utils;

pub use config::{DirectoryOrdering, Quota, StorageConfig};
pub use error::{ErrorResponse, Result};
pub use storage::driver::FileSystemStorageProvider;
pub use storage::lock::{LockError, LockGuard, LockManager, LockMode};
pub use storage::quota::{CapacityOracle, FixedCapacity, QuotaCapacity};
pub use storage::{
    ByteStream, DirectoryInfo, DocumentInfo, FileDetails, Location, ScopedByteStream,
    SimpleDirectoryInfo, StorageProvider, byte_stream,
};
