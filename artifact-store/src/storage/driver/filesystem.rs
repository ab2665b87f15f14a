use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio::{
    fs::{File, copy, create_dir_all, metadata, read_dir, remove_file, rename, symlink_metadata},
    io::{self, AsyncWriteExt, BufWriter},
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::{DirectoryOrdering, StorageConfig};
use crate::error::{ErrorResponse, Result};
use crate::storage::details::{
    DirectoryInfo, DocumentInfo, FileDetails, SimpleDirectoryInfo, content_type_of,
};
use crate::storage::location::Location;
use crate::storage::lock::LockManager;
use crate::storage::quota::{CapacityOracle, QuotaCapacity, directory_usage};
use crate::storage::stream::{ByteStream, ScopedByteStream};
use crate::storage::StorageProvider;
use crate::utils::version::compare_entries;

/// Storage provider backed by a directory tree.
///
/// Writes are staged in a separate directory and renamed onto their destination under the
/// location's write lock, so readers only ever see complete files. Reads hold the location's read
/// lock for as long as the returned stream is alive.
pub struct FileSystemStorageProvider {
    root: PathBuf,
    staging_dir: PathBuf,
    directory_ordering: DirectoryOrdering,
    capacity: Arc<dyn CapacityOracle>,
    locks: LockManager,
}

impl FileSystemStorageProvider {
    /// Creates a provider enforcing `config.quota`. Must be called within a tokio runtime.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let capacity = Arc::new(QuotaCapacity::new(&config.root_dir, config.quota));
        Self::with_capacity(config, capacity).await
    }

    pub async fn with_capacity(
        config: &StorageConfig,
        capacity: Arc<dyn CapacityOracle>,
    ) -> Result<Self> {
        let root_meta = metadata(&config.root_dir).await.map_err(|err| {
            ErrorResponse::internal(format!(
                "storage root `{}` is not accessible: {err}",
                config.root_dir.display()
            ))
        })?;
        if !root_meta.is_dir() {
            return Err(ErrorResponse::internal(format!(
                "storage root `{}` is not a directory",
                config.root_dir.display()
            )));
        }
        create_dir_all(&config.staging_dir).await?;

        info!(
            root = %config.root_dir.display(),
            staging = %config.staging_dir.display(),
            quota = %config.quota,
            "filesystem storage provider ready"
        );
        Ok(Self {
            root: config.root_dir.clone(),
            staging_dir: config.staging_dir.clone(),
            directory_ordering: config.directory_ordering,
            capacity,
            locks: LockManager::new(config.lock_idle_timeout, config.lock_eviction_interval),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    fn resolve(&self, location: &Location) -> PathBuf {
        location.resolve(&self.root)
    }

    async fn metadata_of(&self, location: &Location) -> Result<(PathBuf, Metadata)> {
        let path = self.resolve(location);
        match metadata(&path).await {
            Ok(meta) => Ok((path, meta)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(ErrorResponse::not_found(format!("`{location}` not found")))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Streams `stream` into a fresh staging file, failing once more than `limit` bytes arrive.
    async fn stage(
        &self,
        location: &Location,
        mut stream: ByteStream,
        limit: i64,
    ) -> Result<StagingFile> {
        let staging = StagingFile::new(self.staging_dir.join(format!("{}.part", Uuid::new_v4())));
        let mut writer = BufWriter::new(File::create(staging.path()).await?);
        let limit = u64::try_from(limit).unwrap_or(0);
        let mut written = 0u64;

        while let Some(chunk) = stream.try_next().await? {
            written += chunk.len() as u64;
            if written > limit {
                warn!(%location, limit, "upload exceeds remaining capacity");
                return Err(ErrorResponse::insufficient_storage(format!(
                    "not enough storage space to store `{location}`, {limit} bytes remaining"
                )));
            }
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        debug!(%location, bytes = written, staging = %staging.path().display(), "upload staged");
        Ok(staging)
    }

    /// Moves a staged file onto `target`. Caller holds the write lock.
    async fn commit(&self, mut staging: StagingFile, target: &Path) -> Result<()> {
        match rename(staging.path(), target).await {
            Ok(()) => {
                staging.committed = true;
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                // Staging lives on another filesystem: copy next to the target, then rename there.
                let file_name = target
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or("upload");
                let sibling_name = format!(".{file_name}.{}.part", Uuid::new_v4());
                let mut sibling = StagingFile::new(target.with_file_name(sibling_name));
                copy(staging.path(), sibling.path()).await?;
                rename(sibling.path(), target).await?;
                sibling.committed = true;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait::async_trait]
impl StorageProvider for FileSystemStorageProvider {
    async fn put(&self, location: &Location, stream: ByteStream) -> Result<()> {
        if location.is_empty() {
            return Err(ErrorResponse::bad_request("cannot write to the repository root"));
        }
        debug!(%location, "put");

        let remaining = self.capacity.remaining_capacity().await?;
        let target = self.resolve(location);
        if let Some(parent) = target.parent() {
            create_dir_all(parent).await?;
        }
        let staging = self.stage(location, stream, remaining).await?;

        let guard = self.locks.write(location).await?;
        let committed = self.commit(staging, &target).await;
        guard.release();

        debug!(%location, ok = committed.is_ok(), "put finished");
        committed
    }

    async fn get(&self, location: &Location) -> Result<ScopedByteStream> {
        debug!(%location, "get");
        let (path, meta) = self.metadata_of(location).await?;
        if meta.is_dir() {
            return Err(ErrorResponse::bad_request(format!("`{location}` is a directory")));
        }

        let guard = self.locks.read(location).await?;
        // On failure the guard is dropped, and the lock released, before the error reaches
        // the caller.
        let file = File::open(&path).await?;
        let content_length = file.metadata().await?.len();
        let content_type = content_type_of(location.file_name().unwrap_or_default());

        Ok(ScopedByteStream::new(file, guard, content_length, content_type))
    }

    async fn stat(&self, location: &Location) -> Result<FileDetails> {
        debug!(%location, "stat");
        let (path, meta) = self.metadata_of(location).await?;
        let name = location.file_name().unwrap_or_default().to_string();

        if !meta.is_dir() {
            return Ok(FileDetails::Document(DocumentInfo::new(name, meta.len())));
        }

        let mut children = Vec::new();
        let mut entries = read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(child_name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "skipping non UTF-8 entry");
                continue;
            };
            let child_meta = match metadata(entry.path()).await {
                Ok(meta) => meta,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            children.push(if child_meta.is_dir() {
                FileDetails::SimpleDirectory(SimpleDirectoryInfo { name: child_name })
            } else {
                FileDetails::Document(DocumentInfo::new(child_name, child_meta.len()))
            });
        }
        let ordering = self.directory_ordering;
        children.sort_by(|a, b| {
            compare_entries(
                ordering,
                (a.is_directory(), a.name()),
                (b.is_directory(), b.name()),
            )
        });

        Ok(FileDetails::Directory(DirectoryInfo { name, children }))
    }

    async fn remove(&self, location: &Location) -> Result<()> {
        if location.is_empty() {
            return Err(ErrorResponse::bad_request("refusing to remove the repository root"));
        }
        debug!(%location, "remove");

        let path = self.resolve(location);
        let _guard = self.locks.write(location).await?;
        let meta = match symlink_metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ErrorResponse::not_found(format!("`{location}` not found")));
            }
            Err(err) => return Err(err.into()),
        };

        if meta.is_dir() {
            tokio::task::spawn_blocking(move || remove_tree(&path)).await??;
        } else {
            remove_file(&path).await?;
        }
        Ok(())
    }

    async fn list(&self, location: &Location) -> Result<Vec<Location>> {
        debug!(%location, "list");
        let (path, meta) = self.metadata_of(location).await?;
        if !meta.is_dir() {
            return Ok(Vec::new());
        }

        let mut children = Vec::new();
        let mut entries = read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let child = match Location::relativize(&self.root, &entry.path()) {
                Ok(child) => child,
                Err(err) => {
                    warn!(
                        path = %entry.path().display(),
                        "skipping unaddressable entry: {}",
                        err.message
                    );
                    continue;
                }
            };
            let is_dir = metadata(entry.path())
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false);
            children.push((is_dir, child));
        }
        let ordering = self.directory_ordering;
        children.sort_by(|(a_is_dir, a), (b_is_dir, b)| {
            compare_entries(
                ordering,
                (*a_is_dir, a.file_name().unwrap_or_default()),
                (*b_is_dir, b.file_name().unwrap_or_default()),
            )
        });

        Ok(children.into_iter().map(|(_, child)| child).collect())
    }

    async fn last_modified(&self, location: &Location) -> Result<DateTime<Utc>> {
        let (_, meta) = self.metadata_of(location).await?;
        Ok(DateTime::<Utc>::from(meta.modified()?))
    }

    async fn size(&self, location: &Location) -> Result<i64> {
        let (path, meta) = self.metadata_of(location).await?;
        if location.is_empty() {
            let total = tokio::task::spawn_blocking(move || directory_usage(&path)).await??;
            return Ok(i64::try_from(total).unwrap_or(i64::MAX));
        }
        if meta.is_dir() {
            return Ok(-1);
        }
        Ok(i64::try_from(meta.len()).unwrap_or(i64::MAX))
    }

    async fn exists(&self, location: &Location) -> bool {
        tokio::fs::try_exists(self.resolve(location))
            .await
            .unwrap_or(false)
    }

    async fn can_hold(&self, content_length: u64) -> Result<bool> {
        let remaining = self.capacity.remaining_capacity().await?;
        Ok(i64::try_from(content_length).is_ok_and(|length| length <= remaining))
    }

    async fn is_full(&self) -> Result<bool> {
        Ok(self.capacity.remaining_capacity().await? <= 0)
    }

    async fn shutdown(&self) {
        self.locks.shutdown().await;
        info!(root = %self.root.display(), "filesystem storage provider shut down");
    }
}

/// Staged upload, deleted on drop unless it was moved onto its destination.
struct StagingFile {
    path: PathBuf,
    committed: bool,
}

impl StagingFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Drop cannot await; unlinking one file is a short blocking call on the worker.
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "failed to clean up staging file: {err}");
            }
        }
    }
}

/// Deletes `root` and everything below it, deepest entries first. Blocking.
///
/// Stops at the first failure; whatever was deleted until then stays deleted.
fn remove_tree(root: &Path) -> io::Result<()> {
    for entry in WalkDir::new(root).follow_links(false).contents_first(true) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_tree_deletes_deepest_first() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let tree = root.path().join("tree");
        std::fs::create_dir_all(tree.join("a/b/c"))?;
        std::fs::write(tree.join("a/one.txt"), b"1")?;
        std::fs::write(tree.join("a/b/c/two.txt"), b"2")?;

        remove_tree(&tree)?;
        assert!(!tree.exists());
        assert!(root.path().exists());
        Ok(())
    }

    #[test]
    fn staging_file_is_removed_unless_committed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let discarded = dir.path().join("discarded.part");
        let kept = dir.path().join("kept.part");
        std::fs::write(&discarded, b"x")?;
        std::fs::write(&kept, b"y")?;

        drop(StagingFile::new(discarded.clone()));
        let mut committed = StagingFile::new(kept.clone());
        committed.committed = true;
        drop(committed);

        assert!(!discarded.exists());
        assert!(kept.exists());
        Ok(())
    }
}
