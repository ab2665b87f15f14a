use std::io;
use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;
use walkdir::WalkDir;

use crate::config::Quota;
use crate::error::Result;

/// Source of the number of bytes a repository may still grow by.
#[async_trait::async_trait]
pub trait CapacityOracle: Send + Sync {
    async fn remaining_capacity(&self) -> Result<i64>;
}

/// Capacity derived from a [`Quota`] over a root directory.
#[derive(Clone, Debug)]
pub struct QuotaCapacity {
    root: PathBuf,
    quota: Quota,
}

impl QuotaCapacity {
    pub fn new(root: impl Into<PathBuf>, quota: Quota) -> Self {
        Self {
            root: root.into(),
            quota,
        }
    }
}

#[async_trait::async_trait]
impl CapacityOracle for QuotaCapacity {
    async fn remaining_capacity(&self) -> Result<i64> {
        let root = self.root.clone();
        let quota = self.quota;
        let remaining = tokio::task::spawn_blocking(move || remaining_bytes(&root, quota)).await??;
        Ok(i64::try_from(remaining).unwrap_or(i64::MAX))
    }
}

/// Constant capacity, for callers that account for quota elsewhere.
#[derive(Clone, Copy, Debug)]
pub struct FixedCapacity(pub i64);

#[async_trait::async_trait]
impl CapacityOracle for FixedCapacity {
    async fn remaining_capacity(&self) -> Result<i64> {
        Ok(self.0)
    }
}

fn remaining_bytes(root: &Path, quota: Quota) -> io::Result<u64> {
    match quota {
        Quota::Unlimited => {
            let stats = statvfs(root).map_err(io::Error::from)?;
            Ok(stats.blocks_available() as u64 * stats.fragment_size() as u64)
        }
        Quota::Bytes(limit) => Ok(limit.saturating_sub(directory_usage(root)?)),
        Quota::Percentage(percentage) => {
            let stats = statvfs(root).map_err(io::Error::from)?;
            let total = stats.blocks() as u64 * stats.fragment_size() as u64;
            let allowed = total / 100 * u64::from(percentage);
            Ok(allowed.saturating_sub(directory_usage(root)?))
        }
    }
}

/// Total size in bytes of the regular files below `root`. Blocking.
pub(crate) fn directory_usage(root: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            // Removed by a concurrent operation while walking.
            Err(err) if err.depth() > 0 && vanished(&err) => continue,
            Err(err) => return Err(err.into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => total += metadata.len(),
            Err(err) if vanished(&err) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(total)
}

fn vanished(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|err| err.kind() == io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_sums_nested_files() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        std::fs::create_dir_all(root.path().join("a/b"))?;
        std::fs::write(root.path().join("top.txt"), b"12345")?;
        std::fs::write(root.path().join("a/b/deep.bin"), vec![0u8; 1000])?;

        assert_eq!(directory_usage(root.path())?, 1005);
        Ok(())
    }

    #[test]
    fn usage_of_missing_root_fails() {
        let err = directory_usage(Path::new("/definitely/not/here")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn byte_quota_subtracts_usage() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        std::fs::write(root.path().join("artifact.jar"), vec![1u8; 100])?;

        let capacity = QuotaCapacity::new(root.path(), Quota::Bytes(150));
        assert_eq!(capacity.remaining_capacity().await?, 50);

        let exhausted = QuotaCapacity::new(root.path(), Quota::Bytes(10));
        assert_eq!(exhausted.remaining_capacity().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_quotas_report_positive_capacity() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        assert!(QuotaCapacity::new(root.path(), Quota::Unlimited).remaining_capacity().await? > 0);
        assert!(
            QuotaCapacity::new(root.path(), Quota::Percentage(100))
                .remaining_capacity()
                .await?
                > 0
        );
        Ok(())
    }
}
