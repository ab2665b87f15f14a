use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ErrorResponse;

pub const DEFAULT_LOCK_IDLE_TIMEOUT: Duration = Duration::from_secs(180);
pub const DEFAULT_LOCK_EVICTION_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub root_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub quota: Quota,
    pub lock_idle_timeout: Duration,
    pub lock_eviction_interval: Duration,
    pub directory_ordering: DirectoryOrdering,
}

impl StorageConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            staging_dir: std::env::temp_dir().join("artifact-store-staging"),
            quota: Quota::Unlimited,
            lock_idle_timeout: DEFAULT_LOCK_IDLE_TIMEOUT,
            lock_eviction_interval: DEFAULT_LOCK_EVICTION_INTERVAL,
            directory_ordering: DirectoryOrdering::DirectoriesFirst,
        }
    }

    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    pub fn with_quota(mut self, quota: Quota) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_lock_idle_timeout(mut self, timeout: Duration) -> Self {
        self.lock_idle_timeout = timeout;
        self
    }

    pub fn with_lock_eviction_interval(mut self, interval: Duration) -> Self {
        self.lock_eviction_interval = interval;
        self
    }

    pub fn with_directory_ordering(mut self, ordering: DirectoryOrdering) -> Self {
        self.directory_ordering = ordering;
        self
    }
}

/// Whether directories are pinned before or after files in listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirectoryOrdering {
    #[default]
    DirectoriesFirst,
    FilesFirst,
}

/// Upper bound on the bytes a repository may occupy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Quota {
    /// Bounded only by the free space of the underlying filesystem.
    #[default]
    Unlimited,
    Bytes(u64),
    /// Percentage of the total size of the filesystem holding the root.
    Percentage(u8),
}

impl FromStr for Quota {
    type Err = ErrorResponse;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("unlimited") {
            return Ok(Quota::Unlimited);
        }

        if let Some(percentage) = value.strip_suffix('%') {
            return match percentage.trim().parse::<u8>() {
                Ok(p) if p <= 100 => Ok(Quota::Percentage(p)),
                _ => Err(ErrorResponse::bad_request(format!(
                    "invalid quota percentage `{raw}`"
                ))),
            };
        }

        let upper = value.to_ascii_uppercase();
        let split = upper
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(upper.len());
        let (digits, unit) = upper.split_at(split);
        let amount = digits
            .parse::<u64>()
            .map_err(|_| ErrorResponse::bad_request(format!("invalid quota `{raw}`")))?;
        let multiplier: u64 = match unit.trim() {
            "" | "B" => 1,
            "KB" | "K" => 1 << 10,
            "MB" | "M" => 1 << 20,
            "GB" | "G" => 1 << 30,
            "TB" | "T" => 1 << 40,
            other => {
                return Err(ErrorResponse::bad_request(format!(
                    "unknown quota unit `{other}` in `{raw}`"
                )));
            }
        };
        amount
            .checked_mul(multiplier)
            .map(Quota::Bytes)
            .ok_or_else(|| ErrorResponse::bad_request(format!("quota `{raw}` is too large")))
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quota::Unlimited => write!(f, "unlimited"),
            Quota::Bytes(bytes) => write!(f, "{bytes}B"),
            Quota::Percentage(p) => write!(f, "{p}%"),
        }
    }
}
