// Location is the public addressing unit of the storage engine: a normalized, root-relative path.
//
// The persisted layout mirrors locations 1:1 beneath the configured root:
//
//	<root>
//	└── <segment 0>
//	    └── <segment 1>
//	        └── ...
//	            └── <segment n>
//
// Every segment is validated on construction, so a location can never resolve outside of the root.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{ErrorResponse, Result};
use crate::utils::validation::is_valid_segment;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    segments: Vec<String>,
}

impl Location {
    /// The root of the repository.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a `/`-separated path. Backslashes are treated as separators and empty segments are
    /// dropped, so `"/com//example/"` and `"com\\example"` are the same location.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::from_segments(raw.split(['/', '\\']).filter(|s| !s.is_empty()))
            .map_err(|err| ErrorResponse::bad_request(format!("{} in `{raw}`", err.message)))
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(Into::into)
            .map(|segment| {
                if is_valid_segment(&segment) {
                    Ok(segment)
                } else {
                    Err(ErrorResponse::bad_request(format!(
                        "illegal path segment `{}`",
                        segment.escape_debug()
                    )))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }

    /// Maps an absolute path below `root` back to a location.
    pub fn relativize(root: &Path, path: &Path) -> Result<Self> {
        let relative = path.strip_prefix(root).map_err(|_| {
            ErrorResponse::bad_request(format!(
                "`{}` is not located under `{}`",
                path.display(),
                root.display()
            ))
        })?;

        let segments = relative
            .components()
            .map(|component| match component {
                Component::Normal(part) => part.to_str().map(str::to_string).ok_or_else(|| {
                    ErrorResponse::bad_request(format!(
                        "non UTF-8 path segment in `{}`",
                        path.display()
                    ))
                }),
                _ => Err(ErrorResponse::bad_request(format!(
                    "unexpected component in `{}`",
                    path.display()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_segments(segments)
    }

    /// Returns the absolute filesystem path of this location below `root`.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        self.segments
            .iter()
            .fold(root.to_path_buf(), |path, segment| path.join(segment))
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Location> {
        self.segments.split_last().map(|(_, parent)| Location {
            segments: parent.to_vec(),
        })
    }

    pub fn join(&self, segment: &str) -> Result<Location> {
        let mut joined = self.clone();
        joined.segments.extend(Self::parse(segment)?.segments);
        Ok(joined)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl FromStr for Location {
    type Err = ErrorResponse;

    fn from_str(raw: &str) -> Result<Self> {
        Self::parse(raw)
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
