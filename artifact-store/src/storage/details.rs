use std::path::Path;

use serde::Serialize;

pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

/// Extensions whose meaning inside an artifact repository is more specific than the generic
/// mapping.
const REPOSITORY_CONTENT_TYPES: &[(&str, &str)] = &[
    ("jar", "application/java-archive"),
    ("war", "application/java-archive"),
    ("ear", "application/java-archive"),
    ("pom", "application/xml"),
    ("xml", "application/xml"),
    ("module", "application/json"),
    ("json", "application/json"),
    ("md5", "text/plain"),
    ("sha1", "text/plain"),
    ("sha256", "text/plain"),
    ("sha512", "text/plain"),
    ("asc", "application/pgp-signature"),
];

/// Maps a file name to its MIME type, defaulting to `application/octet-stream`.
pub fn content_type_of(name: &str) -> String {
    let path = Path::new(name);
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    if let Some(extension) = extension.as_deref() {
        if let Some((_, content_type)) = REPOSITORY_CONTENT_TYPES
            .iter()
            .find(|(known, _)| *known == extension)
        {
            return content_type.to_string();
        }
    }

    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| APPLICATION_OCTET_STREAM.to_string())
}

/// A file or directory entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileDetails {
    Document(DocumentInfo),
    Directory(DirectoryInfo),
    /// Directory reference without resolved children, used as a listing element.
    SimpleDirectory(SimpleDirectoryInfo),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirectoryInfo {
    pub name: String,
    pub children: Vec<FileDetails>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SimpleDirectoryInfo {
    pub name: String,
}

impl DocumentInfo {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        let name = name.into();
        Self {
            content_type: content_type_of(&name),
            name,
            size_bytes,
        }
    }
}

impl FileDetails {
    pub fn name(&self) -> &str {
        match self {
            FileDetails::Document(info) => &info.name,
            FileDetails::Directory(info) => &info.name,
            FileDetails::SimpleDirectory(info) => &info.name,
        }
    }

    pub fn is_directory(&self) -> bool {
        !matches!(self, FileDetails::Document(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_extensions_take_precedence() {
        assert_eq!(content_type_of("app-1.0.jar"), "application/java-archive");
        assert_eq!(content_type_of("app-1.0.pom"), "application/xml");
        assert_eq!(content_type_of("app-1.0.jar.SHA1"), "text/plain");
    }

    #[test]
    fn falls_back_to_guess_then_octet_stream() {
        assert_eq!(content_type_of("index.html"), "text/html");
        assert_eq!(content_type_of("blob.unknownext"), APPLICATION_OCTET_STREAM);
        assert_eq!(content_type_of("LICENSE"), APPLICATION_OCTET_STREAM);
    }

    #[test]
    fn serializes_with_type_tag() {
        let details = FileDetails::Directory(DirectoryInfo {
            name: "1.0".into(),
            children: vec![
                FileDetails::SimpleDirectory(SimpleDirectoryInfo { name: "docs".into() }),
                FileDetails::Document(DocumentInfo::new("app.jar", 3)),
            ],
        });
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["type"], "DIRECTORY");
        assert_eq!(value["children"][0]["type"], "SIMPLE_DIRECTORY");
        assert_eq!(value["children"][1]["content_type"], "application/java-archive");
        assert_eq!(value["children"][1]["size_bytes"], 3);
    }
}
