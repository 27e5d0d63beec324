use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;

const API_BASE: &str = "https://api.github.com";
const RAW_BASE: &str = "https://raw.githubusercontent.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    #[serde(other)]
    Other,
}

/// One child of a listed folder, as reported by the contents API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl DirEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_yaml(&self) -> bool {
        self.is_file() && (self.name.ends_with(".yml") || self.name.ends_with(".yaml"))
    }
}

/// Coordinates of the content repository and its URL scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub branch: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            branch: branch.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.repo_owner, &config.repo_name, &config.repo_branch)
    }

    /// Directory-listing endpoint for a repository folder.
    pub fn contents_url(&self, folder: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            API_BASE,
            self.owner,
            self.name,
            folder.trim_matches('/'),
            self.branch
        )
    }

    /// Direct download URL for a repository file.
    pub fn raw_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            RAW_BASE,
            self.owner,
            self.name,
            self.branch,
            path.trim_start_matches('/')
        )
    }
}

/// Parse a contents-API response body. A single-file response (an object
/// rather than an array) means the path was not a folder.
pub fn parse_listing(folder: &str, body: &str) -> Result<Vec<DirEntry>> {
    serde_json::from_str::<Vec<DirEntry>>(body)
        .with_context(|| format!("'{}' is not a listable folder", folder))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repository {
        Repository::new("MicrosoftDocs", "learn", "main")
    }

    #[test]
    fn test_contents_url() {
        assert_eq!(
            repo().contents_url("/learn-pr/azure/intro-to-azure/"),
            "https://api.github.com/repos/MicrosoftDocs/learn/contents/learn-pr/azure/intro-to-azure?ref=main"
        );
    }

    #[test]
    fn test_raw_url() {
        assert_eq!(
            repo().raw_url("learn-pr/azure/intro/index.yml"),
            "https://raw.githubusercontent.com/MicrosoftDocs/learn/main/learn-pr/azure/intro/index.yml"
        );
    }

    #[test]
    fn test_parse_listing() {
        let body = r#"[
            {"name": "index.yml", "path": "a/index.yml", "type": "file", "download_url": "https://raw/a/index.yml", "sha": "x"},
            {"name": "media", "path": "a/media", "type": "dir", "download_url": null},
            {"name": "link", "path": "a/link", "type": "symlink"}
        ]"#;
        let entries = parse_listing("a", body).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_yaml());
        assert!(entries[1].is_dir());
        assert_eq!(entries[1].download_url, None);
        assert_eq!(entries[2].kind, EntryKind::Other);
    }

    #[test]
    fn test_parse_listing_rejects_file_object() {
        let body = r#"{"name": "index.yml", "path": "a/index.yml", "type": "file"}"#;
        let err = parse_listing("a/index.yml", body).unwrap_err();
        assert!(err.to_string().contains("not a listable folder"));
    }
}
