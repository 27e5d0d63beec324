use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;

use crate::fetch::cache::ContentCache;
use crate::fetch::{Fetch, FetchError};
use crate::markdown::FileReader;
use crate::paths;
use crate::repo::{parse_listing, DirEntry, Repository};

/// State of one top-level download: the fetcher, the repository it reads
/// from, and the request cache. Create one per download so concurrent
/// downloads never share or clear each other's cache.
pub struct Session<F> {
    fetcher: F,
    repo: Repository,
    cache: ContentCache,
}

impl<F: Fetch> Session<F> {
    pub fn new(fetcher: F, repo: Repository) -> Self {
        Self {
            fetcher,
            repo,
            cache: ContentCache::new(),
        }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    #[cfg(test)]
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.len().await
    }

    /// Immediate children of a repository folder.
    pub async fn list_folder(&self, folder: &str) -> Result<Vec<DirEntry>> {
        let url = self.repo.contents_url(folder);
        let body = self
            .cache
            .document(&url, || self.fetcher.get_text(&url))
            .await
            .with_context(|| format!("Failed to list folder '{}'", folder))?;
        parse_listing(folder, &body)
    }

    pub async fn read_url(&self, url: &str) -> Result<Arc<str>, FetchError> {
        self.cache.document(url, || self.fetcher.get_text(url)).await
    }

    /// Download a media file as a `data:` URL.
    pub async fn read_media(&self, url: &str, path: &str) -> Result<Arc<str>, FetchError> {
        self.cache
            .media(url, || async {
                let bytes = self.fetcher.get_bytes(url).await?;
                Ok(data_url(mime_type(path), &bytes))
            })
            .await
    }

    /// Repository folder behind a Learn page URL. Always hits the network.
    pub async fn folder_from_learn_page(&self, url: &str) -> Result<String> {
        paths::extract_folder_from_learn_page(&self.fetcher, url).await
    }
}

impl<F: Fetch> FileReader for Session<F> {
    async fn read_file(&self, path: &str) -> Result<Arc<str>, FetchError> {
        let url = self.repo.raw_url(path);
        self.read_url(&url).await
    }
}

pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

pub fn mime_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
