use std::sync::LazyLock;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Serialize;

use crate::fetch::Fetch;

static SOURCE_PATH_META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+name="source_path"\s+content="([^"]+)""#).expect("valid regex")
});

/// What a user-supplied entry point refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputKind {
    ModuleUrl,
    LearningPathUrl,
    ModuleFolder,
    LearningPathFolder,
}

impl InputKind {
    pub fn is_url(self) -> bool {
        matches!(self, InputKind::ModuleUrl | InputKind::LearningPathUrl)
    }

    pub fn is_learning_path(self) -> bool {
        matches!(self, InputKind::LearningPathUrl | InputKind::LearningPathFolder)
    }
}

/// Resolve `relative` against the document at `base`.
///
/// Paths not starting with `.` are already repository-absolute and come back
/// unchanged. `..` past the root is a no-op.
pub fn resolve_relative(relative: &str, base: &str) -> String {
    if !relative.starts_with('.') {
        return relative.to_string();
    }

    let base_dir = match base.rfind('/') {
        Some(idx) => &base[..idx],
        None => "",
    };

    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        match segment {
            ".." => {
                segments.pop();
            }
            "." => {}
            other => segments.push(other),
        }
    }
    segments.join("/")
}

pub fn classify(input: &str) -> InputKind {
    let lower = input.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        if lower.contains("/training/paths/") {
            InputKind::LearningPathUrl
        } else {
            InputKind::ModuleUrl
        }
    } else if input.contains("/paths/") {
        InputKind::LearningPathFolder
    } else {
        InputKind::ModuleFolder
    }
}

/// `learn.philanthropies.explore-ai-basics` -> `learn-pr/philanthropies/explore-ai-basics`
pub fn folder_from_uid(uid: &str) -> String {
    uid.split('.')
        .map(|segment| if segment == "learn" { "learn-pr" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

/// Synthetic token naming an image by its absolute repository path. The
/// expander and the media-inlining step both derive keys through here.
pub fn image_ref(path: &str) -> String {
    let sanitized: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("IMG_REF_{}", sanitized)
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Pull the repository folder out of a Learn page's `source_path` meta tag.
pub fn source_folder_from_html(html: &str) -> Option<String> {
    let caps = SOURCE_PATH_META.captures(html)?;
    let path = caps.get(1)?.as_str().trim();
    let folder = path.strip_suffix("/index.yml").unwrap_or(path);
    Some(folder.trim_matches('/').to_string())
}

/// Fetch a Learn page and recover the repository folder it was built from.
/// Not cached: each call scrapes the live page.
pub async fn extract_folder_from_learn_page<F: Fetch>(fetcher: &F, url: &str) -> Result<String> {
    let html = fetcher
        .get_text(url)
        .await
        .with_context(|| format!("Failed to fetch Learn page {}", url))?;
    source_folder_from_html(&html)
        .ok_or_else(|| anyhow!("No source_path meta tag found on {}", url))
}
