//! In-memory stand-ins for the network, shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::fetch::{Fetch, FetchError};
use crate::markdown::FileReader;
use crate::repo::{DirEntry, EntryKind, Repository};

/// Repository files keyed by path, read directly (no URLs involved).
#[derive(Default)]
pub struct MapReader {
    files: HashMap<String, String>,
    reads: AtomicUsize,
}

impl MapReader {
    pub fn with(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl FileReader for MapReader {
    async fn read_file(&self, path: &str) -> Result<Arc<str>, FetchError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.files
            .get(path)
            .map(|s| Arc::from(s.as_str()))
            .ok_or_else(|| FetchError::Status {
                url: path.to_string(),
                status: 404,
            })
    }
}

/// Serves a fixture repository the way the hosting API does: folder
/// listings as contents-API JSON, files at their raw URLs, plus arbitrary
/// extra URLs. Counts every request.
pub struct MemoryFetcher {
    repo: Repository,
    files: BTreeMap<String, Vec<u8>>,
    pages: HashMap<String, String>,
    failures: HashMap<String, FetchError>,
    requests: Mutex<HashMap<String, usize>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self {
            repo: fixture_repo(),
            files: BTreeMap::new(),
            pages: HashMap::new(),
            failures: HashMap::new(),
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_file(mut self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.files.insert(path.to_string(), content.as_ref().to_vec());
        self
    }

    pub fn with_url(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.to_string());
        self
    }

    /// Answer `url` with `error` instead of its content.
    pub fn with_failure(mut self, url: &str, error: FetchError) -> Self {
        self.failures.insert(url.to_string(), error);
        self
    }

    pub fn requests_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .map(|r| r.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record(&self, url: &str) {
        if let Ok(mut requests) = self.requests.lock() {
            *requests.entry(url.to_string()).or_default() += 1;
        }
    }

    fn listing(&self, folder: &str) -> Option<String> {
        let prefix = format!("{}/", folder.trim_matches('/'));
        let mut seen = BTreeSet::new();
        let mut entries = Vec::new();

        for path in self.files.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let (name, kind) = match rest.split_once('/') {
                Some((dir, _)) => (dir, EntryKind::Dir),
                None => (rest, EntryKind::File),
            };
            if !seen.insert(name.to_string()) {
                continue;
            }
            let child = format!("{}{}", prefix, name);
            entries.push(DirEntry {
                name: name.to_string(),
                download_url: (kind == EntryKind::File).then(|| self.repo.raw_url(&child)),
                path: child,
                kind,
            });
        }

        if entries.is_empty() {
            None
        } else {
            serde_json::to_string(&entries).ok()
        }
    }

    fn lookup(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.record(url);

        if let Some(error) = self.failures.get(url) {
            return Err(error.clone());
        }

        if let Some(body) = self.pages.get(url) {
            return Ok(body.clone().into_bytes());
        }

        let contents_prefix = format!(
            "https://api.github.com/repos/{}/{}/contents/",
            self.repo.owner, self.repo.name
        );
        let raw_prefix = format!(
            "https://raw.githubusercontent.com/{}/{}/{}/",
            self.repo.owner, self.repo.name, self.repo.branch
        );

        let found = if let Some(rest) = url.strip_prefix(&contents_prefix) {
            let folder = rest.split('?').next().unwrap_or(rest);
            self.listing(folder).map(String::into_bytes)
        } else if let Some(path) = url.strip_prefix(&raw_prefix) {
            self.files.get(path).cloned()
        } else {
            None
        };

        found.ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

impl Fetch for MemoryFetcher {
    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        tokio::task::yield_now().await;
        let bytes = self.lookup(url)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        tokio::task::yield_now().await;
        self.lookup(url)
    }
}

pub fn fixture_repo() -> Repository {
    Repository::new("MicrosoftDocs", "learn", "main")
}
