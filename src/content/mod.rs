pub mod types;
pub mod yaml;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use futures::future::{join_all, try_join_all, FutureExt, LocalBoxFuture};
use tracing::{debug, info, warn};

use crate::fetch::Fetch;
use crate::paths::{classify, file_name, folder_from_uid, image_ref, InputKind};
use crate::repo::DirEntry;
use crate::session::Session;

use types::{Content, ImageReferenceMap, LearningPath, Module, Unit};
use yaml::{load_document, LoadedDocument};

/// Assembles modules and learning paths from the content repository.
///
/// Each top-level call starts from an empty cache. Give concurrent
/// downloads their own `Downloader`.
pub struct Downloader<F> {
    session: Session<F>,
}

impl<F: Fetch> Downloader<F> {
    pub fn new(session: Session<F>) -> Self {
        Self { session }
    }

    /// Download whatever `input` names: a Learn URL, a repository folder,
    /// or (with `is_uid`) a content UID.
    pub async fn download(&self, input: &str, is_uid: bool) -> Result<Content> {
        let input = input.trim();
        let (kind, folder) = if is_uid {
            let folder = folder_from_uid(input);
            (classify(&folder), folder)
        } else {
            let kind = classify(input);
            let folder = if kind.is_url() {
                self.session.folder_from_learn_page(input).await?
            } else {
                input.trim_matches('/').to_string()
            };
            (kind, folder)
        };

        info!(input, folder = %folder, kind = ?kind, "resolved entry point");
        if kind.is_learning_path() {
            Ok(Content::LearningPath(self.download_learning_path(&folder).await?))
        } else {
            Ok(Content::Module(self.download_module(&folder).await?))
        }
    }

    pub async fn download_module(&self, folder: &str) -> Result<Module> {
        self.session.clear().await;
        let module = self.assemble_module(folder).await?;
        info!(
            uid = %module.uid,
            units = module.units.len(),
            images = module.image_reference_map.len(),
            minutes = module.total_duration_minutes(),
            requests = self.session.cached_entries().await,
            "module downloaded"
        );
        Ok(module)
    }

    pub async fn download_learning_path(&self, folder: &str) -> Result<LearningPath> {
        self.session.clear().await;

        let entries = self.session.list_folder(folder).await?;
        let index = entries
            .iter()
            .find(|e| e.is_file() && e.name == "index.yml")
            .ok_or_else(|| anyhow!("No learning path index (index.yml) found in '{}'", folder))?;

        let text = self
            .session
            .read_url(&self.entry_url(index))
            .await
            .with_context(|| format!("Failed to download {}", index.path))?;
        let mut path = match load_document(&self.session, &text, &index.path).await? {
            Some(LoadedDocument::LearningPath(path)) => path,
            _ => bail!("'{}' is not a learning path index", index.path),
        };

        let results = join_all(path.module_uids.iter().map(|uid| async move {
            let module_folder = folder_from_uid(uid);
            match self.assemble_module(&module_folder).await {
                Ok(module) => Some(module),
                Err(e) => {
                    warn!(uid = %uid, folder = %module_folder, error = %e, "dropping module from learning path");
                    None
                }
            }
        }))
        .await;
        path.modules = results.into_iter().flatten().collect();
        path.fetched_at = Some(Utc::now());

        info!(
            uid = %path.uid,
            modules = path.modules.len(),
            listed = path.module_uids.len(),
            requests = self.session.cached_entries().await,
            "learning path downloaded"
        );
        Ok(path)
    }

    async fn assemble_module(&self, folder: &str) -> Result<Module> {
        let entries = self.session.list_folder(folder).await?;

        let yaml_entries: Vec<&DirEntry> = entries.iter().filter(|e| e.is_yaml()).collect();
        debug!(folder, yaml = yaml_entries.len(), "parsing module YAML");
        let loaded = try_join_all(yaml_entries.iter().map(|entry| self.load_entry(entry))).await?;

        let mut module = None;
        let mut units = Vec::new();
        for doc in loaded.into_iter().flatten() {
            match doc {
                LoadedDocument::Module(m) if module.is_none() => module = Some(m),
                LoadedDocument::Module(m) => {
                    warn!(folder, uid = %m.uid, "ignoring additional module overview");
                }
                LoadedDocument::Unit(unit) => units.push(unit),
                LoadedDocument::LearningPath(p) => {
                    debug!(folder, uid = %p.uid, "ignoring learning path document in module folder");
                }
            }
        }

        let mut module =
            module.ok_or_else(|| anyhow!("No module overview found in '{}'", folder))?;
        sort_units(&mut units);
        module.units = units;

        if let Some(media) = entries
            .iter()
            .find(|e| e.is_dir() && e.name.eq_ignore_ascii_case("media"))
        {
            match self.inline_media(media.path.clone()).await {
                Ok(map) => module.image_reference_map = map,
                Err(e) => warn!(folder, error = %e, "media folder could not be listed"),
            }
        }
        module.content_id = Some(module.compute_content_id());
        module.fetched_at = Some(Utc::now());
        Ok(module)
    }

    /// Download and parse one YAML entry. Missing files and unparsable YAML
    /// are logged and skipped; other download failures (rate limiting,
    /// transport) abort the module.
    async fn load_entry(&self, entry: &DirEntry) -> Result<Option<LoadedDocument>> {
        let text = match self.session.read_url(&self.entry_url(entry)).await {
            Ok(text) => text,
            Err(e) if e.is_not_found() => {
                debug!(path = %entry.path, "YAML listed but not served");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to download {}", entry.path));
            }
        };
        match load_document(&self.session, &text, &entry.path).await {
            Ok(doc) => Ok(doc),
            Err(e) => {
                warn!(path = %entry.path, error = %e, "YAML could not be parsed");
                Ok(None)
            }
        }
    }

    /// Every file under `folder`, keyed by its `IMG_REF_` token.
    fn inline_media(&self, folder: String) -> LocalBoxFuture<'_, Result<ImageReferenceMap>> {
        async move {
            let entries = self.session.list_folder(&folder).await?;

            let files = join_all(entries.iter().filter(|e| e.is_file()).map(|entry| async move {
                match self.session.read_media(&self.entry_url(entry), &entry.path).await {
                    Ok(data) => Some((image_ref(&entry.path), data.to_string())),
                    Err(e) => {
                        warn!(path = %entry.path, error = %e, "media download failed");
                        None
                    }
                }
            }));
            let subfolders = join_all(
                entries
                    .iter()
                    .filter(|e| e.is_dir())
                    .map(|entry| self.inline_media(entry.path.clone())),
            );
            let (files, subfolders) = futures::join!(files, subfolders);

            let mut map: ImageReferenceMap = files.into_iter().flatten().collect();
            for nested in subfolders {
                match nested {
                    Ok(nested) => map.extend(nested),
                    Err(e) => warn!(folder = %folder, error = %e, "media subfolder skipped"),
                }
            }
            debug!(folder = %folder, images = map.len(), "media inlined");
            Ok(map)
        }
        .boxed_local()
    }

    fn entry_url(&self, entry: &DirEntry) -> String {
        entry
            .download_url
            .clone()
            .unwrap_or_else(|| self.session.repo().raw_url(&entry.path))
    }
}

/// Leading digits of a unit's file name (`3-outro.yml` -> 3).
fn unit_number(unit: &Unit) -> Option<u64> {
    let name = file_name(&unit.source_path);
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Numbered units first in numeric order, then unnumbered ones; stable.
fn sort_units(units: &mut [Unit]) {
    units.sort_by_key(|unit| match unit_number(unit) {
        Some(n) => (0, n),
        None => (1, 0),
    });
}
