use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use super::types::{LearningPath, Module, Quiz, QuizChoice, QuizQuestion, Unit};
use crate::markdown::directives::{find_includes, splice};
use crate::markdown::{expand, FileReader};

const MODULE_MARKER: &str = "### YamlMime:Module";
const UNIT_MARKER: &str = "### YamlMime:ModuleUnit";
const LEARNING_PATH_MARKER: &str = "### YamlMime:LearningPath";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Module,
    Unit,
    LearningPath,
}

/// A parsed content document. Learning paths carry their member module
/// UIDs in `LearningPath::module_uids`.
#[derive(Debug, Clone)]
pub enum LoadedDocument {
    Module(Module),
    Unit(Unit),
    LearningPath(LearningPath),
}

/// Kind of content document, read from the `### YamlMime:` marker on the
/// first line. Anything else is not a content document.
pub fn document_kind(text: &str) -> Option<DocumentKind> {
    let first = text.trim_start_matches('\u{feff}').lines().next()?.trim();
    match first {
        MODULE_MARKER => Some(DocumentKind::Module),
        UNIT_MARKER => Some(DocumentKind::Unit),
        LEARNING_PATH_MARKER => Some(DocumentKind::LearningPath),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UidRef {
    uid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawModule {
    uid: String,
    title: String,
    summary: String,
    #[serde(rename = "abstract")]
    abstract_text: String,
    prerequisites: String,
    icon_url: Option<String>,
    levels: Vec<String>,
    roles: Vec<String>,
    products: Vec<String>,
    subjects: Vec<String>,
    units: Vec<String>,
    badge: Option<UidRef>,
    metadata: serde_yaml::Mapping,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawUnit {
    uid: String,
    title: String,
    duration_in_minutes: u32,
    content: Option<String>,
    quiz: Option<RawQuiz>,
    metadata: serde_yaml::Mapping,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawQuiz {
    title: Option<String>,
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawQuestion {
    content: String,
    choices: Vec<RawChoice>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawChoice {
    content: String,
    is_correct: bool,
    explanation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawLearningPath {
    uid: String,
    title: String,
    summary: String,
    prerequisites: String,
    icon_url: Option<String>,
    levels: Vec<String>,
    roles: Vec<String>,
    products: Vec<String>,
    subjects: Vec<String>,
    modules: Vec<String>,
    trophy: Option<UidRef>,
    metadata: serde_yaml::Mapping,
}

/// Parse one YAML file found at `path`. Returns `Ok(None)` for YAML that
/// is not a content document.
pub async fn load_document<R: FileReader>(
    reader: &R,
    text: &str,
    path: &str,
) -> Result<Option<LoadedDocument>> {
    let Some(kind) = document_kind(text) else {
        debug!(path, "skipping non-content YAML");
        return Ok(None);
    };

    let doc = match kind {
        DocumentKind::Module => LoadedDocument::Module(parse_module(text, path)?),
        DocumentKind::Unit => LoadedDocument::Unit(load_unit(reader, text, path).await?),
        DocumentKind::LearningPath => LoadedDocument::LearningPath(parse_learning_path(text, path)?),
    };
    Ok(Some(doc))
}

pub fn parse_module(text: &str, path: &str) -> Result<Module> {
    let raw: RawModule =
        serde_yaml::from_str(text).with_context(|| format!("Invalid module YAML in {}", path))?;

    Ok(Module {
        uid: raw.uid,
        title: raw.title,
        summary: raw.summary,
        abstract_text: raw.abstract_text,
        prerequisites: raw.prerequisites,
        icon_url: raw.icon_url,
        levels: raw.levels,
        roles: raw.roles,
        products: raw.products,
        subjects: raw.subjects,
        badge_uid: raw.badge.and_then(|b| b.uid),
        unit_uids: raw.units,
        metadata: raw.metadata,
        folder: parent_folder(path).to_string(),
        units: Vec::new(),
        image_reference_map: Default::default(),
        content_id: None,
        fetched_at: None,
    })
}

pub fn parse_learning_path(text: &str, path: &str) -> Result<LearningPath> {
    let raw: RawLearningPath = serde_yaml::from_str(text)
        .with_context(|| format!("Invalid learning path YAML in {}", path))?;

    Ok(LearningPath {
        uid: raw.uid,
        title: raw.title,
        summary: raw.summary,
        prerequisites: raw.prerequisites,
        icon_url: raw.icon_url,
        levels: raw.levels,
        roles: raw.roles,
        products: raw.products,
        subjects: raw.subjects,
        trophy_uid: raw.trophy.and_then(|t| t.uid),
        module_uids: raw.modules,
        metadata: raw.metadata,
        folder: parent_folder(path).to_string(),
        modules: Vec::new(),
        fetched_at: None,
    })
}

/// Parse a unit and resolve the Markdown its `content` field includes.
pub async fn load_unit<R: FileReader>(reader: &R, text: &str, path: &str) -> Result<Unit> {
    let raw: RawUnit =
        serde_yaml::from_str(text).with_context(|| format!("Invalid unit YAML in {}", path))?;

    let content = raw.content.as_deref().unwrap_or("").trim();
    let includes = find_includes(content);
    let markdown_content = if includes.is_empty() {
        warn!(path, uid = %raw.uid, "unit has no include; no body content");
        None
    } else {
        // Unit includes name files beside the YAML without a leading `./`.
        let anchored = splice(
            content,
            includes
                .into_iter()
                .filter(|inc| !inc.path.starts_with('.'))
                .map(|inc| (inc.span, format!("[!include[{}](./{})]", inc.title, inc.path)))
                .collect(),
        );
        Some(expand(reader, &anchored, path).await)
    };
    let content_id = markdown_content
        .as_ref()
        .map(|md| blake3::hash(md.content.as_bytes()).to_hex().to_string());

    Ok(Unit {
        uid: raw.uid,
        title: raw.title,
        duration_in_minutes: raw.duration_in_minutes,
        metadata: raw.metadata,
        source_path: path.to_string(),
        markdown_content,
        content_id,
        quiz: raw.quiz.map(convert_quiz),
    })
}

fn convert_quiz(raw: RawQuiz) -> Quiz {
    Quiz {
        title: raw.title,
        questions: raw
            .questions
            .into_iter()
            .map(|q| QuizQuestion {
                content: q.content,
                choices: q
                    .choices
                    .into_iter()
                    .map(|c| QuizChoice {
                        content: c.content,
                        is_correct: c.is_correct,
                        explanation: c.explanation,
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn parent_folder(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}
