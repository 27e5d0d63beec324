use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::markdown::ExpandedMarkdown;

/// Maps `IMG_REF_` tokens to `data:` URLs.
pub type ImageReferenceMap = BTreeMap<String, String>;

/// One training unit, built from a `### YamlMime:ModuleUnit` document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub uid: String,
    pub title: String,
    pub duration_in_minutes: u32,
    pub metadata: serde_yaml::Mapping,
    /// Repository path of the unit's YAML file.
    pub source_path: String,
    pub markdown_content: Option<ExpandedMarkdown>,
    /// blake3 hex digest of the expanded Markdown.
    pub content_id: Option<String>,
    pub quiz: Option<Quiz>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub title: Option<String>,
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub content: String,
    pub choices: Vec<QuizChoice>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizChoice {
    pub content: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub uid: String,
    pub title: String,
    pub summary: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub prerequisites: String,
    pub icon_url: Option<String>,
    pub levels: Vec<String>,
    pub roles: Vec<String>,
    pub products: Vec<String>,
    pub subjects: Vec<String>,
    pub badge_uid: Option<String>,
    /// Unit UIDs in the order the overview lists them.
    pub unit_uids: Vec<String>,
    pub metadata: serde_yaml::Mapping,
    /// Repository folder the module was downloaded from.
    pub folder: String,
    pub units: Vec<Unit>,
    pub image_reference_map: ImageReferenceMap,
    /// blake3 hex digest over the unit digests, in unit order.
    pub content_id: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Module {
    pub fn total_duration_minutes(&self) -> u32 {
        self.units.iter().map(|u| u.duration_in_minutes).sum()
    }

    pub fn compute_content_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for unit in &self.units {
            for field in [unit.uid.as_str(), unit.content_id.as_deref().unwrap_or("")] {
                hasher.update(&(field.len() as u64).to_le_bytes());
                hasher.update(field.as_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPath {
    pub uid: String,
    pub title: String,
    pub summary: String,
    pub prerequisites: String,
    pub icon_url: Option<String>,
    pub levels: Vec<String>,
    pub roles: Vec<String>,
    pub products: Vec<String>,
    pub subjects: Vec<String>,
    pub trophy_uid: Option<String>,
    /// Member module UIDs as listed, including any that failed to download.
    pub module_uids: Vec<String>,
    pub metadata: serde_yaml::Mapping,
    pub folder: String,
    pub modules: Vec<Module>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Result of a top-level download.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Content {
    Module(Module),
    LearningPath(LearningPath),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(uid: &str, content_id: Option<&str>) -> Unit {
        Unit {
            uid: uid.to_string(),
            title: String::new(),
            duration_in_minutes: 1,
            metadata: Default::default(),
            source_path: format!("m/{uid}.yml"),
            markdown_content: None,
            content_id: content_id.map(str::to_string),
            quiz: None,
        }
    }

    fn module(units: Vec<Unit>) -> Module {
        Module {
            uid: "learn.m".to_string(),
            title: String::new(),
            summary: String::new(),
            abstract_text: String::new(),
            prerequisites: String::new(),
            icon_url: None,
            levels: Vec::new(),
            roles: Vec::new(),
            products: Vec::new(),
            subjects: Vec::new(),
            badge_uid: None,
            unit_uids: Vec::new(),
            metadata: Default::default(),
            folder: "m".to_string(),
            units,
            image_reference_map: Default::default(),
            content_id: None,
            fetched_at: None,
        }
    }

    #[test]
    fn test_content_id_keeps_field_boundaries() {
        let joined = module(vec![unit("ab", None)]).compute_content_id();
        let split = module(vec![unit("a", Some("b"))]).compute_content_id();
        assert_ne!(joined, split);

        let shifted = module(vec![unit("a", Some("bc")), unit("d", None)]).compute_content_id();
        let other = module(vec![unit("a", Some("b")), unit("cd", None)]).compute_content_id();
        assert_ne!(shifted, other);
    }

    #[test]
    fn test_content_id_follows_unit_order() {
        let a = unit("a", Some("1"));
        let b = unit("b", Some("2"));
        let forward = module(vec![a.clone(), b.clone()]);
        assert_eq!(forward.compute_content_id(), forward.compute_content_id());
        assert_ne!(forward.compute_content_id(), module(vec![b, a]).compute_content_id());
        assert_eq!(forward.total_duration_minutes(), 2);
    }
}
