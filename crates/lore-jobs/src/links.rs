//! Internal link resolution and note-type mapping.
//!
//! Links are parsed from markdown (`[text](target)`) and wiki
//! (`[[Target]]`, `[[Target|alias]]`) syntax. A target resolves when it is
//! the id or the title of another note in the same import.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use lore_core::{ImportNote, InferredType, InternalLink};

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]]+)\]\(([^()\s]+)\)").expect("valid markdown link pattern"));

static WIKI_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\[([^\[\]|]+)(?:\|([^\[\]]+))?\]\]").expect("valid wiki link pattern")
});

/// Importer note types that already name an entity category. Notes with one
/// of these are skipped by classification unless the caller overrides.
pub const PRE_CLASSIFIED_TYPES: &[&str] = &["character", "npc", "area", "quest", "session_log"];

fn normalize_type(note_type: &str) -> String {
    note_type.trim().to_lowercase().replace([' ', '-'], "_")
}

pub fn is_pre_classified(note_type: Option<&str>) -> bool {
    note_type
        .map(normalize_type)
        .is_some_and(|t| PRE_CLASSIFIED_TYPES.contains(&t.as_str()))
}

/// Static mapping from an importer note type to an inferred type. Unknown
/// or missing types map to `Note`.
pub fn inferred_type_for(note_type: Option<&str>) -> InferredType {
    note_type
        .map(|t| InferredType::from_label(&normalize_type(t)))
        .unwrap_or(InferredType::Note)
}

/// Lookup of the notes in one import by id and by title.
#[derive(Debug, Default)]
pub struct LinkIndex {
    ids: HashSet<Uuid>,
    by_title: HashMap<String, Uuid>,
    titles: HashMap<Uuid, String>,
}

impl LinkIndex {
    pub fn new(notes: &[ImportNote]) -> Self {
        let mut index = Self::default();
        for note in notes {
            index.ids.insert(note.id);
            index.titles.insert(note.id, note.title.clone());
            // First note wins on duplicate titles.
            index
                .by_title
                .entry(title_key(&note.title))
                .or_insert(note.id);
        }
        index
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn title(&self, id: Uuid) -> Option<&str> {
        self.titles.get(&id).map(String::as_str)
    }

    fn resolve_target(&self, target: &str) -> Option<Uuid> {
        let target = target.trim();
        if target.contains("://") || target.starts_with("mailto:") {
            return None;
        }
        let path = target.split(['#', '?']).next().unwrap_or_default();
        let segment = path.rsplit('/').next().unwrap_or_default();
        let segment = segment.strip_suffix(".md").unwrap_or(segment);
        let decoded = segment.replace("%20", " ");

        if let Ok(id) = Uuid::parse_str(&decoded) {
            return self.contains(id).then_some(id);
        }
        self.by_title.get(&title_key(&decoded)).copied()
    }

    /// Links from `note` to other notes in the import: parsed link syntax
    /// first, then the importer's explicit link ids. One link per target.
    pub fn resolve_links(&self, note: &ImportNote) -> Vec<InternalLink> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        let mut push = |target: Uuid, text: &str| {
            if target != note.id && seen.insert(target) {
                links.push(InternalLink {
                    target_note_id: target,
                    link_text: text.trim().to_string(),
                });
            }
        };

        for caps in WIKI_LINK.captures_iter(&note.content) {
            let target = &caps[1];
            let text = caps.get(2).map_or(target, |m| m.as_str());
            if let Some(id) = self.resolve_target(target) {
                push(id, text);
            }
        }
        for caps in MARKDOWN_LINK.captures_iter(&note.content) {
            if let Some(id) = self.resolve_target(&caps[2]) {
                push(id, &caps[1]);
            }
        }
        for &target in &note.linked_note_ids {
            if let Some(title) = self.titles.get(&target) {
                push(target, title);
            }
        }
        links
    }
}

fn title_key(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
