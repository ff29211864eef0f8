//! Deterministic test doubles.
//!
//! [`MockGenerationBackend`] scripts raw model replies so the LLM provider's
//! batching, recovery and fallback paths can be exercised without a model
//! server. [`MockProvider`] implements [`GenerationProvider`] directly with
//! keyword heuristics and is what `provider = "mock"` selects.
//!
//! ```rust
//! use std::sync::Arc;
//! use lore_inference::mock::MockGenerationBackend;
//! use lore_inference::LlmProvider;
//!
//! let backend = Arc::new(
//!     MockGenerationBackend::new()
//!         .with_response(r#"[{"id": "1", "type": "npc", "confidence": 0.9}]"#)
//!         .with_error("connection refused"),
//! );
//! let provider = LlmProvider::new(backend.clone());
//! assert_eq!(backend.call_count(), 0);
//! # let _ = provider;
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use lore_core::{
    ClassificationResult, Error, EvidenceType, GenerationBackend, InferredType,
    NoteForClassification, NoteWithClassification, RelationshipResult, RelationshipType, Result,
};

use crate::provider::{
    dedupe_relationships, report, ClassifyOptions, EntityExtraction, EntityType,
    ExistingNoteRef, ExtractedEntity, GenerationProvider, ProgressCallback,
};

// =============================================================================
// MOCK BACKEND
// =============================================================================

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// Generation backend that replays scripted replies in order, then falls
/// back to a default reply.
#[derive(Debug)]
pub struct MockGenerationBackend {
    model: String,
    replies: Mutex<VecDeque<Reply>>,
    default_reply: Reply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            replies: Mutex::new(VecDeque::new()),
            default_reply: Reply::Text("[]".to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful reply.
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.push(Reply::Text(response.into()))
    }

    /// Queue a failed call.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(Reply::Fail(message.into()))
    }

    /// Reply used once the queue is empty.
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_reply = Reply::Text(response.into());
        self
    }

    /// Fail every call that has no queued reply.
    pub fn failing(mut self) -> Self {
        self.default_reply = Reply::Fail("mock backend failure".to_string());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn push(self, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
        self
    }

    /// Number of generation calls made, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every user prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_reply(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(message) => Err(Error::Inference(message)),
        }
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.next_reply(prompt)
    }

    async fn generate_with_system(&self, _system: &str, prompt: &str) -> Result<String> {
        self.next_reply(prompt)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

// =============================================================================
// MOCK PROVIDER
// =============================================================================

const SESSION_WORDS: &[&str] = &["session", "recap", "last time"];
const QUEST_WORDS: &[&str] = &["quest", "mission", "bounty", "job board", "reward"];
const AREA_WORDS: &[&str] = &[
    "tavern", "inn", "city", "town", "village", "forest", "dungeon", "castle", "temple", "port",
    "keep", "cave",
];
const NPC_WORDS: &[&str] = &[
    "npc", "innkeeper", "merchant", "captain", "priest", "guard", "blacksmith",
];

/// Keyword-driven provider with no model behind it.
#[derive(Debug, Default)]
pub struct MockProvider {
    classify_calls: AtomicUsize,
    relationship_calls: AtomicUsize,
    entity_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn relationship_calls(&self) -> usize {
        self.relationship_calls.load(Ordering::SeqCst)
    }

    pub fn entity_calls(&self) -> usize {
        self.entity_calls.load(Ordering::SeqCst)
    }

    fn classify_one(note: &NoteForClassification, pc_names: &[String]) -> ClassificationResult {
        let title = note.title.to_lowercase();
        let text = format!("{} {}", title, note.content.to_lowercase());
        let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

        let (ty, confidence, why) = if pc_names
            .iter()
            .any(|n| !n.trim().is_empty() && title.contains(&n.trim().to_lowercase()))
        {
            (InferredType::Character, 0.95, "title names a player character")
        } else if has(SESSION_WORDS) {
            (InferredType::SessionLog, 0.9, "reads as a session recap")
        } else if has(QUEST_WORDS) {
            (InferredType::Quest, 0.85, "describes a goal or reward")
        } else if has(NPC_WORDS) {
            (InferredType::Npc, 0.7, "describes a person")
        } else if has(AREA_WORDS) {
            (InferredType::Area, 0.8, "describes a place")
        } else {
            (InferredType::Note, 0.55, "no distinguishing keywords")
        };
        ClassificationResult::new(note.id, ty, confidence, why)
    }
}

/// Directed type for a linked pair, with the quest or NPC as the source.
fn linked_pair_type(
    from: &NoteWithClassification,
    to: &NoteWithClassification,
) -> (RelationshipType, bool) {
    use InferredType::*;
    match (from.inferred_type, to.inferred_type) {
        (Quest, Npc) => (RelationshipType::QuestHasNpc, false),
        (Npc, Quest) => (RelationshipType::QuestHasNpc, true),
        (Quest, Area) => (RelationshipType::QuestAtPlace, false),
        (Area, Quest) => (RelationshipType::QuestAtPlace, true),
        (Npc, Area) => (RelationshipType::NpcInPlace, false),
        (Area, Npc) => (RelationshipType::NpcInPlace, true),
        _ => (RelationshipType::Related, false),
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    async fn classify_notes(
        &self,
        notes: &[NoteForClassification],
        on_progress: Option<&ProgressCallback>,
        options: &ClassifyOptions,
    ) -> Vec<ClassificationResult> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        let total = notes.len();
        report(on_progress, 0, total, notes.first().map(|n| n.title.as_str()));
        let results = notes
            .iter()
            .map(|n| Self::classify_one(n, &options.player_character_names))
            .collect();
        report(on_progress, total, total, None);
        results
    }

    async fn extract_relationships(
        &self,
        notes: &[NoteWithClassification],
        on_progress: Option<&ProgressCallback>,
    ) -> Vec<RelationshipResult> {
        if notes.len() < 2 {
            return Vec::new();
        }
        self.relationship_calls.fetch_add(1, Ordering::SeqCst);
        let total = notes.len();
        report(on_progress, 0, total, notes.first().map(|n| n.title.as_str()));

        let mut found = Vec::new();
        for from in notes {
            for link in &from.links {
                let Some(to) = notes.iter().find(|n| n.id == link.target_note_id) else {
                    continue;
                };
                if to.id == from.id {
                    continue;
                }
                let (relationship_type, swap) = linked_pair_type(from, to);
                let rel = RelationshipResult {
                    from_note_id: from.id,
                    to_note_id: to.id,
                    relationship_type,
                    confidence: 0.9,
                    evidence_snippet: link.link_text.clone(),
                    evidence_type: EvidenceType::Link,
                };
                found.push(if swap { rel.reversed() } else { rel });
            }
        }

        report(on_progress, total, total, None);
        dedupe_relationships(found)
    }

    async fn extract_entities(
        &self,
        content: &str,
        existing: &[ExistingNoteRef],
    ) -> EntityExtraction {
        self.entity_calls.fetch_add(1, Ordering::SeqCst);
        let haystack = content.to_lowercase();
        let entities = existing
            .iter()
            .filter(|n| !n.title.trim().is_empty())
            .filter_map(|n| {
                let needle = n.title.to_lowercase();
                let mentions = haystack.matches(needle.as_str()).count() as u32;
                (mentions > 0).then(|| ExtractedEntity {
                    name: n.title.clone(),
                    entity_type: n
                        .note_type
                        .as_deref()
                        .map(EntityType::from_label)
                        .unwrap_or_default(),
                    description: String::new(),
                    confidence: 0.9,
                    mentions,
                    existing_note_id: Some(n.id),
                })
            })
            .collect();
        EntityExtraction {
            entities,
            relationships: Vec::new(),
        }
    }

    fn model_id(&self) -> &str {
        "mock-provider"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_core::InternalLink;
    use uuid::Uuid;

    fn note(title: &str, content: &str) -> NoteForClassification {
        NoteForClassification {
            id: Uuid::new_v4(),
            title: title.to_string(),
            content: content.to_string(),
            current_type: None,
            existing_link_titles: vec![],
        }
    }

    #[tokio::test]
    async fn test_backend_replays_then_defaults() {
        let backend = MockGenerationBackend::new()
            .with_response("first")
            .with_error("boom")
            .with_default_response("rest");
        assert_eq!(backend.generate("a").await.unwrap(), "first");
        assert!(backend.generate("b").await.is_err());
        assert_eq!(backend.generate_json("c").await.unwrap(), "rest");
        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failing_backend() {
        let backend = MockGenerationBackend::new().failing();
        let err = backend.generate_with_system("sys", "p").await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }

    #[tokio::test]
    async fn test_mock_provider_heuristics() {
        let provider = MockProvider::new();
        let notes = vec![
            note("Kael Stormborn", "our rogue"),
            note("Session 3", "the party fought goblins"),
            note("The Missing Idol", "reward of 50gp"),
            note("Rusty Flagon", "a tavern by the docks"),
            note("Mira", "the innkeeper"),
            note("Loot", "a pile of coins"),
        ];
        let options = ClassifyOptions {
            player_character_names: vec!["Kael".into()],
        };
        let results = provider.classify_notes(&notes, None, &options).await;
        let types: Vec<InferredType> = results.iter().map(|r| r.inferred_type).collect();
        assert_eq!(
            types,
            vec![
                InferredType::Character,
                InferredType::SessionLog,
                InferredType::Quest,
                InferredType::Area,
                InferredType::Npc,
                InferredType::Note,
            ]
        );
        assert_eq!(provider.classify_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_provider_links_become_relationships() {
        let provider = MockProvider::new();
        let area = NoteWithClassification {
            id: Uuid::new_v4(),
            title: "Docks".into(),
            content: String::new(),
            inferred_type: InferredType::Area,
            links: vec![],
        };
        let npc = NoteWithClassification {
            id: Uuid::new_v4(),
            title: "Mira".into(),
            content: String::new(),
            inferred_type: InferredType::Npc,
            links: vec![],
        };
        let mut area = area;
        area.links.push(InternalLink {
            target_note_id: npc.id,
            link_text: "Mira".into(),
        });
        let mut npc = npc;
        npc.links.push(InternalLink {
            target_note_id: area.id,
            link_text: "the docks".into(),
        });

        let results = provider
            .extract_relationships(&[area.clone(), npc.clone()], None)
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].relationship_type, RelationshipType::NpcInPlace);
        assert_eq!(results[0].from_note_id, npc.id);
        assert_eq!(results[0].to_note_id, area.id);
        assert_eq!(results[0].evidence_type, EvidenceType::Link);
    }

    #[tokio::test]
    async fn test_mock_provider_entities_from_existing_titles() {
        let provider = MockProvider::new();
        let existing = vec![ExistingNoteRef {
            id: Uuid::new_v4(),
            title: "Mira".into(),
            note_type: Some("npc".into()),
        }];
        let out = provider
            .extract_entities("Mira waved. Later, mira frowned.", &existing)
            .await;
        assert_eq!(out.entities.len(), 1);
        assert_eq!(out.entities[0].mentions, 2);
        assert_eq!(provider.entity_calls(), 1);
    }
}
