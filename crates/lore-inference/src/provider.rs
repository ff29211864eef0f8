//! Enrichment provider: batched classification, relationship extraction and
//! entity extraction on top of a [`GenerationBackend`].
//!
//! Provider operations never fail. A provider error or an unparseable
//! response is logged at the batch (or single-call) boundary and replaced by
//! default results, so a flaky model degrades a run instead of aborting it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use lore_core::confidence::{clamp_confidence, is_high};
use lore_core::defaults;
use lore_core::{
    ClassificationResult, Error, EvidenceType, GenerationBackend, InferredType,
    NoteForClassification, NoteWithClassification, RelationshipResult, RelationshipType,
};

use crate::prompts;
use crate::recovery::{self, RecoveryError};

// =============================================================================
// PUBLIC TYPES
// =============================================================================

/// Progress within one provider phase. `total` is fixed for the phase and
/// `current` never decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub current: usize,
    pub total: usize,
    /// Title of the first note in the batch about to be sent.
    pub label: Option<String>,
}

pub type ProgressCallback = dyn Fn(ProgressUpdate) + Send + Sync;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifyOptions {
    /// Notes about these names classify as `character`, not `npc`.
    #[serde(default)]
    pub player_character_names: Vec<String>,
}

/// Existing note offered to entity extraction for name reuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingNoteRef {
    pub id: Uuid,
    pub title: String,
    pub note_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    #[default]
    Npc,
    Character,
    Location,
    Quest,
    Item,
    Faction,
    Event,
}

impl EntityType {
    /// Unrecognised labels coerce to [`EntityType::Npc`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "npc" => Self::Npc,
            "character" | "pc" => Self::Character,
            "location" | "area" | "place" => Self::Location,
            "quest" => Self::Quest,
            "item" | "artifact" => Self::Item,
            "faction" | "organization" | "guild" => Self::Faction,
            "event" => Self::Event,
            _ => Self::Npc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
    pub confidence: f32,
    /// At least 1.
    pub mentions: u32,
    /// Existing note whose title matches `name`, if any.
    pub existing_note_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntityRelationship {
    pub from_name: String,
    pub to_name: String,
    pub relationship_type: String,
    pub confidence: f32,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityExtraction {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedEntityRelationship>,
}

/// Capability set consumed by the worker and the preview path.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// One result per input note, in input order.
    async fn classify_notes(
        &self,
        notes: &[NoteForClassification],
        on_progress: Option<&ProgressCallback>,
        options: &ClassifyOptions,
    ) -> Vec<ClassificationResult>;

    /// Relationships between notes of the set, deduplicated by unordered
    /// pair and type. Empty for fewer than two notes.
    async fn extract_relationships(
        &self,
        notes: &[NoteWithClassification],
        on_progress: Option<&ProgressCallback>,
    ) -> Vec<RelationshipResult>;

    /// Single-call extraction from one block of text.
    async fn extract_entities(&self, content: &str, existing: &[ExistingNoteRef])
        -> EntityExtraction;

    /// Identifier recorded on cache entries written from this provider.
    fn model_id(&self) -> &str;
}

pub(crate) fn report(
    on_progress: Option<&ProgressCallback>,
    current: usize,
    total: usize,
    label: Option<&str>,
) {
    if let Some(cb) = on_progress {
        cb(ProgressUpdate {
            current,
            total,
            label: label.map(str::to_string),
        });
    }
}

/// Collapse `(A, B, t)` and `(B, A, t)` into one result, keeping the most
/// confident. First-seen order is preserved.
pub fn dedupe_relationships(results: Vec<RelationshipResult>) -> Vec<RelationshipResult> {
    let mut out: Vec<RelationshipResult> = Vec::with_capacity(results.len());
    let mut seen: HashMap<(Uuid, Uuid, RelationshipType), usize> = HashMap::new();
    for rel in results {
        match seen.get(&rel.pair_key()) {
            Some(&idx) => {
                if rel.confidence > out[idx].confidence {
                    out[idx] = rel;
                }
            }
            None => {
                seen.insert(rel.pair_key(), out.len());
                out.push(rel);
            }
        }
    }
    out
}

// =============================================================================
// LLM PROVIDER
// =============================================================================

/// Batching and pacing knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            batch_delay: Duration::from_millis(defaults::BATCH_DELAY_MS),
        }
    }
}

/// Provider backed by a text-generation model.
pub struct LlmProvider {
    backend: Arc<dyn GenerationBackend>,
    settings: ProviderSettings,
}

/// Why a batch produced no usable output.
#[derive(Debug)]
enum BatchFailure {
    Provider(Error),
    Malformed(RecoveryError),
}

impl BatchFailure {
    fn reason(&self) -> String {
        match self {
            Self::Provider(e) => format!("provider error: {}", e),
            Self::Malformed(e) => format!("unparseable response: {}", e),
        }
    }

    fn log(&self, op: &'static str, batch_index: usize) {
        match self {
            Self::Provider(e) => warn!(
                op,
                batch_index,
                error = %e,
                "Generation call failed, using default results"
            ),
            Self::Malformed(e) => warn!(
                op,
                batch_index,
                error = %e,
                excerpt = e.excerpt().unwrap_or_default(),
                "Model response could not be parsed, using default results"
            ),
        }
    }
}

impl From<RecoveryError> for BatchFailure {
    fn from(e: RecoveryError) -> Self {
        Self::Malformed(e)
    }
}

impl LlmProvider {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            settings: ProviderSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ProviderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.settings.batch_size = batch_size.max(1);
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.settings.batch_delay = delay;
        self
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn batch_size(&self) -> usize {
        self.settings.batch_size.max(1)
    }

    async fn call(&self, system: &str, prompt: &str) -> Result<String, BatchFailure> {
        let start = Instant::now();
        let raw = self
            .backend
            .generate_json_with_system(system, prompt)
            .await
            .map_err(BatchFailure::Provider)?;
        trace!(
            prompt_len = prompt.len(),
            response_len = raw.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch response received"
        );
        Ok(raw)
    }

    async fn classify_batch(
        &self,
        batch: &[NoteForClassification],
        prompt: &str,
    ) -> Result<Vec<ClassificationResult>, BatchFailure> {
        let raw = self.call(prompts::CLASSIFICATION_SYSTEM, prompt).await?;
        let value = recovery::parse_value(&raw)?;
        let entries = unwrap_list(value, &["classifications", "results", "notes"])
            .ok_or_else(|| malformed(&raw, "expected a list of classifications"))?;

        let index = NoteIndex::new(batch.iter().map(|n| (n.id, n.title.as_str())));
        let mut by_note: HashMap<Uuid, ClassificationResult> = HashMap::new();

        for entry in entries {
            let parsed: RawClassification = match serde_json::from_value(entry) {
                Ok(p) => p,
                Err(e) => {
                    trace!(error = %e, "Skipping unreadable classification entry");
                    continue;
                }
            };
            let Some(idx) = parsed
                .id
                .as_ref()
                .and_then(json_token)
                .and_then(|t| index.resolve(&t))
                .or_else(|| parsed.title.as_deref().and_then(|t| index.resolve(t)))
            else {
                trace!("Classification entry does not match any note in the batch");
                continue;
            };

            let note = &batch[idx];
            let result = ClassificationResult::new(
                note.id,
                parsed
                    .kind
                    .as_deref()
                    .map(InferredType::from_label)
                    .unwrap_or(InferredType::Note),
                confidence_of(parsed.confidence.as_ref()),
                parsed.explanation.unwrap_or_default(),
            )
            .with_entity_names(entity_names(&parsed.entities));
            by_note.entry(note.id).or_insert(result);
        }

        Ok(batch
            .iter()
            .map(|n| {
                by_note.remove(&n.id).unwrap_or_else(|| {
                    ClassificationResult::fallback(n.id, "note missing from model response")
                })
            })
            .collect())
    }

    async fn relationship_batch(
        &self,
        notes: &[NoteWithClassification],
        index: &NoteIndex<'_>,
        focus: &[usize],
    ) -> Result<Vec<RelationshipResult>, BatchFailure> {
        let prompt = prompts::relationship_prompt(notes, focus);
        let raw = self.call(prompts::RELATIONSHIP_SYSTEM, &prompt).await?;
        let value = recovery::parse_value(&raw)?;
        let entries = unwrap_list(value, &["relationships", "results"])
            .ok_or_else(|| malformed(&raw, "expected a list of relationships"))?;

        let mut out = Vec::new();
        for entry in entries {
            let parsed: RawRelationship = match serde_json::from_value(entry) {
                Ok(p) => p,
                Err(e) => {
                    trace!(error = %e, "Skipping unreadable relationship entry");
                    continue;
                }
            };
            let from = json_token(&parsed.from).and_then(|t| index.resolve(&t));
            let to = json_token(&parsed.to).and_then(|t| index.resolve(&t));
            let (Some(from), Some(to)) = (from, to) else {
                trace!("Relationship endpoint does not resolve to a note in the set");
                continue;
            };
            if from == to {
                continue;
            }
            out.push(RelationshipResult {
                from_note_id: notes[from].id,
                to_note_id: notes[to].id,
                relationship_type: parsed
                    .kind
                    .as_deref()
                    .map(RelationshipType::from_label)
                    .unwrap_or(RelationshipType::Related),
                confidence: confidence_of(parsed.confidence.as_ref()),
                evidence_snippet: parsed.evidence.unwrap_or_default(),
                evidence_type: parsed
                    .evidence_type
                    .as_deref()
                    .map(EvidenceType::from_label)
                    .unwrap_or_default(),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl GenerationProvider for LlmProvider {
    #[instrument(skip(self, notes, on_progress, options), fields(subsystem = "inference", component = "provider", op = "classify_notes", model = %self.backend.model_name(), note_count = notes.len()))]
    async fn classify_notes(
        &self,
        notes: &[NoteForClassification],
        on_progress: Option<&ProgressCallback>,
        options: &ClassifyOptions,
    ) -> Vec<ClassificationResult> {
        let total = notes.len();
        let batch_count = total.div_ceil(self.batch_size());
        let mut results: Vec<ClassificationResult> = Vec::with_capacity(total);
        let mut prior: BTreeMap<InferredType, Vec<String>> = BTreeMap::new();

        for (batch_index, batch) in notes.chunks(self.batch_size()).enumerate() {
            report(
                on_progress,
                results.len(),
                total,
                batch.first().map(|n| n.title.as_str()),
            );
            debug!(batch_index, batch_count, size = batch.len(), "Classifying batch");

            let prompt =
                prompts::classification_prompt(batch, &options.player_character_names, &prior);
            let batch_results = match self.classify_batch(batch, &prompt).await {
                Ok(r) => r,
                Err(failure) => {
                    failure.log("classify_notes", batch_index);
                    let reason = failure.reason();
                    batch
                        .iter()
                        .map(|n| ClassificationResult::fallback(n.id, &reason))
                        .collect()
                }
            };

            for (note, result) in batch.iter().zip(&batch_results) {
                if result.fallback || !is_high(result.confidence) {
                    continue;
                }
                let titles = prior.entry(result.inferred_type).or_default();
                if titles.len() < defaults::CROSS_BATCH_CONTEXT_CAP {
                    titles.push(note.title.clone());
                }
            }
            results.extend(batch_results);

            if batch_index + 1 < batch_count {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
        }

        report(on_progress, total, total, None);
        results
    }

    #[instrument(skip(self, notes, on_progress), fields(subsystem = "inference", component = "provider", op = "extract_relationships", model = %self.backend.model_name()))]
    async fn extract_relationships(
        &self,
        notes: &[NoteWithClassification],
        on_progress: Option<&ProgressCallback>,
    ) -> Vec<RelationshipResult> {
        if notes.len() < 2 {
            return Vec::new();
        }

        let total = notes.len();
        let index = NoteIndex::new(notes.iter().map(|n| (n.id, n.title.as_str())));
        let positions: Vec<usize> = (0..total).collect();
        let batch_count = total.div_ceil(self.batch_size());
        let mut collected = Vec::new();

        for (batch_index, focus) in positions.chunks(self.batch_size()).enumerate() {
            report(
                on_progress,
                batch_index * self.batch_size(),
                total,
                focus.first().map(|&i| notes[i].title.as_str()),
            );
            debug!(batch_index, batch_count, size = focus.len(), "Extracting relationships");

            match self.relationship_batch(notes, &index, focus).await {
                Ok(found) => collected.extend(found),
                Err(failure) => failure.log("extract_relationships", batch_index),
            }

            if batch_index + 1 < batch_count {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
        }

        report(on_progress, total, total, None);
        let deduped = dedupe_relationships(collected);
        debug!(result_count = deduped.len(), "Relationship extraction complete");
        deduped
    }

    #[instrument(skip(self, content, existing), fields(subsystem = "inference", component = "provider", op = "extract_entities", model = %self.backend.model_name(), prompt_len = content.len()))]
    async fn extract_entities(
        &self,
        content: &str,
        existing: &[ExistingNoteRef],
    ) -> EntityExtraction {
        let prompt = prompts::entity_prompt(content, existing, defaults::ENTITY_CONTENT_CHARS);
        let raw = match self.call(prompts::ENTITY_SYSTEM, &prompt).await {
            Ok(raw) => raw,
            Err(failure) => {
                failure.log("extract_entities", 0);
                return EntityExtraction::default();
            }
        };
        match recovery::parse_value(&raw) {
            Ok(value) => read_entities(value, existing),
            Err(e) => {
                BatchFailure::Malformed(e).log("extract_entities", 0);
                EntityExtraction::default()
            }
        }
    }

    fn model_id(&self) -> &str {
        self.backend.model_name()
    }
}

// =============================================================================
// RESPONSE READING
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default, alias = "note_id", alias = "index")]
    id: Option<JsonValue>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "type", alias = "inferred_type", alias = "category")]
    kind: Option<String>,
    #[serde(default)]
    confidence: Option<JsonValue>,
    #[serde(default, alias = "reason", alias = "reasoning")]
    explanation: Option<String>,
    #[serde(default, alias = "extracted_entity_names", alias = "entity_names")]
    entities: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    #[serde(alias = "from_id", alias = "from_note_id", alias = "source")]
    from: JsonValue,
    #[serde(alias = "to_id", alias = "to_note_id", alias = "target")]
    to: JsonValue,
    #[serde(default, rename = "type", alias = "relationship_type")]
    kind: Option<String>,
    #[serde(default)]
    confidence: Option<JsonValue>,
    #[serde(default, alias = "evidence_snippet", alias = "snippet")]
    evidence: Option<String>,
    #[serde(default)]
    evidence_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type", alias = "entity_type")]
    kind: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    confidence: Option<JsonValue>,
    #[serde(default)]
    mentions: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RawEntityRelationship {
    #[serde(default, alias = "from_name", alias = "source")]
    from: String,
    #[serde(default, alias = "to_name", alias = "target")]
    to: String,
    #[serde(default, rename = "type", alias = "relationship_type")]
    kind: Option<String>,
    #[serde(default)]
    confidence: Option<JsonValue>,
    #[serde(default)]
    evidence: Option<String>,
}

fn malformed(raw: &str, message: &str) -> BatchFailure {
    BatchFailure::Malformed(RecoveryError::Malformed {
        excerpt: recovery::excerpt(raw),
        message: message.to_string(),
    })
}

/// Accept a bare list, an envelope object holding one under a known key, or
/// a single object.
fn unwrap_list(value: JsonValue, keys: &[&str]) -> Option<Vec<JsonValue>> {
    match value {
        JsonValue::Array(items) => Some(items),
        JsonValue::Object(mut map) => {
            for key in keys {
                if let Some(JsonValue::Array(items)) = map.remove(*key) {
                    return Some(items);
                }
            }
            if map.is_empty() {
                None
            } else {
                Some(vec![JsonValue::Object(map)])
            }
        }
        _ => None,
    }
}

fn json_token(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric strings and numbers; missing or unreadable values fall back to
/// the default confidence.
fn confidence_of(value: Option<&JsonValue>) -> f32 {
    let raw = match value {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    clamp_confidence(raw.map(|v| v as f32).unwrap_or(defaults::FALLBACK_CONFIDENCE))
}

fn entity_names(values: &[JsonValue]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| match v {
            JsonValue::String(s) => Some(s.trim().to_string()),
            JsonValue::Object(map) => map
                .get("name")
                .and_then(JsonValue::as_str)
                .map(|s| s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Resolves model-provided note references back to positions in a note set.
struct NoteIndex<'a> {
    ids: Vec<Uuid>,
    titles: Vec<&'a str>,
}

impl<'a> NoteIndex<'a> {
    fn new(notes: impl Iterator<Item = (Uuid, &'a str)>) -> Self {
        let (ids, titles) = notes.unzip();
        Self { ids, titles }
    }

    /// 1-based position, UUID, or case-insensitive title.
    fn resolve(&self, token: &str) -> Option<usize> {
        let token = token.trim().trim_start_matches('[').trim_end_matches(']').trim();
        if let Ok(n) = token.parse::<usize>() {
            return (1..=self.ids.len()).contains(&n).then(|| n - 1);
        }
        if let Ok(id) = Uuid::parse_str(token) {
            return self.ids.iter().position(|i| *i == id);
        }
        self.titles.iter().position(|t| t.eq_ignore_ascii_case(token))
    }
}

fn read_entities(value: JsonValue, existing: &[ExistingNoteRef]) -> EntityExtraction {
    let (entities, relationships) = match value {
        JsonValue::Array(items) => (items, Vec::new()),
        JsonValue::Object(mut map) => {
            let take = |v: Option<JsonValue>| match v {
                Some(JsonValue::Array(items)) => items,
                _ => Vec::new(),
            };
            (take(map.remove("entities")), take(map.remove("relationships")))
        }
        _ => (Vec::new(), Vec::new()),
    };

    let entities = entities
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawEntity>(v).ok())
        .filter_map(|raw| {
            let name = raw.name.trim().to_string();
            let confidence = confidence_of(raw.confidence.as_ref());
            if name.is_empty() || confidence < defaults::ENTITY_CONFIDENCE_FLOOR {
                return None;
            }
            let mentions = raw
                .mentions
                .as_ref()
                .and_then(JsonValue::as_f64)
                .map(|m| m.max(1.0) as u32)
                .unwrap_or(1);
            let existing_note_id = existing
                .iter()
                .find(|n| n.title.eq_ignore_ascii_case(&name))
                .map(|n| n.id);
            Some(ExtractedEntity {
                entity_type: raw
                    .kind
                    .as_deref()
                    .map(EntityType::from_label)
                    .unwrap_or_default(),
                description: raw.description.unwrap_or_default(),
                confidence,
                mentions,
                existing_note_id,
                name,
            })
        })
        .collect();

    let relationships = relationships
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawEntityRelationship>(v).ok())
        .filter_map(|raw| {
            let confidence = confidence_of(raw.confidence.as_ref());
            let from_name = raw.from.trim().to_string();
            let to_name = raw.to.trim().to_string();
            if from_name.is_empty()
                || to_name.is_empty()
                || confidence < defaults::ENTITY_CONFIDENCE_FLOOR
            {
                return None;
            }
            Some(ExtractedEntityRelationship {
                from_name,
                to_name,
                relationship_type: raw.kind.unwrap_or_else(|| "related".to_string()),
                confidence,
                evidence: raw.evidence.unwrap_or_default(),
            })
        })
        .collect();

    EntityExtraction {
        entities,
        relationships,
    }
}
