//! Data models for the enrichment pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::confidence::clamp_confidence;
use crate::defaults;
use crate::error::Error;
use crate::versions::OperationType;

// =============================================================================
// NOTE INPUTS
// =============================================================================

/// A note as produced by the importer, owned by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportNote {
    pub id: Uuid,
    pub import_run_id: Uuid,
    pub team_id: Uuid,
    pub title: String,
    pub content: String,
    /// Type assigned by the importer or a previous review, if any.
    pub note_type: Option<String>,
    /// Explicit link targets recorded by the importer.
    #[serde(default)]
    pub linked_note_ids: Vec<Uuid>,
}

/// Immutable snapshot of a note handed to classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteForClassification {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub current_type: Option<String>,
    #[serde(default)]
    pub existing_link_titles: Vec<String>,
}

/// Link from one note to another note in the same set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalLink {
    pub target_note_id: Uuid,
    pub link_text: String,
}

/// Note with its resolved type and internal links, input to relationship
/// extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteWithClassification {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub inferred_type: InferredType,
    #[serde(default)]
    pub links: Vec<InternalLink>,
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Entity category a note describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferredType {
    /// A player character.
    Character,
    /// A non-player character.
    Npc,
    /// A location, from a room to a continent.
    Area,
    Quest,
    SessionLog,
    /// Anything that fits none of the above.
    Note,
}

impl InferredType {
    pub const ALL: [InferredType; 6] = [
        Self::Character,
        Self::Npc,
        Self::Area,
        Self::Quest,
        Self::SessionLog,
        Self::Note,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Npc => "npc",
            Self::Area => "area",
            Self::Quest => "quest",
            Self::SessionLog => "session_log",
            Self::Note => "note",
        }
    }

    /// Map a model-provided label to a type. Case, separators and common
    /// synonyms are tolerated; anything unrecognised becomes [`Self::Note`].
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "character" | "pc" | "player_character" => Self::Character,
            "npc" | "non_player_character" | "person" => Self::Npc,
            "area" | "location" | "place" | "region" => Self::Area,
            "quest" | "mission" | "plot_hook" => Self::Quest,
            "session_log" | "sessionlog" | "session" | "session_notes" => Self::SessionLog,
            _ => Self::Note,
        }
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification per input note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub note_id: Uuid,
    pub inferred_type: InferredType,
    pub confidence: f32,
    pub explanation: String,
    #[serde(default)]
    pub extracted_entity_names: Vec<String>,
    /// Set when the result is a placeholder for a failed batch.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

impl ClassificationResult {
    pub fn new(
        note_id: Uuid,
        inferred_type: InferredType,
        confidence: f32,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            note_id,
            inferred_type,
            confidence: clamp_confidence(confidence),
            explanation: explanation.into(),
            extracted_entity_names: Vec::new(),
            fallback: false,
        }
    }

    /// Default result for a note whose classification could not be obtained.
    pub fn fallback(note_id: Uuid, reason: &str) -> Self {
        Self {
            note_id,
            inferred_type: InferredType::Note,
            confidence: defaults::FALLBACK_CONFIDENCE,
            explanation: format!("Classification unavailable: {}", reason),
            extracted_entity_names: Vec::new(),
            fallback: true,
        }
    }

    pub fn with_entity_names(mut self, names: Vec<String>) -> Self {
        self.extracted_entity_names = names;
        self
    }
}

// =============================================================================
// RELATIONSHIPS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    QuestHasNpc,
    QuestAtPlace,
    NpcInPlace,
    Related,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuestHasNpc => "quest_has_npc",
            Self::QuestAtPlace => "quest_at_place",
            Self::NpcInPlace => "npc_in_place",
            Self::Related => "related",
        }
    }

    /// Lenient label mapping; unknown labels become [`Self::Related`].
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "questhasnpc" => Self::QuestHasNpc,
            "questatplace" | "questatarea" | "questatlocation" => Self::QuestAtPlace,
            "npcinplace" | "npcinarea" | "npcatlocation" | "npcinlocation" => Self::NpcInPlace,
            _ => Self::Related,
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a relationship was evidenced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceType {
    /// An explicit link between the notes.
    Link,
    /// One note mentions the other by name.
    Mention,
    #[default]
    Heuristic,
}

impl EvidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Mention => "mention",
            Self::Heuristic => "heuristic",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "link" | "explicit_link" => Self::Link,
            "mention" | "name_mention" => Self::Mention,
            _ => Self::Heuristic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipResult {
    pub from_note_id: Uuid,
    pub to_note_id: Uuid,
    pub relationship_type: RelationshipType,
    pub confidence: f32,
    pub evidence_snippet: String,
    #[serde(default)]
    pub evidence_type: EvidenceType,
}

impl RelationshipResult {
    /// Key under which `(A, B, t)` and `(B, A, t)` collide.
    pub fn pair_key(&self) -> (Uuid, Uuid, RelationshipType) {
        let (a, b) = if self.from_note_id <= self.to_note_id {
            (self.from_note_id, self.to_note_id)
        } else {
            (self.to_note_id, self.from_note_id)
        };
        (a, b, self.relationship_type)
    }

    /// The same relationship with its endpoints swapped.
    pub fn reversed(mut self) -> Self {
        std::mem::swap(&mut self.from_note_id, &mut self.to_note_id);
        self
    }
}

// =============================================================================
// ENRICHMENT RUNS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// `pending → running → (completed | failed)`. A pending run may also be
    /// failed directly when it cannot be started.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown run status: {}", other))),
        }
    }
}

/// Aggregate counts recorded on a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentTotals {
    pub notes_processed: i32,
    pub classifications_created: i32,
    pub relationships_found: i32,
    pub high_confidence_count: i32,
    pub low_confidence_count: i32,
    pub user_review_required: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRun {
    pub id: Uuid,
    pub import_run_id: Uuid,
    pub team_id: Uuid,
    pub status: RunStatus,
    pub totals: Option<EnrichmentTotals>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Caller-supplied knobs for one enrichment run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentOptions {
    /// Reclassify notes whose type is already in the pre-classified set.
    #[serde(default)]
    pub override_existing_types: bool,
    #[serde(default)]
    pub player_character_names: Vec<String>,
}

// =============================================================================
// REVIEW RECORDS
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Reviewers may only move a record out of `pending`.
    pub fn can_transition_to(&self, next: ReviewStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved) | (Self::Pending, Self::Rejected)
        )
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::InvalidInput(format!(
                "unknown review status: {}",
                other
            ))),
        }
    }
}

/// Persisted classification awaiting review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub id: Uuid,
    pub enrichment_run_id: Uuid,
    pub note_id: Uuid,
    pub inferred_type: InferredType,
    pub confidence: f32,
    pub explanation: String,
    pub extracted_entity_names: Vec<String>,
    pub status: ReviewStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Persisted relationship awaiting review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: Uuid,
    pub enrichment_run_id: Uuid,
    pub from_note_id: Uuid,
    pub to_note_id: Uuid,
    pub relationship_type: RelationshipType,
    pub confidence: f32,
    pub evidence_snippet: String,
    pub evidence_type: EvidenceType,
    pub status: ReviewStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Classification record joined with its note title for the review UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationWithTitle {
    #[serde(flatten)]
    pub record: ClassificationRecord,
    pub note_title: String,
}

/// Relationship record joined with both endpoint titles for the review UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipWithTitles {
    #[serde(flatten)]
    pub record: RelationshipRecord,
    pub from_title: String,
    pub to_title: String,
}

// =============================================================================
// CACHE ENTRIES
// =============================================================================

/// Lookup key of a cache entry. Entries never match across teams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub cache_type: OperationType,
    pub content_hash: String,
    pub algorithm_version: String,
    pub context_hash: Option<String>,
    pub team_id: Uuid,
}

/// A stored result. Only `hit_count` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: Uuid,
    pub cache_type: OperationType,
    pub content_hash: String,
    pub algorithm_version: String,
    pub context_hash: Option<String>,
    pub team_id: Uuid,
    /// Content hash of the "from" note at write time (relationships only).
    pub from_hash: Option<String>,
    /// Content hash of the "to" note at write time (relationships only).
    pub to_hash: Option<String>,
    pub result: JsonValue,
    pub model_id: Option<String>,
    pub hit_count: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn key(&self) -> CacheKey {
        CacheKey {
            cache_type: self.cache_type,
            content_hash: self.content_hash.clone(),
            algorithm_version: self.algorithm_version.clone(),
            context_hash: self.context_hash.clone(),
            team_id: self.team_id,
        }
    }
}

/// Values written for a new cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCacheEntry {
    pub key: CacheKey,
    pub from_hash: Option<String>,
    pub to_hash: Option<String>,
    pub result: JsonValue,
    pub model_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTypeStats {
    pub cache_type: String,
    pub entries: i64,
    pub hits: i64,
}

/// Summary reported by the administrative CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: i64,
    pub total_hits: i64,
    pub expiring_soon: i64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    pub by_type: Vec<CacheTypeStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inferred_type_from_label_aliases() {
        assert_eq!(InferredType::from_label("NPC"), InferredType::Npc);
        assert_eq!(InferredType::from_label("Location"), InferredType::Area);
        assert_eq!(
            InferredType::from_label("Session Log"),
            InferredType::SessionLog
        );
        assert_eq!(
            InferredType::from_label("player-character"),
            InferredType::Character
        );
        assert_eq!(InferredType::from_label("dragon"), InferredType::Note);
    }

    #[test]
    fn test_inferred_type_serde_snake_case() {
        let json = serde_json::to_string(&InferredType::SessionLog).unwrap();
        assert_eq!(json, "\"session_log\"");
        let back: InferredType = serde_json::from_str("\"npc\"").unwrap();
        assert_eq!(back, InferredType::Npc);
    }

    #[test]
    fn test_relationship_type_from_label() {
        assert_eq!(
            RelationshipType::from_label("QUEST_HAS_NPC"),
            RelationshipType::QuestHasNpc
        );
        assert_eq!(
            RelationshipType::from_label("npc in place"),
            RelationshipType::NpcInPlace
        );
        assert_eq!(
            RelationshipType::from_label("allied_with"),
            RelationshipType::Related
        );
    }

    #[test]
    fn test_evidence_type_defaults_to_heuristic() {
        assert_eq!(EvidenceType::default(), EvidenceType::Heuristic);
        assert_eq!(EvidenceType::from_label("LINK"), EvidenceType::Link);
        assert_eq!(EvidenceType::from_label("vibes"), EvidenceType::Heuristic);
    }

    #[test]
    fn test_classification_result_clamps_confidence() {
        let r = ClassificationResult::new(Uuid::nil(), InferredType::Npc, 1.4, "sure");
        assert_eq!(r.confidence, 1.0);
        assert!(!r.fallback);
    }

    #[test]
    fn test_fallback_result_shape() {
        let r = ClassificationResult::fallback(Uuid::nil(), "timeout");
        assert_eq!(r.inferred_type, InferredType::Note);
        assert_eq!(r.confidence, 0.5);
        assert!(r.fallback);
        assert!(r.explanation.contains("timeout"));
    }

    #[test]
    fn test_fallback_flag_omitted_when_false() {
        let r = ClassificationResult::new(Uuid::nil(), InferredType::Area, 0.9, "city");
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("fallback").is_none());
    }

    #[test]
    fn test_pair_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let rel = RelationshipResult {
            from_note_id: a,
            to_note_id: b,
            relationship_type: RelationshipType::QuestHasNpc,
            confidence: 0.9,
            evidence_snippet: String::new(),
            evidence_type: EvidenceType::Link,
        };
        assert_eq!(rel.pair_key(), rel.clone().reversed().pair_key());
    }

    #[test]
    fn test_run_status_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Completed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_review_status_transitions() {
        assert!(ReviewStatus::Pending.can_transition_to(ReviewStatus::Approved));
        assert!(ReviewStatus::Pending.can_transition_to(ReviewStatus::Rejected));
        assert!(!ReviewStatus::Approved.can_transition_to(ReviewStatus::Rejected));
        assert!(!ReviewStatus::Pending.can_transition_to(ReviewStatus::Pending));
    }

    #[test]
    fn test_review_status_from_str_rejects_unknown() {
        assert_eq!(
            "approved".parse::<ReviewStatus>().unwrap(),
            ReviewStatus::Approved
        );
        assert!(matches!(
            "maybe".parse::<ReviewStatus>(),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cache_entry_expiry() {
        let now = Utc::now();
        let entry = CacheEntry {
            id: Uuid::nil(),
            cache_type: OperationType::Classification,
            content_hash: "abc".into(),
            algorithm_version: "1.0.0".into(),
            context_hash: None,
            team_id: Uuid::nil(),
            from_hash: None,
            to_hash: None,
            result: JsonValue::Null,
            model_id: None,
            hit_count: 0,
            created_at: now,
            expires_at: now,
        };
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - chrono::Duration::seconds(1)));
    }
}
