//! Prompt builders for classification, relationship and entity extraction.
//!
//! Wording here is tunable. The response shapes requested by each prompt are
//! what [`crate::provider`] knows how to read back, so change both together
//! and bump the matching entry in `lore_core::versions`.

use std::collections::BTreeMap;
use std::fmt::Write;

use lore_core::defaults::CONTENT_PREVIEW_CHARS;
use lore_core::{InferredType, NoteForClassification, NoteWithClassification};

use crate::provider::ExistingNoteRef;

/// Truncate to the first `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub const CLASSIFICATION_SYSTEM: &str = "You classify tabletop campaign notes. \
Respond with JSON only, no commentary.";

const CLASSIFICATION_RULES: &str = "\
Classify each note into exactly one type:
- character: a player character controlled by someone at the table
- npc: a non-player character, creature or named person the party meets
- area: a place of any size (room, tavern, city, region, plane)
- quest: a goal, mission, job or plot hook the party pursues
- session_log: a recap or log of what happened in a play session
- note: anything else (rules, lore dumps, loot lists, misc)

Give a confidence between 0 and 1 and a one-sentence explanation.
List the names of other entities the note mentions in \"entities\".";

/// Batch classification prompt.
///
/// Notes are numbered from 1 within the batch and the model answers with
/// those numbers as ids. `prior_labels` carries high-confidence results from
/// earlier batches of the same call.
pub fn classification_prompt(
    batch: &[NoteForClassification],
    player_character_names: &[String],
    prior_labels: &BTreeMap<InferredType, Vec<String>>,
) -> String {
    let mut prompt = String::from(CLASSIFICATION_RULES);

    if !player_character_names.is_empty() {
        let _ = write!(
            prompt,
            "\n\nPlayer characters in this campaign: {}. Notes about them are \"character\", never \"npc\".",
            player_character_names.join(", ")
        );
    }

    if prior_labels.values().any(|v| !v.is_empty()) {
        prompt.push_str("\n\nAlready classified in this import (use for consistency):");
        for (ty, titles) in prior_labels {
            if titles.is_empty() {
                continue;
            }
            let _ = write!(prompt, "\n- {}: {}", ty, titles.join(", "));
        }
    }

    prompt.push_str("\n\nNotes:\n");
    for (i, note) in batch.iter().enumerate() {
        let _ = write!(prompt, "\n[{}] Title: {}", i + 1, note.title);
        if let Some(current) = note.current_type.as_deref() {
            let _ = write!(prompt, "\nCurrent type: {}", current);
        }
        if !note.existing_link_titles.is_empty() {
            let _ = write!(prompt, "\nLinks to: {}", note.existing_link_titles.join(", "));
        }
        let _ = write!(
            prompt,
            "\nContent:\n{}\n",
            truncate_chars(&note.content, CONTENT_PREVIEW_CHARS)
        );
    }

    prompt.push_str(
        "\nRespond with a JSON array, one object per note:\n\
[{\"id\": \"1\", \"type\": \"npc\", \"confidence\": 0.9, \"explanation\": \"...\", \"entities\": [\"...\"]}]",
    );
    prompt
}

pub const RELATIONSHIP_SYSTEM: &str = "You find relationships between tabletop campaign notes. \
Respond with JSON only, no commentary.";

/// Relationship prompt for one batch of focus notes.
///
/// Every note in `all` is listed, grouped by type and numbered from 1 across
/// the whole set, so the model can point at notes outside the batch.
/// `focus` holds indices into `all`.
pub fn relationship_prompt(all: &[NoteWithClassification], focus: &[usize]) -> String {
    let mut prompt = String::from(
        "Relationship types:\n\
- quest_has_npc: a quest involves an NPC (quest giver, target, ally)\n\
- quest_at_place: a quest takes place at an area\n\
- npc_in_place: an NPC lives in or is found at an area\n\
- related: any other meaningful connection\n\n\
Evidence types: link (explicit link), mention (named in the text), heuristic (inferred).\n\n\
All notes by type:",
    );

    let mut grouped: BTreeMap<InferredType, Vec<(usize, &NoteWithClassification)>> =
        BTreeMap::new();
    for (i, note) in all.iter().enumerate() {
        grouped.entry(note.inferred_type).or_default().push((i, note));
    }
    for (ty, notes) in &grouped {
        let _ = write!(prompt, "\n\n{}:", ty);
        for (i, note) in notes {
            let _ = write!(prompt, "\n  [{}] {}", i + 1, note.title);
        }
    }

    prompt.push_str("\n\nFind relationships starting from these notes:\n");
    for &i in focus {
        let Some(note) = all.get(i) else { continue };
        let _ = write!(prompt, "\n[{}] {} ({})", i + 1, note.title, note.inferred_type);
        if !note.links.is_empty() {
            let targets: Vec<String> = note
                .links
                .iter()
                .filter_map(|l| {
                    all.iter()
                        .position(|n| n.id == l.target_note_id)
                        .map(|p| format!("[{}] \"{}\"", p + 1, l.link_text))
                })
                .collect();
            if !targets.is_empty() {
                let _ = write!(prompt, "\nLinks: {}", targets.join(", "));
            }
        }
        let _ = write!(
            prompt,
            "\nContent:\n{}\n",
            truncate_chars(&note.content, CONTENT_PREVIEW_CHARS)
        );
    }

    prompt.push_str(
        "\nRespond with a JSON array using the bracketed numbers as ids:\n\
[{\"from\": \"1\", \"to\": \"4\", \"type\": \"npc_in_place\", \"confidence\": 0.8, \
\"evidence\": \"short quote\", \"evidence_type\": \"mention\"}]\n\
Return [] if there are none.",
    );
    prompt
}

pub const ENTITY_SYSTEM: &str = "You extract named entities from tabletop campaign text. \
Respond with JSON only, no commentary.";

/// Single-call entity extraction prompt.
pub fn entity_prompt(content: &str, existing: &[ExistingNoteRef], max_chars: usize) -> String {
    let mut prompt = String::from(
        "Extract the named entities in the text below.\n\
Entity types: npc, character, location, quest, item, faction, event.\n\
For each entity give a short description, a confidence between 0 and 1, and how many times it is mentioned.\n\
Also list relationships between the entities.",
    );

    if !existing.is_empty() {
        prompt.push_str("\n\nNotes that already exist (reuse these exact names when they match):");
        for note in existing {
            match note.note_type.as_deref() {
                Some(ty) => {
                    let _ = write!(prompt, "\n- {} ({})", note.title, ty);
                }
                None => {
                    let _ = write!(prompt, "\n- {}", note.title);
                }
            }
        }
    }

    let _ = write!(prompt, "\n\nText:\n{}\n", truncate_chars(content, max_chars));
    prompt.push_str(
        "\nRespond with a JSON object:\n\
{\"entities\": [{\"name\": \"...\", \"type\": \"npc\", \"description\": \"...\", \"confidence\": 0.9, \"mentions\": 2}],\n\
 \"relationships\": [{\"from\": \"name\", \"to\": \"name\", \"type\": \"...\", \"confidence\": 0.8, \"evidence\": \"...\"}]}",
    );
    prompt
}
