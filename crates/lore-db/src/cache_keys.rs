//! Cache key derivation.
//!
//! Hashes are SHA-256 hex digests. Keys written by one process must be
//! reproducible by any other, so every step here is deterministic and
//! locale-free.

use sha2::{Digest, Sha256};

use lore_core::defaults::{CACHE_NO_CONTEXT, CONTENT_PREVIEW_CHARS};

const MARKDOWN_PUNCTUATION: &[char] = &['#', '*', '_', '[', ']', '`'];

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// SHA-256 of `input` as lowercase hex.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Canonical text of a note for hashing.
///
/// Content is cut to the same preview length the provider prompts with
/// before anything else, so text past that point never reaches the hash.
pub fn normalize(title: &str, content: &str) -> String {
    let combined = format!("{}\n{}", title, truncate_chars(content, CONTENT_PREVIEW_CHARS));
    let stripped: String = combined
        .to_lowercase()
        .chars()
        .filter(|c| !MARKDOWN_PUNCTUATION.contains(c))
        .collect();
    // Strip before collapsing: "# title" must not keep a leading space.
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hash of a note's normalized title and content.
pub fn content_hash(title: &str, content: &str) -> String {
    sha256_hex(&normalize(title, content))
}

/// Hash of the player-character context a classification was made under.
///
/// Names are trimmed, lowercased and sorted, so list order and casing do
/// not matter. An empty list hashes a fixed sentinel.
pub fn context_hash(player_character_names: &[String]) -> String {
    let mut names: Vec<String> = player_character_names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        return sha256_hex(CACHE_NO_CONTEXT);
    }
    names.sort();
    names.dedup();
    sha256_hex(&names.join("|"))
}

/// Order-independent hash of two content hashes.
pub fn pair_hash(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    sha256_hex(&format!("{}{}", first, second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_normalize_strips_markdown_and_whitespace() {
        assert_eq!(
            normalize("  # The  Gilded Goose ", "**Tavern**\n\n in  [[Port Vell]]  "),
            "the gilded goose tavern in port vell"
        );
    }

    #[test]
    fn test_identical_content_same_hash() {
        let a = content_hash("Mira", "The innkeeper of the Goose.");
        let b = content_hash("MIRA", "The   innkeeper of the *Goose*.");
        assert_eq!(a, b);
    }

    #[test]
    fn test_change_within_preview_changes_hash() {
        let base = "a".repeat(CONTENT_PREVIEW_CHARS);
        let mut changed = base.clone();
        changed.replace_range(CONTENT_PREVIEW_CHARS - 1.., "b");
        assert_ne!(content_hash("t", &base), content_hash("t", &changed));
    }

    #[test]
    fn test_change_past_preview_ignored() {
        let base = "a".repeat(CONTENT_PREVIEW_CHARS);
        let longer = format!("{}{}", base, "completely different tail");
        assert_eq!(content_hash("t", &base), content_hash("t", &longer));
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let base = "é".repeat(CONTENT_PREVIEW_CHARS);
        let longer = format!("{}ü", base);
        assert_eq!(content_hash("t", &base), content_hash("t", &longer));
    }

    #[test]
    fn test_context_hash_order_and_case_insensitive() {
        let a = context_hash(&["Kael".into(), "ysolde".into()]);
        let b = context_hash(&["YSOLDE".into(), " kael ".into()]);
        assert_eq!(a, b);
        assert_ne!(a, context_hash(&["Kael".into()]));
    }

    #[test]
    fn test_context_hash_empty_uses_sentinel() {
        assert_eq!(context_hash(&[]), sha256_hex(CACHE_NO_CONTEXT));
        assert_eq!(context_hash(&["  ".into()]), context_hash(&[]));
    }

    #[test]
    fn test_pair_hash_order_independent() {
        let a = content_hash("Mira", "innkeeper");
        let b = content_hash("Port Vell", "harbour town");
        assert_eq!(pair_hash(&a, &b), pair_hash(&b, &a));
        assert_ne!(pair_hash(&a, &b), pair_hash(&a, &a));
    }
}
