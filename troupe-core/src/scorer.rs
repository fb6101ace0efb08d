// ABOUTME: Pure relevance scoring of a stimulus against persona keyword lists
// ABOUTME: Longer keywords weigh more; a clear winner must beat a threshold and all rivals

use std::collections::BTreeMap;

use crate::persona::PersonaSet;

/// Weight of a single keyword hit. Longer keywords are more specific,
/// so they contribute more.
pub fn keyword_weight(keyword: &str) -> i64 {
    match keyword.chars().count() {
        0..=3 => 1,
        4..=6 => 2,
        _ => 3,
    }
}

/// Sum of keyword hit weights for one agent against lowercase text.
pub fn score(text_lower: &str, keywords: &[String]) -> i64 {
    keywords
        .iter()
        .filter(|k| !k.is_empty() && text_lower.contains(k.to_lowercase().as_str()))
        .map(|k| keyword_weight(k))
        .sum()
}

/// Per-agent affinity scores for a stimulus. Pure and side-effect-free.
pub fn score_all(text: &str, personas: &PersonaSet) -> BTreeMap<String, i64> {
    let text_lower = text.to_lowercase();
    personas
        .iter()
        .map(|p| (p.id.clone(), score(&text_lower, &p.keywords)))
        .collect()
}

/// A clear winner exists only if the max score meets the threshold and is
/// strictly greater than every other agent's score.
pub fn clear_winner(scores: &BTreeMap<String, i64>, threshold: i64) -> Option<&str> {
    let (best_id, best) = scores.iter().max_by_key(|(_, s)| *s)?;
    if *best < threshold {
        return None;
    }
    let tied = scores
        .iter()
        .filter(|(id, s)| *s == best && id.as_str() != best_id)
        .count();
    if tied > 0 {
        return None;
    }
    Some(best_id)
}
