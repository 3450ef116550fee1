use std::collections::{HashMap, HashSet};

use crate::config::SelectionConfig;
use crate::models::{Commentary, Excerpt};

/// Bounded relevance of a text to a query, in `[0, 1]`.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &str, text: &str) -> f32;
}

/// Fraction of distinct query terms (stopwords removed) that occur in the text.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalScorer;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "does", "for", "from", "how", "in", "is",
    "it", "of", "on", "or", "say", "says", "that", "the", "this", "to", "what", "when", "who",
    "why", "with",
];

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

impl RelevanceScorer for LexicalScorer {
    fn score(&self, query: &str, text: &str) -> f32 {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return 0.0;
        }
        let text_terms = terms(text);
        let hits = query_terms.iter().filter(|t| text_terms.contains(*t)).count();
        hits as f32 / query_terms.len() as f32
    }
}

/// Select the excerpts a synthesis call is grounded on.
///
/// 1. Drop commentaries shorter than `min_text_length` once trimmed, and
///    duplicate ids.
/// 2. Rank the rest by similarity (stable: ties keep input order) and admit
///    greedily under the per-school and total caps.
/// 3. When the ranking carries no signal (nothing admitted, or the best score
///    is under `similarity_floor`), admit the first survivors in input order.
/// 4. When every commentary was too short, fall back to all of them truncated.
///
/// Returns an empty list only when `commentaries` is empty.
pub fn select(
    commentaries: &[Commentary],
    query: &str,
    config: &SelectionConfig,
    scorer: &dyn RelevanceScorer,
) -> Vec<Excerpt> {
    let mut seen = HashSet::new();
    let survivors: Vec<&Commentary> = commentaries
        .iter()
        .filter(|c| c.text.trim().chars().count() >= config.min_text_length)
        .filter(|c| seen.insert(c.id.as_str()))
        .collect();

    if survivors.is_empty() {
        return starvation_fallback(commentaries, config);
    }

    let mut scored: Vec<Excerpt> = survivors
        .iter()
        .map(|c| Excerpt {
            id: c.id.clone(),
            school: c.school.clone(),
            text: c.text.clone(),
            similarity: scorer.score(query, &c.text),
        })
        .collect();

    // Sort descending by similarity
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let ranked = admit(scored.iter().cloned(), config.max_per_school, config.max_excerpts);

    let low_signal = ranked
        .first()
        .map_or(true, |top| top.similarity < config.similarity_floor);
    if !low_signal {
        return ranked;
    }

    tracing::debug!(
        "Low-signal ranking for query {:?}, using first {} commentaries in order",
        query,
        config.low_signal_count
    );
    let in_order = survivors.iter().map(|c| Excerpt {
        id: c.id.clone(),
        school: c.school.clone(),
        text: c.text.clone(),
        similarity: scored
            .iter()
            .find(|e| e.id == c.id)
            .map_or(0.0, |e| e.similarity),
    });
    admit(
        in_order,
        config.max_per_school,
        config.low_signal_count.min(config.max_excerpts),
    )
}

/// Greedy walk honouring the per-school and total caps.
fn admit(
    candidates: impl Iterator<Item = Excerpt>,
    max_per_school: usize,
    max_total: usize,
) -> Vec<Excerpt> {
    let mut per_school: HashMap<String, usize> = HashMap::new();
    let mut admitted = Vec::new();

    for excerpt in candidates {
        if admitted.len() >= max_total {
            break;
        }
        let count = per_school.entry(excerpt.school.clone()).or_insert(0);
        if *count >= max_per_school {
            continue;
        }
        *count += 1;
        admitted.push(excerpt);
    }

    admitted
}

fn starvation_fallback(commentaries: &[Commentary], config: &SelectionConfig) -> Vec<Excerpt> {
    let mut seen = HashSet::new();
    commentaries
        .iter()
        .filter(|c| seen.insert(c.id.as_str()))
        .take(config.max_excerpts)
        .map(|c| Excerpt {
            id: c.id.clone(),
            school: c.school.clone(),
            text: truncate_chars(&c.text, config.starvation_truncate),
            similarity: 0.0,
        })
        .collect()
}

/// Truncate to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}
