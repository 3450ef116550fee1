use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Direction, Excerpt, SynthesisResult};
use crate::synthesis::select::truncate_chars;

const DEFAULT_CONFIDENCE: f64 = 0.5;
const FALLBACK_CONFIDENCE: f64 = 0.6;
const FALLBACK_SUPPORT: usize = 3;
const RAW_PREVIEW_CHARS: usize = 100;

/// Which step of the repair ladder produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPath {
    Direct,
    Extracted,
    Fallback,
}

/// The model's reply as decoded, before grounding checks.
#[derive(Debug, Deserialize)]
struct ModelReply {
    summary: String,
    direction: String,
    supporting_ids: Vec<String>,
    supporting_schools: Vec<String>,
    #[serde(default)]
    confidence_score: Option<Value>,
    #[serde(default)]
    note: Option<Value>,
}

type DecodeStep = fn(&str) -> Option<ModelReply>;

/// Tried in order; the first to decode wins.
const LADDER: &[(RepairPath, DecodeStep)] = &[
    (RepairPath::Direct, decode_direct),
    (RepairPath::Extracted, decode_braced),
];

/// Turn raw model output into a grounded [`SynthesisResult`]. Never fails.
pub fn repair(raw: &str, excerpts: &[Excerpt], query: &str) -> SynthesisResult {
    repair_with_path(raw, excerpts, query).0
}

pub fn repair_with_path(
    raw: &str,
    excerpts: &[Excerpt],
    query: &str,
) -> (SynthesisResult, RepairPath) {
    for (path, step) in LADDER {
        if let Some(reply) = step(raw) {
            return (ground(reply, excerpts), *path);
        }
    }
    tracing::warn!(
        "Model output was not valid JSON, using fallback: {}",
        truncate_chars(raw, RAW_PREVIEW_CHARS)
    );
    (fallback(raw, excerpts, query), RepairPath::Fallback)
}

fn decode_direct(raw: &str) -> Option<ModelReply> {
    serde_json::from_str(raw.trim()).ok()
}

/// Retry on the span from the first `{` to the last `}`.
fn decode_braced(raw: &str) -> Option<ModelReply> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

/// Coerce a decoded reply onto the closed schema and the excerpts actually
/// sent: unknown directions become `mixed`, citations outside the excerpt set
/// are dropped, schools are re-derived from what remains.
fn ground(reply: ModelReply, excerpts: &[Excerpt]) -> SynthesisResult {
    let mut seen = HashSet::new();
    let supporting_ids: Vec<String> = reply
        .supporting_ids
        .into_iter()
        .filter(|id| excerpts.iter().any(|e| &e.id == id))
        .filter(|id| seen.insert(id.clone()))
        .collect();

    if supporting_ids.is_empty() && !reply.supporting_schools.is_empty() {
        tracing::debug!("Model named schools without any valid excerpt ids");
    }

    let supporting_schools = schools_of(excerpts.iter().filter(|e| supporting_ids.contains(&e.id)));

    let confidence_score = reply
        .confidence_score
        .as_ref()
        .and_then(Value::as_f64)
        .filter(|c| (0.0..=1.0).contains(c))
        .unwrap_or(DEFAULT_CONFIDENCE);

    let note = reply
        .note
        .as_ref()
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    SynthesisResult {
        summary: reply.summary,
        direction: Direction::from_label(&reply.direction),
        supporting_ids,
        supporting_schools,
        confidence_score,
        note,
    }
}

fn fallback(raw: &str, excerpts: &[Excerpt], query: &str) -> SynthesisResult {
    let cited = &excerpts[..excerpts.len().min(FALLBACK_SUPPORT)];
    SynthesisResult {
        summary: format!(
            "Based on {} commentary excerpts, this verse addresses the question about {}.",
            excerpts.len(),
            query.trim().to_lowercase()
        ),
        direction: Direction::Mixed,
        supporting_ids: cited.iter().map(|e| e.id.clone()).collect(),
        supporting_schools: schools_of(cited.iter()),
        confidence_score: FALLBACK_CONFIDENCE,
        note: format!(
            "Fallback response - model output was not valid JSON. Raw: {}...",
            truncate_chars(raw, RAW_PREVIEW_CHARS)
        ),
    }
}

/// Distinct schools in first-appearance order.
fn schools_of<'a>(excerpts: impl Iterator<Item = &'a Excerpt>) -> Vec<String> {
    let mut schools: Vec<String> = Vec::new();
    for e in excerpts {
        if !schools.contains(&e.school) {
            schools.push(e.school.clone());
        }
    }
    schools
}
