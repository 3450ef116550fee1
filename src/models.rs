use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One addressable verse of the corpus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verse {
    /// `"<chapter>:<verse>"`
    pub id: String,
    pub chapter: u32,
    pub verse: u32,
    pub shloka: String,
    pub transliteration: String,
    pub translations: BTreeMap<String, String>,
    pub word_meaning: BTreeMap<String, String>,
}

/// One school's commentary on a verse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commentary {
    /// Unique within the verse's commentary set (`C1`, `C2`, ...)
    pub id: String,
    pub school: String,
    pub text: String,
    /// `original`, or `substitute` when another author stands in for the school
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substitute_author: Option<String>,
}

fn default_status() -> String {
    "original".to_string()
}

impl Commentary {
    pub fn new(id: impl Into<String>, school: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            school: school.into(),
            text: text.into(),
            status: default_status(),
            original_author: None,
            substitute_author: None,
        }
    }

    /// Display attribution; blank author names are dropped.
    pub fn with_attribution(
        mut self,
        status: Option<String>,
        original_author: Option<String>,
        substitute_author: Option<String>,
    ) -> Self {
        let present = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        if let Some(status) = present(status) {
            self.status = status;
        }
        self.original_author = present(original_author);
        self.substitute_author = present(substitute_author);
        self
    }

    /// The author to credit: the original one when known.
    pub fn author(&self) -> Option<&str> {
        self.original_author
            .as_deref()
            .or(self.substitute_author.as_deref())
    }
}

/// A scored unit of evidence for a single synthesis call.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Excerpt {
    pub id: String,
    pub school: String,
    pub text: String,
    /// Only comparable against excerpts of the same call
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    PracticalAction,
    Renunciation,
    Devotional,
    Jnana,
    Mixed,
    InsufficientEvidence,
}

impl Direction {
    /// Unknown labels collapse to `Mixed`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "practical_action" => Self::PracticalAction,
            "renunciation" => Self::Renunciation,
            "devotional" => Self::Devotional,
            "jnana" => Self::Jnana,
            "insufficient_evidence" => Self::InsufficientEvidence,
            _ => Self::Mixed,
        }
    }
}

/// Structured output of one verse's synthesis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisResult {
    pub summary: String,
    pub direction: Direction,
    pub supporting_ids: Vec<String>,
    /// Set semantics, first-appearance order
    pub supporting_schools: Vec<String>,
    pub confidence_score: f64,
    pub note: String,
}

/// Free trial standing attached to a trial-funded summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrialStatus {
    pub uses_remaining: u32,
    pub total_uses: u32,
}

/// Per-verse result of one synthesis attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Summary {
        result: SynthesisResult,
        #[serde(skip_serializing_if = "Option::is_none")]
        trial: Option<TrialStatus>,
    },
    Skipped {
        reason: String,
    },
    Blocked {
        reason: String,
    },
}

impl Outcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
        }
    }

    pub fn summary(&self) -> Option<&SynthesisResult> {
        match self {
            Self::Summary { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// Who is asking, and with which key.
#[derive(Debug, Clone, Default)]
pub struct UsageContext {
    /// Opaque per-session identity
    pub user_id: String,
    /// A user-supplied key bypasses trial metering
    pub user_credential: Option<String>,
}

/// A retrieved verse together with its commentaries.
#[derive(Debug, Clone, Serialize)]
pub struct VerseHit {
    pub verse: Verse,
    pub score: f32,
    pub commentaries: Vec<Commentary>,
}

/// Search request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// Search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<VerseHit>,
}

/// Summarize one verse
#[derive(Debug, Clone, Deserialize)]
pub struct SummarizeRequest {
    pub verse_id: String,
    pub query: String,
    pub user_id: Option<String>,
    /// User-supplied LLM key
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummarizeResponse {
    pub verse_id: String,
    pub user_id: String,
    pub outcome: Outcome,
}

/// Summarize several verses for the same query
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSummarizeRequest {
    pub verse_ids: Vec<String>,
    pub query: String,
    pub user_id: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerseOutcome {
    pub verse_id: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummarizeResponse {
    pub user_id: String,
    pub outcomes: Vec<VerseOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialResponse {
    pub user_id: String,
    pub remaining: u32,
    pub can_use: bool,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub verses: usize,
    pub commentaries: usize,
    pub schools: usize,
    pub trial_available: bool,
}
