use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where usage tracking and the synthesis log are stored
    pub data_dir: PathBuf,
    /// Verse + commentary corpus (JSON)
    pub corpus_file: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// LLM provider configuration
    pub llm: LlmConfig,
    /// Excerpt selection thresholds
    pub selection: SelectionConfig,
    /// Free trial metering
    pub trial: TrialConfig,
    /// Maximum concurrent synthesis calls across all sessions
    pub max_concurrent_syntheses: usize,
    /// Per-request fan-out for batch summaries
    pub batch_concurrency: usize,
    /// Append one JSON line per synthesis to `synthesis_log_path()`
    pub synthesis_log: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai" (any OpenAI-compatible endpoint, e.g. Groq)
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for synthesis
    pub chat_model: String,
    /// Shared trial credential. Users past their trial must bring their own key.
    #[serde(skip_serializing)]
    pub trial_api_key: Option<String>,
    /// Upper bound on a single synthesis call, in seconds
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Excerpt selection thresholds. These are tuned empirically, not load-bearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub max_excerpts: usize,
    pub max_per_school: usize,
    /// Trimmed-length floor that filters out empty or placeholder entries.
    pub min_text_length: usize,
    /// Below this top similarity the ranking is ignored.
    pub similarity_floor: f32,
    /// How many commentaries the low-signal override admits.
    pub low_signal_count: usize,
    /// Truncation cap used when every commentary was too short.
    pub starvation_truncate: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Free synthesis calls per user on the shared credential
    pub limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            corpus_file: PathBuf::from("./data/merged_gita_clean.json"),
            bind_addr: "127.0.0.1:8501".to_string(),
            llm: LlmConfig::default(),
            selection: SelectionConfig::default(),
            trial: TrialConfig::default(),
            max_concurrent_syntheses: 4,
            batch_concurrency: 3,
            synthesis_log: true,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.groq.com/openai".to_string(),
            chat_model: "llama-3.1-8b-instant".to_string(),
            trial_api_key: None,
            timeout_secs: 15,
            max_tokens: 400,
            temperature: 0.0,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_excerpts: 16,
            max_per_school: 6,
            min_text_length: 5,
            similarity_floor: 0.1,
            low_signal_count: 8,
            starvation_truncate: 500,
        }
    }
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self { limit: 3 }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("GITA_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            config.corpus_file = config.data_dir.join("merged_gita_clean.json");
        }
        if let Ok(file) = std::env::var("GITA_CORPUS_FILE") {
            config.corpus_file = PathBuf::from(file);
        }
        if let Ok(addr) = std::env::var("GITA_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(key) = std::env::var("LLM_TRIAL_API_KEY") {
            if !key.trim().is_empty() {
                config.llm.trial_api_key = Some(key);
            }
        }
        if let Ok(val) = std::env::var("LLM_TIMEOUT_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.llm.timeout_secs = v.clamp(1, 120);
            }
        }
        if let Ok(val) = std::env::var("LLM_MAX_TOKENS") {
            if let Ok(v) = val.parse() {
                config.llm.max_tokens = v;
            }
        }
        if let Ok(val) = std::env::var("GITA_TRIAL_LIMIT") {
            if let Ok(v) = val.parse() {
                config.trial.limit = v;
            }
        }

        // Selection thresholds
        if let Ok(val) = std::env::var("GITA_MAX_EXCERPTS") {
            if let Ok(v) = val.parse() {
                config.selection.max_excerpts = v;
            }
        }
        if let Ok(val) = std::env::var("GITA_MAX_PER_SCHOOL") {
            if let Ok(v) = val.parse() {
                config.selection.max_per_school = v;
            }
        }
        if let Ok(val) = std::env::var("GITA_MIN_TEXT_LENGTH") {
            if let Ok(v) = val.parse() {
                config.selection.min_text_length = v;
            }
        }
        if let Ok(val) = std::env::var("GITA_SIMILARITY_FLOOR") {
            if let Ok(v) = val.parse() {
                config.selection.similarity_floor = v;
            }
        }

        if let Ok(val) = std::env::var("GITA_MAX_CONCURRENT_SYNTHESES") {
            if let Ok(v) = val.parse::<usize>() {
                config.max_concurrent_syntheses = v.max(1);
            }
        }
        if let Ok(val) = std::env::var("GITA_BATCH_CONCURRENCY") {
            if let Ok(v) = val.parse::<usize>() {
                config.batch_concurrency = v.max(1);
            }
        }
        if let Ok(val) = std::env::var("GITA_SYNTHESIS_LOG") {
            config.synthesis_log = !matches!(val.as_str(), "0" | "false" | "off");
        }

        config
    }

    pub fn usage_path(&self) -> PathBuf {
        self.data_dir.join("usage_tracking.json")
    }

    pub fn synthesis_log_path(&self) -> PathBuf {
        self.data_dir.join("synthesis_log.jsonl")
    }
}
