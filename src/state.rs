use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::corpus::Corpus;
use crate::llm::generate::HttpGenerator;
use crate::search::bm25::VerseIndex;
use crate::search::VerseRetriever;
use crate::synthesis::audit::AuditLog;
use crate::synthesis::orchestrator::VerseSynthesizer;
use crate::usage::meter::UsageMeter;
use crate::usage::store::JsonFileUsageStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub corpus: Arc<Corpus>,
    pub retriever: Arc<dyn VerseRetriever>,
    pub synthesizer: Arc<VerseSynthesizer>,
    pub synth_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        // Ensure data directory exists
        std::fs::create_dir_all(&config.data_dir)?;

        let corpus = Arc::new(Corpus::load(&config.corpus_file)?);

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.llm.timeout())
            .build()?;
        let generator = HttpGenerator::new(http_client, config.llm.clone());

        let store = JsonFileUsageStore::open(&config.usage_path())?;
        let meter = UsageMeter::new(Arc::new(store), config.trial.limit);

        let mut synthesizer = VerseSynthesizer::new(
            Arc::new(generator),
            meter,
            config.selection.clone(),
            config.llm.timeout(),
        )
        .with_trial_credential(config.llm.trial_api_key.clone());
        if config.synthesis_log {
            synthesizer = synthesizer.with_audit_log(AuditLog::new(&config.synthesis_log_path()));
        }
        if !synthesizer.has_trial_credential() {
            tracing::warn!("LLM_TRIAL_API_KEY not set: free trial disabled, users must bring a key");
        }

        Self::from_parts(config, corpus, synthesizer)
    }

    /// Assemble state around an already-built synthesizer, indexing the corpus.
    pub fn from_parts(
        config: Config,
        corpus: Arc<Corpus>,
        synthesizer: VerseSynthesizer,
    ) -> anyhow::Result<Self> {
        let index = VerseIndex::build(corpus.clone())?;
        let max_concurrent = config.max_concurrent_syntheses.max(1);

        Ok(Self {
            config,
            corpus,
            retriever: Arc::new(index),
            synthesizer: Arc::new(synthesizer),
            synth_semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
        })
    }
}
