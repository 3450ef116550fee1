use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SelectionConfig;
use crate::llm::generate::{Credential, RequestError, TextGenerator};
use crate::models::{Commentary, Outcome, TrialStatus, UsageContext, VerseOutcome};
use crate::synthesis::audit::{AuditEntry, AuditLog};
use crate::synthesis::repair::repair_with_path;
use crate::synthesis::request::SynthesisRequest;
use crate::synthesis::select::{select, LexicalScorer, RelevanceScorer};
use crate::usage::meter::UsageMeter;

pub const NO_COMMENTARY: &str = "no commentary text available";
pub const TRIAL_EXHAUSTED: &str = "trial exhausted";
pub const NO_TRIAL_CREDENTIAL: &str = "no trial credential configured";

/// A verse queued for batch synthesis.
#[derive(Debug, Clone)]
pub struct VerseJob {
    pub verse_id: String,
    pub commentaries: Vec<Commentary>,
}

/// Drives selection, metering, the model call and repair for one verse.
///
/// Stateless per call apart from the usage meter. Every path returns an
/// [`Outcome`]; one verse's failure never affects another. Trial-funded
/// calls for the same user run one at a time, from the limit check through
/// the increment, so concurrent requests cannot spend the same remaining use.
pub struct VerseSynthesizer {
    generator: Arc<dyn TextGenerator>,
    scorer: Arc<dyn RelevanceScorer>,
    meter: UsageMeter,
    trial_credential: Option<String>,
    selection: SelectionConfig,
    timeout: Duration,
    audit: Option<AuditLog>,
    trial_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl VerseSynthesizer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        meter: UsageMeter,
        selection: SelectionConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            scorer: Arc::new(LexicalScorer),
            meter,
            trial_credential: None,
            selection,
            timeout,
            audit: None,
            trial_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_trial_credential(mut self, key: Option<String>) -> Self {
        self.trial_credential = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn meter(&self) -> &UsageMeter {
        &self.meter
    }

    pub fn has_trial_credential(&self) -> bool {
        self.trial_credential.is_some()
    }

    pub async fn summarize_verse(
        &self,
        verse_id: &str,
        commentaries: &[Commentary],
        query: &str,
        usage: &UsageContext,
    ) -> Outcome {
        // ── Step 1: Excerpt selection ─────────────────────
        let excerpts = select(commentaries, query, &self.selection, self.scorer.as_ref());
        if excerpts.iter().all(|e| e.text.trim().is_empty()) {
            tracing::info!("Verse {verse_id}: skipped, no commentary text");
            return Outcome::skipped(NO_COMMENTARY);
        }

        // ── Step 2: Pick a credential ─────────────────────
        // Held until the trial use is recorded
        let _trial_guard = match user_key(usage) {
            Some(_) => None,
            None => Some(self.trial_lock(&usage.user_id).lock_owned().await),
        };
        let credential = match self.credential_for(usage) {
            Ok(credential) => credential,
            Err(outcome) => {
                tracing::info!("Verse {verse_id}: {outcome:?}");
                return outcome;
            }
        };

        // ── Step 3: Model call (bounded) ──────────────────
        let request = SynthesisRequest::new(query, &excerpts);
        let sent = tokio::time::timeout(
            self.timeout,
            request.send(self.generator.as_ref(), &credential),
        )
        .await
        .unwrap_or(Err(RequestError::Timeout(self.timeout)));

        let raw = match sent {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Verse {verse_id}: synthesis request failed: {e}");
                return Outcome::skipped(e.to_string());
            }
        };

        // ── Step 4: Repair ────────────────────────────────
        let (result, path) = repair_with_path(&raw, request.excerpts(), query);
        tracing::info!(
            "Verse {verse_id}: synthesized from {} excerpts via {path:?}",
            request.excerpts().len()
        );

        if let Some(audit) = &self.audit {
            audit
                .record(&AuditEntry {
                    timestamp: Utc::now(),
                    verse_id,
                    query,
                    selected_excerpt_ids: request.excerpts().iter().map(|e| e.id.as_str()).collect(),
                    repair_path: path,
                    raw_model_output: &raw,
                    result: &result,
                })
                .await;
        }

        // ── Step 5: Meter trial use after a successful call ─
        let trial = if credential.is_trial() {
            Some(self.record_trial_use(&usage.user_id).await)
        } else {
            None
        };

        Outcome::Summary { result, trial }
    }

    /// Summarize independent verses concurrently. Outcomes come back in the
    /// order of `jobs`, whatever order the calls complete in.
    pub async fn summarize_batch(
        &self,
        jobs: &[VerseJob],
        query: &str,
        usage: &UsageContext,
        concurrency: usize,
    ) -> Vec<VerseOutcome> {
        stream::iter(jobs.iter().cloned())
            .map(move |job| async move {
                let outcome = self
                    .summarize_verse(&job.verse_id, &job.commentaries, query, usage)
                    .await;
                VerseOutcome {
                    verse_id: job.verse_id,
                    outcome,
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    fn credential_for(&self, usage: &UsageContext) -> Result<Credential, Outcome> {
        if let Some(key) = user_key(usage) {
            return Ok(Credential::User(key.to_string()));
        }

        let Some(trial_key) = &self.trial_credential else {
            return Err(Outcome::blocked(NO_TRIAL_CREDENTIAL));
        };

        match self.meter.can_use(&usage.user_id) {
            Ok(true) => Ok(Credential::Trial(trial_key.clone())),
            Ok(false) => Err(Outcome::blocked(TRIAL_EXHAUSTED)),
            Err(e) => Err(Outcome::skipped(format!("usage store unavailable: {e}"))),
        }
    }

    fn trial_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.trial_locks.lock();
        // Entries nobody holds or waits on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(user_id.to_string()).or_default().clone()
    }

    async fn record_trial_use(&self, user_id: &str) -> TrialStatus {
        let limit = self.meter.limit();
        let meter = self.meter.clone();
        let owned_id = user_id.to_string();
        let recorded = tokio::task::spawn_blocking(move || meter.increment(&owned_id))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);

        match recorded {
            Ok(record) => TrialStatus {
                uses_remaining: limit.saturating_sub(record.usage_count),
                total_uses: limit,
            },
            Err(e) => {
                tracing::warn!("Failed to record trial use for {user_id}: {e}");
                self.meter.status(user_id).unwrap_or(TrialStatus {
                    uses_remaining: 0,
                    total_uses: limit,
                })
            }
        }
    }
}

/// A non-blank key the user brought, which bypasses the trial.
fn user_key(usage: &UsageContext) -> Option<&str> {
    usage
        .user_credential
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::generate::Prompt;
    use crate::models::Direction;
    use crate::usage::store::MemoryUsageStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GOOD_REPLY: &str = r#"{"summary":"Act without attachment.","direction":"practical_action","supporting_ids":["C1","C2"],"supporting_schools":["Advaita Vedanta","Dvaita"],"confidence_score":0.8,"note":"consensus"}"#;

    enum Reply {
        Text(&'static str),
        /// Answers after a short delay so concurrent calls overlap
        Slow(&'static str),
        Fail(u16),
        Hang,
    }

    struct Scripted {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(
            &self,
            _prompt: &Prompt,
            _credential: &Credential,
        ) -> Result<String, RequestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Text(t) => Ok(t.to_string()),
                Reply::Slow(t) => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(t.to_string())
                }
                Reply::Fail(status) => Err(RequestError::Status {
                    status,
                    body: String::new(),
                }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(String::new())
                }
            }
        }
    }

    fn commentaries() -> Vec<Commentary> {
        vec![
            Commentary::new("C1", "Advaita Vedanta", "Action without attachment to results purifies the mind."),
            Commentary::new("C2", "Dvaita", "Perform your duty as worship, without desire for results."),
            Commentary::new("C3", "Sri Vaisnava Sampradaya", "Karma yoga leads to knowledge of the self."),
        ]
    }

    fn synthesizer(generator: Arc<Scripted>, limit: u32) -> VerseSynthesizer {
        let meter = UsageMeter::new(Arc::new(MemoryUsageStore::new()), limit);
        VerseSynthesizer::new(
            generator,
            meter,
            SelectionConfig::default(),
            Duration::from_millis(200),
        )
        .with_trial_credential(Some("trial-key".into()))
    }

    fn trial_user(id: &str) -> UsageContext {
        UsageContext {
            user_id: id.into(),
            user_credential: None,
        }
    }

    #[tokio::test]
    async fn test_summary_on_trial_increments_once() {
        let gen = Scripted::new(Reply::Text(GOOD_REPLY));
        let synth = synthesizer(gen.clone(), 3);
        let outcome = synth
            .summarize_verse("2:47", &commentaries(), "action without attachment", &trial_user("u"))
            .await;

        let Outcome::Summary { result, trial } = outcome else {
            panic!("expected summary");
        };
        assert_eq!(result.direction, Direction::PracticalAction);
        assert_eq!(result.supporting_ids, vec!["C1", "C2"]);
        assert_eq!(
            trial,
            Some(TrialStatus {
                uses_remaining: 2,
                total_uses: 3
            })
        );
        assert_eq!(gen.calls(), 1);
        assert_eq!(synth.meter().usage_count("u").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_commentaries_is_skipped_without_calls() {
        let gen = Scripted::new(Reply::Text(GOOD_REPLY));
        let synth = synthesizer(gen.clone(), 3);
        let outcome = synth.summarize_verse("1:1", &[], "q", &trial_user("u")).await;
        assert_eq!(outcome, Outcome::skipped(NO_COMMENTARY));
        assert_eq!(gen.calls(), 0);
        assert_eq!(synth.meter().usage_count("u").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blank_commentaries_are_skipped() {
        let gen = Scripted::new(Reply::Text(GOOD_REPLY));
        let synth = synthesizer(gen.clone(), 3);
        let blank = vec![Commentary::new("C1", "A", "   "), Commentary::new("C2", "B", "")];
        let outcome = synth.summarize_verse("1:1", &blank, "q", &trial_user("u")).await;
        assert_eq!(outcome, Outcome::skipped(NO_COMMENTARY));
        assert_eq!(gen.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_trial_is_blocked() {
        let gen = Scripted::new(Reply::Text(GOOD_REPLY));
        let synth = synthesizer(gen.clone(), 1);
        synth.meter().increment("u").unwrap();

        let outcome = synth
            .summarize_verse("2:47", &commentaries(), "q", &trial_user("u"))
            .await;
        assert_eq!(outcome, Outcome::blocked(TRIAL_EXHAUSTED));
        assert_eq!(gen.calls(), 0);
        assert_eq!(synth.meter().usage_count("u").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_user_credential_bypasses_meter() {
        let gen = Scripted::new(Reply::Text(GOOD_REPLY));
        let synth = synthesizer(gen.clone(), 1);
        synth.meter().increment("u").unwrap();

        let usage = UsageContext {
            user_id: "u".into(),
            user_credential: Some("my-own-key".into()),
        };
        let outcome = synth.summarize_verse("2:47", &commentaries(), "q", &usage).await;
        assert!(matches!(outcome, Outcome::Summary { trial: None, .. }));
        assert_eq!(gen.calls(), 1);
        assert_eq!(synth.meter().usage_count("u").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blank_user_credential_falls_back_to_trial() {
        let gen = Scripted::new(Reply::Text(GOOD_REPLY));
        let synth = synthesizer(gen.clone(), 3);
        let usage = UsageContext {
            user_id: "u".into(),
            user_credential: Some("   ".into()),
        };
        let outcome = synth.summarize_verse("2:47", &commentaries(), "q", &usage).await;
        assert!(matches!(outcome, Outcome::Summary { trial: Some(_), .. }));
        assert_eq!(synth.meter().usage_count("u").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_trial_credential_is_blocked() {
        let gen = Scripted::new(Reply::Text(GOOD_REPLY));
        let meter = UsageMeter::new(Arc::new(MemoryUsageStore::new()), 3);
        let synth = VerseSynthesizer::new(
            gen.clone(),
            meter,
            SelectionConfig::default(),
            Duration::from_secs(1),
        );
        let outcome = synth
            .summarize_verse("2:47", &commentaries(), "q", &trial_user("u"))
            .await;
        assert_eq!(outcome, Outcome::blocked(NO_TRIAL_CREDENTIAL));
        assert_eq!(gen.calls(), 0);
    }

    #[tokio::test]
    async fn test_request_error_is_skipped_without_increment() {
        let gen = Scripted::new(Reply::Fail(429));
        let synth = synthesizer(gen.clone(), 3);
        let outcome = synth
            .summarize_verse("2:47", &commentaries(), "q", &trial_user("u"))
            .await;
        let Outcome::Skipped { reason } = outcome else {
            panic!("expected skip");
        };
        assert!(reason.contains("429"));
        assert!(reason.contains("Rate limit exceeded"));
        assert_eq!(synth.meter().usage_count("u").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_skipped() {
        let gen = Scripted::new(Reply::Hang);
        let synth = synthesizer(gen.clone(), 3);
        let outcome = synth
            .summarize_verse("2:47", &commentaries(), "q", &trial_user("u"))
            .await;
        let Outcome::Skipped { reason } = outcome else {
            panic!("expected skip");
        };
        assert!(reason.contains("timed out"));
        assert_eq!(synth.meter().usage_count("u").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_reply_still_summarizes() {
        let gen = Scripted::new(Reply::Text("I cannot answer in JSON, sorry."));
        let synth = synthesizer(gen.clone(), 3);
        let outcome = synth
            .summarize_verse("2:47", &commentaries(), "Karma", &trial_user("u"))
            .await;
        let result = outcome.summary().unwrap();
        assert!(result.note.starts_with("Fallback response"));
        assert_eq!(result.supporting_ids.len(), 3);
        assert_eq!(synth.meter().usage_count("u").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order_and_isolates_failures() {
        let gen = Scripted::new(Reply::Text(GOOD_REPLY));
        let synth = synthesizer(gen.clone(), 10);
        let jobs = vec![
            VerseJob {
                verse_id: "2:47".into(),
                commentaries: commentaries(),
            },
            VerseJob {
                verse_id: "1:1".into(),
                commentaries: vec![],
            },
            VerseJob {
                verse_id: "3:19".into(),
                commentaries: commentaries(),
            },
        ];
        let outcomes = synth
            .summarize_batch(&jobs, "duty", &trial_user("u"), 3)
            .await;
        let ids: Vec<&str> = outcomes.iter().map(|o| o.verse_id.as_str()).collect();
        assert_eq!(ids, vec!["2:47", "1:1", "3:19"]);
        assert!(outcomes[0].outcome.summary().is_some());
        assert_eq!(outcomes[1].outcome, Outcome::skipped(NO_COMMENTARY));
        assert!(outcomes[2].outcome.summary().is_some());
        assert_eq!(gen.calls(), 2);
        assert_eq!(synth.meter().usage_count("u").unwrap(), 2);
    }

    fn jobs(n: usize) -> Vec<VerseJob> {
        (1..=n)
            .map(|i| VerseJob {
                verse_id: format!("2:{i}"),
                commentaries: commentaries(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_concurrent_batch_spends_only_remaining_trial() {
        let gen = Scripted::new(Reply::Slow(GOOD_REPLY));
        let synth = synthesizer(gen.clone(), 3);
        synth.meter().increment("u").unwrap();
        synth.meter().increment("u").unwrap();

        let outcomes = synth.summarize_batch(&jobs(3), "duty", &trial_user("u"), 3).await;

        let summaries = outcomes.iter().filter(|o| o.outcome.summary().is_some()).count();
        let blocked = outcomes
            .iter()
            .filter(|o| o.outcome == Outcome::blocked(TRIAL_EXHAUSTED))
            .count();
        assert_eq!(summaries, 1);
        assert_eq!(blocked, 2);
        assert_eq!(gen.calls(), 1);
        assert_eq!(synth.meter().usage_count("u").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_summaries_across_calls_respect_limit() {
        let gen = Scripted::new(Reply::Slow(GOOD_REPLY));
        let synth = synthesizer(gen.clone(), 2);
        let usage = trial_user("u");
        let comms = commentaries();

        let calls = (0..5).map(|_| synth.summarize_verse("2:47", &comms, "duty", &usage));
        let outcomes = futures_util::future::join_all(calls).await;

        assert_eq!(outcomes.iter().filter(|o| o.summary().is_some()).count(), 2);
        assert_eq!(gen.calls(), 2);
        assert_eq!(synth.meter().usage_count("u").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_own_key_batch_is_not_metered() {
        let gen = Scripted::new(Reply::Slow(GOOD_REPLY));
        let synth = synthesizer(gen.clone(), 1);
        let usage = UsageContext {
            user_id: "u".into(),
            user_credential: Some("my-own-key".into()),
        };
        let outcomes = synth.summarize_batch(&jobs(4), "duty", &usage, 4).await;
        assert!(outcomes.iter().all(|o| o.outcome.summary().is_some()));
        assert_eq!(gen.calls(), 4);
        assert_eq!(synth.meter().usage_count("u").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_audit_log_records_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synthesis_log.jsonl");
        let gen = Scripted::new(Reply::Text(GOOD_REPLY));
        let synth = synthesizer(gen, 3).with_audit_log(AuditLog::new(&path));
        synth
            .summarize_verse("2:47", &commentaries(), "q", &trial_user("u"))
            .await;
        let data = std::fs::read_to_string(&path).unwrap();
        assert_eq!(data.lines().count(), 1);
        assert!(data.contains("\"verse_id\":\"2:47\""));
    }
}
