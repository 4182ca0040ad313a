pub mod analysis;
pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod feedback;
pub mod loader;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod throttle;
pub mod transcript;
pub mod view;

use std::sync::Arc;

use tracing::{debug, info};

use api::Relationship;
use client::{AnalysisService, FeedbackSink};
use config::ClientConfig;
use error::ChatError;
use feedback::{FeedbackPrompt, FeedbackQueue, FeedbackRecord, FlushReport, SubmitOutcome};
use loader::LoadOutcome;
use pipeline::{AnalysisPipeline, ExchangeOutcome};
use session::SessionState;
use store::KeyValueStore;
use transcript::TranscriptStore;
use view::HistoryEntry;

// ---------------------------------------------------------------------------
// Store selection
// ---------------------------------------------------------------------------

/// Open the durable store for `config`, or an in-memory one when `ephemeral`.
///
/// With the `sqlite-store` feature the data directory holds a single
/// `emotion-chat.db`; otherwise one JSON file per key.
pub fn open_store(config: &ClientConfig, ephemeral: bool) -> Result<Arc<dyn KeyValueStore>, ChatError> {
    if ephemeral {
        debug!("using in-memory store");
        return Ok(Arc::new(store::MemoryStore::new()));
    }
    #[cfg(feature = "sqlite-store")]
    {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.data_dir.join("emotion-chat.db");
        debug!(path = %path.display(), "using sqlite store");
        Ok(Arc::new(store::SqliteStore::open(path)?))
    }
    #[cfg(not(feature = "sqlite-store"))]
    {
        debug!(dir = %config.data_dir.display(), "using file store");
        Ok(Arc::new(store::FileStore::open(&config.data_dir)?))
    }
}

// ---------------------------------------------------------------------------
// ChatClient
// ---------------------------------------------------------------------------

/// What happened during [`ChatClient::startup`].
#[derive(Debug, Clone, PartialEq)]
pub struct Startup {
    pub flushed: FlushReport,
    /// Set when a `--continue` id was requested.
    pub loaded: Option<LoadOutcome>,
    /// The previous run asked for feedback and the active session has
    /// messages to rate.
    pub prompt_feedback: bool,
}

/// The chat client: one active session, the analysis pipeline and the
/// feedback queue, all over one shared store.
pub struct ChatClient<A, F> {
    pipeline: AnalysisPipeline<A>,
    feedback: FeedbackQueue<F>,
    state: SessionState,
    prompt: FeedbackPrompt,
}

impl<A: AnalysisService, F: FeedbackSink> ChatClient<A, F> {
    pub fn new(service: A, sink: F, store: Arc<dyn KeyValueStore>, config: &ClientConfig) -> Self {
        let transcripts = TranscriptStore::new(store.clone(), config.history_limit);
        let pipeline = AnalysisPipeline::new(service, transcripts, config.throttle_window())
            .with_feedback_every(config.feedback_every);
        let relationship = Relationship::from_str_loose(&config.default_relationship)
            .unwrap_or_default()
            .to_string();
        Self {
            pipeline,
            feedback: FeedbackQueue::new(sink, store),
            state: SessionState::new(relationship),
            prompt: FeedbackPrompt::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transcripts(&self) -> &TranscriptStore {
        self.pipeline.transcripts()
    }

    pub fn feedback_queue(&self) -> &FeedbackQueue<F> {
        &self.feedback
    }

    pub fn feedback_prompt_open(&self) -> bool {
        self.prompt.is_open()
    }

    /// Flush queued feedback, continue `continue_id` if given, then honour
    /// the show-feedback-on-load flag left by the previous run.
    pub async fn startup(&mut self, continue_id: Option<&str>) -> Startup {
        let mut startup = self.resume(continue_id).await;
        startup.prompt_feedback = self.feedback.take_show_on_load() && self.state.message_count > 0;
        if startup.prompt_feedback {
            self.prompt.open();
        }
        startup
    }

    /// Like [`ChatClient::startup`] but leaves the show-feedback-on-load
    /// flag for the next interactive run. Used by one-shot sends, which
    /// have no prompt to show.
    pub async fn resume(&mut self, continue_id: Option<&str>) -> Startup {
        let flushed = self.feedback.flush_pending().await;
        let loaded = continue_id.map(|id| self.continue_session(id));
        Startup {
            flushed,
            loaded,
            prompt_feedback: false,
        }
    }

    /// Send one message through the analysis pipeline.
    pub async fn send(&mut self, text: &str) -> Result<ExchangeOutcome, ChatError> {
        let outcome = self.pipeline.submit(&mut self.state, text).await?;
        if outcome.prompt_feedback {
            self.prompt.open();
        }
        Ok(outcome)
    }

    /// Start a fresh conversation. The previous one is already archived.
    pub fn new_chat(&mut self) {
        self.state.reset();
        self.prompt.close();
        info!(session_id = %self.state.session_id(), "new chat");
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        view::history_entries(&self.transcripts().list())
    }

    pub fn continue_session(&mut self, id: &str) -> LoadOutcome {
        let outcome = loader::continue_session(self.pipeline.transcripts(), &mut self.state, id);
        if matches!(outcome, LoadOutcome::Loaded(_)) {
            self.prompt.close();
        }
        outcome
    }

    pub fn set_relationship(&mut self, relationship: Relationship) {
        self.state.set_relationship(relationship.as_str());
    }

    pub fn open_feedback(&mut self) {
        self.prompt.open();
    }

    /// Rate the active session. An invalid rating leaves the prompt open.
    pub async fn submit_feedback(&mut self, rating: u8, text: &str) -> Result<SubmitOutcome, ChatError> {
        let record = FeedbackRecord::for_session(&self.state, rating, text.trim(), self.prompt.opened_at())?;
        self.prompt.close();
        Ok(self.feedback.submit(record).await)
    }

    pub fn skip_feedback(&mut self) {
        self.prompt.close();
    }

    pub async fn flush_feedback(&self) -> FlushReport {
        self.feedback.flush_pending().await
    }

    /// Called on exit. Returns whether the next startup will ask for feedback.
    pub fn shutdown(&mut self) -> bool {
        let ask_next_time = self.state.message_count > 0 && !self.prompt.is_open();
        if ask_next_time {
            self.feedback.mark_show_on_load();
        }
        debug!(session_id = %self.state.session_id(), ask_next_time, "shutdown");
        ask_next_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisContext, AnalysisResult, SentimentBand};
    use crate::api::AnalyzeRequest;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Neutral;

    impl AnalysisService for Neutral {
        async fn analyze(&self, _request: &AnalyzeRequest) -> Result<AnalysisResult, ChatError> {
            Ok(AnalysisResult {
                sentiment_score: 0.0,
                sentiment: SentimentBand::Neutral,
                dominant_emotion: None,
                emotions: Vec::new(),
                context: AnalysisContext::default(),
            })
        }
    }

    #[derive(Default)]
    struct Switch(AtomicBool);

    impl FeedbackSink for Switch {
        async fn deliver(&self, _record: &FeedbackRecord) -> Result<(), ChatError> {
            if self.0.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ChatError::Network { url: "http://test".into(), detail: "down".into() })
            }
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            throttle_ms: 0,
            ..ClientConfig::default()
        }
    }

    fn client(store: Arc<MemoryStore>) -> ChatClient<Neutral, Switch> {
        ChatClient::new(Neutral, Switch::default(), store, &config())
    }

    #[tokio::test]
    async fn test_third_exchange_opens_prompt() {
        let mut c = client(Arc::new(MemoryStore::new()));
        c.send("one").await.unwrap();
        c.send("two").await.unwrap();
        assert!(!c.feedback_prompt_open());
        c.send("three").await.unwrap();
        assert!(c.feedback_prompt_open());
    }

    #[tokio::test]
    async fn test_feedback_queued_then_flushed_on_startup() {
        let store = Arc::new(MemoryStore::new());
        let mut c = client(store.clone());
        c.send("hi").await.unwrap();
        c.open_feedback();
        assert_eq!(c.submit_feedback(4, "nice").await.unwrap(), SubmitOutcome::Queued);
        assert!(!c.feedback_prompt_open());
        assert_eq!(c.feedback_queue().pending().len(), 1);

        let mut next = client(store);
        next.feedback_queue().sink().0.store(true, Ordering::SeqCst);
        let startup = next.startup(None).await;
        assert_eq!(startup.flushed.delivered, 1);
        assert!(next.feedback_queue().pending().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_rating_keeps_prompt_open() {
        let mut c = client(Arc::new(MemoryStore::new()));
        c.open_feedback();
        assert!(matches!(c.submit_feedback(9, "").await, Err(ChatError::InvalidRating(9))));
        assert!(c.feedback_prompt_open());
    }

    #[tokio::test]
    async fn test_shutdown_flag_prompts_after_continue() {
        let store = Arc::new(MemoryStore::new());
        let mut c = client(store.clone());
        c.send("hello").await.unwrap();
        let id = c.state().session_id().to_string();
        assert!(c.shutdown());

        let mut next = client(store);
        let startup = next.startup(Some(&id)).await;
        assert!(matches!(startup.loaded, Some(LoadOutcome::Loaded(_))));
        assert!(startup.prompt_feedback);
        assert!(next.feedback_prompt_open());
    }

    #[tokio::test]
    async fn test_resume_leaves_show_on_load_flag() {
        let store = Arc::new(MemoryStore::new());
        let mut c = client(store.clone());
        c.send("hello").await.unwrap();
        let id = c.state().session_id().to_string();
        assert!(c.shutdown());

        let mut one_shot = client(store.clone());
        let resumed = one_shot.resume(Some(&id)).await;
        assert!(matches!(resumed.loaded, Some(LoadOutcome::Loaded(_))));
        assert!(!resumed.prompt_feedback);
        assert!(!one_shot.feedback_prompt_open());

        let mut interactive = client(store);
        assert!(interactive.startup(Some(&id)).await.prompt_feedback);
    }

    #[tokio::test]
    async fn test_shutdown_flag_ignored_for_fresh_session() {
        let store = Arc::new(MemoryStore::new());
        let mut c = client(store.clone());
        c.send("hello").await.unwrap();
        c.shutdown();

        let mut next = client(store.clone());
        assert!(!next.startup(None).await.prompt_feedback);
        // consumed either way
        let mut third = client(store);
        assert!(!third.feedback_queue().take_show_on_load());
        assert!(!third.shutdown());
    }

    #[tokio::test]
    async fn test_new_chat_archives_previous_and_resets() {
        let mut c = client(Arc::new(MemoryStore::new()));
        c.set_relationship(Relationship::Colleague);
        c.send("first chat").await.unwrap();
        let first = c.state().session_id().to_string();
        c.new_chat();
        assert_ne!(c.state().session_id(), first);
        assert_eq!(c.state().relationship, "colleague");
        assert_eq!(c.state().message_count, 0);

        let history = c.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, first);
        assert_eq!(history[0].preview, "first chat");
        assert_eq!(history[0].relationship, "colleague");
    }

    #[tokio::test]
    async fn test_continue_unknown_id_keeps_session() {
        let mut c = client(Arc::new(MemoryStore::new()));
        let id = c.state().session_id().to_string();
        let startup = c.startup(Some("session_0_missing")).await;
        assert_eq!(startup.loaded, Some(LoadOutcome::NotFound));
        assert_eq!(c.state().session_id(), id);
    }

    #[test]
    fn test_unknown_default_relationship_falls_back_to_neutral() {
        let cfg = ClientConfig {
            default_relationship: "nemesis".into(),
            ..ClientConfig::default()
        };
        let c = ChatClient::new(Neutral, Switch::default(), Arc::new(MemoryStore::new()), &cfg);
        assert_eq!(c.state().relationship, "neutral");
    }

    #[test]
    fn test_open_store_ephemeral() {
        let cfg = ClientConfig::default();
        let store = open_store(&cfg, true).unwrap();
        store.set("chatHistory", "[]").unwrap();
        assert_eq!(store.get("chatHistory").unwrap().as_deref(), Some("[]"));
    }
}
