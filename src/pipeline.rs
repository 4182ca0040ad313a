//! # Stage: Analysis Request Pipeline
//!
//! ## Responsibility
//! Turn one line of user text into a persisted exchange: record the user
//! message, call the analysis service, record the rendered analysis and
//! tell the caller whether the feedback prompt is due.
//!
//! ## Guarantees
//! - Empty input never reaches the service
//! - The user message is archived before the request is sent
//! - At most one submission per throttle window, and never two in flight
//! - A failed request persists no AI message and is reported inline
//!
//! ## NOT Responsible For
//! - Retrying failed analyses
//! - Rendering (see `view`)

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::analysis::AnalysisResult;
use crate::api::AnalyzeRequest;
use crate::client::AnalysisService;
use crate::error::ChatError;
use crate::session::{ChatMessage, SessionState};
use crate::transcript::TranscriptStore;
use crate::throttle::Throttle;
use crate::view::{analysis_markup, error_markup};

/// Default cadence of the feedback prompt, in completed exchanges.
pub const DEFAULT_FEEDBACK_EVERY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    Sent,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Analysis(AnalysisResult),
    /// Display text for a failed request (`Sorry, an error occurred: ...`).
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    pub user: ChatMessage,
    pub reply: Reply,
    /// The exchange count just reached a multiple of the prompt cadence.
    pub prompt_feedback: bool,
}

pub struct AnalysisPipeline<A> {
    service: A,
    transcripts: TranscriptStore,
    throttle: Mutex<Throttle>,
    state: Mutex<RequestState>,
    feedback_every: usize,
}

/// Marks the pipeline as in flight; a dropped request reverts to `Failed`.
struct InFlight<'a> {
    state: &'a Mutex<RequestState>,
}

impl<'a> InFlight<'a> {
    fn begin(state: &'a Mutex<RequestState>) -> Result<Self, ChatError> {
        let mut s = state.lock().map_err(|e| ChatError::Storage(e.to_string()))?;
        if *s == RequestState::Sent {
            return Err(ChatError::Busy);
        }
        *s = RequestState::Sent;
        Ok(Self { state })
    }

    fn finish(self, outcome: RequestState) {
        if let Ok(mut s) = self.state.lock() {
            *s = outcome;
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut s) = self.state.lock() {
            if *s == RequestState::Sent {
                *s = RequestState::Failed;
            }
        }
    }
}

impl<A: AnalysisService> AnalysisPipeline<A> {
    pub fn new(service: A, transcripts: TranscriptStore, throttle_window: Duration) -> Self {
        Self {
            service,
            transcripts,
            throttle: Mutex::new(Throttle::new(throttle_window)),
            state: Mutex::new(RequestState::Idle),
            feedback_every: DEFAULT_FEEDBACK_EVERY,
        }
    }

    /// Prompt for feedback every `n` completed exchanges (`0` disables).
    pub fn with_feedback_every(mut self, n: usize) -> Self {
        self.feedback_every = n;
        self
    }

    pub fn transcripts(&self) -> &TranscriptStore {
        &self.transcripts
    }

    pub fn service(&self) -> &A {
        &self.service
    }

    pub fn state(&self) -> RequestState {
        self.state.lock().map(|s| *s).unwrap_or(RequestState::Failed)
    }

    /// Run one exchange for `text` against the active session.
    ///
    /// Rejections (`EmptyMessage`, `Busy`, `Throttled`) return `Err` and
    /// leave the session untouched. Service failures are not errors here:
    /// they come back as [`Reply::Error`].
    pub async fn submit(
        &self,
        session: &mut SessionState,
        text: &str,
    ) -> Result<ExchangeOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.state() == RequestState::Sent {
            return Err(ChatError::Busy);
        }
        let admitted = self
            .throttle
            .lock()
            .map(|mut t| t.try_acquire())
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        if !admitted {
            debug!("submission rejected by throttle");
            return Err(ChatError::Throttled);
        }
        let guard = InFlight::begin(&self.state)?;

        let user = ChatMessage::user(text);
        session.session.push(user.clone());
        session.message_count += 1;
        self.transcripts.save(&session.session);

        let request = AnalyzeRequest {
            text: text.to_string(),
            relationship: session.relationship.clone(),
            session_id: session.session_id().to_string(),
        };

        match self.service.analyze(&request).await {
            Ok(result) => {
                session.session.push(ChatMessage::ai(analysis_markup(&result)));
                session.message_count += 1;
                session.exchanges += 1;
                self.transcripts.save(&session.session);
                guard.finish(RequestState::Succeeded);

                let prompt_feedback =
                    self.feedback_every > 0 && session.exchanges % self.feedback_every == 0;
                info!(
                    session_id = %request.session_id,
                    sentiment = %result.sentiment,
                    exchanges = session.exchanges,
                    "analysis complete"
                );
                Ok(ExchangeOutcome {
                    user,
                    reply: Reply::Analysis(result),
                    prompt_feedback,
                })
            }
            Err(e) => {
                warn!(error = %e, session_id = %request.session_id, "analysis request failed");
                guard.finish(RequestState::Failed);
                Ok(ExchangeOutcome {
                    user,
                    reply: Reply::Error(error_markup(&e.to_string())),
                    prompt_feedback: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisContext, EmotionScore, SentimentBand};
    use crate::session::MessageKind;
    use crate::store::MemoryStore;
    use crate::transcript::DEFAULT_HISTORY_LIMIT;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedService {
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedService {
        fn ok() -> Self {
            Self { fail: false, calls: AtomicUsize::new(0) }
        }

        fn failing() -> Self {
            Self { fail: true, calls: AtomicUsize::new(0) }
        }
    }

    impl AnalysisService for ScriptedService {
        async fn analyze(&self, _request: &AnalyzeRequest) -> Result<AnalysisResult, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ChatError::Http { status: 500, url: "http://test/analyze".into(), detail: "boom".into() });
            }
            Ok(AnalysisResult {
                sentiment_score: 0.7,
                sentiment: SentimentBand::VeryPositive,
                dominant_emotion: Some("joy".into()),
                emotions: vec![EmotionScore { name: "joy".into(), intensity: 0.9 }],
                context: AnalysisContext::default(),
            })
        }
    }

    fn pipeline(service: ScriptedService) -> (AnalysisPipeline<ScriptedService>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let transcripts = TranscriptStore::new(store.clone(), DEFAULT_HISTORY_LIMIT);
        (AnalysisPipeline::new(service, transcripts, Duration::ZERO), store)
    }

    #[tokio::test]
    async fn test_empty_text_rejected_without_request() {
        let (p, _) = pipeline(ScriptedService::ok());
        let mut state = SessionState::new("neutral");
        let err = p.submit(&mut state, "   \n").await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));
        assert_eq!(p.service().calls.load(Ordering::SeqCst), 0);
        assert!(state.session.messages.is_empty());
        assert_eq!(p.state(), RequestState::Idle);
    }

    #[tokio::test]
    async fn test_success_appends_user_and_ai_messages() {
        let (p, _) = pipeline(ScriptedService::ok());
        let mut state = SessionState::new("friend");
        let out = p.submit(&mut state, "  great day ").await.unwrap();

        assert_eq!(out.user.content, "great day");
        assert!(matches!(out.reply, Reply::Analysis(ref r) if r.dominant_emotion.as_deref() == Some("joy")));
        assert_eq!(state.session.messages.len(), 2);
        assert_eq!(state.session.messages[1].kind, MessageKind::Ai);
        assert!(state.session.messages[1].content.contains("Very Positive"));
        assert_eq!(state.message_count, 2);
        assert_eq!(state.exchanges, 1);
        assert_eq!(p.state(), RequestState::Succeeded);

        let saved = p.transcripts().find_by_id(state.session_id()).unwrap();
        assert_eq!(saved.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_user_message_only() {
        let (p, _) = pipeline(ScriptedService::failing());
        let mut state = SessionState::new("neutral");
        let out = p.submit(&mut state, "hello").await.unwrap();

        let Reply::Error(text) = out.reply else {
            panic!("expected an error reply");
        };
        assert!(text.starts_with("Sorry, an error occurred: "), "{text}");
        assert!(text.contains("500"));
        assert!(!out.prompt_feedback);
        assert_eq!(p.state(), RequestState::Failed);

        let saved = p.transcripts().find_by_id(state.session_id()).unwrap();
        assert_eq!(saved.messages.len(), 1);
        assert_eq!(saved.messages[0].kind, MessageKind::User);
        assert_eq!(state.exchanges, 0);
    }

    #[tokio::test]
    async fn test_user_message_saved_even_if_archive_fails() {
        let (p, store) = pipeline(ScriptedService::ok());
        store.fail_writes(true);
        let mut state = SessionState::new("neutral");
        let out = p.submit(&mut state, "hi").await.unwrap();
        assert!(matches!(out.reply, Reply::Analysis(_)));
        assert_eq!(state.session.messages.len(), 2);
        assert!(p.transcripts().list().is_empty());
    }

    #[tokio::test]
    async fn test_feedback_prompt_every_third_exchange() {
        let (p, _) = pipeline(ScriptedService::ok());
        let mut state = SessionState::new("neutral");
        let mut prompts = Vec::new();
        for i in 0..6 {
            let out = p.submit(&mut state, &format!("message {i}")).await.unwrap();
            prompts.push(out.prompt_feedback);
        }
        assert_eq!(prompts, vec![false, false, true, false, false, true]);
    }

    #[tokio::test]
    async fn test_feedback_cadence_zero_disables_prompt() {
        let (p, _) = pipeline(ScriptedService::ok());
        let p = p.with_feedback_every(0);
        let mut state = SessionState::new("neutral");
        for _ in 0..4 {
            assert!(!p.submit(&mut state, "x").await.unwrap().prompt_feedback);
        }
    }

    #[tokio::test]
    async fn test_throttle_rejects_rapid_resubmit() {
        let store = Arc::new(MemoryStore::new());
        let transcripts = TranscriptStore::new(store, DEFAULT_HISTORY_LIMIT);
        let p = AnalysisPipeline::new(ScriptedService::ok(), transcripts, Duration::from_secs(60));
        let mut state = SessionState::new("neutral");

        assert!(p.submit(&mut state, "first").await.is_ok());
        let err = p.submit(&mut state, "second").await.unwrap_err();
        assert!(matches!(err, ChatError::Throttled));
        assert_eq!(state.session.messages.len(), 2);
        assert_eq!(p.service().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_in_flight_request_rejects_submission() {
        let (p, _) = pipeline(ScriptedService::ok());
        *p.state.lock().unwrap() = RequestState::Sent;
        let mut state = SessionState::new("neutral");
        let err = p.submit(&mut state, "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::Busy));
        assert!(state.session.messages.is_empty());
    }

    #[test]
    fn test_dropped_request_does_not_stay_busy() {
        let state = Mutex::new(RequestState::Idle);
        {
            let _guard = InFlight::begin(&state).unwrap();
            assert_eq!(*state.lock().unwrap(), RequestState::Sent);
            assert!(matches!(InFlight::begin(&state), Err(ChatError::Busy)));
        }
        assert_eq!(*state.lock().unwrap(), RequestState::Failed);
    }

    #[tokio::test]
    async fn test_request_carries_relationship_and_session_id() {
        struct Capture(Mutex<Option<AnalyzeRequest>>);
        impl AnalysisService for Capture {
            async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisResult, ChatError> {
                *self.0.lock().unwrap() = Some(request.clone());
                Err(ChatError::Decode { detail: "stub".into() })
            }
        }
        let transcripts = TranscriptStore::new(Arc::new(MemoryStore::new()), DEFAULT_HISTORY_LIMIT);
        let p = AnalysisPipeline::new(Capture(Mutex::new(None)), transcripts, Duration::ZERO);
        let mut state = SessionState::new("colleague");
        p.submit(&mut state, "status?").await.unwrap();

        let sent = p.service().0.lock().unwrap().clone().unwrap();
        assert_eq!(sent.text, "status?");
        assert_eq!(sent.relationship, "colleague");
        assert_eq!(sent.session_id, state.session_id());
    }
}
