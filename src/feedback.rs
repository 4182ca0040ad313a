//! # Stage: Feedback Queue
//!
//! ## Responsibility
//! Deliver satisfaction feedback to the service and keep anything that
//! could not be delivered in a durable pending queue for the next flush.
//!
//! ## Guarantees
//! - A record stays in `pendingFeedback` until a delivery is acknowledged
//! - Flushes preserve queue order for the records that remain
//! - Records queued while a flush is in progress are kept
//!
//! ## NOT Responsible For
//! - Exactly-once delivery: if the acknowledgement is lost after the server
//!   accepted a record it will be sent again

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::FeedbackSink;
use crate::error::ChatError;
use crate::session::SessionState;
use crate::store::{KeyValueStore, KEY_PENDING_FEEDBACK, KEY_SHOW_FEEDBACK_ON_LOAD};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Session age in milliseconds at submission time.
    #[serde(default, deserialize_with = "lenient_millis")]
    pub duration: i64,
    #[serde(default)]
    pub message_count: usize,
    /// Milliseconds the prompt was open before the user answered.
    #[serde(default, deserialize_with = "lenient_millis")]
    pub feedback_time: i64,
    #[serde(default)]
    pub relationship: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub session_id: String,
    pub rating: u8,
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
    pub session_metrics: SessionMetrics,
}

impl FeedbackRecord {
    /// Build a record for the active session.
    ///
    /// `prompt_opened_at` is when the feedback prompt was shown.
    pub fn for_session(
        state: &SessionState,
        rating: u8,
        feedback: impl Into<String>,
        prompt_opened_at: DateTime<Utc>,
    ) -> Result<Self, ChatError> {
        validate_rating(rating)?;
        let now = Utc::now();
        Ok(Self {
            session_id: state.session_id().to_string(),
            rating,
            feedback: feedback.into(),
            timestamp: now,
            session_metrics: SessionMetrics {
                duration: state.duration_ms(),
                message_count: state.message_count,
                feedback_time: (now - prompt_opened_at).num_milliseconds().max(0),
                relationship: state.relationship.clone(),
            },
        })
    }
}

pub fn validate_rating(rating: u8) -> Result<(), ChatError> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(ChatError::InvalidRating(rating))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Delivered,
    /// Delivery failed; the record is in the pending queue.
    Queued,
    /// Delivery failed and the pending queue could not be written either.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub delivered: usize,
    pub remaining: usize,
}

pub struct FeedbackQueue<S> {
    sink: S,
    store: Arc<dyn KeyValueStore>,
}

impl<S: FeedbackSink> FeedbackQueue<S> {
    pub fn new(sink: S, store: Arc<dyn KeyValueStore>) -> Self {
        Self { sink, store }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Try to deliver `record`; queue it durably on any failure.
    pub async fn submit(&self, record: FeedbackRecord) -> SubmitOutcome {
        match self.sink.deliver(&record).await {
            Ok(()) => {
                info!(session_id = %record.session_id, rating = record.rating, "feedback delivered");
                SubmitOutcome::Delivered
            }
            Err(e) => {
                warn!(error = %e, session_id = %record.session_id, "feedback delivery failed, queueing");
                match self.enqueue(record) {
                    Ok(()) => SubmitOutcome::Queued,
                    Err(e) => {
                        warn!(error = %e, "could not persist pending feedback");
                        SubmitOutcome::Dropped
                    }
                }
            }
        }
    }

    /// Records waiting for delivery, oldest first. Entries that do not
    /// decode are left in the queue but not returned.
    pub fn pending(&self) -> Vec<FeedbackRecord> {
        match self.raw_pending() {
            Ok(entries) => entries.into_iter().filter_map(decode_record).collect(),
            Err(e) => {
                warn!(error = %e, "pending feedback unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    /// The queue as stored, one JSON value per record.
    fn raw_pending(&self) -> Result<Vec<Value>, ChatError> {
        match self.store.get(KEY_PENDING_FEEDBACK)? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }

    fn write_pending(&self, entries: &[Value]) -> Result<(), ChatError> {
        if entries.is_empty() {
            return self.store.remove(KEY_PENDING_FEEDBACK);
        }
        let json = serde_json::to_string(entries)?;
        self.store.set(KEY_PENDING_FEEDBACK, &json)
    }

    /// Append to the queue. Fails rather than replace a queue it cannot read.
    fn enqueue(&self, record: FeedbackRecord) -> Result<(), ChatError> {
        let mut queue = self.raw_pending()?;
        queue.push(serde_json::to_value(&record)?);
        self.write_pending(&queue)
    }

    /// Attempt every queued record in order; keep the ones that fail.
    ///
    /// Entries that do not decode are not sent and are written back as they
    /// were.
    pub async fn flush_pending(&self) -> FlushReport {
        let snapshot = match self.raw_pending() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "pending feedback unreadable, not flushing");
                return FlushReport::default();
            }
        };
        if snapshot.is_empty() {
            return FlushReport::default();
        }

        let mut remaining = Vec::new();
        let mut attempted = 0;
        let mut delivered = 0;
        for entry in &snapshot {
            let Some(record) = decode_record(entry.clone()) else {
                remaining.push(entry.clone());
                continue;
            };
            attempted += 1;
            match self.sink.deliver(&record).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(error = %e, session_id = %record.session_id, "pending feedback still undeliverable");
                    remaining.push(entry.clone());
                }
            }
        }

        // Anything appended while we were delivering goes after the leftovers.
        match self.raw_pending() {
            Ok(current) if current.len() > snapshot.len() => {
                remaining.extend(current.into_iter().skip(snapshot.len()));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "pending feedback changed underneath flush, leaving it as is");
                return FlushReport {
                    attempted,
                    delivered,
                    remaining: snapshot.len() - delivered,
                };
            }
        }

        if let Err(e) = self.write_pending(&remaining) {
            warn!(error = %e, "could not update pending feedback queue");
        }

        let report = FlushReport {
            attempted,
            delivered,
            remaining: remaining.len(),
        };
        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            remaining = report.remaining,
            "pending feedback flushed"
        );
        report
    }

    /// Ask for a feedback prompt on the next startup.
    pub fn mark_show_on_load(&self) {
        if let Err(e) = self.store.set(KEY_SHOW_FEEDBACK_ON_LOAD, "true") {
            warn!(error = %e, "could not persist show-feedback flag");
        }
    }

    /// Read and clear the show-on-load flag.
    pub fn take_show_on_load(&self) -> bool {
        let set = matches!(
            self.store.get(KEY_SHOW_FEEDBACK_ON_LOAD),
            Ok(Some(v)) if v.trim() == "true"
        );
        if set {
            if let Err(e) = self.store.remove(KEY_SHOW_FEEDBACK_ON_LOAD) {
                warn!(error = %e, "could not clear show-feedback flag");
            }
        }
        set
    }
}

fn decode_record(entry: Value) -> Option<FeedbackRecord> {
    match serde_json::from_value(entry) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "skipping unreadable pending feedback entry");
            None
        }
    }
}

/// Milliseconds as either client wrote them: integer, fractional, or `null`
/// when the timer never started.
fn lenient_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let ms = Option::<f64>::deserialize(deserializer)?;
    Ok(ms.filter(|v| v.is_finite()).map(|v| v.round() as i64).unwrap_or(0))
}

/// Tracks whether the feedback prompt is open and since when.
#[derive(Debug, Clone, Default)]
pub struct FeedbackPrompt {
    opened_at: Option<DateTime<Utc>>,
}

impl FeedbackPrompt {
    pub fn open(&mut self) {
        if self.opened_at.is_none() {
            self.opened_at = Some(Utc::now());
        }
    }

    pub fn close(&mut self) {
        self.opened_at = None;
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    /// When the prompt opened; `now` if it was never shown (feedback given
    /// unprompted).
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at.unwrap_or_else(Utc::now)
    }
}
