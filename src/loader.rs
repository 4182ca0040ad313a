//! Continue a previously archived session.

use tracing::{info, warn};

use crate::session::SessionState;
use crate::transcript::TranscriptStore;
use crate::view::{render_session, SessionView};

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The session is now active; the view holds every replayed message.
    Loaded(SessionView),
    NotFound,
}

/// Replace the active session with the archived session `id`.
///
/// On a miss the state is left exactly as it was. On a hit the session id,
/// transcript and (when stored) relationship are taken from the archive,
/// and `message_count` becomes the number of replayed messages.
pub fn continue_session(
    transcripts: &TranscriptStore,
    state: &mut SessionState,
    id: &str,
) -> LoadOutcome {
    let Some(mut stored) = transcripts.find_by_id(id) else {
        warn!(session_id = %id, "session not found in history");
        return LoadOutcome::NotFound;
    };

    match stored.relationship.as_deref() {
        Some(rel) if !rel.is_empty() => state.relationship = rel.to_string(),
        _ => stored.relationship = Some(state.relationship.clone()),
    }

    state.message_count = stored.messages.len();
    state.exchanges = stored.ai_message_count();
    let view = render_session(&stored);
    state.session = stored;

    info!(
        session_id = %id,
        messages = state.message_count,
        relationship = %state.relationship,
        "continuing session"
    );
    LoadOutcome::Loaded(view)
}
