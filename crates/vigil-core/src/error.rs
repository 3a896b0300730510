use thiserror::Error;
use vigil_schema::{IncidentEvent, IncidentId, IncidentState, SessionId};

/// Domain errors of the orchestration engine. All of these are
/// per-incident or per-session and recoverable; none aborts the process.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("event {event} is not legal in state {state}")]
    InvalidTransition {
        state: IncidentState,
        event: IncidentEvent,
    },

    /// A terminal transition already committed; the losing writer gets
    /// this instead of silently overwriting (first-committed-wins).
    #[error("incident already reached terminal state {0}")]
    AlreadyTerminal(IncidentState),

    #[error("incident {0} already has an active session")]
    SessionAlreadyActive(IncidentId),

    #[error("session {0} is not running")]
    SessionNotRunning(SessionId),

    #[error("a solution is already attached")]
    DuplicateSolution,

    #[error("unknown incident {0}")]
    UnknownIncident(IncidentId),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
