use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(pub Uuid);

impl IncidentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to a monitored service. Owned by the service registry,
/// never by the incident record.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub String);

/// Opaque knowledge-graph node reference. The orchestration core never
/// assumes anything about its internal shape.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfficerId(pub String);

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    Detected,
    Investigating,
    SolutionProposed,
    PendingApproval,
    Resolved,
    Escalated,
    EscalatedClosed,
}

impl IncidentState {
    /// Terminal states accept no further events. `Escalated` is not
    /// terminal: it still awaits a duty-officer disposition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentState::Resolved | IncidentState::EscalatedClosed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentState::Detected => "detected",
            IncidentState::Investigating => "investigating",
            IncidentState::SolutionProposed => "solution_proposed",
            IncidentState::PendingApproval => "pending_approval",
            IncidentState::Resolved => "resolved",
            IncidentState::Escalated => "escalated",
            IncidentState::EscalatedClosed => "escalated_closed",
        }
    }
}

impl std::fmt::Display for IncidentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentEvent {
    SessionStarted,
    SolutionReady,
    Approve,
    Reject,
    Escalate,
    SessionFailed,
    Timeout,
    Close,
}

impl IncidentEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentEvent::SessionStarted => "session_started",
            IncidentEvent::SolutionReady => "solution_ready",
            IncidentEvent::Approve => "approve",
            IncidentEvent::Reject => "reject",
            IncidentEvent::Escalate => "escalate",
            IncidentEvent::SessionFailed => "session_failed",
            IncidentEvent::Timeout => "timeout",
            IncidentEvent::Close => "close",
        }
    }
}

impl std::fmt::Display for IncidentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remediation proposed by an agent (or entered by a duty officer).
/// Immutable once `approved` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Solution {
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub source_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub approver_id: Option<OfficerId>,
}

impl Solution {
    pub fn new(text: impl Into<String>, confidence: f64, source_node_ids: Vec<NodeId>) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source_node_ids,
            approved: false,
            approver_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub service_id: ServiceId,
    pub severity: Severity,
    pub state: IncidentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub current_session_id: Option<SessionId>,
    #[serde(default)]
    pub solution: Option<Solution>,
    #[serde(default)]
    pub escalation_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    AwaitingApproval,
    Stopped,
    Failed,
    Completed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Stopped | SessionState::Failed | SessionState::Completed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    pub role: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentThought {
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: SessionId,
    pub incident_id: IncidentId,
    pub state: SessionState,
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
    #[serde(default)]
    pub thoughts: Vec<AgentThought>,
    #[serde(default)]
    pub proposed_solution: Option<Solution>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Operator or orchestrator asked the agent to stand down.
    Cancelled,
    /// The agent task errored internally.
    AgentError,
    /// A newer decision made the session moot (e.g. duty-officer escalate).
    Superseded,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    Timeout,
    DutyOfficerRequest,
    AgentFailure,
    /// Duty officer closed the escalation; the summary carries the
    /// disposition.
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub incident_id: IncidentId,
    pub escalated_at: DateTime<Utc>,
    pub reason: EscalationReason,
    pub summary: String,
}

/// One line of a session's append-only on-disk log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionLogEntry {
    Message { message: AgentMessage },
    Thought { thought: AgentThought },
    StateChanged { state: SessionState, at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusMessage {
    IncidentCreated {
        incident_id: IncidentId,
        service_id: ServiceId,
        severity: Severity,
    },
    SessionStarted {
        session_id: SessionId,
        incident_id: IncidentId,
    },
    SessionEnded {
        session_id: SessionId,
        incident_id: IncidentId,
        state: SessionState,
    },
    SolutionProposed {
        session_id: SessionId,
        incident_id: IncidentId,
        confidence: f64,
    },
    EscalationDue {
        incident_id: IncidentId,
        deadline: DateTime<Utc>,
    },
    TransitionApplied {
        incident_id: IncidentId,
        from: IncidentState,
        to: IncidentState,
        event: IncidentEvent,
    },
}
