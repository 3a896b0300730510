//! Thin translation layer between duty-officer decisions and the state
//! machine. Every action validates against the current state by going
//! through the transition table; a refused action mutates nothing.

use std::sync::Arc;

use vigil_schema::{
    EscalationRecord, EscalationReason, Incident, IncidentEvent, IncidentId, IncidentState,
    OfficerId, Solution, StopReason,
};
use vigil_store::EscalationStore;

use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};
use crate::incident::IncidentLog;
use crate::session::SessionManager;

#[derive(Clone)]
pub struct DutyOfficerGateway {
    incidents: Arc<IncidentLog>,
    sessions: SessionManager,
    escalations: Arc<EscalationStore>,
    clock: Arc<dyn Clock>,
}

impl DutyOfficerGateway {
    pub fn new(
        incidents: Arc<IncidentLog>,
        sessions: SessionManager,
        escalations: Arc<EscalationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            incidents,
            sessions,
            escalations,
            clock,
        }
    }

    /// The duty officer's work queue.
    pub async fn pending(&self) -> Vec<Incident> {
        self.incidents.pending_approval().await
    }

    pub async fn approve(&self, incident_id: IncidentId, officer: OfficerId) -> Result<Incident> {
        self.incidents.approve(incident_id, officer).await
    }

    /// Sends the incident back to investigation; the orchestrator's
    /// dispatch loop may then start a retry session.
    pub async fn reject(&self, incident_id: IncidentId, officer: OfficerId) -> Result<Incident> {
        let incident = self
            .incidents
            .transition(incident_id, IncidentEvent::Reject)
            .await?;
        tracing::info!(incident_id = %incident_id, officer = %officer.0, "solution rejected");
        Ok(incident)
    }

    pub async fn escalate(
        &self,
        incident_id: IncidentId,
        officer: OfficerId,
        summary: impl Into<String>,
    ) -> Result<Incident> {
        let incident = self
            .incidents
            .transition(incident_id, IncidentEvent::Escalate)
            .await?;

        if let Some(session_id) = incident.current_session_id {
            if let Err(e) = self.sessions.stop(session_id, StopReason::Superseded).await {
                tracing::debug!(%session_id, error = %e, "session already terminal on escalate");
            }
        }

        self.escalations
            .append(&EscalationRecord {
                incident_id,
                escalated_at: self.clock.now(),
                reason: EscalationReason::DutyOfficerRequest,
                summary: summary.into(),
            })
            .await?;

        tracing::info!(incident_id = %incident_id, officer = %officer.0, "incident escalated by duty officer");
        Ok(incident)
    }

    /// Officer-entered remediation: attached with the officer as approver
    /// and confidence pinned to 1.0, then approved in the same call.
    pub async fn custom_solution(
        &self,
        incident_id: IncidentId,
        officer: OfficerId,
        text: impl Into<String>,
    ) -> Result<Incident> {
        let mut solution = Solution::new(text, 1.0, vec![]);
        solution.approver_id = Some(officer.clone());

        let incident = self
            .incidents
            .get(incident_id)
            .await
            .ok_or(OrchestratorError::UnknownIncident(incident_id))?;
        match incident.state {
            IncidentState::SolutionProposed => {
                self.incidents.attach_solution(incident_id, solution).await?;
            }
            IncidentState::PendingApproval => {
                // Overrides the agent's unapproved proposal.
                self.incidents.replace_solution(incident_id, solution).await?;
            }
            state if state.is_terminal() => {
                return Err(OrchestratorError::AlreadyTerminal(state));
            }
            state => {
                return Err(OrchestratorError::InvalidTransition {
                    state,
                    event: IncidentEvent::SolutionReady,
                });
            }
        }

        self.incidents.approve(incident_id, officer).await
    }

    /// Closes an escalated incident with a disposition, making it terminal.
    /// The disposition becomes the final entry in the escalation log.
    pub async fn close(
        &self,
        incident_id: IncidentId,
        officer: OfficerId,
        disposition: impl Into<String>,
    ) -> Result<Incident> {
        let incident = self
            .incidents
            .transition(incident_id, IncidentEvent::Close)
            .await?;
        let disposition = disposition.into();

        self.escalations
            .append(&EscalationRecord {
                incident_id,
                escalated_at: self.clock.now(),
                reason: EscalationReason::Closed,
                summary: disposition.clone(),
            })
            .await?;

        tracing::info!(
            incident_id = %incident_id,
            officer = %officer.0,
            %disposition,
            "escalated incident closed"
        );
        Ok(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{IdleAgent, InvestigationAgent};
    use crate::clock::SystemClock;
    use crate::policy::EscalationPolicy;
    use std::path::Path;
    use vigil_bus::EventBus;
    use vigil_graph::{InMemoryGraph, InMemoryRegistry};
    use vigil_schema::{ServiceId, Severity};

    struct Stack {
        incidents: Arc<IncidentLog>,
        sessions: SessionManager,
        gateway: DutyOfficerGateway,
        escalations: Arc<EscalationStore>,
    }

    fn stack(dir: &Path) -> Stack {
        let bus = EventBus::new(32);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let incidents = Arc::new(
            IncidentLog::open(dir, bus.publisher(), clock.clone(), EscalationPolicy::default())
                .unwrap(),
        );
        let agent: Arc<dyn InvestigationAgent> = Arc::new(IdleAgent);
        let sessions = SessionManager::new(
            dir,
            incidents.clone(),
            bus.publisher(),
            clock.clone(),
            agent,
            Arc::new(InMemoryGraph::new()),
            Arc::new(InMemoryRegistry::new()),
        );
        let escalations = Arc::new(EscalationStore::new(dir));
        let gateway = DutyOfficerGateway::new(
            incidents.clone(),
            sessions.clone(),
            escalations.clone(),
            clock,
        );
        Stack {
            incidents,
            sessions,
            gateway,
            escalations,
        }
    }

    async fn incident_pending_approval(stack: &Stack) -> IncidentId {
        let incident = stack
            .incidents
            .create(ServiceId("vessel-tracker".into()), Severity::High)
            .await
            .unwrap();
        let session_id = stack.sessions.start_session(incident.id).await.unwrap();
        stack
            .sessions
            .propose_solution(session_id, Solution::new("requeue stuck jobs", 0.75, vec![]))
            .await
            .unwrap();
        incident.id
    }

    #[tokio::test]
    async fn approve_resolves_and_shrinks_queue() {
        let dir = tempfile::tempdir().unwrap();
        let stack = stack(dir.path());
        let id = incident_pending_approval(&stack).await;

        assert_eq!(stack.gateway.pending().await.len(), 1);

        let resolved = stack
            .gateway
            .approve(id, OfficerId("officer-1".into()))
            .await
            .unwrap();
        assert_eq!(resolved.state, IncidentState::Resolved);
        assert!(resolved.solution.unwrap().approved);
        assert!(stack.gateway.pending().await.is_empty());
    }

    #[tokio::test]
    async fn reject_reopens_investigation() {
        let dir = tempfile::tempdir().unwrap();
        let stack = stack(dir.path());
        let id = incident_pending_approval(&stack).await;

        let incident = stack
            .gateway
            .reject(id, OfficerId("officer-1".into()))
            .await
            .unwrap();
        assert_eq!(incident.state, IncidentState::Investigating);
        assert!(incident.solution.is_none());

        // The idle agent's session still holds the slot; supersede it,
        // then a retry session starts fine.
        let old = stack.sessions.for_incident(id).await.pop().unwrap().id;
        stack
            .sessions
            .stop(old, StopReason::Superseded)
            .await
            .unwrap();
        stack.sessions.start_session(id).await.unwrap();
    }

    #[tokio::test]
    async fn escalate_records_officer_request() {
        let dir = tempfile::tempdir().unwrap();
        let stack = stack(dir.path());
        let id = incident_pending_approval(&stack).await;

        let incident = stack
            .gateway
            .escalate(id, OfficerId("officer-2".into()), "needs platform team")
            .await
            .unwrap();
        assert_eq!(incident.state, IncidentState::Escalated);

        let records = stack.escalations.for_incident(id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, EscalationReason::DutyOfficerRequest);

        let closed = stack
            .gateway
            .close(id, OfficerId("officer-2".into()), "handed to platform team")
            .await
            .unwrap();
        assert_eq!(closed.state, IncidentState::EscalatedClosed);

        // The disposition is the final entry in the escalation log.
        let records = stack.escalations.for_incident(id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].reason, EscalationReason::Closed);
        assert_eq!(records[1].summary, "handed to platform team");
    }

    #[tokio::test]
    async fn custom_solution_approves_with_full_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let stack = stack(dir.path());
        let id = incident_pending_approval(&stack).await;

        let resolved = stack
            .gateway
            .custom_solution(id, OfficerId("officer-3".into()), "failover to standby region")
            .await
            .unwrap();
        assert_eq!(resolved.state, IncidentState::Resolved);
        let solution = resolved.solution.unwrap();
        assert_eq!(solution.confidence, 1.0);
        assert_eq!(solution.text, "failover to standby region");
        assert!(solution.approved);
        assert_eq!(solution.approver_id, Some(OfficerId("officer-3".into())));
    }

    #[tokio::test]
    async fn invalid_actions_do_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let stack = stack(dir.path());
        let incident = stack
            .incidents
            .create(ServiceId("svc".into()), Severity::Low)
            .await
            .unwrap();

        let err = stack
            .gateway
            .approve(incident.id, OfficerId("o".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
        let err = stack
            .gateway
            .reject(incident.id, OfficerId("o".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));

        let unchanged = stack.incidents.get(incident.id).await.unwrap();
        assert_eq!(unchanged.state, IncidentState::Detected);
        assert_eq!(unchanged.updated_at, incident.updated_at);
    }

    #[tokio::test]
    async fn decisions_after_terminal_fail_with_already_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let stack = stack(dir.path());
        let id = incident_pending_approval(&stack).await;

        stack
            .gateway
            .approve(id, OfficerId("first".into()))
            .await
            .unwrap();

        let err = stack
            .gateway
            .reject(id, OfficerId("second".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyTerminal(_)));
        let err = stack
            .gateway
            .custom_solution(id, OfficerId("second".into()), "other fix")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyTerminal(_)));
    }
}
