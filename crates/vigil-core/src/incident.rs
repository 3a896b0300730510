//! Canonical incident lifecycle. All mutation goes through the transition
//! table under a single write lock per map, so the first terminal
//! transition to commit wins and later conflicting writers fail.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use vigil_bus::BusPublisher;
use vigil_schema::{
    BusMessage, Incident, IncidentEvent, IncidentId, IncidentState, OfficerId, ServiceId,
    SessionId, Solution, Severity,
};
use vigil_store::IncidentStore;

use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};
use crate::policy::EscalationPolicy;

/// The transition table. Anything not listed here is an illegal event
/// for that state.
pub fn next_state(state: IncidentState, event: IncidentEvent) -> Option<IncidentState> {
    use IncidentEvent as E;
    use IncidentState as S;

    match (state, event) {
        (S::Detected, E::SessionStarted) => Some(S::Investigating),
        // Retry sessions start from investigating after a reject.
        (S::Investigating, E::SessionStarted) => Some(S::Investigating),
        (S::Investigating, E::SolutionReady) => Some(S::SolutionProposed),
        (S::Investigating, E::SessionFailed) => Some(S::Escalated),
        (S::PendingApproval, E::Approve) => Some(S::Resolved),
        (S::PendingApproval, E::Reject) => Some(S::Investigating),
        (S::PendingApproval, E::Timeout) => Some(S::Escalated),
        // A duty officer may force escalation anywhere before a verdict.
        (S::Detected, E::Escalate)
        | (S::Investigating, E::Escalate)
        | (S::SolutionProposed, E::Escalate)
        | (S::PendingApproval, E::Escalate) => Some(S::Escalated),
        (S::Escalated, E::Close) => Some(S::EscalatedClosed),
        _ => None,
    }
}

pub struct IncidentLog {
    incidents: RwLock<HashMap<IncidentId, Incident>>,
    store: IncidentStore,
    generation: AtomicU64,
    persisted: Mutex<u64>,
    bus: BusPublisher,
    clock: Arc<dyn Clock>,
    policy: EscalationPolicy,
}

impl IncidentLog {
    /// Opens the log, restoring persisted incidents so armed escalation
    /// deadlines survive a restart.
    pub fn open(
        data_dir: &Path,
        bus: BusPublisher,
        clock: Arc<dyn Clock>,
        policy: EscalationPolicy,
    ) -> anyhow::Result<Self> {
        let store = IncidentStore::new(data_dir);
        let incidents = store.load()?;
        if !incidents.is_empty() {
            tracing::info!(count = incidents.len(), "restored incidents from store");
        }
        Ok(Self {
            incidents: RwLock::new(incidents),
            store,
            generation: AtomicU64::new(0),
            persisted: Mutex::new(0),
            bus,
            clock,
            policy,
        })
    }

    /// Clones the map and releases the write lock before touching the
    /// disk, so commits on other incidents don't wait on file IO. Writes
    /// are generation-gated: a stale snapshot never lands over a newer
    /// one that already reached disk.
    async fn persist_and_release(
        &self,
        incidents: RwLockWriteGuard<'_, HashMap<IncidentId, Incident>>,
    ) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = incidents.clone();
        drop(incidents);

        let mut persisted = self.persisted.lock().await;
        if generation <= *persisted {
            return Ok(());
        }
        self.store.persist(&snapshot).await?;
        *persisted = generation;
        Ok(())
    }

    pub async fn create(&self, service_id: ServiceId, severity: Severity) -> Result<Incident> {
        let now = self.clock.now();
        let incident = Incident {
            id: IncidentId::new(),
            service_id: service_id.clone(),
            severity,
            state: IncidentState::Detected,
            created_at: now,
            updated_at: now,
            current_session_id: None,
            solution: None,
            escalation_deadline: None,
        };

        {
            let mut incidents = self.incidents.write().await;
            incidents.insert(incident.id, incident.clone());
            self.persist_and_release(incidents).await?;
        }

        tracing::info!(incident_id = %incident.id, service_id = %service_id.0, ?severity, "incident created");
        let _ = self
            .bus
            .publish(BusMessage::IncidentCreated {
                incident_id: incident.id,
                service_id,
                severity,
            })
            .await;

        Ok(incident)
    }

    pub async fn get(&self, id: IncidentId) -> Option<Incident> {
        self.incidents.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<Incident> {
        self.incidents.read().await.values().cloned().collect()
    }

    pub async fn pending_approval(&self) -> Vec<Incident> {
        self.incidents
            .read()
            .await
            .values()
            .filter(|i| i.state == IncidentState::PendingApproval)
            .cloned()
            .collect()
    }

    /// Incidents the escalation sweep should fire for: still pending
    /// approval with a deadline at or before `now`.
    pub async fn past_deadline(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<Incident> {
        self.incidents
            .read()
            .await
            .values()
            .filter(|i| i.state == IncidentState::PendingApproval)
            .filter(|i| i.escalation_deadline.map(|d| d <= now).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Applies `event` per the transition table. Illegal events fail with
    /// `InvalidTransition` (or `AlreadyTerminal`) and leave the incident
    /// untouched.
    pub async fn transition(&self, id: IncidentId, event: IncidentEvent) -> Result<Incident> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(&id)
            .ok_or(OrchestratorError::UnknownIncident(id))?;

        if incident.state.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal(incident.state));
        }
        let from = incident.state;
        let to = next_state(from, event)
            .ok_or(OrchestratorError::InvalidTransition { state: from, event })?;

        incident.state = to;
        incident.updated_at = self.clock.now();
        if from == IncidentState::PendingApproval {
            incident.escalation_deadline = None;
        }
        if event == IncidentEvent::Reject {
            // Clear the rejected proposal so a retry session can attach
            // a fresh one; it survives in the session log.
            incident.solution = None;
        }
        let snapshot = incident.clone();
        self.persist_and_release(incidents).await?;

        tracing::info!(incident_id = %id, %from, %to, %event, "incident transition");
        let _ = self
            .bus
            .publish(BusMessage::TransitionApplied {
                incident_id: id,
                from,
                to,
                event,
            })
            .await;

        Ok(snapshot)
    }

    /// Moves `solution_proposed` → `pending_approval`, attaching the
    /// proposal and arming the severity deadline.
    pub async fn attach_solution(&self, id: IncidentId, solution: Solution) -> Result<Incident> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(&id)
            .ok_or(OrchestratorError::UnknownIncident(id))?;

        if incident.state.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal(incident.state));
        }
        if incident.solution.is_some() {
            return Err(OrchestratorError::DuplicateSolution);
        }
        if incident.state != IncidentState::SolutionProposed {
            return Err(OrchestratorError::InvalidTransition {
                state: incident.state,
                event: IncidentEvent::SolutionReady,
            });
        }

        let now = self.clock.now();
        let from = incident.state;
        incident.state = IncidentState::PendingApproval;
        incident.solution = Some(solution);
        incident.escalation_deadline = Some(now + self.policy.timeout(incident.severity));
        incident.updated_at = now;
        let snapshot = incident.clone();
        self.persist_and_release(incidents).await?;

        tracing::info!(
            incident_id = %id,
            deadline = %snapshot.escalation_deadline.unwrap(),
            "solution attached, awaiting duty officer"
        );
        let _ = self
            .bus
            .publish(BusMessage::TransitionApplied {
                incident_id: id,
                from,
                to: IncidentState::PendingApproval,
                event: IncidentEvent::SolutionReady,
            })
            .await;

        Ok(snapshot)
    }

    /// Commits an approval: marks the attached solution approved and moves
    /// to `resolved` in one critical section, so a concurrent verdict
    /// cannot interleave.
    pub async fn approve(&self, id: IncidentId, officer: OfficerId) -> Result<Incident> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(&id)
            .ok_or(OrchestratorError::UnknownIncident(id))?;

        if incident.state.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal(incident.state));
        }
        let from = incident.state;
        let to = next_state(from, IncidentEvent::Approve).ok_or(
            OrchestratorError::InvalidTransition {
                state: from,
                event: IncidentEvent::Approve,
            },
        )?;
        let Some(solution) = incident.solution.as_mut() else {
            return Err(OrchestratorError::InvalidTransition {
                state: from,
                event: IncidentEvent::Approve,
            });
        };

        solution.approved = true;
        solution.approver_id = Some(officer.clone());
        incident.state = to;
        incident.escalation_deadline = None;
        incident.updated_at = self.clock.now();
        let snapshot = incident.clone();
        self.persist_and_release(incidents).await?;

        tracing::info!(incident_id = %id, officer = %officer.0, "solution approved, incident resolved");
        let _ = self
            .bus
            .publish(BusMessage::TransitionApplied {
                incident_id: id,
                from,
                to,
                event: IncidentEvent::Approve,
            })
            .await;

        Ok(snapshot)
    }

    /// Replaces the (unapproved) solution while pending approval. Used by
    /// the duty officer's custom-solution path; an approved solution is
    /// immutable and refuses replacement.
    pub async fn replace_solution(&self, id: IncidentId, solution: Solution) -> Result<Incident> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(&id)
            .ok_or(OrchestratorError::UnknownIncident(id))?;

        if incident.state.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal(incident.state));
        }
        if incident.state != IncidentState::PendingApproval {
            return Err(OrchestratorError::InvalidTransition {
                state: incident.state,
                event: IncidentEvent::SolutionReady,
            });
        }
        if incident.solution.as_ref().map(|s| s.approved).unwrap_or(false) {
            return Err(OrchestratorError::DuplicateSolution);
        }

        incident.solution = Some(solution);
        incident.updated_at = self.clock.now();
        let snapshot = incident.clone();
        self.persist_and_release(incidents).await?;
        Ok(snapshot)
    }

    /// Compare-and-set on the incident's active-session slot. Fails with
    /// `SessionAlreadyActive` if another session holds it.
    pub async fn claim_session_slot(&self, id: IncidentId, session_id: SessionId) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(&id)
            .ok_or(OrchestratorError::UnknownIncident(id))?;

        if incident.state.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal(incident.state));
        }
        if incident.current_session_id.is_some() {
            return Err(OrchestratorError::SessionAlreadyActive(id));
        }

        incident.current_session_id = Some(session_id);
        incident.updated_at = self.clock.now();
        self.persist_and_release(incidents).await?;
        Ok(())
    }

    /// Releases the slot only if `session_id` still holds it; a stale
    /// release from a superseded session is a no-op.
    pub async fn release_session_slot(&self, id: IncidentId, session_id: SessionId) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        let Some(incident) = incidents.get_mut(&id) else {
            return Ok(());
        };
        if incident.current_session_id != Some(session_id) {
            return Ok(());
        }

        incident.current_session_id = None;
        incident.updated_at = self.clock.now();
        self.persist_and_release(incidents).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use chrono::Utc;
    use vigil_bus::EventBus;

    fn service() -> ServiceId {
        ServiceId("edi-gateway".to_string())
    }

    async fn open_log(dir: &Path) -> IncidentLog {
        let bus = EventBus::new(16);
        IncidentLog::open(
            dir,
            bus.publisher(),
            Arc::new(SystemClock),
            EscalationPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn table_rejects_unlisted_pairs() {
        assert_eq!(
            next_state(IncidentState::Detected, IncidentEvent::Approve),
            None
        );
        assert_eq!(
            next_state(IncidentState::Resolved, IncidentEvent::Reject),
            None
        );
        assert_eq!(
            next_state(IncidentState::Investigating, IncidentEvent::Timeout),
            None
        );
        assert_eq!(
            next_state(IncidentState::PendingApproval, IncidentEvent::Approve),
            Some(IncidentState::Resolved)
        );
        assert_eq!(
            next_state(IncidentState::Escalated, IncidentEvent::Close),
            Some(IncidentState::EscalatedClosed)
        );
    }

    #[tokio::test]
    async fn create_starts_detected_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path()).await;

        let incident = log.create(service(), Severity::High).await.unwrap();
        assert_eq!(incident.state, IncidentState::Detected);
        assert!(incident.escalation_deadline.is_none());

        // A fresh log over the same dir sees the record.
        let reopened = open_log(dir.path()).await;
        let loaded = reopened.get(incident.id).await.unwrap();
        assert_eq!(loaded.state, IncidentState::Detected);
    }

    #[tokio::test]
    async fn invalid_transition_leaves_incident_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path()).await;
        let incident = log.create(service(), Severity::Low).await.unwrap();

        let err = log
            .transition(incident.id, IncidentEvent::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));

        let unchanged = log.get(incident.id).await.unwrap();
        assert_eq!(unchanged.state, IncidentState::Detected);
        assert_eq!(unchanged.updated_at, incident.updated_at);
    }

    #[tokio::test]
    async fn attach_solution_arms_severity_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc::now());
        let bus = EventBus::new(16);
        let log = IncidentLog::open(
            dir.path(),
            bus.publisher(),
            Arc::new(clock.clone()),
            EscalationPolicy::default(),
        )
        .unwrap();

        let incident = log.create(service(), Severity::Critical).await.unwrap();
        log.transition(incident.id, IncidentEvent::SessionStarted)
            .await
            .unwrap();
        log.transition(incident.id, IncidentEvent::SolutionReady)
            .await
            .unwrap();
        let attached = log
            .attach_solution(incident.id, Solution::new("restart parser", 0.8, vec![]))
            .await
            .unwrap();

        assert_eq!(attached.state, IncidentState::PendingApproval);
        assert_eq!(
            attached.escalation_deadline,
            Some(clock.now() + chrono::Duration::minutes(5))
        );
    }

    #[tokio::test]
    async fn attach_solution_twice_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path()).await;
        let incident = log.create(service(), Severity::Medium).await.unwrap();
        log.transition(incident.id, IncidentEvent::SessionStarted)
            .await
            .unwrap();
        log.transition(incident.id, IncidentEvent::SolutionReady)
            .await
            .unwrap();
        log.attach_solution(incident.id, Solution::new("a", 0.5, vec![]))
            .await
            .unwrap();

        let err = log
            .attach_solution(incident.id, Solution::new("b", 0.6, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateSolution));
    }

    #[tokio::test]
    async fn first_terminal_transition_wins() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path()).await;
        let incident = log.create(service(), Severity::High).await.unwrap();
        log.transition(incident.id, IncidentEvent::SessionStarted)
            .await
            .unwrap();
        log.transition(incident.id, IncidentEvent::SolutionReady)
            .await
            .unwrap();
        log.attach_solution(incident.id, Solution::new("fix", 0.9, vec![]))
            .await
            .unwrap();

        log.approve(incident.id, OfficerId("officer-1".into()))
            .await
            .unwrap();

        // A racing reject (or timeout) arrives after the terminal commit.
        let err = log
            .transition(incident.id, IncidentEvent::Reject)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AlreadyTerminal(IncidentState::Resolved)
        ));
        let err = log
            .transition(incident.id, IncidentEvent::Timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn reject_clears_solution_and_disarms_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path()).await;
        let incident = log.create(service(), Severity::High).await.unwrap();
        log.transition(incident.id, IncidentEvent::SessionStarted)
            .await
            .unwrap();
        log.transition(incident.id, IncidentEvent::SolutionReady)
            .await
            .unwrap();
        log.attach_solution(incident.id, Solution::new("fix", 0.9, vec![]))
            .await
            .unwrap();

        let rejected = log
            .transition(incident.id, IncidentEvent::Reject)
            .await
            .unwrap();
        assert_eq!(rejected.state, IncidentState::Investigating);
        assert!(rejected.solution.is_none());
        assert!(rejected.escalation_deadline.is_none());
    }

    #[tokio::test]
    async fn approve_marks_solution_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path()).await;
        let incident = log.create(service(), Severity::High).await.unwrap();
        log.transition(incident.id, IncidentEvent::SessionStarted)
            .await
            .unwrap();
        log.transition(incident.id, IncidentEvent::SolutionReady)
            .await
            .unwrap();
        log.attach_solution(incident.id, Solution::new("fix", 0.9, vec![]))
            .await
            .unwrap();

        let resolved = log
            .approve(incident.id, OfficerId("officer-7".into()))
            .await
            .unwrap();
        let solution = resolved.solution.unwrap();
        assert!(solution.approved);
        assert_eq!(solution.approver_id, Some(OfficerId("officer-7".into())));
    }

    #[tokio::test]
    async fn session_slot_is_compare_and_set() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path()).await;
        let incident = log.create(service(), Severity::High).await.unwrap();

        let first = SessionId::new();
        let second = SessionId::new();
        log.claim_session_slot(incident.id, first).await.unwrap();
        let err = log
            .claim_session_slot(incident.id, second)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionAlreadyActive(_)));

        // Stale release from a session that no longer holds the slot.
        log.release_session_slot(incident.id, second).await.unwrap();
        assert_eq!(
            log.get(incident.id).await.unwrap().current_session_id,
            Some(first)
        );

        log.release_session_slot(incident.id, first).await.unwrap();
        log.claim_session_slot(incident.id, second).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_commits_all_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(open_log(dir.path()).await);

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(log.create(service(), Severity::High).await.unwrap().id);
        }

        let mut handles = Vec::new();
        for id in &ids {
            let log = log.clone();
            let id = *id;
            handles.push(tokio::spawn(async move {
                log.transition(id, IncidentEvent::SessionStarted).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        // Interleaved persists never leave a stale snapshot on disk.
        let reopened = open_log(dir.path()).await;
        for id in ids {
            assert_eq!(
                reopened.get(id).await.unwrap().state,
                IncidentState::Investigating
            );
        }
    }

    #[tokio::test]
    async fn past_deadline_scans_only_pending_approval() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc::now());
        let bus = EventBus::new(16);
        let log = IncidentLog::open(
            dir.path(),
            bus.publisher(),
            Arc::new(clock.clone()),
            EscalationPolicy::default(),
        )
        .unwrap();

        let pending = log.create(service(), Severity::Critical).await.unwrap();
        log.transition(pending.id, IncidentEvent::SessionStarted)
            .await
            .unwrap();
        log.transition(pending.id, IncidentEvent::SolutionReady)
            .await
            .unwrap();
        log.attach_solution(pending.id, Solution::new("fix", 0.9, vec![]))
            .await
            .unwrap();
        let fresh = log.create(service(), Severity::Critical).await.unwrap();

        assert!(log.past_deadline(clock.now()).await.is_empty());

        clock.advance(chrono::Duration::minutes(6));
        let due = log.past_deadline(clock.now()).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, pending.id);
        assert_ne!(due[0].id, fresh.id);
    }
}
