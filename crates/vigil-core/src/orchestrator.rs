//! Composition root: owns the incident log, session manager, duty-officer
//! gateway and stores, and runs the dispatch loop that reacts to bus
//! traffic (new incidents, due escalations, failed sessions).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use vigil_bus::{EventBus, Topic};
use vigil_graph::{SharedGraph, SharedRegistry};
use vigil_schema::{
    BusMessage, EscalationRecord, EscalationReason, IncidentEvent, IncidentId, IncidentState,
    StopReason,
};
use vigil_store::EscalationStore;

use crate::agent::InvestigationAgent;
use crate::clock::Clock;
use crate::error::OrchestratorError;
use crate::incident::IncidentLog;
use crate::officer::DutyOfficerGateway;
use crate::policy::EscalationPolicy;
use crate::session::SessionManager;

pub struct Orchestrator {
    bus: Arc<EventBus>,
    incidents: Arc<IncidentLog>,
    sessions: SessionManager,
    officer: DutyOfficerGateway,
    escalations: Arc<EscalationStore>,
    graph: SharedGraph,
    registry: SharedRegistry,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn open(
        data_dir: &Path,
        policy: EscalationPolicy,
        clock: Arc<dyn Clock>,
        agent: Arc<dyn InvestigationAgent>,
        graph: SharedGraph,
        registry: SharedRegistry,
    ) -> anyhow::Result<Self> {
        let bus = Arc::new(EventBus::new(64));
        let incidents = Arc::new(IncidentLog::open(
            data_dir,
            bus.publisher(),
            clock.clone(),
            policy,
        )?);
        let sessions = SessionManager::new(
            data_dir,
            incidents.clone(),
            bus.publisher(),
            clock.clone(),
            agent,
            graph.clone(),
            registry.clone(),
        );
        let escalations = Arc::new(EscalationStore::new(data_dir));
        let officer = DutyOfficerGateway::new(
            incidents.clone(),
            sessions.clone(),
            escalations.clone(),
            clock.clone(),
        );

        Ok(Self {
            bus,
            incidents,
            sessions,
            officer,
            escalations,
            graph,
            registry,
            clock,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn incidents(&self) -> &Arc<IncidentLog> {
        &self.incidents
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn officer(&self) -> &DutyOfficerGateway {
        &self.officer
    }

    pub fn escalations(&self) -> &Arc<EscalationStore> {
        &self.escalations
    }

    /// Pass-throughs for the knowledge-base and service routes.
    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Dispatch loop. Runs until `shutdown` is cancelled. Each handled
    /// item is isolated: a failure for one incident never stops the loop.
    ///
    /// Bus delivery is lossy, so the loop also reconciles on a tick:
    /// incidents still in `detected` with a free slot (missed message,
    /// restored from disk) get their session started then. The first
    /// tick fires immediately.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut created_rx = self.bus.subscribe(Topic::IncidentCreated).await;
        let mut due_rx = self.bus.subscribe(Topic::EscalationDue).await;
        let mut transitions_rx = self.bus.subscribe(Topic::TransitionApplied).await;
        let mut reconcile = tokio::time::interval(Duration::from_secs(10));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("orchestrator dispatch loop shutting down");
                    break;
                }
                _ = reconcile.tick() => {
                    self.reconcile_detected().await;
                }
                Some(msg) = created_rx.recv() => {
                    if let BusMessage::IncidentCreated { incident_id, .. } = msg {
                        if let Err(e) = self.sessions.start_session(incident_id).await {
                            tracing::warn!(incident_id = %incident_id, error = %e, "could not start session");
                        }
                    }
                }
                Some(msg) = due_rx.recv() => {
                    if let BusMessage::EscalationDue { incident_id, deadline } = msg {
                        self.handle_escalation_due(incident_id, deadline).await;
                    }
                }
                Some(msg) = transitions_rx.recv() => {
                    if let BusMessage::TransitionApplied {
                        incident_id,
                        event: IncidentEvent::SessionFailed,
                        ..
                    } = msg
                    {
                        self.record_agent_failure(incident_id).await;
                    }
                }
            }
        }
    }

    async fn reconcile_detected(&self) {
        for incident in self.incidents.list().await {
            if incident.state != IncidentState::Detected
                || incident.current_session_id.is_some()
            {
                continue;
            }
            if let Err(e) = self.sessions.start_session(incident.id).await {
                tracing::warn!(incident_id = %incident.id, error = %e, "could not start session");
            }
        }
    }

    /// Applies the timeout the sweeper enqueued. The transition re-checks
    /// state under the lock, so a decision that landed between the sweep
    /// and this call wins and no escalation record is written.
    async fn handle_escalation_due(&self, incident_id: IncidentId, deadline: DateTime<Utc>) {
        let incident = match self
            .incidents
            .transition(incident_id, IncidentEvent::Timeout)
            .await
        {
            Ok(incident) => incident,
            Err(
                OrchestratorError::AlreadyTerminal(_) | OrchestratorError::InvalidTransition { .. },
            ) => {
                tracing::debug!(incident_id = %incident_id, "escalation raced a decision, skipping");
                return;
            }
            Err(e) => {
                tracing::warn!(incident_id = %incident_id, error = %e, "timeout transition failed");
                return;
            }
        };

        if let Some(session_id) = incident.current_session_id {
            let _ = self.sessions.stop(session_id, StopReason::Superseded).await;
        }

        if let Err(e) = self
            .escalations
            .append(&EscalationRecord {
                incident_id,
                escalated_at: self.clock.now(),
                reason: EscalationReason::Timeout,
                summary: format!("no duty officer decision before {deadline}"),
            })
            .await
        {
            tracing::error!(incident_id = %incident_id, error = %e, "failed to record escalation");
        }
    }

    /// Writes the escalation record for a committed `session_failed`
    /// transition. Keyed off `TransitionApplied`, which the incident log
    /// publishes exactly once per commit, so an agent error that lost a
    /// race with a duty-officer escalate writes nothing here.
    async fn record_agent_failure(&self, incident_id: IncidentId) {
        if let Err(e) = self
            .escalations
            .append(&EscalationRecord {
                incident_id,
                escalated_at: self.clock.now(),
                reason: EscalationReason::AgentFailure,
                summary: "agent session failed during investigation".to_string(),
            })
            .await
        {
            tracing::error!(incident_id = %incident_id, error = %e, "failed to record escalation");
        }
    }
}
