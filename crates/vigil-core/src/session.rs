//! Agent session supervision: exactly one active investigation per
//! incident, spawned as an independent tokio task with cooperative
//! cancellation, with an append-only message/thought record.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use vigil_bus::BusPublisher;
use vigil_graph::{SharedGraph, SharedRegistry};
use vigil_schema::{
    AgentMessage, AgentSession, AgentThought, BusMessage, Incident, IncidentEvent, IncidentId,
    SessionId, SessionLogEntry, SessionState, Solution, StopReason,
};
use vigil_store::SessionLogStore;

use crate::agent::{InvestigationAgent, InvestigationContext};
use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};
use crate::incident::IncidentLog;

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<SessionId, AgentSession>>>,
    tokens: Arc<RwLock<HashMap<SessionId, CancellationToken>>>,
    incidents: Arc<IncidentLog>,
    store: Arc<SessionLogStore>,
    bus: BusPublisher,
    clock: Arc<dyn Clock>,
    agent: Arc<dyn InvestigationAgent>,
    graph: SharedGraph,
    registry: SharedRegistry,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data_dir: &Path,
        incidents: Arc<IncidentLog>,
        bus: BusPublisher,
        clock: Arc<dyn Clock>,
        agent: Arc<dyn InvestigationAgent>,
        graph: SharedGraph,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            incidents,
            store: Arc::new(SessionLogStore::new(data_dir)),
            bus,
            clock,
            agent,
            graph,
            registry,
        }
    }

    /// Starts an investigation for the incident. Returns once the session
    /// exists and the agent task is spawned, never once it finishes.
    /// Fails with `SessionAlreadyActive` if the incident's slot is taken.
    pub async fn start_session(&self, incident_id: IncidentId) -> Result<SessionId> {
        let session_id = SessionId::new();
        self.incidents.claim_session_slot(incident_id, session_id).await?;

        let incident = match self
            .incidents
            .transition(incident_id, IncidentEvent::SessionStarted)
            .await
        {
            Ok(incident) => incident,
            Err(e) => {
                // Slot was claimed but the incident can't enter
                // investigation (e.g. already pending approval).
                self.incidents
                    .release_session_slot(incident_id, session_id)
                    .await?;
                return Err(e);
            }
        };

        let now = self.clock.now();
        let session = AgentSession {
            id: session_id,
            incident_id,
            state: SessionState::Running,
            messages: vec![],
            thoughts: vec![],
            proposed_solution: None,
            started_at: now,
            ended_at: None,
        };
        self.sessions.write().await.insert(session_id, session);
        self.store
            .append(
                session_id,
                &SessionLogEntry::StateChanged {
                    state: SessionState::Running,
                    at: now,
                },
            )
            .await?;

        let token = CancellationToken::new();
        self.tokens.write().await.insert(session_id, token.clone());

        let mgr = self.clone();
        let agent = self.agent.clone();
        let ctx = InvestigationContext {
            incident,
            graph: self.graph.clone(),
            registry: self.registry.clone(),
        };
        let handle = SessionHandle {
            manager: mgr.clone(),
            session_id,
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(%session_id, "agent task cancelled");
                }
                result = agent.investigate(ctx, handle, token.clone()) => match result {
                    Ok(()) => mgr.finish(session_id).await,
                    Err(e) => {
                        tracing::warn!(%session_id, error = %e, "agent task failed");
                        mgr.fail(session_id).await;
                    }
                }
            }
        });

        tracing::info!(%session_id, incident_id = %incident_id, "agent session started");
        let _ = self
            .bus
            .publish(BusMessage::SessionStarted {
                session_id,
                incident_id,
            })
            .await;

        Ok(session_id)
    }

    pub async fn get(&self, session_id: SessionId) -> Option<AgentSession> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn for_incident(&self, incident_id: IncidentId) -> Vec<AgentSession> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.incident_id == incident_id)
            .cloned()
            .collect()
    }

    pub async fn append_message(
        &self,
        session_id: SessionId,
        role: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<()> {
        let message = AgentMessage {
            role: role.into(),
            text: text.into(),
            at: self.clock.now(),
        };
        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or(OrchestratorError::UnknownSession(session_id))?;
            if session.state != SessionState::Running {
                return Err(OrchestratorError::SessionNotRunning(session_id));
            }
            session.messages.push(message.clone());
        }
        self.store
            .append(session_id, &SessionLogEntry::Message { message })
            .await?;
        Ok(())
    }

    pub async fn append_thought(
        &self,
        session_id: SessionId,
        text: impl Into<String>,
    ) -> Result<()> {
        let thought = AgentThought {
            text: text.into(),
            at: self.clock.now(),
        };
        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or(OrchestratorError::UnknownSession(session_id))?;
            if session.state != SessionState::Running {
                return Err(OrchestratorError::SessionNotRunning(session_id));
            }
            session.thoughts.push(thought.clone());
        }
        self.store
            .append(session_id, &SessionLogEntry::Thought { thought })
            .await?;
        Ok(())
    }

    /// Records the session's proposal (at most one per session) and drives
    /// the incident to pending approval.
    pub async fn propose_solution(
        &self,
        session_id: SessionId,
        solution: Solution,
    ) -> Result<Incident> {
        let now = self.clock.now();
        let incident_id = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or(OrchestratorError::UnknownSession(session_id))?;
            if session.state != SessionState::Running {
                return Err(OrchestratorError::SessionNotRunning(session_id));
            }
            if session.proposed_solution.is_some() {
                return Err(OrchestratorError::DuplicateSolution);
            }
            session.proposed_solution = Some(solution.clone());
            session.state = SessionState::AwaitingApproval;
            session.incident_id
        };
        self.store
            .append(
                session_id,
                &SessionLogEntry::StateChanged {
                    state: SessionState::AwaitingApproval,
                    at: now,
                },
            )
            .await?;

        let attached = match self
            .incidents
            .transition(incident_id, IncidentEvent::SolutionReady)
            .await
        {
            Ok(_) => self.incidents.attach_solution(incident_id, solution.clone()).await,
            Err(e) => Err(e),
        };
        let incident = match attached {
            Ok(incident) => incident,
            Err(e) => {
                // The incident moved on (escalated or decided) before the
                // proposal landed; put the session back the way it was.
                {
                    let mut sessions = self.sessions.write().await;
                    if let Some(session) = sessions.get_mut(&session_id) {
                        if session.state == SessionState::AwaitingApproval {
                            session.state = SessionState::Running;
                            session.proposed_solution = None;
                        }
                    }
                }
                if let Err(log_err) = self
                    .store
                    .append(
                        session_id,
                        &SessionLogEntry::StateChanged {
                            state: SessionState::Running,
                            at: self.clock.now(),
                        },
                    )
                    .await
                {
                    tracing::warn!(%session_id, error = %log_err, "failed to log session state change");
                }
                return Err(e);
            }
        };

        let _ = self
            .bus
            .publish(BusMessage::SolutionProposed {
                session_id,
                incident_id,
                confidence: solution.confidence,
            })
            .await;

        Ok(incident)
    }

    /// Cooperative cancellation. Safe to race with in-flight appends from
    /// the same session: once stopped, appends fail with
    /// `SessionNotRunning`. A second stop fails the same way.
    pub async fn stop(&self, session_id: SessionId, reason: StopReason) -> Result<()> {
        let target = match reason {
            StopReason::AgentError => SessionState::Failed,
            StopReason::Cancelled | StopReason::Superseded => SessionState::Stopped,
        };
        let now = self.clock.now();
        let incident_id = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or(OrchestratorError::UnknownSession(session_id))?;
            if session.state.is_terminal() {
                return Err(OrchestratorError::SessionNotRunning(session_id));
            }
            session.state = target;
            session.ended_at = Some(now);
            session.incident_id
        };

        if let Some(token) = self.tokens.write().await.remove(&session_id) {
            token.cancel();
        }
        self.store
            .append(
                session_id,
                &SessionLogEntry::StateChanged { state: target, at: now },
            )
            .await?;
        self.incidents
            .release_session_slot(incident_id, session_id)
            .await?;

        if reason == StopReason::AgentError {
            if let Err(e) = self
                .incidents
                .transition(incident_id, IncidentEvent::SessionFailed)
                .await
            {
                tracing::warn!(incident_id = %incident_id, error = %e, "session_failed not applied");
            }
        }

        tracing::info!(%session_id, ?reason, "agent session stopped");
        let _ = self
            .bus
            .publish(BusMessage::SessionEnded {
                session_id,
                incident_id,
                state: target,
            })
            .await;

        Ok(())
    }

    /// Agent task returned cleanly.
    async fn finish(&self, session_id: SessionId) {
        if let Some(incident_id) = self.finalize(session_id, SessionState::Completed).await {
            let _ = self
                .bus
                .publish(BusMessage::SessionEnded {
                    session_id,
                    incident_id,
                    state: SessionState::Completed,
                })
                .await;
        }
    }

    /// Agent task errored. The fault stays at the session boundary; the
    /// incident only ever sees a `session_failed` event.
    async fn fail(&self, session_id: SessionId) {
        if let Some(incident_id) = self.finalize(session_id, SessionState::Failed).await {
            if let Err(e) = self
                .incidents
                .transition(incident_id, IncidentEvent::SessionFailed)
                .await
            {
                tracing::warn!(incident_id = %incident_id, error = %e, "session_failed not applied");
            }
            let _ = self
                .bus
                .publish(BusMessage::SessionEnded {
                    session_id,
                    incident_id,
                    state: SessionState::Failed,
                })
                .await;
        }
    }

    /// Marks the session terminal unless a concurrent stop won; returns
    /// the incident id when this call did the finalizing.
    async fn finalize(&self, session_id: SessionId, target: SessionState) -> Option<IncidentId> {
        let now = self.clock.now();
        let incident_id = {
            let mut sessions = self.sessions.write().await;
            let session = sessions.get_mut(&session_id)?;
            if session.state.is_terminal() {
                return None;
            }
            session.state = target;
            session.ended_at = Some(now);
            session.incident_id
        };

        self.tokens.write().await.remove(&session_id);
        if let Err(e) = self
            .store
            .append(
                session_id,
                &SessionLogEntry::StateChanged { state: target, at: now },
            )
            .await
        {
            tracing::warn!(%session_id, error = %e, "failed to log session state change");
        }
        if let Err(e) = self
            .incidents
            .release_session_slot(incident_id, session_id)
            .await
        {
            tracing::warn!(%session_id, error = %e, "failed to release session slot");
        }
        Some(incident_id)
    }
}

/// Capability handed to the agent task: append-only access to its own
/// session plus the one-shot proposal.
#[derive(Clone)]
pub struct SessionHandle {
    manager: SessionManager,
    session_id: SessionId,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub async fn append_message(
        &self,
        role: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<()> {
        self.manager.append_message(self.session_id, role, text).await
    }

    pub async fn append_thought(&self, text: impl Into<String>) -> Result<()> {
        self.manager.append_thought(self.session_id, text).await
    }

    pub async fn propose_solution(&self, solution: Solution) -> Result<Incident> {
        self.manager.propose_solution(self.session_id, solution).await
    }
}
