//! The opaque agent seam. The orchestrator supervises an investigation
//! through this capability interface only: start it, observe what it
//! appends through the session handle, cancel it. What reasons inside is
//! not this crate's business.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vigil_graph::{EdgeRelationship, NodeKind, SharedGraph, SharedRegistry};
use vigil_schema::{Incident, Solution};

use crate::session::SessionHandle;

/// Everything an agent gets to look at when investigating an incident.
pub struct InvestigationContext {
    pub incident: Incident,
    pub graph: SharedGraph,
    pub registry: SharedRegistry,
}

#[async_trait]
pub trait InvestigationAgent: Send + Sync {
    /// Runs one investigation to completion. Appends progress through
    /// `session` and proposes at most one solution. Should watch `cancel`
    /// during long waits; the supervisor also aborts the task on cancel.
    /// Errors are caught at the task boundary and become `session_failed`.
    async fn investigate(
        &self,
        ctx: InvestigationContext,
        session: SessionHandle,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Replays a fixed script: thoughts, then messages, then (optionally) a
/// proposal. Default agent for tests and wiring checks.
#[derive(Default)]
pub struct ScriptedAgent {
    pub thoughts: Vec<String>,
    pub messages: Vec<(String, String)>,
    pub solution: Option<Solution>,
}

impl ScriptedAgent {
    pub fn proposing(solution: Solution) -> Self {
        Self {
            thoughts: vec!["correlating symptoms against known issues".to_string()],
            messages: vec![],
            solution: Some(solution),
        }
    }
}

#[async_trait]
impl InvestigationAgent for ScriptedAgent {
    async fn investigate(
        &self,
        ctx: InvestigationContext,
        session: SessionHandle,
        _cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        for thought in &self.thoughts {
            session.append_thought(thought.clone()).await?;
        }
        for (role, text) in &self.messages {
            session.append_message(role.clone(), text.clone()).await?;
        }
        if let Some(solution) = &self.solution {
            let _ = ctx.graph.search(&ctx.incident.service_id.0).await;
            session.propose_solution(solution.clone()).await?;
        }
        Ok(())
    }
}

/// Looks the failing service up in the knowledge graph and proposes the
/// best-weighted known resolution, if one exists. When nothing matches,
/// the session completes without a proposal and the incident waits for
/// a duty officer.
pub struct GraphAgent;

#[async_trait]
impl InvestigationAgent for GraphAgent {
    async fn investigate(
        &self,
        ctx: InvestigationContext,
        session: SessionHandle,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let service = &ctx.incident.service_id.0;
        session
            .append_thought(format!("searching known issues for {service}"))
            .await?;

        let mut best: Option<(f64, Solution)> = None;
        for hit in ctx.graph.search(service).await? {
            if cancel.is_cancelled() {
                return Ok(());
            }
            for (edge, node) in ctx.graph.related(&hit.id).await? {
                if node.kind != NodeKind::Resolution
                    || edge.relationship != EdgeRelationship::Resolves
                {
                    continue;
                }
                if best.as_ref().map(|(w, _)| edge.weight > *w).unwrap_or(true) {
                    let solution = Solution::new(
                        node.description.clone(),
                        edge.weight,
                        vec![hit.id.clone(), node.id.clone()],
                    );
                    best = Some((edge.weight, solution));
                }
            }
        }

        match best {
            Some((_, solution)) => {
                session
                    .append_message("planner", format!("matched a known issue for {service}"))
                    .await?;
                session.propose_solution(solution).await?;
            }
            None => {
                session
                    .append_thought("no known resolution, leaving for the duty officer")
                    .await?;
            }
        }
        Ok(())
    }
}

/// Parks until cancelled. Lets tests exercise stop() against a session
/// that never finishes on its own.
pub struct IdleAgent;

#[async_trait]
impl InvestigationAgent for IdleAgent {
    async fn investigate(
        &self,
        _ctx: InvestigationContext,
        _session: SessionHandle,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        cancel.cancelled().await;
        Ok(())
    }
}

/// Errors immediately, for exercising the agent-failure path.
pub struct FailingAgent;

#[async_trait]
impl InvestigationAgent for FailingAgent {
    async fn investigate(
        &self,
        _ctx: InvestigationContext,
        _session: SessionHandle,
        _cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        anyhow::bail!("reasoning backend unavailable")
    }
}
