//! Seams for the two external collaborators: the knowledge graph of known
//! issues/remediations and the service registry. The orchestration core
//! only sees these traits; node ids stay opaque.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use vigil_schema::{NodeId, ServiceId};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Module,
    Issue,
    Resolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRelationship {
    Causes,
    Resolves,
    RelatedTo,
    DependsOn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub relationship: EdgeRelationship,
    pub weight: f64,
}

#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    async fn node(&self, id: &NodeId) -> Result<Option<KnowledgeNode>>;
    async fn search(&self, query: &str) -> Result<Vec<KnowledgeNode>>;
    async fn related(&self, id: &NodeId) -> Result<Vec<(KnowledgeEdge, KnowledgeNode)>>;
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_id: ServiceId,
    pub status: ServiceStatus,
    pub last_check: DateTime<Utc>,
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn status(&self, id: &ServiceId) -> Result<Option<ServiceHealth>>;
    async fn set_status(&self, id: &ServiceId, status: ServiceStatus) -> Result<()>;
}

/// In-memory graph, enough for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryGraph {
    nodes: RwLock<HashMap<NodeId, KnowledgeNode>>,
    edges: RwLock<Vec<KnowledgeEdge>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_node(&self, node: KnowledgeNode) {
        self.nodes.write().await.insert(node.id.clone(), node);
    }

    pub async fn insert_edge(&self, edge: KnowledgeEdge) {
        self.edges.write().await.push(edge);
    }
}

#[async_trait]
impl KnowledgeGraph for InMemoryGraph {
    async fn node(&self, id: &NodeId) -> Result<Option<KnowledgeNode>> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn search(&self, query: &str) -> Result<Vec<KnowledgeNode>> {
        let needle = query.to_lowercase();
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| {
                n.name.to_lowercase().contains(&needle)
                    || n.description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn related(&self, id: &NodeId) -> Result<Vec<(KnowledgeEdge, KnowledgeNode)>> {
        let nodes = self.nodes.read().await;
        let edges = self.edges.read().await;
        let mut out = Vec::new();
        for edge in edges.iter() {
            let other = if &edge.source == id {
                &edge.target
            } else if &edge.target == id {
                &edge.source
            } else {
                continue;
            };
            if let Some(node) = nodes.get(other) {
                out.push((edge.clone(), node.clone()));
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct InMemoryRegistry {
    services: RwLock<HashMap<ServiceId, ServiceHealth>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn status(&self, id: &ServiceId) -> Result<Option<ServiceHealth>> {
        Ok(self.services.read().await.get(id).cloned())
    }

    async fn set_status(&self, id: &ServiceId, status: ServiceStatus) -> Result<()> {
        self.services.write().await.insert(
            id.clone(),
            ServiceHealth {
                service_id: id.clone(),
                status,
                last_check: Utc::now(),
            },
        );
        Ok(())
    }
}

pub type SharedGraph = Arc<dyn KnowledgeGraph>;
pub type SharedRegistry = Arc<dyn ServiceRegistry>;
