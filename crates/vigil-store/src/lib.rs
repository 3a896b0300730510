//! File-backed persistence for incidents, session logs, and escalation
//! records. One JSON snapshot for incident state, append-only JSONL logs
//! for everything observed over time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use vigil_schema::{EscalationRecord, Incident, IncidentId, SessionId, SessionLogEntry};

/// Snapshot store for incident records. Rewritten whole on every committed
/// transition; loaded once at startup so deadlines survive restarts.
pub struct IncidentStore {
    path: PathBuf,
}

impl IncidentStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("incidents.json"),
        }
    }

    pub fn load(&self) -> Result<HashMap<IncidentId, Incident>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn persist(&self, incidents: &HashMap<IncidentId, Incident>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(incidents)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

/// Append-only per-session event log, one JSON line per entry.
pub struct SessionLogStore {
    dir: PathBuf,
}

impl SessionLogStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("sessions"),
        }
    }

    pub async fn append(&self, session_id: SessionId, entry: &SessionLogEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.jsonl", session_id));
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn read(&self, session_id: SessionId) -> Result<Vec<SessionLogEntry>> {
        let path = self.dir.join(format!("{}.jsonl", session_id));
        if !path.exists() {
            return Ok(vec![]);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let entries: Vec<SessionLogEntry> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        Ok(entries)
    }
}

/// Append-only escalation history.
pub struct EscalationStore {
    path: PathBuf,
}

impl EscalationStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("escalations.jsonl"),
        }
    }

    pub async fn append(&self, record: &EscalationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<EscalationRecord>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let records: Vec<EscalationRecord> = content
            .lines()
            .rev()
            .take(limit)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        Ok(records)
    }

    pub async fn for_incident(&self, incident_id: IncidentId) -> Result<Vec<EscalationRecord>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let records: Vec<EscalationRecord> = content
            .lines()
            .filter_map(|line| serde_json::from_str::<EscalationRecord>(line).ok())
            .filter(|r| r.incident_id == incident_id)
            .collect();
        Ok(records)
    }
}
