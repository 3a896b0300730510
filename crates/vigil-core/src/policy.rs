use chrono::Duration;
use serde::{Deserialize, Serialize};
use vigil_schema::Severity;

/// How long an incident may sit in pending_approval before the sweep
/// escalates it, per severity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscalationPolicy {
    #[serde(default = "default_critical_secs")]
    pub critical_secs: u64,
    #[serde(default = "default_high_secs")]
    pub high_secs: u64,
    #[serde(default = "default_medium_secs")]
    pub medium_secs: u64,
    #[serde(default = "default_low_secs")]
    pub low_secs: u64,
}

fn default_critical_secs() -> u64 {
    5 * 60
}

fn default_high_secs() -> u64 {
    30 * 60
}

fn default_medium_secs() -> u64 {
    4 * 60 * 60
}

fn default_low_secs() -> u64 {
    24 * 60 * 60
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            critical_secs: default_critical_secs(),
            high_secs: default_high_secs(),
            medium_secs: default_medium_secs(),
            low_secs: default_low_secs(),
        }
    }
}

impl EscalationPolicy {
    pub fn timeout(&self, severity: Severity) -> Duration {
        let secs = match severity {
            Severity::Critical => self.critical_secs,
            Severity::High => self.high_secs,
            Severity::Medium => self.medium_secs,
            Severity::Low => self.low_secs,
        };
        Duration::seconds(secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_match_severity_ladder() {
        let policy = EscalationPolicy::default();
        assert_eq!(policy.timeout(Severity::Critical), Duration::minutes(5));
        assert_eq!(policy.timeout(Severity::High), Duration::minutes(30));
        assert_eq!(policy.timeout(Severity::Medium), Duration::hours(4));
        assert_eq!(policy.timeout(Severity::Low), Duration::hours(24));
    }
}
