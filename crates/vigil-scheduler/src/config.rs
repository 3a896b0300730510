use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vigil_core::EscalationPolicy;

/// Escalation sweep settings, loadable from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Sweep cadence in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Severity → pending-approval timeout table.
    #[serde(default)]
    pub policy: EscalationPolicy,
}

fn default_interval_secs() -> u64 {
    10
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            policy: EscalationPolicy::default(),
        }
    }
}

impl SweeperConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let cfg: SweeperConfig = serde_yaml::from_str("interval_secs: 3\n").unwrap();
        assert_eq!(cfg.interval_secs, 3);
        assert_eq!(cfg.policy, EscalationPolicy::default());
    }

    #[test]
    fn full_yaml_overrides_policy() {
        let cfg: SweeperConfig = serde_yaml::from_str(
            "interval_secs: 5\npolicy:\n  critical_secs: 60\n  high_secs: 120\n",
        )
        .unwrap();
        assert_eq!(cfg.policy.critical_secs, 60);
        assert_eq!(cfg.policy.high_secs, 120);
        // Unspecified severities keep their defaults.
        assert_eq!(cfg.policy.low_secs, EscalationPolicy::default().low_secs);
    }
}
