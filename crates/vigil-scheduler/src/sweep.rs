//! Escalation watchdog. A supervised background task that, on a fixed
//! cadence, finds incidents stuck in pending approval past their deadline
//! and enqueues a timeout for each — it never applies the transition
//! itself, so a slow consumer can't stall the sweep.

use std::sync::Arc;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use vigil_bus::BusPublisher;
use vigil_core::{Clock, IncidentLog};
use vigil_schema::BusMessage;

pub struct EscalationSweeper {
    incidents: Arc<IncidentLog>,
    bus: BusPublisher,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl EscalationSweeper {
    pub fn new(
        incidents: Arc<IncidentLog>,
        bus: BusPublisher,
        clock: Arc<dyn Clock>,
        interval_secs: u64,
    ) -> Self {
        Self {
            incidents,
            bus,
            clock,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Runs until `shutdown` is cancelled. The first tick fires
    /// immediately, so deadlines missed while the process was down are
    /// picked up right after restart.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("escalation sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let fired = self.sweep().await;
                    if fired > 0 {
                        tracing::info!(fired, "escalation sweep enqueued timeouts");
                    }
                }
            }
        }
    }

    /// One pass over the incident log. Returns how many escalations were
    /// enqueued. Failures are per-incident; the pass always completes.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let due = self.incidents.past_deadline(now).await;
        let mut fired = 0;

        for incident in due {
            let Some(deadline) = incident.escalation_deadline else {
                continue;
            };
            match self
                .bus
                .publish(BusMessage::EscalationDue {
                    incident_id: incident.id,
                    deadline,
                })
                .await
            {
                Ok(()) => {
                    tracing::debug!(incident_id = %incident.id, %deadline, "escalation due");
                    fired += 1;
                }
                Err(e) => {
                    tracing::warn!(incident_id = %incident.id, error = %e, "failed to enqueue escalation");
                }
            }
        }

        fired
    }
}
