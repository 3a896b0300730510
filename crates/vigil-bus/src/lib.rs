use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, RwLock};
use vigil_schema::BusMessage;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Topic {
    IncidentCreated,
    SessionStarted,
    SessionEnded,
    SolutionProposed,
    EscalationDue,
    TransitionApplied,
}

impl Topic {
    pub fn from_message(msg: &BusMessage) -> Self {
        match msg {
            BusMessage::IncidentCreated { .. } => Topic::IncidentCreated,
            BusMessage::SessionStarted { .. } => Topic::SessionStarted,
            BusMessage::SessionEnded { .. } => Topic::SessionEnded,
            BusMessage::SolutionProposed { .. } => Topic::SolutionProposed,
            BusMessage::EscalationDue { .. } => Topic::EscalationDue,
            BusMessage::TransitionApplied { .. } => Topic::TransitionApplied,
        }
    }
}

type Subscriber = mpsc::Sender<BusMessage>;

/// In-process topic bus. Publishing never blocks: messages are try_sent,
/// so a full subscriber channel drops rather than stalling the publisher.
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry(topic).or_default().push(tx);
        rx
    }

    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        let topic = Topic::from_message(&msg);
        let subs = self.subscribers.read().await;
        if let Some(subscribers) = subs.get(&topic) {
            for tx in subscribers {
                let _ = tx.try_send(msg.clone());
            }
        }
        Ok(())
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BusPublisher {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>,
}

impl BusPublisher {
    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        let topic = Topic::from_message(&msg);
        let subs = self.subscribers.read().await;
        if let Some(subscribers) = subs.get(&topic) {
            for tx in subscribers {
                let _ = tx.try_send(msg.clone());
            }
        }
        Ok(())
    }
}
