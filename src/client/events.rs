use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::utils::error::{DisconnectReason, SubscriptionError};

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected {
        connection_id: Option<String>,
    },
    Disconnected {
        reason: DisconnectReason,
        will_retry: bool,
    },
    SubscriptionFailed {
        topic: String,
        reason: SubscriptionError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub event: ClientEvent,
    pub at: DateTime<Utc>,
}

/// Fans events out to live receivers and keeps the most recent ones so a
/// late observer can catch up.
pub struct EventLog {
    sender: broadcast::Sender<ClientEvent>,
    records: Mutex<VecDeque<EventRecord>>,
    limit: usize,
}

impl EventLog {
    pub fn new(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(limit.max(1));
        Self {
            sender,
            records: Mutex::new(VecDeque::with_capacity(limit)),
            limit,
        }
    }

    pub fn emit(&self, event: ClientEvent) {
        match &event {
            ClientEvent::Connected { connection_id } => {
                info!("Connected (connection id {:?})", connection_id)
            }
            ClientEvent::Disconnected { reason, will_retry } => {
                warn!("Disconnected: {} (will retry: {})", reason, will_retry)
            }
            ClientEvent::SubscriptionFailed { topic, reason } => {
                warn!("Subscription to {} failed: {}", topic, reason)
            }
        }

        {
            let mut records = self.records.lock();
            while self.limit > 0 && records.len() >= self.limit {
                records.pop_front();
            }
            if self.limit > 0 {
                records.push_back(EventRecord {
                    event: event.clone(),
                    at: Utc::now(),
                });
            }
        }

        // no receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Recorded events, oldest first. `within` limits them to the given
    /// window before now; `None` returns every record still held.
    pub fn recent(&self, within: Option<Duration>) -> Vec<EventRecord> {
        let cutoff = within.map(|window| Utc::now() - window);
        self.records
            .lock()
            .iter()
            .filter(|record| cutoff.is_none_or(|cutoff| record.at >= cutoff))
            .cloned()
            .collect()
    }
}
