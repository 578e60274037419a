use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Ping/pong liveness tracking for one session.
///
/// Inactive until `start` is called once the session is Ready. At most one
/// ping is outstanding; a new one goes out `interval` after the previous
/// one, and the session is dead if a pong does not arrive within `timeout`.
#[derive(Debug)]
pub struct Keepalive {
    interval: Duration,
    timeout: Duration,
    next_ping: Option<Instant>,
    outstanding: Option<Outstanding>,
    sequence: u64,
}

#[derive(Debug)]
struct Outstanding {
    nonce: String,
    deadline: Instant,
}

/// What the writer should do when it wakes up.
#[derive(Debug, PartialEq, Eq)]
pub enum KeepaliveAction {
    Idle,
    Ping(String),
    Overdue,
}

impl Keepalive {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            next_ping: None,
            outstanding: None,
            sequence: 0,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.next_ping = Some(now + self.interval);
    }

    pub fn is_active(&self) -> bool {
        self.next_ping.is_some()
    }

    /// When the writer has to look at the keepalive again.
    pub fn next_wake(&self) -> Option<Instant> {
        match &self.outstanding {
            Some(outstanding) => Some(outstanding.deadline),
            None => self.next_ping,
        }
    }

    pub fn poll(&mut self, now: Instant) -> KeepaliveAction {
        if let Some(outstanding) = &self.outstanding {
            return if now >= outstanding.deadline {
                KeepaliveAction::Overdue
            } else {
                KeepaliveAction::Idle
            };
        }

        match self.next_ping {
            Some(at) if now >= at => {
                self.sequence += 1;
                let nonce = self.sequence.to_string();
                self.outstanding = Some(Outstanding {
                    nonce: nonce.clone(),
                    deadline: now + self.timeout,
                });
                self.next_ping = Some(now + self.interval);
                KeepaliveAction::Ping(nonce)
            }
            _ => KeepaliveAction::Idle,
        }
    }

    /// Record a pong. A pong without a nonce answers whatever is outstanding.
    pub fn on_pong(&mut self, nonce: Option<&str>) -> bool {
        let matches = match (&self.outstanding, nonce) {
            (Some(outstanding), Some(nonce)) => outstanding.nonce == nonce,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            self.outstanding = None;
        } else {
            debug!("Ignoring pong with nonce {:?}", nonce);
        }
        matches
    }
}
