use std::fmt;
use std::time::Duration;

/// Lifecycle of the client's single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and no attempt in progress.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, identity handshake in flight.
    Authenticating,
    /// Handshake accepted, re-sending SUBSCRIBE for every known topic.
    Resubscribing,
    /// Requests and publishes flow.
    Ready,
    /// Shutting down; no further retries.
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Resubscribing => "resubscribing",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by `connect` once the first session is Ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    /// Connection id assigned by the broker in the handshake reply.
    pub connection_id: Option<String>,
}

/// Exponential reconnect delay with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter: Duration,
    /// Consecutive failed attempts tolerated; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
            max_attempts: None,
        }
    }
}

impl Backoff {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if scaled.is_finite() {
            Duration::try_from_secs_f64(scaled.min(self.max.as_secs_f64())).unwrap_or(self.max)
        } else {
            self.max
        };
        capped + self.jitter_sample()
    }

    /// Whether another attempt may follow `failures` consecutive failures.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }

    fn jitter_sample(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::random_range(0..=jitter_ms))
    }
}
