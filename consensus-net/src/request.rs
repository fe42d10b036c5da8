//! Connection requests and retry back-off.

use std::{net::SocketAddr, time::Duration};

/// Attempts granted to a freshly scheduled request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A pending attempt to open an outbound session to `addr`.
///
/// A request is created by the registry, consumed by a worker and possibly
/// re-created through [`ConnectionRequest::reschedule`] until its attempts
/// run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub addr: SocketAddr,
    /// Attempts already consumed, including a running one once recorded.
    pub attempts_used: u32,
    pub max_attempts: u32,
}

impl ConnectionRequest {
    pub fn new(addr: SocketAddr, max_attempts: u32) -> Self {
        Self {
            addr,
            attempts_used: 0,
            max_attempts,
        }
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_used)
    }

    /// Consume one attempt. Called by the worker right before connecting.
    pub fn record_attempt(&mut self) {
        self.attempts_used = self.attempts_used.saturating_add(1);
    }

    /// Whether another attempt may follow the one just recorded.
    pub fn can_reschedule(&self) -> bool {
        self.remaining_attempts() > 0
    }

    /// The follow-up request, or `None` when every attempt is used up.
    pub fn reschedule(self) -> Option<Self> {
        self.can_reschedule().then_some(self)
    }
}

/// Exponential back-off between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay after `attempts_used` consumed attempts:
    /// `min(base * 2^(attempts_used - 1), max)`.
    pub fn delay(&self, attempts_used: u32) -> Duration {
        let exponent = attempts_used.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}
