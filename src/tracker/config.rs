use std::time::Duration;

/// Timeouts and retry policy for [`UdpTracker`](crate::tracker::UdpTracker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// How long the first attempt waits for each response.
    pub timeout: Duration,
    /// Total attempts per scrape, including the first.
    pub max_attempts: u32,
    /// Each retry waits this many times longer than the previous attempt.
    pub backoff_factor: u32,
    /// How long a connection id handed out by the tracker stays usable.
    pub connection_id_ttl: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            max_attempts: 4,
            backoff_factor: 2,
            connection_id_ttl: Duration::from_secs(60),
        }
    }
}

impl TrackerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff_factor(mut self, factor: u32) -> Self {
        self.backoff_factor = factor.max(1);
        self
    }

    pub fn with_connection_id_ttl(mut self, ttl: Duration) -> Self {
        self.connection_id_ttl = ttl;
        self
    }

    /// Response timeout for the given attempt, counting from 1.
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.backoff_factor.saturating_pow(exponent);
        self.timeout.saturating_mul(factor)
    }
}
