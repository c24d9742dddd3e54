//! Controller configuration

use std::time::Duration;

/// Timing and behaviour knobs of a [`Stick`](crate::Stick)
#[derive(Debug, Clone)]
pub struct StickConfig {
    /// How long a transmitted request may wait for its response
    pub message_timeout: Duration,
    /// Resends allowed after the first transmission
    pub max_retries: u8,
    /// How long the sender waits for the stick to accept a request
    pub link_ack_timeout: Duration,
    /// Pause after every write before the next request may go out
    pub send_pacing: Duration,
    /// Period of the sweeper that times out unanswered requests
    pub sweep_interval: Duration,
    pub watchdog_period: Duration,
    pub watchdog_start_delay: Duration,
    /// Coordinator discovery attempts made every watchdog period before backing off
    pub coordinator_fast_retries: u32,
    /// Automatically accept nodes asking to join
    pub accept_join_requests: bool,
}

impl Default for StickConfig {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_secs(15),
            max_retries: 2,
            link_ack_timeout: Duration::from_secs(1),
            send_pacing: Duration::from_millis(150),
            sweep_interval: Duration::from_secs(1),
            watchdog_period: Duration::from_secs(60),
            watchdog_start_delay: Duration::from_secs(5),
            coordinator_fast_retries: 60,
            accept_join_requests: false,
        }
    }
}

impl StickConfig {
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_link_ack_timeout(mut self, timeout: Duration) -> Self {
        self.link_ack_timeout = timeout;
        self
    }

    pub fn with_send_pacing(mut self, pacing: Duration) -> Self {
        self.send_pacing = pacing;
        self
    }

    pub fn with_watchdog_period(mut self, period: Duration) -> Self {
        self.watchdog_period = period;
        self
    }

    pub fn with_accept_join_requests(mut self, accept: bool) -> Self {
        self.accept_join_requests = accept;
        self
    }

    /// Upper bound on a whole mesh discovery of `nodes` nodes
    pub fn discovery_timeout(&self, nodes: usize) -> Duration {
        Duration::from_secs(10 + 2 * nodes as u64) + self.message_timeout * self.max_retries as u32
    }
}
