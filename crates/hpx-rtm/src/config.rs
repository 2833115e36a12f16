//! Real-time connection configuration.

use std::time::Duration;

use crate::message::MAX_MESSAGE_TEXT_LENGTH;

/// Configuration for a managed real-time connection.
#[derive(Clone, Debug)]
pub struct RtmConfig {
    // Liveness
    /// Interval between liveness probes.
    pub ping_interval: Duration,
    /// How long a probe may stay unanswered before the connection is
    /// declared dead.
    pub probe_timeout: Duration,

    // Connection
    /// Timeout for dialing the endpoint.
    pub connect_timeout: Duration,
    /// Whether `connect` waits for the protocol `hello` before returning.
    pub wait_for_hello: bool,
    /// Maximum time to wait for `hello`.
    pub hello_timeout: Duration,
    /// Upper bound on the best-effort close handshake during teardown.
    pub close_timeout: Duration,

    // Channels
    /// Capacity of the inbound event channel.
    pub incoming_capacity: usize,
    /// Capacity of the outbound message queue.
    pub outgoing_capacity: usize,
    /// Capacity of the writer's priority channel (probes, pongs).
    pub control_capacity: usize,

    // Limits
    /// Maximum outgoing text length in characters.
    pub max_message_text_len: usize,
    /// Maximum inbound frame size in bytes; larger frames are dropped.
    pub max_frame_size: usize,
}

impl Default for RtmConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            wait_for_hello: true,
            hello_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(1),
            incoming_capacity: 50,
            outgoing_capacity: 20,
            control_capacity: 16,
            max_message_text_len: MAX_MESSAGE_TEXT_LENGTH,
            max_frame_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl RtmConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probe interval.
    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the liveness window.
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the dial timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set whether `connect` waits for `hello`.
    #[must_use]
    pub fn wait_for_hello(mut self, wait: bool) -> Self {
        self.wait_for_hello = wait;
        self
    }

    /// Set the `hello` timeout.
    #[must_use]
    pub fn hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    /// Set the close handshake bound.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the inbound event channel capacity.
    #[must_use]
    pub fn incoming_capacity(mut self, capacity: usize) -> Self {
        self.incoming_capacity = capacity;
        self
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub fn outgoing_capacity(mut self, capacity: usize) -> Self {
        self.outgoing_capacity = capacity;
        self
    }

    /// Set the maximum outgoing text length.
    #[must_use]
    pub fn max_message_text_len(mut self, max: usize) -> Self {
        self.max_message_text_len = max;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.ping_interval.is_zero() {
            return Err("Ping interval must be > 0".to_string());
        }
        if self.probe_timeout.is_zero() {
            return Err("Probe timeout must be > 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.wait_for_hello && self.hello_timeout.is_zero() {
            return Err("Hello timeout must be > 0".to_string());
        }
        if self.incoming_capacity == 0 {
            return Err("Incoming channel capacity must be > 0".to_string());
        }
        if self.outgoing_capacity == 0 {
            return Err("Outgoing queue capacity must be > 0".to_string());
        }
        if self.control_capacity == 0 {
            return Err("Control channel capacity must be > 0".to_string());
        }
        if self.max_message_text_len == 0 {
            return Err("Max message text length must be > 0".to_string());
        }
        Ok(())
    }
}
