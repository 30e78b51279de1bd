use std::time::Duration;

use sitelens_core::WireFormat;

/// Default destination queue of the classification worker.
pub const DEFAULT_REQUEST_QUEUE: &str = "url_queue";

/// Configuration for the classification service.
///
/// Controls the request destination, call timeouts, wire format, hub
/// buffering and background task intervals.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Queue the classification worker consumes requests from.
    pub request_queue: String,
    /// Per-call reply timeout.
    pub call_timeout: Duration,
    /// Encoding of published requests.
    pub wire_format: WireFormat,
    /// Buffered events per live subscriber before new events are dropped.
    pub subscriber_capacity: usize,
    /// Interval between sweeps for expired pending calls.
    pub sweep_interval: Duration,
    /// How long shutdown waits for the dispatcher before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_queue: DEFAULT_REQUEST_QUEUE.to_string(),
            call_timeout: Duration::from_secs(5),
            wire_format: WireFormat::Json,
            subscriber_capacity: 64,
            sweep_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
