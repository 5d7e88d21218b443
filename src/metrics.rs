use std::sync::atomic::{AtomicUsize, Ordering};

lazy_static! {
    pub static ref METRICS: InternalMetrics = InternalMetrics::default();
}

/// Process-wide counters of the session layer.
#[derive(Default)]
pub struct InternalMetrics {
    /// The number of sessions currently held by registries.
    pub active_sessions: AtomicUsize,
    /// The number of handshakes that derived keys and authenticated a peer.
    pub handshakes: AtomicUsize,
    /// The number of packets dropped as bad.
    pub bad_packets: AtomicUsize,
    /// The number of requests that expired unanswered.
    pub requests_timed_out: AtomicUsize,
    /// The number of packets handed to the transport.
    pub packets_sent: AtomicUsize,
    /// The number of packets pushed into inbound pipelines.
    pub packets_recv: AtomicUsize,
}

impl InternalMetrics {
    /// Increments the counter using the `Relaxed` memory ordering.
    pub fn increment(&self, field: &AtomicUsize) {
        field.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the counter, saturating at zero.
    pub fn decrement(&self, field: &AtomicUsize) {
        let _ = field.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
            Some(value.saturating_sub(1))
        });
    }
}

#[derive(Clone, Debug)]
/// The publicly accessible metrics.
pub struct Metrics {
    pub active_sessions: usize,
    pub handshakes: usize,
    pub bad_packets: usize,
    pub requests_timed_out: usize,
    pub packets_sent: usize,
    pub packets_recv: usize,
}

impl From<&METRICS> for Metrics {
    fn from(internal_metrics: &METRICS) -> Self {
        Metrics {
            active_sessions: internal_metrics.active_sessions.load(Ordering::Relaxed),
            handshakes: internal_metrics.handshakes.load(Ordering::Relaxed),
            bad_packets: internal_metrics.bad_packets.load(Ordering::Relaxed),
            requests_timed_out: internal_metrics.requests_timed_out.load(Ordering::Relaxed),
            packets_sent: internal_metrics.packets_sent.load(Ordering::Relaxed),
            packets_recv: internal_metrics.packets_recv.load(Ordering::Relaxed),
        }
    }
}
