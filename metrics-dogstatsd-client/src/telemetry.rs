use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use crate::sample::{MetricKind, Sample};

/// Client telemetry.
///
/// `Telemetry` tracks what the client has accepted, aggregated, sent and dropped. All counters are monotonic and are
/// updated with relaxed atomic operations, so they can be bumped from any thread without coordination. A consistent
/// view is obtained through [`Telemetry::snapshot`].
#[derive(Default)]
pub(crate) struct Telemetry {
    gauge_points: AtomicU64,
    count_points: AtomicU64,
    set_points: AtomicU64,
    histogram_points: AtomicU64,
    distribution_points: AtomicU64,
    timing_points: AtomicU64,
    events: AtomicU64,
    service_checks: AtomicU64,
    gauge_contexts: AtomicU64,
    count_contexts: AtomicU64,
    set_contexts: AtomicU64,
    histogram_contexts: AtomicU64,
    distribution_contexts: AtomicU64,
    timing_contexts: AtomicU64,
    payloads_sent: AtomicU64,
    bytes_sent: AtomicU64,
    payloads_dropped_queue: AtomicU64,
    bytes_dropped_queue: AtomicU64,
    payloads_dropped_writer: AtomicU64,
    bytes_dropped_writer: AtomicU64,
    dropped_samples_size: AtomicU64,
    dropped_samples_channel: AtomicU64,
}

impl Telemetry {
    /// Tracks a sample accepted by the client.
    pub fn track_sample(&self, sample: &Sample) {
        let counter = match sample {
            Sample::Metric(metric) => self.points_for(metric.kind()),
            Sample::Event(_) => &self.events,
            Sample::ServiceCheck(_) => &self.service_checks,
        };
        counter.fetch_add(1, Relaxed);
    }

    fn points_for(&self, kind: MetricKind) -> &AtomicU64 {
        match kind {
            MetricKind::Gauge => &self.gauge_points,
            MetricKind::Count => &self.count_points,
            MetricKind::Set => &self.set_points,
            MetricKind::Histogram => &self.histogram_points,
            MetricKind::Distribution => &self.distribution_points,
            MetricKind::Timing => &self.timing_points,
        }
    }

    /// Tracks the number of contexts flushed out of the aggregator for a given kind.
    pub fn track_contexts_flushed(&self, kind: MetricKind, contexts: usize) {
        let counter = match kind {
            MetricKind::Gauge => &self.gauge_contexts,
            MetricKind::Count => &self.count_contexts,
            MetricKind::Set => &self.set_contexts,
            MetricKind::Histogram => &self.histogram_contexts,
            MetricKind::Distribution => &self.distribution_contexts,
            MetricKind::Timing => &self.timing_contexts,
        };
        counter.fetch_add(contexts as u64, Relaxed);
    }

    /// Tracks a successful payload send.
    pub fn track_payload_sent(&self, bytes_len: usize) {
        self.payloads_sent.fetch_add(1, Relaxed);
        self.bytes_sent.fetch_add(bytes_len as u64, Relaxed);
    }

    /// Tracks a payload dropped because the forwarder queue was full.
    pub fn track_payload_dropped_queue(&self, bytes_len: usize) {
        self.payloads_dropped_queue.fetch_add(1, Relaxed);
        self.bytes_dropped_queue.fetch_add(bytes_len as u64, Relaxed);
    }

    /// Tracks a payload dropped because the transport failed to write it.
    pub fn track_payload_dropped_writer(&self, bytes_len: usize) {
        self.payloads_dropped_writer.fetch_add(1, Relaxed);
        self.bytes_dropped_writer.fetch_add(bytes_len as u64, Relaxed);
    }

    /// Tracks a sample dropped because it did not fit in an empty payload.
    pub fn track_sample_dropped_size(&self) {
        self.dropped_samples_size.fetch_add(1, Relaxed);
    }

    /// Tracks a sample dropped because its worker channel was full.
    pub fn track_sample_dropped_channel(&self) {
        self.dropped_samples_channel.fetch_add(1, Relaxed);
    }

    /// Takes a snapshot of the current counter values.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let load = |counter: &AtomicU64| counter.load(Relaxed);

        let payloads_dropped_queue = load(&self.payloads_dropped_queue);
        let payloads_dropped_writer = load(&self.payloads_dropped_writer);
        let bytes_dropped_queue = load(&self.bytes_dropped_queue);
        let bytes_dropped_writer = load(&self.bytes_dropped_writer);

        TelemetrySnapshot {
            gauge_points: load(&self.gauge_points),
            count_points: load(&self.count_points),
            set_points: load(&self.set_points),
            histogram_points: load(&self.histogram_points),
            distribution_points: load(&self.distribution_points),
            timing_points: load(&self.timing_points),
            events: load(&self.events),
            service_checks: load(&self.service_checks),
            gauge_contexts: load(&self.gauge_contexts),
            count_contexts: load(&self.count_contexts),
            set_contexts: load(&self.set_contexts),
            histogram_contexts: load(&self.histogram_contexts),
            distribution_contexts: load(&self.distribution_contexts),
            timing_contexts: load(&self.timing_contexts),
            payloads_sent: load(&self.payloads_sent),
            bytes_sent: load(&self.bytes_sent),
            payloads_dropped: payloads_dropped_queue + payloads_dropped_writer,
            bytes_dropped: bytes_dropped_queue + bytes_dropped_writer,
            payloads_dropped_queue,
            bytes_dropped_queue,
            payloads_dropped_writer,
            bytes_dropped_writer,
            dropped_samples_size: load(&self.dropped_samples_size),
            dropped_samples_channel: load(&self.dropped_samples_channel),
        }
    }
}

/// A point-in-time copy of the client telemetry.
///
/// Every counter is cumulative since the client was built.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TelemetrySnapshot {
    /// Gauge samples accepted.
    pub gauge_points: u64,

    /// Count samples accepted.
    pub count_points: u64,

    /// Set samples accepted.
    pub set_points: u64,

    /// Histogram samples accepted.
    pub histogram_points: u64,

    /// Distribution samples accepted.
    pub distribution_points: u64,

    /// Timing samples accepted.
    pub timing_points: u64,

    /// Events accepted.
    pub events: u64,

    /// Service checks accepted.
    pub service_checks: u64,

    /// Gauge contexts flushed by the aggregator.
    pub gauge_contexts: u64,

    /// Count contexts flushed by the aggregator.
    pub count_contexts: u64,

    /// Set contexts flushed by the aggregator.
    pub set_contexts: u64,

    /// Histogram contexts flushed by the aggregator.
    pub histogram_contexts: u64,

    /// Distribution contexts flushed by the aggregator.
    pub distribution_contexts: u64,

    /// Timing contexts flushed by the aggregator.
    pub timing_contexts: u64,

    /// Payloads written to the transport.
    pub payloads_sent: u64,

    /// Bytes written to the transport.
    pub bytes_sent: u64,

    /// Payloads dropped for any reason.
    pub payloads_dropped: u64,

    /// Bytes dropped for any reason.
    pub bytes_dropped: u64,

    /// Payloads dropped because the forwarder queue was full.
    pub payloads_dropped_queue: u64,

    /// Bytes dropped because the forwarder queue was full.
    pub bytes_dropped_queue: u64,

    /// Payloads dropped because the transport returned an error.
    pub payloads_dropped_writer: u64,

    /// Bytes dropped because the transport returned an error.
    pub bytes_dropped_writer: u64,

    /// Samples dropped because they did not fit in an empty payload.
    pub dropped_samples_size: u64,

    /// Samples dropped because their worker channel was full.
    pub dropped_samples_channel: u64,
}

impl TelemetrySnapshot {
    /// Returns the total number of metric samples accepted, across all kinds.
    pub fn metric_points(&self) -> u64 {
        self.gauge_points
            + self.count_points
            + self.set_points
            + self.histogram_points
            + self.distribution_points
            + self.timing_points
    }

    /// Returns the total number of contexts flushed by the aggregator, across all kinds.
    pub fn aggregated_contexts(&self) -> u64 {
        self.gauge_contexts
            + self.count_contexts
            + self.set_contexts
            + self.histogram_contexts
            + self.distribution_contexts
            + self.timing_contexts
    }
}

#[cfg(test)]
mod tests {
    use super::Telemetry;
    use crate::sample::{Event, MetricKind, MetricSample, Sample};

    #[test]
    fn snapshot_totals() {
        let telemetry = Telemetry::default();
        telemetry.track_sample(&Sample::from(MetricSample::count("a", 1)));
        telemetry.track_sample(&Sample::from(MetricSample::gauge("b", 1.0)));
        telemetry.track_sample(&Sample::from(Event::new("title", "text")));
        telemetry.track_contexts_flushed(MetricKind::Count, 3);
        telemetry.track_payload_sent(100);
        telemetry.track_payload_dropped_queue(10);
        telemetry.track_payload_dropped_writer(20);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.metric_points(), 2);
        assert_eq!(snapshot.events, 1);
        assert_eq!(snapshot.aggregated_contexts(), 3);
        assert_eq!(snapshot.payloads_sent, 1);
        assert_eq!(snapshot.bytes_sent, 100);
        assert_eq!(snapshot.payloads_dropped, 2);
        assert_eq!(snapshot.bytes_dropped, 30);
        assert_eq!(snapshot.bytes_dropped_writer, 20);
    }
}
