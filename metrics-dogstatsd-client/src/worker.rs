use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    aggregator::{AggregatedSample, Flushed},
    forwarder::Forwarder,
    pool::BufferPool,
    sample::Sample,
    sampling::should_sample,
    telemetry::Telemetry,
    writer::{WireBuffer, WriteError},
};

/// A single shard of the encoding pipeline.
///
/// Each worker owns one buffer at a time, guarded by a lock so that concurrent callers routed to the same shard are
/// serialized. Once a buffer is full, it is handed to the forwarder and replaced with a fresh one from the pool.
pub(crate) struct Worker {
    buffer: Mutex<WireBuffer>,
    pool: Arc<BufferPool>,
    forwarder: Arc<Forwarder>,
    telemetry: Arc<Telemetry>,
}

impl Worker {
    /// Creates a new `Worker`.
    pub fn new(pool: Arc<BufferPool>, forwarder: Arc<Forwarder>, telemetry: Arc<Telemetry>) -> Self {
        Self { buffer: Mutex::new(pool.borrow()), pool, forwarder, telemetry }
    }

    /// Encodes an application sample.
    ///
    /// Metric samples with a rate below 1.0 are sampled first, and skipped entirely if not kept.
    pub fn process(&self, sample: &Sample) {
        match sample {
            Sample::Metric(metric) => {
                if should_sample(metric.rate) {
                    self.write(|buffer| buffer.write_metric(metric));
                }
            }
            Sample::Event(event) => self.write(|buffer| buffer.write_event(event)),
            Sample::ServiceCheck(check) => self.write(|buffer| buffer.write_service_check(check)),
        }
    }

    /// Encodes an item flushed from the aggregator.
    ///
    /// Aggregated values are never sampled again.
    pub fn process_flushed(&self, item: &Flushed) {
        match item {
            Flushed::Metric(metric) => self.write(|buffer| buffer.write_metric(metric)),
            Flushed::Aggregated(aggregated) => self.write_aggregated(aggregated),
        }
    }

    /// Hands the current buffer to the forwarder, if anything was written to it.
    pub fn flush(&self) {
        let mut buffer = self.buffer.lock();
        self.flush_buffer(&mut buffer);
    }

    fn flush_buffer(&self, buffer: &mut WireBuffer) {
        if buffer.is_empty() {
            return;
        }

        let full = std::mem::replace(buffer, self.pool.borrow());
        self.forwarder.send(full);
    }

    fn write<F>(&self, write: F)
    where
        F: Fn(&mut WireBuffer) -> Result<(), WriteError>,
    {
        let mut buffer = self.buffer.lock();
        if write(&mut buffer).is_ok() {
            return;
        }

        self.flush_buffer(&mut buffer);
        if write(&mut buffer).is_err() {
            debug!("Sample too large to fit in an empty payload, dropping.");
            self.telemetry.track_sample_dropped_size();
        }
    }

    fn write_aggregated(&self, sample: &AggregatedSample) {
        let mut buffer = self.buffer.lock();
        let mut values = &sample.values[..];

        while !values.is_empty() {
            match buffer.write_aggregated(sample.kind, &sample.context, values, sample.rate) {
                Ok(_) => return,
                Err(WriteError::PartialWrite(written)) => {
                    values = &values[written..];
                    self.flush_buffer(&mut buffer);
                }
                Err(WriteError::BufferFull) => {
                    if buffer.is_empty() {
                        debug!(
                            metric_name = sample.context.name.as_str(),
                            remaining_values = values.len(),
                            "Aggregated sample too large to fit in an empty payload, dropping."
                        );
                        self.telemetry.track_sample_dropped_size();
                        return;
                    }

                    self.flush_buffer(&mut buffer);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Worker;
    use crate::{
        aggregator::{AggregatedSample, Context, Flushed},
        forwarder::{test_util::CapturingTransport, Forwarder},
        pool::BufferPool,
        sample::{Event, MetricKind, MetricSample, Sample},
        telemetry::Telemetry,
        writer::WireOptions,
    };

    struct Harness {
        worker: Worker,
        forwarder: Arc<Forwarder>,
        transport: CapturingTransport,
        telemetry: Arc<Telemetry>,
    }

    impl Harness {
        fn new(max_size: usize, max_elements: usize) -> Self {
            let transport = CapturingTransport::default();
            let telemetry = Arc::new(Telemetry::default());
            let pool = Arc::new(BufferPool::new(8, max_size, max_elements, Arc::new(WireOptions::default())));
            let forwarder = Arc::new(Forwarder::new(
                Box::new(transport.clone()),
                64,
                Arc::clone(&pool),
                Arc::clone(&telemetry),
            ));
            let worker = Worker::new(pool, Arc::clone(&forwarder), Arc::clone(&telemetry));

            Self { worker, forwarder, transport, telemetry }
        }

        fn payloads(&self) -> Vec<String> {
            self.worker.flush();
            self.forwarder.flush();
            self.transport.payloads()
        }
    }

    #[test]
    fn splits_by_element_count() {
        let harness = Harness::new(8192, 5);
        for i in 0..11 {
            harness.worker.process(&Sample::from(MetricSample::count(format!("metric{}", i), 1)));
        }

        let payloads = harness.payloads();
        assert_eq!(payloads.len(), 3);
        let lines = payloads.iter().map(|p| p.lines().count()).collect::<Vec<_>>();
        assert_eq!(lines, vec![5, 5, 1]);
        assert_eq!(harness.telemetry.snapshot().payloads_sent, 3);
    }

    #[test]
    fn splits_by_size() {
        // Each line is 12 bytes: "metricN:1|c\n".
        let harness = Harness::new(30, usize::MAX);
        for i in 0..5 {
            harness.worker.process(&Sample::from(MetricSample::count(format!("metric{}", i), 1)));
        }

        let payloads = harness.payloads();
        assert_eq!(
            payloads,
            vec!["metric0:1|c\nmetric1:1|c\n", "metric2:1|c\nmetric3:1|c\n", "metric4:1|c\n"]
        );
    }

    #[test]
    fn oversized_samples_are_dropped() {
        let harness = Harness::new(16, usize::MAX);
        harness.worker.process(&Sample::from(MetricSample::count("a_very_long_metric_name", 1)));
        harness.worker.process(&Sample::from(Event::new("a", "b")));

        assert_eq!(harness.payloads(), vec!["_e{1,1}:a|b\n"]);
        assert_eq!(harness.telemetry.snapshot().dropped_samples_size, 1);
    }

    #[test]
    fn aggregated_values_continue_in_next_payload() {
        // "metric:1:2|h|#tag:tag\n" is exactly 22 bytes.
        let harness = Harness::new(22, usize::MAX);
        let sample = AggregatedSample {
            kind: MetricKind::Histogram,
            context: Context { name: "metric".to_string(), cardinality: None, tags: vec!["tag:tag".to_string()] },
            values: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            rate: 1.0,
        };
        harness.worker.process_flushed(&Flushed::Aggregated(sample));

        assert_eq!(
            harness.payloads(),
            vec!["metric:1:2|h|#tag:tag\n", "metric:3:4|h|#tag:tag\n", "metric:5|h|#tag:tag\n"]
        );
    }

    #[test]
    fn aggregated_values_start_fresh_buffer_when_full() {
        let harness = Harness::new(22, usize::MAX);
        harness.worker.process(&Sample::from(MetricSample::count("abcdefghijklmnop", 1)));
        let sample = AggregatedSample {
            kind: MetricKind::Histogram,
            context: Context { name: "metric".to_string(), cardinality: None, tags: vec!["tag:tag".to_string()] },
            values: vec![1.0, 2.0],
            rate: 1.0,
        };
        harness.worker.process_flushed(&Flushed::Aggregated(sample));

        assert_eq!(harness.payloads(), vec!["abcdefghijklmnop:1|c\n", "metric:1:2|h|#tag:tag\n"]);
    }

    #[test]
    fn sampled_metrics_are_thinned() {
        let harness = Harness::new(8192, usize::MAX);
        for _ in 0..1000 {
            harness.worker.process(&Sample::from(MetricSample::count("requests", 1).with_rate(0.5)));
        }

        let lines = harness.payloads().iter().map(|p| p.lines().count()).sum::<usize>();
        assert!((350..650).contains(&lines), "kept {} samples", lines);
    }
}
