//! Client-side aggregation.
//!
//! Gauges, counts and sets are merged in place per context, so that only a single value (or a single value per unique
//! set member) is sent per flush. With extended aggregation, histograms, distributions and timings are buffered per
//! context and sent as multi-value lines.
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    sample::{Cardinality, MetricKind, MetricSample, MetricValue},
    sampling::should_sample,
    telemetry::Telemetry,
};

mod context;
pub(crate) use self::context::Context;

mod entry;
use self::entry::{CountEntry, GaugeEntry, SetEntry};

mod reservoir;
use self::reservoir::ReservoirEntry;

mod table;
use self::table::MergeTable;

/// Buffered observations of a single context, flushed as one multi-value line.
#[derive(Debug)]
pub(crate) struct AggregatedSample {
    pub kind: MetricKind,
    pub context: Context,
    pub values: Vec<f64>,
    pub rate: f64,
}

/// An item produced by flushing the aggregator.
#[derive(Debug)]
pub(crate) enum Flushed {
    /// A merged gauge, count or set value.
    Metric(MetricSample),

    /// The buffered values of a histogram, distribution or timing.
    Aggregated(AggregatedSample),
}

/// Aggregator configuration.
#[derive(Clone, Debug, Default)]
pub(crate) struct AggregatorConfiguration {
    /// Whether histograms, distributions and timings are aggregated.
    pub extended: bool,

    /// Maximum number of values buffered per histogram/distribution/timing context.
    pub max_samples_per_context: Option<usize>,

    /// Cardinality applied to samples that do not carry one.
    pub default_cardinality: Option<Cardinality>,
}

pub(crate) struct Aggregator {
    config: AggregatorConfiguration,
    counts: MergeTable<CountEntry>,
    gauges: MergeTable<GaugeEntry>,
    sets: MergeTable<SetEntry>,
    histograms: MergeTable<ReservoirEntry>,
    distributions: MergeTable<ReservoirEntry>,
    timings: MergeTable<ReservoirEntry>,
    flush_lock: Mutex<()>,
    telemetry: Arc<Telemetry>,
}

impl Aggregator {
    /// Creates a new `Aggregator`.
    pub fn new(config: AggregatorConfiguration, telemetry: Arc<Telemetry>) -> Self {
        Self {
            config,
            counts: MergeTable::new(),
            gauges: MergeTable::new(),
            sets: MergeTable::new(),
            histograms: MergeTable::new(),
            distributions: MergeTable::new(),
            timings: MergeTable::new(),
            flush_lock: Mutex::new(()),
            telemetry,
        }
    }

    /// Merges a sample into the aggregator.
    ///
    /// Returns the sample back if it cannot be aggregated: timestamped samples are always sent as-is, and so are
    /// histograms, distributions and timings when extended aggregation is disabled.
    pub fn aggregate(&self, sample: MetricSample) -> Option<MetricSample> {
        if sample.timestamp.is_some() || (sample.kind().is_reservoir() && !self.config.extended) {
            return Some(sample);
        }

        let (context, value, rate) = Context::split_sample(sample, self.config.default_cardinality);
        match value {
            MetricValue::Gauge(value) => self.gauge(context, value),
            MetricValue::Count(value) => self.count(context, value),
            MetricValue::Set(value) => self.set(context, value),
            MetricValue::Histogram(value) => self.reservoir(MetricKind::Histogram, context, value, rate),
            MetricValue::Distribution(value) => self.reservoir(MetricKind::Distribution, context, value, rate),
            MetricValue::Timing(value) => self.reservoir(MetricKind::Timing, context, value, rate),
        }

        None
    }

    /// Adds `value` to the running sum of the context.
    pub fn count(&self, context: Context, value: i64) {
        self.counts.merge(context, CountEntry::new, |entry| entry.merge(value));
    }

    /// Sets the current value of the context.
    pub fn gauge(&self, context: Context, value: f64) {
        self.gauges.merge(context, GaugeEntry::new, |entry| entry.set(value));
    }

    /// Adds `value` to the unique values of the context.
    pub fn set(&self, context: Context, value: String) {
        self.sets.merge(context, SetEntry::new, |entry| entry.insert(value));
    }

    /// Buffers an observation for the context.
    ///
    /// Observations with a rate below 1.0 are sampled before being buffered. The first rate seen for a context is the
    /// one reported when it is flushed.
    pub fn reservoir(&self, kind: MetricKind, context: Context, value: f64, rate: f64) {
        if !should_sample(rate) {
            return;
        }

        let table = match kind {
            MetricKind::Histogram => &self.histograms,
            MetricKind::Distribution => &self.distributions,
            MetricKind::Timing => &self.timings,
            MetricKind::Gauge | MetricKind::Count | MetricKind::Set => return,
        };

        let max_samples = self.config.max_samples_per_context;
        table.merge(context, || ReservoirEntry::new(rate, max_samples), |entry| entry.record(value));
    }

    /// Flushes every context, returning the merged values.
    ///
    /// Only one flush runs at a time. Samples merged while a flush is in progress land in the next flush.
    pub fn flush(&self) -> Vec<Flushed> {
        let _flush_guard = self.flush_lock.lock();
        let mut flushed = Vec::new();

        let counts = self.counts.drain();
        self.telemetry.track_contexts_flushed(MetricKind::Count, counts.len());
        flushed.extend(
            counts
                .into_iter()
                .map(|(context, entry)| Flushed::Metric(context.into_sample(MetricValue::Count(entry.value())))),
        );

        let gauges = self.gauges.drain();
        self.telemetry.track_contexts_flushed(MetricKind::Gauge, gauges.len());
        flushed.extend(
            gauges
                .into_iter()
                .map(|(context, entry)| Flushed::Metric(context.into_sample(MetricValue::Gauge(entry.value())))),
        );

        let sets = self.sets.drain();
        self.telemetry.track_contexts_flushed(MetricKind::Set, sets.len());
        for (context, entry) in sets {
            for value in entry.into_values() {
                flushed.push(Flushed::Metric(context.clone().into_sample(MetricValue::Set(value))));
            }
        }

        for (kind, table) in [
            (MetricKind::Histogram, &self.histograms),
            (MetricKind::Distribution, &self.distributions),
            (MetricKind::Timing, &self.timings),
        ] {
            let entries = table.drain();
            self.telemetry.track_contexts_flushed(kind, entries.len());
            for (context, entry) in entries {
                let (values, rate) = entry.into_values();
                if !values.is_empty() {
                    flushed.push(Flushed::Aggregated(AggregatedSample { kind, context, values, rate }));
                }
            }
        }

        flushed
    }
}
