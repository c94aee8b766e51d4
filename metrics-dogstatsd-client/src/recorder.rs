use std::sync::{
    atomic::{
        AtomicBool, AtomicU64,
        Ordering::{AcqRel, Acquire, Relaxed},
    },
    Arc,
};

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Label, Metadata, Recorder, SharedString,
    Unit,
};
use metrics_util::registry::{Registry, Storage};
use tracing::debug;

use crate::{
    client::DogStatsDClient,
    sample::{MetricSample, MetricValue},
};

/// Name and tags of a registered metric, resolved once at registration.
struct Series {
    client: DogStatsDClient,
    name: String,
    tags: Vec<String>,
}

impl Series {
    fn new(client: &DogStatsDClient, key: &Key) -> Self {
        Self { client: client.clone(), name: key.name().to_string(), tags: key.labels().map(label_to_tag).collect() }
    }

    fn send(&self, value: MetricValue) {
        let sample = MetricSample::new(self.name.as_str(), value).with_tags(self.tags.iter().cloned());
        if let Err(e) = self.client.send(sample) {
            debug!(metric_name = self.name.as_str(), error = %e, "Failed to send metric.");
        }
    }
}

fn label_to_tag(label: &Label) -> String {
    if label.value().is_empty() {
        label.key().to_string()
    } else {
        format!("{}:{}", label.key(), label.value())
    }
}

pub(crate) struct ClientCounter {
    series: Series,
    is_absolute: AtomicBool,
    last: AtomicU64,
}

impl CounterFn for ClientCounter {
    fn increment(&self, value: u64) {
        self.is_absolute.store(false, Relaxed);
        self.series.send(MetricValue::Count(i64::try_from(value).unwrap_or(i64::MAX)));
    }

    fn absolute(&self, value: u64) {
        // The first absolute value only sets the baseline. From then on, only the delta since the previous value is
        // sent, and a counter going backwards is treated as a reset.
        if !self.is_absolute.swap(true, AcqRel) {
            self.last.store(value, Relaxed);
            return;
        }

        let last = self.last.swap(value, AcqRel);
        let delta = value.saturating_sub(last);
        if delta > 0 {
            self.series.send(MetricValue::Count(i64::try_from(delta).unwrap_or(i64::MAX)));
        }
    }
}

pub(crate) struct ClientGauge {
    series: Series,
    value: AtomicU64,
}

impl ClientGauge {
    fn update<F>(&self, f: F)
    where
        F: Fn(f64) -> f64,
    {
        let mut current = self.value.load(Acquire);
        loop {
            let new = f(f64::from_bits(current));
            match self.value.compare_exchange_weak(current, new.to_bits(), AcqRel, Acquire) {
                Ok(_) => {
                    self.series.send(MetricValue::Gauge(new));
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl GaugeFn for ClientGauge {
    fn increment(&self, value: f64) {
        self.update(|current| current + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|current| current - value);
    }

    fn set(&self, value: f64) {
        self.update(|_| value);
    }
}

pub(crate) struct ClientHistogram {
    series: Series,
    as_distribution: bool,
}

impl HistogramFn for ClientHistogram {
    fn record(&self, value: f64) {
        let value = if self.as_distribution { MetricValue::Distribution(value) } else { MetricValue::Histogram(value) };
        self.series.send(value);
    }
}

/// Creates metric handles that send every update through a client.
pub(crate) struct ClientStorage {
    client: DogStatsDClient,
    histograms_as_distributions: bool,
}

impl Storage<Key> for ClientStorage {
    type Counter = Arc<ClientCounter>;
    type Gauge = Arc<ClientGauge>;
    type Histogram = Arc<ClientHistogram>;

    fn counter(&self, key: &Key) -> Self::Counter {
        Arc::new(ClientCounter {
            series: Series::new(&self.client, key),
            is_absolute: AtomicBool::new(false),
            last: AtomicU64::new(0),
        })
    }

    fn gauge(&self, key: &Key) -> Self::Gauge {
        Arc::new(ClientGauge { series: Series::new(&self.client, key), value: AtomicU64::new(0.0f64.to_bits()) })
    }

    fn histogram(&self, key: &Key) -> Self::Histogram {
        Arc::new(ClientHistogram {
            series: Series::new(&self.client, key),
            as_distribution: self.histograms_as_distributions,
        })
    }
}

/// A recorder that forwards metrics to a DogStatsD server through a [`DogStatsDClient`].
///
/// Labels are sent as tags, in the form of `key:value`, or just `key` when the value is empty. Counters and gauges are
/// sent as counts and gauges, and are merged by the client-side aggregator when it is enabled. Histograms are sent as
/// either histograms or distributions.
pub struct DogStatsDRecorder {
    client: DogStatsDClient,
    registry: Registry<Key, ClientStorage>,
}

impl DogStatsDRecorder {
    pub(crate) fn new(client: DogStatsDClient, histograms_as_distributions: bool) -> Self {
        let storage = ClientStorage { client: client.clone(), histograms_as_distributions };
        DogStatsDRecorder { client, registry: Registry::new(storage) }
    }

    /// Returns the client backing this recorder.
    ///
    /// This can be used to flush or close the pipeline, or to send events and service checks.
    pub fn client(&self) -> &DogStatsDClient {
        &self.client
    }
}

impl Recorder for DogStatsDRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        self.registry.get_or_create_counter(key, |existing| Counter::from_arc(Arc::clone(existing)))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        self.registry.get_or_create_gauge(key, |existing| Gauge::from_arc(Arc::clone(existing)))
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        self.registry.get_or_create_histogram(key, |existing| Histogram::from_arc(Arc::clone(existing)))
    }
}
