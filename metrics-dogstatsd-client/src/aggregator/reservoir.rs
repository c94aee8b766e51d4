use std::sync::atomic::{
    AtomicU64,
    Ordering::{Acquire, Relaxed},
};

use crossbeam_queue::ArrayQueue;
use metrics_util::storage::AtomicBucket;

enum Values {
    Unbounded(AtomicBucket<f64>),
    Bounded(ArrayQueue<f64>),
}

/// Observations buffered for a histogram, distribution or timing context.
///
/// When bounded, the oldest observation is evicted to make room for the newest one once the reservoir is full. This is
/// not uniform reservoir sampling: recent values are favored. The rate reported at flush lets the server scale the
/// kept values back up to the number of observations.
pub(crate) struct ReservoirEntry {
    values: Values,
    observed: AtomicU64,
    rate: f64,
}

impl ReservoirEntry {
    /// Creates a new `ReservoirEntry`.
    ///
    /// `rate` is the sample rate of the first observation, and `max_samples` bounds the number of values kept, if set.
    pub fn new(rate: f64, max_samples: Option<usize>) -> Self {
        let values = match max_samples {
            Some(max_samples) => Values::Bounded(ArrayQueue::new(max_samples.max(1))),
            None => Values::Unbounded(AtomicBucket::new()),
        };

        Self { values, observed: AtomicU64::new(0), rate }
    }

    /// Records an observation.
    pub fn record(&self, value: f64) {
        match &self.values {
            Values::Unbounded(bucket) => bucket.push(value),
            Values::Bounded(queue) => {
                let _ = queue.force_push(value);
            }
        }
        self.observed.fetch_add(1, Relaxed);
    }

    /// Consumes the entry, returning the kept values and the rate to report them with.
    ///
    /// The reported rate is the rate of the first observation when it was sampled, or otherwise the ratio of kept
    /// values to observations.
    pub fn into_values(self) -> (Vec<f64>, f64) {
        let values = match self.values {
            Values::Unbounded(bucket) => bucket.data(),
            Values::Bounded(queue) => std::iter::from_fn(|| queue.pop()).collect(),
        };

        let rate = if self.rate < 1.0 {
            self.rate
        } else {
            let observed = self.observed.load(Acquire);
            if observed == 0 {
                1.0
            } else {
                values.len() as f64 / observed as f64
            }
        };

        (values, rate)
    }
}

#[cfg(test)]
mod tests {
    use super::ReservoirEntry;

    #[test]
    fn unbounded_keeps_everything() {
        let entry = ReservoirEntry::new(1.0, None);
        for i in 0..100 {
            entry.record(f64::from(i));
        }

        let (values, rate) = entry.into_values();
        assert_eq!(values.len(), 100);
        assert_eq!(rate.to_bits(), 1.0f64.to_bits());
    }

    #[test]
    fn bounded_evicts_oldest() {
        let entry = ReservoirEntry::new(1.0, Some(3));
        for i in 1..=5 {
            entry.record(f64::from(i));
        }

        let (values, rate) = entry.into_values();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
        assert_eq!(rate.to_bits(), 0.6f64.to_bits());
    }

    #[test]
    fn first_rate_is_kept() {
        let entry = ReservoirEntry::new(0.5, Some(2));
        for i in 0..10 {
            entry.record(f64::from(i));
        }

        let (values, rate) = entry.into_values();
        assert_eq!(values.len(), 2);
        assert_eq!(rate.to_bits(), 0.5f64.to_bits());
    }
}
