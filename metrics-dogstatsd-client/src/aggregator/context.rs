use crate::sample::{Cardinality, MetricSample, MetricValue};

/// Aggregation key of a metric.
///
/// Two samples share a context if and only if their name, resolved cardinality, and tag sequence (including order and
/// duplicates) are identical.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct Context {
    pub name: String,
    pub cardinality: Option<Cardinality>,
    pub tags: Vec<String>,
}

impl Context {
    /// Splits a sample into its context, its value and its sample rate.
    ///
    /// `default_cardinality` is used when the sample does not carry a cardinality of its own.
    pub fn split_sample(sample: MetricSample, default_cardinality: Option<Cardinality>) -> (Self, MetricValue, f64) {
        let context = Context {
            name: sample.name,
            cardinality: sample.cardinality.or(default_cardinality),
            tags: sample.tags,
        };

        (context, sample.value, sample.rate)
    }

    /// Turns the context back into an unsampled metric sample carrying `value`.
    pub fn into_sample(self, value: MetricValue) -> MetricSample {
        MetricSample {
            name: self.name,
            value,
            tags: self.tags,
            rate: 1.0,
            cardinality: self.cardinality,
            timestamp: None,
        }
    }
}
