use std::{fmt, str::FromStr, time::Duration};

/// Tag cardinality hint forwarded to the DogStatsD server.
///
/// The cardinality tells the server how many tag-value combinations the sender expects for a metric, which it uses
/// when deciding which origin tags to enrich the metric with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Cardinality {
    /// No origin tags should be added.
    None,

    /// Only low-cardinality origin tags should be added.
    Low,

    /// Orchestrator-level origin tags (pod, task, etc) may be added.
    Orchestrator,

    /// All origin tags, including high-cardinality ones, may be added.
    High,
}

impl Cardinality {
    /// Returns the wire representation of this cardinality.
    pub const fn as_str(self) -> &'static str {
        match self {
            Cardinality::None => "none",
            Cardinality::Low => "low",
            Cardinality::Orchestrator => "orchestrator",
            Cardinality::High => "high",
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cardinality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Cardinality::None),
            "low" => Ok(Cardinality::Low),
            "orchestrator" => Ok(Cardinality::Orchestrator),
            "high" => Ok(Cardinality::High),
            other => Err(format!(
                "invalid cardinality '{}' (expected 'none', 'low', 'orchestrator' or 'high')",
                other
            )),
        }
    }
}

/// Metric kind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MetricKind {
    /// A gauge.
    Gauge,

    /// A count.
    Count,

    /// A set.
    Set,

    /// A histogram.
    Histogram,

    /// A distribution.
    Distribution,

    /// A timing, in milliseconds.
    Timing,
}

impl MetricKind {
    /// Returns the type marker used on the wire for this kind.
    pub(crate) const fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricKind::Gauge => b"g",
            MetricKind::Count => b"c",
            MetricKind::Set => b"s",
            MetricKind::Histogram => b"h",
            MetricKind::Distribution => b"d",
            MetricKind::Timing => b"ms",
        }
    }

    /// Returns `true` if values of this kind are buffered individually rather than merged.
    pub const fn is_reservoir(self) -> bool {
        matches!(self, MetricKind::Histogram | MetricKind::Distribution | MetricKind::Timing)
    }
}

/// The value carried by a metric sample.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// Last-write-wins value.
    Gauge(f64),

    /// Delta to add to a running total.
    Count(i64),

    /// A member of a set of unique values.
    Set(String),

    /// A single histogram observation.
    Histogram(f64),

    /// A single distribution observation.
    Distribution(f64),

    /// A single timing observation, in milliseconds.
    Timing(f64),
}

impl MetricValue {
    /// Returns the kind of this value.
    pub const fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Count(_) => MetricKind::Count,
            MetricValue::Set(_) => MetricKind::Set,
            MetricValue::Histogram(_) => MetricKind::Histogram,
            MetricValue::Distribution(_) => MetricKind::Distribution,
            MetricValue::Timing(_) => MetricKind::Timing,
        }
    }
}

/// A single metric observation.
///
/// Samples are built with one of the per-kind constructors and then decorated with tags, a sample rate, a
/// cardinality, or a timestamp:
///
/// ```
/// # use metrics_dogstatsd_client::{Cardinality, MetricSample};
/// let sample = MetricSample::count("requests", 1)
///     .with_tags(["endpoint:/login", "method:post"])
///     .with_rate(0.5)
///     .with_cardinality(Cardinality::Low);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub(crate) name: String,
    pub(crate) value: MetricValue,
    pub(crate) tags: Vec<String>,
    pub(crate) rate: f64,
    pub(crate) cardinality: Option<Cardinality>,
    pub(crate) timestamp: Option<u64>,
}

impl MetricSample {
    /// Creates a new `MetricSample` with the given name and value.
    pub fn new<N>(name: N, value: MetricValue) -> Self
    where
        N: Into<String>,
    {
        Self {
            name: name.into(),
            value,
            tags: Vec::new(),
            rate: 1.0,
            cardinality: None,
            timestamp: None,
        }
    }

    /// Creates a gauge sample.
    pub fn gauge<N: Into<String>>(name: N, value: f64) -> Self {
        Self::new(name, MetricValue::Gauge(value))
    }

    /// Creates a count sample.
    pub fn count<N: Into<String>>(name: N, value: i64) -> Self {
        Self::new(name, MetricValue::Count(value))
    }

    /// Creates a set sample.
    pub fn set<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self::new(name, MetricValue::Set(value.into()))
    }

    /// Creates a histogram sample.
    pub fn histogram<N: Into<String>>(name: N, value: f64) -> Self {
        Self::new(name, MetricValue::Histogram(value))
    }

    /// Creates a distribution sample.
    pub fn distribution<N: Into<String>>(name: N, value: f64) -> Self {
        Self::new(name, MetricValue::Distribution(value))
    }

    /// Creates a timing sample from a duration, reported in milliseconds.
    pub fn timing<N: Into<String>>(name: N, value: Duration) -> Self {
        Self::new(name, MetricValue::Timing(value.as_secs_f64() * 1000.0))
    }

    /// Appends the given tags to the sample.
    ///
    /// Tags are kept in the order given, and duplicates are allowed.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Appends a single tag to the sample.
    #[must_use]
    pub fn with_tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Sets the sample rate.
    ///
    /// Must be in the range `(0, 1]`. Defaults to 1.0.
    #[must_use]
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Sets the tag cardinality, overriding the client's default cardinality.
    #[must_use]
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = Some(cardinality);
        self
    }

    /// Sets an explicit timestamp, in seconds since the Unix epoch.
    ///
    /// Only gauges and counts support timestamps. Timestamped samples are never aggregated on the client side.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the metric value.
    pub fn value(&self) -> &MetricValue {
        &self.value
    }

    /// Returns the metric kind.
    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Returns the tags attached to the sample.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the sample rate.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Returns the cardinality set on the sample, if any.
    pub fn cardinality(&self) -> Option<Cardinality> {
        self.cardinality
    }

    /// Returns the timestamp set on the sample, if any.
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("metric name must not be empty");
        }

        // Written this way so that NaN is rejected as well.
        if !(self.rate > 0.0 && self.rate <= 1.0) {
            return Err("sample rate must be in the range (0, 1]");
        }

        if let Some(timestamp) = self.timestamp {
            if !matches!(self.value, MetricValue::Gauge(_) | MetricValue::Count(_)) {
                return Err("timestamps are only supported for gauges and counts");
            }

            if timestamp == 0 {
                return Err("timestamp must be after the Unix epoch");
            }
        }

        Ok(())
    }
}

/// Event priority.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventPriority {
    /// Normal priority.
    Normal,

    /// Low priority.
    Low,
}

impl EventPriority {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            EventPriority::Normal => "normal",
            EventPriority::Low => "low",
        }
    }
}

/// Event alert type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventAlertType {
    /// Informational.
    Info,

    /// Error.
    Error,

    /// Warning.
    Warning,

    /// Success.
    Success,
}

impl EventAlertType {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            EventAlertType::Info => "info",
            EventAlertType::Error => "error",
            EventAlertType::Warning => "warning",
            EventAlertType::Success => "success",
        }
    }
}

/// An event, posted to the event stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub(crate) title: String,
    pub(crate) text: String,
    pub(crate) timestamp: Option<u64>,
    pub(crate) hostname: Option<String>,
    pub(crate) aggregation_key: Option<String>,
    pub(crate) priority: Option<EventPriority>,
    pub(crate) source_type_name: Option<String>,
    pub(crate) alert_type: Option<EventAlertType>,
    pub(crate) tags: Vec<String>,
}

impl Event {
    /// Creates a new `Event` with the given title and text.
    pub fn new<T: Into<String>, X: Into<String>>(title: T, text: X) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            timestamp: None,
            hostname: None,
            aggregation_key: None,
            priority: None,
            source_type_name: None,
            alert_type: None,
            tags: Vec::new(),
        }
    }

    /// Sets the event timestamp, in seconds since the Unix epoch.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the hostname the event is attributed to.
    #[must_use]
    pub fn with_hostname<H: Into<String>>(mut self, hostname: H) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets the aggregation key, used to group related events.
    #[must_use]
    pub fn with_aggregation_key<K: Into<String>>(mut self, key: K) -> Self {
        self.aggregation_key = Some(key.into());
        self
    }

    /// Sets the event priority.
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the source type name.
    #[must_use]
    pub fn with_source_type_name<S: Into<String>>(mut self, source: S) -> Self {
        self.source_type_name = Some(source.into());
        self
    }

    /// Sets the alert type.
    #[must_use]
    pub fn with_alert_type(mut self, alert_type: EventAlertType) -> Self {
        self.alert_type = Some(alert_type);
        self
    }

    /// Appends the given tags to the event.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.title.is_empty() {
            return Err("event title must not be empty");
        }

        if self.timestamp == Some(0) {
            return Err("timestamp must be after the Unix epoch");
        }

        Ok(())
    }
}

/// Service check status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceCheckStatus {
    /// The service is healthy.
    Ok,

    /// The service is degraded.
    Warning,

    /// The service is failing.
    Critical,

    /// The status could not be determined.
    Unknown,
}

impl ServiceCheckStatus {
    pub(crate) const fn as_bytes(self) -> &'static [u8] {
        match self {
            ServiceCheckStatus::Ok => b"0",
            ServiceCheckStatus::Warning => b"1",
            ServiceCheckStatus::Critical => b"2",
            ServiceCheckStatus::Unknown => b"3",
        }
    }
}

/// A service check, reporting the status of a service.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceCheck {
    pub(crate) name: String,
    pub(crate) status: ServiceCheckStatus,
    pub(crate) timestamp: Option<u64>,
    pub(crate) hostname: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) tags: Vec<String>,
}

impl ServiceCheck {
    /// Creates a new `ServiceCheck` with the given name and status.
    pub fn new<N: Into<String>>(name: N, status: ServiceCheckStatus) -> Self {
        Self {
            name: name.into(),
            status,
            timestamp: None,
            hostname: None,
            message: None,
            tags: Vec::new(),
        }
    }

    /// Sets the timestamp of the check, in seconds since the Unix epoch.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the hostname the check is attributed to.
    #[must_use]
    pub fn with_hostname<H: Into<String>>(mut self, hostname: H) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets a human-readable message describing the status.
    #[must_use]
    pub fn with_message<M: Into<String>>(mut self, message: M) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Appends the given tags to the service check.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("service check name must not be empty");
        }

        if self.timestamp == Some(0) {
            return Err("timestamp must be after the Unix epoch");
        }

        Ok(())
    }
}

/// Anything that can be sent through the client.
#[derive(Clone, Debug, PartialEq)]
pub enum Sample {
    /// A metric sample.
    Metric(MetricSample),

    /// An event.
    Event(Event),

    /// A service check.
    ServiceCheck(ServiceCheck),
}

impl Sample {
    /// Returns the name used to route the sample to a worker.
    pub(crate) fn routing_name(&self) -> &str {
        match self {
            Sample::Metric(metric) => &metric.name,
            Sample::Event(event) => &event.title,
            Sample::ServiceCheck(check) => &check.name,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        match self {
            Sample::Metric(metric) => metric.validate(),
            Sample::Event(event) => event.validate(),
            Sample::ServiceCheck(check) => check.validate(),
        }
    }
}

impl From<MetricSample> for Sample {
    fn from(metric: MetricSample) -> Self {
        Sample::Metric(metric)
    }
}

impl From<Event> for Sample {
    fn from(event: Event) -> Self {
        Sample::Event(event)
    }
}

impl From<ServiceCheck> for Sample {
    fn from(check: ServiceCheck) -> Self {
        Sample::ServiceCheck(check)
    }
}
