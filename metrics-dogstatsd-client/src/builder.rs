use std::{net::SocketAddr, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    aggregator::{Aggregator, AggregatorConfiguration},
    client::{ChannelMode, DogStatsDClient, Pipeline, Schedule},
    dispatcher::Dispatcher,
    forwarder::{Forwarder, RemoteAddr, SocketTransport, Transport},
    pool::BufferPool,
    recorder::DogStatsDRecorder,
    sample::Cardinality,
    telemetry::Telemetry,
    worker::Worker,
    writer::{WireOptions, SMALLEST_VALID_PAYLOAD},
};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PAYLOAD_LEN: usize = 8192;
const DEFAULT_MAX_PAYLOAD_ELEMENTS: usize = usize::MAX;
const DEFAULT_BUFFER_POOL_SIZE: usize = 2048;
const DEFAULT_BUFFER_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_WORKERS: usize = 32;
const DEFAULT_SENDER_QUEUE_SIZE: usize = 2048;
const DEFAULT_AGGREGATION_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_CHANNEL_MODE_BUFFER_SIZE: usize = 4096;

/// Errors that could occur while building or installing a DogStatsD client/recorder.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// The configuration is invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Details about the invalid setting.
        reason: String,
    },

    /// Failed to spawn the background threads.
    #[error("failed to spawn background threads for client")]
    Backend,

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install recorder as global recorder")]
    FailedToInstall,
}

/// Builder for a DogStatsD client.
pub struct DogStatsDBuilder {
    remote_addr: RemoteAddr,
    transport: Option<Box<dyn Transport>>,
    write_timeout: Duration,
    max_payload_len: usize,
    max_payload_elements: usize,
    buffer_pool_size: usize,
    buffer_flush_interval: Duration,
    workers: usize,
    sender_queue_size: usize,
    aggregation: bool,
    extended_aggregation: bool,
    aggregation_flush_interval: Duration,
    max_samples_per_context: Option<usize>,
    default_cardinality: Option<Cardinality>,
    channel_mode: bool,
    channel_mode_buffer_size: usize,
    channel_mode_errors_when_full: bool,
    namespace: Option<String>,
    global_tags: Vec<String>,
    container_id: Option<String>,
    histograms_as_distributions: bool,
}

impl DogStatsDBuilder {
    /// Set the remote address to forward metrics to.
    ///
    /// For UDP, the address simply needs to be in the format of `<host>:<port>`. For Unix domain sockets, an address in
    /// the format of `<scheme>://<path>`. The scheme can be either `unix` or `unixgram`, for a stream (`SOCK_STREAM`)
    /// or datagram (`SOCK_DGRAM`) socket, respectively. Payloads sent over a stream socket are prefixed with their
    /// length.
    ///
    /// Defaults to sending to `127.0.0.1:8125` over UDP.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed as a valid address, an error will be returned indicating the
    /// reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.remote_addr = RemoteAddr::try_from(addr.as_ref())
            .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;
        Ok(self)
    }

    /// Set a custom transport to write payloads to.
    ///
    /// When set, the remote address is ignored.
    #[must_use]
    pub fn with_transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Set the write timeout for forwarding metrics.
    ///
    /// When the write timeout is reached, the write operation will be aborted and the payload being sent at the time
    /// will be dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the maximum payload length for forwarding metrics.
    ///
    /// This controls the maximum size of a single payload that will be sent to the remote server. As metric payloads
    /// are being built, they will be limited to this size. If a metric cannot be built without exceeding this size, it
    /// will be dropped.
    ///
    /// This should generally be set to the same value (or lower) as `dogstatsd_buffer_size` in the Datadog Agent.
    /// Setting a higher value is likely to lead to invalid metric payloads that are discarded by the Datadog Agent when
    /// received.
    ///
    /// Defaults to 8192 bytes.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Set the maximum number of elements (metrics, events, or service checks) in a single payload.
    ///
    /// Defaults to no limit.
    #[must_use]
    pub fn with_maximum_payload_elements(mut self, max_payload_elements: usize) -> Self {
        self.max_payload_elements = max_payload_elements;
        self
    }

    /// Set the number of payload buffers kept around for reuse.
    ///
    /// Defaults to 2048.
    #[must_use]
    pub fn with_buffer_pool_size(mut self, buffer_pool_size: usize) -> Self {
        self.buffer_pool_size = buffer_pool_size;
        self
    }

    /// Set how often partially filled payloads are sent.
    ///
    /// Defaults to 100 milliseconds.
    #[must_use]
    pub fn with_buffer_flush_interval(mut self, interval: Duration) -> Self {
        self.buffer_flush_interval = interval;
        self
    }

    /// Set the number of workers payloads are built by.
    ///
    /// Samples are spread over workers by metric name, so that concurrent callers rarely contend on the same payload.
    ///
    /// Defaults to 32.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the number of payloads that can be queued for sending.
    ///
    /// When the queue is full, new payloads are dropped.
    ///
    /// Defaults to 2048.
    #[must_use]
    pub fn with_sender_queue_size(mut self, queue_size: usize) -> Self {
        self.sender_queue_size = queue_size;
        self
    }

    /// Sets whether or not gauges, counts and sets are aggregated on the client side.
    ///
    /// Disabling aggregation while extended aggregation is enabled is rejected when building.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: bool) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Sets whether or not histograms, distributions and timings are also aggregated on the client side.
    ///
    /// When enabled, observations are buffered per context and sent as a single line carrying multiple values. This
    /// implies aggregation.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_extended_aggregation(mut self, extended_aggregation: bool) -> Self {
        self.extended_aggregation = extended_aggregation;
        if extended_aggregation {
            self.aggregation = true;
        }
        self
    }

    /// Set the flush interval of the aggregator.
    ///
    /// This controls how often aggregated metrics are forwarded to the remote server, and in turn controls the
    /// efficiency of aggregation.
    ///
    /// Defaults to 2 seconds.
    #[must_use]
    pub fn with_aggregation_flush_interval(mut self, interval: Duration) -> Self {
        self.aggregation_flush_interval = interval;
        self
    }

    /// Set the maximum number of observations kept per histogram, distribution or timing context between flushes.
    ///
    /// Once the limit is reached, the oldest observation is replaced. The rate sent along with the values accounts for
    /// the replaced observations.
    ///
    /// Defaults to no limit.
    #[must_use]
    pub fn with_max_samples_per_context(mut self, max_samples: usize) -> Self {
        self.max_samples_per_context = Some(max_samples);
        self
    }

    /// Set the tag cardinality used for samples that do not specify one.
    ///
    /// Defaults to none, in which case the server default applies.
    #[must_use]
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.default_cardinality = Some(cardinality);
        self
    }

    /// Sets whether or not samples are handed to workers over channels.
    ///
    /// In channel mode, sending a sample only enqueues it, and one background thread per worker encodes it. If the
    /// channel of a worker is full, the sample is dropped.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_channel_mode(mut self, channel_mode: bool) -> Self {
        self.channel_mode = channel_mode;
        self
    }

    /// Set the size of each worker channel in channel mode.
    ///
    /// Defaults to 4096.
    #[must_use]
    pub fn with_channel_mode_buffer_size(mut self, buffer_size: usize) -> Self {
        self.channel_mode_buffer_size = buffer_size;
        self
    }

    /// Sets whether or not sending returns an error when a worker channel is full in channel mode.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_channel_mode_errors_when_full(mut self, errors_when_full: bool) -> Self {
        self.channel_mode_errors_when_full = errors_when_full;
        self
    }

    /// Set a namespace prepended to every metric name.
    ///
    /// The namespace is prepended as-is, so it should generally end with a `.`.
    #[must_use]
    pub fn with_namespace<N>(mut self, namespace: N) -> Self
    where
        N: Into<String>,
    {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set tags added to every metric, event and service check.
    ///
    /// Global tags come before the tags of the sample itself.
    #[must_use]
    pub fn with_global_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.global_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the container ID sent along with every metric, event and service check.
    #[must_use]
    pub fn with_container_id<C>(mut self, container_id: C) -> Self
    where
        C: Into<String>,
    {
        self.container_id = Some(container_id.into());
        self
    }

    /// Sets whether or not to send histograms as distributions.
    ///
    /// Only applies to histograms recorded through the recorder. When enabled, histograms will be sent as
    /// distributions to the remote server. This changes the default behavior of how the metrics will be processed by
    /// the Datadog Agent, as histograms have a specific set of default "aggregates" calculated -- `max`, `median`,
    /// `avg`, `count`, etc -- locally in the Datadog Agent, whereas distributions are aggregated entirely on the Datadog
    /// backend, and provide richer support for global aggregation and specific percentiles.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn send_histograms_as_distributions(mut self, histograms_as_distributions: bool) -> Self {
        self.histograms_as_distributions = histograms_as_distributions;
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        let invalid = |reason: &str| Err(BuildError::InvalidConfiguration { reason: reason.to_string() });

        if self.max_payload_len < SMALLEST_VALID_PAYLOAD.len() {
            return invalid("maximum payload length is too small to hold a single metric");
        }
        if self.max_payload_elements == 0 {
            return invalid("maximum payload elements must be at least 1");
        }
        if self.buffer_pool_size == 0 {
            return invalid("buffer pool size must be at least 1");
        }
        if self.workers == 0 {
            return invalid("number of workers must be at least 1");
        }
        if self.sender_queue_size == 0 {
            return invalid("sender queue size must be at least 1");
        }
        if self.channel_mode_buffer_size == 0 {
            return invalid("channel mode buffer size must be at least 1");
        }
        if self.buffer_flush_interval.is_zero() || self.aggregation_flush_interval.is_zero() {
            return invalid("flush intervals must be greater than zero");
        }
        if self.extended_aggregation && !self.aggregation {
            return invalid("extended aggregation requires aggregation to be enabled");
        }
        if self.max_samples_per_context == Some(0) {
            return invalid("maximum samples per context must be at least 1");
        }

        Ok(())
    }

    /// Builds the client.
    ///
    /// Background threads are spawned to flush the aggregator and payloads, and to forward payloads to the remote
    /// server.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the background threads cannot be spawned, an error will be returned.
    pub fn build_client(self) -> Result<DogStatsDClient, BuildError> {
        self.build_parts().map(|(client, _)| client)
    }

    fn build_parts(self) -> Result<(DogStatsDClient, bool), BuildError> {
        self.validate()?;

        let telemetry = Arc::new(Telemetry::default());
        let options = Arc::new(WireOptions {
            namespace: self.namespace,
            global_tags: self.global_tags,
            container_id: self.container_id,
            default_cardinality: self.default_cardinality,
        });
        let pool = Arc::new(BufferPool::new(
            self.buffer_pool_size,
            self.max_payload_len,
            self.max_payload_elements,
            options,
        ));

        let mut transport: Box<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Box::new(SocketTransport::new(self.remote_addr, self.write_timeout)),
        };
        transport
            .set_write_timeout(self.write_timeout)
            .map_err(|e| BuildError::InvalidConfiguration { reason: e.to_string() })?;

        let forwarder =
            Arc::new(Forwarder::new(transport, self.sender_queue_size, Arc::clone(&pool), Arc::clone(&telemetry)));
        let workers = (0..self.workers)
            .map(|_| Arc::new(Worker::new(Arc::clone(&pool), Arc::clone(&forwarder), Arc::clone(&telemetry))))
            .collect();
        let dispatcher = Dispatcher::new(workers, Arc::clone(&telemetry));

        let aggregator = self.aggregation.then(|| {
            let config = AggregatorConfiguration {
                extended: self.extended_aggregation,
                max_samples_per_context: self.max_samples_per_context,
                default_cardinality: self.default_cardinality,
            };
            Aggregator::new(config, Arc::clone(&telemetry))
        });

        let schedule = Schedule {
            buffer_flush_interval: self.buffer_flush_interval,
            aggregation_flush_interval: self.aggregation_flush_interval,
            channel_mode: self.channel_mode.then_some(ChannelMode {
                buffer_size: self.channel_mode_buffer_size,
                errors_when_full: self.channel_mode_errors_when_full,
            }),
        };

        let pipeline = Pipeline { aggregator, dispatcher, forwarder, telemetry };
        let client = DogStatsDClient::start(pipeline, schedule).map_err(|_| BuildError::Backend)?;

        Ok((client, self.histograms_as_distributions))
    }

    /// Builds the recorder.
    ///
    /// The client backing the recorder is built as with [`DogStatsDBuilder::build_client`], but the recorder must be
    /// manually installed by the caller.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the background threads cannot be spawned, an error will be returned.
    pub fn build(self) -> Result<DogStatsDRecorder, BuildError> {
        let (client, histograms_as_distributions) = self.build_parts()?;
        Ok(DogStatsDRecorder::new(client, histograms_as_distributions))
    }

    /// Builds and installs the recorder.
    ///
    /// The client backing the recorder is built as with [`DogStatsDBuilder::build_client`], and the recorder is
    /// installed as the global recorder.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, the background threads cannot be spawned, or if a global recorder is already
    /// installed, an error will be returned.
    pub fn install(self) -> Result<(), BuildError> {
        let recorder = self.build()?;

        metrics::set_global_recorder(recorder).map_err(|_| BuildError::FailedToInstall)
    }
}

impl Default for DogStatsDBuilder {
    fn default() -> Self {
        DogStatsDBuilder {
            remote_addr: RemoteAddr::Udp(vec![SocketAddr::from(([127, 0, 0, 1], 8125))]),
            transport: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            max_payload_elements: DEFAULT_MAX_PAYLOAD_ELEMENTS,
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
            buffer_flush_interval: DEFAULT_BUFFER_FLUSH_INTERVAL,
            workers: DEFAULT_WORKERS,
            sender_queue_size: DEFAULT_SENDER_QUEUE_SIZE,
            aggregation: true,
            extended_aggregation: false,
            aggregation_flush_interval: DEFAULT_AGGREGATION_FLUSH_INTERVAL,
            max_samples_per_context: None,
            default_cardinality: None,
            channel_mode: false,
            channel_mode_buffer_size: DEFAULT_CHANNEL_MODE_BUFFER_SIZE,
            channel_mode_errors_when_full: false,
            namespace: None,
            global_tags: Vec::new(),
            container_id: None,
            histograms_as_distributions: true,
        }
    }
}
