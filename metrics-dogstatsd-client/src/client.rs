use std::{io, sync::Arc, thread::JoinHandle, time::Duration};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    aggregator::Aggregator,
    dispatcher::Dispatcher,
    forwarder::Forwarder,
    sample::{Event, MetricSample, Sample, ServiceCheck},
    telemetry::{Telemetry, TelemetrySnapshot},
};

/// Errors that could occur while sending through a [`DogStatsDClient`].
#[derive(Debug, Error)]
pub enum Error {
    /// The sample was rejected before entering the pipeline.
    #[error("invalid sample: {reason}")]
    InvalidSample {
        /// Why the sample was rejected.
        reason: &'static str,
    },

    /// The worker channel was full, and the sample was dropped.
    ///
    /// Only returned in channel mode, when configured to report full channels.
    #[error("worker channel is full, sample dropped")]
    ChannelFull,

    /// The client has been closed.
    #[error("client is closed")]
    Closed,

    /// The transport failed to close cleanly.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// The components making up a client, before any background thread is started.
pub(crate) struct Pipeline {
    pub aggregator: Option<Aggregator>,
    pub dispatcher: Dispatcher,
    pub forwarder: Arc<Forwarder>,
    pub telemetry: Arc<Telemetry>,
}

/// Channel mode settings.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChannelMode {
    pub buffer_size: usize,
    pub errors_when_full: bool,
}

/// How often the background threads of a client do their work.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Schedule {
    pub buffer_flush_interval: Duration,
    pub aggregation_flush_interval: Duration,
    pub channel_mode: Option<ChannelMode>,
}

struct Background {
    stop_tx: Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

struct Inner {
    // Held shared for the whole of every `send` and `flush`, and exclusively while marking the client closed, so
    // that nothing accepted before `close` can land in the pipeline after it has been drained.
    closed: RwLock<bool>,
    aggregator: Option<Arc<Aggregator>>,
    dispatcher: Arc<Dispatcher>,
    forwarder: Arc<Forwarder>,
    telemetry: Arc<Telemetry>,
    background: Mutex<Option<Background>>,
}

impl Inner {
    fn shutdown(&self) -> Result<(), Error> {
        {
            let mut closed = self.closed.write();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }

        debug!("Closing client.");

        // Receivers encode whatever is left in their channels before exiting, and the tickers exit right away.
        if let Some(Background { stop_tx, handles }) = self.background.lock().take() {
            drop(stop_tx);
            for handle in handles {
                if handle.join().is_err() {
                    error!("Background thread panicked.");
                }
            }
        }

        if let Some(aggregator) = &self.aggregator {
            flush_aggregator(aggregator, &self.dispatcher);
        }
        self.dispatcher.flush();

        self.forwarder.close().map_err(Error::Transport)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Failed to close client cleanly.");
        }
    }
}

fn flush_aggregator(aggregator: &Aggregator, dispatcher: &Dispatcher) {
    let flushed = aggregator.flush();
    debug!(items = flushed.len(), "Flushed aggregator.");
    for item in &flushed {
        dispatcher.dispatch_flushed(item);
    }
}

fn spawn_ticker<F>(name: &str, interval: Duration, stop_rx: Receiver<()>, mut on_tick: F) -> io::Result<JoinHandle<()>>
where
    F: FnMut() + Send + 'static,
{
    std::thread::Builder::new().name(name.to_string()).spawn(move || {
        let ticker = tick(interval);
        loop {
            select! {
                recv(ticker) -> _ => on_tick(),
                recv(stop_rx) -> _ => break,
            }
        }
    })
}

/// A DogStatsD client.
///
/// Samples are validated synchronously, then either merged into the client-side aggregator or encoded into the
/// payload buffer of a worker. Full buffers are sent to the remote server from a background thread. Once a sample has
/// been accepted, any failure further down the pipeline is only reflected in [`DogStatsDClient::telemetry`].
///
/// The client is cheap to clone, and all clones share the same pipeline. The pipeline is closed either explicitly via
/// [`DogStatsDClient::close`], or when the last clone is dropped.
#[derive(Clone)]
pub struct DogStatsDClient {
    inner: Arc<Inner>,
}

impl DogStatsDClient {
    pub(crate) fn start(pipeline: Pipeline, schedule: Schedule) -> io::Result<Self> {
        let Pipeline { aggregator, mut dispatcher, forwarder, telemetry } = pipeline;

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let mut handles = Vec::new();

        if let Some(mode) = schedule.channel_mode {
            handles.extend(dispatcher.start_channels(mode.buffer_size, mode.errors_when_full, &stop_rx)?);
        }

        let dispatcher = Arc::new(dispatcher);
        let aggregator = aggregator.map(Arc::new);

        if let Some(aggregator) = &aggregator {
            let aggregator = Arc::clone(aggregator);
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(spawn_ticker(
                "metrics-dogstatsd-client-aggregator",
                schedule.aggregation_flush_interval,
                stop_rx.clone(),
                move || flush_aggregator(&aggregator, &dispatcher),
            )?);
        }

        let flush_dispatcher = Arc::clone(&dispatcher);
        handles.push(spawn_ticker(
            "metrics-dogstatsd-client-flusher",
            schedule.buffer_flush_interval,
            stop_rx,
            move || flush_dispatcher.flush(),
        )?);

        forwarder.start()?;

        Ok(Self {
            inner: Arc::new(Inner {
                closed: RwLock::new(false),
                aggregator,
                dispatcher,
                forwarder,
                telemetry,
                background: Mutex::new(Some(Background { stop_tx, handles })),
            }),
        })
    }

    fn ensure_open(&self) -> Result<RwLockReadGuard<'_, bool>, Error> {
        let closed = self.inner.closed.read();
        if *closed {
            Err(Error::Closed)
        } else {
            Ok(closed)
        }
    }

    /// Sends a sample.
    ///
    /// # Errors
    ///
    /// If the sample is invalid, or the client is closed, an error is returned. In channel mode, if the worker channel
    /// is full and the client is configured to report it, an error is returned.
    pub fn send<S>(&self, sample: S) -> Result<(), Error>
    where
        S: Into<Sample>,
    {
        let _open = self.ensure_open()?;

        let sample = sample.into();
        sample.validate().map_err(|reason| Error::InvalidSample { reason })?;
        self.inner.telemetry.track_sample(&sample);

        let sample = match (sample, &self.inner.aggregator) {
            (Sample::Metric(metric), Some(aggregator)) => match aggregator.aggregate(metric) {
                Some(metric) => Sample::Metric(metric),
                None => return Ok(()),
            },
            (sample, _) => sample,
        };

        self.inner.dispatcher.dispatch(sample)
    }

    /// Flushes the aggregator and every worker, and waits for all pending payloads to be written.
    ///
    /// # Errors
    ///
    /// If the client is closed, an error is returned.
    pub fn flush(&self) -> Result<(), Error> {
        let _open = self.ensure_open()?;

        if let Some(aggregator) = &self.inner.aggregator {
            flush_aggregator(aggregator, &self.inner.dispatcher);
        }
        self.inner.dispatcher.flush();
        self.inner.forwarder.flush();
        Ok(())
    }

    /// Closes the client.
    ///
    /// Every sample accepted before the call is flushed and written, background threads are stopped, and the transport
    /// is closed. Any further call on this client, or any of its clones, returns [`Error::Closed`]. Closing an already
    /// closed client does nothing.
    ///
    /// # Errors
    ///
    /// If the transport fails to close, an error is returned.
    pub fn close(&self) -> Result<(), Error> {
        self.inner.shutdown()
    }

    /// Returns a snapshot of the client telemetry.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.inner.telemetry.snapshot()
    }

    /// Sets a gauge to the given value.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn gauge(&self, name: &str, value: f64, tags: &[&str], rate: f64) -> Result<(), Error> {
        self.send(MetricSample::gauge(name, value).with_tags(tags.iter().copied()).with_rate(rate))
    }

    /// Sets a gauge to the given value at an explicit point in time, in seconds since the Unix epoch.
    ///
    /// Timestamped samples bypass client-side aggregation.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn gauge_with_timestamp(&self, name: &str, value: f64, tags: &[&str], timestamp: u64) -> Result<(), Error> {
        self.send(MetricSample::gauge(name, value).with_tags(tags.iter().copied()).with_timestamp(timestamp))
    }

    /// Adds the given value to a count.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn count(&self, name: &str, value: i64, tags: &[&str], rate: f64) -> Result<(), Error> {
        self.send(MetricSample::count(name, value).with_tags(tags.iter().copied()).with_rate(rate))
    }

    /// Adds the given value to a count at an explicit point in time, in seconds since the Unix epoch.
    ///
    /// Timestamped samples bypass client-side aggregation.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn count_with_timestamp(&self, name: &str, value: i64, tags: &[&str], timestamp: u64) -> Result<(), Error> {
        self.send(MetricSample::count(name, value).with_tags(tags.iter().copied()).with_timestamp(timestamp))
    }

    /// Increments a count by one.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn incr(&self, name: &str, tags: &[&str], rate: f64) -> Result<(), Error> {
        self.count(name, 1, tags, rate)
    }

    /// Decrements a count by one.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn decr(&self, name: &str, tags: &[&str], rate: f64) -> Result<(), Error> {
        self.count(name, -1, tags, rate)
    }

    /// Adds a value to a set.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn set(&self, name: &str, value: &str, tags: &[&str], rate: f64) -> Result<(), Error> {
        self.send(MetricSample::set(name, value).with_tags(tags.iter().copied()).with_rate(rate))
    }

    /// Records a histogram observation.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn histogram(&self, name: &str, value: f64, tags: &[&str], rate: f64) -> Result<(), Error> {
        self.send(MetricSample::histogram(name, value).with_tags(tags.iter().copied()).with_rate(rate))
    }

    /// Records a distribution observation.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn distribution(&self, name: &str, value: f64, tags: &[&str], rate: f64) -> Result<(), Error> {
        self.send(MetricSample::distribution(name, value).with_tags(tags.iter().copied()).with_rate(rate))
    }

    /// Records a timing observation.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn timing(&self, name: &str, value: Duration, tags: &[&str], rate: f64) -> Result<(), Error> {
        self.send(MetricSample::timing(name, value).with_tags(tags.iter().copied()).with_rate(rate))
    }

    /// Sends an event.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn event(&self, event: Event) -> Result<(), Error> {
        self.send(event)
    }

    /// Sends a service check.
    ///
    /// # Errors
    ///
    /// See [`DogStatsDClient::send`].
    pub fn service_check(&self, check: ServiceCheck) -> Result<(), Error> {
        self.send(check)
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::Error;
    use crate::{builder::DogStatsDBuilder, forwarder::test_util::CapturingTransport, sample::MetricSample};

    #[test]
    fn closed_client_rejects_everything() {
        let transport = CapturingTransport::default();
        let client = DogStatsDBuilder::default().with_transport(transport.clone()).build_client().unwrap();

        client.incr("requests", &[], 1.0).unwrap();
        client.close().unwrap();
        assert!(*transport.closed.lock());
        assert_eq!(transport.payloads(), vec!["requests:1|c\n"]);

        assert!(matches!(client.incr("requests", &[], 1.0), Err(Error::Closed)));
        assert!(matches!(client.flush(), Err(Error::Closed)));
        assert!(client.close().is_ok());
    }

    #[test]
    fn close_races_with_senders() {
        let transport = CapturingTransport::default();
        let client = DogStatsDBuilder::default()
            .with_aggregation_flush_interval(Duration::from_secs(3600))
            .with_transport(transport.clone())
            .build_client()
            .unwrap();

        let senders = (0..4)
            .map(|_| {
                let client = client.clone();
                thread::spawn(move || {
                    let mut accepted = 0i64;
                    while client.incr("requests", &[], 1.0).is_ok() {
                        accepted += 1;
                    }
                    accepted
                })
            })
            .collect::<Vec<_>>();

        thread::sleep(Duration::from_millis(20));
        client.close().unwrap();
        let accepted = senders.into_iter().map(|sender| sender.join().unwrap()).sum::<i64>();

        // Every accepted increment made it into a flushed count.
        let sent = transport
            .payloads()
            .iter()
            .flat_map(|p| p.lines().map(str::to_string).collect::<Vec<_>>())
            .map(|line| line.strip_prefix("requests:").unwrap().strip_suffix("|c").unwrap().parse::<i64>().unwrap())
            .sum::<i64>();
        assert!(accepted > 0);
        assert_eq!(sent, accepted);
    }

    #[test]
    fn invalid_samples_are_rejected() {
        let client = DogStatsDBuilder::default().with_transport(CapturingTransport::default()).build_client().unwrap();

        let result = client.send(MetricSample::count("", 1));
        assert!(matches!(result, Err(Error::InvalidSample { .. })));
        let result = client.count("requests", 1, &[], 2.0);
        assert!(matches!(result, Err(Error::InvalidSample { .. })));
        let result = client.histogram("latency", 1.0, &[], 0.0);
        assert!(matches!(result, Err(Error::InvalidSample { .. })));

        assert_eq!(client.telemetry().metric_points(), 0);
    }

    #[test]
    fn timestamped_samples_are_not_aggregated() {
        let transport = CapturingTransport::default();
        let client = DogStatsDBuilder::default().with_transport(transport.clone()).build_client().unwrap();

        client.gauge_with_timestamp("temp", 1.0, &[], 1_700_000_000).unwrap();
        client.gauge_with_timestamp("temp", 2.0, &[], 1_700_000_001).unwrap();
        client.timing("query", Duration::from_millis(3), &[], 1.0).unwrap();
        client.flush().unwrap();

        let payload = transport.payloads().concat();
        assert!(payload.contains("temp:1|g|T1700000000\n"));
        assert!(payload.contains("temp:2|g|T1700000001\n"));
        assert!(payload.contains("query:3|ms\n"));
        assert_eq!(client.telemetry().aggregated_contexts(), 0);
    }
}
