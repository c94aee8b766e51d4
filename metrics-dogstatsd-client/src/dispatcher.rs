use std::{io, sync::Arc, thread::JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tracing::debug;

use crate::{aggregator::Flushed, client::Error, sample::Sample, telemetry::Telemetry, worker::Worker};

/// Routes samples to workers.
///
/// A sample always goes to the same worker for a given name, so that lines for a given metric stay ordered. In mutex
/// mode, the caller encodes the sample itself under the worker lock. In channel mode, the sample is queued onto a
/// per-worker channel and encoded by a dedicated receiver thread, trading latency for a caller that never blocks.
pub(crate) struct Dispatcher {
    workers: Vec<Arc<Worker>>,
    hasher: ahash::RandomState,
    channels: Option<Vec<Sender<Sample>>>,
    channel_errors_when_full: bool,
    telemetry: Arc<Telemetry>,
}

impl Dispatcher {
    /// Creates a new `Dispatcher` in mutex mode.
    pub fn new(workers: Vec<Arc<Worker>>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            workers,
            hasher: ahash::RandomState::new(),
            channels: None,
            channel_errors_when_full: false,
            telemetry,
        }
    }

    /// Switches the dispatcher to channel mode, spawning one receiver thread per worker.
    ///
    /// Receivers run until `stop_rx` is signalled, at which point they encode whatever is still queued and exit.
    ///
    /// # Errors
    ///
    /// If a receiver thread cannot be spawned, an error is returned.
    pub fn start_channels(
        &mut self,
        buffer_size: usize,
        errors_when_full: bool,
        stop_rx: &Receiver<()>,
    ) -> io::Result<Vec<JoinHandle<()>>> {
        let mut channels = Vec::with_capacity(self.workers.len());
        let mut handles = Vec::with_capacity(self.workers.len());

        for (shard, worker) in self.workers.iter().enumerate() {
            let (samples_tx, samples_rx) = bounded(buffer_size);
            let worker = Arc::clone(worker);
            let stop_rx = stop_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("metrics-dogstatsd-client-receiver-{}", shard))
                .spawn(move || run_receiver(&worker, &samples_rx, &stop_rx))?;

            channels.push(samples_tx);
            handles.push(handle);
        }

        self.channels = Some(channels);
        self.channel_errors_when_full = errors_when_full;
        Ok(handles)
    }

    fn route(&self, name: &str) -> usize {
        (self.hasher.hash_one(name) % self.workers.len() as u64) as usize
    }

    /// Routes an application sample to its worker.
    ///
    /// # Errors
    ///
    /// In channel mode, if the worker channel is full and the dispatcher is configured to report it, an error is
    /// returned. If the receivers have already shut down, an error is returned.
    pub fn dispatch(&self, sample: Sample) -> Result<(), Error> {
        let shard = self.route(sample.routing_name());

        let Some(channels) = &self.channels else {
            self.workers[shard].process(&sample);
            return Ok(());
        };

        match channels[shard].try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.telemetry.track_sample_dropped_channel();
                if self.channel_errors_when_full {
                    Err(Error::ChannelFull)
                } else {
                    Ok(())
                }
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::Closed),
        }
    }

    /// Routes an aggregator flush output to its worker.
    ///
    /// This always encodes directly under the worker lock, even in channel mode, so merged values are never dropped
    /// because of a full channel.
    pub fn dispatch_flushed(&self, item: &Flushed) {
        let name = match item {
            Flushed::Metric(sample) => sample.name(),
            Flushed::Aggregated(aggregated) => aggregated.context.name.as_str(),
        };
        self.workers[self.route(name)].process_flushed(item);
    }

    /// Flushes every worker.
    pub fn flush(&self) {
        for worker in &self.workers {
            worker.flush();
        }
    }
}

fn run_receiver(worker: &Worker, samples_rx: &Receiver<Sample>, stop_rx: &Receiver<()>) {
    loop {
        select! {
            recv(samples_rx) -> sample => match sample {
                Ok(sample) => worker.process(&sample),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }

    let mut drained = 0;
    for sample in samples_rx.try_iter() {
        worker.process(&sample);
        drained += 1;
    }
    debug!(drained, "Receiver stopped.");
}
