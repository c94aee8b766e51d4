use std::{io, sync::Arc, thread::JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

use crate::{pool::BufferPool, telemetry::Telemetry, writer::WireBuffer};

mod transport;
pub(crate) use self::transport::RemoteAddr;
pub use self::transport::{SocketTransport, Transport};

enum Command {
    Payload(WireBuffer),
    Flush(Sender<()>),
}

struct Running {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Sends filled buffers to the transport from a background thread.
///
/// Buffers are queued without blocking. When the queue is full, the buffer is dropped and accounted for in telemetry.
/// Every buffer goes back to the pool once it has been written or dropped.
pub(crate) struct Forwarder {
    queue_tx: Sender<Command>,
    queue_rx: Receiver<Command>,
    transport: Mutex<Box<dyn Transport>>,
    running: RwLock<Option<Running>>,
    pool: Arc<BufferPool>,
    telemetry: Arc<Telemetry>,
}

impl Forwarder {
    /// Creates a new `Forwarder`.
    ///
    /// The background thread is not started until [`Forwarder::start`] is called. Until then, queued buffers are only
    /// written by [`Forwarder::flush`].
    pub fn new(
        transport: Box<dyn Transport>,
        queue_size: usize,
        pool: Arc<BufferPool>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let (queue_tx, queue_rx) = bounded(queue_size);
        Self {
            queue_tx,
            queue_rx,
            transport: Mutex::new(transport),
            running: RwLock::new(None),
            pool,
            telemetry,
        }
    }

    /// Spawns the background thread.
    ///
    /// # Errors
    ///
    /// If the thread cannot be spawned, an error is returned.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let forwarder = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("metrics-dogstatsd-client-forwarder".to_string())
            .spawn(move || forwarder.run(&stop_rx))?;

        *self.running.write() = Some(Running { stop_tx, handle });
        Ok(())
    }

    fn run(&self, stop_rx: &Receiver<()>) {
        debug!(transport = self.transport.lock().transport_id(), "Forwarder started.");

        loop {
            select! {
                recv(self.queue_rx) -> command => match command {
                    Ok(command) => self.process(command),
                    Err(_) => break,
                },
                recv(stop_rx) -> _ => break,
            }
        }

        debug!("Forwarder stopped.");
    }

    fn process(&self, command: Command) {
        match command {
            Command::Payload(buffer) => self.write_payload(buffer),
            Command::Flush(ack_tx) => {
                let _ = ack_tx.send(());
            }
        }
    }

    fn write_payload(&self, buffer: WireBuffer) {
        if !buffer.is_empty() {
            let payload = buffer.as_bytes();
            let result = self.transport.lock().write(payload);
            match result {
                Ok(_) => {
                    trace!(payload_len = payload.len(), elements = buffer.element_count(), "Sent payload.");
                    self.telemetry.track_payload_sent(payload.len());
                }
                Err(e) => {
                    error!(error = %e, payload_len = payload.len(), "Failed to send payload.");
                    self.telemetry.track_payload_dropped_writer(payload.len());
                }
            }
        }

        self.pool.put(buffer);
    }

    /// Queues a buffer to be written.
    pub fn send(&self, buffer: WireBuffer) {
        if let Err(e) = self.queue_tx.try_send(Command::Payload(buffer)) {
            if let Command::Payload(buffer) = e.into_inner() {
                debug!(payload_len = buffer.len(), "Forwarder queue full, dropping payload.");
                self.telemetry.track_payload_dropped_queue(buffer.len());
                self.pool.put(buffer);
            }
        }
    }

    /// Blocks until every buffer queued before the call has been written.
    pub fn flush(&self) {
        {
            let running = self.running.read();
            if running.is_some() {
                let (ack_tx, ack_rx) = bounded(1);
                if self.queue_tx.send(Command::Flush(ack_tx)).is_ok() && ack_rx.recv().is_ok() {
                    return;
                }
            }
        }

        // No background thread to rely on, so do the work here.
        self.drain();
    }

    fn drain(&self) {
        while let Ok(command) = self.queue_rx.try_recv() {
            self.process(command);
        }
    }

    /// Writes out everything queued, stops the background thread, and closes the transport.
    ///
    /// # Errors
    ///
    /// If the transport fails to close, an error is returned.
    pub fn close(&self) -> io::Result<()> {
        self.flush();

        let running = self.running.write().take();
        if let Some(Running { stop_tx, handle }) = running {
            drop(stop_tx);
            if handle.join().is_err() {
                error!("Forwarder thread panicked.");
            }
        }

        self.drain();
        self.transport.lock().close()
    }
}
