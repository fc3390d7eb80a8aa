use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use actionlink_frame::{FrameConfig, FrameReader, FrameWriter};
use actionlink_transport::IpcStream;
use tracing::{debug, trace, warn};

use crate::error::{PipeError, Result};
use crate::message::PipeMessage;

/// Receives what happens on a [`Connection`]. Implemented by the server and
/// the client that own it.
pub(crate) trait ConnectionEvents<M: PipeMessage>: Send + Sync {
    fn on_message(&self, connection: &Connection<M>, message: M);

    /// Called exactly once per connection, from one of its worker threads.
    fn on_disconnected(&self, connection: &Arc<Connection<M>>);

    fn on_error(&self, connection: &Connection<M>, err: PipeError);
}

enum Outgoing<M> {
    Message(M),
    Close,
}

/// One live data pipe.
///
/// A reader thread decodes incoming frames and a writer thread drains an
/// ordered queue of outgoing messages, writing one at a time. Both end when
/// the pipe closes from either side.
pub struct Connection<M: PipeMessage> {
    id: u64,
    name: String,
    stream: IpcStream,
    queue: Sender<Outgoing<M>>,
    pending: Mutex<usize>,
    drained: Condvar,
    closed: AtomicBool,
    notified: AtomicBool,
    events: Weak<dyn ConnectionEvents<M>>,
}

impl<M: PipeMessage> Connection<M> {
    /// Wrap an established stream and start its worker threads.
    pub(crate) fn open(
        id: u64,
        name: String,
        stream: IpcStream,
        frame: FrameConfig,
        events: Weak<dyn ConnectionEvents<M>>,
    ) -> Result<Arc<Self>> {
        let reader = FrameReader::with_config_ipc(stream.try_clone()?, frame.clone())?;
        let writer = FrameWriter::with_config_ipc(stream.try_clone()?, frame)?;
        let (queue, outgoing) = mpsc::channel();

        let connection = Arc::new(Self {
            id,
            name,
            stream,
            queue,
            pending: Mutex::new(0),
            drained: Condvar::new(),
            closed: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            events,
        });

        let read_side = Arc::clone(&connection);
        thread::Builder::new()
            .name(format!("actionlink-pipe-read-{id}"))
            .spawn(move || read_side.read_loop(reader))
            .map_err(PipeError::Spawn)?;

        let write_side = Arc::clone(&connection);
        if let Err(err) = thread::Builder::new()
            .name(format!("actionlink-pipe-write-{id}"))
            .spawn(move || write_side.write_loop(writer, outgoing))
        {
            connection.close();
            return Err(PipeError::Spawn(err));
        }

        debug!(connection = %connection.name, "connection opened");
        Ok(connection)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the private data pipe this connection runs on.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Queue `message` for sending. Never blocks.
    pub fn push(&self, message: M) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipeError::Closed);
        }
        *self.pending() += 1;
        if self.queue.send(Outgoing::Message(message)).is_err() {
            self.written();
            return Err(PipeError::Closed);
        }
        Ok(())
    }

    /// Block until every queued message has been written, the connection
    /// closes, or `timeout` passes. Returns whether the queue drained.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending();
        while *pending > 0 {
            let now = Instant::now();
            if !self.is_connected() || now >= deadline {
                return false;
            }
            pending = self
                .drained
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Close the pipe. Both worker threads wind down and the owner is told
    /// the connection is gone.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(connection = %self.name, "closing connection");
        if let Err(err) = self.stream.shutdown() {
            debug!(connection = %self.name, error = %err, "pipe shutdown failed");
        }
        let _ = self.queue.send(Outgoing::Close);
        let _pending = self.pending();
        self.drained.notify_all();
    }

    fn pending(&self) -> MutexGuard<'_, usize> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn written(&self) {
        let mut pending = self.pending();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    fn read_loop(self: Arc<Self>, mut reader: FrameReader<IpcStream>) {
        loop {
            match reader.read_frame() {
                Ok(Some(payload)) => match M::from_payload(payload) {
                    Ok(message) => {
                        if let Some(events) = self.events.upgrade() {
                            events.on_message(&self, message);
                        }
                    }
                    Err(err) => self.report(err),
                },
                Ok(None) => {
                    trace!(connection = %self.name, "peer closed pipe");
                    break;
                }
                Err(err) if !err.is_fatal() => self.report(err.into()),
                Err(err) => {
                    if self.is_connected() {
                        self.report(err.into());
                    }
                    break;
                }
            }
        }
        self.finish();
    }

    fn write_loop(
        self: Arc<Self>,
        mut writer: FrameWriter<IpcStream>,
        outgoing: Receiver<Outgoing<M>>,
    ) {
        for item in outgoing {
            let message = match item {
                Outgoing::Message(message) => message,
                Outgoing::Close => break,
            };
            let result = writer.write_frame(&message.to_payload());
            self.written();
            if let Err(err) = result {
                let fatal = err.is_fatal();
                if self.is_connected() {
                    self.report(err.into());
                }
                if fatal {
                    break;
                }
            }
        }
        self.finish();
    }

    fn report(&self, err: PipeError) {
        warn!(connection = %self.name, error = %err, "pipe connection error");
        if let Some(events) = self.events.upgrade() {
            events.on_error(self, err);
        }
    }

    fn finish(self: &Arc<Self>) {
        self.close();
        if self.notified.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(connection = %self.name, "connection disconnected");
        if let Some(events) = self.events.upgrade() {
            events.on_disconnected(self);
        }
    }
}

impl<M: PipeMessage> std::fmt::Debug for Connection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}
