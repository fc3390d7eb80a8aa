use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread;
use std::time::Duration;

use actionlink_core::ResetSignal;
use actionlink_frame::{FrameConfig, FrameReader};
use actionlink_transport::{pipe_path, validate_pipe_name, IpcStream, UnixDomainSocket};
use tracing::{debug, info, warn};

use crate::config::PipeConfig;
use crate::connection::{Connection, ConnectionEvents};
use crate::error::{PipeError, Result};
use crate::message::PipeMessage;

// Private pipe names are short; anything larger is not a handshake reply.
const MAX_HANDSHAKE_PAYLOAD: usize = 1024;

// Pause between failed reconnect handshakes.
const RETRY_PAUSE: Duration = Duration::from_millis(100);

type MessageCallback<M> = Arc<dyn Fn(M) + Send + Sync>;
type NameCallback = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&PipeError) + Send + Sync>;

/// Connects to a [`PipeServer`](crate::PipeServer) and keeps reconnecting.
///
/// [`start`](Self::start) returns at once; the handshake runs on a
/// background thread. Use [`wait_for_connection_timeout`](Self::wait_for_connection_timeout)
/// to block until it completes.
///
/// At most one connect thread runs per client. With
/// [`PipeConfig::auto_reconnect`] it keeps retrying until it connects or
/// the client is stopped; without it, one failed handshake ends the attempt.
pub struct PipeClient<M: PipeMessage> {
    inner: Arc<ClientInner<M>>,
}

struct ClientInner<M: PipeMessage> {
    me: Weak<ClientInner<M>>,
    pipe_name: String,
    config: PipeConfig,
    connection: Mutex<Option<Arc<Connection<M>>>>,
    dial: Mutex<Dial>,
    attempts: AtomicU64,
    connected: ResetSignal,
    disconnected: ResetSignal,
    events: RwLock<ClientEvents<M>>,
}

#[derive(Debug, Default)]
struct Dial {
    /// Set by `stop`, cleared by `start`.
    closed: bool,
    /// A connect thread is running.
    in_flight: bool,
    /// Bumped by every `start`, so a running connect thread notices restarts.
    generation: u64,
}

struct ClientEvents<M> {
    connected: Option<NameCallback>,
    message: Option<MessageCallback<M>>,
    disconnected: Option<NameCallback>,
    error: Option<ErrorCallback>,
}

impl<M: PipeMessage> PipeClient<M> {
    pub fn new(pipe_name: &str, config: PipeConfig) -> Result<Self> {
        validate_pipe_name(pipe_name)?;
        let inner = Arc::new_cyclic(|me| ClientInner {
            me: me.clone(),
            pipe_name: pipe_name.to_string(),
            config,
            connection: Mutex::new(None),
            dial: Mutex::new(Dial::default()),
            attempts: AtomicU64::new(0),
            connected: ResetSignal::new(),
            disconnected: ResetSignal::new(),
            events: RwLock::new(ClientEvents {
                connected: None,
                message: None,
                disconnected: None,
                error: None,
            }),
        });
        Ok(Self { inner })
    }

    pub fn pipe_name(&self) -> &str {
        &self.inner.pipe_name
    }

    /// Called with the private pipe name after every successful handshake.
    pub fn on_connected<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        self.inner.events_mut().connected = Some(Arc::new(f));
    }

    pub fn on_server_message<F: Fn(M) + Send + Sync + 'static>(&self, f: F) {
        self.inner.events_mut().message = Some(Arc::new(f));
    }

    /// Called with the private pipe name whenever a connection drops.
    pub fn on_disconnected<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        self.inner.events_mut().disconnected = Some(Arc::new(f));
    }

    pub fn on_error<F: Fn(&PipeError) + Send + Sync + 'static>(&self, f: F) {
        self.inner.events_mut().error = Some(Arc::new(f));
    }

    /// Begin connecting in the background. Does nothing while connected.
    pub fn start(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let mut dial = self.inner.dial();
        dial.closed = false;
        dial.generation += 1;
        self.inner.begin_dial(&mut dial)
    }

    /// Close the connection for good; no reconnect follows. A handshake in
    /// progress is abandoned.
    pub fn stop(&self) {
        self.inner.dial().closed = true;
        let connection = self.inner.current();
        if let Some(connection) = connection {
            connection.close();
        }
    }

    /// Queue `message` for the server.
    pub fn push(&self, message: M) -> Result<()> {
        match self.inner.current() {
            Some(connection) => connection.push(message),
            None => Err(PipeError::NotConnected),
        }
    }

    /// Wait up to `timeout` for queued messages to be written. Returns
    /// false if there is no connection or it closed first.
    pub fn drain(&self, timeout: Duration) -> bool {
        self.inner
            .current()
            .is_some_and(|connection| connection.drain(timeout))
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .current()
            .is_some_and(|connection| connection.is_connected())
    }

    /// Private pipe name of the current connection.
    pub fn connection_name(&self) -> Option<String> {
        self.inner.current().map(|c| c.name().to_string())
    }

    /// Handshakes started so far, including automatic reconnects.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    pub fn wait_for_connection(&self) {
        self.inner.connected.wait();
    }

    pub fn wait_for_connection_timeout(&self, timeout: Duration) -> bool {
        self.inner.connected.wait_timeout(timeout)
    }

    pub fn wait_for_disconnection(&self) {
        self.inner.disconnected.wait();
    }

    pub fn wait_for_disconnection_timeout(&self, timeout: Duration) -> bool {
        self.inner.disconnected.wait_timeout(timeout)
    }
}

impl<M: PipeMessage> Drop for PipeClient<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<M: PipeMessage> ClientInner<M> {
    fn events(&self) -> std::sync::RwLockReadGuard<'_, ClientEvents<M>> {
        self.events.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn events_mut(&self) -> std::sync::RwLockWriteGuard<'_, ClientEvents<M>> {
        self.events.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<Connection<M>>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn dial(&self) -> MutexGuard<'_, Dial> {
        self.dial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stopped(&self) -> bool {
        self.dial().closed
    }

    /// Spawn the connect thread unless one is already running.
    fn begin_dial(&self, dial: &mut Dial) -> Result<()> {
        if dial.in_flight || dial.closed {
            return Ok(());
        }
        let Some(me) = self.me.upgrade() else {
            return Err(PipeError::Closed);
        };
        thread::Builder::new()
            .name("actionlink-pipe-connect".to_string())
            .spawn(move || me.dial_loop())
            .map_err(PipeError::Spawn)?;
        dial.in_flight = true;
        Ok(())
    }

    fn dial_loop(&self) {
        let mut reported = false;
        loop {
            let generation = self.dial().generation;
            self.attempts.fetch_add(1, Ordering::AcqRel);
            let outcome = self.handshake();

            let mut dial = self.dial();
            if dial.closed {
                // Dropping the outcome closes a stream that arrived too late.
                dial.in_flight = false;
                return;
            }
            let err = match outcome {
                Ok((data_name, stream)) => {
                    let installed = self.install(data_name, stream);
                    dial.in_flight = false;
                    drop(dial);
                    match installed {
                        Ok(connection) => self.announce(&connection),
                        Err(err) => self.report(&err),
                    }
                    return;
                }
                Err(err) => err,
            };

            // A stop/start pair while the handshake ran interrupts it; retry
            // quietly for the new start.
            let restarted = dial.generation != generation;
            let retry = restarted || self.config.auto_reconnect;
            if !retry {
                dial.in_flight = false;
            }
            drop(dial);

            if !restarted {
                if reported {
                    debug!(pipe = %self.pipe_name, error = %err, "reconnect attempt failed");
                } else {
                    self.report(&err);
                    reported = true;
                }
            }
            if !retry {
                return;
            }
            thread::sleep(RETRY_PAUSE);
        }
    }

    fn install(&self, data_name: String, stream: IpcStream) -> Result<Arc<Connection<M>>> {
        let id = self.attempts.load(Ordering::Acquire);
        let events: Weak<dyn ConnectionEvents<M>> = self.me.clone();
        let mut slot = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let connection =
            Connection::open(id, data_name, stream, self.config.frame.clone(), events)?;
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    fn announce(&self, connection: &Connection<M>) {
        let name = connection.name().to_string();
        info!(pipe = %self.pipe_name, connection = %name, "connected to pipe server");
        self.connected.set();
        let callback = self.events().connected.clone();
        if let Some(callback) = callback {
            callback(&name);
        }
    }

    /// Read our private pipe name from the handshake pipe, then connect to it.
    fn handshake(&self) -> Result<(String, IpcStream)> {
        let keep_trying = || !self.stopped();
        let timeout = self.config.connect_timeout;

        let stream =
            UnixDomainSocket::connect_with_retry(pipe_path(&self.pipe_name)?, timeout, keep_trying)?;
        let handshake_frames = FrameConfig {
            max_payload_size: MAX_HANDSHAKE_PAYLOAD,
            read_timeout: Some(self.config.handshake_timeout),
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config_ipc(stream, handshake_frames)?;
        let payload = reader.read_frame()?.ok_or_else(|| {
            PipeError::HandshakeFailed("server closed the handshake pipe without a reply".into())
        })?;
        drop(reader);

        let data_name = String::from_utf8(payload.to_vec())
            .map_err(|_| PipeError::HandshakeFailed("data pipe name is not UTF-8".into()))?;
        validate_pipe_name(&data_name)?;
        debug!(pipe = %self.pipe_name, data_pipe = %data_name, "handshake complete");

        let data =
            UnixDomainSocket::connect_with_retry(pipe_path(&data_name)?, timeout, keep_trying)?;
        Ok((data_name, data))
    }

    fn report(&self, err: &PipeError) {
        warn!(pipe = %self.pipe_name, error = %err, "pipe client error");
        let callback = self.events().error.clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }
}

impl<M: PipeMessage> ConnectionEvents<M> for ClientInner<M> {
    fn on_message(&self, _connection: &Connection<M>, message: M) {
        let callback = self.events().message.clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    fn on_disconnected(&self, connection: &Arc<Connection<M>>) {
        {
            let mut current = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, connection)) {
                *current = None;
            }
        }
        info!(pipe = %self.pipe_name, connection = %connection.name(), "disconnected from pipe server");

        let callback = self.events().disconnected.clone();
        if let Some(callback) = callback {
            callback(connection.name());
        }
        self.disconnected.set();

        if self.config.auto_reconnect {
            let started = {
                let mut dial = self.dial();
                if !dial.closed {
                    debug!(pipe = %self.pipe_name, "reconnecting");
                }
                self.begin_dial(&mut dial)
            };
            if let Err(err) = started {
                self.report(&err);
            }
        }
    }

    fn on_error(&self, _connection: &Connection<M>, err: PipeError) {
        self.report(&err);
    }
}
