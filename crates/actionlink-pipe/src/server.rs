use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use actionlink_frame::{FrameConfig, FrameWriter};
use actionlink_transport::{pipe_path, validate_pipe_name, IpcStream, UnixDomainSocket};
use tracing::{debug, info, warn};

use crate::config::PipeConfig;
use crate::connection::{Connection, ConnectionEvents};
use crate::error::{PipeError, Result};
use crate::message::PipeMessage;

type ConnectionCallback<M> = Arc<dyn Fn(&Connection<M>) + Send + Sync>;
type MessageCallback<M> = Arc<dyn Fn(&Connection<M>, M) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&PipeError) + Send + Sync>;

/// Accepts any number of clients on a well-known pipe name.
///
/// Each client first connects to the well-known *handshake* pipe, receives
/// the name of a private data pipe (`<name>_<n>`) as a single frame, and then
/// talks to the server only over that private pipe. The handshake pipe is
/// thereby freed for the next client straight away.
pub struct PipeServer<M: PipeMessage> {
    inner: Arc<ServerInner<M>>,
}

struct ServerInner<M: PipeMessage> {
    me: Weak<ServerInner<M>>,
    pipe_name: String,
    config: PipeConfig,
    connections: Mutex<Vec<Arc<Connection<M>>>>,
    next_id: AtomicU64,
    keep_running: AtomicBool,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    events: RwLock<ServerEvents<M>>,
}

struct ServerEvents<M: PipeMessage> {
    connected: Option<ConnectionCallback<M>>,
    message: Option<MessageCallback<M>>,
    disconnected: Option<ConnectionCallback<M>>,
    error: Option<ErrorCallback>,
}

impl<M: PipeMessage> PipeServer<M> {
    /// Create a server for `pipe_name`. Nothing is bound until [`start`](Self::start).
    pub fn new(pipe_name: &str, config: PipeConfig) -> Result<Self> {
        validate_pipe_name(pipe_name)?;
        // Every private pipe name derived from this one must be valid too.
        validate_pipe_name(&format!("{pipe_name}_{}", u64::MAX))?;

        let inner = Arc::new_cyclic(|me| ServerInner {
            me: me.clone(),
            pipe_name: pipe_name.to_string(),
            config,
            connections: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            keep_running: AtomicBool::new(false),
            acceptor: Mutex::new(None),
            events: RwLock::new(ServerEvents {
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

    pub fn on_client_connected<F>(&self, f: F)
    where
        F: Fn(&Connection<M>) + Send + Sync + 'static,
    {
        self.inner.events_mut().connected = Some(Arc::new(f));
    }

    pub fn on_client_message<F>(&self, f: F)
    where
        F: Fn(&Connection<M>, M) + Send + Sync + 'static,
    {
        self.inner.events_mut().message = Some(Arc::new(f));
    }

    pub fn on_client_disconnected<F>(&self, f: F)
    where
        F: Fn(&Connection<M>) + Send + Sync + 'static,
    {
        self.inner.events_mut().disconnected = Some(Arc::new(f));
    }

    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&PipeError) + Send + Sync + 'static,
    {
        self.inner.events_mut().error = Some(Arc::new(f));
    }

    /// Bind the handshake pipe and start accepting clients in the background.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut acceptor = inner.acceptor.lock().unwrap_or_else(PoisonError::into_inner);
        if acceptor.is_some() {
            return Ok(());
        }

        let listener = UnixDomainSocket::bind(pipe_path(&inner.pipe_name)?)?;
        inner.keep_running.store(true, Ordering::Release);

        let worker = Arc::clone(inner);
        let handle = thread::Builder::new()
            .name("actionlink-pipe-accept".to_string())
            .spawn(move || worker.accept_loop(listener))
            .map_err(|err| {
                inner.keep_running.store(false, Ordering::Release);
                PipeError::Spawn(err)
            })?;
        *acceptor = Some(handle);

        info!(pipe = %inner.pipe_name, "pipe server started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.keep_running.load(Ordering::Acquire)
    }

    /// Queue `message` for every client connected right now.
    pub fn broadcast(&self, message: M) {
        for connection in self.inner.connections().iter() {
            if let Err(err) = connection.push(message.clone()) {
                debug!(
                    connection = %connection.name(),
                    error = %err,
                    "broadcast skipped closed connection"
                );
            }
        }
    }

    /// Wait up to `timeout` for every connection's queued messages to be
    /// written. Returns whether all of them drained.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let connections = self.inner.connections().clone();
        connections.iter().fold(true, |all, connection| {
            let left = deadline.saturating_duration_since(Instant::now());
            connection.drain(left) && all
        })
    }

    /// Queue `message` for the client on the private pipe `name`.
    pub fn send_to(&self, message: M, name: &str) -> Result<()> {
        let connections = self.inner.connections();
        let connection = connections
            .iter()
            .find(|c| c.name() == name)
            .ok_or(PipeError::NotConnected)?;
        connection.push(message)
    }

    /// Close the connection to one client. Returns whether it was connected.
    pub fn disconnect_client(&self, name: &str) -> bool {
        let connections = self.inner.connections();
        match connections.iter().find(|c| c.name() == name) {
            Some(connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    /// Private pipe names of the connected clients.
    pub fn connection_names(&self) -> Vec<String> {
        self.inner
            .connections()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections().len()
    }

    /// Disconnect every client and stop accepting new ones.
    pub fn stop(&self) {
        let inner = &self.inner;
        if !inner.keep_running.swap(false, Ordering::AcqRel) {
            return;
        }

        for connection in inner.connections().iter() {
            connection.close();
        }

        // The acceptor may be parked in a blocking accept on the handshake
        // pipe; a throwaway connection lets it notice the stop.
        if let Ok(path) = pipe_path(&inner.pipe_name) {
            if let Err(err) = UnixDomainSocket::connect(&path) {
                debug!(error = %err, "wake-up connection failed; acceptor already gone");
            }
        }

        let handle = inner
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!(pipe = %inner.pipe_name, "pipe acceptor thread panicked");
            }
        }
        info!(pipe = %inner.pipe_name, "pipe server stopped");
    }
}

impl<M: PipeMessage> Drop for PipeServer<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<M: PipeMessage> ServerInner<M> {
    fn connections(&self) -> MutexGuard<'_, Vec<Arc<Connection<M>>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn events(&self) -> std::sync::RwLockReadGuard<'_, ServerEvents<M>> {
        self.events.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn events_mut(&self) -> std::sync::RwLockWriteGuard<'_, ServerEvents<M>> {
        self.events.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
    }

    fn accept_loop(self: Arc<Self>, listener: UnixDomainSocket) {
        debug!(pipe = %self.pipe_name, "acceptor running");
        while self.running() {
            let stream = match listener.accept() {
                Ok(stream) => stream,
                Err(err) => {
                    if self.running() {
                        self.report(&PipeError::from(err));
                        thread::sleep(Duration::from_millis(10));
                    }
                    continue;
                }
            };
            if !self.running() {
                break;
            }
            if let Err(err) = self.hand_off(stream) {
                if self.running() {
                    self.report(&err);
                }
            }
        }
        debug!(pipe = %self.pipe_name, "acceptor exited");
    }

    /// Give the client on `handshake` its own data pipe and wait for it there.
    fn hand_off(&self, handshake: IpcStream) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let data_name = format!("{}_{}", self.pipe_name, id);

        // Bind before naming it so the client never finds it missing.
        let data_listener = UnixDomainSocket::bind(pipe_path(&data_name)?)?;

        let handshake_frames = FrameConfig {
            write_timeout: Some(self.config.handshake_timeout),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config_ipc(handshake, handshake_frames)?;
        writer.write_frame(data_name.as_bytes())?;
        drop(writer);

        let stream =
            data_listener.accept_timeout(self.config.data_accept_timeout, || self.running())?;
        drop(data_listener);

        // Registered before its reader can deliver anything, so a handler
        // answering the first message already sees this client.
        let events: Weak<dyn ConnectionEvents<M>> = self.me.clone();
        let connection = {
            let mut connections = self.connections();
            let connection =
                Connection::open(id, data_name, stream, self.config.frame.clone(), events)?;
            connections.push(Arc::clone(&connection));
            connection
        };

        // A stop that raced this hand-off must not leave the client behind.
        if !self.running() {
            connection.close();
            return Ok(());
        }

        info!(connection = %connection.name(), "client connected");
        let callback = self.events().connected.clone();
        if let Some(callback) = callback {
            callback(&connection);
        }
        Ok(())
    }

    fn report(&self, err: &PipeError) {
        warn!(pipe = %self.pipe_name, error = %err, "pipe server error");
        let callback = self.events().error.clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }
}

impl<M: PipeMessage> ConnectionEvents<M> for ServerInner<M> {
    fn on_message(&self, connection: &Connection<M>, message: M) {
        let callback = self.events().message.clone();
        if let Some(callback) = callback {
            callback(connection, message);
        }
    }

    fn on_disconnected(&self, connection: &Arc<Connection<M>>) {
        self.connections().retain(|c| !Arc::ptr_eq(c, connection));
        info!(connection = %connection.name(), "client disconnected");

        let callback = self.events().disconnected.clone();
        if let Some(callback) = callback {
            callback(connection);
        }
    }

    fn on_error(&self, _connection: &Connection<M>, err: PipeError) {
        self.report(&err);
    }
}

#[cfg(test)]
mod tests {
    use actionlink_frame::FrameReader;

    use super::*;

    fn unique_name(tag: &str) -> String {
        format!(
            "srv-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
                % 1_000_000_000
        )
    }

    #[test]
    fn rejects_names_that_cannot_carry_a_suffix() {
        assert!(PipeServer::<String>::new("bad/name", PipeConfig::default()).is_err());
        assert!(PipeServer::<String>::new(&"x".repeat(60), PipeConfig::default()).is_err());
    }

    #[test]
    fn handshake_pipe_names_a_private_pipe() {
        let name = unique_name("hs");
        let server = PipeServer::<String>::new(&name, PipeConfig::default()).unwrap();
        server.start().unwrap();

        let stream = UnixDomainSocket::connect(pipe_path(&name).unwrap()).unwrap();
        let mut reader = FrameReader::new(stream);
        let private = reader.read_frame().unwrap().unwrap();
        assert_eq!(private.as_ref(), format!("{name}_1").as_bytes());
        assert!(
            reader.read_frame().unwrap().is_none(),
            "handshake pipe closes after one frame"
        );

        let _data = UnixDomainSocket::connect(pipe_path(&format!("{name}_1")).unwrap()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while server.connection_count() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(server.connection_names(), vec![format!("{name}_1")]);

        server.stop();
        assert!(!server.is_running());
        assert!(!pipe_path(&name).unwrap().exists());
    }

    #[test]
    fn client_that_never_opens_its_data_pipe_is_dropped() {
        let name = unique_name("noshow");
        let config = PipeConfig {
            data_accept_timeout: Duration::from_millis(50),
            ..PipeConfig::default()
        };
        let server = PipeServer::<String>::new(&name, config).unwrap();
        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = Arc::clone(&errors);
            server.on_error(move |err| errors.lock().unwrap().push(err.to_string()));
        }
        server.start().unwrap();

        let stream = UnixDomainSocket::connect(pipe_path(&name).unwrap()).unwrap();
        let mut reader = FrameReader::new(stream);
        let private = reader.read_frame().unwrap().unwrap();
        let private = String::from_utf8(private.to_vec()).unwrap();

        thread::sleep(Duration::from_millis(200));
        assert_eq!(server.connection_count(), 0);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(!pipe_path(&private).unwrap().exists());

        server.stop();
    }

    #[test]
    fn stop_without_clients_returns() {
        let name = unique_name("idle");
        let server = PipeServer::<String>::new(&name, PipeConfig::default()).unwrap();
        server.start().unwrap();
        server.start().unwrap();

        let started = std::time::Instant::now();
        server.stop();
        server.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
