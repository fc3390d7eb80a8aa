use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use actionlink_core::{
    encode, Action, Channel, Dispatcher, Hooks, LinkError, Message, ResetSignal, Result, Role,
    StateFlag,
};
use actionlink_transport::{LockGuard, NamedLock, TransportError};
use tracing::{debug, info, trace, warn};

use crate::config::FileChannelConfig;
use crate::paths::ChannelPaths;

/// Action channel over a pair of shared files.
///
/// Dropping the channel stops it. A server also removes the named lock when
/// it stops, so each key's lock lives only as long as its server.
pub struct FileChannel {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    role: Role,
    paths: ChannelPaths,
    config: FileChannelConfig,
    // Reopened on every connect; a stopping server unlinks the name.
    lock: Mutex<Arc<NamedLock>>,
    dispatcher: Arc<Dispatcher>,
    active: AtomicBool,
    live: StateFlag,
    wake: ResetSignal,
}

enum Poll {
    Text(String),
    Missing,
    Busy,
}

impl FileChannel {
    /// Open the named lock for `paths`. Nothing touches the filesystem until
    /// [`connect`](Channel::connect).
    pub fn new(paths: ChannelPaths, role: Role, config: FileChannelConfig) -> Result<Self> {
        Self::with_hooks(paths, role, config, Hooks::new())
    }

    /// Like [`new`](Self::new), reporting through existing `hooks`.
    pub fn with_hooks(
        paths: ChannelPaths,
        role: Role,
        config: FileChannelConfig,
        hooks: Hooks,
    ) -> Result<Self> {
        let lock = NamedLock::open(paths.lock_key()).map_err(|err| {
            LinkError::resource(format!("failed to open lock '{}'", paths.lock_key()), err)
        })?;
        debug!(%role, inbound = ?paths.inbound(role), "file channel created");

        Ok(Self {
            shared: Arc::new(Shared {
                role,
                paths,
                config,
                lock: Mutex::new(Arc::new(lock)),
                dispatcher: Arc::new(Dispatcher::new(hooks)),
                active: AtomicBool::new(false),
                live: StateFlag::new(false),
                wake: ResetSignal::new(),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn paths(&self) -> &ChannelPaths {
        &self.shared.paths
    }

    fn start_worker(&self) -> Result<()> {
        self.join_worker();
        self.shared.wake.reset();
        self.shared.active.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("actionlink-file-poll".to_string())
            .spawn(move || shared.poll_loop())
            .map_err(|err| {
                self.shared.active.store(false, Ordering::Release);
                LinkError::resource("failed to spawn poll thread", err)
            })?;

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stop and join the poll loop. Returns false if it was not running.
    fn halt_worker(&self) -> bool {
        let was_active = self.shared.active.swap(false, Ordering::AcqRel);
        if was_active {
            self.shared.wake.set();
        }
        self.join_worker();
        was_active
    }

    /// Join a poll loop that has been told to stop or stopped on its own.
    fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // A handler may stop the channel from the poll thread itself.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("file poll thread panicked");
            }
        }
    }
}

impl Channel for FileChannel {
    fn role(&self) -> Role {
        self.shared.role
    }

    fn connect(&self, timeout: Duration) -> Result<bool> {
        let shared = &self.shared;
        if shared.active.load(Ordering::Acquire) {
            return Ok(self.is_connected() || shared.role == Role::Server);
        }

        shared.reopen_lock()?;
        {
            let lock = shared.lock_handle();
            let _guard = shared.acquire(&lock)?;
            match shared.role {
                Role::Server => {
                    create_if_missing(shared.paths.server_to_client())?;
                    create_if_missing(shared.paths.client_to_server())?;
                }
                Role::Client => {
                    let present = shared.paths.server_to_client().exists()
                        && shared.paths.client_to_server().exists();
                    if !present {
                        shared.hooks().log("no server files; nothing to connect to");
                        return Ok(false);
                    }
                }
            }
        }

        self.start_worker()?;

        if shared.role == Role::Client {
            shared.live.set(false);
            if let Err(err) = shared.append(Action::Handshake, &[]) {
                self.halt_worker();
                return Err(err);
            }
            if !shared.live.wait_for(true, timeout) {
                shared
                    .hooks()
                    .log(&format!("no handshake from server within {timeout:?}"));
                self.halt_worker();
                shared.withdraw_handshake();
                return Ok(false);
            }
        }

        info!(role = %shared.role, "file channel connected");
        Ok(true)
    }

    fn send(&self, action: Action, params: &[&str]) -> Result<()> {
        if !self.shared.active.load(Ordering::Acquire) {
            return Err(LinkError::NotConnected);
        }
        self.shared.append(action, params)
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    fn is_connected(&self) -> bool {
        self.shared.live.get()
    }

    fn stop(&self) -> Result<()> {
        if !self.halt_worker() {
            return Ok(());
        }

        let result = self.shared.teardown();
        info!(role = %self.shared.role, "file channel stopped");
        result
    }
}

impl Drop for FileChannel {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            debug!(error = %err, "stop on drop failed");
        }
        // A server that never connected still created the lock.
        if self.shared.role == Role::Server {
            if let Err(err) = NamedLock::remove(self.shared.paths.lock_key()) {
                debug!(error = %err, "lock removal on drop failed");
            }
        }
    }
}

impl Shared {
    fn hooks(&self) -> &Hooks {
        self.dispatcher.hooks()
    }

    fn lock_handle(&self) -> Arc<NamedLock> {
        Arc::clone(&self.lock.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn reopen_lock(&self) -> Result<()> {
        let key = self.paths.lock_key();
        let lock = NamedLock::open(key)
            .map_err(|err| LinkError::resource(format!("failed to open lock '{key}'"), err))?;
        *self.lock.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(lock);
        Ok(())
    }

    fn acquire<'a>(&self, lock: &'a NamedLock) -> Result<LockGuard<'a>> {
        lock.acquire(self.config.lock_timeout)
            .map_err(|err| lock_error(err, self.config.lock_timeout))
    }

    /// Undo what connect set up. The server deletes both files and the lock
    /// name; the client says goodbye.
    fn teardown(&self) -> Result<()> {
        let result = match self.role {
            Role::Server => {
                let files = {
                    let lock = self.lock_handle();
                    self.acquire(&lock).and_then(|_guard| {
                        remove_if_present(self.paths.server_to_client())?;
                        remove_if_present(self.paths.client_to_server())
                    })
                };
                let key = self.paths.lock_key();
                let unlinked = NamedLock::remove(key).map_err(|err| {
                    LinkError::resource(format!("failed to remove lock '{key}'"), err)
                });
                files.and(unlinked)
            }
            Role::Client => self.append(Action::Disconnect, &[]),
        };
        self.live.set(false);
        result
    }

    /// Take back an unanswered handshake so a later server does not echo it
    /// to whichever client comes next. Lines other than handshakes stay.
    fn withdraw_handshake(&self) {
        let path = self.paths.outbound(self.role);
        let handshake = encode::<&str>(Action::Handshake, &[]);
        let lock = self.lock_handle();
        let withdrawn = self.acquire(&lock).and_then(|_guard| {
            let text = fs::read_to_string(path).map_err(|err| {
                LinkError::resource(format!("failed to read {}", path.display()), err)
            })?;
            let only_handshakes = text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .all(|line| line == handshake);
            if only_handshakes && !text.is_empty() {
                fs::write(path, "").map_err(|err| {
                    LinkError::resource(format!("failed to clear {}", path.display()), err)
                })?;
            }
            Ok(())
        });
        if let Err(err) = withdrawn {
            debug!(error = %err, "could not withdraw handshake");
        }
    }

    fn append(&self, action: Action, params: &[&str]) -> Result<()> {
        self.hooks().log(&format!(
            "Sending action: {action} with {} parameters",
            params.len()
        ));
        let line = encode(action, params);
        let path = self.paths.outbound(self.role);

        let lock = self.lock_handle();
        let _guard = self.acquire(&lock)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|err| LinkError::resource(format!("failed to open {}", path.display()), err))?;
        writeln!(file, "{line}")
            .map_err(|err| LinkError::resource(format!("failed to write {}", path.display()), err))
    }

    fn poll_loop(self: Arc<Self>) {
        debug!(role = %self.role, "poll loop started");
        while self.active.load(Ordering::Acquire) {
            self.wake.wait_timeout(self.config.poll_interval);
            if !self.active.load(Ordering::Acquire) {
                break;
            }

            match self.poll_once() {
                Ok(Poll::Text(text)) => {
                    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                        match Message::decode(line) {
                            Ok(message) => self.handle(message),
                            Err(err) => self.hooks().error(&err),
                        }
                    }
                }
                Ok(Poll::Missing) => {
                    if self.role == Role::Client && self.live.get() {
                        self.handle(Message::new(Action::Disconnect, Vec::<String>::new()));
                    }
                }
                Ok(Poll::Busy) => trace!("lock busy; skipping poll cycle"),
                Err(err) => {
                    self.hooks().error(&err);
                    // Fatal to the channel: stop it as stop() would.
                    if self.active.swap(false, Ordering::AcqRel) {
                        warn!(role = %self.role, error = %err, "poll failed; stopping file channel");
                        if let Err(err) = self.teardown() {
                            self.hooks().error(&err);
                        }
                    }
                    self.live.set(false);
                    break;
                }
            }
        }
        debug!(role = %self.role, "poll loop exited");
    }

    /// Read and clear the inbound file under the lock.
    fn poll_once(&self) -> Result<Poll> {
        let lock = self.lock_handle();
        let _guard = match lock.try_acquire(self.config.lock_timeout) {
            Ok(Some(guard)) => guard,
            Ok(None) => return Ok(Poll::Busy),
            Err(err) => return Err(lock_error(err, self.config.lock_timeout)),
        };

        let path = self.paths.inbound(self.role);
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Poll::Missing),
            Err(err) => {
                return Err(LinkError::resource(
                    format!("failed to read {}", path.display()),
                    err,
                ))
            }
        };

        if !text.is_empty() {
            OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(path)
                .map_err(|err| {
                    LinkError::resource(format!("failed to clear {}", path.display()), err)
                })?;
        }
        Ok(Poll::Text(text))
    }

    fn handle(&self, message: Message) {
        self.hooks()
            .log(&format!("Received action: {}", message.action));

        match message.action {
            Action::Handshake => {
                self.live.set(true);
                if self.role == Role::Server {
                    if let Err(err) = self.append(Action::Handshake, &[]) {
                        self.hooks().error(&err);
                    }
                }
            }
            Action::Disconnect => {
                self.live.set(false);
            }
            _ => {}
        }

        self.dispatcher.dispatch_message(&message);
    }
}

fn lock_error(err: TransportError, timeout: Duration) -> LinkError {
    match err {
        TransportError::LockTimeout { .. } => LinkError::Timeout {
            operation: "lock acquire",
            after: timeout,
        },
        other => LinkError::resource("named lock failed", other),
    }
}

fn create_if_missing(path: &Path) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|err| LinkError::resource(format!("failed to create {}", path.display()), err))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LinkError::resource(
            format!("failed to remove {}", path.display()),
            err,
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn unique_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "actionlink-file-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn fast() -> FileChannelConfig {
        FileChannelConfig {
            poll_interval: Duration::from_millis(10),
            lock_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn server_connect_creates_both_files() {
        let dir = unique_dir("create");
        let paths = ChannelPaths::new(&dir, "create");
        let server = FileChannel::new(paths.clone(), Role::Server, fast()).unwrap();

        assert!(server.connect(Duration::from_millis(50)).unwrap());
        assert!(paths.server_to_client().exists());
        assert!(paths.client_to_server().exists());
        assert!(!server.is_connected());

        server.stop().unwrap();
        assert!(!paths.server_to_client().exists());
        assert!(!paths.client_to_server().exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn send_before_connect_is_refused() {
        let dir = unique_dir("early");
        let paths = ChannelPaths::new(&dir, "early");
        let server = FileChannel::new(paths.clone(), Role::Server, fast()).unwrap();

        let err = server.send(Action::Print, &["hi"]).unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn send_to_deleted_outbound_file_is_resource_error() {
        let dir = unique_dir("deleted");
        let paths = ChannelPaths::new(&dir, "deleted");
        let server = FileChannel::new(paths.clone(), Role::Server, fast()).unwrap();
        assert!(server.connect(Duration::from_millis(50)).unwrap());

        fs::remove_file(paths.server_to_client()).unwrap();
        let err = server.send(Action::Print, &["lost"]).unwrap_err();
        assert_eq!(err.kind(), actionlink_core::ErrorKind::Resource);
        assert!(!paths.server_to_client().exists(), "send must not recreate");

        server.stop().unwrap();
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn send_times_out_while_lock_is_held() {
        let dir = unique_dir("held");
        let paths = ChannelPaths::new(&dir, "held");
        let server = FileChannel::new(paths.clone(), Role::Server, fast()).unwrap();
        assert!(server.connect(Duration::from_millis(50)).unwrap());

        let other = NamedLock::open(paths.lock_key()).unwrap();
        let guard = other.acquire(Duration::from_secs(1)).unwrap();
        let err = server.send(Action::Print, &["blocked"]).unwrap_err();
        assert!(matches!(err, LinkError::Timeout { .. }));
        drop(guard);

        server.stop().unwrap();
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn server_stop_unlinks_the_lock() {
        let dir = unique_dir("unlink");
        let paths = ChannelPaths::new(&dir, "unlink");
        let sem = PathBuf::from(format!("/dev/shm/sem.{}", paths.lock_key()));
        let server = FileChannel::new(paths.clone(), Role::Server, fast()).unwrap();
        assert!(server.connect(Duration::from_millis(50)).unwrap());
        assert!(sem.exists());

        server.stop().unwrap();
        assert!(!sem.exists());

        // Connecting again brings a fresh lock.
        assert!(server.connect(Duration::from_millis(50)).unwrap());
        assert!(sem.exists());
        drop(server);
        assert!(!sem.exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unreadable_inbound_file_stops_the_server() {
        let dir = unique_dir("fatal");
        let paths = ChannelPaths::new(&dir, "fatal");
        let hooks = Hooks::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = Arc::clone(&errors);
            hooks.on_error(move |err| errors.lock().unwrap().push(err.kind()));
        }
        let server = FileChannel::with_hooks(paths.clone(), Role::Server, fast(), hooks).unwrap();
        assert!(server.connect(Duration::from_millis(50)).unwrap());

        fs::remove_file(paths.client_to_server()).unwrap();
        fs::create_dir(paths.client_to_server()).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while paths.server_to_client().exists() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!paths.server_to_client().exists());
        assert_eq!(
            errors.lock().unwrap().first(),
            Some(&actionlink_core::ErrorKind::Resource)
        );
        assert!(matches!(
            server.send(Action::Print, &["gone"]),
            Err(LinkError::NotConnected)
        ));

        // Once the path is usable again the server can start over.
        fs::remove_dir(paths.client_to_server()).unwrap();
        assert!(server.connect(Duration::from_millis(50)).unwrap());
        assert!(paths.server_to_client().exists());
        assert!(paths.client_to_server().exists());

        let client = FileChannel::new(paths.clone(), Role::Client, fast()).unwrap();
        assert!(client.connect(Duration::from_secs(2)).unwrap());

        client.stop().unwrap();
        server.stop().unwrap();
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn appended_lines_use_wire_format() {
        let dir = unique_dir("wire");
        let paths = ChannelPaths::new(&dir, "wire");
        let server = FileChannel::new(paths.clone(), Role::Server, fast()).unwrap();
        assert!(server.connect(Duration::from_millis(50)).unwrap());

        server.send(Action::Redraw, &["Alice"]).unwrap();
        server.send(Action::ToggleWatch, &[]).unwrap();

        let text = fs::read_to_string(paths.server_to_client()).unwrap();
        assert_eq!(text, "Redraw \"Alice\"\nToggleWatch\n");

        server.stop().unwrap();
        let _ = fs::remove_dir_all(&dir);
    }
}
