use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actionlink_core::{
    encode, Action, Channel, Dispatcher, Hooks, LinkError, Message, Result, Role,
};
use tracing::{debug, info};

use crate::client::PipeClient;
use crate::config::PipeConfig;
use crate::error::PipeError;
use crate::server::PipeServer;

/// Action channel over named pipes.
///
/// The server side accepts any number of clients and broadcasts every
/// action to all of them; the client side talks to one server and
/// reconnects on its own when [`PipeConfig::auto_reconnect`] is set.
pub struct PipeChannel {
    role: Role,
    drain_timeout: Duration,
    endpoint: Endpoint,
    dispatcher: Arc<Dispatcher>,
    active: AtomicBool,
}

enum Endpoint {
    Server(PipeServer<String>),
    Client(PipeClient<String>),
}

impl PipeChannel {
    pub fn new(pipe_name: &str, role: Role, config: PipeConfig) -> Result<Self> {
        Self::with_hooks(pipe_name, role, config, Hooks::new())
    }

    /// Like [`new`](Self::new), reporting through existing `hooks`.
    pub fn with_hooks(
        pipe_name: &str,
        role: Role,
        config: PipeConfig,
        hooks: Hooks,
    ) -> Result<Self> {
        let dispatcher = Arc::new(Dispatcher::new(hooks));
        let drain_timeout = config.drain_timeout;
        let endpoint = match role {
            Role::Server => {
                let server = PipeServer::<String>::new(pipe_name, config)?;
                let incoming = Arc::clone(&dispatcher);
                server.on_client_message(move |_connection, line| deliver(&incoming, &line));
                let hooks = dispatcher.hooks().clone();
                server.on_client_connected(move |connection| {
                    hooks.log(&format!("Client connected on {}", connection.name()));
                });
                let hooks = dispatcher.hooks().clone();
                server.on_client_disconnected(move |connection| {
                    hooks.log(&format!("Client disconnected from {}", connection.name()));
                });
                let hooks = dispatcher.hooks().clone();
                server.on_error(move |err| hooks.error(&transport_error(err)));
                Endpoint::Server(server)
            }
            Role::Client => {
                let client = PipeClient::<String>::new(pipe_name, config)?;
                let incoming = Arc::clone(&dispatcher);
                client.on_server_message(move |line| deliver(&incoming, &line));
                let hooks = dispatcher.hooks().clone();
                client.on_disconnected(move |name| {
                    hooks.log(&format!("Disconnected from {name}"));
                });
                let hooks = dispatcher.hooks().clone();
                client.on_error(move |err| hooks.error(&transport_error(err)));
                Endpoint::Client(client)
            }
        };
        debug!(pipe = %pipe_name, %role, "pipe channel created");

        Ok(Self {
            role,
            drain_timeout,
            endpoint,
            dispatcher,
            active: AtomicBool::new(false),
        })
    }

    pub fn pipe_name(&self) -> &str {
        match &self.endpoint {
            Endpoint::Server(server) => server.pipe_name(),
            Endpoint::Client(client) => client.pipe_name(),
        }
    }

    /// The underlying server, for the server role.
    pub fn server(&self) -> Option<&PipeServer<String>> {
        match &self.endpoint {
            Endpoint::Server(server) => Some(server),
            Endpoint::Client(_) => None,
        }
    }

    /// The underlying client, for the client role.
    pub fn client(&self) -> Option<&PipeClient<String>> {
        match &self.endpoint {
            Endpoint::Client(client) => Some(client),
            Endpoint::Server(_) => None,
        }
    }
}

impl Channel for PipeChannel {
    fn role(&self) -> Role {
        self.role
    }

    fn connect(&self, timeout: Duration) -> Result<bool> {
        if self.active.load(Ordering::Acquire) {
            return Ok(self.role == Role::Server || self.is_connected());
        }

        match &self.endpoint {
            Endpoint::Server(server) => server.start()?,
            Endpoint::Client(client) => {
                client.start()?;
                if !client.wait_for_connection_timeout(timeout) {
                    self.hooks()
                        .log(&format!("no pipe server answered within {timeout:?}"));
                    client.stop();
                    return Ok(false);
                }
            }
        }

        self.active.store(true, Ordering::Release);
        info!(pipe = %self.pipe_name(), role = %self.role, "pipe channel connected");
        Ok(true)
    }

    fn send(&self, action: Action, params: &[&str]) -> Result<()> {
        if !self.active.load(Ordering::Acquire) {
            return Err(LinkError::NotConnected);
        }
        self.hooks().log(&format!(
            "Sending action: {action} with {} parameters",
            params.len()
        ));

        let line = encode(action, params);
        match &self.endpoint {
            Endpoint::Server(server) => {
                if server.connection_count() == 0 {
                    return Err(LinkError::NotConnected);
                }
                server.broadcast(line);
                Ok(())
            }
            Endpoint::Client(client) => Ok(client.push(line)?),
        }
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn is_connected(&self) -> bool {
        match &self.endpoint {
            Endpoint::Server(server) => server.connection_count() > 0,
            Endpoint::Client(client) => client.is_connected(),
        }
    }

    fn stop(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let drained = match &self.endpoint {
            Endpoint::Server(server) => {
                let drained = server.drain(self.drain_timeout);
                server.stop();
                drained
            }
            Endpoint::Client(client) => {
                let drained = client.drain(self.drain_timeout);
                client.stop();
                drained
            }
        };
        if !drained {
            debug!(pipe = %self.pipe_name(), "stopped with messages still queued");
        }
        info!(pipe = %self.pipe_name(), role = %self.role, "pipe channel stopped");
        Ok(())
    }
}

impl Drop for PipeChannel {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            debug!(error = %err, "stop on drop failed");
        }
    }
}

fn deliver(dispatcher: &Dispatcher, line: &str) {
    match Message::decode(line) {
        Ok(message) => {
            dispatcher
                .hooks()
                .log(&format!("Received action: {}", message.action));
            dispatcher.dispatch_message(&message);
        }
        Err(err) => dispatcher.hooks().error(&err),
    }
}

fn transport_error(err: &PipeError) -> LinkError {
    LinkError::resource("pipe transport error", err.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;

    fn unique_name(tag: &str) -> String {
        format!(
            "chan-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
                % 1_000_000_000
        )
    }

    fn quick() -> PipeConfig {
        PipeConfig {
            connect_timeout: Duration::from_millis(300),
            ..PipeConfig::default()
        }
    }

    #[test]
    fn client_and_server_exchange_actions() {
        let name = unique_name("duplex");
        let server = PipeChannel::new(&name, Role::Server, quick()).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        server.dispatcher().on2(Action::Command, move |a, b| {
            tx.lock().unwrap().send((a.to_string(), b.to_string())).unwrap();
        });
        assert!(server.connect(Duration::from_millis(100)).unwrap());

        let client = PipeChannel::new(&name, Role::Client, quick()).unwrap();
        let (ptx, prx) = mpsc::channel();
        let ptx = Mutex::new(ptx);
        client.dispatcher().on1(Action::Print, move |text| {
            ptx.lock().unwrap().send(text.to_string()).unwrap();
        });
        assert!(client.connect(Duration::from_secs(2)).unwrap());

        client.send(Action::Command, &["open", "a file"]).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            ("open".to_string(), "a file".to_string())
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        while !server.is_connected() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        server.send(Action::Print, &["hi there"]).unwrap();
        assert_eq!(prx.recv_timeout(Duration::from_secs(2)).unwrap(), "hi there");

        client.stop().unwrap();
        server.stop().unwrap();
    }

    #[test]
    fn client_without_server_reports_false() {
        let name = unique_name("absent");
        let client = PipeChannel::new(&name, Role::Client, quick()).unwrap();

        let started = Instant::now();
        assert!(!client.connect(Duration::from_millis(150)).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(!client.is_connected());
        assert!(matches!(
            client.send(Action::Redraw, &[]),
            Err(LinkError::NotConnected)
        ));
    }

    #[test]
    fn retried_connect_keeps_one_connection() {
        let name = unique_name("retry");
        let patient = PipeConfig {
            connect_timeout: Duration::from_secs(5),
            ..PipeConfig::default()
        };
        let client = PipeChannel::new(&name, Role::Client, patient).unwrap();
        let prints = Arc::new(AtomicUsize::new(0));
        {
            let prints = Arc::clone(&prints);
            client.dispatcher().on1(Action::Print, move |_| {
                prints.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(!client.connect(Duration::from_millis(100)).unwrap());

        let server = PipeChannel::new(&name, Role::Server, quick()).unwrap();
        assert!(server.connect(Duration::from_millis(100)).unwrap());
        assert!(client.connect(Duration::from_secs(2)).unwrap());

        let pipes = server.server().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while pipes.connection_count() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(pipes.connection_count(), 1);

        server.send(Action::Print, &["once"]).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while prints.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(prints.load(Ordering::SeqCst), 1);

        client.stop().unwrap();
        server.stop().unwrap();
    }

    #[test]
    fn server_without_clients_refuses_sends() {
        let name = unique_name("lonely");
        let server = PipeChannel::new(&name, Role::Server, quick()).unwrap();
        assert!(server.connect(Duration::from_millis(100)).unwrap());
        assert!(!server.is_connected());
        assert!(matches!(
            server.send(Action::Redraw, &[]),
            Err(LinkError::NotConnected)
        ));
        server.stop().unwrap();
        server.stop().unwrap();
    }

    #[test]
    fn malformed_lines_go_to_the_error_hook() {
        let name = unique_name("garbage");
        let hooks = Hooks::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = Arc::clone(&errors);
            hooks.on_error(move |err| errors.lock().unwrap().push(err.kind()));
        }
        let server = PipeChannel::with_hooks(&name, Role::Server, quick(), hooks).unwrap();
        assert!(server.connect(Duration::from_millis(100)).unwrap());

        let raw = PipeClient::<String>::new(&name, quick()).unwrap();
        raw.start().unwrap();
        assert!(raw.wait_for_connection_timeout(Duration::from_secs(2)));
        raw.push("Explode now".to_string()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while errors.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            errors.lock().unwrap().as_slice(),
            &[actionlink_core::ErrorKind::Protocol]
        );
        raw.stop();
    }
}
