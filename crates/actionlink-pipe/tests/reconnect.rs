use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use actionlink_pipe::{PipeClient, PipeConfig, PipeError, PipeServer};

fn unique_name(tag: &str) -> String {
    format!(
        "rc-{}-{}-{}",
        tag,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
            % 1_000_000_000
    )
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn client_reconnects_after_the_server_drops_it() {
    let name = unique_name("drop");
    let server = PipeServer::<String>::new(&name, PipeConfig::default()).unwrap();
    server.start().unwrap();

    let client = PipeClient::<String>::new(&name, PipeConfig::default()).unwrap();
    let disconnects = Arc::new(AtomicUsize::new(0));
    {
        let disconnects = Arc::clone(&disconnects);
        client.on_disconnected(move |_| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        });
    }
    client.start().unwrap();
    assert!(client.wait_for_connection_timeout(Duration::from_secs(3)));
    let first = client.connection_name().unwrap();

    assert!(wait_until(|| server.connection_count() == 1));
    assert!(server.disconnect_client(&first));
    assert!(client.wait_for_disconnection_timeout(Duration::from_secs(3)));
    assert!(client.wait_for_connection_timeout(Duration::from_secs(3)));

    let second = client.connection_name().unwrap();
    assert_ne!(first, second);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(wait_until(|| server.connection_names() == vec![second.clone()]));

    client.push("Redraw".to_string()).unwrap();
    server.stop();
}

#[test]
fn stopped_client_stays_down() {
    let name = unique_name("stop");
    let server = PipeServer::<String>::new(&name, PipeConfig::default()).unwrap();
    server.start().unwrap();

    let client = PipeClient::<String>::new(&name, PipeConfig::default()).unwrap();
    client.start().unwrap();
    assert!(client.wait_for_connection_timeout(Duration::from_secs(3)));
    assert!(wait_until(|| server.connection_count() == 1));
    let attempts = client.attempts();

    client.stop();
    assert!(client.wait_for_disconnection_timeout(Duration::from_secs(3)));
    assert!(wait_until(|| server.connection_count() == 0));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(client.attempts(), attempts);
    assert_eq!(server.connection_count(), 0);
    assert!(!client.is_connected());
    assert!(matches!(
        client.push("Redraw".to_string()),
        Err(PipeError::NotConnected)
    ));

    server.stop();
}

#[test]
fn reconnect_can_be_disabled() {
    let name = unique_name("noauto");
    let server = PipeServer::<String>::new(&name, PipeConfig::default()).unwrap();
    server.start().unwrap();

    let config = PipeConfig {
        auto_reconnect: false,
        ..PipeConfig::default()
    };
    let client = PipeClient::<String>::new(&name, config).unwrap();
    client.start().unwrap();
    assert!(client.wait_for_connection_timeout(Duration::from_secs(3)));

    let current = client.connection_name().unwrap();
    assert!(wait_until(|| server.connection_count() == 1));
    assert!(server.disconnect_client(&current));
    assert!(client.wait_for_disconnection_timeout(Duration::from_secs(3)));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(client.attempts(), 1);
    assert!(client.connection_name().is_none());

    server.stop();
}

#[test]
fn client_outlasts_a_server_restart() {
    let name = unique_name("restart");
    let server = PipeServer::<String>::new(&name, PipeConfig::default()).unwrap();
    server.start().unwrap();

    let config = PipeConfig {
        connect_timeout: Duration::from_millis(300),
        ..PipeConfig::default()
    };
    let client = PipeClient::<String>::new(&name, config).unwrap();
    client.start().unwrap();
    assert!(client.wait_for_connection_timeout(Duration::from_secs(3)));
    assert!(wait_until(|| server.connection_count() == 1));

    server.stop();
    drop(server);
    assert!(client.wait_for_disconnection_timeout(Duration::from_secs(3)));

    // Down for longer than a single handshake may take.
    thread::sleep(Duration::from_millis(800));
    assert!(!client.is_connected());

    let restarted = PipeServer::<String>::new(&name, PipeConfig::default()).unwrap();
    restarted.start().unwrap();
    assert!(client.wait_for_connection_timeout(Duration::from_secs(3)));
    assert!(wait_until(|| restarted.connection_count() == 1));
    assert!(client.attempts() > 2);

    client.stop();
    restarted.stop();
}
