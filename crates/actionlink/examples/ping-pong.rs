//! Two sessions in one process answering each other over a pipe.
//!
//! Run with:
//!   cargo run --example ping-pong

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use actionlink::{Action, Role, Session, SessionConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name = format!("ping-pong-{}", std::process::id());

    let server = Arc::new(Session::open(SessionConfig::pipe(&name, Role::Server))?);
    {
        let replier = Arc::downgrade(&server);
        server.dispatcher().on1(Action::Print, move |text| {
            eprintln!("server got: {text}");
            if let Some(server) = replier.upgrade() {
                let reply = format!("pong for {text}");
                if let Err(err) = server.send(Action::Print, &[reply.as_str()]) {
                    eprintln!("reply failed: {err}");
                }
            }
        });
    }
    server.connect()?;

    let client = Session::open(SessionConfig::pipe(&name, Role::Client))?;
    let (tx, rx) = mpsc::channel();
    client.dispatcher().on1(Action::Print, move |text| {
        let _ = tx.send(text.to_string());
    });
    if !client.connect()? {
        return Err("server did not answer".into());
    }

    for i in 1..=3 {
        client.send(Action::Print, &[format!("ping {i}").as_str()])?;
        let reply = rx.recv_timeout(Duration::from_secs(2))?;
        eprintln!("client got: {reply}");
    }

    client.close()?;
    server.close()?;
    Ok(())
}
