use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use actionlink::{Action, Role, Session};
use tracing::info;

use crate::cmd::ServeArgs;
use crate::exit::{link_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_action, ActionOutput, OutputFormat};

const TICK: Duration = Duration::from_millis(100);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.transport.session_config(Role::Server)?;
    let transport = args.transport.transport.as_str();
    let session = Session::open(config).map_err(|err| link_error("open failed", err))?;

    let (tx, rx) = mpsc::channel::<(Action, Vec<String>)>();
    session.dispatcher().observe(move |action, params| {
        let _ = tx.send((action, params.to_vec()));
    });

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    if !session
        .connect()
        .map_err(|err| link_error("connect failed", err))?
    {
        return Err(CliError::new(TIMEOUT, "server failed to come up"));
    }
    info!(transport, key = %args.transport.key, "serving");

    let mut received = 0usize;
    if args.count == Some(0) {
        running.store(false, Ordering::SeqCst);
    }

    while running.load(Ordering::SeqCst) {
        let (action, params) = match rx.recv_timeout(TICK) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        print_action(
            &ActionOutput::new(action, &params, Role::Server, transport),
            format,
        );
        if action.is_protocol() {
            continue;
        }

        received = received.saturating_add(1);
        if args.count.is_some_and(|count| received >= count) {
            break;
        }
    }

    session
        .close()
        .map_err(|err| link_error("close failed", err))?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
