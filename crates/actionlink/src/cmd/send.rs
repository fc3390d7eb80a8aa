use actionlink::{Action, Role, Session};
use tracing::{debug, warn};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{link_error, CliError, CliResult, SUCCESS, TIMEOUT};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let action: Action = args
        .action
        .parse()
        .map_err(|err| link_error("invalid action", err))?;
    let timeout = parse_duration(&args.timeout)?;

    let mut config = args.transport.session_config(Role::Client)?;
    config.connect_timeout = timeout;
    config.pipe.connect_timeout = timeout;
    config.pipe.auto_reconnect = false;

    let session = Session::open(config).map_err(|err| link_error("open failed", err))?;
    if !session
        .connect()
        .map_err(|err| link_error("connect failed", err))?
    {
        return Err(CliError::new(
            TIMEOUT,
            format!("no server answered within {timeout:?}"),
        ));
    }

    let params: Vec<&str> = args.params.iter().map(String::as_str).collect();
    session
        .send(action, &params)
        .map_err(|err| link_error("send failed", err))?;
    debug!(%action, params = params.len(), "action sent");

    // The action is already delivered; a peer that left first only makes
    // the goodbye fail.
    if let Err(err) = session.close() {
        warn!(error = %err, "close after send failed");
    }
    Ok(SUCCESS)
}
