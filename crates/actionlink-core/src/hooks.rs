use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::LinkError;

type LogSink = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorSink = Arc<dyn Fn(&LinkError) + Send + Sync>;

/// Caller-supplied sinks for channel diagnostics.
///
/// Every line and error also goes to `tracing`; the sinks let an embedding
/// host route them to its own log. Clones share the same sinks.
#[derive(Clone, Default)]
pub struct Hooks {
    inner: Arc<Sinks>,
}

#[derive(Default)]
struct Sinks {
    log: RwLock<Option<LogSink>>,
    error: RwLock<Option<ErrorSink>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the log sink.
    pub fn on_log<F>(&self, sink: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self
            .inner
            .log
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(sink));
    }

    /// Replace the error sink.
    pub fn on_error<F>(&self, sink: F)
    where
        F: Fn(&LinkError) + Send + Sync + 'static,
    {
        *self
            .inner
            .error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(sink));
    }

    pub fn log(&self, line: &str) {
        debug!(target: "actionlink", "{line}");
        let sink = self
            .inner
            .log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sink) = sink {
            sink(line);
        }
    }

    pub fn error(&self, err: &LinkError) {
        warn!(target: "actionlink", kind = ?err.kind(), error = %err, "channel error");
        let sink = self
            .inner
            .error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sink) = sink {
            sink(err);
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn sinks_are_optional() {
        let hooks = Hooks::new();
        hooks.log("nobody listening");
        hooks.error(&LinkError::EmptyLine);
    }

    #[test]
    fn clones_share_sinks() {
        let hooks = Hooks::new();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let kinds = Arc::new(Mutex::new(Vec::new()));

        let clone = hooks.clone();
        {
            let lines = Arc::clone(&lines);
            clone.on_log(move |line| lines.lock().unwrap().push(line.to_string()));
        }
        {
            let kinds = Arc::clone(&kinds);
            clone.on_error(move |err| kinds.lock().unwrap().push(err.kind()));
        }

        hooks.log("connected");
        hooks.error(&LinkError::UnknownAction("Nope".into()));

        assert_eq!(*lines.lock().unwrap(), vec!["connected".to_string()]);
        assert_eq!(*kinds.lock().unwrap(), vec![ErrorKind::Protocol]);
    }

    #[test]
    fn later_sink_replaces_earlier() {
        let hooks = Hooks::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let hits = Arc::clone(&hits);
            hooks.on_log(move |_| hits.lock().unwrap().push(tag));
        }
        hooks.log("x");

        assert_eq!(*hits.lock().unwrap(), vec!["second"]);
    }
}
