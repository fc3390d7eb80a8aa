//! Action → handler routing.
//!
//! Handlers declare how many string parameters they take when they are
//! registered. A message whose parameter count differs skips that handler
//! (reported as [`LinkError::Arity`]) without affecting the others.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::action::Action;
use crate::error::LinkError;
use crate::hooks::Hooks;
use crate::message::Message;

type Handler0 = Box<dyn Fn() + Send + Sync>;
type Handler1 = Box<dyn Fn(&str) + Send + Sync>;
type Handler2 = Box<dyn Fn(&str, &str) + Send + Sync>;
type Observer = Arc<dyn Fn(Action, &[String]) + Send + Sync>;

/// A callback with a fixed number of parameters.
pub enum Handler {
    None(Handler0),
    One(Handler1),
    Two(Handler2),
}

impl Handler {
    pub fn none<F: Fn() + Send + Sync + 'static>(f: F) -> Self {
        Handler::None(Box::new(f))
    }

    pub fn one<F: Fn(&str) + Send + Sync + 'static>(f: F) -> Self {
        Handler::One(Box::new(f))
    }

    pub fn two<F: Fn(&str, &str) + Send + Sync + 'static>(f: F) -> Self {
        Handler::Two(Box::new(f))
    }

    pub fn arity(&self) -> usize {
        match self {
            Handler::None(_) => 0,
            Handler::One(_) => 1,
            Handler::Two(_) => 2,
        }
    }

    fn call(&self, action: Action, params: &[String]) -> Result<(), LinkError> {
        let outcome = match (self, params) {
            (Handler::None(f), []) => catch_unwind(AssertUnwindSafe(|| f())),
            (Handler::One(f), [a]) => catch_unwind(AssertUnwindSafe(|| f(a.as_str()))),
            (Handler::Two(f), [a, b]) => {
                catch_unwind(AssertUnwindSafe(|| f(a.as_str(), b.as_str())))
            }
            _ => {
                return Err(LinkError::Arity {
                    action,
                    expected: self.arity(),
                    actual: params.len(),
                })
            }
        };
        outcome.map_err(|payload| LinkError::HandlerPanicked {
            action,
            message: panic_message(payload.as_ref()),
        })
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("arity", &self.arity())
            .finish()
    }
}

/// Outcome of one [`Dispatcher::dispatch`] call.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Handlers that ran to completion.
    pub invoked: usize,
    /// Handlers that were skipped or panicked.
    pub errors: Vec<LinkError>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Registry of handlers per action.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<Action, Vec<Arc<Handler>>>>,
    observers: RwLock<Vec<Observer>>,
    hooks: Hooks,
}

impl Dispatcher {
    pub fn new(hooks: Hooks) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            hooks,
        }
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Add `handler` after any already registered for `action`.
    pub fn register(&self, action: Action, handler: Handler) {
        debug!(%action, arity = handler.arity(), "registering handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(action)
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn on<F: Fn() + Send + Sync + 'static>(&self, action: Action, f: F) {
        self.register(action, Handler::none(f));
    }

    pub fn on1<F: Fn(&str) + Send + Sync + 'static>(&self, action: Action, f: F) {
        self.register(action, Handler::one(f));
    }

    pub fn on2<F: Fn(&str, &str) + Send + Sync + 'static>(&self, action: Action, f: F) {
        self.register(action, Handler::two(f));
    }

    /// Watch every dispatched action regardless of its parameter count.
    ///
    /// Observers run before the handlers and are not counted in
    /// [`DispatchReport::invoked`].
    pub fn observe<F>(&self, f: F)
    where
        F: Fn(Action, &[String]) + Send + Sync + 'static,
    {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(f));
    }

    pub fn handler_count(&self, action: Action) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&action)
            .map_or(0, Vec::len)
    }

    /// Remove every handler and observer.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Run every handler registered for `action`, in registration order.
    ///
    /// Failures are reported through the error hook and collected in the
    /// returned report; they never stop later handlers from running.
    pub fn dispatch(&self, action: Action, params: &[String]) -> DispatchReport {
        let mut report = DispatchReport::default();
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(action, params))) {
                let err = LinkError::HandlerPanicked {
                    action,
                    message: panic_message(payload.as_ref()),
                };
                self.hooks.error(&err);
                report.errors.push(err);
            }
        }

        // Handlers may register more handlers, so run them outside the lock.
        let handlers = match self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&action)
        {
            Some(list) => list.clone(),
            None => {
                trace!(%action, "no handlers");
                return report;
            }
        };

        for handler in handlers {
            match handler.call(action, params) {
                Ok(()) => report.invoked += 1,
                Err(err) => {
                    self.hooks.error(&err);
                    report.errors.push(err);
                }
            }
        }
        trace!(%action, invoked = report.invoked, failed = report.errors.len(), "dispatched");
        report
    }

    pub fn dispatch_message(&self, message: &Message) -> DispatchReport {
        self.dispatch(message.action, &message.params)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<Action, usize> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(action, list)| (*action, list.len()))
            .collect();
        f.debug_struct("Dispatcher")
            .field("handlers", &counts)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
