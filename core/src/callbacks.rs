//! Callback system for circuit breaker state transitions

use crate::circuit::State;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Hook receiving `(circuit, from, to)` on every transition
pub type StateChangeFn = Arc<dyn Fn(&str, State, State) + Send + Sync>;

/// Hook receiving the circuit name
pub type StateHookFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks for circuit breaker events
///
/// Hooks run synchronously on the task that detected the transition, while the
/// breaker is still locked. They must return quickly and must not call back into
/// the same breaker. A panicking hook is caught and logged; the transition it was
/// notified about has already been committed.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_state_change: Option<StateChangeFn>,
    pub on_open: Option<StateHookFn>,
    pub on_close: Option<StateHookFn>,
    pub on_half_open: Option<StateHookFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one transition to every interested hook
    pub fn notify(&self, circuit: &str, from: State, to: State) {
        if let Some(ref callback) = self.on_state_change {
            guarded(circuit, "on_state_change", || callback(circuit, from, to));
        }

        let hook = match to {
            State::Open => &self.on_open,
            State::HalfOpen => &self.on_half_open,
            State::Closed => &self.on_close,
        };
        if let Some(callback) = hook {
            guarded(circuit, to.hook_name(), || callback(circuit));
        }
    }
}

fn guarded(circuit: &str, hook: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(circuit, hook, "state change hook panicked");
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
