//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::Callbacks,
    circuit::{CircuitBreaker, CircuitContext, Config, ReadyToTripFn, State},
    classifier::{FailureContext, PredicateClassifier, SuccessClassifier},
    clock::Clock,
    storage::Counts,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    context: CircuitContext,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            context: CircuitContext {
                name: name.into(),
                ..Default::default()
            },
            callbacks: Callbacks::new(),
        }
    }

    /// Replace every numeric setting at once
    pub fn config(mut self, config: Config) -> Self {
        self.context.config = config;
        self
    }

    /// Set how many probes HalfOpen admits (and how many successes close it)
    pub fn max_half_open_requests(mut self, requests: u32) -> Self {
        self.context.config.max_half_open_requests = requests;
        self
    }

    /// Set the rolling window length while Closed (zero disables it)
    pub fn closed_window_interval(mut self, interval: Duration) -> Self {
        self.context.config.closed_window_interval = interval;
        self
    }

    /// Set the cool-down before an Open circuit admits a probe
    pub fn open_state_timeout(mut self, timeout: Duration) -> Self {
        self.context.config.open_state_timeout = timeout;
        self
    }

    /// Set the cool-down jitter factor (0.0 = no jitter, 1.0 = full jitter)
    pub fn open_state_jitter(mut self, factor: f64) -> Self {
        self.context.config.open_state_jitter = factor.clamp(0.0, 1.0);
        self
    }

    /// Set the predicate that decides when a Closed circuit opens
    ///
    /// # Examples
    ///
    /// ```rust
    /// use resilient_http::CircuitBreaker;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .ready_to_trip(|counts| counts.requests >= 5 && counts.failure_ratio() >= 0.6)
    ///     .build();
    /// assert!(circuit.is_closed());
    /// ```
    pub fn ready_to_trip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.context.ready_to_trip = Arc::new(f);
        self
    }

    pub(crate) fn ready_to_trip_fn(mut self, f: ReadyToTripFn) -> Self {
        self.context.ready_to_trip = f;
        self
    }

    /// Set a classifier deciding which errors still count as successes
    pub fn success_classifier(mut self, classifier: Arc<dyn SuccessClassifier>) -> Self {
        self.context.classifier = classifier;
        self
    }

    /// Closure shorthand for `success_classifier`
    pub fn is_successful<F>(self, f: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.success_classifier(Arc::new(PredicateClassifier::new(f)))
    }

    /// Set the time source used for windows and cool-downs
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.context.clock = clock;
        self
    }

    /// Set callback for every state transition
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        self.callbacks.on_state_change = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    pub(crate) fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        CircuitBreaker::with_context_and_callbacks(self.context, self.callbacks)
    }
}
