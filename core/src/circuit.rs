//! Circuit breaker implementation using state machines
//!
//! The breaker owns a dynamic `Circuit` state machine plus the bookkeeping that
//! the machine itself does not know about: the generation counter and the
//! rolling window of the Closed state. State, counters, generation and expiry
//! form one critical section behind a single mutex. The wrapped operation runs
//! outside of it; its outcome re-enters under generation fencing, so a call that
//! was admitted before a reset or transition can never touch the counters of
//! the generation that replaced its own.

use crate::{
    callbacks::Callbacks,
    classifier::{DefaultClassifier, FailureContext, SuccessClassifier},
    clock::{Clock, SystemClock},
    errors::CircuitError,
    storage::{CountStore, Counts},
};
use parking_lot::Mutex;
use state_machines::state_machine;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cool-down used when `open_state_timeout` is zero
pub const DEFAULT_OPEN_STATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    fn from_machine(name: &str) -> Self {
        match name {
            "Open" => State::Open,
            "HalfOpen" => State::HalfOpen,
            _ => State::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }

    pub(crate) fn hook_name(&self) -> &'static str {
        match self {
            State::Closed => "on_close",
            State::Open => "on_open",
            State::HalfOpen => "on_half_open",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate deciding, from the current counts, whether a Closed circuit opens
pub type ReadyToTripFn = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;

/// Trips once more than five consecutive failures were recorded
pub fn default_ready_to_trip(counts: &Counts) -> bool {
    counts.consecutive_failures > 5
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Probes admitted while HalfOpen, and successes needed to close again.
    /// Zero behaves as one.
    pub max_half_open_requests: u32,

    /// Length of the rolling window while Closed. Zero disables the window,
    /// counters then only reset on state transitions.
    pub closed_window_interval: Duration,

    /// Cool-down before an Open circuit lets a probe through.
    /// Zero behaves as `DEFAULT_OPEN_STATE_TIMEOUT`.
    pub open_state_timeout: Duration,

    /// Jitter factor for the cool-down (0.0 = none, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub open_state_jitter: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_half_open_requests: 0,
            closed_window_interval: Duration::ZERO,
            open_state_timeout: Duration::ZERO,
            open_state_jitter: 0.0,
        }
    }
}

impl Config {
    pub fn effective_max_half_open_requests(&self) -> u32 {
        self.max_half_open_requests.max(1)
    }

    pub fn effective_open_state_timeout(&self) -> Duration {
        if self.open_state_timeout.is_zero() {
            DEFAULT_OPEN_STATE_TIMEOUT
        } else {
            self.open_state_timeout
        }
    }
}

/// Circuit breaker context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub counts: Arc<CountStore>,
    pub clock: Arc<dyn Clock>,
    pub ready_to_trip: ReadyToTripFn,
    pub classifier: Arc<dyn SuccessClassifier>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: Config::default(),
            counts: Arc::new(CountStore::new()),
            clock: Arc::new(SystemClock),
            ready_to_trip: Arc::new(default_ready_to_trip),
            classifier: Arc::new(DefaultClassifier),
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("counts", &self.counts.snapshot())
            .field("clock", &self.clock)
            .field("ready_to_trip", &"<closure>")
            .field("classifier", &self.classifier)
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    /// End of the cool-down
    pub expiry: Option<Instant>,
}

state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen,
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [timeout_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Circuit<Closed> {
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        (ctx.ready_to_trip)(&ctx.counts.snapshot())
    }
}

impl Circuit<HalfOpen> {
    /// Any failure while probing reopens the circuit
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        ctx.counts.snapshot().consecutive_failures > 0
    }

    fn should_close(&self, ctx: &CircuitContext) -> bool {
        ctx.counts.snapshot().consecutive_successes
            >= ctx.config.effective_max_half_open_requests()
    }
}

impl Circuit<Open> {
    fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
        match self.state_data_open().and_then(|data| data.expiry) {
            Some(expiry) => ctx.clock.now() >= expiry,
            None => true,
        }
    }
}

struct Core {
    machine: DynamicCircuit,
    generation: u64,
    /// End of the current Closed window, if windowing is enabled
    window_expiry: Option<Instant>,
}

/// Circuit breaker public API
///
/// All methods take `&self`; share one breaker between tasks with an `Arc`.
pub struct CircuitBreaker {
    context: CircuitContext,
    callbacks: Callbacks,
    core: Mutex<Core>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        let context = CircuitContext {
            name: name.into(),
            config,
            ..Default::default()
        };
        Self::with_context_and_callbacks(context, Callbacks::new())
    }

    /// Create a circuit breaker with custom context and callbacks (used by builder)
    pub(crate) fn with_context_and_callbacks(
        context: CircuitContext,
        callbacks: Callbacks,
    ) -> Self {
        context.counts.clear();
        let machine = DynamicCircuit::new(context.clone());
        let now = context.clock.now();
        let window_expiry = window_end(&context.config, now);

        Self {
            context,
            callbacks,
            core: Mutex::new(Core {
                machine,
                generation: 0,
                window_expiry,
            }),
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    /// Run an async operation under circuit breaker protection
    ///
    /// Fails fast with `CircuitError::Open` or `CircuitError::TooManyRequests`
    /// without polling `operation`. If the returned future is dropped before the
    /// operation completes, the call is recorded as a failure.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let permit = self.admit()?;
        let start = self.context.clock.now();
        let result = operation().await;
        self.finish(permit, start, result)
    }

    /// Synchronous counterpart of `execute`
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        let permit = self.admit()?;
        let start = self.context.clock.now();
        let result = operation();
        self.finish(permit, start, result)
    }

    fn admit<E>(&self) -> Result<Permit<'_>, CircuitError<E>> {
        let mut core = self.core.lock();
        let now = self.context.clock.now();

        match self.current_state(&mut core, now) {
            State::Open => {
                return Err(CircuitError::Open {
                    circuit: self.context.name.clone(),
                });
            }
            State::HalfOpen
                if self.context.counts.snapshot().requests
                    >= self.context.config.effective_max_half_open_requests() =>
            {
                return Err(CircuitError::TooManyRequests {
                    circuit: self.context.name.clone(),
                });
            }
            _ => {}
        }

        self.context.counts.record_request();
        tracing::debug!(
            circuit = %self.context.name,
            generation = core.generation,
            "call admitted"
        );

        Ok(Permit {
            breaker: self,
            generation: core.generation,
            settled: false,
        })
    }

    fn finish<T, E: 'static>(
        &self,
        permit: Permit<'_>,
        start: Instant,
        result: Result<T, E>,
    ) -> Result<T, CircuitError<E>> {
        let success = match &result {
            Ok(_) => true,
            Err(e) => {
                let ctx = FailureContext {
                    circuit_name: &self.context.name,
                    error: e as &dyn Any,
                    duration: self.context.clock.now().saturating_duration_since(start),
                };
                self.context.classifier.is_successful(&ctx)
            }
        };

        permit.settle(success);
        result.map_err(CircuitError::Execution)
    }

    /// Record the outcome of a call admitted in `generation`
    fn record(&self, generation: u64, success: bool) {
        let mut core = self.core.lock();
        let now = self.context.clock.now();
        let state = self.current_state(&mut core, now);

        if generation != core.generation {
            tracing::debug!(
                circuit = %self.context.name,
                stale = generation,
                current = core.generation,
                "discarding outcome from a previous generation"
            );
            return;
        }

        if success {
            self.context.counts.record_success();
            if state == State::HalfOpen && core.machine.handle(CircuitEvent::Close).is_ok() {
                self.transitioned(&mut core, State::HalfOpen, State::Closed, now);
            }
        } else {
            self.context.counts.record_failure();
            if core.machine.handle(CircuitEvent::Trip).is_ok() {
                self.transitioned(&mut core, state, State::Open, now);
            }
        }
    }

    /// Apply time-driven changes (window roll-over, cool-down expiry) and return the state
    fn current_state(&self, core: &mut Core, now: Instant) -> State {
        match State::from_machine(core.machine.current_state()) {
            State::Closed => {
                if core.window_expiry.is_some_and(|expiry| now >= expiry) {
                    self.new_generation(core, State::Closed, now);
                }
            }
            State::Open => {
                if core.machine.handle(CircuitEvent::AttemptReset).is_ok() {
                    self.transitioned(core, State::Open, State::HalfOpen, now);
                }
            }
            State::HalfOpen => {}
        }

        State::from_machine(core.machine.current_state())
    }

    fn transitioned(&self, core: &mut Core, from: State, to: State, now: Instant) {
        self.new_generation(core, to, now);
        tracing::info!(
            circuit = %self.context.name,
            %from,
            %to,
            generation = core.generation,
            "circuit state changed"
        );
        self.callbacks.notify(&self.context.name, from, to);
    }

    fn new_generation(&self, core: &mut Core, state: State, now: Instant) {
        core.generation += 1;
        self.context.counts.clear();
        core.window_expiry = None;

        match state {
            State::Closed => core.window_expiry = window_end(&self.context.config, now),
            State::Open => {
                let expiry = now + self.cool_down();
                if let Some(data) = core.machine.open_data_mut() {
                    data.expiry = Some(expiry);
                }
            }
            State::HalfOpen => {}
        }
    }

    fn cool_down(&self) -> Duration {
        let timeout = self.context.config.effective_open_state_timeout();
        let jitter = self.context.config.open_state_jitter;
        if jitter <= 0.0 {
            return timeout;
        }

        let timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: timeout_ms,
            multiplier: 1.0,
            max_delay_ms: timeout_ms,
        };
        Duration::from_millis(policy.calculate_delay(1, jitter) as u64)
    }

    /// Current state, after applying any elapsed window or cool-down
    pub fn state(&self) -> State {
        let mut core = self.core.lock();
        let now = self.context.clock.now();
        self.current_state(&mut core, now)
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    /// Check if circuit is open
    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    /// Check if circuit is closed
    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// Counters of the current generation
    pub fn counts(&self) -> Counts {
        let _core = self.core.lock();
        self.context.counts.snapshot()
    }

    /// Bumped on every transition and every Closed window reset
    pub fn generation(&self) -> u64 {
        self.core.lock().generation
    }

    /// Get the circuit name
    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// Get the circuit configuration
    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Force the circuit back to Closed with fresh counters
    pub fn reset(&self) {
        let mut core = self.core.lock();
        let now = self.context.clock.now();
        let from = State::from_machine(core.machine.current_state());

        core.machine = DynamicCircuit::new(self.context.clone());
        if from == State::Closed {
            self.new_generation(&mut core, State::Closed, now);
        } else {
            self.transitioned(&mut core, from, State::Closed, now);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("context", &self.context)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

fn window_end(config: &Config, now: Instant) -> Option<Instant> {
    if config.closed_window_interval.is_zero() {
        None
    } else {
        Some(now + config.closed_window_interval)
    }
}

/// Admission ticket for one call; records a failure if dropped unsettled
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.generation, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.generation, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manual_breaker(clock: &Arc<ManualClock>) -> crate::builder::CircuitBuilder {
        CircuitBreaker::builder("test").clock(clock.clone())
    }

    fn fail(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| Err::<(), _>("error"));
    }

    fn succeed(breaker: &CircuitBreaker) {
        breaker
            .call(|| Ok::<_, &str>(()))
            .expect("call should be admitted");
    }

    #[test]
    fn test_circuit_breaker_creation() {
        let circuit = CircuitBreaker::new("test", Config::default());

        assert!(circuit.is_closed());
        assert!(!circuit.is_open());
        assert_eq!(circuit.generation(), 0);
        assert_eq!(circuit.counts(), Counts::default());
    }

    #[test]
    fn test_default_ready_to_trip_needs_more_than_five_failures() {
        let circuit = CircuitBreaker::new("test", Config::default());

        for _ in 0..5 {
            fail(&circuit);
        }
        assert!(circuit.is_closed());

        fail(&circuit);
        assert!(circuit.is_open());
    }

    #[test]
    fn test_ratio_trip_then_fail_fast() {
        let invoked = AtomicUsize::new(0);
        let circuit = CircuitBreaker::builder("test")
            .ready_to_trip(|counts| counts.requests >= 5 && counts.failure_ratio() >= 0.6)
            .build();

        for _ in 0..4 {
            fail(&circuit);
            assert!(circuit.is_closed());
        }
        fail(&circuit);
        assert!(circuit.is_open());

        let result = circuit.call(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        });
        assert!(matches!(result, Err(CircuitError::Open { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_open_rejection_leaves_counts_untouched() {
        let circuit = CircuitBreaker::builder("test")
            .ready_to_trip(|counts| counts.consecutive_failures >= 1)
            .build();

        fail(&circuit);
        assert!(circuit.is_open());
        let before = circuit.counts();
        let generation = circuit.generation();

        for _ in 0..3 {
            fail(&circuit);
        }
        assert_eq!(circuit.counts(), before);
        assert_eq!(circuit.generation(), generation);
    }

    #[test]
    fn test_half_open_probes_close_the_circuit() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_breaker(&clock)
            .max_half_open_requests(2)
            .open_state_timeout(Duration::from_secs(30))
            .ready_to_trip(|counts| counts.consecutive_failures >= 2)
            .build();

        fail(&circuit);
        fail(&circuit);
        assert_eq!(circuit.state(), State::Open);

        clock.advance(Duration::from_secs(29));
        assert_eq!(circuit.state(), State::Open);

        clock.advance(Duration::from_secs(1));
        succeed(&circuit);
        assert_eq!(circuit.state(), State::HalfOpen);
        assert_eq!(circuit.counts().consecutive_successes, 1);

        succeed(&circuit);
        assert_eq!(circuit.state(), State::Closed);
        assert_eq!(circuit.counts(), Counts::default());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_breaker(&clock)
            .max_half_open_requests(3)
            .open_state_timeout(Duration::from_secs(5))
            .ready_to_trip(|counts| counts.consecutive_failures >= 1)
            .build();

        fail(&circuit);
        clock.advance(Duration::from_secs(5));
        succeed(&circuit);
        assert_eq!(circuit.state(), State::HalfOpen);

        fail(&circuit);
        assert_eq!(circuit.state(), State::Open);

        // A fresh cool-down started at the reopen
        clock.advance(Duration::from_secs(4));
        assert_eq!(circuit.state(), State::Open);
        clock.advance(Duration::from_secs(1));
        assert_eq!(circuit.state(), State::HalfOpen);
    }

    #[test]
    fn test_zero_timeout_uses_default_cool_down() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_breaker(&clock)
            .ready_to_trip(|counts| counts.consecutive_failures >= 1)
            .build();

        fail(&circuit);
        clock.advance(DEFAULT_OPEN_STATE_TIMEOUT - Duration::from_millis(1));
        assert!(circuit.is_open());
        clock.advance(Duration::from_millis(1));
        assert_eq!(circuit.state(), State::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admission_is_bounded() {
        let clock = Arc::new(ManualClock::new());
        let circuit = Arc::new(
            manual_breaker(&clock)
                .max_half_open_requests(1)
                .open_state_timeout(Duration::from_secs(1))
                .ready_to_trip(|counts| counts.consecutive_failures >= 1)
                .build(),
        );

        fail(&circuit);
        clock.advance(Duration::from_secs(1));

        let (release, hold) = tokio::sync::oneshot::channel::<()>();
        let probe_circuit = circuit.clone();
        let probe = tokio::spawn(async move {
            probe_circuit
                .execute(|| async move {
                    let _ = hold.await;
                    Ok::<_, &str>("probe")
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(circuit.state(), State::HalfOpen);
        assert_eq!(circuit.counts().requests, 1);

        let invoked = AtomicUsize::new(0);
        let rejected = circuit
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>("extra")
            })
            .await;
        assert!(matches!(
            rejected,
            Err(CircuitError::TooManyRequests { .. })
        ));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(circuit.counts().requests, 1);

        release.send(()).expect("probe is waiting");
        let outcome = probe.await.expect("probe task");
        assert_eq!(outcome.expect("probe admitted"), "probe");
        assert_eq!(circuit.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcome_is_fenced_after_transition() {
        let clock = Arc::new(ManualClock::new());
        let circuit = Arc::new(
            manual_breaker(&clock)
                .open_state_timeout(Duration::from_secs(10))
                .ready_to_trip(|counts| counts.consecutive_failures >= 2)
                .build(),
        );

        let (release, hold) = tokio::sync::oneshot::channel::<()>();
        let slow_circuit = circuit.clone();
        let slow = tokio::spawn(async move {
            slow_circuit
                .execute(|| async move {
                    let _ = hold.await;
                    Err::<(), _>("late failure")
                })
                .await
        });
        tokio::task::yield_now().await;
        let admitted_in = circuit.generation();

        fail(&circuit);
        fail(&circuit);
        assert_eq!(circuit.state(), State::Open);

        clock.advance(Duration::from_secs(10));
        assert_eq!(circuit.state(), State::HalfOpen);
        let generation = circuit.generation();
        assert!(generation > admitted_in);

        // A failure counted in this generation would reopen the circuit
        release.send(()).expect("slow call is waiting");
        let outcome = slow.await.expect("slow task");
        assert!(matches!(outcome, Err(CircuitError::Execution("late failure"))));

        assert_eq!(circuit.state(), State::HalfOpen);
        assert_eq!(circuit.generation(), generation);
        assert_eq!(circuit.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcome_is_fenced_after_window_reset() {
        let clock = Arc::new(ManualClock::new());
        let circuit = Arc::new(
            manual_breaker(&clock)
                .closed_window_interval(Duration::from_secs(10))
                .build(),
        );

        let (release, hold) = tokio::sync::oneshot::channel::<()>();
        let slow_circuit = circuit.clone();
        let slow = tokio::spawn(async move {
            slow_circuit
                .execute(|| async move {
                    let _ = hold.await;
                    Ok::<_, &str>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(circuit.counts().requests, 1);

        clock.advance(Duration::from_secs(11));
        assert_eq!(circuit.state(), State::Closed);
        assert_eq!(circuit.generation(), 1);
        assert_eq!(circuit.counts(), Counts::default());

        release.send(()).expect("slow call is waiting");
        slow.await.expect("slow task").expect("slow call succeeded");
        assert_eq!(circuit.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_counts_as_failure() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_breaker(&clock)
            .max_half_open_requests(1)
            .open_state_timeout(Duration::from_secs(1))
            .ready_to_trip(|counts| counts.consecutive_failures >= 1)
            .build();

        fail(&circuit);
        clock.advance(Duration::from_secs(1));
        assert_eq!(circuit.state(), State::HalfOpen);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            circuit.execute(|| std::future::pending::<Result<(), &str>>()),
        )
        .await;
        assert!(abandoned.is_err());

        // The abandoned probe released its slot by reopening the circuit
        assert_eq!(circuit.state(), State::Open);
    }

    #[test]
    fn test_closed_window_rolls_over() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_breaker(&clock)
            .closed_window_interval(Duration::from_secs(60))
            .ready_to_trip(|counts| counts.total_failures >= 3)
            .build();

        fail(&circuit);
        fail(&circuit);
        assert_eq!(circuit.counts().total_failures, 2);

        clock.advance(Duration::from_secs(60));
        assert_eq!(circuit.state(), State::Closed);
        assert_eq!(circuit.generation(), 1);
        assert_eq!(circuit.counts(), Counts::default());

        fail(&circuit);
        fail(&circuit);
        assert!(circuit.is_closed());
        fail(&circuit);
        assert!(circuit.is_open());
    }

    #[test]
    fn test_zero_window_never_resets() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_breaker(&clock).build();

        fail(&circuit);
        clock.advance(Duration::from_secs(24 * 3600));
        assert_eq!(circuit.counts().total_failures, 1);
        assert_eq!(circuit.generation(), 0);
    }

    #[test]
    fn test_state_change_fires_once_per_transition() {
        use parking_lot::Mutex;

        let transitions = Arc::new(Mutex::new(Vec::new()));
        let transitions_clone = transitions.clone();
        let clock = Arc::new(ManualClock::new());

        let circuit = manual_breaker(&clock)
            .max_half_open_requests(1)
            .open_state_timeout(Duration::from_secs(1))
            .ready_to_trip(|counts| counts.consecutive_failures >= 1)
            .on_state_change(move |name, from, to| {
                transitions_clone.lock().push((name.to_string(), from, to));
            })
            .build();

        fail(&circuit);
        fail(&circuit);
        clock.advance(Duration::from_secs(1));
        assert_eq!(circuit.state(), State::HalfOpen);
        assert_eq!(circuit.state(), State::HalfOpen);
        succeed(&circuit);

        assert_eq!(
            *transitions.lock(),
            vec![
                ("test".to_string(), State::Closed, State::Open),
                ("test".to_string(), State::Open, State::HalfOpen),
                ("test".to_string(), State::HalfOpen, State::Closed),
            ]
        );
    }

    #[test]
    fn test_panicking_hook_does_not_corrupt_state() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_breaker(&clock)
            .open_state_timeout(Duration::from_secs(1))
            .ready_to_trip(|counts| counts.consecutive_failures >= 1)
            .on_state_change(|_, _, _| panic!("observer exploded"))
            .build();

        fail(&circuit);
        assert_eq!(circuit.state(), State::Open);
        assert_eq!(circuit.generation(), 1);

        clock.advance(Duration::from_secs(1));
        succeed(&circuit);
        assert_eq!(circuit.state(), State::Closed);
        assert_eq!(circuit.generation(), 3);
    }

    #[test]
    fn test_per_state_hooks() {
        use std::sync::atomic::AtomicBool;

        let opened = Arc::new(AtomicBool::new(false));
        let half_opened = Arc::new(AtomicBool::new(false));
        let opened_clone = opened.clone();
        let half_opened_clone = half_opened.clone();
        let clock = Arc::new(ManualClock::new());

        let circuit = manual_breaker(&clock)
            .open_state_timeout(Duration::from_secs(1))
            .ready_to_trip(|counts| counts.consecutive_failures >= 1)
            .on_open(move |_| opened_clone.store(true, Ordering::SeqCst))
            .on_half_open(move |_| half_opened_clone.store(true, Ordering::SeqCst))
            .build();

        fail(&circuit);
        assert!(opened.load(Ordering::SeqCst));
        assert!(!half_opened.load(Ordering::SeqCst));

        clock.advance(Duration::from_secs(1));
        circuit.state();
        assert!(half_opened.load(Ordering::SeqCst));
    }

    #[test]
    fn test_classifier_can_forgive_errors() {
        let circuit = CircuitBreaker::builder("test")
            .ready_to_trip(|counts| counts.consecutive_failures >= 2)
            .is_successful(|ctx| {
                ctx.error
                    .downcast_ref::<&str>()
                    .is_some_and(|e| e.starts_with("client"))
            })
            .build();

        for _ in 0..5 {
            let result = circuit.call(|| Err::<(), _>("client_error"));
            assert!(matches!(result, Err(CircuitError::Execution(_))));
        }
        assert!(circuit.is_closed());
        assert_eq!(circuit.counts().total_successes, 5);

        let _ = circuit.call(|| Err::<(), _>("server_error"));
        let _ = circuit.call(|| Err::<(), _>("server_error"));
        assert!(circuit.is_open());
    }

    #[test]
    fn test_zero_jitter_gives_exact_cool_down() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_breaker(&clock)
            .open_state_timeout(Duration::from_secs(2))
            .open_state_jitter(0.0)
            .ready_to_trip(|counts| counts.consecutive_failures >= 1)
            .build();

        fail(&circuit);
        clock.advance(Duration::from_millis(1999));
        assert!(circuit.is_open());
        clock.advance(Duration::from_millis(1));
        assert_eq!(circuit.state(), State::HalfOpen);
    }

    #[test]
    fn test_jittered_cool_down_stays_within_bounds() {
        for _ in 0..20 {
            let clock = Arc::new(ManualClock::new());
            let circuit = manual_breaker(&clock)
                .open_state_timeout(Duration::from_secs(1))
                .open_state_jitter(0.5)
                .ready_to_trip(|counts| counts.consecutive_failures >= 1)
                .build();

            fail(&circuit);

            // 50% jitter: the cool-down lands between 500ms and 1000ms
            clock.advance(Duration::from_millis(499));
            assert!(circuit.is_open());
            clock.advance(Duration::from_millis(501));
            assert_eq!(circuit.state(), State::HalfOpen);
        }
    }

    #[test]
    fn test_reset_clears_state() {
        let circuit = CircuitBreaker::builder("test")
            .ready_to_trip(|counts| counts.consecutive_failures >= 2)
            .build();

        fail(&circuit);
        fail(&circuit);
        assert!(circuit.is_open());

        circuit.reset();
        assert!(circuit.is_closed());
        assert_eq!(circuit.counts(), Counts::default());
        assert_eq!(circuit.generation(), 2);
    }

    #[test]
    fn test_state_machine_guards() {
        let counts = Arc::new(CountStore::new());
        let ctx = CircuitContext {
            name: "test_circuit".to_string(),
            counts: counts.clone(),
            ready_to_trip: Arc::new(|counts: &Counts| counts.total_failures >= 3),
            ..Default::default()
        };

        let mut circuit = DynamicCircuit::new(ctx);

        let result = circuit.handle(CircuitEvent::Trip);
        assert!(result.is_err(), "Should fail guard when below threshold");

        counts.record_failure();
        counts.record_failure();
        counts.record_failure();

        circuit
            .handle(CircuitEvent::Trip)
            .expect("Should open after reaching threshold");
        assert_eq!(circuit.current_state(), "Open");

        // No expiry recorded yet: the cool-down guard lets the probe through
        circuit
            .handle(CircuitEvent::AttemptReset)
            .expect("Should move to HalfOpen");
        assert_eq!(circuit.current_state(), "HalfOpen");

        let result = circuit.handle(CircuitEvent::Close);
        assert!(result.is_err(), "Should fail guard without successes");
    }
}
