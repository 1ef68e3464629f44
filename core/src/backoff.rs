//! Wait-time policies between retry attempts
//!
//! `BackoffSpec` is the plain data form (deserializable from settings files);
//! `Backoff` is the runtime policy, which also owns the jitter source. Delays are
//! computed with millisecond granularity.

use crate::errors::ConfigError;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Declarative backoff description
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffSpec {
    /// No wait between attempts
    #[default]
    None,

    /// `base + uniform(0, max_jitter)`
    Constant {
        #[serde(with = "humantime_serde")]
        base: Duration,
        #[serde(with = "humantime_serde", default)]
        max_jitter: Duration,
    },

    /// `min(initial * factor^attempt, max) + uniform(0, max_jitter)`
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        factor: f64,
        #[serde(with = "humantime_serde", default)]
        max_jitter: Duration,
    },
}

impl BackoffSpec {
    /// A factor below 1.0 decays and a `max` below `initial` caps from the start;
    /// only a non-finite factor is rejected
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            BackoffSpec::Exponential { factor, .. } if !factor.is_finite() => {
                Err(ConfigError::InvalidBackoffFactor(factor))
            }
            _ => Ok(()),
        }
    }
}

/// Caller-supplied delay function of the attempt index
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

#[derive(Clone)]
enum Strategy {
    NoOp,
    Constant {
        base_ms: u64,
        max_jitter_ms: u64,
    },
    Exponential {
        initial_ms: f64,
        max_ms: f64,
        factor: f64,
        max_jitter_ms: u64,
    },
    Custom(BackoffFn),
}

/// Runtime backoff policy
///
/// Clones share one jitter source. Seed it with `with_seed` for reproducible
/// delays.
///
/// # Example
///
/// ```rust
/// use resilient_http::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::exponential(
///     Duration::from_millis(100),
///     Duration::from_secs(2),
///     2.0,
///     Duration::ZERO,
/// );
/// assert_eq!(backoff.next(0), Duration::from_millis(100));
/// assert_eq!(backoff.next(3), Duration::from_millis(800));
/// assert_eq!(backoff.next(10), Duration::from_secs(2));
/// ```
#[derive(Clone)]
pub struct Backoff {
    strategy: Strategy,
    rng: Arc<Mutex<StdRng>>,
}

impl Backoff {
    fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// Always waits zero
    pub fn none() -> Self {
        Self::with_strategy(Strategy::NoOp)
    }

    pub fn constant(base: Duration, max_jitter: Duration) -> Self {
        Self::with_strategy(Strategy::Constant {
            base_ms: millis(base),
            max_jitter_ms: millis(max_jitter),
        })
    }

    /// The cap applies before jitter, so a delay may exceed `max` by up to `max_jitter`
    pub fn exponential(initial: Duration, max: Duration, factor: f64, max_jitter: Duration) -> Self {
        Self::with_strategy(Strategy::Exponential {
            initial_ms: millis(initial) as f64,
            max_ms: millis(max) as f64,
            factor,
            max_jitter_ms: millis(max_jitter),
        })
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::with_strategy(Strategy::Custom(Arc::new(f)))
    }

    pub fn from_spec(spec: &BackoffSpec) -> Self {
        match *spec {
            BackoffSpec::None => Self::none(),
            BackoffSpec::Constant { base, max_jitter } => Self::constant(base, max_jitter),
            BackoffSpec::Exponential {
                initial,
                max,
                factor,
                max_jitter,
            } => Self::exponential(initial, max, factor, max_jitter),
        }
    }

    /// Replace the jitter source with a deterministic one
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Arc::new(Mutex::new(rng));
        self
    }

    /// Delay to wait after the failed attempt with index `attempt` (0-based)
    pub fn next(&self, attempt: u32) -> Duration {
        match &self.strategy {
            Strategy::NoOp => Duration::ZERO,
            Strategy::Constant {
                base_ms,
                max_jitter_ms,
            } => Duration::from_millis(base_ms.saturating_add(self.jitter(*max_jitter_ms))),
            Strategy::Exponential {
                initial_ms,
                max_ms,
                factor,
                max_jitter_ms,
            } => {
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let capped = (initial_ms * factor.powi(exponent)).min(*max_ms);
                Duration::from_millis((capped as u64).saturating_add(self.jitter(*max_jitter_ms)))
            }
            Strategy::Custom(f) => f(attempt),
        }
    }

    fn jitter(&self, max_ms: u64) -> u64 {
        if max_ms == 0 {
            return 0;
        }
        self.rng.lock().gen_range(0..=max_ms)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::none()
    }
}

impl From<&BackoffSpec> for Backoff {
    fn from(spec: &BackoffSpec) -> Self {
        Self::from_spec(spec)
    }
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Backoff");
        match &self.strategy {
            Strategy::NoOp => out.field("kind", &"none"),
            Strategy::Constant {
                base_ms,
                max_jitter_ms,
            } => out
                .field("kind", &"constant")
                .field("base_ms", base_ms)
                .field("max_jitter_ms", max_jitter_ms),
            Strategy::Exponential {
                initial_ms,
                max_ms,
                factor,
                max_jitter_ms,
            } => out
                .field("kind", &"exponential")
                .field("initial_ms", initial_ms)
                .field("max_ms", max_ms)
                .field("factor", factor)
                .field("max_jitter_ms", max_jitter_ms),
            Strategy::Custom(_) => out.field("kind", &"custom"),
        };
        out.finish()
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}
