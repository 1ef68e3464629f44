//! resilient-http - Circuit breaking and bounded retry for outbound HTTP calls
//!
//! This crate wraps an HTTP transport with:
//! - A circuit breaker state machine (Closed → Open → HalfOpen) with rolling counts
//! - Generation fencing, so calls that outlive a transition never touch fresh counts
//! - Bounded retry with constant, exponential or custom backoff and seedable jitter
//! - Request body replay, so every attempt sends identical bytes
//!
//! # Example
//!
//! ```rust
//! use resilient_http::CircuitBreaker;
//!
//! let circuit = CircuitBreaker::builder("payment_api")
//!     .max_half_open_requests(2)
//!     .ready_to_trip(|counts| counts.consecutive_failures >= 3)
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build();
//!
//! // Execute with circuit protection
//! let result = circuit.call(|| {
//!     // Your service call here
//!     Ok::<_, String>("success")
//! });
//! assert!(result.is_ok());
//!
//! // Check circuit state
//! if circuit.is_open() {
//!     println!("Circuit is open, skipping call");
//! }
//! ```
//!
//! For HTTP, build a [`ResilientClient`] around your own [`Transport`].

pub mod backoff;
pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod client;
pub mod clock;
pub mod errors;
pub mod replay;
pub mod retry;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backoff::{Backoff, BackoffFn, BackoffSpec};
pub use builder::CircuitBuilder;
pub use callbacks::Callbacks;
pub use circuit::{CircuitBreaker, Config, State};
pub use classifier::{DefaultClassifier, FailureContext, PredicateClassifier, SuccessClassifier};
pub use client::{ClientBuilder, ResilientClient, Settings};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{AttemptError, BoxError, CircuitError, ClientError, ConfigError, TransportError};
pub use replay::ReplayBuffer;
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
pub use storage::Counts;
pub use transport::Transport;
