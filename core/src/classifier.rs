//! Outcome classification for error filtering
//!
//! An operation that returns `Ok` always counts as a success. When it returns
//! `Err`, the breaker asks its classifier whether that error should still be
//! counted as a success (for example a 404 from a lookup endpoint).

use std::any::Any;
use std::time::Duration;

/// Context provided to classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// How long the call ran before failing
    pub duration: Duration,
}

/// Trait for classifying errors - decides if an error counts as a success
///
/// # Examples
///
/// ```rust
/// use resilient_http::{FailureContext, SuccessClassifier};
///
/// #[derive(Debug)]
/// struct IgnoreNotFound;
///
/// impl SuccessClassifier for IgnoreNotFound {
///     fn is_successful(&self, ctx: &FailureContext<'_>) -> bool {
///         ctx.error
///             .downcast_ref::<&str>()
///             .is_some_and(|e| *e == "not found")
///     }
/// }
/// ```
pub trait SuccessClassifier: Send + Sync + std::fmt::Debug {
    /// Returns `true` if this error should be counted as a success
    fn is_successful(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Default classifier: every error is a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl SuccessClassifier for DefaultClassifier {
    fn is_successful(&self, _ctx: &FailureContext<'_>) -> bool {
        false
    }
}

/// Predicate-based classifier using a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> SuccessClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn is_successful(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}
