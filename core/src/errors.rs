//! Error types for breaker, transport and client operations

use bytes::Bytes;
use http::Response;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Boxed error used at the transport boundary
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors that can occur during circuit breaker operations
#[derive(Debug)]
pub enum CircuitError<E = BoxError> {
    /// Circuit is open, calls are being rejected
    Open { circuit: String },
    /// Every half-open probe slot is taken
    TooManyRequests { circuit: String },
    /// The wrapped operation failed
    Execution(E),
}

impl<E> CircuitError<E> {
    /// True for the two fail-fast rejections (the operation never ran)
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitError::Execution(_))
    }
}

impl<E: fmt::Display> fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitError::Open { circuit } => write!(f, "Circuit '{}' is open", circuit),
            CircuitError::TooManyRequests { circuit } => {
                write!(f, "Circuit '{}' half-open request limit reached", circuit)
            }
            CircuitError::Execution(e) => write!(f, "Circuit execution failed: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for CircuitError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure reported by, or while talking to, the transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(#[source] BoxError),

    #[error("failed to drain response body: {0}")]
    ResponseBody(#[source] BoxError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome of one attempt that the breaker counts as a failure
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// The server answered with a 5xx status; the drained response is kept
    #[error("server returned {}", .0.status())]
    ServerError(Response<Bytes>),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors returned by `ResilientClient::call`
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request body could not be buffered; nothing was sent
    #[error("failed to read request body: {0}")]
    BodyRead(#[source] BoxError),

    /// Every attempt failed and the last fault was not a server error status
    #[error("request failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        /// Most recent response seen by any attempt, if there was one
        last_response: Option<Box<Response<Bytes>>>,
        #[source]
        source: CircuitError<TransportError>,
    },
}

impl ClientError {
    /// The breaker or transport failure behind an exhausted call
    pub fn cause(&self) -> Option<&CircuitError<TransportError>> {
        match self {
            ClientError::Exhausted { source, .. } => Some(source),
            ClientError::BodyRead(_) => None,
        }
    }
}

/// Invalid builder or settings values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("open_state_jitter must be within [0.0, 1.0], got {0}")]
    JitterOutOfRange(f64),

    #[error("exponential backoff factor must be finite, got {0}")]
    InvalidBackoffFactor(f64),
}
