//! The outbound transport the client wraps
//!
//! The client never opens connections itself. It hands each attempt to a
//! `Transport` and only looks at what comes back: a response whose body it
//! drains, or an error it treats as a transport-level failure.

use crate::errors::BoxError;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body::Body;

/// Sends one request and returns the response or a transport-level failure
///
/// Connection pooling, TLS and name resolution all live behind this trait.
/// A server error status is a normal `Ok` response here; classifying it is the
/// client's job.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use bytes::Bytes;
/// use http::{Request, Response};
/// use http_body_util::Full;
/// use resilient_http::{BoxError, Transport};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Transport for Echo {
///     type Body = Full<Bytes>;
///
///     async fn send(&self, request: Request<Bytes>) -> Result<Response<Self::Body>, BoxError> {
///         Ok(Response::new(Full::new(request.into_body())))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Response body type; drained by the client before classification
    type Body: Body<Data = Bytes, Error: Into<BoxError>> + Send + 'static;

    async fn send(&self, request: Request<Bytes>) -> Result<Response<Self::Body>, BoxError>;
}
