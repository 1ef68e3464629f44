//! Request body replay across attempts
//!
//! The body is read into memory once, before the first attempt. Every attempt
//! then gets its own request built from the original head and a view of the
//! buffered bytes starting at offset zero, so the transport sees identical
//! bytes no matter how many times the request is sent.

use crate::errors::BoxError;
use bytes::Bytes;
use http::Request;
use http::request::Parts;
use http_body::Body;
use http_body_util::BodyExt;

/// Buffered request body
#[derive(Debug, Clone, Default)]
pub struct ReplayBuffer {
    body: Option<Bytes>,
}

impl ReplayBuffer {
    /// Read `body` to the end; a body already at end of stream is not buffered
    pub async fn capture<B>(body: B) -> Result<Self, BoxError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        if body.is_end_stream() {
            return Ok(Self::default());
        }

        let collected = body.collect().await.map_err(Into::<BoxError>::into)?;
        Ok(Self {
            body: Some(collected.to_bytes()),
        })
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        Self { body: Some(bytes) }
    }

    pub fn len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The full body, from offset zero
    pub fn rewind(&self) -> Bytes {
        self.body.clone().unwrap_or_default()
    }

    /// A fresh request for one attempt, carrying the rewound body
    pub fn request(&self, head: &Parts) -> Request<Bytes> {
        let mut request = Request::new(self.rewind());
        *request.method_mut() = head.method.clone();
        *request.uri_mut() = head.uri.clone();
        *request.version_mut() = head.version;
        *request.headers_mut() = head.headers.clone();
        *request.extensions_mut() = head.extensions.clone();
        request
    }
}
