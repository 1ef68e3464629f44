//! Test doubles shared by the module tests

use crate::errors::BoxError;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body::{Body, Frame};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// In-memory body yielding one data frame per chunk, optionally ending in an error
#[derive(Debug, Default)]
pub(crate) struct ChunkedBody {
    frames: VecDeque<Result<Bytes, BoxError>>,
}

impl ChunkedBody {
    pub(crate) fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        Self {
            frames: chunks.into_iter().map(|c| Ok(c.into())).collect(),
        }
    }

    pub(crate) fn failing_after<I, C>(chunks: I, message: &'static str) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        let mut body = Self::new(chunks);
        body.frames.push_back(Err(BoxError::from(message)));
        body
    }
}

impl Body for ChunkedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.frames.pop_front().map(|frame| frame.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.frames.is_empty()
    }
}

/// What the scripted transport does for one call
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    /// Respond with this status and a short body
    Status(u16),
    /// Fail before any response arrives
    Fail(&'static str),
    /// Respond 200, then break while the body is drained
    BrokenBody,
    /// Answer 200 after this long
    Slow(Duration),
    /// Never answer
    Hang,
}

/// Transport that plays back a fixed script and records every request body
///
/// Once the script runs out every call answers 200.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedTransport {
    steps: Arc<Mutex<VecDeque<Step>>>,
    bodies: Arc<Mutex<Vec<Bytes>>>,
}

impl ScriptedTransport {
    pub(crate) fn new<I>(steps: I) -> Self
    where
        I: IntoIterator<Item = Step>,
    {
        Self {
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
            bodies: Arc::default(),
        }
    }

    pub(crate) fn bodies(&self) -> Vec<Bytes> {
        self.bodies.lock().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.bodies.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Body = ChunkedBody;

    async fn send(&self, request: Request<Bytes>) -> Result<Response<Self::Body>, BoxError> {
        self.bodies.lock().push(request.body().clone());
        let step = self.steps.lock().pop_front().unwrap_or(Step::Status(200));

        match step {
            Step::Status(code) => Ok(Response::builder()
                .status(code)
                .body(ChunkedBody::new([format!("status {code}")]))?),
            Step::Fail(message) => Err(message.into()),
            Step::BrokenBody => Ok(Response::new(ChunkedBody::failing_after(
                ["par"],
                "connection reset by peer",
            ))),
            Step::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Response::new(ChunkedBody::new(["slow"])))
            }
            Step::Hang => std::future::pending().await,
        }
    }
}
