//! Resilient HTTP client
//!
//! `ResilientClient` ties the pieces together: it buffers the request body once,
//! then lets the retry executor drive attempts, each of which goes through the
//! circuit breaker and then the transport. A 5xx status is a failure for the
//! breaker and a reason to retry, but once attempts run out the last 5xx
//! response is handed back as `Ok` so the caller can inspect the status itself.

use crate::{
    backoff::{Backoff, BackoffSpec},
    callbacks::Callbacks,
    circuit::{CircuitBreaker, Config, ReadyToTripFn, State},
    classifier::{FailureContext, PredicateClassifier, SuccessClassifier},
    clock::Clock,
    errors::{AttemptError, BoxError, CircuitError, ClientError, ConfigError, TransportError},
    replay::ReplayBuffer,
    retry::{RetryError, RetryExecutor, RetryPolicy},
    storage::Counts,
    transport::Transport,
};
use bytes::Bytes;
use http::request::Parts;
use http::{Request, Response};
use http_body::Body;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Per-attempt timeout used when none is configured
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(1);

/// Data-valued client options, loadable from a settings file
///
/// Every field has a default, so a partial document is fine:
///
/// ```rust
/// use resilient_http::Settings;
/// use std::time::Duration;
///
/// let settings: Settings = serde_json::from_str(
///     r#"{"name": "billing", "http_timeout": "250ms", "retry_count": 2}"#,
/// )
/// .unwrap();
/// assert_eq!(settings.http_timeout, Duration::from_millis(250));
/// assert_eq!(settings.max_half_open_requests, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Breaker identity used in logs and hook arguments
    pub name: String,
    /// Bound on one attempt, covering the send and the response body drain;
    /// zero leaves attempts unbounded
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// Half-open probe bound; zero behaves as one
    pub max_half_open_requests: u32,
    /// Rolling window while closed; zero never resets
    #[serde(with = "humantime_serde")]
    pub closed_window_interval: Duration,
    /// Cool-down before probing; zero behaves as 60s
    #[serde(with = "humantime_serde")]
    pub open_state_timeout: Duration,
    /// Cool-down jitter factor within [0.0, 1.0]
    pub open_state_jitter: f64,
    /// Attempts beyond the first
    pub retry_count: u32,
    pub backoff: BackoffSpec,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: String::new(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            max_half_open_requests: 0,
            closed_window_interval: Duration::ZERO,
            open_state_timeout: Duration::ZERO,
            open_state_jitter: 0.0,
            retry_count: 0,
            backoff: BackoffSpec::None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.open_state_jitter) {
            return Err(ConfigError::JitterOutOfRange(self.open_state_jitter));
        }
        self.backoff.validate()
    }

    /// The breaker knobs carried by these settings
    pub fn breaker_config(&self) -> Config {
        Config {
            max_half_open_requests: self.max_half_open_requests,
            closed_window_interval: self.closed_window_interval,
            open_state_timeout: self.open_state_timeout,
            open_state_jitter: self.open_state_jitter,
        }
    }
}

/// Builder for `ResilientClient`
pub struct ClientBuilder<T> {
    transport: T,
    settings: Settings,
    ready_to_trip: Option<ReadyToTripFn>,
    classifier: Option<Arc<dyn SuccessClassifier>>,
    clock: Option<Arc<dyn Clock>>,
    backoff: Option<Backoff>,
    callbacks: Callbacks,
}

impl<T: Transport> ClientBuilder<T> {
    pub fn new(transport: T) -> Self {
        Self::from_settings(transport, Settings::default())
    }

    /// Start from loaded settings; closures can still be attached afterwards
    pub fn from_settings(transport: T, settings: Settings) -> Self {
        Self {
            transport,
            settings,
            ready_to_trip: None,
            classifier: None,
            clock: None,
            backoff: None,
            callbacks: Callbacks::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.settings.name = name.into();
        self
    }

    /// Zero disables the per-attempt timeout
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.settings.http_timeout = timeout;
        self
    }

    pub fn max_half_open_requests(mut self, requests: u32) -> Self {
        self.settings.max_half_open_requests = requests;
        self
    }

    pub fn closed_window_interval(mut self, interval: Duration) -> Self {
        self.settings.closed_window_interval = interval;
        self
    }

    pub fn open_state_timeout(mut self, timeout: Duration) -> Self {
        self.settings.open_state_timeout = timeout;
        self
    }

    /// Checked by `build`, unlike the clamping `CircuitBuilder::open_state_jitter`
    pub fn open_state_jitter(mut self, factor: f64) -> Self {
        self.settings.open_state_jitter = factor;
        self
    }

    pub fn retry_count(mut self, retries: u32) -> Self {
        self.settings.retry_count = retries;
        self
    }

    /// Declarative backoff; ignored once `backoff` is set
    pub fn backoff_spec(mut self, spec: BackoffSpec) -> Self {
        self.settings.backoff = spec;
        self
    }

    /// Runtime backoff policy, e.g. a custom function or a seeded one
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn ready_to_trip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Some(Arc::new(f));
        self
    }

    /// Decide which failed attempts still count as breaker successes
    ///
    /// The predicate sees server-error responses and transport failures alike.
    pub fn is_successful<F>(mut self, f: F) -> Self
    where
        F: Fn(&AttemptError) -> bool + Send + Sync + 'static,
    {
        let classifier = PredicateClassifier::new(move |ctx: &FailureContext<'_>| {
            ctx.error.downcast_ref::<AttemptError>().is_some_and(&f)
        });
        self.classifier = Some(Arc::new(classifier));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        self.callbacks.on_state_change = Some(Arc::new(f));
        self
    }

    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Validate the options and build the client
    pub fn build(self) -> Result<ResilientClient<T>, ConfigError> {
        self.settings.validate()?;

        let mut breaker = CircuitBreaker::builder(self.settings.name.clone())
            .config(self.settings.breaker_config())
            .callbacks(self.callbacks);
        if let Some(f) = self.ready_to_trip {
            breaker = breaker.ready_to_trip_fn(f);
        }
        if let Some(classifier) = self.classifier {
            breaker = breaker.success_classifier(classifier);
        }
        if let Some(clock) = self.clock {
            breaker = breaker.clock(clock);
        }

        let backoff = self
            .backoff
            .unwrap_or_else(|| Backoff::from_spec(&self.settings.backoff));
        let retry = RetryExecutor::new(RetryPolicy::new(self.settings.retry_count, backoff));

        Ok(ResilientClient {
            inner: Arc::new(Inner {
                transport: self.transport,
                breaker: breaker.build(),
                retry,
                http_timeout: self.settings.http_timeout,
            }),
        })
    }
}

struct Inner<T> {
    transport: T,
    breaker: CircuitBreaker,
    retry: RetryExecutor,
    http_timeout: Duration,
}

/// HTTP client with circuit breaking, bounded retry and body replay
///
/// Clones share the transport and the breaker.
///
/// # Example
///
/// ```rust,no_run
/// # use resilient_http::{ResilientClient, Transport};
/// # async fn demo<T: Transport>(transport: T) -> Result<(), Box<dyn std::error::Error>> {
/// use resilient_http::Backoff;
/// use std::time::Duration;
///
/// let client = ResilientClient::builder(transport)
///     .name("inventory")
///     .retry_count(2)
///     .backoff(Backoff::constant(Duration::from_millis(50), Duration::from_millis(20)))
///     .build()?;
///
/// let request = http::Request::get("http://inventory.internal/items/42")
///     .body(http_body_util::Empty::<bytes::Bytes>::new())?;
/// let response = client.call(request).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
pub struct ResilientClient<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ResilientClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ResilientClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("breaker", &self.inner.breaker)
            .field("retry", self.inner.retry.policy())
            .field("http_timeout", &self.inner.http_timeout)
            .finish()
    }
}

impl<T: Transport> ResilientClient<T> {
    pub fn builder(transport: T) -> ClientBuilder<T> {
        ClientBuilder::new(transport)
    }

    /// The breaker shared by every call through this client
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.inner.retry.policy()
    }

    pub fn http_timeout(&self) -> Duration {
        self.inner.http_timeout
    }

    /// Send `request`, retrying through the breaker until an attempt succeeds
    /// or the retry budget is spent
    ///
    /// Any status below 500 is a success and is returned at once. When every
    /// attempt failed and the last one got a 5xx, that response is returned as
    /// `Ok`. Otherwise the result is `ClientError::Exhausted`, carrying the
    /// breaker or transport failure of the last attempt.
    pub async fn call<B>(&self, request: Request<B>) -> Result<Response<Bytes>, ClientError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let (head, body) = request.into_parts();
        let replay = ReplayBuffer::capture(body)
            .await
            .map_err(ClientError::BodyRead)?;

        let mut last_response = None;
        let outcome = self
            .inner
            .retry
            .run_with(
                |attempt| self.attempt(attempt, &head, &replay),
                |_, error| {
                    if let CircuitError::Execution(AttemptError::ServerError(response)) = error {
                        last_response = Some(response);
                    }
                },
            )
            .await;

        let RetryError { attempts, error } = match outcome {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let source = match error {
            CircuitError::Execution(AttemptError::ServerError(response)) => return Ok(response),
            CircuitError::Execution(AttemptError::Transport(e)) => CircuitError::Execution(e),
            CircuitError::Open { circuit } => CircuitError::Open { circuit },
            CircuitError::TooManyRequests { circuit } => CircuitError::TooManyRequests { circuit },
        };

        tracing::warn!(
            circuit = %self.inner.breaker.name(),
            method = %head.method,
            uri = %head.uri,
            attempts,
            error = %source,
            "request failed on every attempt"
        );
        Err(ClientError::Exhausted {
            attempts,
            last_response: last_response.map(Box::new),
            source,
        })
    }

    async fn attempt(
        &self,
        index: u32,
        head: &Parts,
        replay: &ReplayBuffer,
    ) -> Result<Response<Bytes>, CircuitError<AttemptError>> {
        tracing::debug!(
            circuit = %self.inner.breaker.name(),
            attempt = index,
            method = %head.method,
            uri = %head.uri,
            body_len = replay.len(),
            "sending attempt"
        );

        self.inner
            .breaker
            .execute(|| self.exchange(replay.request(head)))
            .await
    }

    /// One send plus response drain, classified for the breaker
    async fn exchange(&self, request: Request<Bytes>) -> Result<Response<Bytes>, AttemptError> {
        let response = self.send(request).await?;
        if response.status().is_server_error() {
            return Err(AttemptError::ServerError(response));
        }
        Ok(response)
    }

    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, TransportError> {
        let timeout = self.inner.http_timeout;
        let exchange = async {
            let response = self
                .inner
                .transport
                .send(request)
                .await
                .map_err(TransportError::Request)?;

            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| TransportError::ResponseBody(e.into()))?
                .to_bytes();
            Ok::<_, TransportError>(Response::from_parts(parts, body))
        };

        if timeout.is_zero() {
            return exchange.await;
        }
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }
}
