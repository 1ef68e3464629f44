//! Basic circuit breaker and resilient client usage example

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use resilient_http::{Backoff, BoxError, CircuitBreaker, ClientError, ResilientClient, Transport};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Fails the first `failures` calls, then answers 200
struct FlakyUpstream {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Transport for FlakyUpstream {
    type Body = Full<Bytes>;

    async fn send(&self, request: Request<Bytes>) -> Result<Response<Self::Body>, BoxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        println!(
            "  -> {} {} ({} body bytes)",
            request.method(),
            request.uri(),
            request.body().len()
        );

        match call {
            n if n < self.failures && n % 2 == 0 => Err("connection refused".into()),
            n if n < self.failures => Ok(Response::builder()
                .status(503)
                .body(Full::new(Bytes::from_static(b"busy")))?),
            _ => Ok(Response::new(Full::new(Bytes::from_static(b"{\"paid\":true}")))),
        }
    }
}

fn breaker_walkthrough() {
    println!("=== Circuit Breaker ===\n");

    let circuit = CircuitBreaker::builder("payment_api")
        .ready_to_trip(|counts| counts.consecutive_failures >= 3)
        .open_state_timeout(Duration::from_secs(5))
        .on_open(|name| println!("Circuit '{}' opened!", name))
        .on_close(|name| println!("Circuit '{}' closed!", name))
        .on_half_open(|name| println!("Circuit '{}' half-open, testing...", name))
        .build();

    println!("Initial state: {}\n", circuit.state_name());

    for i in 1..=2 {
        match circuit.call(move || Ok::<_, String>(format!("Payment {}", i))) {
            Ok(result) => println!("ok: {}", result),
            Err(e) => println!("error: {}", e),
        }
    }

    for i in 1..=3 {
        if let Err(e) = circuit.call(move || Err::<String, _>(format!("Payment failed {}", i))) {
            println!("error: {}", e);
        }
    }
    println!("State: {} (generation {})\n", circuit.state_name(), circuit.generation());

    match circuit.call(|| Ok::<_, String>("Should be rejected")) {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("rejected: {} (fail fast: {})", e, e.is_rejection()),
    }

    circuit.reset();
    println!("State after reset: {}\n", circuit.state_name());
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    breaker_walkthrough();

    println!("=== Resilient Client ===\n");

    let client = ResilientClient::builder(FlakyUpstream {
        failures: 2,
        calls: AtomicU32::new(0),
    })
    .name("payments")
    .http_timeout(Duration::from_millis(500))
    .retry_count(3)
    .backoff(
        Backoff::exponential(
            Duration::from_millis(20),
            Duration::from_millis(200),
            2.0,
            Duration::from_millis(10),
        )
        .with_seed(7),
    )
    .on_state_change(|name, from, to| println!("'{}': {} -> {}", name, from, to))
    .build()?;

    let request = Request::post("http://payments.internal/charge")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(b"{\"amount\":1200}")))?;

    match client.call(request).await {
        Ok(response) => println!(
            "status {}: {}",
            response.status(),
            String::from_utf8_lossy(response.body())
        ),
        Err(ClientError::Exhausted { attempts, source, .. }) => {
            println!("gave up after {} attempts: {}", attempts, source)
        }
        Err(e) => println!("error: {}", e),
    }

    let counts = client.breaker().counts();
    println!(
        "\nBreaker '{}' is {} with {} failure(s) and {} success(es)",
        client.breaker().name(),
        client.breaker().state(),
        counts.total_failures,
        counts.total_successes
    );

    Ok(())
}
