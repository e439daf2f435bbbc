use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::time::Instant;

/// Header identifying the calling client
pub const CLIENT_ID_HEADER: &str = "x-client-id";
const ANONYMOUS: &str = "anonymous";

#[derive(Clone)]
struct Bucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl Bucket {
    fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_update: Instant::now(),
        }
    }

    fn allow_request(&mut self, tokens: u32) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = f64::min(
            self.capacity as f64,
            self.tokens + elapsed * self.refill_rate,
        );
        self.last_update = now;

        if self.tokens >= tokens as f64 {
            self.tokens -= tokens as f64;
            true
        } else {
            false
        }
    }
}

/// Per-client token buckets
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: u32,
    refill_rate: f64,
}

impl RateLimiter {
    /// `capacity` tokens per client, refilled at `refill_rate` per second
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_rate,
        }
    }

    pub fn check_rate_limit(&self, key: &str) -> Result<(), GatewayError> {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(self.capacity, self.refill_rate));

        if bucket.allow_request(1) {
            Ok(())
        } else {
            Err(GatewayError::RateLimitExceeded(key.to_string()))
        }
    }

    pub fn clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Axum middleware charging one token per request to the caller's bucket
pub async fn enforce(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let client = request
        .headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string();

    if let Err(e) = state.rate_limiter.check_rate_limit(&client) {
        GatewayMetrics::incr(&state.metrics.rate_limited);
        tracing::debug!(client = %client, "request rate limited");
        return Err(e);
    }

    Ok(next.run(request).await)
}
