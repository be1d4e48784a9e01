//! Token-bucket rate limiting keyed by client IP (§4.7).

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use tracing::warn;

type IpRateLimiter = RateLimiter<std::net::IpAddr, DashMapStateStore<std::net::IpAddr>, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub limiter: Arc<IpRateLimiter>,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        let enabled = std::env::var("RATE_LIMIT_ENABLED").unwrap_or_else(|_| "true".into()) == "true";

        let rps = std::env::var("RATE_LIMIT_RPS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(100);
        let burst = std::env::var("RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(200);

        let default_rps = NonZeroU32::new(100).unwrap_or(NonZeroU32::MIN);
        let default_burst = NonZeroU32::new(200).unwrap_or(NonZeroU32::MIN);
        let quota =
            Quota::per_second(NonZeroU32::new(rps).unwrap_or(default_rps)).allow_burst(NonZeroU32::new(burst).unwrap_or(default_burst));

        tracing::info!(enabled, rps, burst, "rate limiting configured");

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            enabled,
        }
    }
}

pub async fn rate_limit_middleware(
    State(config): State<RateLimitConfig>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !config.enabled {
        return Ok(next.run(req).await);
    }

    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<std::net::IpAddr>().ok())
        .unwrap_or_else(|| peer.ip());

    match config.limiter.check_key(&ip) {
        Ok(_) => Ok(next.run(req).await),
        Err(_) => {
            warn!(%ip, "rate limit exceeded");
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
    }
}
