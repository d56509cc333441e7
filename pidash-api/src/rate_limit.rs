//! Per-client-IP rate limiting with governor.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock, QuantaInstant};
use governor::{NotUntil, Quota, RateLimiter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::ApiError;

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

struct ClientLimiter {
    limiter: DirectRateLimiter,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct RateLimitState {
    quota: Quota,
    limiters: Arc<DashMap<IpAddr, ClientLimiter>>,
}

impl RateLimitState {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        Self {
            quota,
            limiters: Arc::new(DashMap::new()),
        }
    }

    /// Take one cell from `ip`'s bucket.
    fn check(&self, ip: IpAddr) -> Result<(), NotUntil<QuantaInstant>> {
        let mut client = self.limiters.entry(ip).or_insert_with(|| ClientLimiter {
            limiter: RateLimiter::direct(self.quota),
            last_seen: Instant::now(),
        });
        client.last_seen = Instant::now();
        client.limiter.check()
    }

    /// Time after which an idle client's bucket is full again.
    pub fn refill_period(&self) -> Duration {
        self.quota
            .replenish_interval()
            .saturating_mul(self.quota.burst_size().get())
    }

    /// Forget clients idle for longer than a full refill. A dropped limiter
    /// is indistinguishable from a fresh one, so limits are unaffected.
    pub fn prune_idle(&self) -> usize {
        let idle_after = self.refill_period();
        let before = self.limiters.len();
        self.limiters
            .retain(|_, client| client.last_seen.elapsed() <= idle_after);
        before.saturating_sub(self.limiters.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiters.len()
    }
}

/// Peer address when served with connect info, else proxy headers, else loopback.
fn client_ip(request: &Request) -> IpAddr {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }

    let headers = request.headers();
    let forwarded: Option<IpAddr> = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    let real_ip = || -> Option<IpAddr> {
        headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub async fn limit_by_ip(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    match state.check(ip) {
        Ok(()) => next.run(request).await,
        Err(not_until) => {
            let retry_after = not_until
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1);
            warn!(%ip, retry_after, "rate limit exceeded");
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}
