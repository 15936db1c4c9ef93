//! Sliding window rate limiting for `seasaw` applications.
//!
//! [`RateLimit`] counts requests per client key inside a fixed window. Every response carries
//! `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset` (epoch seconds); once a
//! key goes over the limit the request is answered right away with the configured status.
//!
//! ```
//! use seasaw::App;
//! use seasaw_rate_limit::{RateLimit, RateLimitOptions};
//!
//! let app = App::new().use_middleware(RateLimit::new(RateLimitOptions { max: 2, ..Default::default() }));
//! # let _ = app;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use http::{HeaderName, HeaderValue, StatusCode};
use seasaw::operation::Operation;
use seasaw::{Flow, Middleware, RequestContext, response};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

pub const X_RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitOptions {
    /// Length of a window, in milliseconds when deserialized.
    #[serde(rename = "window_ms", with = "millis")]
    pub window: Duration,
    /// Requests allowed per key and window.
    pub max: u64,
    pub message: String,
    /// Status of the rejection, `429` unless set.
    #[serde(rename = "status_code")]
    pub status: u16,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max: 100,
            message: "Too many requests, please try again later".into(),
            status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(window.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

type KeyFn = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    reset_at: Instant,
}

/// The rate limiting middleware. Clones share their counters.
#[derive(Clone)]
pub struct RateLimit {
    options: Arc<RateLimitOptions>,
    status: StatusCode,
    store: Arc<DashMap<String, Window>>,
    key: KeyFn,
}

impl fmt::Debug for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimit").field("options", &self.options).field("keys", &self.store.len()).finish_non_exhaustive()
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(RateLimitOptions::default())
    }
}

impl RateLimit {
    pub fn new(options: RateLimitOptions) -> Self {
        let status = StatusCode::from_u16(options.status).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
        Self { options: Arc::new(options), status, store: Arc::new(DashMap::new()), key: Arc::new(client_key) }
    }

    /// Replaces how the client key is derived from a request.
    #[must_use]
    pub fn key_with<F>(mut self, key: F) -> Self
    where
        F: Fn(&RequestContext) -> String + Send + Sync + 'static,
    {
        self.key = Arc::new(key);
        self
    }

    pub fn options(&self) -> &RateLimitOptions {
        &self.options
    }

    /// Counts one request for `key` and returns the updated window.
    fn hit(&self, key: String, now: Instant) -> Window {
        self.store.retain(|_, window| window.reset_at > now);

        let mut window = self.store.entry(key).or_insert(Window { count: 0, reset_at: now + self.options.window });
        if window.reset_at <= now {
            *window = Window { count: 0, reset_at: now + self.options.window };
        }
        window.count += 1;
        *window
    }
}

impl Middleware for RateLimit {
    fn call(&self, ctx: RequestContext) -> Operation<Flow> {
        let key = (self.key)(&ctx);
        let now = Instant::now();
        let window = self.hit(key.clone(), now);
        let max = self.options.max;

        let accumulator = ctx.response();
        accumulator.insert_header(HeaderName::from_static(X_RATE_LIMIT_LIMIT), HeaderValue::from(max));
        accumulator.insert_header(HeaderName::from_static(X_RATE_LIMIT_REMAINING), HeaderValue::from(max.saturating_sub(window.count)));
        accumulator.insert_header(HeaderName::from_static(X_RATE_LIMIT_RESET), HeaderValue::from(reset_epoch_secs(window.reset_at, now)));

        if window.count > max {
            debug!(key = %key, count = window.count, max, "rate limit exceeded");
            let rejection = Rejection { error: &self.options.message };
            return Operation::ready(Flow::Respond(response::json_with_status(self.status, &rejection)));
        }
        Operation::ready(Flow::Continue)
    }
}

#[derive(Serialize)]
struct Rejection<'a> {
    error: &'a str,
}

/// `x-forwarded-for`, then `x-real-ip`, then `"unknown"`.
fn client_key(ctx: &RequestContext) -> String {
    ["x-forwarded-for", "x-real-ip"]
        .into_iter()
        .find_map(|name| ctx.headers().get(name).and_then(|value| value.to_str().ok()))
        .unwrap_or("unknown")
        .to_owned()
}

fn reset_epoch_secs(reset_at: Instant, now: Instant) -> u64 {
    let reset = SystemTime::now() + reset_at.saturating_duration_since(now);
    let since_epoch = reset.duration_since(UNIX_EPOCH).unwrap_or_default();
    since_epoch.as_secs() + u64::from(since_epoch.subsec_nanos() > 0)
}
