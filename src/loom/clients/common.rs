//! Shared HTTP plumbing for provider clients.
//!
//! A single pooled [`reqwest::Client`] lazily constructed with tuned
//! idle/keepalive settings, reused by every provider client in the process
//! rather than one client per request.

use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("failed to build shared HTTP client");
}

/// Borrow the process-wide pooled HTTP client.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}
