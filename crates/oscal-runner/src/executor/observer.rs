use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Hook fired around every request the server executor sends
pub trait RequestObserver: Send + Sync {
    fn before_send(&self, _method: &Method, _url: &Url) {}

    /// `status` is `None` when no response arrived
    fn after_receive(
        &self,
        _method: &Method,
        _url: &Url,
        _status: Option<StatusCode>,
        _elapsed: Duration,
    ) {
    }
}

/// Default observer: logs each exchange
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RequestObserver for TracingObserver {
    fn before_send(&self, method: &Method, url: &Url) {
        debug!(method = %method, url = %url, "Sending request");
    }

    fn after_receive(
        &self,
        method: &Method,
        url: &Url,
        status: Option<StatusCode>,
        elapsed: Duration,
    ) {
        match status {
            Some(status) => info!(
                method = %method,
                path = %url.path(),
                status = %status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Server responded"
            ),
            None => info!(
                method = %method,
                path = %url.path(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Server did not respond"
            ),
        }
    }
}
