use std::{sync::OnceLock, time::Duration};

use reqwest::{Client, header};

/// Shared HTTP client for all provider adapters, built once and cloned
/// (cheap: `reqwest::Client` is an `Arc` internally).
pub(crate) fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            let mut headers = header::HeaderMap::new();
            headers.insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));

            Client::builder()
                .timeout(Duration::from_secs(120))
                // Hyper's pool only exposes max-idle-per-host and an idle timeout, no TTL
                // on individual connections. A short idle timeout keeps us picking up DNS
                // changes for upstream providers fronted by load balancers.
                .pool_idle_timeout(Some(Duration::from_secs(5)))
                .tcp_nodelay(true)
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .default_headers(headers)
                .build()
                .expect("failed to build default HTTP client")
        })
        .clone()
}
