//! HTTP health probing for engine processes.

use std::time::Duration;

use tracing::debug;

/// Build the keep-alive client used for probes and proxying.
///
/// Engines are local, so environment proxies are ignored. Only the connect
/// phase is bounded here; probes set their own request timeout and proxied
/// completions may legitimately run long.
pub fn build_client(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .no_proxy()
        .build()
}

/// One health probe. Only `200 OK` counts as healthy.
///
/// Connection refused, timeouts and any other status are "not yet healthy".
pub async fn probe(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    timeout: Duration,
) -> bool {
    let mut request = client.get(url).timeout(timeout);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    match request.send().await {
        Ok(response) if response.status() == reqwest::StatusCode::OK => true,
        Ok(response) => {
            debug!(%url, status = %response.status(), "Health check returned non-OK status");
            false
        }
        Err(e) => {
            debug!(%url, error = %e, "Health check failed");
            false
        }
    }
}
