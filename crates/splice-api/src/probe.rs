// Single-shot HTTP health probe.
//
// Retry and backoff policy lives in splice-core; this only issues one GET
// and reports the status code.

use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Issues bare `GET` requests against health endpoints.
#[derive(Clone)]
pub struct HealthProbe {
    http: reqwest::Client,
}

impl HealthProbe {
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
        })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// GET `url` once, bounded by `timeout`. Any HTTP response is `Ok`;
    /// callers decide which status codes count as healthy.
    pub async fn get(&self, url: &Url, timeout: Duration) -> Result<u16, Error> {
        tracing::trace!(%url, "health probe");
        let resp = self
            .http
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                } else {
                    Error::Transport(e)
                }
            })?;
        Ok(resp.status().as_u16())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reports_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HealthProbe::new(&TransportConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/health", server.uri())).unwrap();
        assert_eq!(probe.get(&url, Duration::from_secs(2)).await.unwrap(), 503);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let probe = HealthProbe::new(&TransportConfig::default()).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let err = probe.get(&url, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    }
}
