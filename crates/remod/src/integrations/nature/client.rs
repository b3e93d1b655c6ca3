use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use super::models::Record;
use super::models::User;
use super::rate_limit::RateLimit;
use super::rate_limit::RateLimitTracker;

/// Default API endpoint.
pub const RESOURCE: &str = "https://api.nature.global/1";

/// Errors surfaced by API calls.
///
/// `AuthenticationFailed` is fatal for the integration; everything else is
/// retryable one way or another.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("access token rejected")]
    AuthenticationFailed,

    #[error("api quota exhausted until {reset}")]
    QuotaExhausted { reset: DateTime<Utc> },

    #[error("api request failed with status {status}")]
    UpdateFailed { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// A raw HTTP exchange result, decoupled from any particular HTTP crate so
/// tests can fabricate responses.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport seam under the API client.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, token: &str) -> Result<HttpResponse, ApiError>;

    async fn post_form(
        &self,
        url: &str,
        token: &str,
        form: &[(String, String)],
    ) -> Result<HttpResponse, ApiError>;
}

/// Production transport backed by reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn convert(response: reqwest::Response) -> Result<HttpResponse, ApiError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, token: &str) -> Result<HttpResponse, ApiError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::convert(response).await
    }

    async fn post_form(
        &self,
        url: &str,
        token: &str,
        form: &[(String, String)],
    ) -> Result<HttpResponse, ApiError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .form(form)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::convert(response).await
    }
}

/// Client for the cloud API. Shared by the pollers and every entity that
/// issues commands; all calls funnel through `classify` so the quota tracker
/// sees every response.
pub struct NatureClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    access_token: String,
    rate_limit: RateLimitTracker,
}

impl NatureClient {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: String, access_token: String) -> Self {
        Self {
            transport,
            base_url,
            access_token,
            rate_limit: RateLimitTracker::new(),
        }
    }

    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    /// Fold a raw response into the tracker and map failure statuses.
    fn classify(&self, response: HttpResponse) -> Result<String, ApiError> {
        if response.status == 401 {
            return Err(ApiError::AuthenticationFailed);
        }

        let reset = response
            .header("x-rate-limit-reset")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        let remaining = response
            .header("x-rate-limit-remaining")
            .and_then(|v| v.parse::<i64>().ok());
        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            debug!(remaining, %reset, "api quota");
            self.rate_limit.update(RateLimit { remaining, reset });
        }

        if response.status == 429 {
            let reset = reset.unwrap_or_else(|| Utc::now() + chrono::TimeDelta::seconds(60));
            return Err(ApiError::QuotaExhausted { reset });
        }

        if response.status != 200 {
            return Err(ApiError::UpdateFailed {
                status: response.status,
            });
        }

        Ok(response.body)
    }

    async fn get_raw(&self, path: &str) -> Result<String, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.transport.get(&url, &self.access_token).await?;
        self.classify(response)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let body = self.get_raw(path).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch a list resource and key it by record id.
    pub async fn get_records<T>(&self, path: &str) -> Result<HashMap<String, T>, ApiError>
    where
        T: DeserializeOwned + Record,
    {
        let records: Vec<T> = self.get(path).await?;
        Ok(records
            .into_iter()
            .map(|r| (r.id().to_string(), r))
            .collect())
    }

    /// Validate the token and identify the account.
    pub async fn get_user(&self) -> Result<User, ApiError> {
        self.get("users/me").await
    }

    /// POST a form-encoded body. Empty response bodies parse as `Null`.
    pub async fn post(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<serde_json::Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .transport
            .post_form(&url, &self.access_token, form)
            .await?;
        let body = self.classify(response)?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// One request the mock saw.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedRequest {
        pub method: &'static str,
        pub url: String,
        pub token: String,
        pub form: Vec<(String, String)>,
    }

    /// Scripted transport for tests: pops canned responses in order and
    /// records every request it serves.
    #[derive(Default)]
    pub struct MockTransport {
        responses: Mutex<Vec<HttpResponse>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_response(&self, response: HttpResponse) {
            if let Ok(mut responses) = self.responses.lock() {
                responses.push(response);
            }
        }

        pub fn push_json(&self, status: u16, body: &str) {
            self.push_response(HttpResponse {
                status,
                headers: Vec::new(),
                body: body.to_string(),
            });
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }

        fn pop(&self) -> HttpResponse {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                HttpResponse {
                    status: 200,
                    headers: Vec::new(),
                    body: "{}".to_string(),
                }
            } else {
                responses.remove(0)
            }
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn get(&self, url: &str, token: &str) -> Result<HttpResponse, ApiError> {
            self.requests.lock().unwrap().push(RecordedRequest {
                method: "GET",
                url: url.to_string(),
                token: token.to_string(),
                form: Vec::new(),
            });
            Ok(self.pop())
        }

        async fn post_form(
            &self,
            url: &str,
            token: &str,
            form: &[(String, String)],
        ) -> Result<HttpResponse, ApiError> {
            self.requests.lock().unwrap().push(RecordedRequest {
                method: "POST",
                url: url.to_string(),
                token: token.to_string(),
                form: form.to_vec(),
            });
            Ok(self.pop())
        }
    }

    pub fn client_with(transport: Arc<MockTransport>) -> NatureClient {
        NatureClient::new(transport, RESOURCE.to_string(), "test-token".to_string())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::testing::MockTransport;
    use super::testing::client_with;
    use super::*;
    use crate::integrations::nature::models::Device;

    #[tokio::test]
    async fn get_records_keys_by_id() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(
            200,
            r#"[
                { "id": "d1", "name": "A", "mac_address": "m", "firmware_version": "Remo/1.0" },
                { "id": "d2", "name": "B", "mac_address": "m", "firmware_version": "Remo/1.0" }
            ]"#,
        );
        let client = client_with(transport.clone());

        let devices: HashMap<String, Device> = client.get_records("devices").await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices["d2"].name, "B");

        let requests = transport.requests();
        assert_eq!(requests[0].url, format!("{RESOURCE}/devices"));
        assert_eq!(requests[0].token, "test-token");
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication_failed() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(401, "");
        let client = client_with(transport);

        let err = client.get_user().await.unwrap_err();
        assert!(matches!(err, ApiError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn rate_limit_headers_feed_tracker() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse {
            status: 200,
            headers: vec![
                ("X-Rate-Limit-Remaining".to_string(), "7".to_string()),
                ("X-Rate-Limit-Reset".to_string(), "1704067500".to_string()),
            ],
            body: r#"{ "id": "u1", "nickname": "tester" }"#.to_string(),
        });
        let client = client_with(transport);

        client.get_user().await.unwrap();
        let limit = client.rate_limit().snapshot().unwrap();
        assert_eq!(limit.remaining, 7);
        assert_eq!(
            limit.reset,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn throttled_response_reports_reset() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse {
            status: 429,
            headers: vec![
                ("x-rate-limit-remaining".to_string(), "0".to_string()),
                ("x-rate-limit-reset".to_string(), "1704067500".to_string()),
            ],
            body: String::new(),
        });
        let client = client_with(transport);

        let err = client.get_user().await.unwrap_err();
        match err {
            ApiError::QuotaExhausted { reset } => {
                assert_eq!(reset, Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(
            client
                .rate_limit()
                .is_exhausted(Utc.with_ymd_and_hms(2024, 1, 1, 0, 4, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn post_with_empty_body_returns_null() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, "");
        let client = client_with(transport.clone());

        let value = client
            .post(
                "signals/s1/send",
                &[],
            )
            .await
            .unwrap();
        assert!(value.is_null());
        assert_eq!(transport.requests()[0].method, "POST");
    }

    #[tokio::test]
    async fn server_error_maps_to_update_failed() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(500, "oops");
        let client = client_with(transport);

        let err = client.get_user().await.unwrap_err();
        assert!(matches!(err, ApiError::UpdateFailed { status: 500 }));
    }
}
