use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use nightscout_core::entries::{DeviceStatus, GlucoseReading, ServerStatus, Treatment};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::NightscoutConfig;
use crate::error::NightscoutError;
use crate::fetcher::{EntrySource, PageQuery};

pub const ENTRIES_PATH: &str = "/api/v1/entries";
pub const TREATMENTS_PATH: &str = "/api/v1/treatments";
pub const STATUS_PATH: &str = "/api/v1/status";
pub const DEVICE_STATUS_PATH: &str = "/api/v1/devicestatus";

const ERROR_SNIPPET_MAX_CHARS: usize = 300;

/// Read-only HTTP client for the Nightscout v1 API.
#[derive(Clone)]
pub struct NightscoutClient {
    config: Arc<NightscoutConfig>,
    http: reqwest::Client,
}

impl NightscoutClient {
    pub fn new(config: Arc<NightscoutConfig>) -> Result<Self, NightscoutError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("nightscout-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &NightscoutConfig {
        &self.config
    }

    /// GET `path` and decode the JSON body into `T`, honouring cancellation.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<T, NightscoutError> {
        let value = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NightscoutError::Cancelled),
            value = self.get_value(path, query) => value?,
        };
        serde_json::from_value(value).map_err(|e| NightscoutError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Some reverse proxies serve HTML on bare API paths; retry once with a
    /// `.json` suffix before giving up.
    async fn get_value(&self, path: &str, query: &[(String, String)]) -> Result<Value, NightscoutError> {
        let body = self.send(path, query).await?;
        match serde_json::from_slice(&body) {
            Ok(value) => Ok(value),
            Err(_) if !path.ends_with(".json") => {
                let json_path = format!("{path}.json");
                tracing::debug!(path, "non-JSON response, retrying with .json suffix");
                let body = self.send(&json_path, query).await?;
                serde_json::from_slice(&body).map_err(|_| decode_error(&json_path, &body))
            }
            Err(_) => Err(decode_error(path, &body)),
        }
    }

    async fn send(&self, path: &str, query: &[(String, String)]) -> Result<Vec<u8>, NightscoutError> {
        let base = self.config.require_base_url()?;
        let mut url = reqwest::Url::parse(&format!(
            "{}{}",
            base.as_str().trim_end_matches('/'),
            path
        ))
        .map_err(|e| NightscoutError::Configuration(format!("Invalid Nightscout URL/path: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
            if let Some(token) = &self.config.token {
                pairs.append_pair("token", token);
            }
        }

        let mut request = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(secret) = self.config.api_secret_header() {
            request = request.header("api-secret", secret);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NightscoutError::Transport {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// The newest `count` entries of any type.
    pub async fn latest_entries(
        &self,
        count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<GlucoseReading>, NightscoutError> {
        let query = [("count".to_string(), count.to_string())];
        self.get_json(ENTRIES_PATH, &query, cancel).await
    }

    pub async fn treatments_since(
        &self,
        since: DateTime<Utc>,
        count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Treatment>, NightscoutError> {
        let query = [
            ("count".to_string(), count.to_string()),
            (
                "find[created_at][$gte]".to_string(),
                since.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ];
        self.get_json(TREATMENTS_PATH, &query, cancel).await
    }

    pub async fn status(&self, cancel: &CancellationToken) -> Result<ServerStatus, NightscoutError> {
        self.get_json(STATUS_PATH, &[], cancel).await
    }

    pub async fn device_status(
        &self,
        count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<DeviceStatus>, NightscoutError> {
        let query = [("count".to_string(), count.to_string())];
        self.get_json(DEVICE_STATUS_PATH, &query, cancel).await
    }
}

#[async_trait]
impl EntrySource for NightscoutClient {
    async fn entries_page(&self, query: PageQuery) -> Result<Vec<GlucoseReading>, NightscoutError> {
        // Cancellation is handled by the range fetcher around this call.
        let never = CancellationToken::new();
        self.get_json(ENTRIES_PATH, &query.to_query_pairs(), &never)
            .await
    }
}

fn decode_error(path: &str, body: &[u8]) -> NightscoutError {
    let snippet: String = String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_SNIPPET_MAX_CHARS)
        .collect::<String>()
        .replace('\n', " ");
    NightscoutError::Decode {
        path: path.to_string(),
        message: format!("non-JSON response: {}", snippet.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, token: Option<&str>, secret: Option<&str>) -> NightscoutClient {
        let mut config = NightscoutConfig::for_url(&server.uri()).unwrap();
        config.token = token.map(str::to_string);
        config.api_secret = secret.map(str::to_string);
        NightscoutClient::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn entries_page_sends_range_filters_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ENTRIES_PATH))
            .and(query_param("count", "2"))
            .and(query_param("find[date][$gte]", "1000"))
            .and(query_param("find[date][$lt]", "9000"))
            .and(query_param("find[type]", "sgv"))
            .and(query_param("token", "reader-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "_id": "a", "date": 8000, "sgv": 110, "type": "sgv" },
                { "_id": "b", "date": 7000, "sgv": 115, "type": "sgv" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("reader-1"), None);
        let page = client
            .entries_page(PageQuery {
                start: 1000,
                end: 9000,
                count: 2,
            })
            .await
            .unwrap();

        assert_eq!(page.len(), 2);
        assert_eq!(page[0].sgv, Some(110));
    }

    #[tokio::test]
    async fn hashed_secret_is_sent_as_header() {
        let server = MockServer::start().await;
        let secret = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        Mock::given(method("GET"))
            .and(path(STATUS_PATH))
            .and(header("api-secret", secret))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "ns", "version": "15.0.0" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, None, Some(secret));
        let status = client.status(&CancellationToken::new()).await.unwrap();
        assert_eq!(status.version.as_deref(), Some("15.0.0"));
    }

    #[tokio::test]
    async fn non_success_status_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ENTRIES_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server, None, None);
        let err = client
            .latest_entries(1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NightscoutError::Transport { status: 401, .. }));
        assert!(err.docs_hint().is_some());
    }

    #[tokio::test]
    async fn html_response_falls_back_to_json_suffix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(STATUS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>status</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{STATUS_PATH}.json")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "fallback" })))
            .mount(&server)
            .await;

        let client = client_for(&server, None, None);
        let status = client.status(&CancellationToken::new()).await.unwrap();
        assert_eq!(status.name.as_deref(), Some("fallback"));
    }

    #[tokio::test]
    async fn double_html_response_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>\nlogin\n</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, None, None);
        let err = client
            .status(&CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            NightscoutError::Decode { path, message } => {
                assert_eq!(path, "/api/v1/status.json");
                assert!(message.contains("<html> login </html>"));
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_base_url_is_a_configuration_error() {
        let client = NightscoutClient::new(Arc::new(NightscoutConfig::default())).unwrap();
        let err = client
            .entries_page(PageQuery {
                start: 0,
                end: 1,
                count: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NightscoutError::Configuration(_)));
    }

    #[tokio::test]
    async fn treatments_filter_on_created_at() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TREATMENTS_PATH))
            .and(query_param("count", "50"))
            .and(query_param("find[created_at][$gte]", "2025-01-01T00:00:00.000Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "created_at": "2025-01-01T08:00:00.000Z", "eventType": "Meal Bolus", "insulin": 5, "carbs": 45 }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, None, None);
        let since = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let treatments = client
            .treatments_since(since, 50, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(treatments.len(), 1);
        assert_eq!(treatments[0].insulin, Some(5.0));
    }
}
