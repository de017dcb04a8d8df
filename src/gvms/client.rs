use super::models::*;
use super::token::TokenCache;
use crate::clock::Clock;
use crate::config::GvmsConfig;
use crate::error::GvmsError;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

const HMRC_MEDIA_TYPE: &str = "application/vnd.hmrc.1.0+json";

// Relative to the configured base URL
const TOKEN_PATH: &str = "oauth/token";
const MRN_SEARCH_PATH: &str = "customs/goods-movement-system-search/gmrs-for-declaration-ids";

fn hold_gmr_path(gmr_id: &str) -> String {
    format!("customs/goods-movement-system-search/defra-holds/{gmr_id}")
}

/// Upstream movement-tracking API
#[async_trait]
pub trait GvmsApi: Send + Sync {
    /// One multiplexed lookup for every MRN in `mrns`.
    async fn search_for_gmrs(&self, mrns: &[String]) -> Result<MrnSearchResponse, GvmsError>;

    /// Set or clear the DEFRA hold flag on a GMR.
    async fn hold_gmr(&self, gmr_id: &str, hold: bool) -> Result<(), GvmsError>;
}

pub struct GvmsApiClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    tokens: TokenCache,
}

impl GvmsApiClient {
    pub fn new(config: &GvmsConfig, clock: Arc<dyn Clock>) -> Result<Self, GvmsError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            tokens: TokenCache::new(clock),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn fetch_token(&self) -> Result<AccessToken, GvmsError> {
        let response = self
            .http
            .post(self.url(TOKEN_PATH))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GvmsError::Token(format!("{status}: {body}")));
        }

        debug!("🔑 Obtained GVMS access token");
        Ok(serde_json::from_str(&body)?)
    }

    /// Attach credentials and the HMRC media type, send, and map failures.
    ///
    /// A 401 evicts the cached token; the request itself is not retried here.
    async fn send_authorized(&self, request: RequestBuilder) -> Result<Response, GvmsError> {
        let token = self.tokens.get_or_fetch(|| self.fetch_token()).await?;

        let response = request
            .bearer_auth(token)
            .header(ACCEPT, HMRC_MEDIA_TYPE)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
            warn!("GVMS returned 401, cached access token evicted");
            return Err(GvmsError::Unauthorized);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GvmsError::Status { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl GvmsApi for GvmsApiClient {
    #[instrument(skip(self, mrns), fields(mrn_count = mrns.len()))]
    async fn search_for_gmrs(&self, mrns: &[String]) -> Result<MrnSearchResponse, GvmsError> {
        let started = Instant::now();

        let request = self
            .http
            .post(self.url(MRN_SEARCH_PATH))
            .json(&MrnSearchRequest::new(mrns));
        let response = self.send_authorized(request).await?;
        let body = response.text().await?;
        let parsed: MrnSearchResponse = serde_json::from_str(&body)?;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            gmr_count = parsed.gmrs.len(),
            "GVMS MRN search completed"
        );

        Ok(parsed)
    }

    #[instrument(skip(self))]
    async fn hold_gmr(&self, gmr_id: &str, hold: bool) -> Result<(), GvmsError> {
        let request = self
            .http
            .put(self.url(&hold_gmr_path(gmr_id)))
            .json(&HoldGmrRequest { hold });
        self.send_authorized(request).await?;

        debug!(gmr_id, hold, "GVMS hold updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use crate::clock::SystemClock;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> GvmsConfig {
        GvmsConfig {
            base_url: format!("{}/", server.uri()),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            timeout_secs: 5,
        }
    }

    fn client(server: &MockServer) -> GvmsApiClient {
        GvmsApiClient::new(&config(server), Arc::new(SystemClock)).unwrap()
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-id"))
            .and(body_string_contains("client_secret=client-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token-1",
                "token_type": "bearer",
                "expires_in": 14400
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn search_body() -> serde_json::Value {
        json!({
            "gmrByDeclarationId": [
                { "dec": "24GBAAAAAAAAAAAAA1", "gmrs": ["GMRA00000001"] }
            ],
            "gmrs": [{
                "gmrId": "GMRA00000001",
                "haulierEORI": "GB123456789000",
                "state": "OPEN",
                "updatedDateTime": "2025-11-07T11:10:15Z",
                "direction": "GB_TO_NI"
            }]
        })
    }

    #[tokio::test]
    async fn test_search_for_gmrs_sends_batch_and_parses() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path(
                "/customs/goods-movement-system-search/gmrs-for-declaration-ids",
            ))
            .and(header("Authorization", "Bearer token-1"))
            .and(header("Accept", HMRC_MEDIA_TYPE))
            .and(body_json(json!({
                "declarationIds": ["24GBAAAAAAAAAAAAA1", "24GBBBBBBBBBBBBBB2"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server)
            .search_for_gmrs(&[
                "24GBAAAAAAAAAAAAA1".to_string(),
                "24GBBBBBBBBBBBBBB2".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(response.gmrs.len(), 1);
        assert_eq!(response.gmrs[0].gmr_id, "GMRA00000001");
        assert_eq!(response.gmrs[0].payload["haulierEORI"], "GB123456789000");
        assert_eq!(response.gmr_by_declaration_id[0].dec, "24GBAAAAAAAAAAAAA1");
    }

    #[tokio::test]
    async fn test_token_is_cached_across_calls() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path(
                "/customs/goods-movement-system-search/gmrs-for-declaration-ids",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .expect(3)
            .mount(&server)
            .await;

        let client = client(&server);
        for _ in 0..3 {
            client.search_for_gmrs(&["24GB1".to_string()]).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_concurrent_cold_calls_share_one_exchange() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path(
                "/customs/goods-movement-system-search/gmrs-for-declaration-ids",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .expect(5)
            .mount(&server)
            .await;

        let client = Arc::new(client(&server));
        let mrns = vec!["24GB1".to_string()];
        let calls = (0..5).map(|_| client.search_for_gmrs(&mrns));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_unauthorized_evicts_token_without_retry() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;

        Mock::given(method("POST"))
            .and(path(
                "/customs/goods-movement-system-search/gmrs-for-declaration-ids",
            ))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(
                "/customs/goods-movement-system-search/gmrs-for-declaration-ids",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let first = client.search_for_gmrs(&["24GB1".to_string()]).await;
        assert!(matches!(first, Err(GvmsError::Unauthorized)));

        // Next call re-acquires a token
        let second = client.search_for_gmrs(&["24GB1".to_string()]).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_client_error_is_distinguishable() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path(
                "/customs/goods-movement-system-search/gmrs-for-declaration-ids",
            ))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad declarationIds"))
            .mount(&server)
            .await;

        let err = client(&server)
            .search_for_gmrs(&["bad".to_string()])
            .await
            .unwrap_err();

        match err {
            GvmsError::Status { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body, "bad declarationIds");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_surfaces_status() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path(
                "/customs/goods-movement-system-search/gmrs-for-declaration-ids",
            ))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .search_for_gmrs(&["24GB1".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GvmsError::Status { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE
        ));
    }

    #[tokio::test]
    async fn test_token_endpoint_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(403).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let err = client(&server)
            .search_for_gmrs(&["24GB1".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, GvmsError::Token(ref msg) if msg.contains("invalid_client")));
    }

    #[tokio::test]
    async fn test_hold_gmr_puts_flag() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("PUT"))
            .and(path(
                "/customs/goods-movement-system-search/defra-holds/GMRA00000001",
            ))
            .and(header("Authorization", "Bearer token-1"))
            .and(body_json(json!({ "hold": true })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).hold_gmr("GMRA00000001", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;

        Mock::given(method("PUT"))
            .and(path(
                "/customs/goods-movement-system-search/defra-holds/GMRA00000001",
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let clock = Arc::new(FixedClock::new(
            chrono::Utc.with_ymd_and_hms(2025, 11, 7, 9, 0, 0).unwrap(),
        ));
        let client = GvmsApiClient::new(&config(&server), clock.clone()).unwrap();

        client.hold_gmr("GMRA00000001", false).await.unwrap();
        clock.advance(chrono::Duration::seconds(14400));
        client.hold_gmr("GMRA00000001", false).await.unwrap();
    }
}
