//! SES v2 suppression-list client
//!
//! Talks to the `suppression/addresses` REST endpoints with reqwest. Request
//! signing is delegated to a [`RequestSigner`]; throttled responses are
//! retried with a bounded exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::domain::{
    ProviderConfig, ProviderError, ProviderFactory, ProviderPage, RemoteSuppressionEntry,
    SuppressionListProvider, SuppressionReason,
};
use crate::infrastructure::config::ProviderClientConfig;

const SUPPRESSION_PATH: &str = "v2/email/suppression/addresses";
const ACCOUNT_PATH: &str = "v2/email/account";
const THROTTLING_CODES: [&str; 2] = ["TooManyRequestsException", "ThrottlingException"];

/// Static credentials handed to the signer
#[derive(Clone)]
pub struct Credentials {
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

/// Adds authentication to an outgoing provider request
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut reqwest::Request, credentials: &Credentials)
    -> Result<(), ProviderError>;
}

/// Leaves requests untouched, for endpoints that authenticate upstream
/// (signing proxies, local emulators).
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughSigner;

impl RequestSigner for PassthroughSigner {
    fn sign(
        &self,
        _request: &mut reqwest::Request,
        _credentials: &Credentials,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListSuppressedDestinationsResponse {
    #[serde(default)]
    suppressed_destination_summaries: Vec<SuppressedDestination>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetSuppressedDestinationResponse {
    suppressed_destination: SuppressedDestination,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SuppressedDestination {
    email_address: String,
    reason: String,
    /// Epoch seconds
    last_update_time: Option<f64>,
}

impl From<SuppressedDestination> for RemoteSuppressionEntry {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from(value: SuppressedDestination) -> Self {
        let last_update = value.last_update_time.and_then(|secs| {
            DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
        });
        Self {
            email: value.email_address,
            reason: value.reason,
            last_update,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutSuppressedDestinationRequest<'a> {
    email_address: &'a str,
    reason: SuppressionReason,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "Message")]
    message: Option<String>,
    #[serde(alias = "__type", alias = "Code")]
    code: Option<String>,
}

pub struct SesSuppressionClient {
    http: Client,
    base_url: Url,
    credentials: Credentials,
    signer: Arc<dyn RequestSigner>,
    max_attempts: u32,
    max_backoff: Duration,
}

impl SesSuppressionClient {
    pub fn new(
        http: Client,
        base_url: Url,
        credentials: Credentials,
        signer: Arc<dyn RequestSigner>,
        max_attempts: u32,
        max_backoff: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            credentials,
            signer,
            max_attempts: max_attempts.max(1),
            max_backoff,
        }
    }

    /// Regional endpoint unless an explicit one is configured
    pub fn endpoint_for(region: &str, endpoint: Option<&str>) -> Result<Url, ProviderError> {
        let raw = endpoint.map_or_else(
            || format!("https://email.{region}.amazonaws.com/"),
            str::to_string,
        );
        let raw = if raw.ends_with('/') { raw } else { format!("{raw}/") };
        Url::parse(&raw)
            .map_err(|e| ProviderError::InvalidRequest(format!("bad endpoint '{raw}': {e}")))
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))
    }

    fn address_url(&self, email: &str) -> Result<Url, ProviderError> {
        let mut url = self.url(SUPPRESSION_PATH)?;
        url.path_segments_mut()
            .map_err(|()| ProviderError::InvalidRequest("endpoint cannot be a base".into()))?
            .push(email);
        Ok(url)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(500)
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Sends a request, retrying throttled responses.
    async fn execute(
        &self,
        build: impl Fn() -> RequestBuilder + Send + Sync,
    ) -> Result<Response, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = build()
                .build()
                .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
            self.signer.sign(&mut request, &self.credentials)?;

            let response = self
                .http
                .execute(request)
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;

            if response.status().is_success() {
                return Ok(response);
            }

            let error = Self::error_from(response).await;
            if !error.is_throttling() {
                return Err(error);
            }
            if attempt >= self.max_attempts {
                warn!("Provider still throttling after {} attempts", attempt);
                return Err(ProviderError::Throttled { attempts: attempt });
            }
            let delay = self.retry_delay(attempt);
            debug!(attempt, ?delay, "Provider throttled, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn error_from(response: Response) -> ProviderError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
        let code = body.as_ref().and_then(|b| b.code.clone()).unwrap_or_default();
        let message = body
            .and_then(|b| b.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| if text.is_empty() { status.to_string() } else { text });

        let throttled = status == StatusCode::TOO_MANY_REQUESTS
            || THROTTLING_CODES.iter().any(|c| code.ends_with(c));
        if throttled {
            return ProviderError::Http {
                status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
                message: if code.is_empty() {
                    message
                } else {
                    format!("{code}: {message}")
                },
            };
        }
        ProviderError::Http {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl SuppressionListProvider for SesSuppressionClient {
    async fn list_page(
        &self,
        token: Option<&str>,
        page_size: u32,
    ) -> Result<ProviderPage, ProviderError> {
        let url = self.url(SUPPRESSION_PATH)?;
        let page_size = page_size.to_string();
        let response = self
            .execute(|| {
                let mut request = self
                    .http
                    .request(Method::GET, url.clone())
                    .query(&[("PageSize", page_size.as_str())]);
                if let Some(token) = token {
                    request = request.query(&[("NextToken", token)]);
                }
                request
            })
            .await?;

        let body: ListSuppressedDestinationsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(ProviderPage {
            entries: body
                .suppressed_destination_summaries
                .into_iter()
                .map(RemoteSuppressionEntry::from)
                .collect(),
            next_token: body.next_token,
        })
    }

    async fn get_entry(
        &self,
        email: &str,
    ) -> Result<Option<RemoteSuppressionEntry>, ProviderError> {
        let url = self.address_url(email)?;
        let response = match self.execute(|| self.http.request(Method::GET, url.clone())).await {
            Ok(response) => response,
            Err(ProviderError::Http { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let body: GetSuppressedDestinationResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(Some(body.suppressed_destination.into()))
    }

    async fn put_entry(&self, email: &str, reason: SuppressionReason) -> Result<(), ProviderError> {
        let url = self.url(SUPPRESSION_PATH)?;
        let body = PutSuppressedDestinationRequest {
            email_address: email,
            reason,
        };
        self.execute(|| self.http.request(Method::PUT, url.clone()).json(&body))
            .await?;
        Ok(())
    }

    async fn delete_entry(&self, email: &str) -> Result<(), ProviderError> {
        let url = self.address_url(email)?;
        match self.execute(|| self.http.request(Method::DELETE, url.clone())).await {
            Ok(_) => Ok(()),
            Err(ProviderError::Http { status: 404, .. }) => {
                Err(ProviderError::NotFound(email.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn check_account(&self) -> Result<(), ProviderError> {
        let url = self.url(ACCOUNT_PATH)?;
        self.execute(|| self.http.request(Method::GET, url.clone())).await?;
        Ok(())
    }
}

/// Builds an SES client per run from the freshly read settings
pub struct SesClientFactory {
    http: Client,
    client_config: ProviderClientConfig,
    signer: Arc<dyn RequestSigner>,
}

impl SesClientFactory {
    pub fn new(
        client_config: ProviderClientConfig,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(client_config.request_timeout_secs))
            .user_agent(concat!("suppression-sync/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            client_config,
            signer,
        })
    }

    /// Factory sending unsigned requests. The public SES endpoints reject
    /// those, so an explicit endpoint (signing proxy or emulator) is required.
    pub fn unsigned(client_config: ProviderClientConfig) -> Result<Self, ProviderError> {
        if client_config.endpoint.as_deref().is_none_or(|e| e.trim().is_empty()) {
            return Err(ProviderError::InvalidRequest(
                "unsigned requests need provider.endpoint set to a signing proxy".to_string(),
            ));
        }
        Self::new(client_config, Arc::new(PassthroughSigner))
    }
}

impl ProviderFactory for SesClientFactory {
    fn build(
        &self,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn SuppressionListProvider>, ProviderError> {
        if !config.enabled {
            return Err(ProviderError::Disabled);
        }
        if !config.has_credentials() {
            return Err(ProviderError::MissingCredentials);
        }

        let endpoint = self.client_config.endpoint.as_deref();
        let base_url = SesSuppressionClient::endpoint_for(&config.region, endpoint)?;
        debug!(%base_url, "Building provider client");
        Ok(Arc::new(SesSuppressionClient::new(
            self.http.clone(),
            base_url,
            Credentials {
                region: config.region.clone(),
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
            },
            Arc::clone(&self.signer),
            self.client_config.max_attempts,
            Duration::from_secs(self.client_config.max_retry_backoff_secs),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, Query, State},
        http::StatusCode as AxumStatus,
        routing::get,
    };
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeSes {
        throttle_remaining: AtomicU32,
        puts: Mutex<Vec<Value>>,
        deletes: Mutex<Vec<String>>,
    }

    async fn list(
        State(state): State<Arc<FakeSes>>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (AxumStatus, Json<Value>) {
        if state
            .throttle_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return (
                AxumStatus::TOO_MANY_REQUESTS,
                Json(json!({"message": "Rate exceeded", "__type": "TooManyRequestsException"})),
            );
        }
        assert_eq!(params.get("PageSize").map(String::as_str), Some("2"));
        let body = match params.get("NextToken").map(String::as_str) {
            None => json!({
                "SuppressedDestinationSummaries": [
                    {
                        "EmailAddress": "a@x.io",
                        "Reason": "BOUNCE",
                        "LastUpdateTime": 1_700_000_000.5
                    },
                    {
                        "EmailAddress": "b@x.io",
                        "Reason": "COMPLAINT",
                        "LastUpdateTime": 1_700_000_100.0
                    }
                ],
                "NextToken": "page-2"
            }),
            Some("page-2") => json!({
                "SuppressedDestinationSummaries": [
                    {"EmailAddress": "c@x.io", "Reason": "BOUNCE"}
                ]
            }),
            Some(other) => panic!("unexpected token {other}"),
        };
        (AxumStatus::OK, Json(body))
    }

    async fn get_address(Path(email): Path<String>) -> (AxumStatus, Json<Value>) {
        if email == "a@x.io" {
            let destination = json!({
                "EmailAddress": email,
                "Reason": "BOUNCE",
                "LastUpdateTime": 1_700_000_000.0
            });
            (AxumStatus::OK, Json(json!({"SuppressedDestination": destination})))
        } else {
            (
                AxumStatus::NOT_FOUND,
                Json(json!({"message": "not found", "__type": "NotFoundException"})),
            )
        }
    }

    async fn delete_address(
        State(state): State<Arc<FakeSes>>,
        Path(email): Path<String>,
    ) -> AxumStatus {
        state.deletes.lock().unwrap().push(email);
        AxumStatus::OK
    }

    async fn put_address(State(state): State<Arc<FakeSes>>, Json(body): Json<Value>) -> AxumStatus {
        state.puts.lock().unwrap().push(body);
        AxumStatus::OK
    }

    async fn account() -> Json<Value> {
        Json(json!({"SendingEnabled": true}))
    }

    async fn spawn_fake(state: Arc<FakeSes>) -> Url {
        let app = Router::new()
            .route("/v2/email/suppression/addresses", get(list).put(put_address))
            .route(
                "/v2/email/suppression/addresses/{email}",
                get(get_address).delete(delete_address),
            )
            .route("/v2/email/account", get(account))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn client(base_url: Url, max_attempts: u32) -> SesSuppressionClient {
        SesSuppressionClient::new(
            Client::new(),
            base_url,
            Credentials {
                region: "us-east-1".into(),
                access_key: "AKIA".into(),
                secret_key: "secret".into(),
            },
            Arc::new(PassthroughSigner),
            max_attempts,
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn lists_pages_with_continuation_token() {
        let base = spawn_fake(Arc::new(FakeSes::default())).await;
        let client = client(base, 3);

        let first = client.list_page(None, 2).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("page-2"));
        assert_eq!(first.entries[0].reason, "BOUNCE");
        assert_eq!(first.entries[0].last_update.unwrap().timestamp(), 1_700_000_000);

        let second = client.list_page(first.next_token.as_deref(), 2).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert!(second.next_token.is_none());
        assert!(second.entries[0].last_update.is_none());
    }

    #[tokio::test]
    async fn throttled_responses_are_retried() {
        let state = Arc::new(FakeSes::default());
        state.throttle_remaining.store(2, Ordering::SeqCst);
        let client = client(spawn_fake(state).await, 5);

        let page = client.list_page(None, 2).await.unwrap();
        assert_eq!(page.entries.len(), 2);
    }

    #[tokio::test]
    async fn throttling_gives_up_after_max_attempts() {
        let state = Arc::new(FakeSes::default());
        state.throttle_remaining.store(10, Ordering::SeqCst);
        let client = client(spawn_fake(state.clone()).await, 3);

        let err = client.list_page(None, 2).await.unwrap_err();
        assert!(matches!(err, ProviderError::Throttled { attempts: 3 }));
        assert_eq!(state.throttle_remaining.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn single_entry_lookup_maps_404_to_none() {
        let client = client(spawn_fake(Arc::new(FakeSes::default())).await, 1);

        let found = client.get_entry("a@x.io").await.unwrap().unwrap();
        assert_eq!(found.email, "a@x.io");
        assert!(client.get_entry("nobody@x.io").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writes_hit_the_expected_endpoints() {
        let state = Arc::new(FakeSes::default());
        let client = client(spawn_fake(state.clone()).await, 1);

        client.put_entry("n@x.io", SuppressionReason::Complaint).await.unwrap();
        client.delete_entry("d@x.io").await.unwrap();
        client.check_account().await.unwrap();

        assert_eq!(
            state.puts.lock().unwrap().as_slice(),
            &[json!({"EmailAddress": "n@x.io", "Reason": "COMPLAINT"})]
        );
        assert_eq!(state.deletes.lock().unwrap().as_slice(), &["d@x.io".to_string()]);
    }

    #[test]
    fn factory_refuses_unusable_settings() {
        let factory =
            SesClientFactory::new(ProviderClientConfig::default(), Arc::new(PassthroughSigner))
                .unwrap();

        let disabled = ProviderConfig::default();
        assert!(matches!(factory.build(&disabled), Err(ProviderError::Disabled)));

        let no_keys = ProviderConfig {
            enabled: true,
            ..ProviderConfig::default()
        };
        assert!(matches!(factory.build(&no_keys), Err(ProviderError::MissingCredentials)));
    }

    #[test]
    fn endpoint_defaults_to_region() {
        let url = SesSuppressionClient::endpoint_for("eu-west-1", None).unwrap();
        assert_eq!(url.as_str(), "https://email.eu-west-1.amazonaws.com/");

        let custom =
            SesSuppressionClient::endpoint_for("eu-west-1", Some("http://localhost:4566")).unwrap();
        assert_eq!(custom.as_str(), "http://localhost:4566/");
    }

    #[test]
    fn unsigned_factory_requires_an_explicit_endpoint() {
        let regional = SesClientFactory::unsigned(ProviderClientConfig::default());
        assert!(matches!(regional, Err(ProviderError::InvalidRequest(_))));

        let blank = ProviderClientConfig {
            endpoint: Some("  ".to_string()),
            ..ProviderClientConfig::default()
        };
        assert!(SesClientFactory::unsigned(blank).is_err());

        let proxied = ProviderClientConfig {
            endpoint: Some("http://localhost:4566".to_string()),
            ..ProviderClientConfig::default()
        };
        let factory = SesClientFactory::unsigned(proxied).unwrap();
        let usable = ProviderConfig {
            enabled: true,
            region: "us-east-1".to_string(),
            access_key: "AKIA".to_string(),
            secret_key: "secret".to_string(),
            sync_interval_minutes: 15,
        };
        assert!(factory.build(&usable).is_ok());
    }
}
