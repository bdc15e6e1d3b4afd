use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::config::AppConfig;
use crate::cws::errors::CwsError;
use crate::cws::types::{
    CombineSharesRequest, CombineSharesResponse, CreateCompensatedDecryptionRequest,
    CreateCompensatedDecryptionResponse, CreatePartialDecryptionRequest,
    CreatePartialDecryptionResponse, CreateTallyRequest, CreateTallyResponse, CwsErrorBody,
};

/// Abstraction over the cryptographic worker service.
///
/// This trait intentionally hides transport, pooling, and error formats.
/// Implementations must normalize failures into `CwsError`.
#[async_trait]
pub trait CwsApi: Send + Sync + 'static {
    async fn create_encrypted_tally(
        &self,
        req: CreateTallyRequest,
    ) -> Result<CreateTallyResponse, CwsError>;

    async fn create_partial_decryption(
        &self,
        req: CreatePartialDecryptionRequest,
    ) -> Result<CreatePartialDecryptionResponse, CwsError>;

    async fn create_compensated_decryption(
        &self,
        req: CreateCompensatedDecryptionRequest,
    ) -> Result<CreateCompensatedDecryptionResponse, CwsError>;

    async fn combine_decryption_shares(
        &self,
        req: CombineSharesRequest,
    ) -> Result<CombineSharesResponse, CwsError>;
}

/// HTTP implementation with a bounded connection pool.
#[derive(Clone)]
pub struct CwsClient {
    http: Client,
    base_url: String,
    tally_timeout: Duration,
    default_timeout: Duration,
}

impl CwsClient {
    pub fn new(cfg: &AppConfig) -> Result<Self, CwsError> {
        let http = Client::builder()
            .pool_max_idle_per_host(cfg.cws_max_per_route)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.cws_base_url.trim_end_matches('/').to_string(),
            tally_timeout: cfg.cws_tally_timeout,
            default_timeout: cfg.cws_default_timeout,
        })
    }

    #[instrument(skip(self, body), fields(path = path), level = "debug")]
    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<R, CwsError> {
        let url = format!("{}/{}", self.base_url, path);

        let resp = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            // The service reports failures as a structured {error, code}
            // body; fall back to the raw text when it does not.
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<CwsErrorBody>(&text)
                .map(|b| format!("{} ({})", b.error, b.code))
                .unwrap_or(text);

            return Err(CwsError::Status {
                code: status.as_u16(),
                message,
            });
        }

        // Raw body goes out of scope here; only the typed response survives.
        let parsed = serde_json::from_str::<R>(&resp.text().await?)?;

        debug!(status = status.as_u16(), "cws call succeeded");
        Ok(parsed)
    }
}

#[async_trait]
impl CwsApi for CwsClient {
    async fn create_encrypted_tally(
        &self,
        req: CreateTallyRequest,
    ) -> Result<CreateTallyResponse, CwsError> {
        self.post("create_encrypted_tally", &req, self.tally_timeout)
            .await
    }

    async fn create_partial_decryption(
        &self,
        req: CreatePartialDecryptionRequest,
    ) -> Result<CreatePartialDecryptionResponse, CwsError> {
        self.post("create_partial_decryption", &req, self.default_timeout)
            .await
    }

    async fn create_compensated_decryption(
        &self,
        req: CreateCompensatedDecryptionRequest,
    ) -> Result<CreateCompensatedDecryptionResponse, CwsError> {
        self.post("create_compensated_decryption", &req, self.default_timeout)
            .await
    }

    async fn combine_decryption_shares(
        &self,
        req: CombineSharesRequest,
    ) -> Result<CombineSharesResponse, CwsError> {
        self.post("combine_decryption_shares", &req, self.default_timeout)
            .await
    }
}
