// HTTP-клиент удалённого криптосервиса

use crate::config::Config;
use crate::crypto::algorithm::Algorithm;
use crate::protocol::service::{
    DecapsulateRequest, DecapsulateResponse, EncapsulateRequest, EncapsulateResponse,
    GenerateKeypairRequest, GenerateKeypairResponse, HealthResponse, QuantumCryptoService,
};
use crate::protocol::validation;
use crate::utils::error::{CoreError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Настройки HTTP-клиента
#[derive(Debug, Clone)]
pub struct HttpServiceConfig {
    /// Базовый URL (например, "http://localhost:8000")
    pub base_url: String,
    /// Таймаут запроса; `None`: ждать бесконечно
    pub timeout: Option<Duration>,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        let cfg = Config::global();
        Self {
            base_url: cfg.quantum_service_url.clone(),
            timeout: cfg.remote_request_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Реализация [`QuantumCryptoService`] поверх HTTP/JSON
pub struct HttpQuantumService {
    client: Client,
    config: HttpServiceConfig,
}

impl HttpQuantumService {
    pub fn new(config: HttpServiceConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| CoreError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        debug!(target: "protocol::http", path, "POST");

        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::NetworkError(e.to_string()))?;

        Self::parse(resp).await
    }

    async fn parse<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::NetworkError(format!(
                "Crypto service returned {}: {}",
                status, body
            )));
        }

        resp.json::<R>()
            .await
            .map_err(|e| CoreError::ValidationError(format!("Malformed service response: {}", e)))
    }
}

#[async_trait]
impl QuantumCryptoService for HttpQuantumService {
    async fn generate_keypair(&self, algorithm: Algorithm) -> Result<GenerateKeypairResponse> {
        let response: GenerateKeypairResponse = self
            .post_json("generate-keypair", &GenerateKeypairRequest { algorithm })
            .await?;
        validation::validate_keypair_response(&response)?;
        Ok(response)
    }

    async fn encapsulate(&self, request: &EncapsulateRequest) -> Result<EncapsulateResponse> {
        let response: EncapsulateResponse = self.post_json("encapsulate", request).await?;
        validation::validate_encapsulate_response(&response)?;
        Ok(response)
    }

    async fn decapsulate(&self, request: &DecapsulateRequest) -> Result<DecapsulateResponse> {
        let response: DecapsulateResponse = self.post_json("decapsulate", request).await?;
        validation::validate_decapsulate_response(&response)?;
        Ok(response)
    }

    async fn health(&self) -> Result<HealthResponse> {
        let resp = self
            .client
            .get(self.url("health"))
            .send()
            .await
            .map_err(|e| CoreError::NetworkError(e.to_string()))?;

        Self::parse(resp).await
    }
}
