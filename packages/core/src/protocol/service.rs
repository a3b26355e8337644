// Удалённый криптосервис (квантовая часть)
// Типизированные DTO и trait-граница

use crate::crypto::algorithm::Algorithm;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateKeypairRequest {
    pub algorithm: Algorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateKeypairResponse {
    /// Base64 публичный ключ
    pub public_key: String,
    /// Base64 приватный ключ
    pub private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncapsulateRequest {
    pub public_key: String,
    pub algorithm: Algorithm,
    /// Base64 данные для упаковки (материал симметричного ключа)
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncapsulateResponse {
    /// Base64
    pub ciphertext: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecapsulateRequest {
    pub ciphertext: String,
    pub private_key: String,
    pub algorithm: Algorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecapsulateResponse {
    /// Base64
    pub shared_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuantumSupport {
    pub kem_available: bool,
    #[serde(default)]
    pub algorithms: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthResponse {
    pub quantum_support: QuantumSupport,
    #[serde(default)]
    pub status: Option<String>,
}

/// Удалённый сервис, выполняющий ML-KEM операции
#[async_trait]
pub trait QuantumCryptoService: Send + Sync {
    async fn generate_keypair(&self, algorithm: Algorithm) -> Result<GenerateKeypairResponse>;

    async fn encapsulate(&self, request: &EncapsulateRequest) -> Result<EncapsulateResponse>;

    async fn decapsulate(&self, request: &DecapsulateRequest) -> Result<DecapsulateResponse>;

    async fn health(&self) -> Result<HealthResponse>;
}
