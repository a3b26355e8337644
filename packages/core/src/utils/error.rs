// Типы ошибок

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Генерация ключа, шифрование или расшифровка упали на уровне примитива
    #[error("Cryptography failure: {0}")]
    CryptoFailure(String),

    /// HMAC конверта v2/v3 не совпал; plaintext не выдаётся
    #[error("Envelope authentication failed")]
    AuthenticationFailure,

    #[error("Replay or clock skew detected: {0}")]
    ReplayOrSkewDetected(String),

    /// Удалённая квантовая операция упала, и классический путь не применим
    #[error("Key decapsulation failed: {0}")]
    KeyDecapsulationFailure(String),

    #[error("Migration item failed: {0}")]
    MigrationItemFailure(String),

    #[error("System health check failed: {0}")]
    SystemHealthFailure(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Migration already in progress: {0}")]
    MigrationInProgress(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<crate::error::CryptoError> for CoreError {
    fn from(error: crate::error::CryptoError) -> Self {
        CoreError::CryptoFailure(error.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(error: serde_json::Error) -> Self {
        CoreError::SerializationError(error.to_string())
    }
}

impl CoreError {
    /// Короткое имя варианта для записей в отчёте миграции
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::CryptoFailure(_) => "crypto_failure",
            CoreError::AuthenticationFailure => "authentication_failure",
            CoreError::ReplayOrSkewDetected(_) => "replay_or_skew",
            CoreError::KeyDecapsulationFailure(_) => "key_decapsulation_failure",
            CoreError::MigrationItemFailure(_) => "migration_item_failure",
            CoreError::SystemHealthFailure(_) => "system_health_failure",
            CoreError::StorageFailure(_) => "storage_failure",
            CoreError::NetworkError(_) => "network_error",
            CoreError::ValidationError(_) => "validation_error",
            CoreError::SerializationError(_) => "serialization_error",
            CoreError::MigrationInProgress(_) => "migration_in_progress",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::NotFound(_) => "not_found",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
