// Граница с чат-бэкендом
// Инвентарь бесед/устройств и действия апгрейда шифрования

use crate::crypto::algorithm::{parse_capabilities, Algorithm};
use crate::protocol::validation::validate_identifier;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Беседа со статистикой
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub participant_count: u32,
}

/// Устройство, как его отдаёт бэкенд
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Идентификаторы алгоритмов; неизвестные игнорируются
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Устройство после валидации
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub capability_set: Vec<Algorithm>,
}

impl DeviceRecord {
    /// Есть хотя бы один постквантовый алгоритм
    pub fn quantum_ready(&self) -> bool {
        self.capability_set.iter().any(Algorithm::is_quantum)
    }
}

impl TryFrom<DeviceInfo> for DeviceRecord {
    type Error = crate::utils::error::CoreError;

    fn try_from(info: DeviceInfo) -> Result<Self> {
        validate_identifier(&info.device_id, "device_id")?;
        Ok(Self {
            capability_set: parse_capabilities(&info.capabilities),
            device_id: info.device_id,
        })
    }
}

/// Квантовые настройки беседы
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumSettings {
    pub quantum_resistant: bool,
    #[serde(default)]
    pub algorithm: Option<Algorithm>,
}

/// Чат-бэкенд (только чтение + точечные действия апгрейда)
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Перевести беседу на новый алгоритм
    async fn upgrade_conversation_encryption(&self, conversation_id: &str, algorithm: Algorithm) -> Result<()>;

    async fn conversation_quantum_settings(&self, conversation_id: &str) -> Result<QuantumSettings>;

    /// Зарегистрировать новый публичный ключ устройства
    async fn register_device_key(&self, device_id: &str, algorithm: Algorithm, public_key: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantum_ready_is_derived() {
        let legacy = DeviceRecord::try_from(DeviceInfo {
            device_id: "phone-1".to_string(),
            user_id: None,
            capabilities: vec!["RSA-OAEP-4096".to_string(), "SHA-1".to_string()],
        })
        .unwrap();
        assert!(!legacy.quantum_ready());
        assert_eq!(legacy.capability_set, vec![Algorithm::RsaOaep4096]);

        let ready = DeviceRecord::try_from(DeviceInfo {
            device_id: "laptop-2".to_string(),
            user_id: Some("alice".to_string()),
            capabilities: vec!["ML-KEM-768".to_string()],
        })
        .unwrap();
        assert!(ready.quantum_ready());
    }

    #[test]
    fn test_invalid_device_id_rejected() {
        let result = DeviceRecord::try_from(DeviceInfo {
            device_id: String::new(),
            user_id: None,
            capabilities: vec![],
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_device_info_defaults() {
        let info: DeviceInfo = serde_json::from_str(r#"{"device_id":"d1"}"#).unwrap();
        assert!(info.capabilities.is_empty());
        assert!(info.user_id.is_none());
    }
}
