// Модели данных для хранилища

use crate::crypto::symmetric::SymmetricKey;
use serde::{Deserialize, Serialize};

/// Логическая таблица записи
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyScope {
    /// Приватный ключ пользователя
    PrivateKey,
    /// Симметричный ключ беседы (истекает)
    ConversationKey,
}

impl KeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScope::PrivateKey => "private_key",
            KeyScope::ConversationKey => "conversation_key",
        }
    }

    /// Синтетический id записи: `private_key_<user>` / `conv_key_<conversation>`
    pub fn record_id(&self, id: &str) -> String {
        match self {
            KeyScope::PrivateKey => format!("private_key_{}", id),
            KeyScope::ConversationKey => format!("conv_key_{}", id),
        }
    }
}

/// Запись в основном хранилище (payload ЗАШИФРОВАН мастер-ключом)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeyRecord {
    pub id: String,
    pub owner_id: String,
    pub key_type: KeyScope,
    pub encrypted_payload: Vec<u8>,
    pub iv: Vec<u8>,
    /// Unix ms
    pub created_at: i64,
    /// Unix ms
    pub expires_at: Option<i64>,
}

impl StoredKeyRecord {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now_ms)
    }
}

/// Запись во flat fallback-хранилище (НЕ зашифрована)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub owner_id: String,
    /// Base64 plaintext
    pub data: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl FallbackEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now_ms)
    }
}

/// Расшифрованный ключ беседы
#[derive(Debug, Clone)]
pub struct ConversationKeyRecord {
    pub conversation_id: String,
    pub key: SymmetricKey,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

/// Результат записи: в каком tier оказались данные
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOutcome {
    pub encrypted: bool,
}

/// Разрешена ли запись plaintext в fallback-хранилище
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    #[default]
    Deny,
    AllowPlaintext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ids() {
        assert_eq!(KeyScope::PrivateKey.record_id("alice"), "private_key_alice");
        assert_eq!(KeyScope::ConversationKey.record_id("c1"), "conv_key_c1");
    }

    #[test]
    fn test_expiry() {
        let record = StoredKeyRecord {
            id: "conv_key_c1".to_string(),
            owner_id: "c1".to_string(),
            key_type: KeyScope::ConversationKey,
            encrypted_payload: vec![1, 2, 3],
            iv: vec![0; 12],
            created_at: 1_000,
            expires_at: Some(2_000),
        };

        assert!(!record.is_expired(1_999));
        assert!(record.is_expired(2_000));

        let permanent = StoredKeyRecord {
            expires_at: None,
            ..record
        };
        assert!(!permanent.is_expired(i64::MAX));
    }
}
