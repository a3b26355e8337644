// Экспорт и восстановление ключей по паролю
// PBKDF2-SHA256 для деривации ключа + конверт v2 + контрольная сумма

use crate::config::Config;
use crate::crypto::envelope::{self, DecryptOptions, Envelope, EnvelopeVersion};
use crate::crypto::symmetric::{random_bytes, sha256_hex, CipherMode, SymmetricKey};
use crate::utils::b64;
use crate::utils::error::{CoreError, Result};
use crate::utils::time::now_rfc3339;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Ключи, попадающие в бэкап
///
/// `private_keys`: user_id → приватный ключ (PEM / Base64),
/// `conversation_keys`: conversation_id → Base64 материал ключа беседы.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBackupData {
    pub private_keys: BTreeMap<String, String>,
    pub conversation_keys: BTreeMap<String, String>,
}

impl fmt::Debug for KeyBackupData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBackupData")
            .field("private_keys", &self.private_keys.len())
            .field("conversation_keys", &self.conversation_keys.len())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct BackupPayload {
    version: u32,
    created_at: String,
    key_data: KeyBackupData,
    checksum: String,
}

#[derive(Serialize, Deserialize)]
struct BackupFile {
    /// Base64 соль PBKDF2
    salt: String,
    encrypted_data: Envelope,
    version: u32,
}

/// Деривировать ключ бэкапа из пароля
pub fn derive_backup_key(password: &str, salt: &[u8]) -> Result<SymmetricKey> {
    let cfg = Config::global();
    if salt.len() != cfg.salt_length {
        return Err(CoreError::ValidationError(format!(
            "Invalid salt length: expected {}, got {}",
            cfg.salt_length,
            salt.len()
        )));
    }

    if password.is_empty() {
        return Err(CoreError::ValidationError("Password cannot be empty".to_string()));
    }

    let mut key = Zeroizing::new(vec![0u8; cfg.key_length]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, cfg.pbkdf2_iterations, &mut key);

    Ok(SymmetricKey::from_bytes(&key, CipherMode::Cbc)?)
}

pub fn generate_salt() -> Vec<u8> {
    random_bytes(Config::global().salt_length)
}

/// Валидация пароля бэкапа: только минимальная длина
pub fn validate_password(password: &str) -> Result<()> {
    let min_length = Config::global().password_min_length;
    if password.chars().count() < min_length {
        return Err(CoreError::ValidationError(format!(
            "Password must be at least {} characters long",
            min_length
        )));
    }
    Ok(())
}

fn checksum(key_data: &KeyBackupData) -> Result<String> {
    let bytes = Zeroizing::new(serde_json::to_vec(key_data)?);
    Ok(sha256_hex(&bytes))
}

/// Создать бэкап: Base64(JSON `{salt, encrypted_data, version}`)
pub fn create_backup(key_data: &KeyBackupData, password: &str) -> Result<String> {
    validate_password(password)?;

    let version = Config::global().backup_format_version;
    let salt = generate_salt();
    let key = derive_backup_key(password, &salt)?;

    let payload = BackupPayload {
        version,
        created_at: now_rfc3339(),
        key_data: key_data.clone(),
        checksum: checksum(key_data)?,
    };
    let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);

    let file = BackupFile {
        salt: b64::encode(&salt),
        encrypted_data: envelope::encrypt(&plaintext, &key, EnvelopeVersion::V2)?,
        version,
    };

    info!(
        target: "crypto::keys",
        private_keys = key_data.private_keys.len(),
        conversation_keys = key_data.conversation_keys.len(),
        "Key backup created"
    );

    Ok(b64::encode(&serde_json::to_vec(&file)?))
}

/// Восстановить ключи из бэкапа.
///
/// Неверный пароль даёт `AuthenticationFailure` (HMAC конверта не сходится),
/// а не мусорные данные.
pub fn restore_backup(backup: &str, password: &str) -> Result<KeyBackupData> {
    let raw = b64::decode(backup.trim())?;
    let file: BackupFile = serde_json::from_slice(&raw)
        .map_err(|e| CoreError::ValidationError(format!("Malformed backup: {}", e)))?;

    let supported = Config::global().backup_format_version;
    if file.version == 0 || file.version > supported {
        return Err(CoreError::ValidationError(format!(
            "Unsupported backup version: {}",
            file.version
        )));
    }

    let salt = b64::decode(&file.salt)?;
    let key = derive_backup_key(password, &salt)?;

    // Бэкап может лежать сколь угодно долго
    let decrypted = envelope::decrypt(&file.encrypted_data, &key, DecryptOptions::without_freshness())?;
    if !decrypted.verified {
        warn!(target: "crypto::keys", "Backup content hash mismatch");
        return Err(CoreError::AuthenticationFailure);
    }

    let payload: BackupPayload = serde_json::from_slice(&decrypted.content)?;
    if checksum(&payload.key_data)? != payload.checksum {
        warn!(target: "crypto::keys", "Backup checksum mismatch");
        return Err(CoreError::AuthenticationFailure);
    }

    info!(
        target: "crypto::keys",
        version = payload.version,
        created_at = %payload.created_at,
        "Key backup restored"
    );

    Ok(payload.key_data)
}
