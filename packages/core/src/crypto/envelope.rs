//! Версионированный конверт сообщения
//!
//! ## Версии
//!
//! - **v1**: только шифротекст и content hash, без защиты от replay
//! - **v2**: + `auth_data` (timestamp, nonce, version) внутри шифротекста
//!   и HMAC-SHA256 по `ciphertext ‖ iv ‖ auth_data`
//! - **v3**: как v2, но ключ может быть получен квантовой инкапсуляцией
//!   (AES-256-GCM). Ключи [`CipherMode::Gcm`] принимаются только в v3.
//!
//! `content_hash` (SHA-256 исходного plaintext) проверяется всегда, независимо
//! от HMAC. Несовпадение хэша не является ошибкой: результат помечается
//! `verified = false`, а UI показывает сообщение как непроверенное.

use crate::config::Config;
use crate::crypto::symmetric::{
    hmac_sha256, random_bytes, sha256_hex, verify_hmac_sha256, CipherMode, SymmetricKey,
};
use crate::utils::b64;
use crate::utils::error::{CoreError, Result};
use crate::utils::time::current_timestamp_ms;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Разделитель между сериализованным `auth_data` и plaintext внутри шифротекста
const AUTH_DATA_SEPARATOR: u8 = 0x00;

/// Версия формата конверта
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EnvelopeVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
}

impl EnvelopeVersion {
    /// Есть ли в конверте HMAC и auth_data
    pub fn is_authenticated(&self) -> bool {
        *self >= EnvelopeVersion::V2
    }
}

impl TryFrom<u8> for EnvelopeVersion {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(EnvelopeVersion::V1),
            2 => Ok(EnvelopeVersion::V2),
            3 => Ok(EnvelopeVersion::V3),
            other => Err(format!("Unsupported envelope version: {}", other)),
        }
    }
}

impl From<EnvelopeVersion> for u8 {
    fn from(version: EnvelopeVersion) -> Self {
        version as u8
    }
}

/// Данные, привязывающие конверт ко времени и nonce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthData {
    /// Unix timestamp в миллисекундах
    pub timestamp: i64,
    /// Base64 случайный nonce
    pub nonce: String,
    pub version: EnvelopeVersion,
}

impl AuthData {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Зашифрованное сообщение
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64 шифротекст
    pub ciphertext: String,
    /// Base64 IV (16 байт для CBC, 12 для GCM)
    pub iv: String,
    /// Hex SHA-256 исходного plaintext
    pub content_hash: String,
    /// Base64 HMAC-SHA256 (v2/v3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_data: Option<AuthData>,
    pub timestamp: i64,
    pub nonce: String,
    pub version: EnvelopeVersion,
}

/// Параметры расшифровки
#[derive(Debug, Clone, Copy)]
pub struct DecryptOptions {
    /// Проверять ли свежесть timestamp (v2/v3)
    pub verify_freshness: bool,
    /// Максимальный возраст конверта
    pub max_age_secs: i64,
    /// Допустимое опережение часов отправителя
    pub max_future_skew_secs: i64,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        let cfg = Config::global();
        Self {
            verify_freshness: true,
            max_age_secs: cfg.envelope_max_age_secs,
            max_future_skew_secs: cfg.envelope_future_skew_secs,
        }
    }
}

impl DecryptOptions {
    /// Без проверки свежести (бэкапы, архив)
    pub fn without_freshness() -> Self {
        Self {
            verify_freshness: false,
            ..Self::default()
        }
    }
}

/// Результат расшифровки
#[derive(Debug, Clone)]
pub struct DecryptedMessage {
    pub content: Zeroizing<Vec<u8>>,
    /// Совпал ли content hash
    pub verified: bool,
    pub version: EnvelopeVersion,
}

impl DecryptedMessage {
    pub fn content_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.content)
            .map_err(|e| CoreError::ValidationError(format!("Content is not UTF-8: {}", e)))
    }
}

/// Результат одного элемента пакетной операции
#[derive(Debug)]
pub struct BulkItem<T> {
    pub id: String,
    pub result: Result<T>,
}

/// Зашифровать plaintext в конверт указанной версии
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey, version: EnvelopeVersion) -> Result<Envelope> {
    encrypt_at(plaintext, key, version, current_timestamp_ms())
}

/// Как [`encrypt`], но с явным timestamp (миллисекунды)
pub fn encrypt_at(
    plaintext: &[u8],
    key: &SymmetricKey,
    version: EnvelopeVersion,
    timestamp_ms: i64,
) -> Result<Envelope> {
    check_key_mode(key, version)?;

    let nonce = b64::encode(&random_bytes(Config::global().envelope_nonce_length));
    let content_hash = sha256_hex(plaintext);

    if !version.is_authenticated() {
        let (iv, ciphertext) = key.encrypt(plaintext)?;
        return Ok(Envelope {
            ciphertext: b64::encode(&ciphertext),
            iv: b64::encode(&iv),
            content_hash,
            hmac: None,
            auth_data: None,
            timestamp: timestamp_ms,
            nonce,
            version,
        });
    }

    let auth_data = AuthData {
        timestamp: timestamp_ms,
        nonce: nonce.clone(),
        version,
    };
    let auth_bytes = auth_data.to_bytes()?;

    // auth_data ‖ 0x00 ‖ plaintext
    let mut framed = Zeroizing::new(Vec::with_capacity(auth_bytes.len() + 1 + plaintext.len()));
    framed.extend_from_slice(&auth_bytes);
    framed.push(AUTH_DATA_SEPARATOR);
    framed.extend_from_slice(plaintext);

    let (iv, ciphertext) = key.encrypt(&framed)?;

    let hmac_key = key.derive_hmac_key()?;
    let tag = hmac_sha256(&*hmac_key, &[&ciphertext, &iv, &auth_bytes])?;

    debug!(
        target: "crypto::envelope",
        version = ?version,
        ciphertext_len = ciphertext.len(),
        "Envelope encrypted"
    );

    Ok(Envelope {
        ciphertext: b64::encode(&ciphertext),
        iv: b64::encode(&iv),
        content_hash,
        hmac: Some(b64::encode(&tag)),
        auth_data: Some(auth_data),
        timestamp: timestamp_ms,
        nonce,
        version,
    })
}

/// Расшифровать конверт
pub fn decrypt(envelope: &Envelope, key: &SymmetricKey, options: DecryptOptions) -> Result<DecryptedMessage> {
    decrypt_at(envelope, key, options, current_timestamp_ms())
}

/// Как [`decrypt`], но с явным "сейчас" (миллисекунды)
pub fn decrypt_at(
    envelope: &Envelope,
    key: &SymmetricKey,
    options: DecryptOptions,
    now_ms: i64,
) -> Result<DecryptedMessage> {
    check_key_mode(key, envelope.version)?;

    let ciphertext = decode_field(&envelope.ciphertext, "ciphertext")?;
    let iv = decode_field(&envelope.iv, "iv")?;

    let content = if envelope.version.is_authenticated() {
        let auth_data = envelope
            .auth_data
            .as_ref()
            .ok_or(CoreError::AuthenticationFailure)?;
        let tag = envelope
            .hmac
            .as_deref()
            .ok_or(CoreError::AuthenticationFailure)?;
        let tag = b64::decode(tag).map_err(|_| CoreError::AuthenticationFailure)?;
        let auth_bytes = auth_data.to_bytes()?;

        let hmac_key = key.derive_hmac_key()?;
        if !verify_hmac_sha256(&*hmac_key, &[&ciphertext, &iv, &auth_bytes], &tag)? {
            warn!(target: "crypto::envelope", version = ?envelope.version, "Envelope HMAC mismatch");
            return Err(CoreError::AuthenticationFailure);
        }

        if auth_data.version != envelope.version {
            return Err(CoreError::AuthenticationFailure);
        }

        if options.verify_freshness {
            check_freshness(auth_data.timestamp, now_ms, &options)?;
        }

        let framed = key.decrypt(&iv, &ciphertext)?;
        let split = framed
            .iter()
            .position(|b| *b == AUTH_DATA_SEPARATOR)
            .ok_or_else(|| CoreError::CryptoFailure("Missing auth data separator".to_string()))?;

        // Внутренняя копия auth_data должна совпадать с внешней
        if framed[..split] != auth_bytes[..] {
            return Err(CoreError::AuthenticationFailure);
        }

        Zeroizing::new(framed[split + 1..].to_vec())
    } else {
        key.decrypt(&iv, &ciphertext)?
    };

    let verified = sha256_hex(&content) == envelope.content_hash;
    if !verified {
        warn!(target: "crypto::envelope", "Content hash mismatch, message is unverified");
    }

    Ok(DecryptedMessage {
        content,
        verified,
        version: envelope.version,
    })
}

/// Зашифровать набор `(id, plaintext)`; ошибка одного элемента не прерывает пакет
pub fn bulk_encrypt<I, P>(items: I, key: &SymmetricKey, version: EnvelopeVersion) -> Vec<BulkItem<Envelope>>
where
    I: IntoIterator<Item = (String, P)>,
    P: AsRef<[u8]>,
{
    items
        .into_iter()
        .map(|(id, plaintext)| BulkItem {
            result: encrypt(plaintext.as_ref(), key, version),
            id,
        })
        .collect()
}

/// Расшифровать набор `(id, envelope)`; ошибка одного элемента не прерывает пакет
pub fn bulk_decrypt<'a, I>(items: I, key: &SymmetricKey, options: DecryptOptions) -> Vec<BulkItem<DecryptedMessage>>
where
    I: IntoIterator<Item = (String, &'a Envelope)>,
{
    items
        .into_iter()
        .map(|(id, envelope)| BulkItem {
            result: decrypt(envelope, key, options),
            id,
        })
        .collect()
}

fn check_key_mode(key: &SymmetricKey, version: EnvelopeVersion) -> Result<()> {
    if key.mode() == CipherMode::Gcm && version != EnvelopeVersion::V3 {
        return Err(CoreError::CryptoFailure(format!(
            "Quantum-derived keys require envelope v3, got v{}",
            u8::from(version)
        )));
    }
    Ok(())
}

fn check_freshness(timestamp_ms: i64, now_ms: i64, options: &DecryptOptions) -> Result<()> {
    let age_ms = now_ms.saturating_sub(timestamp_ms);
    if age_ms > options.max_age_secs.saturating_mul(1000) {
        warn!(target: "crypto::envelope", age_ms, "Envelope rejected as replay");
        return Err(CoreError::ReplayOrSkewDetected(format!(
            "Envelope is {}s old, max age is {}s",
            age_ms / 1000,
            options.max_age_secs
        )));
    }

    if age_ms.saturating_neg() > options.max_future_skew_secs.saturating_mul(1000) {
        warn!(target: "crypto::envelope", ahead_ms = age_ms.saturating_neg(), "Envelope rejected for clock skew");
        return Err(CoreError::ReplayOrSkewDetected(format!(
            "Envelope timestamp is {}s in the future, tolerance is {}s",
            age_ms.saturating_neg() / 1000,
            options.max_future_skew_secs
        )));
    }

    Ok(())
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>> {
    b64::decode(value).map_err(|e| CoreError::CryptoFailure(format!("Invalid {}: {}", field, e)))
}
