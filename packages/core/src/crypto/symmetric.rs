// Симметричные примитивы
// AES-256-CBC (legacy) и AES-256-GCM (ключи из квантовой инкапсуляции),
// HMAC-SHA256, HKDF-SHA256, SHA-256

use crate::error::CryptoError;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const KEY_LENGTH: usize = 32;
/// Фиксированы типами `aes-gcm` и `cbc`
const GCM_NONCE_LENGTH: usize = 12;
const CBC_IV_LENGTH: usize = 16;
const HMAC_KEY_INFO: &[u8] = b"e2ee-core/envelope-hmac/v2";

/// Режим шифра, с которым импортирован ключ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherMode {
    /// AES-256-CBC, ключи из классического RSA-OAEP
    Cbc,
    /// AES-256-GCM, ключи из квантовой инкапсуляции
    Gcm,
}

impl CipherMode {
    pub fn iv_length(&self) -> usize {
        match self {
            CipherMode::Cbc => CBC_IV_LENGTH,
            CipherMode::Gcm => GCM_NONCE_LENGTH,
        }
    }
}

/// Симметричный ключ беседы. Материал затирается при drop.
#[derive(Clone)]
pub struct SymmetricKey {
    material: Zeroizing<[u8; KEY_LENGTH]>,
    mode: CipherMode,
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("mode", &self.mode)
            .field("material", &"<redacted>")
            .finish()
    }
}

impl SymmetricKey {
    pub fn generate(mode: CipherMode) -> Self {
        let mut material = Zeroizing::new([0u8; KEY_LENGTH]);
        rand::rngs::OsRng.fill_bytes(&mut *material);
        Self { material, mode }
    }

    /// Импортировать сырые байты ключа
    pub fn from_bytes(bytes: &[u8], mode: CipherMode) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidInputError(format!(
                "Invalid key length: expected {}, got {}",
                KEY_LENGTH,
                bytes.len()
            )));
        }

        let mut material = Zeroizing::new([0u8; KEY_LENGTH]);
        material.copy_from_slice(bytes);
        Ok(Self { material, mode })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &*self.material
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Зашифровать со свежим случайным IV. Возвращает (iv, ciphertext).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let iv = random_bytes(self.mode.iv_length());

        let ciphertext = match self.mode {
            CipherMode::Cbc => Aes256CbcEnc::new_from_slices(self.as_bytes(), &iv)
                .map_err(|e| CryptoError::InvalidInputError(e.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            CipherMode::Gcm => {
                let cipher = Aes256Gcm::new_from_slice(self.as_bytes())
                    .map_err(|e| CryptoError::InvalidInputError(e.to_string()))?;
                cipher
                    .encrypt(Nonce::from_slice(&iv), plaintext)
                    .map_err(|e| CryptoError::EncryptionError(e.to_string()))?
            }
        };

        Ok((iv, ciphertext))
    }

    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if iv.len() != self.mode.iv_length() {
            return Err(CryptoError::InvalidInputError(format!(
                "Invalid IV length for {:?}: {}",
                self.mode,
                iv.len()
            )));
        }

        let plaintext = match self.mode {
            CipherMode::Cbc => Aes256CbcDec::new_from_slices(self.as_bytes(), iv)
                .map_err(|e| CryptoError::InvalidInputError(e.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|e| CryptoError::DecryptionError(e.to_string()))?,
            CipherMode::Gcm => {
                let cipher = Aes256Gcm::new_from_slice(self.as_bytes())
                    .map_err(|e| CryptoError::InvalidInputError(e.to_string()))?;
                cipher.decrypt(Nonce::from_slice(iv), ciphertext)?
            }
        };

        Ok(Zeroizing::new(plaintext))
    }

    /// Ключ HMAC, выведенный из материала через HKDF-SHA256
    pub fn derive_hmac_key(&self) -> Result<Zeroizing<[u8; KEY_LENGTH]>, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(None, self.as_bytes());
        let mut okm = Zeroizing::new([0u8; KEY_LENGTH]);
        hkdf.expand(HMAC_KEY_INFO, &mut *okm)
            .map_err(|e| CryptoError::KeyDerivationError(e.to_string()))?;
        Ok(okm)
    }
}

/// HMAC-SHA256 по конкатенации частей
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidInputError(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Проверка HMAC за константное время
pub fn verify_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<bool, CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidInputError(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.verify_slice(tag).is_ok())
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}
