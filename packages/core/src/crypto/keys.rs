// Управление ключевым материалом
// Генерация асимметричных пар, упаковка и распаковка симметричных ключей

use crate::config::Config;
use crate::crypto::algorithm::{self, Algorithm, CLASSICAL_FALLBACK};
use crate::crypto::suites::classic::ClassicSuiteProvider;
use crate::crypto::symmetric::{CipherMode, SymmetricKey};
use crate::protocol::service::{DecapsulateRequest, EncapsulateRequest, QuantumCryptoService};
use crate::protocol::validation;
use crate::utils::b64;
use crate::utils::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Асимметричная пара ключей
///
/// Приватная часть живёт в памяти только пока нужна операции;
/// после сохранения владельцем становится `SecureKeyStore`.
pub struct KeyPair {
    /// PEM (классика), Base64 (ML-KEM) или Base64(JSON) для hybrid
    pub public_key: String,
    pub private_key: Zeroizing<String>,
    pub algorithm: Algorithm,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm)
            .field("public_key_len", &self.public_key.len())
            .finish()
    }
}

/// Результат операции, которая могла откатиться на классический алгоритм
#[derive(Debug)]
pub struct Negotiated<T> {
    pub value: T,
    /// Алгоритм, который реально был использован
    pub algorithm: Algorithm,
    /// Причина отката, если он был
    pub fallback: Option<String>,
}

impl<T> Negotiated<T> {
    fn direct(value: T, algorithm: Algorithm) -> Self {
        Self {
            value,
            algorithm,
            fallback: None,
        }
    }

    fn fallen_back(value: T, reason: String) -> Self {
        Self {
            value,
            algorithm: CLASSICAL_FALLBACK,
            fallback: Some(reason),
        }
    }

    pub fn fell_back(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Ключевой материал hybrid-алгоритма (RSA + ML-KEM-768)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridKeyMaterial {
    /// PEM
    pub classical: String,
    /// Base64
    pub quantum: String,
}

/// Двойная упаковка симметричного ключа
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridCiphertext {
    pub classical: String,
    pub quantum: String,
}

fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(b64::encode(&serde_json::to_vec(value)?))
}

fn decode_json<T: for<'de> Deserialize<'de>>(encoded: &str) -> Option<T> {
    let bytes = b64::decode(encoded).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Режим шифра для ключа, установленного данным алгоритмом
pub fn cipher_mode_for(algorithm: Algorithm) -> CipherMode {
    if algorithm.is_quantum() {
        CipherMode::Gcm
    } else {
        CipherMode::Cbc
    }
}

/// Настройки менеджера
#[derive(Debug, Clone)]
pub struct KeyManagerSettings {
    pub rsa_modulus_bits: usize,
}

impl Default for KeyManagerSettings {
    fn default() -> Self {
        Self {
            rsa_modulus_bits: Config::global().rsa_modulus_bits,
        }
    }
}

/// Менеджер ключевого материала
pub struct KeyMaterialManager {
    service: Arc<dyn QuantumCryptoService>,
    settings: KeyManagerSettings,
}

impl KeyMaterialManager {
    pub fn new(service: Arc<dyn QuantumCryptoService>) -> Self {
        Self::with_settings(service, KeyManagerSettings::default())
    }

    pub fn with_settings(service: Arc<dyn QuantumCryptoService>, settings: KeyManagerSettings) -> Self {
        Self { service, settings }
    }

    pub fn service(&self) -> &Arc<dyn QuantumCryptoService> {
        &self.service
    }

    /// Сгенерировать пару ключей.
    ///
    /// Квантовые алгоритмы делегируются удалённому сервису; при любой ошибке
    /// (сеть, ответ сервиса, невалидный ответ) генерируется RSA пара, и это
    /// видно по `algorithm` / `fallback` результата.
    pub async fn generate_key_pair(&self, algorithm: Option<Algorithm>) -> Result<Negotiated<KeyPair>> {
        let algorithm = algorithm.unwrap_or(CLASSICAL_FALLBACK);

        if !algorithm.is_quantum() {
            return Ok(Negotiated::direct(self.generate_classical().await?, algorithm));
        }

        match self.generate_quantum_key_pair(algorithm).await {
            Ok(pair) => {
                info!(target: "crypto::keys", algorithm = %algorithm, "Generated quantum key pair");
                Ok(Negotiated::direct(pair, algorithm))
            }
            Err(e) => {
                warn!(
                    target: "crypto::keys",
                    algorithm = %algorithm,
                    error = %e,
                    "Quantum key generation failed, falling back to RSA"
                );
                let pair = self.generate_classical().await?;
                Ok(Negotiated::fallen_back(pair, e.to_string()))
            }
        }
    }

    /// Сгенерировать симметричный ключ в режиме, соответствующем алгоритму
    pub fn generate_symmetric_key(&self, algorithm: Algorithm) -> SymmetricKey {
        SymmetricKey::generate(cipher_mode_for(algorithm))
    }

    /// Упаковать симметричный ключ под публичный ключ получателя.
    ///
    /// Возвращает Base64 шифротекст. Если квантовый путь упал, ключ
    /// упаковывается локальным RSA-OAEP; если `public_key` не RSA,
    /// это `CryptoFailure`.
    pub async fn encrypt_symmetric_key(
        &self,
        key: &SymmetricKey,
        public_key: &str,
        algorithm: Option<Algorithm>,
    ) -> Result<Negotiated<String>> {
        let algorithm = algorithm.unwrap_or(CLASSICAL_FALLBACK);

        if !algorithm.is_quantum() {
            let wrapped = ClassicSuiteProvider::wrap(public_key, key.as_bytes())?;
            return Ok(Negotiated::direct(b64::encode(&wrapped), algorithm));
        }

        if algorithm.is_hybrid() {
            return self.encrypt_hybrid(key, public_key).await;
        }

        match self.encapsulate(key, public_key, algorithm).await {
            Ok(ciphertext) => Ok(Negotiated::direct(ciphertext, algorithm)),
            Err(e) => {
                warn!(
                    target: "crypto::keys",
                    algorithm = %algorithm,
                    error = %e,
                    "Encapsulation failed, falling back to RSA-OAEP"
                );
                let wrapped = ClassicSuiteProvider::wrap(public_key, key.as_bytes())?;
                Ok(Negotiated::fallen_back(b64::encode(&wrapped), e.to_string()))
            }
        }
    }

    /// Распаковать симметричный ключ.
    ///
    /// Квантовый путь импортирует ключ как AES-GCM, классический как AES-CBC.
    pub async fn decrypt_symmetric_key(
        &self,
        ciphertext: &str,
        private_key: &str,
        algorithm: Option<Algorithm>,
    ) -> Result<Negotiated<SymmetricKey>> {
        let algorithm = algorithm.unwrap_or(CLASSICAL_FALLBACK);

        if !algorithm.is_quantum() {
            let key = Self::unwrap_classical(ciphertext, private_key)?;
            return Ok(Negotiated::direct(key, algorithm));
        }

        if algorithm.is_hybrid() {
            return self.decrypt_hybrid(ciphertext, private_key).await;
        }

        match self.decapsulate(ciphertext, private_key, algorithm).await {
            Ok(key) => Ok(Negotiated::direct(key, algorithm)),
            Err(remote) => match Self::unwrap_classical(ciphertext, private_key) {
                Ok(key) => {
                    warn!(
                        target: "crypto::keys",
                        algorithm = %algorithm,
                        error = %remote,
                        "Decapsulation failed, recovered via RSA-OAEP"
                    );
                    Ok(Negotiated::fallen_back(key, remote.to_string()))
                }
                Err(_) => Err(CoreError::KeyDecapsulationFailure(remote.to_string())),
            },
        }
    }

    /// Выбрать общий алгоритм для набора устройств
    pub fn negotiate_algorithm(&self, capability_sets: &[Vec<Algorithm>]) -> Algorithm {
        algorithm::negotiate_algorithm(capability_sets)
    }

    async fn generate_classical(&self) -> Result<KeyPair> {
        let bits = self.settings.rsa_modulus_bits;
        let pair = tokio::task::spawn_blocking(move || ClassicSuiteProvider::generate_key_pair(bits))
            .await
            .map_err(|e| CoreError::CryptoFailure(format!("Key generation task failed: {}", e)))??;

        Ok(KeyPair {
            public_key: pair.public_pem,
            private_key: pair.private_pem,
            algorithm: CLASSICAL_FALLBACK,
        })
    }

    /// Квантовая пара без отката на RSA: ошибка сервиса возвращается как есть
    pub async fn generate_quantum_key_pair(&self, algorithm: Algorithm) -> Result<KeyPair> {
        if !algorithm.is_quantum() {
            return Err(CoreError::ValidationError(format!("{} is not a quantum algorithm", algorithm)));
        }

        if algorithm.is_hybrid() {
            let quantum = self.remote_keypair(Algorithm::Kem768).await?;
            let classical = self.generate_classical().await?;

            let public_key = encode_json(&HybridKeyMaterial {
                classical: classical.public_key,
                quantum: quantum.public_key,
            })?;
            let private_key = Zeroizing::new(encode_json(&HybridKeyMaterial {
                classical: classical.private_key.to_string(),
                quantum: quantum.private_key.to_string(),
            })?);

            return Ok(KeyPair {
                public_key,
                private_key,
                algorithm,
            });
        }

        self.remote_keypair(algorithm).await
    }

    async fn remote_keypair(&self, algorithm: Algorithm) -> Result<KeyPair> {
        let response = self.service.generate_keypair(algorithm).await?;
        validation::validate_keypair_response(&response)?;

        Ok(KeyPair {
            public_key: response.public_key,
            private_key: Zeroizing::new(response.private_key),
            algorithm,
        })
    }

    async fn encapsulate(&self, key: &SymmetricKey, public_key: &str, algorithm: Algorithm) -> Result<String> {
        let request = EncapsulateRequest {
            public_key: public_key.to_string(),
            algorithm,
            data: b64::encode(key.as_bytes()),
        };

        let response = self.service.encapsulate(&request).await?;
        validation::validate_encapsulate_response(&response)?;
        Ok(response.ciphertext)
    }

    async fn decapsulate(&self, ciphertext: &str, private_key: &str, algorithm: Algorithm) -> Result<SymmetricKey> {
        let request = DecapsulateRequest {
            ciphertext: ciphertext.to_string(),
            private_key: private_key.to_string(),
            algorithm,
        };

        let response = self.service.decapsulate(&request).await?;
        let secret = Zeroizing::new(validation::validate_decapsulate_response(&response)?);
        Ok(SymmetricKey::from_bytes(&secret, CipherMode::Gcm)?)
    }

    fn unwrap_classical(ciphertext: &str, private_key_pem: &str) -> Result<SymmetricKey> {
        let wrapped = b64::decode(ciphertext)
            .map_err(|e| CoreError::CryptoFailure(format!("Invalid wrapped key: {}", e)))?;
        let raw = ClassicSuiteProvider::unwrap(private_key_pem, &wrapped)?;
        Ok(SymmetricKey::from_bytes(&raw, CipherMode::Cbc)?)
    }

    async fn encrypt_hybrid(&self, key: &SymmetricKey, public_key: &str) -> Result<Negotiated<String>> {
        let Some(material) = decode_json::<HybridKeyMaterial>(public_key) else {
            // Не hybrid-ключ: пробуем как обычный RSA
            let wrapped = ClassicSuiteProvider::wrap(public_key, key.as_bytes())?;
            return Ok(Negotiated::fallen_back(
                b64::encode(&wrapped),
                "Public key is not hybrid key material".to_string(),
            ));
        };

        let classical = b64::encode(&ClassicSuiteProvider::wrap(&material.classical, key.as_bytes())?);

        match self.encapsulate(key, &material.quantum, Algorithm::Kem768).await {
            Ok(quantum) => Ok(Negotiated::direct(
                encode_json(&HybridCiphertext { classical, quantum })?,
                Algorithm::HybridRsaKem768,
            )),
            Err(e) => {
                warn!(
                    target: "crypto::keys",
                    error = %e,
                    "Hybrid encapsulation lost its quantum half, using RSA-OAEP only"
                );
                Ok(Negotiated::fallen_back(classical, e.to_string()))
            }
        }
    }

    async fn decrypt_hybrid(&self, ciphertext: &str, private_key: &str) -> Result<Negotiated<SymmetricKey>> {
        let material = decode_json::<HybridKeyMaterial>(private_key).ok_or_else(|| {
            CoreError::KeyDecapsulationFailure("Private key is not hybrid key material".to_string())
        })?;

        let Some(wrapped) = decode_json::<HybridCiphertext>(ciphertext) else {
            // Отправитель откатился на чистый RSA
            let key = Self::unwrap_classical(ciphertext, &material.classical)
                .map_err(|e| CoreError::KeyDecapsulationFailure(e.to_string()))?;
            return Ok(Negotiated::fallen_back(key, "Ciphertext carries classical wrap only".to_string()));
        };

        match self.decapsulate(&wrapped.quantum, &material.quantum, Algorithm::Kem768).await {
            Ok(key) => Ok(Negotiated::direct(key, Algorithm::HybridRsaKem768)),
            Err(remote) => {
                let key = Self::unwrap_classical(&wrapped.classical, &material.classical)
                    .map_err(|_| CoreError::KeyDecapsulationFailure(remote.to_string()))?;
                warn!(
                    target: "crypto::keys",
                    error = %remote,
                    "Hybrid decapsulation recovered via classical half"
                );
                Ok(Negotiated::fallen_back(key, remote.to_string()))
            }
        }
    }
}
