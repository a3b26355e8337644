//! In-process реализация [`QuantumCryptoService`] на `pqcrypto-kyber`.
//!
//! Данные упаковываются так же, как это делает удалённый сервис:
//! `kem_ciphertext ‖ nonce(12) ‖ AES-256-GCM(data)`, где ключ AES выводится
//! из shared secret через HKDF-SHA256.

use crate::crypto::algorithm::Algorithm;
use crate::crypto::symmetric::random_bytes;
use crate::protocol::service::{
    DecapsulateRequest, DecapsulateResponse, EncapsulateRequest, EncapsulateResponse,
    GenerateKeypairResponse, HealthResponse, QuantumCryptoService, QuantumSupport,
};
use crate::protocol::validation::validate_base64;
use crate::utils::b64;
use crate::utils::error::{CoreError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use hkdf::Hkdf;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};
use sha2::Sha256;
use zeroize::Zeroizing;

const WRAP_INFO: &[u8] = b"e2ee-core/local-kem-wrap/v1";
const NONCE_LENGTH: usize = 12;

macro_rules! with_kyber {
    ($alg:expr, $m:ident => $body:expr) => {
        match $alg {
            Algorithm::Kem512 => {
                use pqcrypto_kyber::kyber512 as $m;
                $body
            }
            Algorithm::Kem768 => {
                use pqcrypto_kyber::kyber768 as $m;
                $body
            }
            Algorithm::Kem1024 => {
                use pqcrypto_kyber::kyber1024 as $m;
                $body
            }
            other => Err(CoreError::ValidationError(format!(
                "{} is not a KEM algorithm",
                other
            ))),
        }
    };
}

/// Локальный ML-KEM "сервис"
#[derive(Debug, Default, Clone)]
pub struct LocalKemService;

impl LocalKemService {
    pub fn new() -> Self {
        Self
    }
}

fn kem_of(algorithm: Algorithm) -> Result<Algorithm> {
    algorithm
        .kem_component()
        .ok_or_else(|| CoreError::ValidationError(format!("{} has no KEM component", algorithm)))
}

fn wrap_cipher(shared_secret: &[u8]) -> Result<Aes256Gcm> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf.expand(WRAP_INFO, &mut *okm)
        .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
    Aes256Gcm::new_from_slice(&*okm).map_err(|e| CoreError::CryptoFailure(e.to_string()))
}

#[async_trait]
impl QuantumCryptoService for LocalKemService {
    async fn generate_keypair(&self, algorithm: Algorithm) -> Result<GenerateKeypairResponse> {
        with_kyber!(kem_of(algorithm)?, kem => {
            let (pk, sk) = kem::keypair();
            Ok(GenerateKeypairResponse {
                public_key: b64::encode(pk.as_bytes()),
                private_key: b64::encode(sk.as_bytes()),
            })
        })
    }

    async fn encapsulate(&self, request: &EncapsulateRequest) -> Result<EncapsulateResponse> {
        let pk_bytes = validate_base64(&request.public_key, "public_key")?;
        let data = Zeroizing::new(validate_base64(&request.data, "data")?);

        let (shared_secret, kem_ct) = with_kyber!(kem_of(request.algorithm)?, kem => {
            let pk = kem::PublicKey::from_bytes(&pk_bytes)
                .map_err(|e| CoreError::CryptoFailure(format!("Invalid KEM public key: {}", e)))?;
            let (ss, ct) = kem::encapsulate(&pk);
            Ok((Zeroizing::new(ss.as_bytes().to_vec()), ct.as_bytes().to_vec()))
        })?;

        let nonce = random_bytes(NONCE_LENGTH);
        let wrapped = wrap_cipher(&shared_secret)?
            .encrypt(Nonce::from_slice(&nonce), data.as_slice())
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;

        let mut out = kem_ct;
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&wrapped);

        Ok(EncapsulateResponse {
            ciphertext: b64::encode(&out),
        })
    }

    async fn decapsulate(&self, request: &DecapsulateRequest) -> Result<DecapsulateResponse> {
        let sk_bytes = Zeroizing::new(validate_base64(&request.private_key, "private_key")?);
        let blob = validate_base64(&request.ciphertext, "ciphertext")?;

        let (shared_secret, rest) = with_kyber!(kem_of(request.algorithm)?, kem => {
            let ct_len = kem::ciphertext_bytes();
            if blob.len() < ct_len + NONCE_LENGTH {
                return Err(CoreError::KeyDecapsulationFailure("Ciphertext too short".to_string()));
            }
            let (kem_ct, rest) = blob.split_at(ct_len);
            let sk = kem::SecretKey::from_bytes(&sk_bytes)
                .map_err(|e| CoreError::KeyDecapsulationFailure(format!("Invalid KEM secret key: {}", e)))?;
            let ct = kem::Ciphertext::from_bytes(kem_ct)
                .map_err(|e| CoreError::KeyDecapsulationFailure(format!("Invalid KEM ciphertext: {}", e)))?;
            let ss = kem::decapsulate(&ct, &sk);
            Ok((Zeroizing::new(ss.as_bytes().to_vec()), rest))
        })?;

        let (nonce, wrapped) = rest.split_at(NONCE_LENGTH);
        let data = wrap_cipher(&shared_secret)?
            .decrypt(Nonce::from_slice(nonce), wrapped)
            .map_err(|_| CoreError::KeyDecapsulationFailure("Unwrap failed".to_string()))?;
        let data = Zeroizing::new(data);

        Ok(DecapsulateResponse {
            shared_secret: b64::encode(&data),
        })
    }

    async fn health(&self) -> Result<HealthResponse> {
        Ok(HealthResponse {
            quantum_support: QuantumSupport {
                kem_available: true,
                algorithms: [Algorithm::Kem512, Algorithm::Kem768, Algorithm::Kem1024]
                    .iter()
                    .map(|a| a.as_str().to_string())
                    .collect(),
            },
            status: Some("local".to_string()),
        })
    }
}
