//! Общие заглушки для интеграционных тестов

#![allow(dead_code)]

use async_trait::async_trait;
use e2ee_core::crypto::algorithm::Algorithm;
use e2ee_core::crypto::keys::{KeyManagerSettings, KeyMaterialManager};
use e2ee_core::migration::backend::{ChatBackend, ConversationSummary, DeviceInfo, QuantumSettings};
use e2ee_core::protocol::service::{
    DecapsulateRequest, DecapsulateResponse, EncapsulateRequest, EncapsulateResponse,
    GenerateKeypairResponse, HealthResponse, QuantumCryptoService, QuantumSupport,
};
use e2ee_core::utils::b64;
use e2ee_core::{CoreError, Result};
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub const TEST_RSA_BITS: usize = 2048;

/// Заглушка криптосервиса: "ключ" это 32 случайных байта, public == private,
/// ciphertext = ключ ‖ данные
pub struct MockQuantumService {
    pub fail: AtomicBool,
    pub kem_available: AtomicBool,
    pub calls: AtomicUsize,
}

impl MockQuantumService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            kem_available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(CoreError::NetworkError("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QuantumCryptoService for MockQuantumService {
    async fn generate_keypair(&self, _algorithm: Algorithm) -> Result<GenerateKeypairResponse> {
        self.check()?;
        let mut secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        Ok(GenerateKeypairResponse {
            public_key: b64::encode(&secret),
            private_key: b64::encode(&secret),
        })
    }

    async fn encapsulate(&self, request: &EncapsulateRequest) -> Result<EncapsulateResponse> {
        self.check()?;
        let mut blob = b64::decode(&request.public_key)?;
        blob.extend_from_slice(&b64::decode(&request.data)?);
        Ok(EncapsulateResponse {
            ciphertext: b64::encode(&blob),
        })
    }

    async fn decapsulate(&self, request: &DecapsulateRequest) -> Result<DecapsulateResponse> {
        self.check()?;
        let blob = b64::decode(&request.ciphertext)?;
        let secret = b64::decode(&request.private_key)?;
        if blob.len() < secret.len() || blob[..secret.len()] != secret[..] {
            return Err(CoreError::CryptoFailure("wrong private key".to_string()));
        }
        Ok(DecapsulateResponse {
            shared_secret: b64::encode(&blob[secret.len()..]),
        })
    }

    async fn health(&self) -> Result<HealthResponse> {
        self.check()?;
        Ok(HealthResponse {
            quantum_support: QuantumSupport {
                kem_available: self.kem_available.load(Ordering::SeqCst),
                algorithms: vec!["ML-KEM-768".to_string(), "ML-KEM-1024".to_string()],
            },
            status: Some("ok".to_string()),
        })
    }
}

pub fn key_manager(service: Arc<MockQuantumService>) -> KeyMaterialManager {
    KeyMaterialManager::with_settings(
        service,
        KeyManagerSettings {
            rsa_modulus_bits: TEST_RSA_BITS,
        },
    )
}

/// Заглушка чат-бэкенда
#[derive(Default)]
pub struct MockBackend {
    pub conversations: Vec<ConversationSummary>,
    pub devices: Vec<DeviceInfo>,
    pub failing_conversations: HashSet<String>,
    pub failing_devices: HashSet<String>,
    pub upgraded: Mutex<HashMap<String, Algorithm>>,
    pub registered_devices: Mutex<Vec<(String, Algorithm)>>,
    /// Если задан, каждый апгрейд беседы ждёт разрешения
    pub gate: Option<Arc<Semaphore>>,
    pub panic_on_upgrade: bool,
}

impl MockBackend {
    pub fn with_fleet(conversations: usize, devices: usize, quantum_ready: usize) -> Self {
        Self {
            conversations: (0..conversations)
                .map(|i| ConversationSummary {
                    id: format!("conv-{}", i),
                    message_count: 10,
                    participant_count: 2,
                })
                .collect(),
            devices: (0..devices)
                .map(|i| DeviceInfo {
                    device_id: format!("device-{}", i),
                    user_id: Some("alice".to_string()),
                    capabilities: if i < quantum_ready {
                        vec!["ML-KEM-1024".to_string(), "RSA-OAEP-4096".to_string()]
                    } else {
                        vec!["RSA-OAEP-4096".to_string()]
                    },
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn upgraded_count(&self) -> usize {
        self.upgraded.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.conversations.clone())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    async fn upgrade_conversation_encryption(&self, conversation_id: &str, algorithm: Algorithm) -> Result<()> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| CoreError::InvalidState(e.to_string()))?;
        }

        if self.panic_on_upgrade {
            panic!("upgrade handler crashed on {}", conversation_id);
        }

        if self.failing_conversations.contains(conversation_id) {
            return Err(CoreError::NetworkError(format!("upgrade of {} rejected", conversation_id)));
        }

        self.upgraded
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), algorithm);
        Ok(())
    }

    async fn conversation_quantum_settings(&self, conversation_id: &str) -> Result<QuantumSettings> {
        let algorithm = self.upgraded.lock().unwrap().get(conversation_id).copied();
        Ok(QuantumSettings {
            quantum_resistant: algorithm.is_some_and(|a| a.is_quantum()),
            algorithm,
        })
    }

    async fn register_device_key(&self, device_id: &str, algorithm: Algorithm, _public_key: &str) -> Result<()> {
        if self.failing_devices.contains(device_id) {
            return Err(CoreError::NetworkError(format!("device {} offline", device_id)));
        }
        self.registered_devices
            .lock()
            .unwrap()
            .push((device_id.to_string(), algorithm));
        Ok(())
    }
}
