//! Key Material Manager: квантовый путь, откат на RSA и hybrid

mod common;

use common::{key_manager, MockQuantumService};
use e2ee_core::crypto::algorithm::{Algorithm, CLASSICAL_FALLBACK};
use e2ee_core::crypto::envelope::{self, DecryptOptions, EnvelopeVersion};
use e2ee_core::crypto::keys::cipher_mode_for;
use e2ee_core::crypto::symmetric::CipherMode;
use e2ee_core::utils::b64;
use e2ee_core::CoreError;

#[tokio::test]
async fn test_classical_wrap_roundtrip() {
    let manager = key_manager(MockQuantumService::new());

    let pair = manager.generate_key_pair(None).await.unwrap();
    assert_eq!(pair.algorithm, CLASSICAL_FALLBACK);
    assert!(!pair.fell_back());
    assert!(pair.value.public_key.starts_with("-----BEGIN PUBLIC KEY-----"));

    let key = manager.generate_symmetric_key(CLASSICAL_FALLBACK);
    assert_eq!(key.mode(), CipherMode::Cbc);

    let wrapped = manager
        .encrypt_symmetric_key(&key, &pair.value.public_key, None)
        .await
        .unwrap();
    let unwrapped = manager
        .decrypt_symmetric_key(&wrapped.value, &pair.value.private_key, None)
        .await
        .unwrap();

    assert_eq!(unwrapped.value.as_bytes(), key.as_bytes());
    assert_eq!(unwrapped.value.mode(), CipherMode::Cbc);
}

#[tokio::test]
async fn test_quantum_path_yields_gcm_key() {
    let service = MockQuantumService::new();
    let manager = key_manager(service.clone());

    let pair = manager.generate_key_pair(Some(Algorithm::Kem768)).await.unwrap();
    assert_eq!(pair.algorithm, Algorithm::Kem768);
    assert!(pair.fallback.is_none());

    let key = manager.generate_symmetric_key(Algorithm::Kem768);
    let wrapped = manager
        .encrypt_symmetric_key(&key, &pair.value.public_key, Some(Algorithm::Kem768))
        .await
        .unwrap();
    assert_eq!(wrapped.algorithm, Algorithm::Kem768);

    let unwrapped = manager
        .decrypt_symmetric_key(&wrapped.value, &pair.value.private_key, Some(Algorithm::Kem768))
        .await
        .unwrap();
    assert_eq!(unwrapped.value.mode(), CipherMode::Gcm);
    assert_eq!(unwrapped.value.as_bytes(), key.as_bytes());

    // Отправитель и получатель договорились: v3 конверт
    let sealed = envelope::encrypt(b"post-quantum hello", &key, EnvelopeVersion::V3).unwrap();
    let opened = envelope::decrypt(&sealed, &unwrapped.value, DecryptOptions::default()).unwrap();
    assert!(opened.verified);
    assert_eq!(opened.content_str().unwrap(), "post-quantum hello");
}

#[tokio::test]
async fn test_fallback_is_observable() {
    let service = MockQuantumService::new();
    service.set_failing(true);
    let manager = key_manager(service.clone());

    let pair = manager.generate_key_pair(Some(Algorithm::Kem1024)).await.unwrap();
    assert_eq!(pair.algorithm, CLASSICAL_FALLBACK);
    assert!(pair.fallback.as_deref().unwrap().contains("connection refused"));

    let key = manager.generate_symmetric_key(Algorithm::Kem1024);
    let wrapped = manager
        .encrypt_symmetric_key(&key, &pair.value.public_key, Some(Algorithm::Kem1024))
        .await
        .unwrap();
    assert!(wrapped.fell_back());
    assert_eq!(wrapped.algorithm, CLASSICAL_FALLBACK);

    let unwrapped = manager
        .decrypt_symmetric_key(&wrapped.value, &pair.value.private_key, Some(Algorithm::Kem1024))
        .await
        .unwrap();
    assert!(unwrapped.fell_back());
    assert_eq!(unwrapped.value.as_bytes(), key.as_bytes());
    assert_eq!(unwrapped.value.mode(), cipher_mode_for(unwrapped.algorithm));
}

#[tokio::test]
async fn test_decapsulation_failure_without_classical_path() {
    let service = MockQuantumService::new();
    let manager = key_manager(service.clone());

    let pair = manager.generate_key_pair(Some(Algorithm::Kem512)).await.unwrap();
    let key = manager.generate_symmetric_key(Algorithm::Kem512);
    let wrapped = manager
        .encrypt_symmetric_key(&key, &pair.value.public_key, Some(Algorithm::Kem512))
        .await
        .unwrap();

    service.set_failing(true);
    let result = manager
        .decrypt_symmetric_key(&wrapped.value, &pair.value.private_key, Some(Algorithm::Kem512))
        .await;

    assert!(matches!(result, Err(CoreError::KeyDecapsulationFailure(_))));
}

#[tokio::test]
async fn test_classical_wrap_needs_rsa_public_key() {
    let service = MockQuantumService::new();
    service.set_failing(true);
    let manager = key_manager(service);

    let key = manager.generate_symmetric_key(Algorithm::Kem768);
    let result = manager
        .encrypt_symmetric_key(&key, &b64::encode(&[1u8; 32]), Some(Algorithm::Kem768))
        .await;

    assert!(matches!(result, Err(CoreError::CryptoFailure(_))));
}

#[tokio::test]
async fn test_hybrid_survives_loss_of_quantum_half() {
    let service = MockQuantumService::new();
    let manager = key_manager(service.clone());

    let pair = manager
        .generate_key_pair(Some(Algorithm::HybridRsaKem768))
        .await
        .unwrap();
    assert_eq!(pair.algorithm, Algorithm::HybridRsaKem768);

    let key = manager.generate_symmetric_key(Algorithm::HybridRsaKem768);
    let wrapped = manager
        .encrypt_symmetric_key(&key, &pair.value.public_key, Some(Algorithm::HybridRsaKem768))
        .await
        .unwrap();
    assert_eq!(wrapped.algorithm, Algorithm::HybridRsaKem768);

    let quantum = manager
        .decrypt_symmetric_key(&wrapped.value, &pair.value.private_key, Some(Algorithm::HybridRsaKem768))
        .await
        .unwrap();
    assert!(!quantum.fell_back());
    assert_eq!(quantum.value.mode(), CipherMode::Gcm);

    service.set_failing(true);
    let classical = manager
        .decrypt_symmetric_key(&wrapped.value, &pair.value.private_key, Some(Algorithm::HybridRsaKem768))
        .await
        .unwrap();
    assert!(classical.fell_back());
    assert_eq!(classical.value.mode(), CipherMode::Cbc);
    assert_eq!(classical.value.as_bytes(), key.as_bytes());
}

#[tokio::test]
async fn test_strict_quantum_generation_does_not_fall_back() {
    let service = MockQuantumService::new();
    service.set_failing(true);
    let manager = key_manager(service);

    let result = manager.generate_quantum_key_pair(Algorithm::Kem1024).await;
    assert!(matches!(result, Err(CoreError::NetworkError(_))));

    let result = manager.generate_quantum_key_pair(Algorithm::RsaOaep4096).await;
    assert!(matches!(result, Err(CoreError::ValidationError(_))));
}

#[test]
fn test_negotiation_through_manager() {
    let manager = key_manager(MockQuantumService::new());
    let chosen = manager.negotiate_algorithm(&[
        vec![Algorithm::Kem1024, Algorithm::Kem768],
        vec![Algorithm::Kem768, Algorithm::Kem512],
    ]);
    assert_eq!(chosen, Algorithm::Kem768);
}
