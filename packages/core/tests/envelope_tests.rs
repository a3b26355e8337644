//! Свойства конверта и согласования алгоритмов

use e2ee_core::crypto::algorithm::{negotiate_algorithm, Algorithm, CLASSICAL_FALLBACK};
use e2ee_core::crypto::envelope::{self, decrypt_at, encrypt_at, DecryptOptions, EnvelopeVersion};
use e2ee_core::crypto::symmetric::{CipherMode, SymmetricKey};
use e2ee_core::utils::b64;
use e2ee_core::CoreError;
use proptest::prelude::*;

const NOW: i64 = 1_700_000_000_000;

fn key_for(version: EnvelopeVersion) -> SymmetricKey {
    match version {
        EnvelopeVersion::V3 => SymmetricKey::generate(CipherMode::Gcm),
        _ => SymmetricKey::generate(CipherMode::Cbc),
    }
}

fn version_strategy() -> impl Strategy<Value = EnvelopeVersion> {
    prop_oneof![
        Just(EnvelopeVersion::V1),
        Just(EnvelopeVersion::V2),
        Just(EnvelopeVersion::V3),
    ]
}

fn authenticated_version() -> impl Strategy<Value = EnvelopeVersion> {
    prop_oneof![Just(EnvelopeVersion::V2), Just(EnvelopeVersion::V3)]
}

fn capability_sets() -> impl Strategy<Value = Vec<Vec<Algorithm>>> {
    prop::collection::vec(prop::sample::subsequence(Algorithm::ALL.to_vec(), 0..=5), 1..5)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_roundtrip(plaintext in prop::collection::vec(any::<u8>(), 0..512), version in version_strategy()) {
        let key = key_for(version);
        let sealed = encrypt_at(&plaintext, &key, version, NOW).unwrap();
        let opened = decrypt_at(&sealed, &key, DecryptOptions::default(), NOW).unwrap();

        prop_assert!(opened.verified);
        prop_assert_eq!(opened.version, version);
        prop_assert_eq!(opened.content.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn prop_ciphertext_tamper_is_authentication_failure(
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        version in authenticated_version(),
        position in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let key = key_for(version);
        let mut sealed = encrypt_at(&plaintext, &key, version, NOW).unwrap();

        let mut ciphertext = b64::decode(&sealed.ciphertext).unwrap();
        let i = position.index(ciphertext.len());
        ciphertext[i] ^= flip;
        sealed.ciphertext = b64::encode(&ciphertext);

        let result = decrypt_at(&sealed, &key, DecryptOptions::default(), NOW);
        prop_assert!(matches!(result, Err(CoreError::AuthenticationFailure)));
    }

    #[test]
    fn prop_iv_tamper_is_authentication_failure(
        version in authenticated_version(),
        position in any::<prop::sample::Index>(),
    ) {
        let key = key_for(version);
        let mut sealed = encrypt_at(b"iv binding", &key, version, NOW).unwrap();

        let mut iv = b64::decode(&sealed.iv).unwrap();
        let i = position.index(iv.len());
        iv[i] ^= 0x80;
        sealed.iv = b64::encode(&iv);

        let result = decrypt_at(&sealed, &key, DecryptOptions::default(), NOW);
        prop_assert!(matches!(result, Err(CoreError::AuthenticationFailure)));
    }

    #[test]
    fn prop_negotiation_ignores_order(sets in capability_sets()) {
        let forward = negotiate_algorithm(&sets);
        let mut reversed = sets.clone();
        reversed.reverse();

        prop_assert_eq!(forward, negotiate_algorithm(&reversed));
        if forward != CLASSICAL_FALLBACK {
            prop_assert!(sets.iter().all(|s| s.contains(&forward)));
        }
    }
}

#[test]
fn test_auth_data_timestamp_tamper() {
    let key = key_for(EnvelopeVersion::V2);
    let mut sealed = encrypt_at(b"bound to time", &key, EnvelopeVersion::V2, NOW).unwrap();

    if let Some(auth) = sealed.auth_data.as_mut() {
        auth.timestamp += 1;
    }

    let result = decrypt_at(&sealed, &key, DecryptOptions::default(), NOW);
    assert!(matches!(result, Err(CoreError::AuthenticationFailure)));
}

#[test]
fn test_replay_and_skew_windows() {
    let key = key_for(EnvelopeVersion::V2);
    let options = DecryptOptions::default();

    let old = encrypt_at(b"old", &key, EnvelopeVersion::V2, NOW - 3_601_000).unwrap();
    assert!(matches!(
        decrypt_at(&old, &key, options, NOW),
        Err(CoreError::ReplayOrSkewDetected(_))
    ));

    let future = encrypt_at(b"future", &key, EnvelopeVersion::V2, NOW + 301_000).unwrap();
    assert!(matches!(
        decrypt_at(&future, &key, options, NOW),
        Err(CoreError::ReplayOrSkewDetected(_))
    ));

    let edge = encrypt_at(b"edge", &key, EnvelopeVersion::V2, NOW + 299_000).unwrap();
    assert!(decrypt_at(&edge, &key, options, NOW).is_ok());
}

#[test]
fn test_negotiation_examples() {
    use Algorithm::*;

    assert_eq!(
        negotiate_algorithm(&[vec![Kem1024, Kem768], vec![Kem768, Kem512], vec![Kem768]]),
        Kem768
    );
    assert_eq!(negotiate_algorithm(&[vec![Kem1024], vec![Kem512]]), CLASSICAL_FALLBACK);
    assert_eq!(
        negotiate_algorithm(&[vec![HybridRsaKem768, Kem512], vec![Kem512, HybridRsaKem768]]),
        HybridRsaKem768
    );
}

#[test]
fn test_bulk_decrypt_reports_per_item() {
    let key = key_for(EnvelopeVersion::V2);
    let good = envelope::encrypt(b"a", &key, EnvelopeVersion::V2).unwrap();
    let mut bad = envelope::encrypt(b"b", &key, EnvelopeVersion::V2).unwrap();
    bad.hmac = Some(b64::encode(&[0u8; 32]));

    let results = envelope::bulk_decrypt(
        vec![("good".to_string(), &good), ("bad".to_string(), &bad)],
        &key,
        DecryptOptions::default(),
    );

    assert_eq!(results.len(), 2);
    assert!(results[0].result.is_ok());
    assert!(matches!(results[1].result, Err(CoreError::AuthenticationFailure)));
}
