use crate::error::CryptoError;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha512;
use zeroize::Zeroizing;

/// Local classical suite: RSA-OAEP with SHA-512, PEM-encoded keys (PKCS#8 / SPKI).
pub struct ClassicSuiteProvider;

/// PEM-encoded RSA key pair. The private half is zeroized on drop.
pub struct RsaKeyPairPem {
    pub public_pem: String,
    pub private_pem: Zeroizing<String>,
}

impl ClassicSuiteProvider {
    /// Generates a new RSA key pair with the given modulus size.
    pub fn generate_key_pair(bits: usize) -> Result<RsaKeyPairPem, CryptoError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGenerationError(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::SerializationError(e.to_string()))?;

        Ok(RsaKeyPairPem {
            public_pem,
            private_pem,
        })
    }

    /// Encrypts raw key bytes under the recipient's public key.
    pub fn wrap(public_key_pem: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
            .map_err(|e| CryptoError::InvalidInputError(format!("Invalid RSA public key: {}", e)))?;

        let ciphertext = public_key.encrypt(&mut OsRng, Oaep::new::<Sha512>(), data)?;
        Ok(ciphertext)
    }

    /// Decrypts wrapped key bytes with the private key.
    pub fn unwrap(private_key_pem: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| CryptoError::InvalidInputError(format!("Invalid RSA private key: {}", e)))?;

        let plaintext = private_key
            .decrypt(Oaep::new::<Sha512>(), ciphertext)
            .map_err(|e| CryptoError::DecryptionError(e.to_string()))?;
        Ok(Zeroizing::new(plaintext))
    }
}
