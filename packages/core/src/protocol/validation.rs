// Валидация ответов внешних сервисов
// Всё, что пришло по сети, проверяется до использования

use crate::protocol::service::{DecapsulateResponse, EncapsulateResponse, GenerateKeypairResponse};
use crate::utils::b64;
use crate::utils::error::{CoreError, Result};

/// Валидация Base64 строки
pub fn validate_base64(encoded: &str, field: &str) -> Result<Vec<u8>> {
    if encoded.trim().is_empty() {
        return Err(CoreError::ValidationError(format!("{} is empty", field)));
    }

    b64::decode(encoded)
        .map_err(|_| CoreError::ValidationError(format!("{} is not valid Base64", field)))
}

pub fn validate_keypair_response(response: &GenerateKeypairResponse) -> Result<()> {
    validate_base64(&response.public_key, "public_key")?;
    validate_base64(&response.private_key, "private_key")?;
    Ok(())
}

pub fn validate_encapsulate_response(response: &EncapsulateResponse) -> Result<()> {
    validate_base64(&response.ciphertext, "ciphertext")?;
    Ok(())
}

/// Возвращает декодированный shared secret (должен быть ключом AES-256)
pub fn validate_decapsulate_response(response: &DecapsulateResponse) -> Result<Vec<u8>> {
    let secret = validate_base64(&response.shared_secret, "shared_secret")?;
    if secret.len() != 32 {
        return Err(CoreError::ValidationError(format!(
            "shared_secret must be 32 bytes, got {}",
            secret.len()
        )));
    }
    Ok(secret)
}

/// Валидация идентификаторов (conversation_id, device_id, user_id)
pub fn validate_identifier(id: &str, field: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(CoreError::ValidationError(format!(
            "{} must be between 1 and 128 characters",
            field
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == ':')
    {
        return Err(CoreError::ValidationError(format!(
            "{} contains invalid characters",
            field
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_response_validation() {
        let ok = GenerateKeypairResponse {
            public_key: b64::encode(b"pk"),
            private_key: b64::encode(b"sk"),
        };
        assert!(validate_keypair_response(&ok).is_ok());

        let empty = GenerateKeypairResponse {
            public_key: String::new(),
            private_key: b64::encode(b"sk"),
        };
        assert!(validate_keypair_response(&empty).is_err());

        let garbage = GenerateKeypairResponse {
            public_key: "%%%".to_string(),
            private_key: b64::encode(b"sk"),
        };
        assert!(validate_keypair_response(&garbage).is_err());
    }

    #[test]
    fn test_shared_secret_length() {
        let short = DecapsulateResponse {
            shared_secret: b64::encode(&[0u8; 16]),
        };
        assert!(validate_decapsulate_response(&short).is_err());

        let ok = DecapsulateResponse {
            shared_secret: b64::encode(&[0u8; 32]),
        };
        assert_eq!(validate_decapsulate_response(&ok).unwrap().len(), 32);
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("conv-42", "conversation_id").is_ok());
        assert!(validate_identifier("", "conversation_id").is_err());
        assert!(validate_identifier("a/b", "conversation_id").is_err());
        assert!(validate_identifier(&"x".repeat(129), "device_id").is_err());
    }
}
