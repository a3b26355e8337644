//! Локальные криптографические наборы
//!
//! ### Classic Suite
//! - **Asymmetric**: RSA-OAEP (SHA-512), по умолчанию 4096 бит
//! - **Формат ключей**: PEM (PKCS#8 / SPKI)
//!
//! Квантовые алгоритмы (ML-KEM) выполняет удалённый сервис,
//! см. [`crate::protocol::service`].

pub mod classic;
