//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Migration / Secure Key Store                   │
//! └─────────────────────────────────────────────────────────────┘
//!                │                           │
//!                ▼                           ▼
//! ┌───────────────────────────┐  ┌──────────────────────────┐
//! │  KeyMaterialManager       │  │  Envelope Codec          │
//! │  - RSA-OAEP (локально)    │  │  - v1 / v2 / v3          │
//! │  - ML-KEM (удалённо)      │  │  - HMAC + auth_data      │
//! │  - Hybrid                 │  │  - replay / skew         │
//! └───────────────────────────┘  └──────────────────────────┘
//!                │                           │
//!                └─────────────┬─────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Симметричные примитивы                      │
//! │  - AES-256-CBC / AES-256-GCM                                │
//! │  - HMAC-SHA256, HKDF-SHA256, SHA-256                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Модули
//!
//! - [`algorithm`]: идентификаторы алгоритмов и согласование
//! - [`envelope`]: версионированный конверт сообщения
//! - [`keys`]: генерация пар и упаковка симметричных ключей
//! - [`suites`]: локальные реализации (RSA-OAEP)
//! - [`symmetric`]: AES, HMAC, HKDF
//! - [`backup`]: экспорт/восстановление ключей по паролю

pub mod algorithm;
pub mod backup;
pub mod envelope;
pub mod keys;
pub mod suites;
pub mod symmetric;

pub use algorithm::{negotiate_algorithm, Algorithm};
pub use envelope::{DecryptOptions, DecryptedMessage, Envelope, EnvelopeVersion};
pub use keys::{KeyMaterialManager, KeyPair, Negotiated};
pub use symmetric::{CipherMode, SymmetricKey};
