// E2EE Core
// Клиентское криптографическое ядро чата: конверты сообщений, жизненный цикл
// ключей, защищённое хранилище и миграция на постквантовые алгоритмы

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

// Модули
pub mod config;
pub mod crypto;
pub mod error;
pub mod migration;
pub mod protocol;
pub mod storage;
pub mod utils;

// Re-exports для удобства
pub use config::Config;
pub use crypto::{Algorithm, Envelope, EnvelopeVersion, KeyMaterialManager, Negotiated, SymmetricKey};
pub use migration::{MigrationOrchestrator, MigrationRegistry};
pub use storage::SecureKeyStore;
pub use utils::error::{CoreError, Result};
