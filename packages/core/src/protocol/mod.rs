// Граница с внешними сервисами
// DTO, HTTP-клиент и валидация ответов

pub mod http;
#[cfg(feature = "post-quantum")]
pub mod local_kem;
pub mod service;
pub mod validation;

pub use service::QuantumCryptoService;
