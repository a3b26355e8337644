//! Централизованная конфигурация для E2EE Core
//!
//! Все константы и настройки должны быть определены здесь,
//! чтобы избежать хардкода по всему проекту.

use std::sync::OnceLock;

/// Глобальная конфигурация (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Основная структура конфигурации
#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // КРИПТОГРАФИЧЕСКИЕ ПАРАМЕТРЫ
    // ============================================

    /// PBKDF2: количество итераций для деривации ключа бэкапа из пароля
    pub pbkdf2_iterations: u32,

    /// Длина соли для PBKDF2 (в байтах)
    pub salt_length: usize,

    /// Длина ключа для AES-256 (в байтах)
    pub key_length: usize,

    /// Длина anti-replay nonce в конверте (в байтах)
    pub envelope_nonce_length: usize,

    /// Размер модуля RSA для классических ключей
    pub rsa_modulus_bits: usize,

    // ============================================
    // ВРЕМЕННЫЕ ПАРАМЕТРЫ
    // ============================================

    /// Максимальный возраст конверта (в секундах)
    /// По умолчанию: 1 час
    pub envelope_max_age_secs: i64,

    /// Максимальное время в будущем для timestamp конверта (в секундах)
    /// По умолчанию: 5 минут
    pub envelope_future_skew_secs: i64,

    /// Время жизни ключа беседы (в секундах)
    /// По умолчанию: 24 часа
    pub conversation_key_ttl_secs: i64,

    // ============================================
    // МИГРАЦИЯ
    // ============================================

    /// Размер пачки для gradual стратегии
    pub migration_batch_size: usize,

    /// Пауза между пачками (в миллисекундах)
    pub migration_batch_pause_ms: u64,

    /// Сколько бесед проверяется на этапе verification
    pub verification_sample_size: usize,

    // ============================================
    // ВАЛИДАЦИЯ
    // ============================================

    /// Минимальная длина пароля бэкапа
    pub password_min_length: usize,

    /// Версия формата бэкапа
    pub backup_format_version: u32,

    // ============================================
    // СЕТЕВЫЕ ПАРАМЕТРЫ
    // ============================================

    /// Базовый URL удалённого криптосервиса
    pub quantum_service_url: String,

    /// Таймаут запросов к криптосервису (None = без таймаута)
    pub remote_request_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Криптография
            pbkdf2_iterations: 100_000,
            salt_length: 32,
            key_length: 32,
            envelope_nonce_length: 16,
            rsa_modulus_bits: 4096,

            // Временные параметры
            envelope_max_age_secs: 3600,     // 1 hour
            envelope_future_skew_secs: 300,  // 5 minutes
            conversation_key_ttl_secs: 24 * 60 * 60, // 24 hours

            // Миграция
            migration_batch_size: 5,
            migration_batch_pause_ms: 1000,
            verification_sample_size: 5,

            // Валидация
            password_min_length: 8,
            backup_format_version: 1,

            // Сетевые параметры
            quantum_service_url: "http://localhost:8000".to_string(),
            remote_request_timeout_ms: None,
        }
    }
}

impl Config {
    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Переопределяем значения из env, если они заданы
        if let Some(parsed) = env_parse("PBKDF2_ITERATIONS") {
            config.pbkdf2_iterations = parsed;
        }

        if let Some(parsed) = env_parse("RSA_MODULUS_BITS") {
            config.rsa_modulus_bits = parsed;
        }

        if let Some(parsed) = env_parse("ENVELOPE_MAX_AGE_SECS") {
            config.envelope_max_age_secs = parsed;
        }

        if let Some(parsed) = env_parse("CONVERSATION_KEY_TTL_SECS") {
            config.conversation_key_ttl_secs = parsed;
        }

        if let Some(parsed) = env_parse("MIGRATION_BATCH_PAUSE_MS") {
            config.migration_batch_pause_ms = parsed;
        }

        if let Ok(val) = std::env::var("QUANTUM_SERVICE_URL") {
            if !val.trim().is_empty() {
                config.quantum_service_url = val;
            }
        }

        if let Some(parsed) = env_parse("REMOTE_REQUEST_TIMEOUT_MS") {
            config.remote_request_timeout_ms = Some(parsed);
        }

        config
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// Автоматически инициализирует конфигурацию со значениями по умолчанию при первом вызове
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Инициализировать глобальную конфигурацию со значениями по умолчанию
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::default())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию из переменных окружения
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_from_env() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::from_env())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию с кастомным экземпляром
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_with(config: Config) -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| "Config already initialized")
    }

    /// Проверить, инициализирована ли глобальная конфигурация
    pub fn is_initialized() -> bool {
        GLOBAL_CONFIG.get().is_some()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|val| val.parse().ok())
}
