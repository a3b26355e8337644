// Время

/// Unix timestamp в миллисекундах
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// ISO8601 для отчётов
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
