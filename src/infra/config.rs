use env_helpers::{get_env, get_env_default};

pub struct AppConfig {
    pub database_url: String,
    /// Total gateway attempts allowed per payment before it fails terminally.
    pub max_payment_retries: i32,
    /// Hours between a failed attempt and its scheduled retry. Persisted on
    /// the payment row, so the schedule survives restarts.
    pub retry_delay_hours: i64,
    /// How often the retry sweep polls for due payments.
    pub retry_poll_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url: String = get_env("DATABASE_URL");
        let max_payment_retries: i32 = get_env_default("MAX_PAYMENT_RETRIES", 3);
        let retry_delay_hours: i64 = get_env_default("RETRY_DELAY_HOURS", 24);
        let retry_poll_interval_secs: u64 = get_env_default("RETRY_POLL_INTERVAL_SECS", 300);

        Self {
            database_url,
            max_payment_retries,
            retry_delay_hours,
            retry_poll_interval_secs,
        }
    }
}
