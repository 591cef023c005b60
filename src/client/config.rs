use std::env;
use std::time::Duration;

/// Which realtime store the client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub database_url: String,
    pub settings_path: String,
    pub realtime_backend: RealtimeBackend,
    pub redis_url: String,
    pub log_level: String,
    pub phone_country_prefix: String,
    pub verification_timeout_secs: u64,
    pub min_password_length: usize,
    pub persist_incremental_updates: bool,
    pub contacts_path: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/chatty.db".to_string(),
            settings_path: "data/chatty_settings.json".to_string(),
            realtime_backend: RealtimeBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            log_level: "info".to_string(),
            phone_country_prefix: "+62".to_string(),
            verification_timeout_secs: 60,
            min_password_length: 6,
            persist_incremental_updates: false,
            contacts_path: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            database_url: env::var("CHATTY_DATABASE_URL").unwrap_or(defaults.database_url),
            settings_path: env::var("CHATTY_SETTINGS_PATH").unwrap_or(defaults.settings_path),
            realtime_backend: match env::var("REALTIME_BACKEND").as_deref() {
                Ok("redis") => RealtimeBackend::Redis,
                _ => RealtimeBackend::Memory,
            },
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            phone_country_prefix: env::var("PHONE_COUNTRY_PREFIX").unwrap_or(defaults.phone_country_prefix),
            verification_timeout_secs: env::var("VERIFICATION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.verification_timeout_secs),
            min_password_length: env::var("MIN_PASSWORD_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_password_length),
            persist_incremental_updates: env::var("PERSIST_INCREMENTAL_UPDATES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.persist_incremental_updates),
            contacts_path: env::var("CONTACTS_PATH").ok().filter(|p| !p.trim().is_empty()),
        }
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_secs)
    }
}
