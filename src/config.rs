use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    // Mail relay used to deliver promo notifications
    pub notifier_url: Option<String>,
    pub notifier_token: Option<Secret<String>>,
    pub notifier_timeout_secs: u64,

    // Allocation policy
    pub onboarding_target: i64,
    pub sweep_target: i64,

    // Periodic sweep
    pub sweep_interval_secs: u64,
    pub sweep_lock_ttl_secs: u64,
    pub sweep_batch_size: i64,
    pub sweep_send_email: bool,

    // Code minting
    pub code_length: usize,
    pub discount_min: i16,
    pub discount_max: i16,
    pub mint_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let settings = Self {
            database_url: config.get("database_url")?,

            notifier_url: config.get("notifier_url").ok(),
            notifier_token: config
                .get::<String>("notifier_token")
                .ok()
                .map(Secret::new),
            notifier_timeout_secs: config.get("notifier_timeout_secs").unwrap_or(10),

            onboarding_target: config.get("onboarding_target").unwrap_or(8),
            sweep_target: config.get("sweep_target").unwrap_or(10),

            sweep_interval_secs: config.get("sweep_interval_secs").unwrap_or(60),
            sweep_lock_ttl_secs: config.get("sweep_lock_ttl_secs").unwrap_or(50),
            sweep_batch_size: config.get("sweep_batch_size").unwrap_or(200),
            sweep_send_email: config.get("sweep_send_email").unwrap_or(true),

            code_length: config.get("code_length").unwrap_or(12),
            discount_min: config.get("discount_min").unwrap_or(10),
            discount_max: config.get("discount_max").unwrap_or(20),
            mint_max_attempts: config.get("mint_max_attempts").unwrap_or(5),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Rejects combinations the allocator cannot honour.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.onboarding_target <= 0 {
            return Err(config::ConfigError::Message(
                "onboarding_target must be positive".to_string(),
            ));
        }
        if self.sweep_target < self.onboarding_target {
            return Err(config::ConfigError::Message(format!(
                "sweep_target ({}) must be at least onboarding_target ({})",
                self.sweep_target, self.onboarding_target
            )));
        }
        if self.code_length == 0 {
            return Err(config::ConfigError::Message(
                "code_length must be positive".to_string(),
            ));
        }
        if self.discount_min < 1 || self.discount_max > 100 || self.discount_min > self.discount_max {
            return Err(config::ConfigError::Message(format!(
                "discount range {}..={} must lie within 1..=100",
                self.discount_min, self.discount_max
            )));
        }
        if self.sweep_batch_size <= 0 || self.mint_max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "sweep_batch_size and mint_max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn sweep_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.sweep_lock_ttl_secs)
    }

    pub fn notifier_timeout(&self) -> Duration {
        Duration::from_secs(self.notifier_timeout_secs)
    }
}
