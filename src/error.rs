use thiserror::Error;

/// Errors raised by the promo pool (allocation, validation, redemption).
#[derive(Error, Debug)]
pub enum PromoError {
    #[error("Invalid promo code")]
    InvalidPromoCode,

    #[error("Target code count must be positive, got {0}")]
    InvalidTarget(i64),

    #[error("Could not mint a unique promo code after {attempts} attempts")]
    MintCollision { attempts: u32 },

    #[error("Invalid code generator settings: {0}")]
    InvalidCodeSettings(String),

    #[error("Random number generator failure")]
    Random,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PromoError {
    /// True for rejections caused by caller input rather than a system fault.
    pub fn is_user_error(&self) -> bool {
        matches!(self, PromoError::InvalidPromoCode | PromoError::InvalidTarget(_))
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Promo pool error: {0}")]
    Promo(#[from] PromoError),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<tokio_cron_scheduler::JobSchedulerError> for AppError {
    fn from(e: tokio_cron_scheduler::JobSchedulerError) -> Self {
        AppError::Scheduler(format!("{:?}", e))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(fail: bool) -> Result<u64> {
        if fail {
            return Err(PromoError::MintCollision { attempts: 5 }.into());
        }
        Ok(10)
    }

    #[test]
    fn test_promo_errors_surface_through_app_error() {
        let err = seed(true).unwrap_err();
        assert!(matches!(
            err,
            AppError::Promo(PromoError::MintCollision { attempts: 5 })
        ));
        assert_eq!(
            err.to_string(),
            "Promo pool error: Could not mint a unique promo code after 5 attempts"
        );
        assert_eq!(seed(false).unwrap(), 10);
    }

    #[test]
    fn test_user_errors_are_distinguished_from_faults() {
        assert!(PromoError::InvalidPromoCode.is_user_error());
        assert!(PromoError::InvalidTarget(0).is_user_error());
        assert!(!PromoError::MintCollision { attempts: 5 }.is_user_error());
        assert!(!PromoError::Database(sqlx::Error::RowNotFound).is_user_error());
    }

    #[test]
    fn test_config_errors_are_wrapped() {
        let err: AppError = config::ConfigError::Message("sweep_target too low".to_string()).into();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains("sweep_target too low"));
    }
}
