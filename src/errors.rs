use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("{venue}: {message}")]
    Venue { venue: String, message: String },

    #[error("Deposit addresses were not resolved at session start")]
    MissingDepositAddresses,

    #[error("{venue} has no transaction fee for {currency}")]
    MissingTransactionFee { venue: String, currency: String },

    #[error("Other: {0}")]
    Other(String),
}

impl AppError {
    pub fn venue(venue: &str, err: crate::exchange::VenueError) -> Self {
        AppError::Venue {
            venue: venue.to_string(),
            message: err.message,
        }
    }
}
