// src/error.rs
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

/// Failures of the market data provider.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("Market data request failed: {message}")]
    UpstreamRequestFailed {
        message: String,
        status: Option<u16>,
    },

    #[error("Invalid currency symbol: {0}")]
    InvalidSymbol(String),

    #[error("Currency not found for symbol: {0}")]
    CurrencyNotFound(String),
}

impl MarketError {
    pub fn upstream(message: impl Into<String>) -> Self {
        MarketError::UpstreamRequestFailed {
            message: message.into(),
            status: None,
        }
    }
}

impl From<reqwest::Error> for MarketError {
    fn from(e: reqwest::Error) -> Self {
        MarketError::UpstreamRequestFailed {
            message: e.to_string(),
            status: e.status().map(|s| s.as_u16()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Malformed row in {table}: {reason}")]
    Decode { table: &'static str, reason: String },

    #[error("Conflicting write: {0}")]
    Conflict(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Market(#[from] MarketError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Invalid input.")]
    InvalidInput,

    #[error("User not found: {0}")]
    UserNotFound(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Market(MarketError::InvalidSymbol(_)) => StatusCode::BAD_REQUEST,
            AppError::Market(MarketError::CurrencyNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::InvalidInput => StatusCode::BAD_REQUEST,
            AppError::Market(MarketError::UpstreamRequestFailed { .. })
            | AppError::Db(_)
            | AppError::UserNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Reject for AppError {}
