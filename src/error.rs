// ⚠️ Exchange errors - every business outcome has a stable, machine-checkable kind
//
// Expected outcomes (insufficient funds, sold listing, ...) are values, not
// faults. Only storage failures are "unexpected" and they pass through as-is.

use thiserror::Error;

/// Errors returned by every store, engine and aggregator operation
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("listing not found: {listing_id}")]
    ListingNotFound { listing_id: i64 },

    #[error("listing {listing_id} is no longer available ({status})")]
    ListingUnavailable { listing_id: i64, status: String },

    #[error("{entity} {id} is {status}, cannot {action}")]
    InvalidState {
        entity: &'static str,
        id: i64,
        status: String,
        action: &'static str,
    },

    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: i64, required: i64 },

    #[error("balance {balance} cannot change by {delta}: amount out of range")]
    AmountOutOfRange { balance: i64, delta: i64 },

    #[error("invalid VIP duration: {days} days")]
    InvalidDuration { days: i64 },

    #[error("invalid price: {price} (must be a positive integer)")]
    InvalidPrice { price: i64 },

    #[error("invalid rating: {rating} (must be between 1 and 5)")]
    InvalidRating { rating: i64 },

    #[error("account {account_id} cannot buy its own listing {listing_id}")]
    SelfPurchase { account_id: i64, listing_id: i64 },

    #[error("account {author_id} already reviewed transaction {transaction_id}")]
    DuplicateReview { author_id: i64, transaction_id: i64 },

    #[error("account {account_id} is not a party to transaction {transaction_id}")]
    NotParty { account_id: i64, transaction_id: i64 },

    #[error("account {account_id} does not own listing {listing_id}")]
    NotOwner { account_id: i64, listing_id: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Stable error kind, for presentation layers that localize messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ListingNotFound,
    ListingUnavailable,
    InvalidState,
    InsufficientFunds,
    AmountOutOfRange,
    InvalidDuration,
    InvalidPrice,
    InvalidRating,
    SelfPurchase,
    DuplicateReview,
    NotParty,
    NotOwner,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ListingNotFound => "listing_not_found",
            ErrorKind::ListingUnavailable => "listing_unavailable",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::AmountOutOfRange => "amount_out_of_range",
            ErrorKind::InvalidDuration => "invalid_duration",
            ErrorKind::InvalidPrice => "invalid_price",
            ErrorKind::InvalidRating => "invalid_rating",
            ErrorKind::SelfPurchase => "self_purchase",
            ErrorKind::DuplicateReview => "duplicate_review",
            ErrorKind::NotParty => "not_party",
            ErrorKind::NotOwner => "not_owner",
            ErrorKind::Storage => "storage",
        }
    }

    /// Storage failures are the only kind that is not an expected business outcome
    pub fn is_business(&self) -> bool {
        !matches!(self, ErrorKind::Storage)
    }
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::NotFound { .. } => ErrorKind::NotFound,
            ExchangeError::ListingNotFound { .. } => ErrorKind::ListingNotFound,
            ExchangeError::ListingUnavailable { .. } => ErrorKind::ListingUnavailable,
            ExchangeError::InvalidState { .. } => ErrorKind::InvalidState,
            ExchangeError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            ExchangeError::AmountOutOfRange { .. } => ErrorKind::AmountOutOfRange,
            ExchangeError::InvalidDuration { .. } => ErrorKind::InvalidDuration,
            ExchangeError::InvalidPrice { .. } => ErrorKind::InvalidPrice,
            ExchangeError::InvalidRating { .. } => ErrorKind::InvalidRating,
            ExchangeError::SelfPurchase { .. } => ErrorKind::SelfPurchase,
            ExchangeError::DuplicateReview { .. } => ErrorKind::DuplicateReview,
            ExchangeError::NotParty { .. } => ErrorKind::NotParty,
            ExchangeError::NotOwner { .. } => ErrorKind::NotOwner,
            ExchangeError::Storage(_) | ExchangeError::Serialization(_) => ErrorKind::Storage,
        }
    }
}
