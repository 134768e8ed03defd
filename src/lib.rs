// Skin Exchange - Core Library
// Ledger & listing exchange behind the skin-trading bot: accounts, coin
// balances, listings, atomic purchases, reviews and referrals.
// Exposes all modules for use in CLI, API server, and tests

pub mod aggregator;
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod exchange;
pub mod logging;
pub mod sell_flow;
pub mod stats;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use aggregator::{parse_referral_payload, referral_link, AccountLinks, ReferralSummary};
pub use auth::{verify_init_data, TelegramUser};
pub use config::{Clock, ExchangeConfig, FixedClock, SystemClock};
pub use db::{
    export_transactions_csv, get_events_for_entity, insert_event, open_database, open_in_memory,
    setup_database, Event,
};
pub use entities::{
    Account, Listing, ListingCard, ListingDraft, ListingMetadata, ListingStatus, Notification,
    RatingSummary, Review, Transaction, TransactionStatus,
};
pub use error::{ErrorKind, ExchangeError, Result};
pub use exchange::Exchange;
pub use sell_flow::{SellForm, SellFormError, SellState, SellStep};
pub use stats::AdminStats;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
