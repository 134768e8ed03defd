// ⚙️ Exchange configuration - one explicit context object, no global state
//
// Economy constants (bonuses, VIP price) and bot settings live here and are
// handed to `Exchange::open` / the server. Nothing is set after startup.

use chrono::{DateTime, Utc};
use std::env;
use std::path::PathBuf;

/// Typed configuration for the exchange and its surfaces
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    // ========================================================================
    // STORAGE
    // ========================================================================
    pub db_path: PathBuf,

    // ========================================================================
    // ECONOMY (coins)
    // ========================================================================
    /// Credited to every new account
    pub start_bonus: i64,
    /// Credited to the referrer when a new account names them
    pub referral_bonus: i64,
    /// Price of one VIP period
    pub vip_price: i64,
    /// Length of one VIP period
    pub vip_days: i64,

    // ========================================================================
    // BOT / SURFACES
    // ========================================================================
    pub bot_token: Option<String>,
    pub bot_username: String,
    pub website_url: Option<String>,
    pub vip_chat_link: Option<String>,
    pub admin_ids: Vec<i64>,
    pub server_addr: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            db_path: PathBuf::from("skin_exchange.db"),
            start_bonus: 100,
            referral_bonus: 50,
            vip_price: 550,
            vip_days: 30,
            bot_token: None,
            bot_username: "shizogp_bot".to_string(),
            website_url: None,
            vip_chat_link: None,
            admin_ids: Vec::new(),
            server_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl ExchangeConfig {
    /// Load from the environment (and `.env` if present), falling back to defaults
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let defaults = ExchangeConfig::default();

        ExchangeConfig {
            db_path: env_str("SKIN_EXCHANGE_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            start_bonus: env_i64("START_BONUS").unwrap_or(defaults.start_bonus),
            referral_bonus: env_i64("REFERRAL_BONUS").unwrap_or(defaults.referral_bonus),
            vip_price: env_i64("VIP_PRICE").unwrap_or(defaults.vip_price),
            vip_days: env_i64("VIP_DAYS").unwrap_or(defaults.vip_days),
            bot_token: env_str("BOT_TOKEN"),
            bot_username: env_str("BOT_USERNAME").unwrap_or(defaults.bot_username),
            website_url: env_str("WEBSITE_URL"),
            vip_chat_link: env_str("VIP_CHAT_LINK"),
            admin_ids: parse_id_list(env_str("ADMIN_IDS").as_deref().unwrap_or("")),
            server_addr: env_str("SERVER_ADDR").unwrap_or(defaults.server_addr),
        }
    }

    pub fn is_configured_admin(&self, account_id: i64) -> bool {
        self.admin_ids.contains(&account_id)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|v| v.parse().ok())
}

/// Parse "1, 2,3" into ids, skipping anything that is not a number
pub fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

// ============================================================================
// CLOCK
// ============================================================================

/// Source of timestamps for the exchange
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant (tests, replays)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
