// 💳 Account Entity - coin balance, rating and VIP state of one chat user
//
// Identity is the chat user id (never changes). Balance, rating and VIP
// expiry are values mutated only through AccountStore, inside the caller's
// storage transaction.

use crate::db::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use crate::error::{ExchangeError, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

// ============================================================================
// ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identity (chat user id)
    pub id: i64,

    pub display_name: String,

    /// Chat handle without the '@', when the user has one
    pub username: Option<String>,

    /// Coin balance, never negative
    pub balance: i64,

    /// Mean of all received review ratings (5.0 until the first review)
    pub rating: f64,
    pub rating_count: i64,

    pub vip_until: Option<DateTime<Utc>>,

    /// Back-reference to the account that referred this one
    pub referrer_id: Option<i64>,

    pub total_sales: i64,
    pub total_purchases: i64,
    pub is_admin: bool,
    pub registered_at: DateTime<Utc>,
}

impl Account {
    /// VIP is active while the expiry lies in the future
    pub fn is_vip(&self, now: DateTime<Utc>) -> bool {
        self.vip_until.map_or(false, |until| until > now)
    }

    pub fn can_afford(&self, price: i64) -> bool {
        self.balance >= price
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let vip_until: Option<String> = row.get(6)?;
        let registered_at: String = row.get(11)?;

        Ok(Account {
            id: row.get(0)?,
            display_name: row.get(1)?,
            username: row.get(2)?,
            balance: row.get(3)?,
            rating: row.get(4)?,
            rating_count: row.get(5)?,
            vip_until: parse_optional_timestamp(vip_until)?,
            referrer_id: row.get(7)?,
            total_sales: row.get(8)?,
            total_purchases: row.get(9)?,
            is_admin: row.get(10)?,
            registered_at: parse_timestamp(&registered_at)?,
        })
    }
}

/// Last year a stored RFC 3339 timestamp can hold
const MAX_VIP_YEAR: i32 = 9999;

const ACCOUNT_COLUMNS: &str = "id, display_name, username, balance, rating, rating_count, vip_until,
    referrer_id, total_sales, total_purchases, is_admin, registered_at";

// ============================================================================
// ACCOUNT STORE
// ============================================================================

/// Account relation over a connection (usually an open IMMEDIATE transaction)
///
/// Status and counter mutations are single guarded UPDATEs. Balance and VIP
/// changes read the row first and do checked arithmetic in Rust, so they rely
/// on the caller's IMMEDIATE transaction for isolation.
pub struct AccountStore<'c> {
    conn: &'c Connection,
}

impl<'c> AccountStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        AccountStore { conn }
    }

    pub fn get(&self, id: i64) -> Result<Option<Account>> {
        let account = self
            .conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
                [id],
                Account::from_row,
            )
            .optional()?;
        Ok(account)
    }

    pub fn require(&self, id: i64) -> Result<Account> {
        self.get(id)?.ok_or(ExchangeError::NotFound {
            entity: "account",
            id,
        })
    }

    pub fn exists(&self, id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM accounts WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a fresh account; the caller has already checked it does not exist
    pub fn insert(
        &self,
        id: i64,
        display_name: &str,
        starting_balance: i64,
        referrer_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        self.conn.execute(
            "INSERT INTO accounts (id, display_name, balance, referrer_id, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, display_name, starting_balance, referrer_id, format_timestamp(now)],
        )?;
        self.require(id)
    }

    /// Apply `delta` to the balance; refuses to go below zero or past i64
    pub fn adjust_balance(&self, id: i64, delta: i64) -> Result<Account> {
        let account = self.require(id)?;

        let balance = match account.balance.checked_add(delta) {
            Some(b) if b >= 0 => b,
            None if delta > 0 => {
                return Err(ExchangeError::AmountOutOfRange {
                    balance: account.balance,
                    delta,
                })
            }
            _ => {
                return Err(ExchangeError::InsufficientFunds {
                    available: account.balance,
                    required: delta.saturating_neg(),
                })
            }
        };

        self.conn.execute(
            "UPDATE accounts SET balance = ?1 WHERE id = ?2",
            params![balance, id],
        )?;

        self.require(id)
    }

    /// Overwrite mean and count together in one statement
    pub fn set_rating(&self, id: i64, mean: f64, count: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE accounts SET rating = ?1, rating_count = ?2 WHERE id = ?3",
            params![mean, count, id],
        )?;
        if changed == 0 {
            return Err(ExchangeError::NotFound {
                entity: "account",
                id,
            });
        }
        Ok(())
    }

    /// Extend VIP by `days`, starting from the later of `now` and the current expiry
    ///
    /// `days` must be positive and the new expiry must stay within year 9999
    /// (the stored timestamp format).
    pub fn grant_vip(&self, id: i64, days: i64, now: DateTime<Utc>) -> Result<Account> {
        let account = self.require(id)?;
        let invalid = || ExchangeError::InvalidDuration { days };

        if days <= 0 {
            return Err(invalid());
        }

        let base = match account.vip_until {
            Some(until) if until > now => until,
            _ => now,
        };
        let until = Duration::try_days(days)
            .and_then(|d| base.checked_add_signed(d))
            .filter(|t| t.year() <= MAX_VIP_YEAR)
            .ok_or_else(invalid)?;

        self.conn.execute(
            "UPDATE accounts SET vip_until = ?1 WHERE id = ?2",
            params![format_timestamp(until), id],
        )?;

        self.require(id)
    }

    /// Record the chat handle; `None` clears it
    pub fn set_username(&self, id: i64, username: Option<&str>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE accounts SET username = ?1 WHERE id = ?2",
            params![username, id],
        )?;
        if changed == 0 {
            return Err(ExchangeError::NotFound {
                entity: "account",
                id,
            });
        }
        Ok(())
    }

    pub fn set_admin(&self, id: i64, is_admin: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE accounts SET is_admin = ?1 WHERE id = ?2",
            params![is_admin, id],
        )?;
        if changed == 0 {
            return Err(ExchangeError::NotFound {
                entity: "account",
                id,
            });
        }
        Ok(())
    }

    /// Bump the trade counters after a completed purchase
    pub fn record_trade(&self, buyer_id: i64, seller_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE accounts SET total_purchases = total_purchases + 1 WHERE id = ?1",
            [buyer_id],
        )?;
        self.conn.execute(
            "UPDATE accounts SET total_sales = total_sales + 1 WHERE id = ?1",
            [seller_id],
        )?;
        Ok(())
    }

    pub fn count_referrals(&self, referrer_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE referrer_id = ?1",
            [referrer_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Sum of every balance (coins in circulation)
    pub fn total_balance(&self) -> Result<i64> {
        let total: Option<i64> =
            self.conn
                .query_row("SELECT SUM(balance) FROM accounts", [], |row| row.get(0))?;
        Ok(total.unwrap_or(0))
    }
}

// ============================================================================
// TESTS
// ============================================================================
