// 📊 Admin Statistics - headline numbers for the admin panel

use crate::db::format_timestamp;
use crate::entities::{AccountStore, ListingStore, TransactionLog};
use crate::error::Result;
use crate::exchange::Exchange;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminStats {
    pub users: i64,
    /// Accounts whose VIP has not yet expired
    pub vip_users: i64,
    pub active_listings: i64,
    pub transactions: i64,
    /// Sum of all balances
    pub total_coins: i64,
}

impl Exchange {
    pub fn admin_stats(&self) -> Result<AdminStats> {
        let now = format_timestamp(self.clock().now());

        self.read(|conn| {
            let users: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
            let vip_users: i64 = conn.query_row(
                "SELECT COUNT(*) FROM accounts WHERE vip_until IS NOT NULL AND vip_until > ?1",
                [&now],
                |row| row.get(0),
            )?;

            Ok(AdminStats {
                users,
                vip_users,
                active_listings: ListingStore::new(conn).count_active()?,
                transactions: TransactionLog::new(conn).count()?,
                total_coins: AccountStore::new(conn).total_balance()?,
            })
        })
    }

    /// Admin by account flag or by the configured admin id list
    pub fn is_admin(&self, account_id: i64) -> Result<bool> {
        if self.config().is_configured_admin(account_id) {
            return Ok(true);
        }
        let account = self.get_account(account_id)?;
        Ok(account.map(|a| a.is_admin).unwrap_or(false))
    }
}
