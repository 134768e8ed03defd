// 🤝 Transaction Entity - the record of one sold listing
//
// Created atomically with the listing's active → sold transition. The amount
// is the price captured at sale time; status only ever moves forward.

use crate::db::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use crate::error::{ExchangeError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Disputed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Disputed => "disputed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "disputed" => Some(TransactionStatus::Disputed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TransactionStatus::Pending => 0,
            TransactionStatus::Completed => 1,
            TransactionStatus::Disputed => 2,
        }
    }

    /// Status advances only forward
    pub fn can_advance_to(&self, next: TransactionStatus) -> bool {
        next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub amount: i64,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn involves(&self, account_id: i64) -> bool {
        self.buyer_id == account_id || self.seller_id == account_id
    }

    /// The other side of the deal, if `account_id` is a party
    pub fn counterparty(&self, account_id: i64) -> Option<i64> {
        if account_id == self.buyer_id {
            Some(self.seller_id)
        } else if account_id == self.seller_id {
            Some(self.buyer_id)
        } else {
            None
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(5)?;
        let created_at: String = row.get(6)?;

        Ok(Transaction {
            id: row.get(0)?,
            listing_id: row.get(1)?,
            buyer_id: row.get(2)?,
            seller_id: row.get(3)?,
            amount: row.get(4)?,
            status: TransactionStatus::parse(&status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    format!("unknown transaction status: {}", status).into(),
                )
            })?,
            created_at: parse_timestamp(&created_at)?,
            completed_at: parse_optional_timestamp(row.get(7)?)?,
        })
    }
}

const TRANSACTION_COLUMNS: &str =
    "id, listing_id, buyer_id, seller_id, amount, status, created_at, completed_at";

pub struct TransactionLog<'c> {
    conn: &'c Connection,
}

impl<'c> TransactionLog<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        TransactionLog { conn }
    }

    pub fn insert(
        &self,
        listing_id: i64,
        buyer_id: i64,
        seller_id: i64,
        amount: i64,
        status: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let completed_at = match status {
            TransactionStatus::Pending => None,
            _ => Some(format_timestamp(now)),
        };

        self.conn.execute(
            "INSERT INTO transactions (
                listing_id, buyer_id, seller_id, amount, status, created_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                listing_id,
                buyer_id,
                seller_id,
                amount,
                status.as_str(),
                format_timestamp(now),
                completed_at,
            ],
        )?;

        self.require(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<Option<Transaction>> {
        let tx = self
            .conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLUMNS),
                [id],
                Transaction::from_row,
            )
            .optional()?;
        Ok(tx)
    }

    pub fn require(&self, id: i64) -> Result<Transaction> {
        self.get(id)?.ok_or(ExchangeError::NotFound {
            entity: "transaction",
            id,
        })
    }

    /// Move to a later status; completing stamps `completed_at`
    pub fn advance(&self, id: i64, next: TransactionStatus, now: DateTime<Utc>) -> Result<Transaction> {
        let current = self.require(id)?;
        if !current.status.can_advance_to(next) {
            return Err(ExchangeError::InvalidState {
                entity: "transaction",
                id,
                status: current.status.as_str().to_string(),
                action: "advance",
            });
        }

        self.conn.execute(
            "UPDATE transactions
             SET status = ?1,
                 completed_at = CASE WHEN ?1 = 'completed' THEN ?2 ELSE completed_at END
             WHERE id = ?3 AND status = ?4",
            params![next.as_str(), format_timestamp(now), id, current.status.as_str()],
        )?;

        self.require(id)
    }

    /// Transactions where the account was buyer or seller, newest first
    pub fn for_account(&self, account_id: i64) -> Result<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE buyer_id = ?1 OR seller_id = ?1
             ORDER BY created_at DESC, id DESC",
            TRANSACTION_COLUMNS
        ))?;

        let rows = stmt
            .query_map([account_id], Transaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Full ledger, oldest first
    pub fn all(&self) -> Result<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM transactions ORDER BY id",
            TRANSACTION_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], Transaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }
}
