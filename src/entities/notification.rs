// 🔔 Notification Entity - async messages waiting for a user

use crate::db::{format_timestamp, parse_timestamp};
use crate::error::{ExchangeError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let data: String = row.get(5)?;
        let created_at: String = row.get(7)?;

        Ok(Notification {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            title: row.get(3)?,
            message: row.get(4)?,
            data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
            is_read: row.get(6)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

pub struct NotificationStore<'c> {
    conn: &'c Connection,
}

impl<'c> NotificationStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        NotificationStore { conn }
    }

    pub fn push(
        &self,
        user_id: i64,
        kind: &str,
        title: &str,
        message: &str,
        data: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO notifications (user_id, kind, title, message, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                kind,
                title,
                message,
                serde_json::to_string(data)?,
                format_timestamp(now),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Unread notifications, oldest first (delivery order)
    pub fn unread(&self, user_id: i64) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, kind, title, message, data, is_read, created_at
             FROM notifications
             WHERE user_id = ?1 AND is_read = 0
             ORDER BY id",
        )?;

        let rows = stmt
            .query_map([user_id], Notification::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Someone else's notification looks the same as a missing one
    pub fn mark_read(&self, id: i64, user_id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if changed == 0 {
            return Err(ExchangeError::NotFound {
                entity: "notification",
                id,
            });
        }
        Ok(())
    }
}
