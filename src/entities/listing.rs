// 🏷️ Listing Entity - an item offered for sale at a fixed coin price
//
// Lifecycle: active → sold (only inside a purchase) or active → cancelled.
// Terminal listings keep their row; status is the record of what happened.

use crate::db::{format_timestamp, parse_timestamp};
use crate::error::{ExchangeError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

// ============================================================================
// LISTING STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Sold,
    Cancelled,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Sold => "sold",
            ListingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(ListingStatus::Active),
            "sold" => Some(ListingStatus::Sold),
            "cancelled" => Some(ListingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ListingStatus::Active)
    }
}

// ============================================================================
// LISTING ENTITY
// ============================================================================

/// Descriptive fields of a listing (what is being sold)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingMetadata {
    /// e.g. "AK-47 | Redline"
    pub item_name: String,
    /// e.g. "Field-Tested"
    pub quality: String,
    /// Steam link, or a free-form description when there is none
    pub external_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// A validated, not yet persisted listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub price: i64,
    #[serde(flatten)]
    pub metadata: ListingMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub owner_id: i64,
    pub price: i64,
    pub status: ListingStatus,
    #[serde(flatten)]
    pub metadata: ListingMetadata,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(3)?;
        let created_at: String = row.get(11)?;

        Ok(Listing {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            price: row.get(2)?,
            status: ListingStatus::parse(&status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("unknown listing status: {}", status).into(),
                )
            })?,
            metadata: ListingMetadata {
                item_name: row.get(4)?,
                quality: row.get(5)?,
                external_link: row.get(6)?,
                image_url: row.get(7)?,
                float_value: row.get(8)?,
                pattern: row.get(9)?,
            },
            view_count: row.get(10)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

const LISTING_COLUMNS: &str = "l.id, l.owner_id, l.price, l.status, l.item_name, l.quality,
    l.external_link, l.image_url, l.float_value, l.pattern, l.view_count, l.created_at";

/// Listing joined with what a buyer sees about the seller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingCard {
    #[serde(flatten)]
    pub listing: Listing,
    pub seller_name: String,
    pub seller_rating: f64,
}

// ============================================================================
// LISTING STORE
// ============================================================================

pub struct ListingStore<'c> {
    conn: &'c Connection,
}

impl<'c> ListingStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        ListingStore { conn }
    }

    pub fn create(
        &self,
        owner_id: i64,
        price: i64,
        metadata: &ListingMetadata,
        now: DateTime<Utc>,
    ) -> Result<Listing> {
        if price <= 0 {
            return Err(ExchangeError::InvalidPrice { price });
        }

        self.conn.execute(
            "INSERT INTO listings (
                owner_id, price, status, item_name, quality, external_link,
                image_url, float_value, pattern, created_at
            ) VALUES (?1, ?2, 'active', ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                owner_id,
                price,
                metadata.item_name,
                metadata.quality,
                metadata.external_link,
                metadata.image_url,
                metadata.float_value,
                metadata.pattern,
                format_timestamp(now),
            ],
        )?;

        self.require(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<Option<Listing>> {
        let listing = self
            .conn
            .query_row(
                &format!("SELECT {} FROM listings l WHERE l.id = ?1", LISTING_COLUMNS),
                [id],
                Listing::from_row,
            )
            .optional()?;
        Ok(listing)
    }

    pub fn require(&self, id: i64) -> Result<Listing> {
        self.get(id)?.ok_or(ExchangeError::NotFound {
            entity: "listing",
            id,
        })
    }

    /// Active listings, newest first; restart a scan by passing the next offset
    pub fn list_active(&self, limit: usize, offset: usize) -> Result<Vec<Listing>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM listings l
             WHERE l.status = 'active'
             ORDER BY l.created_at DESC, l.id DESC
             LIMIT ?1 OFFSET ?2",
            LISTING_COLUMNS
        ))?;

        let listings = stmt
            .query_map(params![limit as i64, offset as i64], Listing::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(listings)
    }

    pub fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Listing>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM listings l
             WHERE l.owner_id = ?1
             ORDER BY l.created_at DESC, l.id DESC",
            LISTING_COLUMNS
        ))?;

        let listings = stmt
            .query_map([owner_id], Listing::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(listings)
    }

    /// Every listing in any status, newest first (admin views)
    pub fn all(&self) -> Result<Vec<Listing>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM listings l ORDER BY l.created_at DESC, l.id DESC",
            LISTING_COLUMNS
        ))?;

        let listings = stmt
            .query_map([], Listing::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(listings)
    }

    pub fn card(&self, id: i64) -> Result<Option<ListingCard>> {
        let card = self
            .conn
            .query_row(
                &format!(
                    "SELECT {}, a.display_name, a.rating
                     FROM listings l
                     JOIN accounts a ON a.id = l.owner_id
                     WHERE l.id = ?1",
                    LISTING_COLUMNS
                ),
                [id],
                |row| {
                    Ok(ListingCard {
                        listing: Listing::from_row(row)?,
                        seller_name: row.get(12)?,
                        seller_rating: row.get(13)?,
                    })
                },
            )
            .optional()?;
        Ok(card)
    }

    /// Atomic active → sold; exactly one of several racing callers succeeds
    pub fn mark_sold(&self, id: i64) -> Result<Listing> {
        self.transition(id, ListingStatus::Sold, "sell")
    }

    /// Owner-only active → cancelled
    pub fn cancel(&self, id: i64, owner_id: i64) -> Result<Listing> {
        let listing = self.require(id)?;
        if listing.owner_id != owner_id {
            return Err(ExchangeError::NotOwner {
                account_id: owner_id,
                listing_id: id,
            });
        }
        self.transition(id, ListingStatus::Cancelled, "cancel")
    }

    fn transition(&self, id: i64, to: ListingStatus, action: &'static str) -> Result<Listing> {
        let changed = self.conn.execute(
            "UPDATE listings SET status = ?1 WHERE id = ?2 AND status = 'active'",
            params![to.as_str(), id],
        )?;

        let listing = self.require(id)?;
        if changed == 0 {
            return Err(ExchangeError::InvalidState {
                entity: "listing",
                id,
                status: listing.status.as_str().to_string(),
                action,
            });
        }
        Ok(listing)
    }

    /// Best-effort view counter; a missing listing is not an error
    pub fn increment_views(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE listings SET view_count = view_count + 1 WHERE id = ?1",
            [id],
        )?;
        Ok(changed > 0)
    }

    pub fn count_active(&self) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM listings WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::entities::AccountStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn skin(name: &str) -> ListingMetadata {
        ListingMetadata {
            item_name: name.to_string(),
            quality: "Field-Tested".to_string(),
            external_link: "https://steamcommunity.com/id/seller/inventory".to_string(),
            ..ListingMetadata::default()
        }
    }

    fn setup(conn: &Connection) {
        AccountStore::new(conn)
            .insert(1, "Seller", 0, None, t0())
            .unwrap();
    }

    #[test]
    fn test_create_listing() {
        let conn = open_in_memory().unwrap();
        setup(&conn);
        let store = ListingStore::new(&conn);

        let listing = store.create(1, 1500, &skin("AK-47 | Redline"), t0()).unwrap();

        assert_eq!(listing.owner_id, 1);
        assert_eq!(listing.price, 1500);
        assert_eq!(listing.status, ListingStatus::Active);
        assert_eq!(listing.view_count, 0);
        assert_eq!(listing.metadata.item_name, "AK-47 | Redline");
        assert_eq!(listing.created_at, t0());
    }

    #[test]
    fn test_create_rejects_non_positive_price() {
        let conn = open_in_memory().unwrap();
        setup(&conn);
        let store = ListingStore::new(&conn);

        for price in [0, -5] {
            let err = store.create(1, price, &skin("AWP"), t0()).unwrap_err();
            assert!(matches!(err, ExchangeError::InvalidPrice { .. }));
        }
        assert_eq!(store.count_active().unwrap(), 0);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let conn = open_in_memory().unwrap();
        setup(&conn);
        let store = ListingStore::new(&conn);

        let a = store.create(1, 10, &skin("A"), t0()).unwrap();
        let b = store.create(1, 10, &skin("B"), t0()).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn test_list_active_newest_first_with_offset() {
        let conn = open_in_memory().unwrap();
        setup(&conn);
        let store = ListingStore::new(&conn);

        for i in 0..5 {
            store
                .create(1, 10 + i, &skin(&format!("Skin {}", i)), t0() + Duration::minutes(i))
                .unwrap();
        }

        let first = store.list_active(2, 0).unwrap();
        let names: Vec<_> = first.iter().map(|l| l.metadata.item_name.as_str()).collect();
        assert_eq!(names, vec!["Skin 4", "Skin 3"]);

        let rest = store.list_active(10, 2).unwrap();
        let names: Vec<_> = rest.iter().map(|l| l.metadata.item_name.as_str()).collect();
        assert_eq!(names, vec!["Skin 2", "Skin 1", "Skin 0"]);

        assert!(store.list_active(10, 5).unwrap().is_empty());
    }

    #[test]
    fn test_list_active_skips_terminal_listings() {
        let conn = open_in_memory().unwrap();
        setup(&conn);
        let store = ListingStore::new(&conn);

        let sold = store.create(1, 10, &skin("Sold"), t0()).unwrap();
        let cancelled = store.create(1, 10, &skin("Cancelled"), t0()).unwrap();
        store.create(1, 10, &skin("Active"), t0()).unwrap();

        store.mark_sold(sold.id).unwrap();
        store.cancel(cancelled.id, 1).unwrap();

        let active = store.list_active(10, 0).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].metadata.item_name, "Active");
        assert_eq!(store.count_active().unwrap(), 1);
    }

    #[test]
    fn test_mark_sold_only_once() {
        let conn = open_in_memory().unwrap();
        setup(&conn);
        let store = ListingStore::new(&conn);
        let listing = store.create(1, 10, &skin("AWP"), t0()).unwrap();

        let sold = store.mark_sold(listing.id).unwrap();
        assert_eq!(sold.status, ListingStatus::Sold);

        let err = store.mark_sold(listing.id).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidState { ref status, .. } if status == "sold"));

        let err = store.mark_sold(999).unwrap_err();
        assert!(matches!(err, ExchangeError::NotFound { id: 999, .. }));
    }

    #[test]
    fn test_cancel_requires_owner_and_active() {
        let conn = open_in_memory().unwrap();
        setup(&conn);
        let store = ListingStore::new(&conn);
        let listing = store.create(1, 10, &skin("AWP"), t0()).unwrap();

        let err = store.cancel(listing.id, 2).unwrap_err();
        assert!(matches!(err, ExchangeError::NotOwner { .. }));

        let cancelled = store.cancel(listing.id, 1).unwrap();
        assert_eq!(cancelled.status, ListingStatus::Cancelled);

        // Terminal: cannot be sold afterwards, price untouched
        assert!(store.mark_sold(listing.id).is_err());
        assert_eq!(store.require(listing.id).unwrap().price, 10);
    }

    #[test]
    fn test_increment_views_is_best_effort() {
        let conn = open_in_memory().unwrap();
        setup(&conn);
        let store = ListingStore::new(&conn);
        let listing = store.create(1, 10, &skin("AWP"), t0()).unwrap();

        assert!(store.increment_views(listing.id).unwrap());
        assert!(store.increment_views(listing.id).unwrap());
        assert!(!store.increment_views(999).unwrap());
        assert_eq!(store.require(listing.id).unwrap().view_count, 2);
    }

    #[test]
    fn test_card_joins_seller() {
        let conn = open_in_memory().unwrap();
        setup(&conn);
        let store = ListingStore::new(&conn);
        let listing = store.create(1, 10, &skin("AWP"), t0()).unwrap();

        let card = store.card(listing.id).unwrap().unwrap();
        assert_eq!(card.seller_name, "Seller");
        assert_eq!(card.seller_rating, 5.0);
        assert_eq!(card.listing, listing);
        assert!(store.card(999).unwrap().is_none());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [ListingStatus::Active, ListingStatus::Sold, ListingStatus::Cancelled] {
            assert_eq!(ListingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ListingStatus::parse("deleted"), None);
        assert!(ListingStatus::Sold.is_terminal());
        assert!(!ListingStatus::Active.is_terminal());
    }
}
