// 🔁 Exchange Engine - the atomic purchase and the account/listing surface
//
// Every public operation runs as ONE storage transaction opened with
// BEGIN IMMEDIATE on a mutex-guarded connection:
// - the mutex serializes callers sharing this handle (threads, handlers)
// - IMMEDIATE takes SQLite's write lock up front, so handles in other
//   processes on the same file serialize too
// Any error drops the transaction, which rolls back every statement in it.

use crate::config::{Clock, ExchangeConfig, SystemClock};
use crate::db::{account_actor, insert_event, open_database, open_in_memory, Event};
use crate::entities::{
    Account, AccountStore, Listing, ListingCard, ListingDraft, ListingMetadata, ListingStore,
    Notification, NotificationStore, Transaction, TransactionLog, TransactionStatus,
};
use crate::error::{ExchangeError, Result};
use rusqlite::{Connection, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Shared handle to the exchange; cheap to clone, safe to share across threads
#[derive(Clone)]
pub struct Exchange {
    conn: Arc<Mutex<Connection>>,
    config: Arc<ExchangeConfig>,
    clock: Arc<dyn Clock>,
}

impl Exchange {
    /// Open the database named in the config (created on first use)
    pub fn open(config: ExchangeConfig) -> Result<Self> {
        let conn = open_database(&config.db_path)?;
        Ok(Self::from_connection(conn, config, Arc::new(SystemClock)))
    }

    /// Isolated in-memory exchange
    pub fn in_memory(config: ExchangeConfig) -> Result<Self> {
        Ok(Self::from_connection(open_in_memory()?, config, Arc::new(SystemClock)))
    }

    pub fn from_connection(conn: Connection, config: ExchangeConfig, clock: Arc<dyn Clock>) -> Self {
        Exchange {
            conn: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
            clock,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-operation already rolled its transaction back on drop
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` inside one IMMEDIATE transaction; commit only if it returns Ok
    pub(crate) fn atomically<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a read against the connection without opening a write transaction
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&conn)
    }

    // ========================================================================
    // ACCOUNT STORE
    // ========================================================================

    /// Idempotent registration; pays the starting and referral bonuses once
    pub fn get_or_create(&self, id: i64, display_name: &str, referrer: Option<i64>) -> Result<Account> {
        self.register(id, display_name, None, referrer)
    }

    /// Like `get_or_create`, also recording the chat handle. A known account
    /// keeps its display name but picks up a changed handle.
    pub fn register(
        &self,
        id: i64,
        display_name: &str,
        username: Option<&str>,
        referrer: Option<i64>,
    ) -> Result<Account> {
        let now = self.clock.now();
        let config = self.config.clone();

        self.atomically(|tx| {
            let accounts = AccountStore::new(tx);
            if let Some(existing) = accounts.get(id)? {
                return match username {
                    Some(handle) if existing.username.as_deref() != Some(handle) => {
                        accounts.set_username(id, Some(handle))?;
                        accounts.require(id)
                    }
                    _ => Ok(existing),
                };
            }

            // Self-referral and unknown referrers are ignored, never an error
            let referrer_id = match referrer.filter(|r| *r != id) {
                Some(r) if accounts.exists(r)? => Some(r),
                _ => None,
            };

            let mut account = accounts.insert(id, display_name, config.start_bonus, referrer_id, now)?;
            if username.is_some() {
                accounts.set_username(id, username)?;
                account = accounts.require(id)?;
            }

            if let Some(r) = referrer_id {
                accounts.adjust_balance(r, config.referral_bonus)?;
                insert_event(
                    tx,
                    &Event::new(
                        now,
                        "referral_bonus_paid",
                        "account",
                        r,
                        serde_json::json!({ "referred": id, "bonus": config.referral_bonus }),
                        "system",
                    ),
                )?;
            }

            insert_event(
                tx,
                &Event::new(
                    now,
                    "account_created",
                    "account",
                    id,
                    serde_json::json!({ "start_bonus": config.start_bonus, "referrer": referrer_id }),
                    &account_actor(id),
                ),
            )?;

            info!(account_id = id, referrer = ?referrer_id, "account created");
            Ok(account)
        })
    }

    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        self.read(|conn| AccountStore::new(conn).get(id))
    }

    /// Credit or debit; fails with InsufficientFunds rather than going negative
    pub fn adjust_balance(&self, id: i64, delta: i64) -> Result<Account> {
        let now = self.clock.now();
        self.atomically(|tx| {
            let account = AccountStore::new(tx).adjust_balance(id, delta)?;
            insert_event(
                tx,
                &Event::new(
                    now,
                    "balance_adjusted",
                    "account",
                    id,
                    serde_json::json!({ "delta": delta, "balance": account.balance }),
                    "system",
                ),
            )?;
            Ok(account)
        })
    }

    pub fn set_rating(&self, id: i64, mean: f64, count: i64) -> Result<()> {
        self.atomically(|tx| AccountStore::new(tx).set_rating(id, mean, count))
    }

    /// Extend VIP by `duration_days` from the later of now and the current expiry
    pub fn grant_vip(&self, id: i64, duration_days: i64) -> Result<Account> {
        let now = self.clock.now();
        self.atomically(|tx| {
            let account = AccountStore::new(tx).grant_vip(id, duration_days, now)?;
            insert_event(
                tx,
                &Event::new(
                    now,
                    "vip_granted",
                    "account",
                    id,
                    serde_json::json!({ "days": duration_days, "until": account.vip_until }),
                    "system",
                ),
            )?;
            info!(account_id = id, days = duration_days, "vip granted");
            Ok(account)
        })
    }

    /// Pay the configured VIP price for one VIP period, all or nothing
    pub fn buy_vip(&self, id: i64) -> Result<Account> {
        let now = self.clock.now();
        let price = self.config.vip_price;
        let days = self.config.vip_days;

        self.atomically(|tx| {
            let accounts = AccountStore::new(tx);
            accounts.adjust_balance(id, -price)?;
            let account = accounts.grant_vip(id, days, now)?;
            insert_event(
                tx,
                &Event::new(
                    now,
                    "vip_purchased",
                    "account",
                    id,
                    serde_json::json!({ "price": price, "days": days, "until": account.vip_until }),
                    &account_actor(id),
                ),
            )?;
            info!(account_id = id, price, days, "vip purchased");
            Ok(account)
        })
    }

    pub fn set_admin(&self, id: i64, is_admin: bool) -> Result<()> {
        self.atomically(|tx| AccountStore::new(tx).set_admin(id, is_admin))
    }

    // ========================================================================
    // LISTING STORE
    // ========================================================================

    pub fn create_listing(&self, owner_id: i64, price: i64, metadata: &ListingMetadata) -> Result<Listing> {
        let now = self.clock.now();
        self.atomically(|tx| {
            AccountStore::new(tx).require(owner_id)?;
            let listing = ListingStore::new(tx).create(owner_id, price, metadata, now)?;
            insert_event(
                tx,
                &Event::new(
                    now,
                    "listing_created",
                    "listing",
                    listing.id,
                    serde_json::json!({ "price": price, "item": metadata.item_name }),
                    &account_actor(owner_id),
                ),
            )?;
            info!(listing_id = listing.id, owner_id, price, "listing created");
            Ok(listing)
        })
    }

    /// Persist a completed sell form
    pub fn publish_draft(&self, owner_id: i64, draft: &ListingDraft) -> Result<Listing> {
        self.create_listing(owner_id, draft.price, &draft.metadata)
    }

    pub fn list_active(&self, limit: usize, offset: usize) -> Result<Vec<Listing>> {
        self.read(|conn| ListingStore::new(conn).list_active(limit, offset))
    }

    pub fn listings_by_owner(&self, owner_id: i64) -> Result<Vec<Listing>> {
        self.read(|conn| ListingStore::new(conn).list_by_owner(owner_id))
    }

    pub fn all_listings(&self) -> Result<Vec<Listing>> {
        self.read(|conn| ListingStore::new(conn).all())
    }

    pub fn get_listing(&self, id: i64) -> Result<Option<Listing>> {
        self.read(|conn| ListingStore::new(conn).get(id))
    }

    /// Listing plus seller name and rating, as shown on the detail view
    pub fn listing_card(&self, id: i64) -> Result<Option<ListingCard>> {
        self.read(|conn| ListingStore::new(conn).card(id))
    }

    /// Bare active → sold transition (purchase does this itself)
    pub fn mark_sold(&self, id: i64) -> Result<Listing> {
        self.atomically(|tx| ListingStore::new(tx).mark_sold(id))
    }

    pub fn cancel_listing(&self, id: i64, owner_id: i64) -> Result<Listing> {
        let now = self.clock.now();
        self.atomically(|tx| {
            let listing = ListingStore::new(tx).cancel(id, owner_id)?;
            insert_event(
                tx,
                &Event::new(
                    now,
                    "listing_cancelled",
                    "listing",
                    id,
                    serde_json::json!({}),
                    &account_actor(owner_id),
                ),
            )?;
            Ok(listing)
        })
    }

    /// Best effort; never fails the caller's page view
    pub fn increment_views(&self, id: i64) {
        if let Err(e) = self.read(|conn| ListingStore::new(conn).increment_views(id)) {
            debug!(listing_id = id, error = %e, "view count not updated");
        }
    }

    // ========================================================================
    // EXCHANGE ENGINE
    // ========================================================================

    /// Buy an active listing with the buyer's coins
    ///
    /// All-or-nothing: on any error no balance, listing, transaction,
    /// notification or event row changes. When two buyers race for one
    /// listing exactly one succeeds; the other gets `ListingUnavailable`.
    pub fn purchase(&self, listing_id: i64, buyer_id: i64) -> Result<Transaction> {
        let now = self.clock.now();

        let result = self.atomically(|tx| {
            let listings = ListingStore::new(tx);
            let accounts = AccountStore::new(tx);

            // 1. Listing must exist and be active
            let listing = listings
                .get(listing_id)?
                .ok_or(ExchangeError::ListingNotFound { listing_id })?;
            if !listing.is_active() {
                return Err(ExchangeError::ListingUnavailable {
                    listing_id,
                    status: listing.status.as_str().to_string(),
                });
            }

            // 2. No buying from yourself
            if listing.owner_id == buyer_id {
                return Err(ExchangeError::SelfPurchase {
                    account_id: buyer_id,
                    listing_id,
                });
            }

            // 3. Buyer must be able to pay the captured price
            let price = listing.price;
            let seller_id = listing.owner_id;
            let buyer = accounts.require(buyer_id)?;
            if !buyer.can_afford(price) {
                return Err(ExchangeError::InsufficientFunds {
                    available: buyer.balance,
                    required: price,
                });
            }

            // 4. Move the coins
            accounts.adjust_balance(buyer_id, -price)?;
            accounts.adjust_balance(seller_id, price)?;

            // 5. Close the listing (compare-and-set on status)
            listings.mark_sold(listing_id).map_err(|e| match e {
                ExchangeError::InvalidState { status, .. } => {
                    ExchangeError::ListingUnavailable { listing_id, status }
                }
                other => other,
            })?;

            // 6. Record the deal
            let record = TransactionLog::new(tx).insert(
                listing_id,
                buyer_id,
                seller_id,
                price,
                TransactionStatus::Completed,
                now,
            )?;

            accounts.record_trade(buyer_id, seller_id)?;

            NotificationStore::new(tx).push(
                seller_id,
                "listing_sold",
                "Listing sold",
                &format!("{} sold for {} coins", listing.metadata.item_name, price),
                &serde_json::json!({
                    "listing_id": listing_id,
                    "transaction_id": record.id,
                    "buyer_id": buyer_id,
                }),
                now,
            )?;

            insert_event(
                tx,
                &Event::new(
                    now,
                    "purchase_completed",
                    "transaction",
                    record.id,
                    serde_json::json!({
                        "listing_id": listing_id,
                        "buyer_id": buyer_id,
                        "seller_id": seller_id,
                        "amount": price,
                    }),
                    &account_actor(buyer_id),
                ),
            )?;

            Ok(record)
        });

        match &result {
            Ok(record) => info!(
                transaction_id = record.id,
                listing_id,
                buyer_id,
                seller_id = record.seller_id,
                amount = record.amount,
                "purchase completed"
            ),
            Err(e) => warn!(listing_id, buyer_id, kind = e.kind().as_str(), error = %e, "purchase rejected"),
        }

        result
    }

    /// Open a dispute on a completed deal; no coins move
    pub fn dispute(&self, transaction_id: i64, account_id: i64) -> Result<Transaction> {
        let now = self.clock.now();
        self.atomically(|tx| {
            let log = TransactionLog::new(tx);
            let record = log.require(transaction_id)?;
            if !record.involves(account_id) {
                return Err(ExchangeError::NotParty {
                    account_id,
                    transaction_id,
                });
            }

            let record = log.advance(transaction_id, TransactionStatus::Disputed, now)?;
            insert_event(
                tx,
                &Event::new(
                    now,
                    "transaction_disputed",
                    "transaction",
                    transaction_id,
                    serde_json::json!({}),
                    &account_actor(account_id),
                ),
            )?;
            warn!(transaction_id, account_id, "transaction disputed");
            Ok(record)
        })
    }

    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        self.read(|conn| TransactionLog::new(conn).get(id))
    }

    pub fn transactions_for(&self, account_id: i64) -> Result<Vec<Transaction>> {
        self.read(|conn| TransactionLog::new(conn).for_account(account_id))
    }

    pub fn all_transactions(&self) -> Result<Vec<Transaction>> {
        self.read(|conn| TransactionLog::new(conn).all())
    }

    // ========================================================================
    // NOTIFICATIONS
    // ========================================================================

    pub fn notify(
        &self,
        user_id: i64,
        kind: &str,
        title: &str,
        message: &str,
        data: serde_json::Value,
    ) -> Result<i64> {
        let now = self.clock.now();
        self.atomically(|tx| NotificationStore::new(tx).push(user_id, kind, title, message, &data, now))
    }

    pub fn unread_notifications(&self, user_id: i64) -> Result<Vec<Notification>> {
        self.read(|conn| NotificationStore::new(conn).unread(user_id))
    }

    /// Only the recipient can mark a notification read
    pub fn mark_notification_read(&self, id: i64, user_id: i64) -> Result<()> {
        self.atomically(|tx| NotificationStore::new(tx).mark_read(id, user_id))
    }

    pub fn events_for(&self, entity_type: &str, entity_id: i64) -> Result<Vec<Event>> {
        self.read(|conn| crate::db::get_events_for_entity(conn, entity_type, entity_id))
    }
}

// ============================================================================
// TESTS
// ============================================================================
