// ⭐ Referral / Rating Aggregator
//
// Reviews feed a full recomputation of the subject's mean rating in the same
// storage transaction as the insert, so rating and rating_count can never
// drift from the reviews table. Referral helpers turn a `/start ref_<id>`
// payload into a referrer and build the invite link an account shares.

use crate::config::Clock;
use crate::db::{account_actor, insert_event, Event};
use crate::entities::{AccountStore, RatingSummary, Review, ReviewStore, TransactionLog, MAX_RATING, MIN_RATING};
use crate::error::{ExchangeError, Result};
use crate::exchange::Exchange;
use serde::{Deserialize, Serialize};
use tracing::info;

const REFERRAL_PREFIX: &str = "ref_";

// ============================================================================
// RATINGS
// ============================================================================

impl Exchange {
    /// Record one review and recompute the subject's rating
    ///
    /// The author must be a party to the transaction and the subject its
    /// counterparty; each author reviews a transaction at most once.
    pub fn record_review(
        &self,
        author_id: i64,
        subject_id: i64,
        transaction_id: i64,
        rating: i64,
        comment: &str,
    ) -> Result<Review> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(ExchangeError::InvalidRating { rating });
        }

        let now = self.clock().now();
        self.atomically(|tx| {
            let record = TransactionLog::new(tx).require(transaction_id)?;
            if record.counterparty(author_id) != Some(subject_id) {
                return Err(ExchangeError::NotParty {
                    account_id: author_id,
                    transaction_id,
                });
            }

            let reviews = ReviewStore::new(tx);
            if reviews.exists(author_id, transaction_id)? {
                return Err(ExchangeError::DuplicateReview {
                    author_id,
                    transaction_id,
                });
            }

            let review = reviews.insert(author_id, subject_id, transaction_id, rating, comment, now)?;

            let summary = reviews.summary_for(subject_id)?;
            AccountStore::new(tx).set_rating(subject_id, summary.mean, summary.count)?;

            insert_event(
                tx,
                &Event::new(
                    now,
                    "review_recorded",
                    "account",
                    subject_id,
                    serde_json::json!({
                        "transaction_id": transaction_id,
                        "rating": rating,
                        "mean": summary.mean,
                        "count": summary.count,
                    }),
                    &account_actor(author_id),
                ),
            )?;

            info!(author_id, subject_id, transaction_id, rating, mean = summary.mean, "review recorded");
            Ok(review)
        })
    }

    pub fn rating_summary(&self, subject_id: i64) -> Result<RatingSummary> {
        self.read(|conn| ReviewStore::new(conn).summary_for(subject_id))
    }

    pub fn reviews_for(&self, subject_id: i64) -> Result<Vec<Review>> {
        self.read(|conn| ReviewStore::new(conn).for_subject(subject_id))
    }

    // ========================================================================
    // REFERRALS
    // ========================================================================

    /// How many accounts this one brought in, and the link to share
    pub fn referral_summary(&self, account_id: i64) -> Result<ReferralSummary> {
        let referrals = self.read(|conn| {
            let accounts = AccountStore::new(conn);
            accounts.require(account_id)?;
            accounts.count_referrals(account_id)
        })?;

        Ok(ReferralSummary {
            account_id,
            referrals,
            bonus_per_referral: self.config().referral_bonus,
            earned: referrals * self.config().referral_bonus,
            link: referral_link(&self.config().bot_username, account_id),
        })
    }

    // ========================================================================
    // LINKS
    // ========================================================================

    /// Bot, website and invite links for one account; the VIP chat only while VIP is active
    pub fn links_for(&self, account_id: i64) -> Result<AccountLinks> {
        let now = self.clock().now();
        let account = self.read(|conn| AccountStore::new(conn).require(account_id))?;
        let config = self.config();

        Ok(AccountLinks {
            bot: format!("https://t.me/{}", config.bot_username),
            website: config.website_url.clone(),
            vip_chat: config
                .vip_chat_link
                .clone()
                .filter(|_| account.is_vip(now)),
            referral: referral_link(&config.bot_username, account_id),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLinks {
    pub bot: String,
    pub website: Option<String>,
    pub vip_chat: Option<String>,
    pub referral: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralSummary {
    pub account_id: i64,
    pub referrals: i64,
    pub bonus_per_referral: i64,
    pub earned: i64,
    pub link: String,
}

/// Invite link that opens the bot with a `ref_<id>` start payload
pub fn referral_link(bot_username: &str, account_id: i64) -> String {
    format!("https://t.me/{}?start={}{}", bot_username, REFERRAL_PREFIX, account_id)
}

/// Referrer id from a start payload such as `ref_42` or `/start ref_42`
///
/// Anything malformed yields `None`; registration then proceeds without a
/// referrer rather than failing.
pub fn parse_referral_payload(payload: &str) -> Option<i64> {
    let payload = payload.trim();
    let arg = payload
        .strip_prefix("/start")
        .map(str::trim)
        .unwrap_or(payload);

    arg.strip_prefix(REFERRAL_PREFIX)?.parse::<i64>().ok()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeConfig, FixedClock};
    use crate::entities::{ListingMetadata, Transaction};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn exchange() -> Exchange {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        Exchange::in_memory(ExchangeConfig::default())
            .unwrap()
            .with_clock(Arc::new(FixedClock(now)))
    }

    /// Seller 1 sells `n` listings to buyer `buyer`; returns the transactions
    fn deals(ex: &Exchange, buyer: i64, n: usize) -> Vec<Transaction> {
        ex.get_or_create(1, "Seller", None).unwrap();
        ex.get_or_create(buyer, "Buyer", None).unwrap();
        ex.adjust_balance(buyer, 10_000).unwrap();

        (0..n)
            .map(|i| {
                let metadata = ListingMetadata {
                    item_name: format!("Skin #{}", i),
                    ..ListingMetadata::default()
                };
                let listing = ex.create_listing(1, 10, &metadata).unwrap();
                ex.purchase(listing.id, buyer).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_mean_of_five_four_three() {
        let ex = exchange();
        let txs = deals(&ex, 2, 3);

        for (tx, rating) in txs.iter().zip([5, 4, 3]) {
            ex.record_review(2, 1, tx.id, rating, "").unwrap();
        }

        let seller = ex.get_account(1).unwrap().unwrap();
        assert!((seller.rating - 4.0).abs() < 1e-9);
        assert_eq!(seller.rating_count, 3);
    }

    #[test]
    fn test_mean_is_order_independent() {
        let ratings = [1, 5, 2, 4, 4, 3, 5];
        let mut reversed = ratings;
        reversed.reverse();

        let mut means = Vec::new();
        for order in [ratings, reversed] {
            let ex = exchange();
            let txs = deals(&ex, 2, order.len());
            for (tx, rating) in txs.iter().zip(order) {
                ex.record_review(2, 1, tx.id, rating, "ok").unwrap();
            }
            means.push(ex.get_account(1).unwrap().unwrap().rating);
        }

        assert!((means[0] - means[1]).abs() < 1e-9);
        assert!((means[0] - 24.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_rating_summary_matches_account() {
        let ex = exchange();
        assert_eq!(ex.rating_summary(1).unwrap().count, 0);

        let txs = deals(&ex, 2, 2);
        ex.record_review(2, 1, txs[0].id, 5, "fast").unwrap();
        ex.record_review(2, 1, txs[1].id, 2, "slow").unwrap();

        let summary = ex.rating_summary(1).unwrap();
        let seller = ex.get_account(1).unwrap().unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.count, seller.rating_count);
        assert!((summary.mean - 3.5).abs() < 1e-9);
        assert!((summary.mean - seller.rating).abs() < 1e-9);
    }

    #[test]
    fn test_new_account_keeps_default_rating_until_reviewed() {
        let ex = exchange();
        let account = ex.get_or_create(1, "Fresh", None).unwrap();
        assert_eq!(account.rating, 5.0);
        assert_eq!(account.rating_count, 0);
    }

    #[test]
    fn test_rating_out_of_range() {
        let ex = exchange();
        let txs = deals(&ex, 2, 1);

        for rating in [0, 6, -1] {
            let err = ex.record_review(2, 1, txs[0].id, rating, "").unwrap_err();
            assert!(matches!(err, ExchangeError::InvalidRating { .. }));
        }
        assert_eq!(ex.get_account(1).unwrap().unwrap().rating_count, 0);
    }

    #[test]
    fn test_duplicate_review_rejected() {
        let ex = exchange();
        let txs = deals(&ex, 2, 1);

        ex.record_review(2, 1, txs[0].id, 5, "fast trade").unwrap();
        let err = ex.record_review(2, 1, txs[0].id, 1, "changed my mind").unwrap_err();

        assert!(matches!(err, ExchangeError::DuplicateReview { author_id: 2, .. }));
        let seller = ex.get_account(1).unwrap().unwrap();
        assert_eq!(seller.rating, 5.0);
        assert_eq!(seller.rating_count, 1);
    }

    #[test]
    fn test_both_sides_can_review_each_other() {
        let ex = exchange();
        let txs = deals(&ex, 2, 1);

        ex.record_review(2, 1, txs[0].id, 4, "").unwrap();
        ex.record_review(1, 2, txs[0].id, 2, "slow to confirm").unwrap();

        assert_eq!(ex.get_account(1).unwrap().unwrap().rating, 4.0);
        assert_eq!(ex.get_account(2).unwrap().unwrap().rating, 2.0);
        assert_eq!(ex.reviews_for(2).unwrap()[0].comment, "slow to confirm");
    }

    #[test]
    fn test_outsiders_cannot_review() {
        let ex = exchange();
        let txs = deals(&ex, 2, 1);
        ex.get_or_create(3, "Outsider", None).unwrap();

        let err = ex.record_review(3, 1, txs[0].id, 1, "").unwrap_err();
        assert!(matches!(err, ExchangeError::NotParty { account_id: 3, .. }));

        // Party reviewing someone other than the counterparty
        let err = ex.record_review(2, 3, txs[0].id, 1, "").unwrap_err();
        assert!(matches!(err, ExchangeError::NotParty { .. }));

        let err = ex.record_review(2, 1, 999, 5, "").unwrap_err();
        assert!(matches!(err, ExchangeError::NotFound { entity: "transaction", .. }));
    }

    #[test]
    fn test_parse_referral_payload() {
        assert_eq!(parse_referral_payload("ref_42"), Some(42));
        assert_eq!(parse_referral_payload("/start ref_42"), Some(42));
        assert_eq!(parse_referral_payload("  /start   ref_7 "), Some(7));
        assert_eq!(parse_referral_payload("/start"), None);
        assert_eq!(parse_referral_payload("/start promo"), None);
        assert_eq!(parse_referral_payload("ref_abc"), None);
        assert_eq!(parse_referral_payload(""), None);
    }

    #[test]
    fn test_referral_summary() {
        let ex = exchange();
        ex.get_or_create(1, "Host", None).unwrap();
        ex.get_or_create(2, "Guest A", Some(1)).unwrap();
        ex.get_or_create(3, "Guest B", parse_referral_payload("/start ref_1")).unwrap();

        let summary = ex.referral_summary(1).unwrap();
        assert_eq!(summary.referrals, 2);
        assert_eq!(summary.earned, 100);
        assert_eq!(summary.link, "https://t.me/shizogp_bot?start=ref_1");

        assert!(ex.referral_summary(99).is_err());
    }

    #[test]
    fn test_links_show_vip_chat_only_to_vip() {
        let config = ExchangeConfig {
            website_url: Some("https://skins.example".to_string()),
            vip_chat_link: Some("https://t.me/+vipchat".to_string()),
            ..ExchangeConfig::default()
        };
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let ex = Exchange::in_memory(config)
            .unwrap()
            .with_clock(Arc::new(FixedClock(now)));
        ex.get_or_create(4, "Trader", None).unwrap();

        let links = ex.links_for(4).unwrap();
        assert_eq!(links.bot, "https://t.me/shizogp_bot");
        assert_eq!(links.website.as_deref(), Some("https://skins.example"));
        assert_eq!(links.vip_chat, None);
        assert_eq!(links.referral, "https://t.me/shizogp_bot?start=ref_4");

        ex.grant_vip(4, 30).unwrap();
        let links = ex.links_for(4).unwrap();
        assert_eq!(links.vip_chat.as_deref(), Some("https://t.me/+vipchat"));

        assert!(matches!(ex.links_for(99), Err(ExchangeError::NotFound { .. })));
    }
}
