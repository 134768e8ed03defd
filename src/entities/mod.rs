// Entity Models
//
// One typed struct per relation, built once at the storage boundary by a row
// mapper. Each store borrows a connection (normally the caller's open
// transaction), so several stores can take part in one atomic unit.

pub mod account;
pub mod listing;
pub mod notification;
pub mod review;
pub mod transaction;

pub use account::{Account, AccountStore};
pub use listing::{Listing, ListingCard, ListingDraft, ListingMetadata, ListingStatus, ListingStore};
pub use notification::{Notification, NotificationStore};
pub use review::{RatingSummary, Review, ReviewStore, MAX_RATING, MIN_RATING};
pub use transaction::{Transaction, TransactionLog, TransactionStatus};
