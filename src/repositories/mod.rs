// Repositories - persistence seams for the promo pool

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::PromoError;
use crate::models::{NewPromoCode, PromoCode, User};

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryJobLock, InMemoryPromoStore, InMemoryUserDirectory};
pub use postgres::{PgJobLock, PgPromoStore, PgUserDirectory};

/// Storage for promo codes.
///
/// Reads on the store itself only ever see committed rows. Anything that
/// changes ownership or usage goes through a [`PromoTx`].
#[async_trait]
pub trait PromoStore: Send + Sync + 'static {
    type Tx: PromoTx + 'static;

    async fn begin(&self) -> Result<Self::Tx, PromoError>;

    /// Number of codes owned by `owner`, used or not
    async fn count_owned(&self, owner: Uuid) -> Result<i64, PromoError>;

    /// Owned-code counts for a batch of users; users without codes are absent
    async fn owned_counts(&self, owners: &[Uuid]) -> Result<HashMap<Uuid, i64>, PromoError>;

    /// Codes still in the pool (unowned and unused)
    async fn count_pool(&self) -> Result<i64, PromoError>;

    /// Owned, unused codes, newest first
    async fn list_owned_unused(&self, owner: Uuid) -> Result<Vec<PromoCode>, PromoError>;

    /// Most recently created code owned by `owner`
    async fn latest_owned(&self, owner: Uuid) -> Result<Option<PromoCode>, PromoError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<PromoCode>, PromoError>;

    /// Bulk insert ignoring codes that already exist. Returns rows inserted.
    async fn insert_batch(&self, codes: &[NewPromoCode]) -> Result<u64, PromoError>;
}

/// A unit of work over the promo table. Dropping without `commit` rolls back.
#[async_trait]
pub trait PromoTx: Send + Sized {
    /// Locks up to `limit` pool rows, oldest first, skipping rows locked by
    /// other transactions, and assigns them to `owner`.
    async fn claim_unassigned(&mut self, owner: Uuid, limit: i64)
        -> Result<Vec<PromoCode>, PromoError>;

    /// Inserts a new code. `None` means the code already exists.
    async fn insert_code(&mut self, code: &NewPromoCode) -> Result<Option<PromoCode>, PromoError>;

    /// Marks `code` used if `requester` may redeem it, assigning ownership of
    /// a previously unowned code. `None` when the code is not redeemable.
    async fn redeem(
        &mut self,
        code: &str,
        requester: Option<Uuid>,
    ) -> Result<Option<PromoCode>, PromoError>;

    async fn commit(self) -> Result<(), PromoError>;
}

/// Read access to the user table of the authentication subsystem.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Users ordered by id, strictly after `after` when given
    async fn list_after(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<User>, PromoError>;
}

/// Named mutual-exclusion token with an expiry, shared across processes.
#[async_trait]
pub trait JobLock: Send + Sync + 'static {
    /// Takes the lock unless another holder has it and it has not expired.
    async fn try_acquire(&self, name: &str, holder: Uuid, ttl: Duration)
        -> Result<bool, PromoError>;

    async fn release(&self, name: &str, holder: Uuid) -> Result<(), PromoError>;
}
