use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::PromoError;
use crate::models::promo_code::normalize_code;
use crate::models::{NewPromoCode, PromoCode, User};
use crate::repositories::{PromoStore, PromoTx};
use crate::services::code_generator::CodeSource;
use crate::services::notifier::{NotificationPayload, Notifier};
use crate::services::pricing::{CheckoutQuote, ShippingMethod};

const SEED_BATCH_SIZE: usize = 500;
pub const DEFAULT_MINT_ATTEMPTS: u32 = 5;
pub const DEFAULT_ONBOARDING_TARGET: i64 = 8;

/// Codes handed to a user by one `ensure_user_has_codes` call
#[derive(Debug, Default)]
pub struct Allocation {
    pub claimed: Vec<PromoCode>,
    pub minted: Vec<PromoCode>,
}

impl Allocation {
    pub fn assigned(&self) -> usize {
        self.claimed.len() + self.minted.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoValidation {
    Valid { discount_percent: i16 },
    Invalid,
}

impl PromoValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, PromoValidation::Valid { .. })
    }
}

/// Hands out promo codes from the shared pool, minting new ones when the
/// pool runs short, and checks/redeems them at checkout.
pub struct PromoAllocator<S: PromoStore> {
    store: S,
    codes: Arc<dyn CodeSource>,
    notifier: Arc<dyn Notifier>,
    max_mint_attempts: u32,
    onboarding_target: i64,
}

impl<S: PromoStore> PromoAllocator<S> {
    pub fn new(store: S, codes: Arc<dyn CodeSource>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            codes,
            notifier,
            max_mint_attempts: DEFAULT_MINT_ATTEMPTS,
            onboarding_target: DEFAULT_ONBOARDING_TARGET,
        }
    }

    pub fn with_onboarding_target(mut self, target: i64) -> Self {
        self.onboarding_target = target;
        self
    }

    pub fn with_max_mint_attempts(mut self, attempts: u32) -> Self {
        self.max_mint_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Tops the user up to `target` owned codes.
    ///
    /// 1. Returns immediately if the user already owns `target` codes
    /// 2. Claims the oldest pool codes, skipping rows other transactions hold
    /// 3. Mints pre-owned codes for whatever the pool could not cover
    ///
    /// Steps 2 and 3 share one transaction; any error rolls both back.
    pub async fn ensure_user_has_codes(
        &self,
        user_id: Uuid,
        target: i64,
    ) -> Result<Allocation, PromoError> {
        if target <= 0 {
            return Err(PromoError::InvalidTarget(target));
        }

        let current = self.store.count_owned(user_id).await?;
        if current >= target {
            return Ok(Allocation::default());
        }
        let deficit = target - current;

        let mut tx = self.store.begin().await?;
        let claimed = tx.claim_unassigned(user_id, deficit).await?;

        let shortfall = deficit - claimed.len() as i64;
        if shortfall > 0 {
            tracing::debug!(
                user_id = %user_id,
                shortfall,
                "Promo pool short, minting new codes"
            );
        }

        let mut minted = Vec::with_capacity(shortfall.max(0) as usize);
        for _ in 0..shortfall {
            minted.push(self.mint_owned(&mut tx, user_id).await?);
        }

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            target,
            claimed = claimed.len(),
            minted = minted.len(),
            "Promo codes assigned"
        );

        Ok(Allocation { claimed, minted })
    }

    async fn mint_owned(&self, tx: &mut S::Tx, owner: Uuid) -> Result<PromoCode, PromoError> {
        for attempt in 1..=self.max_mint_attempts {
            let candidate = NewPromoCode {
                code: self.codes.next_code()?,
                discount_percent: self.codes.next_discount()?,
                owner_id: Some(owner),
            };

            if let Some(created) = tx.insert_code(&candidate).await? {
                return Ok(created);
            }

            tracing::warn!(
                attempt,
                code = %candidate.code,
                "Minted promo code already exists, retrying"
            );
        }

        Err(PromoError::MintCollision {
            attempts: self.max_mint_attempts,
        })
    }

    /// Tops the user up, emails them every unused code they hold and returns
    /// their newest code.
    ///
    /// Delivery problems are logged and never fail the call.
    pub async fn assign_and_notify(
        &self,
        user: &User,
        target: i64,
    ) -> Result<Option<String>, PromoError> {
        self.ensure_user_has_codes(user.id, target).await?;

        match user.resolvable_email() {
            Some(email) => {
                let unused = self.store.list_owned_unused(user.id).await?;
                if !unused.is_empty() {
                    let payload = NotificationPayload {
                        recipient_email: email.to_string(),
                        codes: unused.iter().map(PromoCode::offer).collect(),
                    };
                    if let Err(e) = self.notifier.send_promo_codes(&payload).await {
                        tracing::warn!(
                            user_id = %user.id,
                            error = %e,
                            "Failed to deliver promo notification"
                        );
                    }
                }
            }
            None => {
                tracing::debug!(user_id = %user.id, "No email address, skipping promo notification");
            }
        }

        let latest = self.store.latest_owned(user.id).await?;
        Ok(latest.map(|code| code.code))
    }

    /// Called on registration and login. A user with no codes yet gets the
    /// welcome email; anyone else below the onboarding target is topped up
    /// quietly and left for the periodic sweep to notify.
    pub async fn onboard(&self, user: &User) -> Result<Option<String>, PromoError> {
        let owned = self.store.count_owned(user.id).await?;
        if owned == 0 {
            return self.assign_and_notify(user, self.onboarding_target).await;
        }

        self.ensure_user_has_codes(user.id, self.onboarding_target)
            .await?;
        let latest = self.store.latest_owned(user.id).await?;
        Ok(latest.map(|code| code.code))
    }

    /// Read-only eligibility check used for price previews.
    pub async fn validate_code(
        &self,
        code: &str,
        requester: Option<Uuid>,
    ) -> Result<PromoValidation, PromoError> {
        let code = normalize_code(code);
        let validation = match self.store.find_by_code(&code).await? {
            Some(promo) if promo.is_redeemable_by(requester) => PromoValidation::Valid {
                discount_percent: promo.discount_percent,
            },
            _ => PromoValidation::Invalid,
        };

        Ok(validation)
    }

    /// Redeems within a transaction owned by the caller, typically the one
    /// that also writes the order.
    pub async fn redeem_in(
        &self,
        tx: &mut S::Tx,
        code: &str,
        requester: Option<Uuid>,
    ) -> Result<PromoCode, PromoError> {
        let code = normalize_code(code);
        tx.redeem(&code, requester)
            .await?
            .ok_or(PromoError::InvalidPromoCode)
    }

    /// Redeems in a transaction of its own
    pub async fn redeem(&self, code: &str, requester: Option<Uuid>) -> Result<PromoCode, PromoError> {
        let mut tx = self.store.begin().await?;
        let redeemed = self.redeem_in(&mut tx, code, requester).await?;
        tx.commit().await?;

        tracing::info!(
            code = %redeemed.code,
            owner_id = ?redeemed.owner_id,
            "Promo code redeemed"
        );

        Ok(redeemed)
    }

    /// Unused codes the user can pick from at checkout, newest first
    pub async fn list_unused_codes(&self, user_id: Uuid) -> Result<Vec<PromoCode>, PromoError> {
        self.store.list_owned_unused(user_id).await
    }

    /// Price preview for a cart. An unusable code leaves the price untouched
    /// and flags the quote.
    pub async fn quote_checkout(
        &self,
        subtotal_cents: i64,
        shipping: ShippingMethod,
        code: Option<&str>,
        requester: Option<Uuid>,
    ) -> Result<CheckoutQuote, PromoError> {
        let Some(raw) = code.filter(|c| !c.trim().is_empty()) else {
            return Ok(CheckoutQuote::compute(subtotal_cents, shipping, None));
        };

        let quote = match self.validate_code(raw, requester).await? {
            PromoValidation::Valid { discount_percent } => CheckoutQuote::compute(
                subtotal_cents,
                shipping,
                Some((normalize_code(raw), discount_percent)),
            ),
            PromoValidation::Invalid => {
                CheckoutQuote::compute(subtotal_cents, shipping, None).rejected()
            }
        };

        Ok(quote)
    }

    /// Pre-mints `count` unassigned codes into the pool.
    pub async fn seed_pool(&self, count: u64) -> Result<u64, PromoError> {
        let mut created = 0u64;
        let mut idle_rounds = 0u32;

        while created < count {
            let wanted = (count - created).min(SEED_BATCH_SIZE as u64) as usize;
            let mut seen = HashSet::with_capacity(wanted);
            let mut batch = Vec::with_capacity(wanted);
            // A code space smaller than the batch would never fill it
            let max_draws = wanted * self.max_mint_attempts as usize;
            let mut draws = 0usize;
            while batch.len() < wanted {
                if draws >= max_draws {
                    tracing::warn!(
                        wanted,
                        distinct = batch.len(),
                        "Code space too small to fill seed batch"
                    );
                    return Err(PromoError::MintCollision {
                        attempts: self.max_mint_attempts,
                    });
                }
                draws += 1;
                let code = self.codes.next_code()?;
                if seen.insert(code.clone()) {
                    batch.push(NewPromoCode {
                        code,
                        discount_percent: self.codes.next_discount()?,
                        owner_id: None,
                    });
                }
            }

            let inserted = self.store.insert_batch(&batch).await?;
            if inserted == 0 {
                idle_rounds += 1;
                if idle_rounds >= self.max_mint_attempts {
                    return Err(PromoError::MintCollision {
                        attempts: idle_rounds,
                    });
                }
            } else {
                idle_rounds = 0;
            }
            created += inserted;

            tracing::debug!(created, count, "Seeded promo code batch");
        }

        tracing::info!(created, "Promo pool seeded");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryPromoStore;
    use crate::services::code_generator::RandomCodeSource;
    use crate::services::notifier::{MockNotifier, NotificationError};
    use std::sync::Mutex;

    /// Replays a fixed list of codes, then repeats the last one
    struct ScriptedCodes {
        codes: Mutex<Vec<String>>,
    }

    impl ScriptedCodes {
        fn new(codes: &[&str]) -> Self {
            let mut codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
            codes.reverse();
            Self {
                codes: Mutex::new(codes),
            }
        }
    }

    impl CodeSource for ScriptedCodes {
        fn next_code(&self) -> Result<String, PromoError> {
            let mut codes = self.codes.lock().unwrap();
            if codes.len() > 1 {
                Ok(codes.pop().unwrap())
            } else {
                Ok(codes[0].clone())
            }
        }

        fn next_discount(&self) -> Result<i16, PromoError> {
            Ok(15)
        }
    }

    fn silent_notifier() -> Arc<dyn Notifier> {
        let mut notifier = MockNotifier::new();
        notifier.expect_send_promo_codes().never();
        Arc::new(notifier)
    }

    fn allocator(store: InMemoryPromoStore) -> PromoAllocator<InMemoryPromoStore> {
        PromoAllocator::new(store, Arc::new(RandomCodeSource::default()), silent_notifier())
    }

    async fn seed(store: &InMemoryPromoStore, codes: &[&str]) {
        for code in codes {
            store
                .insert_batch(&[NewPromoCode {
                    code: code.to_string(),
                    discount_percent: 12,
                    owner_id: None,
                }])
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_rejects_non_positive_target() {
        let allocator = allocator(InMemoryPromoStore::new());
        let result = allocator.ensure_user_has_codes(Uuid::new_v4(), 0).await;
        assert!(matches!(result, Err(PromoError::InvalidTarget(0))));
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let allocator = allocator(InMemoryPromoStore::new());
        let user = Uuid::new_v4();

        let first = allocator.ensure_user_has_codes(user, 8).await.unwrap();
        assert_eq!(first.assigned(), 8);

        let second = allocator.ensure_user_has_codes(user, 8).await.unwrap();
        assert_eq!(second.assigned(), 0);
        assert_eq!(allocator.store().count_owned(user).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_tops_up_partial_holdings() {
        let store = InMemoryPromoStore::new();
        let allocator = allocator(store.clone());
        let user = Uuid::new_v4();

        allocator.ensure_user_has_codes(user, 8).await.unwrap();
        let topped = allocator.ensure_user_has_codes(user, 10).await.unwrap();

        assert_eq!(topped.assigned(), 2);
        assert_eq!(store.count_owned(user).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_empty_pool_mints_every_code() {
        let store = InMemoryPromoStore::new();
        let allocator = allocator(store.clone());
        let user = Uuid::new_v4();

        let allocation = allocator.ensure_user_has_codes(user, 10).await.unwrap();

        assert!(allocation.claimed.is_empty());
        assert_eq!(allocation.minted.len(), 10);
        let unique: HashSet<&str> = allocation.minted.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(unique.len(), 10);
        assert!(allocation
            .minted
            .iter()
            .all(|c| c.owner_id == Some(user) && !c.used && (10..=20).contains(&c.discount_percent)));
    }

    #[tokio::test]
    async fn test_claims_pool_before_minting() {
        let store = InMemoryPromoStore::new();
        seed(&store, &["C1C1C1C1C1C1", "C2C2C2C2C2C2"]).await;
        let allocator = allocator(store.clone());
        let user = Uuid::new_v4();

        let allocation = allocator.ensure_user_has_codes(user, 3).await.unwrap();

        let claimed: Vec<&str> = allocation.claimed.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(claimed, vec!["C1C1C1C1C1C1", "C2C2C2C2C2C2"]);
        assert_eq!(allocation.minted.len(), 1);
        assert_eq!(store.count_owned(user).await.unwrap(), 3);
        assert_eq!(store.count_pool().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claims_oldest_codes_first() {
        let store = InMemoryPromoStore::new();
        seed(&store, &["OLD000000001", "OLD000000002", "NEW000000003", "NEW000000004"]).await;
        let allocator = allocator(store.clone());
        let user = Uuid::new_v4();

        let allocation = allocator.ensure_user_has_codes(user, 2).await.unwrap();

        let claimed: Vec<&str> = allocation.claimed.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(claimed, vec!["OLD000000001", "OLD000000002"]);
        assert!(allocation.minted.is_empty());
        assert_eq!(store.count_pool().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_mint_retries_collisions() {
        let store = InMemoryPromoStore::new();
        store
            .insert_batch(&[NewPromoCode {
                code: "TAKEN0000000".to_string(),
                discount_percent: 10,
                owner_id: Some(Uuid::new_v4()),
            }])
            .await
            .unwrap();
        let allocator = PromoAllocator::new(
            store.clone(),
            Arc::new(ScriptedCodes::new(&["TAKEN0000000", "FRESH0000000", "FRESH0000001"])),
            silent_notifier(),
        );
        let user = Uuid::new_v4();

        let allocation = allocator.ensure_user_has_codes(user, 1).await.unwrap();

        assert_eq!(allocation.minted[0].code, "FRESH0000000");
    }

    #[tokio::test]
    async fn test_mint_gives_up_after_bounded_attempts() {
        let store = InMemoryPromoStore::new();
        store
            .insert_batch(&[NewPromoCode {
                code: "TAKEN0000000".to_string(),
                discount_percent: 10,
                owner_id: Some(Uuid::new_v4()),
            }])
            .await
            .unwrap();
        let allocator = PromoAllocator::new(
            store.clone(),
            Arc::new(ScriptedCodes::new(&["TAKEN0000000"])),
            silent_notifier(),
        )
        .with_max_mint_attempts(3);
        let user = Uuid::new_v4();

        let result = allocator.ensure_user_has_codes(user, 2).await;

        assert!(matches!(result, Err(PromoError::MintCollision { attempts: 3 })));
        assert_eq!(store.count_owned(user).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_users_never_share_codes() {
        let store = InMemoryPromoStore::new();
        seed(
            &store,
            &["P00000000001", "P00000000002", "P00000000003", "P00000000004", "P00000000005"],
        )
        .await;
        let allocator = Arc::new(allocator(store.clone()));
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let a = {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move { allocator.ensure_user_has_codes(alice, 4).await })
        };
        let b = {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move { allocator.ensure_user_has_codes(bob, 4).await })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

        assert_eq!(a.assigned(), 4);
        assert_eq!(b.assigned(), 4);
        assert_eq!(a.claimed.len() + b.claimed.len(), 5);

        let all: Vec<&str> = a
            .claimed
            .iter()
            .chain(&a.minted)
            .chain(&b.claimed)
            .chain(&b.minted)
            .map(|c| c.code.as_str())
            .collect();
        let unique: HashSet<&str> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
        assert_eq!(store.count_pool().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_assign_and_notify_sends_all_unused_codes() {
        let store = InMemoryPromoStore::new();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send_promo_codes()
            .withf(|payload| payload.recipient_email == "shopper@example.com" && payload.codes.len() == 8)
            .times(1)
            .returning(|_| Ok(()));
        let allocator = PromoAllocator::new(
            store.clone(),
            Arc::new(RandomCodeSource::default()),
            Arc::new(notifier),
        );
        let user = User::new(Uuid::new_v4(), Some("shopper@example.com".to_string()));

        let code = allocator.assign_and_notify(&user, 8).await.unwrap();

        let latest = store.latest_owned(user.id).await.unwrap().unwrap();
        assert_eq!(code, Some(latest.code));
    }

    #[tokio::test]
    async fn test_notification_failure_is_swallowed() {
        let mut notifier = MockNotifier::new();
        notifier.expect_send_promo_codes().times(1).returning(|_| {
            Err(NotificationError::Rejected {
                status: reqwest::StatusCode::BAD_GATEWAY,
                message: "relay down".to_string(),
            })
        });
        let allocator = PromoAllocator::new(
            InMemoryPromoStore::new(),
            Arc::new(RandomCodeSource::default()),
            Arc::new(notifier),
        );
        let user = User::new(Uuid::new_v4(), Some("shopper@example.com".to_string()));

        let code = allocator.assign_and_notify(&user, 8).await.unwrap();

        assert!(code.is_some());
        assert_eq!(allocator.store().count_owned(user.id).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_no_email_skips_notification() {
        let allocator = allocator(InMemoryPromoStore::new());
        let user = User::new(Uuid::new_v4(), None);

        let code = allocator.assign_and_notify(&user, 2).await.unwrap();

        assert!(code.is_some());
    }

    #[tokio::test]
    async fn test_onboard_notifies_only_first_time() {
        let store = InMemoryPromoStore::new();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send_promo_codes()
            .withf(|payload| payload.codes.len() == 8)
            .times(1)
            .returning(|_| Ok(()));
        let allocator = PromoAllocator::new(
            store.clone(),
            Arc::new(RandomCodeSource::default()),
            Arc::new(notifier),
        );
        let user = User::new(Uuid::new_v4(), Some("new@example.com".to_string()));

        assert!(allocator.onboard(&user).await.unwrap().is_some());

        // Redeemed codes still count towards the target; no second email
        let spent = store.list_owned_unused(user.id).await.unwrap().remove(0);
        allocator.redeem(&spent.code, Some(user.id)).await.unwrap();
        allocator.onboard(&user).await.unwrap();
        assert_eq!(store.count_owned(user.id).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_onboard_tops_up_partial_holder_quietly() {
        let store = InMemoryPromoStore::new();
        let allocator = allocator(store.clone()).with_onboarding_target(5);
        let user = User::new(Uuid::new_v4(), Some("old@example.com".to_string()));
        allocator.ensure_user_has_codes(user.id, 2).await.unwrap();

        allocator.onboard(&user).await.unwrap();

        assert_eq!(store.count_owned(user.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_validate_then_redeem() {
        let store = InMemoryPromoStore::new();
        seed(&store, &["ABC123XYZ000"]).await;
        let allocator = allocator(store.clone());

        let before = allocator.validate_code("abc123xyz000", None).await.unwrap();
        assert_eq!(before, PromoValidation::Valid { discount_percent: 12 });

        let redeemed = allocator.redeem(" ABC123XYZ000 ", None).await.unwrap();
        assert!(redeemed.used);
        assert_eq!(redeemed.owner_id, None);

        let after = allocator.validate_code("ABC123XYZ000", None).await.unwrap();
        assert!(!after.is_valid());
        assert_eq!(store.count_pool().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_owned_code_is_private_to_owner() {
        let store = InMemoryPromoStore::new();
        let allocator = allocator(store.clone());
        let (owner, stranger) = (Uuid::new_v4(), Uuid::new_v4());
        let allocation = allocator.ensure_user_has_codes(owner, 1).await.unwrap();
        let code = allocation.minted[0].code.clone();

        assert!(!allocator.validate_code(&code, None).await.unwrap().is_valid());
        assert!(!allocator.validate_code(&code, Some(stranger)).await.unwrap().is_valid());
        assert!(allocator.validate_code(&code, Some(owner)).await.unwrap().is_valid());

        let result = allocator.redeem(&code, Some(stranger)).await;
        assert!(matches!(result, Err(PromoError::InvalidPromoCode)));
        assert!(allocator.redeem(&code, Some(owner)).await.is_ok());
    }

    #[tokio::test]
    async fn test_redeem_assigns_unowned_code_to_requester() {
        let store = InMemoryPromoStore::new();
        seed(&store, &["ZZZZZZZZZZZ1"]).await;
        let allocator = allocator(store.clone());
        let shopper = Uuid::new_v4();

        let redeemed = allocator.redeem("ZZZZZZZZZZZ1", Some(shopper)).await.unwrap();

        assert_eq!(redeemed.owner_id, Some(shopper));
        assert_eq!(store.count_owned(shopper).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redemption_succeeds_once() {
        let store = InMemoryPromoStore::new();
        seed(&store, &["RACE00000001"]).await;
        let allocator = Arc::new(allocator(store.clone()));

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                tokio::spawn(async move { allocator.redeem("RACE00000001", None).await })
            })
            .collect();

        let mut successes = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(matches!(e, PromoError::InvalidPromoCode)),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_redeem_rolls_back_with_caller_transaction() {
        let store = InMemoryPromoStore::new();
        seed(&store, &["ROLLBACK0001"]).await;
        let allocator = allocator(store.clone());

        {
            let mut tx = store.begin().await.unwrap();
            allocator.redeem_in(&mut tx, "ROLLBACK0001", None).await.unwrap();
            // order write failed, transaction dropped
        }

        assert!(allocator.validate_code("ROLLBACK0001", None).await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_quote_checkout() {
        let store = InMemoryPromoStore::new();
        seed(&store, &["QUOTE0000001"]).await;
        let allocator = allocator(store);

        let quote = allocator
            .quote_checkout(10_000, ShippingMethod::Standard, Some("quote0000001"), None)
            .await
            .unwrap();
        assert_eq!(quote.discount_percent, Some(12));
        assert_eq!(quote.discount, 1_320);
        assert_eq!(quote.grand_total, 9_680);
        assert_eq!(quote.promo_code.as_deref(), Some("QUOTE0000001"));

        let rejected = allocator
            .quote_checkout(10_000, ShippingMethod::Standard, Some("NOPE"), None)
            .await
            .unwrap();
        assert!(rejected.promo_rejected);
        assert_eq!(rejected.grand_total, 11_000);

        let plain = allocator
            .quote_checkout(10_000, ShippingMethod::Express, Some("  "), None)
            .await
            .unwrap();
        assert!(!plain.promo_rejected);
        assert_eq!(plain.grand_total, 11_999);
    }

    #[tokio::test]
    async fn test_seed_pool_and_list_unused() {
        let store = InMemoryPromoStore::new();
        let allocator = allocator(store.clone());

        assert_eq!(allocator.seed_pool(1_200).await.unwrap(), 1_200);
        assert_eq!(store.count_pool().await.unwrap(), 1_200);

        let user = Uuid::new_v4();
        allocator.ensure_user_has_codes(user, 3).await.unwrap();
        let mut unused = allocator.list_unused_codes(user).await.unwrap();
        assert_eq!(unused.len(), 3);

        let redeemed = unused.remove(0);
        allocator.redeem(&redeemed.code, Some(user)).await.unwrap();
        assert_eq!(allocator.list_unused_codes(user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_seed_pool_fails_when_code_space_is_exhausted() {
        let store = InMemoryPromoStore::new();
        // One character gives only 36 distinct codes
        let codes = RandomCodeSource::new(1, 10, 20).unwrap();
        let allocator = PromoAllocator::new(store.clone(), Arc::new(codes), silent_notifier());

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            allocator.seed_pool(100),
        )
        .await
        .expect("seeding must terminate");

        assert!(matches!(result, Err(PromoError::MintCollision { attempts: 5 })));
        assert_eq!(store.count_pool().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_seed_pool_stops_when_every_code_already_exists() {
        let store = InMemoryPromoStore::new();
        seed(&store, &["SEEDSEED0001"]).await;
        let allocator = PromoAllocator::new(
            store.clone(),
            Arc::new(ScriptedCodes::new(&["SEEDSEED0001"])),
            silent_notifier(),
        )
        .with_max_mint_attempts(3);

        let result = allocator.seed_pool(1).await;

        assert!(matches!(result, Err(PromoError::MintCollision { attempts: 3 })));
        assert_eq!(store.count_pool().await.unwrap(), 1);
    }
}
