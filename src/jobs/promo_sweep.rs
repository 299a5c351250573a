use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::PromoError;
use crate::models::User;
use crate::repositories::{JobLock, PromoStore, UserDirectory};
use crate::services::promo_allocator::PromoAllocator;

pub const SWEEP_LOCK_NAME: &str = "promo_sweep";

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub target: i64,
    pub batch_size: i64,
    pub send_email: bool,
    pub lock_ttl: Duration,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            target: 10,
            batch_size: 200,
            send_email: true,
            lock_ttl: Duration::from_secs(50),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub processed: usize,
    pub topped_up: usize,
    pub codes_assigned: usize,
    pub failures: usize,
}

/// Everything a sweep run needs, shareable with the scheduler
pub struct SweepContext<S: PromoStore, U: UserDirectory, L: JobLock> {
    pub allocator: Arc<PromoAllocator<S>>,
    pub users: U,
    pub lock: L,
    pub options: SweepOptions,
}

/// Background job that tops every user up to the sweep target
///
/// Users are paged by id. For each page:
/// 1. Preload how many codes each user owns
/// 2. Skip users already at the target
/// 3. Top up the rest, emailing them when `send_email` is set
///
/// A failure for one user is logged and counted; the sweep carries on.
pub async fn ensure_all_users<S, U>(
    allocator: &PromoAllocator<S>,
    users: &U,
    options: &SweepOptions,
) -> Result<SweepStats, PromoError>
where
    S: PromoStore,
    U: UserDirectory,
{
    if options.target <= 0 {
        return Err(PromoError::InvalidTarget(options.target));
    }

    let mut stats = SweepStats::default();
    let mut cursor: Option<Uuid> = None;

    tracing::info!(
        target = options.target,
        batch_size = options.batch_size,
        "Starting promo sweep"
    );

    loop {
        let batch = users.list_after(cursor, options.batch_size).await?;
        let Some(last) = batch.last() else {
            break;
        };
        cursor = Some(last.id);

        let ids: Vec<Uuid> = batch.iter().map(|u| u.id).collect();
        let counts = allocator.store().owned_counts(&ids).await?;

        for user in &batch {
            stats.processed += 1;
            let owned = counts.get(&user.id).copied().unwrap_or(0);
            if owned >= options.target {
                continue;
            }

            match top_up_user(allocator, user, options).await {
                Ok(assigned) => {
                    stats.topped_up += 1;
                    stats.codes_assigned += assigned;
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %user.id,
                        error = %e,
                        "Failed to top up promo codes"
                    );
                    stats.failures += 1;
                }
            }
        }

        if (batch.len() as i64) < options.batch_size {
            break;
        }
    }

    tracing::info!(?stats, "Promo sweep completed");

    Ok(stats)
}

async fn top_up_user<S: PromoStore>(
    allocator: &PromoAllocator<S>,
    user: &User,
    options: &SweepOptions,
) -> Result<usize, PromoError> {
    if options.send_email {
        let before = allocator.store().count_owned(user.id).await?;
        allocator.assign_and_notify(user, options.target).await?;
        let after = allocator.store().count_owned(user.id).await?;
        Ok((after - before).max(0) as usize)
    } else {
        let allocation = allocator.ensure_user_has_codes(user.id, options.target).await?;
        Ok(allocation.assigned())
    }
}

/// Runs one sweep if no other process is already running one.
///
/// Returns `None` when the lock is held elsewhere. The lock is released
/// whether or not the sweep succeeds; if this process dies it expires after
/// `lock_ttl`.
pub async fn run_locked<S, U, L>(ctx: &SweepContext<S, U, L>) -> Result<Option<SweepStats>, PromoError>
where
    S: PromoStore,
    U: UserDirectory,
    L: JobLock,
{
    let holder = Uuid::new_v4();
    if !ctx
        .lock
        .try_acquire(SWEEP_LOCK_NAME, holder, ctx.options.lock_ttl)
        .await?
    {
        tracing::debug!("Promo sweep already running elsewhere, skipping");
        return Ok(None);
    }

    let result = ensure_all_users(&*ctx.allocator, &ctx.users, &ctx.options).await;

    if let Err(e) = ctx.lock.release(SWEEP_LOCK_NAME, holder).await {
        tracing::warn!(error = %e, "Failed to release promo sweep lock");
    }

    result.map(Some)
}
