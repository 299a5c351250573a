use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};

use super::promo_sweep::{self, SweepContext};
use crate::error::AppError;
use crate::repositories::{JobLock, PromoStore, UserDirectory};

static SWEEP_SCHEDULED: AtomicBool = AtomicBool::new(false);

/// Starts the periodic promo sweep. Only the first call in a process starts
/// a scheduler; later calls return `None`.
///
/// Overlap between processes is handled by the sweep's job lock, so every
/// worker can call this at boot.
pub async fn start_promo_sweep<S, U, L>(
    ctx: Arc<SweepContext<S, U, L>>,
    interval: Duration,
) -> Result<Option<JobScheduler>, AppError>
where
    S: PromoStore,
    U: UserDirectory,
    L: JobLock,
{
    if SWEEP_SCHEDULED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Promo sweep scheduler already started in this process");
        return Ok(None);
    }

    let scheduler = JobScheduler::new().await?;

    let job = Job::new_repeated_async(interval, move |_uuid, _scheduler| {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            match promo_sweep::run_locked(&*ctx).await {
                Ok(Some(stats)) => {
                    tracing::debug!(?stats, "Scheduled promo sweep finished");
                }
                Ok(None) => {}
                Err(e) if e.is_user_error() => {
                    tracing::warn!(error = %e, "Scheduled promo sweep rejected its settings");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Scheduled promo sweep failed");
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(
        interval_secs = interval.as_secs(),
        "Promo sweep scheduler started"
    );

    Ok(Some(scheduler))
}
