use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use promopool::config::Config;
use promopool::db;
use promopool::error::{self, AppError};
use promopool::jobs::promo_sweep::{self, SweepContext, SweepOptions};
use promopool::jobs::scheduler;
use promopool::repositories::{PgJobLock, PgPromoStore, PgUserDirectory};
use promopool::services::code_generator::RandomCodeSource;
use promopool::services::notifier::{HttpNotifier, LogNotifier, Notifier};
use promopool::services::promo_allocator::PromoAllocator;

#[derive(Parser)]
#[command(name = "promopool", about = "Promo code pool allocator", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the periodic promo sweep until interrupted
    Serve,
    /// Pre-mint unassigned promo codes into the pool
    Seed {
        #[arg(long, default_value_t = 1000)]
        count: u64,
    },
    /// Top every user up once, then exit
    Ensure {
        #[arg(long)]
        send_email: bool,
        #[arg(long)]
        batch_size: Option<i64>,
        #[arg(long)]
        target: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promopool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    run(cli).await?;

    Ok(())
}

async fn run(cli: Cli) -> error::Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let notifier = build_notifier(&config)?;
    let codes = Arc::new(RandomCodeSource::new(
        config.code_length,
        config.discount_min,
        config.discount_max,
    )?);
    let allocator = Arc::new(
        PromoAllocator::new(PgPromoStore::new(pool.clone()), codes, notifier)
            .with_max_mint_attempts(config.mint_max_attempts)
            .with_onboarding_target(config.onboarding_target),
    );

    let options = SweepOptions {
        target: config.sweep_target,
        batch_size: config.sweep_batch_size,
        send_email: config.sweep_send_email,
        lock_ttl: config.sweep_lock_ttl(),
    };

    match cli.command {
        Command::Serve => {
            let ctx = Arc::new(SweepContext {
                allocator,
                users: PgUserDirectory::new(pool.clone()),
                lock: PgJobLock::new(pool.clone()),
                options,
            });

            let running = scheduler::start_promo_sweep(ctx, config.sweep_interval()).await?;

            shutdown_signal().await;

            if let Some(mut running) = running {
                running.shutdown().await.map_err(AppError::from)?;
            }
        }
        Command::Seed { count } => {
            let created = allocator.seed_pool(count).await?;
            tracing::info!(created, "Seeding finished");
        }
        Command::Ensure {
            send_email,
            batch_size,
            target,
        } => {
            let options = SweepOptions {
                target: target.unwrap_or(options.target),
                batch_size: batch_size.unwrap_or(options.batch_size),
                send_email,
                ..options
            };
            let users = PgUserDirectory::new(pool.clone());
            let stats = promo_sweep::ensure_all_users(&*allocator, &users, &options).await?;
            tracing::info!(
                processed = stats.processed,
                topped_up = stats.topped_up,
                "Processed users"
            );
        }
    }

    pool.close().await;
    Ok(())
}

fn build_notifier(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.notifier_url {
        Some(url) => {
            let endpoint = Url::parse(url)?;
            tracing::info!(endpoint = %endpoint, "Using HTTP mail relay for promo notifications");
            let notifier = HttpNotifier::new(
                endpoint,
                config.notifier_token.clone(),
                config.notifier_timeout(),
            )?;
            Ok(Arc::new(notifier))
        }
        None => {
            tracing::warn!("NOTIFIER_URL not set, promo notifications will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, cleaning up...");
}
