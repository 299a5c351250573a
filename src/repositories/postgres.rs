use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{JobLock, PromoStore, PromoTx, UserDirectory};
use crate::error::PromoError;
use crate::models::{NewPromoCode, PromoCode, User};

#[derive(Clone)]
pub struct PgPromoStore {
    pool: PgPool,
}

impl PgPromoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Promo transaction backed by a Postgres transaction.
///
/// Checkout code that commits an order together with a redemption writes the
/// order through [`PgPromoTx::transaction`] before calling `commit`.
pub struct PgPromoTx {
    tx: Transaction<'static, Postgres>,
}

impl PgPromoTx {
    pub fn transaction(&mut self) -> &mut Transaction<'static, Postgres> {
        &mut self.tx
    }
}

#[async_trait]
impl PromoStore for PgPromoStore {
    type Tx = PgPromoTx;

    async fn begin(&self) -> Result<PgPromoTx, PromoError> {
        let tx = self.pool.begin().await?;
        Ok(PgPromoTx { tx })
    }

    async fn count_owned(&self, owner: Uuid) -> Result<i64, PromoError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM promo_codes WHERE owner_id = $1
            "#,
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn owned_counts(&self, owners: &[Uuid]) -> Result<HashMap<Uuid, i64>, PromoError> {
        if owners.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, (Uuid, i64)>(
            r#"
            SELECT owner_id, COUNT(*)
            FROM promo_codes
            WHERE owner_id = ANY($1)
            GROUP BY owner_id
            "#,
        )
        .bind(owners)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn count_pool(&self) -> Result<i64, PromoError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM promo_codes WHERE owner_id IS NULL AND used = FALSE
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_owned_unused(&self, owner: Uuid) -> Result<Vec<PromoCode>, PromoError> {
        let codes = sqlx::query_as::<_, PromoCode>(
            r#"
            SELECT * FROM promo_codes
            WHERE owner_id = $1 AND used = FALSE
            ORDER BY created_at DESC, seq DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    async fn latest_owned(&self, owner: Uuid) -> Result<Option<PromoCode>, PromoError> {
        let code = sqlx::query_as::<_, PromoCode>(
            r#"
            SELECT * FROM promo_codes
            WHERE owner_id = $1
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        Ok(code)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<PromoCode>, PromoError> {
        let code = sqlx::query_as::<_, PromoCode>(
            r#"
            SELECT * FROM promo_codes WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(code)
    }

    async fn insert_batch(&self, codes: &[NewPromoCode]) -> Result<u64, PromoError> {
        if codes.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO promo_codes (code, discount_percent, owner_id) ");
        builder.push_values(codes, |mut row, code| {
            row.push_bind(&code.code)
                .push_bind(code.discount_percent)
                .push_bind(code.owner_id);
        });
        builder.push(" ON CONFLICT (code) DO NOTHING");

        let result = builder.build().execute(&self.pool).await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PromoTx for PgPromoTx {
    async fn claim_unassigned(
        &mut self,
        owner: Uuid,
        limit: i64,
    ) -> Result<Vec<PromoCode>, PromoError> {
        let claimed = sqlx::query_as::<_, PromoCode>(
            r#"
            WITH picked AS (
                SELECT id FROM promo_codes
                WHERE owner_id IS NULL AND used = FALSE
                ORDER BY created_at ASC, seq ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            ), claimed AS (
                UPDATE promo_codes AS p
                SET owner_id = $1, updated_at = NOW()
                FROM picked
                WHERE p.id = picked.id
                RETURNING p.*
            )
            SELECT * FROM claimed ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(owner)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(claimed)
    }

    async fn insert_code(&mut self, code: &NewPromoCode) -> Result<Option<PromoCode>, PromoError> {
        let inserted = sqlx::query_as::<_, PromoCode>(
            r#"
            INSERT INTO promo_codes (code, discount_percent, owner_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&code.code)
        .bind(code.discount_percent)
        .bind(code.owner_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(inserted)
    }

    async fn redeem(
        &mut self,
        code: &str,
        requester: Option<Uuid>,
    ) -> Result<Option<PromoCode>, PromoError> {
        // A concurrent redeemer waits on the row lock, then re-checks
        // `used = FALSE` and updates nothing.
        let redeemed = sqlx::query_as::<_, PromoCode>(
            r#"
            UPDATE promo_codes
            SET used = TRUE,
                owner_id = COALESCE(owner_id, $2),
                updated_at = NOW()
            WHERE code = $1
              AND used = FALSE
              AND (owner_id IS NULL OR owner_id = $2)
            RETURNING *
            "#,
        )
        .bind(code)
        .bind(requester)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(redeemed)
    }

    async fn commit(self) -> Result<(), PromoError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn list_after(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<User>, PromoError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email FROM users
            WHERE $1::uuid IS NULL OR id > $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}

#[derive(Clone)]
pub struct PgJobLock {
    pool: PgPool,
}

impl PgJobLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobLock for PgJobLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<bool, PromoError> {
        // Upsert only wins over an expired holder
        let acquired = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO job_locks (name, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (name) DO UPDATE
            SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
            WHERE job_locks.expires_at <= NOW()
            RETURNING holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.is_some())
    }

    async fn release(&self, name: &str, holder: Uuid) -> Result<(), PromoError> {
        sqlx::query(
            r#"
            DELETE FROM job_locks WHERE name = $1 AND holder = $2
            "#,
        )
        .bind(name)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
