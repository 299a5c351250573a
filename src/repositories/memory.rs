//! In-process stores with the same transactional contract as the Postgres
//! ones. A transaction's changes are staged on the rows it touches and those
//! rows count as locked until it commits or is dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{JobLock, PromoStore, PromoTx, UserDirectory};
use crate::error::PromoError;
use crate::models::{NewPromoCode, PromoCode, User};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Staged {
    tx: u64,
    row: PromoCode,
}

struct Row {
    committed: Option<PromoCode>, // None for a row inserted by an open transaction
    staged: Option<Staged>,
}

impl Row {
    fn code(&self) -> Option<&str> {
        self.committed
            .as_ref()
            .or(self.staged.as_ref().map(|s| &s.row))
            .map(|c| c.code.as_str())
    }
}

#[derive(Default)]
struct PoolState {
    rows: Vec<Row>,
    last_created: Option<DateTime<Utc>>,
}

impl PoolState {
    /// Strictly increasing creation times keep FIFO order well defined.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_created {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_created = Some(now);
        now
    }

    fn committed(&self) -> impl Iterator<Item = &PromoCode> {
        self.rows.iter().filter_map(|row| row.committed.as_ref())
    }

    fn contains_code(&self, code: &str) -> bool {
        self.rows.iter().any(|row| row.code() == Some(code))
    }

    fn build(&mut self, code: &NewPromoCode) -> PromoCode {
        let now = self.next_timestamp();
        PromoCode {
            id: Uuid::new_v4(),
            code: code.code.clone(),
            discount_percent: code.discount_percent,
            owner_id: code.owner_id,
            used: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPromoStore {
    state: Arc<Mutex<PoolState>>,
    next_tx: Arc<AtomicU64>,
}

impl InMemoryPromoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct InMemoryPromoTx {
    id: u64,
    state: Arc<Mutex<PoolState>>,
    open: bool,
}

impl InMemoryPromoTx {
    fn finish(&mut self, apply: bool) {
        let mut state = lock(&self.state);
        let id = self.id;
        state.rows.retain_mut(|row| match row.staged.take() {
            Some(staged) if staged.tx == id => {
                if apply {
                    row.committed = Some(staged.row);
                }
                row.committed.is_some()
            }
            other => {
                row.staged = other;
                true
            }
        });
        self.open = false;
    }
}

impl Drop for InMemoryPromoTx {
    fn drop(&mut self) {
        if self.open {
            self.finish(false);
        }
    }
}

#[async_trait]
impl PromoStore for InMemoryPromoStore {
    type Tx = InMemoryPromoTx;

    async fn begin(&self) -> Result<InMemoryPromoTx, PromoError> {
        Ok(InMemoryPromoTx {
            id: self.next_tx.fetch_add(1, Ordering::Relaxed),
            state: Arc::clone(&self.state),
            open: true,
        })
    }

    async fn count_owned(&self, owner: Uuid) -> Result<i64, PromoError> {
        let state = lock(&self.state);
        Ok(state.committed().filter(|c| c.owner_id == Some(owner)).count() as i64)
    }

    async fn owned_counts(&self, owners: &[Uuid]) -> Result<HashMap<Uuid, i64>, PromoError> {
        let state = lock(&self.state);
        let mut counts = HashMap::new();
        for owner in state.committed().filter_map(|c| c.owner_id) {
            if owners.contains(&owner) {
                *counts.entry(owner).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn count_pool(&self) -> Result<i64, PromoError> {
        let state = lock(&self.state);
        Ok(state.committed().filter(|c| c.is_in_pool()).count() as i64)
    }

    async fn list_owned_unused(&self, owner: Uuid) -> Result<Vec<PromoCode>, PromoError> {
        let state = lock(&self.state);
        let mut codes: Vec<PromoCode> = state
            .committed()
            .filter(|c| c.owner_id == Some(owner) && !c.used)
            .cloned()
            .collect();
        codes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(codes)
    }

    async fn latest_owned(&self, owner: Uuid) -> Result<Option<PromoCode>, PromoError> {
        let state = lock(&self.state);
        let latest = state
            .committed()
            .filter(|c| c.owner_id == Some(owner))
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned();
        Ok(latest)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<PromoCode>, PromoError> {
        let state = lock(&self.state);
        let found = state.committed().find(|c| c.code == code).cloned();
        Ok(found)
    }

    async fn insert_batch(&self, codes: &[NewPromoCode]) -> Result<u64, PromoError> {
        let mut state = lock(&self.state);
        let mut inserted = 0;
        for code in codes {
            if state.contains_code(&code.code) {
                continue;
            }
            let row = state.build(code);
            state.rows.push(Row {
                committed: Some(row),
                staged: None,
            });
            inserted += 1;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl PromoTx for InMemoryPromoTx {
    async fn claim_unassigned(
        &mut self,
        owner: Uuid,
        limit: i64,
    ) -> Result<Vec<PromoCode>, PromoError> {
        let mut state = lock(&self.state);

        let mut candidates: Vec<(DateTime<Utc>, Uuid, usize)> = state
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.staged.is_none())
            .filter_map(|(index, row)| row.committed.as_ref().map(|c| (index, c)))
            .filter(|(_, c)| c.is_in_pool())
            .map(|(index, c)| (c.created_at, c.id, index))
            .collect();
        candidates.sort();
        candidates.truncate(limit.max(0) as usize);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, _, index) in candidates {
            let row = &mut state.rows[index];
            if let Some(mut staged) = row.committed.clone() {
                staged.owner_id = Some(owner);
                staged.updated_at = now;
                row.staged = Some(Staged {
                    tx: self.id,
                    row: staged.clone(),
                });
                claimed.push(staged);
            }
        }

        Ok(claimed)
    }

    async fn insert_code(&mut self, code: &NewPromoCode) -> Result<Option<PromoCode>, PromoError> {
        let mut state = lock(&self.state);
        if state.contains_code(&code.code) {
            return Ok(None);
        }

        let row = state.build(code);
        state.rows.push(Row {
            committed: None,
            staged: Some(Staged {
                tx: self.id,
                row: row.clone(),
            }),
        });

        Ok(Some(row))
    }

    async fn redeem(
        &mut self,
        code: &str,
        requester: Option<Uuid>,
    ) -> Result<Option<PromoCode>, PromoError> {
        let mut state = lock(&self.state);
        let Some(row) = state.rows.iter_mut().find(|row| row.code() == Some(code)) else {
            return Ok(None);
        };

        // Rows held by another transaction fail fast instead of waiting
        let current = match (&row.staged, &row.committed) {
            (Some(staged), _) if staged.tx == self.id => staged.row.clone(),
            (Some(_), _) => return Ok(None),
            (None, Some(committed)) => committed.clone(),
            (None, None) => return Ok(None),
        };

        if !current.is_redeemable_by(requester) {
            return Ok(None);
        }

        let mut redeemed = current;
        redeemed.used = true;
        redeemed.owner_id = redeemed.owner_id.or(requester);
        redeemed.updated_at = Utc::now();
        row.staged = Some(Staged {
            tx: self.id,
            row: redeemed.clone(),
        });

        Ok(Some(redeemed))
    }

    async fn commit(mut self) -> Result<(), PromoError> {
        self.finish(true);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<Mutex<Vec<User>>>,
}

impl InMemoryUserDirectory {
    pub fn new(users: Vec<User>) -> Self {
        Self {
            users: Arc::new(Mutex::new(users)),
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn list_after(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<User>, PromoError> {
        let mut users: Vec<User> = lock(&self.users)
            .iter()
            .filter(|u| after.map_or(true, |after| u.id > after))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        users.truncate(limit.max(0) as usize);
        Ok(users)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryJobLock {
    held: Arc<Mutex<HashMap<String, (Uuid, Instant)>>>,
}

impl InMemoryJobLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobLock for InMemoryJobLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<bool, PromoError> {
        let mut held = lock(&self.held);
        let now = Instant::now();
        if let Some((_, expires_at)) = held.get(name) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        held.insert(name.to_string(), (holder, now + ttl));
        Ok(true)
    }

    async fn release(&self, name: &str, holder: Uuid) -> Result<(), PromoError> {
        let mut held = lock(&self.held);
        if held.get(name).is_some_and(|(current, _)| *current == holder) {
            held.remove(name);
        }
        Ok(())
    }
}
