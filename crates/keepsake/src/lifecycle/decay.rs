//! Scheduled importance decay, archival and deletion
//!
//! A run walks the store in id order in three independent phases. Failures
//! inside a phase are counted and logged; a run never returns an error.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::clock::{Clock, SystemClock};
use crate::lifecycle::lock::{InMemoryLockProvider, LockProvider, lease_ttl};
use crate::memory::types::days_between;
use crate::memory::{Memory, MemoryScoring, Scorer, meta};
use crate::storage::{MemoryQuery, MemoryStore, QueryOrder};

/// Lease key shared by every decay runner
pub const DECAY_LOCK_KEY: &str = "decay";

/// Decay job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub enabled: bool,
    /// Fraction of importance lost per day at zero freshness (default: 0.01)
    pub decay_rate: f32,
    /// Floor decay never goes below (default: 0.1)
    pub min_importance: f32,
    pub batch_size: usize,
    /// Hard cap on pages per phase
    pub max_batches: usize,
    pub archive_importance_below: f32,
    pub archive_after_days: u32,
    pub delete_after_days: u32,
    pub lock_ttl_secs: u64,
    /// Share of the access-bonus gain folded into importance on each access
    pub access_reinforcement: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decay_rate: 0.01,
            min_importance: 0.1,
            batch_size: 100,
            max_batches: 100,
            archive_importance_below: 0.2,
            archive_after_days: 180,
            delete_after_days: 365,
            lock_ttl_secs: 600,
            access_reinforcement: 0.1,
        }
    }
}

/// Counters for one decay run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayResult {
    /// Disabled, or another runner held the lease
    pub skipped: bool,
    pub decayed: usize,
    pub archived: usize,
    /// Deleted for age and low importance
    pub deleted: usize,
    /// Deleted because `expires_at` passed
    pub expired: usize,
    pub errors: usize,
    pub batches: usize,
    pub duration_ms: u64,
}

impl DecayResult {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Counters for a batch of access records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessBatchResult {
    pub updated: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Access reinforcement seam used by recall
#[async_trait]
pub trait AccessTracker: Send + Sync {
    /// Returns false when the memory no longer exists
    async fn record_access(&self, id: Uuid) -> Result<bool>;

    async fn record_access_batch(&self, ids: &[Uuid]) -> AccessBatchResult {
        let mut result = AccessBatchResult::default();
        for id in ids {
            match self.record_access(*id).await {
                Ok(true) => result.updated += 1,
                Ok(false) => result.missing += 1,
                Err(e) => {
                    warn!("Failed to record access for {}: {}", id, e);
                    result.failed += 1;
                }
            }
        }
        result
    }
}

/// Tracker that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAccessTracker;

#[async_trait]
impl AccessTracker for NoopAccessTracker {
    async fn record_access(&self, _id: Uuid) -> Result<bool> {
        Ok(false)
    }
}

pub struct DecayEngine {
    store: Arc<dyn MemoryStore>,
    scorer: Arc<dyn MemoryScoring>,
    locks: Arc<dyn LockProvider>,
    clock: Arc<dyn Clock>,
    config: DecayConfig,
}

impl DecayEngine {
    pub fn new(store: Arc<dyn MemoryStore>, config: DecayConfig) -> Self {
        Self {
            store,
            scorer: Arc::new(Scorer::default()),
            locks: Arc::new(InMemoryLockProvider::new()),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn MemoryScoring>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_locks(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    /// Run all three phases under the decay lease
    pub async fn run(&self) -> DecayResult {
        if !self.config.enabled {
            info!("Decay disabled, skipping run");
            return DecayResult::skipped();
        }

        let ttl = lease_ttl(self.config.lock_ttl_secs);
        let lease = match self.locks.acquire(DECAY_LOCK_KEY, ttl).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                info!("Decay lease held elsewhere, skipping run");
                return DecayResult::skipped();
            }
            Err(e) => {
                error!("Failed to acquire decay lease: {}", e);
                return DecayResult {
                    errors: 1,
                    ..DecayResult::skipped()
                };
            }
        };

        let started = Instant::now();
        let now = self.clock.now();
        let mut result = DecayResult::default();

        self.decay_phase(now, &mut result).await;
        self.archive_phase(now, &mut result).await;
        self.delete_phase(now, &mut result).await;

        if let Err(e) = self.locks.release(&lease).await {
            warn!("Failed to release decay lease: {}", e);
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Decay run finished: {} decayed, {} archived, {} deleted, {} expired, {} errors in {}ms",
            result.decayed,
            result.archived,
            result.deleted,
            result.expired,
            result.errors,
            result.duration_ms
        );
        result
    }

    async fn page(&self, base: &MemoryQuery, cursor: Option<Uuid>) -> Result<Vec<Memory>> {
        let mut query = base
            .clone()
            .ordered_by(QueryOrder::Id)
            .with_limit(self.config.batch_size.max(1));
        if let Some(cursor) = cursor {
            query = query.after(cursor);
        }
        self.store.list(&query).await
    }

    async fn decay_phase(&self, now: DateTime<Utc>, result: &mut DecayResult) {
        let base = MemoryQuery::new().with_importance_above(self.config.min_importance);
        let mut cursor = None;

        for _ in 0..self.config.max_batches {
            let batch = match self.page(&base, cursor).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Decay phase failed to list memories: {}", e);
                    result.errors += 1;
                    return;
                }
            };
            let Some(last) = batch.last() else { return };
            cursor = Some(last.id);
            let full = batch.len() >= self.config.batch_size.max(1);
            result.batches += 1;

            for memory in batch {
                let id = memory.id;
                match self.decay_one(memory, now).await {
                    Ok(true) => result.decayed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to decay memory {}: {}", id, e);
                        result.errors += 1;
                    }
                }
            }

            if !full {
                return;
            }
        }
        warn!("Decay phase stopped at the batch cap");
    }

    async fn decay_one(&self, mut memory: Memory, now: DateTime<Utc>) -> Result<bool> {
        let Some(importance) = self.decayed_importance(&memory, now) else {
            return Ok(false);
        };

        debug!(
            "Decaying memory {}: {:.3} -> {:.3}",
            memory.id, memory.importance, importance
        );
        memory.set_importance(importance);
        memory.metadata.insert(
            meta::LAST_DECAYED_AT.to_string(),
            Value::String(now.to_rfc3339()),
        );
        self.store.update(&memory).await
    }

    /// New importance, or `None` when the change is too small to persist
    pub fn decayed_importance(&self, memory: &Memory, now: DateTime<Utc>) -> Option<f32> {
        let since = memory.last_decayed_at().unwrap_or(memory.created_at);
        let elapsed = days_between(since, now).min(1.0) as f32;
        let freshness = self.scorer.freshness(memory.created_at, now);

        let factor = self.config.decay_rate * (1.0 - freshness) * elapsed;
        let importance = (memory.importance * (1.0 - factor)).max(self.config.min_importance);

        ((importance - memory.importance).abs() > 0.001).then_some(importance)
    }

    async fn archive_phase(&self, now: DateTime<Utc>, result: &mut DecayResult) {
        let base = MemoryQuery::new()
            .with_importance_below(self.config.archive_importance_below)
            .created_before(now - Duration::days(i64::from(self.config.archive_after_days)))
            .with_archived(false);
        let mut cursor = None;

        for _ in 0..self.config.max_batches {
            let batch = match self.page(&base, cursor).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Archive phase failed to list memories: {}", e);
                    result.errors += 1;
                    return;
                }
            };
            let Some(last) = batch.last() else { return };
            cursor = Some(last.id);
            let full = batch.len() >= self.config.batch_size.max(1);
            result.batches += 1;

            for mut memory in batch {
                memory
                    .metadata
                    .insert(meta::ARCHIVED.to_string(), Value::Bool(true));
                memory.metadata.insert(
                    meta::ARCHIVED_AT.to_string(),
                    Value::String(now.to_rfc3339()),
                );
                match self.store.update(&memory).await {
                    Ok(true) => {
                        debug!("Archived memory {}", memory.id);
                        result.archived += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to archive memory {}: {}", memory.id, e);
                        result.errors += 1;
                    }
                }
            }

            if !full {
                return;
            }
        }
    }

    async fn delete_phase(&self, now: DateTime<Utc>, result: &mut DecayResult) {
        let stale = MemoryQuery::new()
            .created_before(now - Duration::days(i64::from(self.config.delete_after_days)))
            .with_importance_below(self.config.min_importance);
        let deleted = self.delete_matching(&stale, "stale", result).await;
        result.deleted += deleted;

        let expired = MemoryQuery::new().expired_before(now);
        let expired = self.delete_matching(&expired, "expired", result).await;
        result.expired += expired;
    }

    async fn delete_matching(
        &self,
        base: &MemoryQuery,
        reason: &str,
        result: &mut DecayResult,
    ) -> usize {
        let mut deleted = 0;
        let mut cursor = None;

        for _ in 0..self.config.max_batches {
            let batch = match self.page(base, cursor).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Delete phase failed to list {} memories: {}", reason, e);
                    result.errors += 1;
                    break;
                }
            };
            let Some(last) = batch.last() else { break };
            cursor = Some(last.id);
            let full = batch.len() >= self.config.batch_size.max(1);
            result.batches += 1;

            for memory in batch {
                match self.store.delete(memory.id).await {
                    Ok(true) => {
                        debug!("Deleted {} memory {}", reason, memory.id);
                        deleted += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to delete memory {}: {}", memory.id, e);
                        result.errors += 1;
                    }
                }
            }

            if !full {
                break;
            }
        }
        deleted
    }
}

#[async_trait]
impl AccessTracker for DecayEngine {
    async fn record_access(&self, id: Uuid) -> Result<bool> {
        let Some(mut memory) = self.store.get(id).await? else {
            return Ok(false);
        };

        let now = self.clock.now();
        let gain = self.scorer.access_bonus(memory.access_count.saturating_add(1))
            - self.scorer.access_bonus(memory.access_count);

        memory.mark_accessed(now);
        memory.set_importance(memory.importance + gain * self.config.access_reinforcement);
        self.store.update(&memory).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::clock::ManualClock;
    use crate::memory::MemoryType;
    use crate::storage::InMemoryStore;
    use crate::testing::aged_memory;

    struct Harness {
        engine: DecayEngine,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        now: DateTime<Utc>,
    }

    fn harness(config: DecayConfig) -> Harness {
        let now = Utc::now();
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let engine = DecayEngine::new(store.clone(), config).with_clock(clock.clone());
        Harness {
            engine,
            store,
            clock,
            now,
        }
    }

    async fn seed(store: &InMemoryStore, memory: &Memory) -> Uuid {
        store.insert(memory).await.unwrap();
        memory.id
    }

    mod runs {
        use super::*;

        #[tokio::test]
        async fn test_disabled_skips_without_touching_store() {
            let h = harness(DecayConfig {
                enabled: false,
                ..DecayConfig::default()
            });
            let id = seed(&h.store, &aged_memory("u1", MemoryType::Fact, "academic", "GPA: 3.80", 0.9, 60, h.now)).await;

            let result = h.engine.run().await;

            assert!(result.skipped);
            assert_eq!(result.batches, 0);
            assert_eq!(h.store.get(id).await.unwrap().unwrap().importance, 0.9);
        }

        #[tokio::test]
        async fn test_held_lease_skips() {
            let h = harness(DecayConfig::default());
            let locks = Arc::new(InMemoryLockProvider::new());
            locks
                .acquire(DECAY_LOCK_KEY, Duration::minutes(10))
                .await
                .unwrap()
                .unwrap();
            let engine = h.engine.with_locks(locks);

            assert!(engine.run().await.skipped);
        }

        #[tokio::test]
        async fn test_decay_lowers_old_memories_and_stamps() {
            let h = harness(DecayConfig::default());
            let id = seed(&h.store, &aged_memory("u1", MemoryType::Fact, "academic", "GPA: 3.80", 0.9, 60, h.now)).await;

            let result = h.engine.run().await;

            assert!(!result.skipped);
            assert_eq!(result.decayed, 1);
            let memory = h.store.get(id).await.unwrap().unwrap();
            assert!(memory.importance < 0.9);
            assert!(memory.importance > 0.89);
            assert_eq!(memory.last_decayed_at(), Some(h.now));
        }

        #[tokio::test]
        async fn test_second_immediate_run_updates_nothing() {
            let h = harness(DecayConfig::default());
            seed(&h.store, &aged_memory("u1", MemoryType::Fact, "academic", "GPA: 3.80", 0.9, 60, h.now)).await;

            assert_eq!(h.engine.run().await.decayed, 1);
            assert_eq!(h.engine.run().await.decayed, 0);

            h.clock.advance(Duration::days(1));
            assert_eq!(h.engine.run().await.decayed, 1);
        }

        #[tokio::test]
        async fn test_floor_is_respected() {
            let h = harness(DecayConfig {
                decay_rate: 0.9,
                ..DecayConfig::default()
            });
            let id = seed(&h.store, &aged_memory("u1", MemoryType::Fact, "academic", "x", 0.15, 200, h.now)).await;

            h.engine.run().await;

            let memory = h.store.get(id).await.unwrap().unwrap();
            assert_eq!(memory.importance, 0.1);

            // at the floor the memory is no longer paged
            h.clock.advance(Duration::days(1));
            assert_eq!(h.engine.run().await.decayed, 0);
        }

        #[tokio::test]
        async fn test_pagination_covers_every_memory() {
            let h = harness(DecayConfig {
                batch_size: 3,
                ..DecayConfig::default()
            });
            for i in 0..10 {
                let memory = aged_memory("u1", MemoryType::Fact, "academic", &format!("fact {i}"), 0.8, 90, h.now);
                seed(&h.store, &memory).await;
            }

            let result = h.engine.run().await;
            assert_eq!(result.decayed, 10);
        }

        #[tokio::test]
        async fn test_batch_cap_limits_work() {
            let h = harness(DecayConfig {
                batch_size: 2,
                max_batches: 2,
                ..DecayConfig::default()
            });
            for i in 0..10 {
                let memory = aged_memory("u1", MemoryType::Fact, "academic", &format!("fact {i}"), 0.8, 90, h.now);
                seed(&h.store, &memory).await;
            }

            assert_eq!(h.engine.run().await.decayed, 4);
        }
    }

    mod archive_and_delete {
        use super::*;

        #[tokio::test]
        async fn test_archive_flags_old_unimportant_once() {
            let h = harness(DecayConfig::default());
            let old = seed(&h.store, &aged_memory("u1", MemoryType::Feedback, "advice", "meh", 0.15, 200, h.now)).await;
            let recent = seed(&h.store, &aged_memory("u1", MemoryType::Feedback, "advice", "ok", 0.15, 10, h.now)).await;
            let valued = seed(&h.store, &aged_memory("u1", MemoryType::Fact, "academic", "SAT: 1500", 0.9, 200, h.now)).await;

            let result = h.engine.run().await;
            assert_eq!(result.archived, 1);

            let archived = h.store.get(old).await.unwrap().unwrap();
            assert!(archived.is_archived());
            let stamp = archived.metadata.get(meta::ARCHIVED_AT).cloned();
            assert!(!h.store.get(recent).await.unwrap().unwrap().is_archived());
            assert!(!h.store.get(valued).await.unwrap().unwrap().is_archived());

            h.clock.advance(Duration::days(1));
            assert_eq!(h.engine.run().await.archived, 0);
            let again = h.store.get(old).await.unwrap().unwrap();
            assert_eq!(again.metadata.get(meta::ARCHIVED_AT).cloned(), stamp);
        }

        #[tokio::test]
        async fn test_delete_removes_ancient_and_expired() {
            let h = harness(DecayConfig::default());
            let ancient = seed(&h.store, &aged_memory("u1", MemoryType::Feedback, "advice", "old", 0.05, 400, h.now)).await;
            let kept = seed(&h.store, &aged_memory("u1", MemoryType::Fact, "academic", "GPA: 3.9", 0.9, 400, h.now)).await;

            let mut expiring = aged_memory("u1", MemoryType::Feedback, "advice", "liked it", 0.5, 91, h.now);
            expiring.expires_at = Some(h.now - Duration::days(1));
            let expiring = seed(&h.store, &expiring).await;

            let result = h.engine.run().await;

            assert_eq!(result.deleted, 1);
            assert_eq!(result.expired, 1);
            assert!(h.store.get(ancient).await.unwrap().is_none());
            assert!(h.store.get(expiring).await.unwrap().is_none());
            assert!(h.store.get(kept).await.unwrap().is_some());
        }
    }

    mod access {
        use super::*;

        #[tokio::test]
        async fn test_record_access_reinforces() {
            let h = harness(DecayConfig::default());
            let id = seed(&h.store, &aged_memory("u1", MemoryType::Fact, "academic", "GPA: 3.80", 0.5, 5, h.now)).await;

            assert!(h.engine.record_access(id).await.unwrap());

            let memory = h.store.get(id).await.unwrap().unwrap();
            assert_eq!(memory.access_count, 1);
            assert_eq!(memory.last_accessed_at, Some(h.now));
            // bonus(1) - bonus(0) = 0.02, scaled by 0.1
            assert!((memory.importance - 0.502).abs() < 1e-5);
        }

        #[tokio::test]
        async fn test_record_access_caps_importance() {
            let h = harness(DecayConfig::default());
            let id = seed(&h.store, &aged_memory("u1", MemoryType::Fact, "academic", "x", 1.0, 5, h.now)).await;

            h.engine.record_access(id).await.unwrap();
            assert_eq!(h.store.get(id).await.unwrap().unwrap().importance, 1.0);
        }

        #[tokio::test]
        async fn test_missing_id_is_noop() {
            let h = harness(DecayConfig::default());
            assert!(!h.engine.record_access(Uuid::new_v4()).await.unwrap());
        }

        #[tokio::test]
        async fn test_batch_counts_missing() {
            let h = harness(DecayConfig::default());
            let id = seed(&h.store, &aged_memory("u1", MemoryType::Fact, "academic", "x", 0.5, 5, h.now)).await;

            let result = h.engine.record_access_batch(&[id, Uuid::new_v4(), id]).await;
            assert_eq!(result.updated, 2);
            assert_eq!(result.missing, 1);
            assert_eq!(h.store.get(id).await.unwrap().unwrap().access_count, 2);
        }

        #[tokio::test]
        async fn test_noop_tracker() {
            let result = NoopAccessTracker.record_access_batch(&[Uuid::new_v4()]).await;
            assert_eq!(result.missing, 1);
        }
    }
}
