//! Durable FIFO queue of not-yet-uploaded submissions.
//!
//! Writes that cannot reach the network are parked here and drained by the
//! sync manager once connectivity returns. Records persist through the
//! [`CacheStore`] (kind `PendingSubmission`, no TTL) under keys that embed
//! a monotonic sequence number, so enqueue order survives a restart.
//!
//! An item leaves the active queue only on confirmed upload or after its
//! fourth failed attempt, at which point it moves to the dead-letter store
//! (parked, not deleted) for manual recovery or
//! [`requeue_dead_lettered`](PendingSubmissionQueue::requeue_dead_lettered).

use crate::alert::AlertDraft;
use crate::cache::{unix_millis, CacheKind, CachePayload, CacheStore};
use crate::error::Result;
use crate::key::QueryKeyBuilder;
use crate::storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Failures tolerated before a submission is dead-lettered.
/// The record is parked once `retry_count` exceeds this.
const MAX_RETRY_COUNT: u32 = 3;

/// Dead-letter store bounds: oldest records beyond either limit are
/// deleted for good.
const DEAD_LETTER_MAX_ENTRIES: usize = 50;
const DEAD_LETTER_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Where a queued submission currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    /// Awaiting upload on the active queue
    Pending,
    /// Retry budget exhausted; parked in the dead-letter store
    DeadLettered,
}

/// A locally-created write awaiting delivery to the remote service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    /// Locally-generated provisional id (also handed to the caller)
    pub id: String,
    pub payload: AlertDraft,
    /// Unix epoch milliseconds when the write was enqueued
    pub created_at_ms: u64,
    /// Failed upload attempts so far
    pub retry_count: u32,
    pub status: SubmissionStatus,
}

/// Result of one [`PendingSubmissionQueue::drain_one`] cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum DrainOutcome {
    /// Nothing to drain
    Empty,
    /// Head uploaded and removed; carries the server-assigned id
    Uploaded(String),
    /// Head failed and stays at the head for the next cycle
    Retried { retry_count: u32 },
    /// Head exhausted its retry budget and moved to dead-letter
    DeadLettered,
}

struct Slot {
    key: String,
    submission: PendingSubmission,
}

#[derive(Default)]
struct QueueState {
    active: VecDeque<Slot>,
    dead: Vec<Slot>,
}

/// Durable FIFO of pending submissions, persisted through the cache.
pub struct PendingSubmissionQueue<S: StorageBackend> {
    cache: Arc<CacheStore<S>>,
    state: Mutex<QueueState>,
    next_seq: AtomicU64,
    /// Serializes drain cycles: one in-flight upload at a time preserves
    /// order and prevents duplicate submissions.
    drain_lock: tokio::sync::Mutex<()>,
}

impl<S: StorageBackend> PendingSubmissionQueue<S> {
    pub fn new(cache: Arc<CacheStore<S>>) -> Self {
        PendingSubmissionQueue {
            cache,
            state: Mutex::new(QueueState::default()),
            next_seq: AtomicU64::new(1),
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Rebuild queue order from persisted records.
    ///
    /// Call after [`CacheStore::open`]. Returns the number of active
    /// records restored. Dead-letter records past their age bound are
    /// pruned here.
    pub async fn open(&self) -> usize {
        let mut entries = self.cache.entries_of_kind(CacheKind::PendingSubmission).await;
        // Keys embed a zero-padded sequence, so ascending key order is
        // enqueue order.
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut max_seq = 0u64;
        let mut restored = 0usize;
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.active.clear();
            state.dead.clear();

            for (key, payload) in entries {
                let CachePayload::PendingSubmission(submission) = payload else {
                    continue;
                };
                if let Some(seq) = Self::parse_seq(&key) {
                    max_seq = max_seq.max(seq);
                }
                let slot = Slot { key, submission };
                match slot.submission.status {
                    SubmissionStatus::Pending => {
                        state.active.push_back(slot);
                        restored += 1;
                    }
                    SubmissionStatus::DeadLettered => state.dead.push(slot),
                }
            }
        }
        self.next_seq.store(max_seq + 1, Ordering::SeqCst);

        let pruned = self.prune_dead_letter().await;
        info!(
            "✓ Submission queue opened: {} active, {} dead-lettered ({} pruned)",
            restored,
            self.dead_letter_len(),
            pruned
        );
        restored
    }

    /// Append a write to the tail of the queue.
    ///
    /// Returns the locally-generated provisional id the caller should
    /// treat as the submission's identity until upload confirms a server
    /// id.
    ///
    /// # Errors
    /// Returns `Err` if the record cannot be persisted
    pub async fn enqueue(&self, payload: AlertDraft) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let key = QueryKeyBuilder::submission_key(seq, &id);

        let submission = PendingSubmission {
            id: id.clone(),
            payload,
            created_at_ms: unix_millis(),
            retry_count: 0,
            status: SubmissionStatus::Pending,
        };

        self.cache
            .put(
                &key,
                CachePayload::PendingSubmission(submission.clone()),
                None,
            )
            .await?;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.active.push_back(Slot { key, submission });
        info!("✓ Submission {} enqueued ({} waiting)", id, state.active.len());
        Ok(id)
    }

    /// Attempt to upload the head of the queue.
    ///
    /// Strictly one item per cycle, serialized across callers. On upload
    /// success the record is removed; on failure `retry_count` is bumped
    /// and the item stays at the head, moving to dead-letter once the
    /// budget is exhausted.
    pub async fn drain_one<F, Fut>(&self, upload: F) -> DrainOutcome
    where
        F: FnOnce(PendingSubmission) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let _guard = self.drain_lock.lock().await;

        let head = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .active
                .front()
                .map(|slot| (slot.key.clone(), slot.submission.clone()))
        };
        let Some((key, submission)) = head else {
            return DrainOutcome::Empty;
        };

        match upload(submission.clone()).await {
            Ok(remote_id) => {
                if let Err(e) = self.cache.delete(&key).await {
                    warn!("⚠ Uploaded submission {} but delete failed: {}", submission.id, e);
                }
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.active.pop_front();
                info!(
                    "✓ Submission {} uploaded as {} ({} remaining)",
                    submission.id,
                    remote_id,
                    state.active.len()
                );
                DrainOutcome::Uploaded(remote_id)
            }
            Err(e) => {
                let mut updated = submission.clone();
                updated.retry_count += 1;

                if updated.retry_count > MAX_RETRY_COUNT {
                    warn!(
                        "⚠ Submission {} dead-lettered after {} attempts: {}",
                        updated.id, updated.retry_count, e
                    );
                    updated.status = SubmissionStatus::DeadLettered;
                    self.persist(&key, &updated).await;
                    {
                        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                        state.active.pop_front();
                        state.dead.push(Slot {
                            key,
                            submission: updated,
                        });
                    }
                    self.enforce_dead_letter_cap().await;
                    DrainOutcome::DeadLettered
                } else {
                    debug!(
                        "✗ Submission {} upload failed (attempt {}): {}",
                        updated.id, updated.retry_count, e
                    );
                    self.persist(&key, &updated).await;
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(slot) = state.active.front_mut() {
                        slot.submission = updated.clone();
                    }
                    DrainOutcome::Retried {
                        retry_count: updated.retry_count,
                    }
                }
            }
        }
    }

    /// Move every dead-lettered record back onto the active queue with a
    /// fresh retry budget. Returns how many were reactivated.
    pub async fn requeue_dead_lettered(&self) -> usize {
        let dead: Vec<Slot> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.dead.drain(..).collect()
        };

        let mut requeued = 0;
        for slot in dead {
            let mut submission = slot.submission;
            submission.retry_count = 0;
            submission.status = SubmissionStatus::Pending;

            // Re-key with a fresh sequence number so the record joins the
            // tail consistently in memory and across restarts.
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let new_key = QueryKeyBuilder::submission_key(seq, &submission.id);
            let _ = self.cache.delete(&slot.key).await;
            self.persist(&new_key, &submission).await;

            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.active.push_back(Slot {
                key: new_key,
                submission,
            });
            requeued += 1;
        }

        if requeued > 0 {
            info!("✓ Requeued {} dead-lettered submissions", requeued);
        }
        requeued
    }

    /// Delete dead-letter records past the age bound. Returns how many
    /// were removed.
    pub async fn prune_dead_letter(&self) -> usize {
        let cutoff = unix_millis().saturating_sub(DEAD_LETTER_MAX_AGE.as_millis() as u64);
        let stale: Vec<Slot> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let (stale, keep): (Vec<Slot>, Vec<Slot>) = state
                .dead
                .drain(..)
                .partition(|slot| slot.submission.created_at_ms < cutoff);
            state.dead = keep;
            stale
        };

        for slot in &stale {
            let _ = self.cache.delete(&slot.key).await;
        }
        stale.len()
    }

    /// Number of submissions waiting on the active queue.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of parked dead-letter records.
    pub fn dead_letter_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dead
            .len()
    }

    /// Snapshot of the active queue, head first.
    pub fn pending(&self) -> Vec<PendingSubmission> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
            .iter()
            .map(|slot| slot.submission.clone())
            .collect()
    }

    /// Snapshot of the dead-letter store.
    pub fn dead_lettered(&self) -> Vec<PendingSubmission> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dead
            .iter()
            .map(|slot| slot.submission.clone())
            .collect()
    }

    async fn persist(&self, key: &str, submission: &PendingSubmission) {
        if let Err(e) = self
            .cache
            .put(
                key,
                CachePayload::PendingSubmission(submission.clone()),
                None,
            )
            .await
        {
            // The in-memory queue still has the record; only restart
            // durability is degraded.
            warn!("⚠ Failed to persist submission {}: {}", submission.id, e);
        }
    }

    /// Evict oldest dead-letter records beyond the size cap.
    async fn enforce_dead_letter_cap(&self) {
        loop {
            let evicted = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.dead.len() > DEAD_LETTER_MAX_ENTRIES {
                    Some(state.dead.remove(0))
                } else {
                    None
                }
            };
            match evicted {
                Some(slot) => {
                    warn!(
                        "⚠ Dead-letter store full, dropping oldest submission {}",
                        slot.submission.id
                    );
                    let _ = self.cache.delete(&slot.key).await;
                }
                None => break,
            }
        }
    }

    fn parse_seq(key: &str) -> Option<u64> {
        let parts = QueryKeyBuilder::parse(key);
        parts.get(1).and_then(|s| s.parse().ok())
    }
}
