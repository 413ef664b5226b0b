//! Pending-write queue with demand-driven, single-flight synchronization.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::record::RecordCache;
use super::storage::{read_json, write_json, KeySpace, KeyValueStore};
use super::traits::{Cacheable, MutableSource};

/// Synced entries kept around for bookkeeping.
const HISTORY_LIMIT: usize = 16;

/// A local mutation not yet acknowledged by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite<U> {
  pub data: U,
  pub enqueued_at: DateTime<Utc>,
  pub synced: bool,
  /// Monotonic per queue, tells a resent entry from a newer one
  pub seq: u64,
}

/// Queue holding at most one unsynced write plus synced history.
#[derive(Debug, Clone)]
pub struct PendingQueue<U> {
  unsynced: Option<PendingWrite<U>>,
  history: Vec<PendingWrite<U>>,
  next_seq: u64,
}

impl<U: Clone> PendingQueue<U> {
  pub fn new() -> Self {
    Self {
      unsynced: None,
      history: Vec::new(),
      next_seq: 1,
    }
  }

  /// Replace any unsynced entry with `data`.
  pub fn enqueue(&mut self, data: U) -> &PendingWrite<U> {
    let write = PendingWrite {
      data,
      enqueued_at: Utc::now(),
      synced: false,
      seq: self.next_seq,
    };
    self.next_seq += 1;
    self.unsynced.insert(write)
  }

  pub fn unsynced(&self) -> Option<&PendingWrite<U>> {
    self.unsynced.as_ref()
  }

  pub fn history(&self) -> &[PendingWrite<U>] {
    &self.history
  }

  /// Mark the entry with `seq` synced. Returns false if it was superseded.
  fn acknowledge(&mut self, seq: u64) -> bool {
    match self.unsynced.take() {
      Some(mut write) if write.seq == seq => {
        write.synced = true;
        self.history.push(write);
        if self.history.len() > HISTORY_LIMIT {
          let excess = self.history.len() - HISTORY_LIMIT;
          self.history.drain(..excess);
        }
        true
      }
      other => {
        self.unsynced = other;
        false
      }
    }
  }

  fn restore(&mut self, write: PendingWrite<U>) {
    self.next_seq = self.next_seq.max(write.seq + 1);
    self.unsynced = Some(write);
  }

  pub fn prune_history(&mut self) {
    self.history.clear();
  }

  /// Drop the unsynced entry and all history.
  ///
  /// Sequence numbers keep counting, so a push already in flight can't
  /// acknowledge anything queued afterwards.
  pub fn clear(&mut self) {
    self.unsynced = None;
    self.prune_history();
  }
}

impl<U: Clone> Default for PendingQueue<U> {
  fn default() -> Self {
    Self::new()
  }
}

/// What a sync attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  NothingPending,
  /// Another push was in flight; this call did nothing
  AlreadySyncing,
  Pushed,
  /// The write stays queued for the next sync point
  Failed,
}

impl SyncOutcome {
  pub fn is_ok(self) -> bool {
    self != SyncOutcome::Failed
  }
}

/// Resets the syncing flag on every exit path.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Background synchronization for one mutable record type.
///
/// Local edits collapse into a single pending write which is pushed at
/// explicit sync points. At most one push is in flight; a concurrent call
/// returns immediately without touching the network.
pub struct BackgroundSync<S: MutableSource> {
  source: Arc<S>,
  cache: RecordCache<S>,
  store: Arc<dyn KeyValueStore>,
  pending_key: String,
  queue: Mutex<PendingQueue<S::Update>>,
  syncing: AtomicBool,
}

impl<S: MutableSource> BackgroundSync<S> {
  pub fn new(
    source: Arc<S>,
    cache: RecordCache<S>,
    store: Arc<dyn KeyValueStore>,
    keys: &KeySpace,
  ) -> Self {
    Self {
      source,
      cache,
      store,
      pending_key: keys.pending(S::Record::namespace()),
      queue: Mutex::new(PendingQueue::new()),
      syncing: AtomicBool::new(false),
    }
  }

  /// Reload an unsynced write persisted by an earlier process.
  pub async fn restore(&self) {
    let Some(write) = read_json::<PendingWrite<S::Update>>(self.store.as_ref(), &self.pending_key).await
    else {
      return;
    };
    if write.synced {
      return;
    }

    match self.queue.lock() {
      Ok(mut queue) => {
        if queue.unsynced().is_none() {
          debug!(seq = write.seq, "Restored pending write");
          queue.restore(write);
        }
      }
      Err(e) => warn!(error = %e, "Pending queue lock poisoned"),
    }
  }

  fn lock_queue(&self) -> Result<std::sync::MutexGuard<'_, PendingQueue<S::Update>>> {
    self
      .queue
      .lock()
      .map_err(|e| eyre!("Pending queue lock poisoned: {}", e))
  }

  /// Queue a local mutation, superseding any unsynced one.
  pub async fn enqueue(&self, update: S::Update) {
    let write = match self.lock_queue() {
      Ok(mut queue) => queue.enqueue(update).clone(),
      Err(e) => {
        warn!(error = %e, "Dropping local update");
        return;
      }
    };

    debug!(
      namespace = S::Record::namespace(),
      seq = write.seq,
      "Queued local update"
    );
    self.persist(Some(&write)).await;
  }

  async fn persist(&self, write: Option<&PendingWrite<S::Update>>) {
    let result = match write {
      Some(write) => write_json(self.store.as_ref(), &self.pending_key, write).await,
      None => self.store.remove(&self.pending_key).await,
    };
    if let Err(e) = result {
      warn!(key = %self.pending_key, error = %e, "Failed to persist pending write");
    }
  }

  pub fn has_pending(&self) -> bool {
    self
      .lock_queue()
      .map(|q| q.unsynced().is_some())
      .unwrap_or(false)
  }

  /// Data of the unsynced write, if any.
  pub fn pending(&self) -> Option<S::Update> {
    self
      .lock_queue()
      .ok()
      .and_then(|q| q.unsynced().map(|w| w.data.clone()))
  }

  #[cfg(test)]
  pub fn is_syncing(&self) -> bool {
    self.syncing.load(Ordering::Acquire)
  }

  /// Number of synced entries retained for bookkeeping.
  pub fn history_len(&self) -> usize {
    self.lock_queue().map(|q| q.history().len()).unwrap_or(0)
  }

  pub fn prune_history(&self) {
    if let Ok(mut queue) = self.lock_queue() {
      queue.prune_history();
    }
  }

  /// Forget the unsynced write and history held in memory.
  ///
  /// The persisted write lives under the record's namespace keys, which the
  /// caller removes together with the rest of the namespace.
  pub fn clear(&self) {
    match self.lock_queue() {
      Ok(mut queue) => queue.clear(),
      Err(e) => warn!(error = %e, "Cannot clear pending queue"),
    }
  }

  /// Push the most recent unsynced write to the server.
  ///
  /// Returns `true` when there was nothing to do, another sync was already
  /// running, or the push succeeded. A failed push leaves the write queued
  /// for the next sync point.
  pub async fn attempt_sync(&self) -> bool {
    self.push().await.is_ok()
  }

  /// Push the most recent unsynced write and report what happened.
  pub async fn push(&self) -> SyncOutcome {
    let namespace = S::Record::namespace();

    if self
      .syncing
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!(namespace, "Sync already in flight");
      return SyncOutcome::AlreadySyncing;
    }
    let _guard = SyncingGuard(&self.syncing);

    let write = match self.lock_queue() {
      Ok(queue) => queue.unsynced().cloned(),
      Err(e) => {
        warn!(namespace, error = %e, "Cannot read pending queue");
        return SyncOutcome::Failed;
      }
    };
    let Some(write) = write else {
      return SyncOutcome::NothingPending;
    };

    info!(namespace, seq = write.seq, "Syncing local update");
    match self.source.mutate(&write.data).await {
      Ok(fetched) => {
        let still_current = match self.lock_queue() {
          Ok(mut queue) => queue.acknowledge(write.seq),
          Err(e) => {
            warn!(namespace, error = %e, "Cannot acknowledge pending write");
            false
          }
        };
        if still_current {
          self.persist(None).await;
        } else {
          debug!(namespace, "Newer update queued during sync, keeping it");
        }

        if let Err(e) = self.cache.writeback(fetched.payload, fetched.timestamp).await {
          warn!(namespace, error = %e, "Failed to store sync response");
        }
        SyncOutcome::Pushed
      }
      Err(e) => {
        warn!(namespace, error = %e, "Sync failed, update stays queued");
        SyncOutcome::Failed
      }
    }
  }

  /// Sync right away; used at explicit sync points.
  pub async fn force_sync_now(&self) -> bool {
    self.attempt_sync().await
  }

  /// Sync only if an unsynced write exists.
  pub async fn sync_if_pending(&self) -> bool {
    if !self.has_pending() {
      return true;
    }
    self.attempt_sync().await
  }
}
