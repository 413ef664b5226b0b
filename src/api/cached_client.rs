//! Cached FinTrack client that wraps FinTrackClient with transparent caching.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{
  BackgroundSync, BinaryCache, BinaryRefresher, CacheResult, KeySpace, KeyValueStore, MemoryStore,
  RecordCache, SqliteStore,
};
use crate::config::Config;
use crate::task::TaskSet;

use super::cache::{FinanceSource, ProfileSource};
use super::client::FinTrackClient;
use super::merge::ProfileMerge;
use super::types::{FinanceBundle, ProfileUpdate, UserProfile};

/// FinTrack client with transparent caching support.
///
/// Reads go through version-probed record caches, profile edits go through
/// a pending-write queue, and the profile photo is cached separately from
/// the profile record.
#[derive(Clone)]
pub struct CachedFinTrackClient {
  inner: FinTrackClient,
  store: Arc<dyn KeyValueStore>,
  keys: KeySpace,
  profile: RecordCache<ProfileSource>,
  finance: RecordCache<FinanceSource>,
  photo: BinaryCache<FinTrackClient>,
  profile_sync: Arc<BackgroundSync<ProfileSource>>,
  tasks: TaskSet,
}

impl CachedFinTrackClient {
  /// Create a new cached client from configuration.
  pub async fn new(config: &Config) -> Result<Self> {
    let inner = FinTrackClient::new(config)?;

    let store: Arc<dyn KeyValueStore> = if config.cache.in_memory {
      Arc::new(MemoryStore::new())
    } else {
      let storage = match &config.cache.path {
        Some(path) => SqliteStore::open(path)?,
        None => SqliteStore::open_default()?,
      };
      Arc::new(storage)
    };

    Ok(Self::with_store(inner, store, config.api.probe_timeout()).await)
  }

  /// Assemble the caches around an existing client and store.
  pub async fn with_store(
    inner: FinTrackClient,
    store: Arc<dyn KeyValueStore>,
    probe_timeout: Duration,
  ) -> Self {
    let keys = KeySpace::new(inner.base_url());
    let tasks = TaskSet::new();

    let photo = BinaryCache::new(
      Arc::new(inner.clone()),
      store.clone(),
      &keys,
      "profile",
    );
    let refresher: Arc<BinaryRefresher<FinTrackClient, UserProfile>> =
      Arc::new(BinaryRefresher::new(photo.clone(), tasks.clone()));

    let profile_source = Arc::new(ProfileSource::new(inner.clone()));
    let profile = RecordCache::new(profile_source.clone(), store.clone(), &keys)
      .with_probe_timeout(probe_timeout)
      .with_observer(refresher);

    let finance = RecordCache::new(
      Arc::new(FinanceSource::new(inner.clone())),
      store.clone(),
      &keys,
    )
    .with_probe_timeout(probe_timeout);

    let profile_sync = Arc::new(BackgroundSync::new(
      profile_source,
      profile.clone(),
      store.clone(),
      &keys,
    ));
    profile_sync.restore().await;

    Self {
      inner,
      store,
      keys,
      profile,
      finance,
      photo,
      profile_sync,
      tasks,
    }
  }

  pub fn inner(&self) -> &FinTrackClient {
    &self.inner
  }

  pub fn store(&self) -> &Arc<dyn KeyValueStore> {
    &self.store
  }

  pub fn keys(&self) -> &KeySpace {
    &self.keys
  }

  pub fn profile_cache(&self) -> &RecordCache<ProfileSource> {
    &self.profile
  }

  pub fn finance_cache(&self) -> &RecordCache<FinanceSource> {
    &self.finance
  }

  pub fn profile_sync(&self) -> &BackgroundSync<ProfileSource> {
    &self.profile_sync
  }

  pub fn photo_cache(&self) -> &BinaryCache<FinTrackClient> {
    &self.photo
  }

  /// Profile as the user should see it: cached or fresh server data with
  /// unsynced local edits applied on top.
  pub async fn get_profile(&self) -> Option<CacheResult<UserProfile>> {
    let result = self.profile.get_cached_result().await?;
    let pending = self.profile_sync.pending();
    Some(CacheResult {
      data: ProfileMerge::apply(&result.data, pending.as_ref()),
      ..result
    })
  }

  /// Accounts and transactions.
  pub async fn get_finance(&self) -> Option<CacheResult<FinanceBundle>> {
    self.finance.get_cached_result().await
  }

  /// Queue a profile edit for the next sync point.
  ///
  /// The edit is folded into any still-unsynced one so the queued write
  /// carries the whole local intent.
  pub async fn update_profile(&self, edit: ProfileUpdate) {
    if edit.is_empty() {
      debug!("Ignoring empty profile edit");
      return;
    }
    let update = match self.profile_sync.pending() {
      Some(pending) => pending.merged_with(edit),
      None => edit,
    };
    self.profile_sync.enqueue(update).await;
  }

  /// Replace the profile photo.
  ///
  /// The photo cache is updated before the upload; a failed upload puts the
  /// previous photo back.
  pub async fn upload_photo(&self, bytes: &[u8]) -> Result<Option<UserProfile>> {
    let snapshot = self.photo.snapshot().await;
    if let Err(e) = self.photo.store_optimistic(bytes).await {
      warn!(error = %e, "Failed to cache photo locally");
    }

    if let Err(e) = self.inner.upload_photo(bytes).await {
      if let Err(restore_err) = self.photo.restore(snapshot).await {
        warn!(error = %restore_err, "Failed to restore previous photo");
      }
      return Err(eyre!("Photo upload failed: {}", e));
    }
    info!(bytes = bytes.len(), "Uploaded profile photo");

    // Queued edits go out before the refetch so it can't bring back stale fields
    self.profile_sync.sync_if_pending().await;

    let server = self.profile.force_refresh().await;
    let pending = self.profile_sync.pending();
    Ok(server.map(|profile| ProfileMerge::apply(&profile, pending.as_ref())))
  }

  /// Cached photo bytes, local read only.
  pub async fn photo(&self) -> Option<Vec<u8>> {
    self.photo.read().await
  }

  /// Remove every cached namespace, the queued profile edit and local
  /// settings in one store operation.
  pub async fn clear(&self) -> Result<()> {
    self.profile_sync.clear();

    let mut keys = self.profile.namespace_keys().to_vec();
    keys.extend_from_slice(self.finance.namespace_keys());
    keys.push(self.keys.settings());
    self.store.remove_many(&keys).await?;

    info!(keys = keys.len(), "Cleared local data");
    Ok(())
  }

  /// Wait for background downloads started so far.
  pub async fn drain_tasks(&self) {
    self.tasks.drain().await;
  }
}
