//! Record cache: version-probed cache of one remote record.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::storage::{read_json, write_json, KeySpace, KeyValueStore};
use super::traits::{
  CacheResult, Cacheable, CachedRecord, RecordSource, RecordVersion, UpdateStatus,
  WritebackObserver,
};

/// Cache for a single remote record.
///
/// Serves the stored payload when its version matches the server's probe,
/// refetches otherwise, and falls back to the stored payload whenever the
/// network fails. Network errors never leave this type.
pub struct RecordCache<S: RecordSource> {
  source: Arc<S>,
  store: Arc<dyn KeyValueStore>,
  record_key: String,
  namespace_keys: Vec<String>,
  /// Upper bound on a version probe
  probe_timeout: Option<Duration>,
  observer: Option<Arc<dyn WritebackObserver<S::Record>>>,
}

impl<S: RecordSource> RecordCache<S> {
  pub fn new(source: Arc<S>, store: Arc<dyn KeyValueStore>, keys: &KeySpace) -> Self {
    let namespace = S::Record::namespace();
    Self {
      source,
      store,
      record_key: keys.record(namespace),
      namespace_keys: keys.namespace_keys(namespace),
      probe_timeout: None,
      observer: None,
    }
  }

  /// Bound the version probe; a probe running longer counts as failed.
  pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
    self.probe_timeout = Some(timeout);
    self
  }

  /// Register a hook run after every successful writeback.
  pub fn with_observer(mut self, observer: Arc<dyn WritebackObserver<S::Record>>) -> Self {
    self.observer = Some(observer);
    self
  }

  /// Every store key owned by this record type.
  pub fn namespace_keys(&self) -> &[String] {
    &self.namespace_keys
  }

  /// Read the stored record without touching the network.
  pub async fn read(&self) -> Option<CachedRecord<S::Record>> {
    read_json(self.store.as_ref(), &self.record_key).await
  }

  async fn probe(&self) -> Result<RecordVersion> {
    match self.probe_timeout {
      Some(timeout) => tokio::time::timeout(timeout, self.source.probe())
        .await
        .map_err(|_| eyre!("Version probe timed out after {:?}", timeout))?,
      None => self.source.probe().await,
    }
  }

  /// Decide whether the stored record must be refetched.
  ///
  /// A failed probe resolves to "keep using the cache".
  pub async fn check_update_status(&self) -> UpdateStatus<S::Record> {
    let namespace = S::Record::namespace();
    let cached = self.read().await;

    let server_timestamp = match self.probe().await {
      Ok(version) => version,
      Err(e) => {
        warn!(namespace, error = %e, "Version probe failed, keeping cached data");
        return UpdateStatus {
          should_update: false,
          cached_data: cached.map(|c| c.payload),
          server_timestamp: None,
        };
      }
    };

    let should_update = match &cached {
      None => true,
      Some(record) if !record.payload.is_valid() => {
        info!(namespace, "Cached data failed shape check, forcing refetch");
        true
      }
      Some(record) => record.timestamp != server_timestamp,
    };

    debug!(
      namespace,
      should_update,
      server = %server_timestamp,
      cached = ?cached.as_ref().map(|c| c.timestamp.as_str()),
      "Checked cache status"
    );

    UpdateStatus {
      should_update,
      cached_data: cached.map(|c| c.payload),
      server_timestamp: Some(server_timestamp),
    }
  }

  /// Return the record, using the cache when it is current.
  pub async fn get_with_cache(&self) -> Option<S::Record> {
    self.get_cached_result().await.map(|r| r.data)
  }

  /// Like [`get_with_cache`](Self::get_with_cache), tagged with where the
  /// data came from.
  pub async fn get_cached_result(&self) -> Option<CacheResult<S::Record>> {
    let status = self.check_update_status().await;
    self.resolve(status).await
  }

  /// Act on a staleness check: serve the cache or fetch and store.
  pub async fn resolve(&self, status: UpdateStatus<S::Record>) -> Option<CacheResult<S::Record>> {
    if !status.should_update {
      if let Some(data) = status.cached_data {
        // A missing server timestamp means the probe failed.
        return Some(if status.server_timestamp.is_some() {
          CacheResult::from_cache(data)
        } else {
          CacheResult::offline(data)
        });
      }
    }

    match self.source.fetch().await {
      Ok(fetched) => {
        let timestamp = fetched.timestamp.or(status.server_timestamp);
        if let Err(e) = self.writeback(fetched.payload.clone(), timestamp).await {
          warn!(namespace = S::Record::namespace(), error = %e, "Failed to store fetched data");
        }
        Some(CacheResult::from_network(fetched.payload))
      }
      Err(e) => {
        warn!(
          namespace = S::Record::namespace(),
          error = %e,
          "Fetch failed, serving cached data"
        );
        status.cached_data.map(CacheResult::offline)
      }
    }
  }

  /// Store a payload together with its version as one value.
  ///
  /// Falls back to the current time when no version is known.
  pub async fn writeback(
    &self,
    payload: S::Record,
    timestamp: Option<RecordVersion>,
  ) -> Result<CachedRecord<S::Record>> {
    let record = CachedRecord {
      payload,
      timestamp: timestamp.unwrap_or_else(RecordVersion::now),
      cached_at: Some(Utc::now()),
    };

    write_json(self.store.as_ref(), &self.record_key, &record).await?;
    debug!(
      namespace = S::Record::namespace(),
      version = %record.timestamp,
      "Stored record"
    );

    if let Some(observer) = &self.observer {
      observer.on_writeback(&record.payload);
    }

    Ok(record)
  }

  /// Fetch and store unconditionally, skipping the version probe.
  pub async fn force_refresh(&self) -> Option<S::Record> {
    match self.source.fetch().await {
      Ok(fetched) => {
        match self
          .writeback(fetched.payload.clone(), fetched.timestamp)
          .await
        {
          Ok(_) => {}
          Err(e) => {
            warn!(namespace = S::Record::namespace(), error = %e, "Failed to store refreshed data")
          }
        }
        Some(fetched.payload)
      }
      Err(e) => {
        warn!(
          namespace = S::Record::namespace(),
          error = %e,
          "Forced refresh failed, serving cached data"
        );
        self.read().await.map(|c| c.payload)
      }
    }
  }

  /// Remove every key of this record type.
  pub async fn clear(&self) -> Result<()> {
    self.store.remove_many(&self.namespace_keys).await?;
    info!(namespace = S::Record::namespace(), "Cleared cache");
    Ok(())
  }
}

impl<S: RecordSource> Clone for RecordCache<S> {
  fn clone(&self) -> Self {
    Self {
      source: Arc::clone(&self.source),
      store: Arc::clone(&self.store),
      record_key: self.record_key.clone(),
      namespace_keys: self.namespace_keys.clone(),
      probe_timeout: self.probe_timeout,
      observer: self.observer.clone(),
    }
  }
}
