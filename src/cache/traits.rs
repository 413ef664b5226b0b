//! Core traits and types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Opaque, server-issued version of a whole cached record.
///
/// Only ever compared for equality against a fresh probe result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordVersion(pub String);

impl RecordVersion {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  /// Version token used when neither the payload nor the probe supplied one.
  pub fn now() -> Self {
    Self(Utc::now().to_rfc3339())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for RecordVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Last-modified marker of a binary resource embedded in a record.
///
/// Kept apart from [`RecordVersion`]: a record can change version while the
/// resource it points at stays the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(pub String);

impl ResourceVersion {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ResourceVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Trait for records that can be cached.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Key namespace for this record type (e.g., "profile", "finance")
  fn namespace() -> &'static str;

  /// Data-shape check applied to cached data.
  ///
  /// A cached payload failing this check is refetched even when its version
  /// matches the server.
  fn is_valid(&self) -> bool {
    true
  }
}

/// A payload together with the version it was stored under.
///
/// Persisted as one value so the pair is never observed torn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord<T> {
  pub payload: T,
  pub timestamp: RecordVersion,
  /// Local time of the writeback
  #[serde(default)]
  pub cached_at: Option<DateTime<Utc>>,
}

/// Data returned by a full fetch or a mutation.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  pub payload: T,
  /// Version reported alongside the payload, if the endpoint carries one
  pub timestamp: Option<RecordVersion>,
}

impl<T> Fetched<T> {
  pub fn new(payload: T, timestamp: Option<RecordVersion>) -> Self {
    Self { payload, timestamp }
  }
}

/// Outcome of a staleness check.
#[derive(Debug, Clone)]
pub struct UpdateStatus<T> {
  pub should_update: bool,
  pub cached_data: Option<T>,
  /// Version reported by the probe, `None` if the probe failed
  pub server_timestamp: Option<RecordVersion>,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  /// Create a new cache result from cached data that matches the server.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, version confirmed by the server
  CacheFresh,
  /// Network unavailable, serving whatever was cached
  Offline,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheSource::Network => f.write_str("network"),
      CacheSource::CacheFresh => f.write_str("cache"),
      CacheSource::Offline => f.write_str("offline"),
    }
  }
}

/// Remote side of a cached record: a cheap version probe and a full fetch.
#[async_trait]
pub trait RecordSource: Send + Sync + 'static {
  type Record: Cacheable;

  /// Fetch only the current server version of the record.
  async fn probe(&self) -> Result<RecordVersion>;

  /// Fetch the full record.
  async fn fetch(&self) -> Result<Fetched<Self::Record>>;
}

/// A record source that also accepts partial updates.
#[async_trait]
pub trait MutableSource: RecordSource {
  type Update: Clone + Send + Sync + Serialize + DeserializeOwned + fmt::Debug + 'static;

  /// Push a partial update; the server answers with the updated record.
  async fn mutate(&self, update: &Self::Update) -> Result<Fetched<Self::Record>>;
}

/// Downloads binary resources by URL.
#[async_trait]
pub trait BinarySource: Send + Sync + 'static {
  async fn get_binary(&self, url: &str) -> Result<Vec<u8>>;
}

/// Notified after every successful record writeback.
pub trait WritebackObserver<T>: Send + Sync {
  fn on_writeback(&self, record: &T);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_versions_serialize_transparently() {
    let v = RecordVersion::new("2024-01-01 10:00:00");
    assert_eq!(
      serde_json::to_string(&v).unwrap(),
      "\"2024-01-01 10:00:00\""
    );

    let r: ResourceVersion = serde_json::from_str("\"t1\"").unwrap();
    assert_eq!(r.as_str(), "t1");
  }

  #[test]
  fn test_cached_record_is_one_value() {
    let record = CachedRecord {
      payload: vec![1, 2, 3],
      timestamp: RecordVersion::new("t1"),
      cached_at: None,
    };
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["payload"], serde_json::json!([1, 2, 3]));
    assert_eq!(json["timestamp"], "t1");
  }
}
