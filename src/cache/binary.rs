//! Binary asset cache, versioned independently of the owning record.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::{read_json, write_json, KeySpace, KeyValueStore};
use super::traits::{BinarySource, ResourceVersion, WritebackObserver};
use crate::task::TaskSet;

/// Stored form of a binary resource: base64 content plus its version marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedBinary {
  pub content: String,
  pub version: Option<ResourceVersion>,
}

/// Record that embeds a reference to a binary resource.
pub trait BinaryResource {
  /// Where to download the resource from, if the record has one
  fn resource_url(&self) -> Option<&str>;

  /// Last-modified marker of the resource itself, not of the record.
  fn resource_version(&self) -> Option<ResourceVersion>;
}

/// Cache for a single binary resource.
pub struct BinaryCache<B: BinarySource> {
  source: Arc<B>,
  store: Arc<dyn KeyValueStore>,
  key: String,
}

impl<B: BinarySource> BinaryCache<B> {
  pub fn new(
    source: Arc<B>,
    store: Arc<dyn KeyValueStore>,
    keys: &KeySpace,
    namespace: &str,
  ) -> Self {
    Self {
      source,
      store,
      key: keys.binary(namespace),
    }
  }

  async fn load(&self) -> Result<Option<CachedBinary>> {
    match self.store.get(&self.key).await? {
      Some(raw) => {
        let cached = serde_json::from_str(&raw)
          .map_err(|e| eyre!("Failed to decode cached binary: {}", e))?;
        Ok(Some(cached))
      }
      None => Ok(None),
    }
  }

  /// Whether the resource at `version` needs downloading.
  ///
  /// Any error reading the cache resolves to `true`.
  pub async fn should_fetch(&self, version: Option<&ResourceVersion>) -> bool {
    match self.load().await {
      Ok(Some(CachedBinary {
        version: Some(cached),
        ..
      })) => version != Some(&cached),
      Ok(_) => true,
      Err(e) => {
        warn!(key = %self.key, error = %e, "Failed to inspect cached binary");
        true
      }
    }
  }

  /// Download, encode and store the resource with its version as one value.
  pub async fn fetch_and_store(&self, url: &str, version: Option<ResourceVersion>) -> Result<()> {
    let bytes = self
      .source
      .get_binary(url)
      .await
      .map_err(|e| eyre!("Failed to download {}: {}", url, e))?;

    let cached = CachedBinary {
      content: STANDARD.encode(&bytes),
      version,
    };
    write_json(self.store.as_ref(), &self.key, &cached).await?;

    info!(
      key = %self.key,
      bytes = bytes.len(),
      version = ?cached.version.as_ref().map(|v| v.as_str()),
      "Stored binary"
    );
    Ok(())
  }

  /// Store locally produced content ahead of server confirmation.
  ///
  /// The existing version marker is kept as-is, so the confirmed version
  /// arriving later still differs and triggers a download.
  pub async fn store_optimistic(&self, bytes: &[u8]) -> Result<()> {
    let version = self.cached_version().await;
    let cached = CachedBinary {
      content: STANDARD.encode(bytes),
      version,
    };
    write_json(self.store.as_ref(), &self.key, &cached).await?;
    debug!(key = %self.key, "Stored optimistic binary");
    Ok(())
  }

  /// Current stored value, for undoing an optimistic write.
  pub async fn snapshot(&self) -> Option<CachedBinary> {
    read_json(self.store.as_ref(), &self.key).await
  }

  /// Put back a value taken with [`snapshot`](Self::snapshot).
  pub async fn restore(&self, snapshot: Option<CachedBinary>) -> Result<()> {
    match snapshot {
      Some(cached) => write_json(self.store.as_ref(), &self.key, &cached).await,
      None => self.clear().await,
    }
  }

  /// Version marker of the stored content.
  pub async fn cached_version(&self) -> Option<ResourceVersion> {
    read_json::<CachedBinary>(self.store.as_ref(), &self.key)
      .await
      .and_then(|c| c.version)
  }

  /// Stored content in its encoded (base64) form.
  pub async fn read_encoded(&self) -> Option<String> {
    read_json::<CachedBinary>(self.store.as_ref(), &self.key)
      .await
      .map(|c| c.content)
  }

  /// Stored content, decoded. Local read only.
  pub async fn read(&self) -> Option<Vec<u8>> {
    let encoded = self.read_encoded().await?;
    match STANDARD.decode(encoded) {
      Ok(bytes) => Some(bytes),
      Err(e) => {
        warn!(key = %self.key, error = %e, "Discarding undecodable binary");
        None
      }
    }
  }

  pub async fn clear(&self) -> Result<()> {
    self.store.remove(&self.key).await
  }
}

impl<B: BinarySource> Clone for BinaryCache<B> {
  fn clone(&self) -> Self {
    Self {
      source: Arc::clone(&self.source),
      store: Arc::clone(&self.store),
      key: self.key.clone(),
    }
  }
}

/// Writeback observer that keeps a record's binary resource current.
///
/// Each writeback compares the record's resource marker with the cached one
/// and downloads in the background only when they differ.
pub struct BinaryRefresher<B: BinarySource, T> {
  cache: BinaryCache<B>,
  tasks: TaskSet,
  _record: PhantomData<fn(&T)>,
}

impl<B: BinarySource, T> BinaryRefresher<B, T> {
  pub fn new(cache: BinaryCache<B>, tasks: TaskSet) -> Self {
    Self {
      cache,
      tasks,
      _record: PhantomData,
    }
  }
}

impl<B, T> WritebackObserver<T> for BinaryRefresher<B, T>
where
  B: BinarySource,
  T: BinaryResource,
{
  fn on_writeback(&self, record: &T) {
    let Some(url) = record.resource_url().map(String::from) else {
      return;
    };
    let version = record.resource_version();
    let cache = self.cache.clone();

    self.tasks.spawn("binary-refresh", async move {
      if cache.should_fetch(version.as_ref()).await {
        cache.fetch_and_store(&url, version).await?;
      } else {
        debug!(url = %url, "Binary unchanged, skipping download");
      }
      Ok(())
    });
  }
}
