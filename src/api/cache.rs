//! Caching implementations for FinTrack types.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::cache::{
  BinaryResource, BinarySource, Cacheable, Fetched, MutableSource, RecordSource, RecordVersion,
  ResourceVersion,
};

use super::client::FinTrackClient;
use super::types::{FinanceBundle, ProfileUpdate, UserProfile};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for UserProfile {
  fn namespace() -> &'static str {
    "profile"
  }
}

impl Cacheable for FinanceBundle {
  fn namespace() -> &'static str {
    "finance"
  }

  fn is_valid(&self) -> bool {
    // Accounts cached without balances came from an incomplete fetch
    self.has_balances()
  }
}

impl BinaryResource for UserProfile {
  fn resource_url(&self) -> Option<&str> {
    self.photo.as_deref()
  }

  /// Servers that don't report `photo_updated_at` fall back to the profile's
  /// own `updated_at`, which re-downloads after any profile edit.
  fn resource_version(&self) -> Option<ResourceVersion> {
    self
      .photo_updated_at
      .as_ref()
      .or(self.updated_at.as_ref())
      .map(ResourceVersion::new)
  }
}

// ============================================================================
// Record sources
// ============================================================================

/// The current user's profile, versioned by `updated_at`.
pub struct ProfileSource {
  client: FinTrackClient,
}

impl ProfileSource {
  pub fn new(client: FinTrackClient) -> Self {
    Self { client }
  }
}

#[async_trait]
impl RecordSource for ProfileSource {
  type Record = UserProfile;

  async fn probe(&self) -> Result<RecordVersion> {
    self
      .client
      .get_profile_timestamp()
      .await?
      .map(RecordVersion::new)
      .ok_or_else(|| eyre!("Server returned no profile timestamp"))
  }

  async fn fetch(&self) -> Result<Fetched<UserProfile>> {
    let profile = self.client.get_profile().await?;
    let timestamp = profile.updated_at.clone().map(RecordVersion::new);
    Ok(Fetched::new(profile, timestamp))
  }
}

#[async_trait]
impl MutableSource for ProfileSource {
  type Update = ProfileUpdate;

  async fn mutate(&self, update: &ProfileUpdate) -> Result<Fetched<UserProfile>> {
    let profile = self.client.update_profile(update).await?;

    let timestamp = match &profile.updated_at {
      Some(updated_at) => Some(RecordVersion::new(updated_at.clone())),
      // Older servers omit updated_at from the update response
      None => {
        debug!("Update response has no timestamp, probing");
        self.probe().await.ok()
      }
    };
    Ok(Fetched::new(profile, timestamp))
  }
}

/// Accounts and entries, versioned by the server's finance marker.
pub struct FinanceSource {
  client: FinTrackClient,
}

impl FinanceSource {
  pub fn new(client: FinTrackClient) -> Self {
    Self { client }
  }
}

#[async_trait]
impl RecordSource for FinanceSource {
  type Record = FinanceBundle;

  async fn probe(&self) -> Result<RecordVersion> {
    self
      .client
      .get_finance_timestamp()
      .await?
      .last_updated
      .map(RecordVersion::new)
      .ok_or_else(|| eyre!("Server has no finance timestamp yet"))
  }

  async fn fetch(&self) -> Result<Fetched<FinanceBundle>> {
    let (marker, accounts, transactions) = futures::try_join!(
      self.client.get_finance_timestamp(),
      self.client.get_accounts(),
      self.client.get_entries(),
    )?;

    let timestamp = marker.last_updated.clone().map(RecordVersion::new);
    let bundle = FinanceBundle {
      transactions,
      accounts,
      timestamp: marker.last_updated,
      balance_timestamp: marker.balance_updated,
    };
    Ok(Fetched::new(bundle, timestamp))
  }
}

#[async_trait]
impl BinarySource for FinTrackClient {
  async fn get_binary(&self, url: &str) -> Result<Vec<u8>> {
    FinTrackClient::get_binary(self, url).await
  }
}
