use crate::api::api_types::{
  ApiFinanceTimestamp, ApiHealth, ApiMessage, ApiPhotoUpload, ApiProfileTimestamp,
};
use crate::api::types::{AccountWithBalance, ProfileUpdate, Transaction, UserProfile};
use crate::config::Config;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// FinTrack REST API client
#[derive(Clone)]
pub struct FinTrackClient {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl FinTrackClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_token(&config.api.url, token, config.api.timeout())
  }

  pub fn with_token(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
    let mut base =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API URL '{}': {}", base_url, e))?;
    // Url::join replaces the last segment unless the path ends with '/'
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base, token })
  }

  /// Base URL the client talks to
  pub fn base_url(&self) -> &str {
    self.base.as_str()
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
    let url = self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))?;
    Ok(self.http.request(method, url).bearer_auth(&self.token))
  }

  /// Send a request and turn any non-2xx status into an error.
  async fn send(&self, what: &str, request: RequestBuilder) -> Result<Response> {
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", what, e))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let message = response
      .json::<ApiMessage>()
      .await
      .ok()
      .and_then(|m| m.message)
      .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
    Err(eyre!("Failed to {}: HTTP {}: {}", what, status.as_u16(), message))
  }

  async fn get_json<T: DeserializeOwned>(&self, what: &str, path: &str) -> Result<T> {
    debug!(path, "GET");
    let response = self.send(what, self.request(Method::GET, path)?).await?;
    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse response to {}: {}", what, e))
  }

  /// Get the current user's profile
  pub async fn get_profile(&self) -> Result<UserProfile> {
    self.get_json("get profile", "/api/users/profile").await
  }

  /// Get the profile's version marker
  pub async fn get_profile_timestamp(&self) -> Result<Option<String>> {
    let response: ApiProfileTimestamp = self
      .get_json("get profile timestamp", "/api/users/profile/timestamp")
      .await?;
    Ok(response.updated_at)
  }

  /// Update name and/or preferences; the server merges preferences
  pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
    debug!(?update, "PUT profile");
    let request = self.request(Method::PUT, "/api/users/profile")?.json(update);
    let response = self.send("update profile", request).await?;
    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse updated profile: {}", e))
  }

  /// Upload a new profile photo as base64 JSON
  pub async fn upload_photo(&self, bytes: &[u8]) -> Result<()> {
    let encoded = STANDARD.encode(bytes);
    let request = self
      .request(Method::POST, "/api/users/profile/photo")?
      .json(&ApiPhotoUpload { photo: &encoded });
    self.send("upload photo", request).await?;
    Ok(())
  }

  /// Download a binary resource; relative URLs resolve against the API base
  pub async fn get_binary(&self, url: &str) -> Result<Vec<u8>> {
    let url = self
      .base
      .join(url)
      .map_err(|e| eyre!("Invalid resource URL {}: {}", url, e))?;
    let request = self.http.get(url).bearer_auth(&self.token);
    let response = self.send("download resource", request).await?;
    let bytes = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read resource body: {}", e))?;
    Ok(bytes.to_vec())
  }

  /// Get all accounts with balances resolved
  pub async fn get_accounts(&self) -> Result<Vec<AccountWithBalance>> {
    self
      .get_json("get accounts", "/api/accounts?include_balances=true")
      .await
  }

  /// Get all ledger entries, newest first
  pub async fn get_entries(&self) -> Result<Vec<Transaction>> {
    self.get_json("get entries", "/api/entries").await
  }

  /// Get the last-updated markers of the user's financial data
  pub async fn get_finance_timestamp(&self) -> Result<ApiFinanceTimestamp> {
    self
      .get_json("get finance timestamp", "/api/finance/timestamp")
      .await
  }

  pub async fn health(&self) -> Result<ApiHealth> {
    self.get_json("check health", "/api/health").await
  }
}
