use crate::api::cached_client::CachedFinTrackClient;
use crate::api::merge::ProfileMerge;
use crate::api::types::{FinanceBundle, Preferences, ProfileUpdate, UserProfile};
use crate::cache::{read_json, write_json, CacheSource, RecordVersion, SyncOutcome};
use crate::commands::Command;
use crate::config::Config;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Settings the client applies locally, mirrored from profile preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSettings {
  #[serde(default)]
  pub theme: Option<String>,
  #[serde(default)]
  pub language: Option<String>,
}

/// Outcome of one sync point
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
  /// `None` when nothing was pending
  pub pushed: Option<SyncOutcome>,
  pub profile_refreshed: bool,
  pub finance_refreshed: bool,
  /// Local settings that changed to follow the profile
  pub settings_changed: Vec<&'static str>,
}

impl fmt::Display for ReconcileReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let pushed = match self.pushed {
      None | Some(SyncOutcome::NothingPending) => "nothing pending",
      Some(SyncOutcome::AlreadySyncing) => "push already in flight",
      Some(SyncOutcome::Pushed) => "pushed",
      Some(SyncOutcome::Failed) => "push failed, will retry",
    };
    write!(
      f,
      "edits: {}; profile: {}; finance: {}",
      pushed,
      if self.profile_refreshed { "refreshed" } else { "up to date" },
      if self.finance_refreshed { "refreshed" } else { "up to date" },
    )?;
    if !self.settings_changed.is_empty() {
      write!(f, "; settings updated: {}", self.settings_changed.join(", "))?;
    }
    Ok(())
  }
}

/// Main application state
pub struct App {
  client: CachedFinTrackClient,
}

impl App {
  pub async fn new(config: Config) -> Result<Self> {
    let client = CachedFinTrackClient::new(&config).await?;
    Ok(Self::from_client(client))
  }

  pub fn from_client(client: CachedFinTrackClient) -> Self {
    Self { client }
  }

  pub fn client(&self) -> &CachedFinTrackClient {
    &self.client
  }

  /// Local settings, default when none are stored.
  pub async fn settings(&self) -> LocalSettings {
    read_json(self.client.store().as_ref(), &self.client.keys().settings())
      .await
      .unwrap_or_default()
  }

  /// Copy theme and language from the profile into local settings.
  ///
  /// Only values that differ are written. Returns the names that changed.
  async fn mirror_settings(&self, prefs: &Preferences) -> Vec<&'static str> {
    let mut settings = self.settings().await;
    let mut changed = Vec::new();

    if let Some(theme) = &prefs.theme {
      if settings.theme.as_ref() != Some(theme) {
        settings.theme = Some(theme.clone());
        changed.push("theme");
      }
    }
    if let Some(language) = &prefs.language {
      if settings.language.as_ref() != Some(language) {
        settings.language = Some(language.clone());
        changed.push("language");
      }
    }

    if !changed.is_empty() {
      let key = self.client.keys().settings();
      if let Err(e) = write_json(self.client.store().as_ref(), &key, &settings).await {
        warn!(error = %e, "Failed to save local settings");
        changed.clear();
      }
    }
    changed
  }

  /// Reconcile local state with the server.
  ///
  /// Pending edits are pushed before any staleness check, so a refetch
  /// never brings back data that a queued edit is about to replace.
  pub async fn sync_point(&self) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let sync = self.client.profile_sync();

    report.pushed = match sync.push().await {
      SyncOutcome::NothingPending => None,
      outcome => Some(outcome),
    };

    let profile = self.client.profile_cache();
    let status = profile.check_update_status().await;
    if status.should_update {
      if let Some(result) = profile.resolve(status).await {
        report.profile_refreshed = result.source == CacheSource::Network;
      }
    }

    // A successful push writes the server's answer back without making the
    // cache stale, so settings follow whatever profile is stored now.
    if let Some(cached) = profile.read().await {
      let shown = ProfileMerge::apply(&cached.payload, sync.pending().as_ref());
      report.settings_changed = self.mirror_settings(&shown.preferences).await;
    }

    let finance = self.client.finance_cache();
    let status = finance.check_update_status().await;
    if status.should_update {
      if let Some(result) = finance.resolve(status).await {
        report.finance_refreshed = result.source == CacheSource::Network;
      }
    }

    info!(
      pushed = ?report.pushed,
      profile_refreshed = report.profile_refreshed,
      finance_refreshed = report.finance_refreshed,
      settings_changed = ?report.settings_changed,
      "Sync point complete"
    );
    report
  }

  /// Profile after a sync point: the local copy, fetched only when missing.
  async fn current_profile(&self) -> Option<UserProfile> {
    match self.client.profile_cache().read().await {
      Some(cached) => {
        let pending = self.client.profile_sync().pending();
        Some(ProfileMerge::apply(&cached.payload, pending.as_ref()))
      }
      None => self.client.get_profile().await.map(|r| r.data),
    }
  }

  async fn current_finance(&self) -> Option<FinanceBundle> {
    match self.client.finance_cache().read().await {
      Some(cached) => Some(cached.payload),
      None => self.client.get_finance().await.map(|r| r.data),
    }
  }

  /// Queue an edit and try to push it right away.
  async fn edit_profile(&self, edit: ProfileUpdate) -> Result<String> {
    self.client.update_profile(edit).await;
    let report = self.sync_point().await;
    let outcome = match report.pushed {
      Some(SyncOutcome::Failed) => "Saved locally, will sync when the server is reachable",
      _ => "Saved",
    };
    Ok(outcome.to_string())
  }

  /// Remove cached data, queued edits and local settings.
  pub async fn logout(&self) -> Result<()> {
    self.client.clear().await
  }

  /// Run one command and return what to print.
  pub async fn run(&self, command: Command) -> Result<String> {
    let report = if command.syncs_first() {
      Some(self.sync_point().await)
    } else {
      None
    };

    match command {
      Command::Profile => self
        .current_profile()
        .await
        .map(|p| format_profile(&p))
        .ok_or_else(|| eyre!("Profile unavailable: server unreachable and nothing cached")),
      Command::Finance { limit } => self
        .current_finance()
        .await
        .map(|f| format_finance(&f, limit))
        .ok_or_else(|| eyre!("Finance data unavailable: server unreachable and nothing cached")),
      Command::SetName { name } => {
        self
          .edit_profile(ProfileUpdate {
            name: Some(name),
            preferences: None,
          })
          .await
      }
      Command::SetPref { key, value } => {
        if key.trim().is_empty() {
          return Err(eyre!("Preference name must not be empty"));
        }
        let mut preferences = Preferences::default();
        preferences.set(&key, &value);
        self
          .edit_profile(ProfileUpdate {
            name: None,
            preferences: Some(preferences),
          })
          .await
      }
      Command::UploadPhoto { file } => {
        let bytes = tokio::fs::read(&file)
          .await
          .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
        self.client.upload_photo(&bytes).await?;
        Ok(format!("Uploaded {} ({} bytes)", file.display(), bytes.len()))
      }
      Command::Photo { output } => {
        // Downloads started by the sync point land before reading
        self.client.drain_tasks().await;
        let bytes = self
          .client
          .photo()
          .await
          .ok_or_else(|| eyre!("No cached photo"))?;
        tokio::fs::write(&output, &bytes)
          .await
          .map_err(|e| eyre!("Failed to write {}: {}", output.display(), e))?;
        Ok(format!("Wrote {} bytes to {}", bytes.len(), output.display()))
      }
      Command::Sync => Ok(report.map(|r| r.to_string()).unwrap_or_default()),
      Command::Status => Ok(self.status().await),
      Command::Health => {
        let health = self.client.inner().health().await?;
        Ok(format!(
          "{} ({})",
          health.status,
          health.timestamp.as_deref().unwrap_or("-")
        ))
      }
      Command::Logout => {
        self.logout().await?;
        Ok("Logged out, local data removed".to_string())
      }
    }
  }

  /// Local-only overview of what is cached and queued.
  async fn status(&self) -> String {
    let profile = self.client.profile_cache().read().await;
    let finance = self.client.finance_cache().read().await;
    let photo = self.client.photo_cache();
    let sync = self.client.profile_sync();
    let settings = self.settings().await;

    let mut lines = Vec::new();
    lines.push(format!(
      "profile:  {}",
      profile
        .map(|c| describe_record(&c.timestamp, c.cached_at))
        .unwrap_or_else(|| "not cached".to_string())
    ));
    lines.push(format!(
      "finance:  {}",
      finance
        .map(|c| describe_record(&c.timestamp, c.cached_at))
        .unwrap_or_else(|| "not cached".to_string())
    ));
    lines.push(format!(
      "photo:    {}",
      match (photo.read().await, photo.cached_version().await) {
        (Some(bytes), Some(v)) => format!("{} bytes @ {}", bytes.len(), v.as_str()),
        (Some(bytes), None) => format!("{} bytes", bytes.len()),
        (None, _) => "not cached".to_string(),
      }
    ));
    lines.push(format!(
      "pending:  {}",
      match sync.pending() {
        Some(update) => format!("{:?}", update),
        None => "none".to_string(),
      }
    ));
    lines.push(format!("synced:   {} recent edit(s)", sync.history_len()));
    lines.push(format!(
      "settings: theme={} language={}",
      settings.theme.as_deref().unwrap_or("-"),
      settings.language.as_deref().unwrap_or("-")
    ));
    lines.join("\n")
  }
}

fn describe_record(version: &RecordVersion, cached_at: Option<DateTime<Utc>>) -> String {
  match cached_at {
    Some(at) => format!("version {} (stored {})", version, at.format("%Y-%m-%d %H:%M:%S")),
    None => format!("version {}", version),
  }
}

fn format_profile(profile: &UserProfile) -> String {
  let mut lines = vec![format!(
    "{} (@{})",
    profile.name.as_deref().unwrap_or("-"),
    profile.username
  )];
  if let Some(email) = &profile.email {
    lines.push(format!("email:    {}", email));
  }
  let prefs = &profile.preferences;
  lines.push(format!(
    "theme:    {}",
    prefs.theme.as_deref().unwrap_or("-")
  ));
  lines.push(format!(
    "language: {}",
    prefs.language.as_deref().unwrap_or("-")
  ));
  lines.push(format!(
    "currency: {}",
    prefs.currency.as_deref().unwrap_or("-")
  ));
  if let Some(updated_at) = &profile.updated_at {
    lines.push(format!("updated:  {}", updated_at));
  }
  lines.join("\n")
}

fn format_finance(bundle: &FinanceBundle, limit: usize) -> String {
  let mut lines = vec!["Accounts:".to_string()];
  for account in &bundle.accounts {
    let balance = match account.balance {
      Some(b) => format!("{:.2}", b),
      None => "?".to_string(),
    };
    lines.push(format!(
      "  {:<24} {:>12} {}",
      account.name,
      balance,
      account.currency.as_deref().unwrap_or("")
    ));
  }

  lines.push(format!(
    "Transactions ({} of {}):",
    bundle.transactions.len().min(limit),
    bundle.transactions.len()
  ));
  for tx in bundle.transactions.iter().take(limit) {
    lines.push(format!(
      "  {:<20} {:>12.2} {} {}",
      tx.timestamp.as_deref().unwrap_or("-"),
      tx.amount,
      tx.currency,
      tx.description.as_deref().unwrap_or("")
    ));
  }
  lines.join("\n")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::client::FinTrackClient;
  use crate::api::types::{AccountWithBalance, Transaction};
  use crate::cache::MemoryStore;
  use serde_json::json;
  use std::sync::Arc;
  use std::time::Duration;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn app(server: &MockServer) -> App {
    let inner =
      FinTrackClient::with_token(&server.uri(), "tok".to_string(), Duration::from_secs(5)).unwrap();
    let client =
      CachedFinTrackClient::with_store(inner, Arc::new(MemoryStore::new()), Duration::from_secs(2))
        .await;
    App::from_client(client)
  }

  fn profile_json(name: &str, updated_at: &str, theme: &str) -> serde_json::Value {
    json!({
      "id": 1,
      "username": "alice",
      "name": name,
      "updated_at": updated_at,
      "preferences": {"theme": theme, "language": "en"}
    })
  }

  async fn mount_profile(server: &MockServer, body: serde_json::Value, updated_at: &str) {
    Mock::given(method("GET"))
      .and(path("/api/users/profile"))
      .respond_with(ResponseTemplate::new(200).set_body_json(body))
      .mount(server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/users/profile/timestamp"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"updated_at": updated_at})))
      .mount(server)
      .await;
  }

  #[tokio::test]
  async fn test_first_sync_point_fetches_and_mirrors_settings() {
    let server = MockServer::start().await;
    mount_profile(&server, profile_json("Alice", "t1", "dark"), "t1").await;
    let app = app(&server).await;

    let report = app.sync_point().await;

    assert_eq!(report.pushed, None);
    assert!(report.profile_refreshed);
    // Finance probe has no mock and fails, which keeps the (empty) cache
    assert!(!report.finance_refreshed);
    assert_eq!(report.settings_changed, vec!["theme", "language"]);
    assert_eq!(
      app.settings().await,
      LocalSettings {
        theme: Some("dark".to_string()),
        language: Some("en".to_string()),
      }
    );
  }

  #[tokio::test]
  async fn test_unchanged_version_skips_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/users/profile"))
      .respond_with(ResponseTemplate::new(200).set_body_json(profile_json("Alice", "t1", "dark")))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/users/profile/timestamp"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"updated_at": "t1"})))
      .mount(&server)
      .await;
    let app = app(&server).await;

    app.sync_point().await;
    let second = app.sync_point().await;

    assert!(!second.profile_refreshed);
    assert!(second.settings_changed.is_empty());
  }

  #[tokio::test]
  async fn test_pending_edit_is_pushed_before_probing() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
      .and(path("/api/users/profile"))
      .respond_with(ResponseTemplate::new(200).set_body_json(profile_json("Alicia", "t2", "dark")))
      .expect(1)
      .mount(&server)
      .await;
    mount_profile(&server, profile_json("Alicia", "t2", "dark"), "t2").await;
    let app = app(&server).await;

    app
      .client()
      .update_profile(ProfileUpdate {
        name: Some("Alicia".to_string()),
        preferences: None,
      })
      .await;
    let report = app.sync_point().await;

    assert_eq!(report.pushed, Some(SyncOutcome::Pushed));
    // The writeback already carries t2, so no refetch is needed
    assert!(!report.profile_refreshed);

    let requests = server.received_requests().await.unwrap();
    let first = &requests[0];
    assert_eq!(first.method.as_str(), "PUT");
    assert!(requests
      .iter()
      .all(|r| !(r.method.as_str() == "GET" && r.url.path() == "/api/users/profile")));
  }

  #[tokio::test]
  async fn test_failed_push_keeps_edit_visible() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
      .and(path("/api/users/profile"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;
    mount_profile(&server, profile_json("Alice", "t1", "light"), "t1").await;
    let app = app(&server).await;

    let message = app
      .run(Command::SetName {
        name: "Offline Alice".to_string(),
      })
      .await
      .unwrap();

    assert!(message.contains("will sync"));
    assert!(app.client().profile_sync().has_pending());
    let shown = app.current_profile().await.unwrap();
    assert_eq!(shown.name.as_deref(), Some("Offline Alice"));
  }

  #[tokio::test]
  async fn test_pending_preference_wins_over_server_when_mirroring() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
      .and(path("/api/users/profile"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;
    mount_profile(&server, profile_json("Alice", "t1", "light"), "t1").await;
    let app = app(&server).await;

    let mut preferences = Preferences::default();
    preferences.set("theme", "dark");
    app
      .client()
      .update_profile(ProfileUpdate {
        name: None,
        preferences: Some(preferences),
      })
      .await;
    app.sync_point().await;

    assert_eq!(app.settings().await.theme.as_deref(), Some("dark"));
  }

  #[tokio::test]
  async fn test_online_set_pref_updates_local_settings() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
      .and(path("/api/users/profile"))
      .respond_with(ResponseTemplate::new(200).set_body_json(profile_json("Alice", "t2", "dark")))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/users/profile"))
      .respond_with(ResponseTemplate::new(200).set_body_json(profile_json("Alice", "t1", "light")))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/users/profile/timestamp"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"updated_at": "t1"})))
      .up_to_n_times(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/users/profile/timestamp"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"updated_at": "t2"})))
      .mount(&server)
      .await;
    let app = app(&server).await;
    app.sync_point().await;
    assert_eq!(app.settings().await.theme.as_deref(), Some("light"));

    let message = app
      .run(Command::SetPref {
        key: "theme".to_string(),
        value: "dark".to_string(),
      })
      .await
      .unwrap();

    assert_eq!(message, "Saved");
    assert_eq!(app.settings().await.theme.as_deref(), Some("dark"));
    let again = app.sync_point().await;
    assert!(!again.profile_refreshed);
    assert_eq!(app.settings().await.theme.as_deref(), Some("dark"));
  }

  #[tokio::test]
  async fn test_empty_preference_name_is_rejected() {
    let server = MockServer::start().await;
    let app = app(&server).await;

    let result = app
      .run(Command::SetPref {
        key: " ".to_string(),
        value: "dark".to_string(),
      })
      .await;

    assert!(result.is_err());
    assert!(!app.client().profile_sync().has_pending());
  }

  #[tokio::test]
  async fn test_status_is_local_only() {
    let server = MockServer::start().await;
    let app = app(&server).await;

    let status = app.run(Command::Status).await.unwrap();

    assert!(status.contains("profile:  not cached"));
    assert!(status.contains("pending:  none"));
    assert!(server.received_requests().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_logout_removes_settings() {
    let server = MockServer::start().await;
    mount_profile(&server, profile_json("Alice", "t1", "dark"), "t1").await;
    let app = app(&server).await;
    app.sync_point().await;

    app.run(Command::Logout).await.unwrap();

    assert_eq!(app.settings().await, LocalSettings::default());
    assert!(app.client().profile_cache().read().await.is_none());
  }

  #[tokio::test]
  async fn test_logout_drops_queued_edit() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
      .and(path("/api/users/profile"))
      .respond_with(ResponseTemplate::new(503))
      .expect(1)
      .mount(&server)
      .await;
    let app = app(&server).await;
    app
      .run(Command::SetName {
        name: "secret".to_string(),
      })
      .await
      .unwrap();
    assert!(app.client().profile_sync().has_pending());

    app.run(Command::Logout).await.unwrap();

    assert!(!app.client().profile_sync().has_pending());
    let report = app.sync_point().await;
    // No second PUT: the expectation of exactly one is checked on drop
    assert_eq!(report.pushed, None);
  }

  #[test]
  fn test_report_display() {
    let report = ReconcileReport {
      pushed: Some(SyncOutcome::Failed),
      profile_refreshed: true,
      finance_refreshed: false,
      settings_changed: vec!["theme"],
    };
    assert_eq!(
      report.to_string(),
      "edits: push failed, will retry; profile: refreshed; finance: up to date; settings updated: theme"
    );
  }

  #[test]
  fn test_format_finance_limits_transactions() {
    let tx = |id| Transaction {
      id,
      from_account_id: Some(1),
      to_account_id: None,
      amount: 12.5,
      currency: "EUR".to_string(),
      category: None,
      description: Some(format!("entry {}", id)),
      notes: None,
      timestamp: Some("2024-01-01".to_string()),
    };
    let bundle = FinanceBundle {
      transactions: vec![tx(1), tx(2), tx(3)],
      accounts: vec![AccountWithBalance {
        id: 1,
        name: "Checking".to_string(),
        account_type: None,
        currency: Some("EUR".to_string()),
        institution: None,
        balance: None,
      }],
      timestamp: None,
      balance_timestamp: None,
    };

    let out = format_finance(&bundle, 2);

    assert!(out.contains("Transactions (2 of 3):"));
    assert!(out.contains("entry 2"));
    assert!(!out.contains("entry 3"));
    assert!(out.contains("Checking"));
  }
}
