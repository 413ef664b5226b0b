use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// User preferences mirrored into local settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub theme: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub language: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub currency: Option<String>,
  /// Preferences this client doesn't know about, kept verbatim
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

impl Preferences {
  /// Set a preference by name.
  pub fn set(&mut self, key: &str, value: &str) {
    match key {
      "theme" => self.theme = Some(value.to_string()),
      "language" => self.language = Some(value.to_string()),
      "currency" => self.currency = Some(value.to_string()),
      other => {
        self
          .extra
          .insert(other.to_string(), Value::String(value.to_string()));
      }
    }
  }

  /// Overlay every preference set in `other` onto `self`.
  pub fn overlay(&mut self, other: &Preferences) {
    if other.theme.is_some() {
      self.theme = other.theme.clone();
    }
    if other.language.is_some() {
      self.language = other.language.clone();
    }
    if other.currency.is_some() {
      self.currency = other.currency.clone();
    }
    for (k, v) in &other.extra {
      self.extra.insert(k.clone(), v.clone());
    }
  }
}

/// Current user's profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
  pub id: i64,
  pub username: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub email: Option<String>,
  /// Absolute URL of the profile photo
  #[serde(default)]
  pub photo: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
  /// Last change of the photo alone
  #[serde(default)]
  pub photo_updated_at: Option<String>,
  #[serde(default)]
  pub preferences: Preferences,
}

/// Partial profile update, as sent by `PUT /api/users/profile`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub preferences: Option<Preferences>,
}

impl ProfileUpdate {
  pub fn is_empty(&self) -> bool {
    self.name.is_none() && self.preferences.is_none()
  }

  /// Fold a newer edit into this one, the newer edit winning per field.
  pub fn merged_with(mut self, newer: ProfileUpdate) -> ProfileUpdate {
    if newer.name.is_some() {
      self.name = newer.name;
    }
    match (&mut self.preferences, newer.preferences) {
      (Some(current), Some(newer)) => current.overlay(&newer),
      (None, Some(newer)) => self.preferences = Some(newer),
      (_, None) => {}
    }
    self
  }
}

/// Account with its server-computed balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountWithBalance {
  pub id: i64,
  pub name: String,
  #[serde(default, rename = "type")]
  pub account_type: Option<String>,
  #[serde(default)]
  pub currency: Option<String>,
  #[serde(default)]
  pub institution: Option<String>,
  /// `None` when the server didn't resolve a balance
  #[serde(default)]
  pub balance: Option<f64>,
}

/// Ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
  pub id: i64,
  #[serde(default)]
  pub from_account_id: Option<i64>,
  #[serde(default)]
  pub to_account_id: Option<i64>,
  pub amount: f64,
  pub currency: String,
  #[serde(default)]
  pub category: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub notes: Option<String>,
  #[serde(default)]
  pub timestamp: Option<String>,
}

/// Accounts and transactions cached as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinanceBundle {
  #[serde(default)]
  pub transactions: Vec<Transaction>,
  #[serde(default)]
  pub accounts: Vec<AccountWithBalance>,
  #[serde(default)]
  pub timestamp: Option<String>,
  #[serde(default)]
  pub balance_timestamp: Option<String>,
}

impl FinanceBundle {
  /// Every account carries a resolved balance.
  pub fn has_balances(&self) -> bool {
    self.accounts.iter().all(|a| a.balance.is_some())
  }
}
