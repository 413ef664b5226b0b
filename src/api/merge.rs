//! Field-level merge of a server profile with unsynced local edits.
//!
//! Precedence per field:
//!
//! | field                                   | winner              |
//! |-----------------------------------------|---------------------|
//! | `name`                                  | local edit, if set  |
//! | `preferences.*`                         | local edit, per key |
//! | `id`, `username`, `email`               | server              |
//! | `photo`, `photo_updated_at`             | server              |
//! | `created_at`, `updated_at`              | server              |
//!
//! The merged value is a view for display. It is never written to the
//! record cache, whose payload must match its server version.

use super::types::{ProfileUpdate, UserProfile};

pub struct ProfileMerge;

impl ProfileMerge {
  pub fn apply(server: &UserProfile, local: Option<&ProfileUpdate>) -> UserProfile {
    let mut merged = server.clone();
    let Some(local) = local else {
      return merged;
    };

    if let Some(name) = &local.name {
      merged.name = Some(name.clone());
    }
    if let Some(prefs) = &local.preferences {
      merged.preferences.overlay(prefs);
    }
    merged
  }
}
