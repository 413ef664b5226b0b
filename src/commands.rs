use clap::Subcommand;
use std::path::PathBuf;

/// Available commands. Reads start with a sync point; edits queue locally
/// and then run one.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
  /// Show the user profile
  Profile,
  /// Show accounts and recent transactions
  Finance {
    /// Number of transactions to list
    #[arg(short, long, default_value_t = 10)]
    limit: usize,
  },
  /// Change the display name
  SetName { name: String },
  /// Change a preference (theme, language, currency, ...)
  SetPref { key: String, value: String },
  /// Upload a new profile photo
  UploadPhoto { file: PathBuf },
  /// Write the cached profile photo to a file
  Photo { output: PathBuf },
  /// Push pending edits and refresh stale caches
  Sync,
  /// Show cache versions and pending edits without touching the network
  Status,
  /// Check server health
  Health,
  /// Remove all cached data and local settings
  Logout,
}

impl Command {
  /// Whether a sync point runs before the command itself.
  pub fn syncs_first(&self) -> bool {
    matches!(
      self,
      Command::Profile
        | Command::Finance { .. }
        | Command::UploadPhoto { .. }
        | Command::Photo { .. }
        | Command::Sync
    )
  }
}
