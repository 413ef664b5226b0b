//! In-process fakes shared by the cache tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use super::traits::{
  BinarySource, Cacheable, Fetched, MutableSource, RecordSource, RecordVersion, WritebackObserver,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
  pub text: String,
  pub valid: bool,
}

impl Note {
  pub fn new(text: &str) -> Self {
    Self {
      text: text.to_string(),
      valid: true,
    }
  }
}

impl Cacheable for Note {
  fn namespace() -> &'static str {
    "note"
  }

  fn is_valid(&self) -> bool {
    self.valid
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteUpdate {
  pub text: String,
}

struct FakeState {
  record: Note,
  version: RecordVersion,
  next_version: Option<RecordVersion>,
  fail_probe: bool,
  fail_fetch: bool,
  fail_mutate: bool,
  probe_delay: Option<Duration>,
  received: Vec<NoteUpdate>,
}

/// Scriptable remote record with call counters.
pub struct FakeSource {
  state: Mutex<FakeState>,
  pub probes: AtomicU32,
  pub fetches: AtomicU32,
  pub mutations: AtomicU32,
  hold: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeSource {
  pub fn new(text: &str, version: &str) -> Self {
    Self {
      state: Mutex::new(FakeState {
        record: Note::new(text),
        version: RecordVersion::new(version),
        next_version: None,
        fail_probe: false,
        fail_fetch: false,
        fail_mutate: false,
        probe_delay: None,
        received: Vec::new(),
      }),
      probes: AtomicU32::new(0),
      fetches: AtomicU32::new(0),
      mutations: AtomicU32::new(0),
      hold: Mutex::new(None),
    }
  }

  pub fn set_server(&self, text: &str, version: &str) {
    let mut state = self.state.lock().unwrap();
    state.record = Note::new(text);
    state.version = RecordVersion::new(version);
  }

  pub fn set_next_version(&self, version: &str) {
    self.state.lock().unwrap().next_version = Some(RecordVersion::new(version));
  }

  pub fn fail_probe(&self, fail: bool) {
    self.state.lock().unwrap().fail_probe = fail;
  }

  pub fn fail_fetch(&self, fail: bool) {
    self.state.lock().unwrap().fail_fetch = fail;
  }

  pub fn fail_mutate(&self, fail: bool) {
    self.state.lock().unwrap().fail_mutate = fail;
  }

  pub fn delay_probe(&self, delay: Duration) {
    self.state.lock().unwrap().probe_delay = Some(delay);
  }

  /// Hold every mutation until released.
  ///
  /// Returns `(started, release)`: `started` is notified when a mutation
  /// reaches the fake, `release` lets it answer.
  pub fn hold_mutations(&self) -> (Arc<Notify>, Arc<Notify>) {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    *self.hold.lock().unwrap() = Some((started.clone(), release.clone()));
    (started, release)
  }

  pub fn received(&self) -> Vec<NoteUpdate> {
    self.state.lock().unwrap().received.clone()
  }

  pub fn count(counter: &AtomicU32) -> u32 {
    counter.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl RecordSource for FakeSource {
  type Record = Note;

  async fn probe(&self) -> Result<RecordVersion> {
    self.probes.fetch_add(1, Ordering::SeqCst);
    let (delay, fail, version) = {
      let state = self.state.lock().unwrap();
      (state.probe_delay, state.fail_probe, state.version.clone())
    };
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if fail {
      return Err(eyre!("connection refused"));
    }
    Ok(version)
  }

  async fn fetch(&self) -> Result<Fetched<Note>> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    let state = self.state.lock().unwrap();
    if state.fail_fetch {
      return Err(eyre!("HTTP 503"));
    }
    Ok(Fetched::new(state.record.clone(), Some(state.version.clone())))
  }
}

#[async_trait]
impl MutableSource for FakeSource {
  type Update = NoteUpdate;

  async fn mutate(&self, update: &NoteUpdate) -> Result<Fetched<Note>> {
    let count = self.mutations.fetch_add(1, Ordering::SeqCst) + 1;

    let hold = self.hold.lock().unwrap().clone();
    if let Some((started, release)) = hold {
      started.notify_one();
      release.notified().await;
    }

    let mut state = self.state.lock().unwrap();
    if state.fail_mutate {
      return Err(eyre!("HTTP 500"));
    }
    state.received.push(update.clone());
    state.record = Note::new(&update.text);
    state.version = state
      .next_version
      .take()
      .unwrap_or_else(|| RecordVersion::new(format!("m{}", count)));
    Ok(Fetched::new(state.record.clone(), Some(state.version.clone())))
  }
}

/// Serves fixed bytes per URL and counts downloads.
#[derive(Default)]
pub struct FakeBinarySource {
  files: Mutex<HashMap<String, Vec<u8>>>,
  pub downloads: AtomicU32,
}

impl FakeBinarySource {
  pub fn with_file(url: &str, bytes: &[u8]) -> Self {
    let source = Self::default();
    source.put(url, bytes);
    source
  }

  pub fn put(&self, url: &str, bytes: &[u8]) {
    self
      .files
      .lock()
      .unwrap()
      .insert(url.to_string(), bytes.to_vec());
  }
}

#[async_trait]
impl BinarySource for FakeBinarySource {
  async fn get_binary(&self, url: &str) -> Result<Vec<u8>> {
    self.downloads.fetch_add(1, Ordering::SeqCst);
    self
      .files
      .lock()
      .unwrap()
      .get(url)
      .cloned()
      .ok_or_else(|| eyre!("HTTP 404 for {}", url))
  }
}

/// Records every payload it is notified about.
#[derive(Default)]
pub struct RecordingObserver {
  pub seen: Mutex<Vec<Note>>,
}

impl WritebackObserver<Note> for RecordingObserver {
  fn on_writeback(&self, record: &Note) {
    self.seen.lock().unwrap().push(record.clone());
  }
}
