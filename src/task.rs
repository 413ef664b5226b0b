//! Supervised fire-and-forget tasks.
//!
//! Detached work gets its own error boundary: the failure is logged once,
//! with the task name, and never reaches the caller.

use color_eyre::Result;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn `future` in the background, logging its error exactly once.
pub fn spawn_supervised<F>(name: &'static str, future: F) -> JoinHandle<()>
where
  F: Future<Output = Result<()>> + Send + 'static,
{
  tokio::spawn(async move {
    match future.await {
      Ok(()) => debug!(task = name, "Background task finished"),
      Err(e) => warn!(task = name, error = %e, "Background task failed"),
    }
  })
}

/// Tracks detached tasks so they can be drained before shutdown.
#[derive(Clone, Default)]
pub struct TaskSet {
  handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Spawn a supervised task and keep its handle.
  pub fn spawn<F>(&self, name: &'static str, future: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    let handle = spawn_supervised(name, future);
    match self.handles.lock() {
      Ok(mut handles) => {
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
      }
      // The task still runs; it just cannot be drained.
      Err(e) => warn!(task = name, error = %e, "Task set lock poisoned"),
    }
  }

  /// Wait for every task spawned so far.
  pub async fn drain(&self) {
    let handles = match self.handles.lock() {
      Ok(mut handles) => std::mem::take(&mut *handles),
      Err(_) => return,
    };

    for handle in handles {
      // A panicking task is logged by the runtime; nothing left to report.
      let _ = handle.await;
    }
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.handles.lock().map(|h| h.len()).unwrap_or(0)
  }
}
