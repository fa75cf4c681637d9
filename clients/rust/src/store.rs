//! Durable storage for assignments and the background task that saves them.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::StoreError;
use crate::assignment::Assignments;

/// Loads and saves the full assignment map.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Read previously saved assignments. An absent store yields an empty map.
    async fn load(&self) -> Result<Assignments, StoreError>;

    /// Replace the saved assignments with `assignments`.
    async fn save(&self, assignments: &Assignments) -> Result<(), StoreError>;
}

/// Process-local store, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Assignments>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assignments(assignments: Assignments) -> Self {
        Self {
            saved: Mutex::new(assignments),
            ..Self::default()
        }
    }

    /// Fail both loads and saves while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// What was last saved.
    pub fn snapshot(&self) -> Assignments {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store set to fail".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn load(&self) -> Result<Assignments, StoreError> {
        self.check()?;
        Ok(self.snapshot())
    }

    async fn save(&self, assignments: &Assignments) -> Result<(), StoreError> {
        self.check()?;
        *self
            .saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = assignments.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// JSON file store. Saves write a sibling temp file and rename it over the
/// target so readers never see a partial document.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AssignmentStore for FileStore {
    async fn load(&self) -> Result<Assignments, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_assignments(&path))
            .await
            .map_err(|e| StoreError::Unavailable(format!("load task failed: {e}")))?
    }

    async fn save(&self, assignments: &Assignments) -> Result<(), StoreError> {
        let path = self.path.clone();
        let body = serde_json::to_vec_pretty(assignments)?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .map_err(|e| StoreError::Unavailable(format!("save task failed: {e}")))?
    }
}

fn read_assignments(path: &Path) -> Result<Assignments, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Assignments::new()),
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(Assignments::new());
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Saves the shared assignment map off the caller's path.
///
/// Callers only signal that the map changed. The writer copies the live map
/// once per save, so every change signalled before `stop` is covered by a
/// later save. Failures are logged and never reach the caller.
#[derive(Debug, Default)]
pub struct AssignmentPersister {
    tx: Mutex<Option<mpsc::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AssignmentPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the writer task on the current runtime. No-op when already running.
    pub fn start(&self, store: Arc<dyn AssignmentStore>, assignments: Arc<RwLock<Assignments>>) {
        let mut tx_slot = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        if tx_slot.is_some() {
            return;
        }
        // one pending signal is enough: the save it triggers reads the map afterwards
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let latest = assignments
                    .read()
                    .unwrap_or_else(|p| p.into_inner())
                    .clone();
                match store.save(&latest).await {
                    Ok(()) => debug!(assignments = latest.len(), "saved assignments"),
                    Err(e) => warn!(error = %e, "failed to save assignments"),
                }
            }
        });
        *tx_slot = Some(tx);
        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
    }

    pub fn is_running(&self) -> bool {
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Signal that the shared map changed. Returns `false` when the writer
    /// isn't running.
    pub fn mark_changed(&self) -> bool {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        match tx.as_ref() {
            // a full channel already holds a save that will see this change
            Some(tx) => !matches!(tx.try_send(()), Err(TrySendError::Closed(()))),
            None => false,
        }
    }

    /// Close the signal channel and wait until the pending save is written.
    pub async fn stop(&self) {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
        drop(tx);
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "assignment writer task ended abnormally");
        }
    }
}
