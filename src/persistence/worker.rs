use std::path::PathBuf;

use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use super::snapshot::{Snapshot, write_snapshot};
use crate::utils::error::StorageError;

/// Runs at most one snapshot write on tokio's blocking pool.
///
/// The write owns its snapshot. The broker checks for completion with
/// [`SnapshotWorker::poll`] while holding its lock, and shutdown awaits the
/// write through [`PendingSave::wait`] after releasing it.
#[derive(Debug, Default)]
pub struct SnapshotWorker {
    running: Option<PendingSave>,
}

/// A background write in progress.
#[derive(Debug)]
pub struct PendingSave {
    handle: JoinHandle<()>,
    result: oneshot::Receiver<Result<(), StorageError>>,
}

impl PendingSave {
    /// Waits for the write to finish.
    pub async fn wait(mut self) -> Result<(), StorageError> {
        if self.handle.await.is_err() {
            return Err(StorageError::WorkerPanicked);
        }
        self.result
            .try_recv()
            .unwrap_or(Err(StorageError::WorkerPanicked))
    }
}

impl SnapshotWorker {
    pub fn is_busy(&self) -> bool {
        self.running.is_some()
    }

    /// Starts writing `snapshot` to `path`. Must be called from within a
    /// tokio runtime.
    pub fn spawn(&mut self, path: PathBuf, snapshot: Snapshot) -> Result<(), StorageError> {
        if self.running.is_some() {
            return Err(StorageError::Busy);
        }
        let runtime = Handle::try_current().map_err(|_| StorageError::NoRuntime)?;

        let (tx, result) = oneshot::channel();
        let handle = runtime.spawn_blocking(move || {
            // the receiver is gone only if the worker was dropped
            let _ = tx.send(write_snapshot(&path, &snapshot));
        });
        self.running = Some(PendingSave { handle, result });
        Ok(())
    }

    /// Takes the result of a finished write; `None` while idle or running.
    pub fn poll(&mut self) -> Option<Result<(), StorageError>> {
        let pending = self.running.as_mut()?;
        if !pending.handle.is_finished() {
            return None;
        }
        let outcome = match pending.result.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(StorageError::WorkerPanicked),
        };
        self.running = None;
        Some(outcome)
    }

    /// Hands over the running write so it can be awaited without holding
    /// the broker lock.
    pub fn take(&mut self) -> Option<PendingSave> {
        self.running.take()
    }
}
