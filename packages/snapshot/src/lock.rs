//! Process-wide mutual exclusion for create and restore.
//!
//! Only one snapshot operation may run at a time. A second caller is
//! rejected immediately instead of queueing behind a long restore.

use crate::error::{SnapshotError, SnapshotResult};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Which operation holds the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Building an encrypted archive
    Create,
    /// Restoring from an encrypted archive
    Restore,
}

impl OperationKind {
    /// Name used in logs and audit events
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "snapshot_create",
            OperationKind::Restore => "snapshot_restore",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static GLOBAL_LOCK: Lazy<ExclusiveOperationLock> = Lazy::new(ExclusiveOperationLock::new);

/// Try-lock that admits one operation at a time.
///
/// Clones share the same lock.
#[derive(Clone, Default)]
pub struct ExclusiveOperationLock {
    gate: Arc<tokio::sync::Mutex<()>>,
    holder: Arc<Mutex<Option<OperationKind>>>,
}

impl ExclusiveOperationLock {
    /// A lock independent of every other lock
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock shared by the whole process
    pub fn global() -> Self {
        GLOBAL_LOCK.clone()
    }

    /// Take the lock for `kind`, or fail at once with `OperationInProgress`.
    /// The lock is released when the guard drops, on every exit path.
    pub fn try_acquire(&self, kind: OperationKind) -> SnapshotResult<OperationGuard> {
        let guard = Arc::clone(&self.gate).try_lock_owned().map_err(|_| {
            log::warn!("Rejected {kind}: another operation is in progress");
            SnapshotError::OperationInProgress
        })?;

        if let Ok(mut holder) = self.holder.lock() {
            *holder = Some(kind);
        }
        log::debug!("{kind} acquired the operation lock");

        Ok(OperationGuard {
            _guard: guard,
            kind,
            holder: Arc::clone(&self.holder),
        })
    }

    /// Whether some operation currently holds the lock
    pub fn is_held(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Operation currently holding the lock
    pub fn holder(&self) -> Option<OperationKind> {
        self.holder.lock().ok().and_then(|holder| *holder)
    }
}

/// Proof of holding the operation lock
pub struct OperationGuard {
    _guard: OwnedMutexGuard<()>,
    kind: OperationKind,
    holder: Arc<Mutex<Option<OperationKind>>>,
}

impl OperationGuard {
    /// Operation the lock was taken for
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.holder.lock() {
            *holder = None;
        }
        log::debug!("{} released the operation lock", self.kind);
    }
}
