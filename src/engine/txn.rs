use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::model::Event;

use super::index::ResourceSlots;
use super::state::{EngineState, UserSlot};
use super::{EngineError, WalHandle};

/// One atomic unit of work.
///
/// Holds the locks it acquired and the events it intends to write. Locks
/// are taken user first, then resource, everywhere. `commit` is the only
/// path to the log and to memory; dropping the transaction any other way
/// discards the staged events and releases the locks.
pub(super) struct Transaction {
    user: Option<OwnedMutexGuard<UserSlot>>,
    slots: Option<OwnedMutexGuard<ResourceSlots>>,
    staged: Vec<Event>,
    finished: bool,
}

impl Transaction {
    pub fn begin() -> Self {
        Self {
            user: None,
            slots: None,
            staged: Vec::new(),
            finished: false,
        }
    }

    pub fn hold_user(&mut self, guard: OwnedMutexGuard<UserSlot>) {
        debug_assert!(self.slots.is_none(), "user lock must be taken before resource lock");
        self.user = Some(guard);
    }

    pub fn hold_slots(&mut self, guard: OwnedMutexGuard<ResourceSlots>) {
        self.slots = Some(guard);
    }

    pub fn stage(&mut self, event: Event) {
        self.staged.push(event);
    }

    /// Make the staged events durable, then apply them. Once the log write
    /// is handed off the work runs to completion on its own task, so a
    /// caller that gives up waiting cannot leave the log and memory apart.
    pub async fn commit(mut self, wal: &WalHandle, state: &Arc<EngineState>) -> Result<(), EngineError> {
        self.finished = true;
        let events = std::mem::take(&mut self.staged);
        let mut user = self.user.take();
        let mut slots = self.slots.take();
        let wal = wal.clone();
        let state = state.clone();

        let task = tokio::spawn(async move {
            let _gate = state.commit_gate.read().await;
            wal.append(events.clone()).await?;
            for event in &events {
                state.apply(event, user.as_deref_mut(), slots.as_deref_mut());
            }
            Ok::<(), EngineError>(())
        });
        task.await
            .map_err(|e| EngineError::StorageUnavailable(format!("commit task failed: {e}")))?
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && (self.user.is_some() || self.slots.is_some()) {
            debug!(staged = self.staged.len(), "transaction rolled back");
            metrics::counter!(crate::observability::TRANSACTIONS_ROLLED_BACK_TOTAL).increment(1);
        }
    }
}
