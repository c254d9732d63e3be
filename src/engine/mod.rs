mod error;
pub mod index;
mod mutations;
mod queries;
mod state;
mod txn;

pub use error::EngineError;
pub use index::{IntervalOverlapIndex, ResourceSlots, Slot};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{FixedOffset, Offset, Utc};
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tracing::info;
use ulid::Ulid;

use crate::capability::Capabilities;
use crate::model::*;
use crate::wal::Wal;

use state::{EngineState, UserSlot};

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. One write and fsync for the whole batch; a failed batch leaves
///    nothing in the file.
/// 4. Respond to every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel drained, flush the batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type AppendBatch = Vec<(Vec<Event>, oneshot::Sender<io::Result<()>>)>;

fn flush_batch(wal: &mut Wal, batch: &AppendBatch) -> io::Result<()> {
    wal.append_batch(batch.iter().flat_map(|(events, _)| events))
}

fn respond_batch(batch: AppendBatch, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { events, response } => {
            let batch = vec![(events, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// Cloneable sender side of the WAL writer.
#[derive(Clone)]
pub(super) struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
}

impl WalHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))
    }

    pub async fn append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        self.request(|response| WalCommand::Append { events, response })
            .await?
            .map_err(|e| EngineError::StorageUnavailable(format!("WAL append: {e}")))
    }

    pub async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError> {
        self.request(|response| WalCommand::Compact { events, response })
            .await?
            .map_err(|e| EngineError::StorageUnavailable(format!("WAL compaction: {e}")))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .unwrap_or(0)
    }
}

// ── Engine ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub wal_path: PathBuf,
    /// Longest wait for a user or resource lock before giving up with
    /// `OverlapConflict`.
    pub lock_timeout: Duration,
    /// The canonical time zone all calendar math uses.
    pub utc_offset: FixedOffset,
}

impl EngineSettings {
    pub fn new(wal_path: PathBuf) -> Self {
        Self {
            wal_path,
            lock_timeout: Duration::from_secs(2),
            utc_offset: Utc.fix(),
        }
    }
}

/// The booking engine: admission, cancellation and amendment of
/// reservations, plus calendar administration.
pub struct Engine {
    state: Arc<EngineState>,
    wal: WalHandle,
    caps: Capabilities,
    settings: EngineSettings,
    /// Serializes calendar define/replace/remove.
    calendar_admin: Mutex<()>,
}

impl Engine {
    /// Replay the WAL, then start the group-commit writer.
    pub async fn open(settings: EngineSettings, caps: Capabilities) -> io::Result<Self> {
        let events = Wal::replay(&settings.wal_path)?;
        let wal = Wal::open(&settings.wal_path)?;

        let state = Arc::new(EngineState::default());
        for event in &events {
            state.apply_locked(event).await;
        }
        info!(
            events = events.len(),
            calendars = state.calendars.len(),
            reservations = state.reservations.len(),
            "engine state replayed from {}",
            settings.wal_path.display()
        );

        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));

        Ok(Self {
            state,
            wal: WalHandle { tx },
            caps,
            settings,
            calendar_admin: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Lock a user's active-reservation slot. `resource_id` names the
    /// contended booking in the timeout error.
    pub(super) async fn lock_user(
        &self,
        user_id: Ulid,
        resource_id: Ulid,
    ) -> Result<OwnedMutexGuard<UserSlot>, EngineError> {
        let slot = self.state.user_slot(user_id);
        self.acquire(slot, resource_id).await
    }

    pub(super) async fn lock_resource(
        &self,
        resource_id: Ulid,
    ) -> Result<OwnedMutexGuard<ResourceSlots>, EngineError> {
        let slots = self.state.index.slots(resource_id);
        self.acquire(slots, resource_id).await
    }

    async fn acquire<T>(
        &self,
        cell: Arc<Mutex<T>>,
        resource_id: Ulid,
    ) -> Result<OwnedMutexGuard<T>, EngineError> {
        let started = Instant::now();
        let guard = tokio::time::timeout(self.settings.lock_timeout, cell.lock_owned()).await;
        metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
            .record(started.elapsed().as_secs_f64());
        guard.map_err(|_| EngineError::OverlapConflict {
            resource_id,
            conflicting: None,
        })
    }

    /// Rewrite the WAL as the minimal event list for the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.state.commit_gate.write().await;
        let events = self.state.snapshot_events();
        let count = events.len();
        self.wal.compact(events).await?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
