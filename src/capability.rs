//! Collaborators the engine consumes but does not own: the resource
//! catalog, the identity service and the clock. Each is injected at
//! composition time; in-memory implementations back tests and embedding.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{Ms, Resource};

/// Failure reaching a collaborator. Surfaced to callers as `StorageUnavailable`.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CapabilityError(pub String);

impl From<CapabilityError> for EngineError {
    fn from(e: CapabilityError) -> Self {
        EngineError::StorageUnavailable(e.0)
    }
}

#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn get_resource(&self, id: Ulid) -> Result<Option<Resource>, CapabilityError>;

    /// Whether any resource references the calendar.
    async fn calendar_in_use(&self, calendar_id: Ulid) -> Result<bool, CapabilityError>;
}

#[async_trait]
pub trait Identity: Send + Sync {
    /// True iff the user exists and is active.
    async fn user_exists(&self, id: Ulid) -> Result<bool, CapabilityError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Ms;
}

/// Everything the engine needs from the outside world.
#[derive(Clone)]
pub struct Capabilities {
    pub catalog: Arc<dyn ResourceCatalog>,
    pub identity: Arc<dyn Identity>,
    pub clock: Arc<dyn Clock>,
}

// ── Clocks ───────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self { now: AtomicI64::new(now) }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

// ── In-memory catalog / identity ─────────────────────────────────

#[derive(Default)]
pub struct InMemoryCatalog {
    resources: DashMap<Ulid, Resource>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    /// Returns false if the resource is unknown.
    pub fn set_active(&self, id: Ulid, active: bool) -> bool {
        match self.resources.get_mut(&id) {
            Some(mut r) => {
                r.active = active;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &Ulid) -> Option<Resource> {
        self.resources.remove(id).map(|(_, r)| r)
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryCatalog {
    async fn get_resource(&self, id: Ulid) -> Result<Option<Resource>, CapabilityError> {
        Ok(self.resources.get(&id).map(|e| e.value().clone()))
    }

    async fn calendar_in_use(&self, calendar_id: Ulid) -> Result<bool, CapabilityError> {
        Ok(self.resources.iter().any(|e| e.calendar_id == calendar_id))
    }
}

#[derive(Default)]
pub struct InMemoryIdentity {
    /// user id → active flag
    users: DashMap<Ulid, bool>,
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: Ulid) {
        self.users.insert(id, true);
    }

    pub fn deactivate(&self, id: Ulid) {
        if let Some(mut active) = self.users.get_mut(&id) {
            *active = false;
        }
    }
}

#[async_trait]
impl Identity for InMemoryIdentity {
    async fn user_exists(&self, id: Ulid) -> Result<bool, CapabilityError> {
        Ok(self.users.get(&id).is_some_and(|active| *active))
    }
}
