//! Agent pool: bounded worker slots.
//!
//! The pool is a counting semaphore of `max_agents` slots. Acquiring a slot
//! suspends the caller (without busy-waiting) until one frees up or the run
//! is cancelled. The returned `AgentSlot` releases its permit on drop, so a
//! panicking or failing worker can never starve the pool.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::hlog_debug;
use crate::plan::task::WorkerId;

/// A held worker slot.
///
/// Carries the identity of the worker occupying the slot. The underlying
/// permit is released when the slot is dropped.
#[derive(Debug)]
pub struct AgentSlot {
    worker_id: WorkerId,
    _permit: OwnedSemaphorePermit,
}

impl AgentSlot {
    /// The worker identity assigned to this slot.
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }
}

/// Bounded pool of agent worker slots.
pub struct AgentPool {
    semaphore: Arc<Semaphore>,
    max_agents: usize,
}

impl AgentPool {
    /// Create a pool with the given number of slots.
    pub fn new(max_agents: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_agents)),
            max_agents,
        }
    }

    /// Maximum number of concurrently held slots.
    pub fn max_agents(&self) -> usize {
        self.max_agents
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.max_agents - self.available()
    }

    /// Acquire a slot, waiting until one is free or the run is cancelled.
    ///
    /// Each acquisition mints a fresh `WorkerId` for the dispatched worker.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<AgentSlot> {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::select! {
            permit = semaphore.acquire_owned() => {
                let permit = permit.map_err(|_| Error::Cancelled)?;
                let worker_id = WorkerId::new();
                hlog_debug!(
                    "Pool slot acquired by worker {} ({} free)",
                    worker_id.short(),
                    self.available()
                );
                Ok(AgentSlot {
                    worker_id,
                    _permit: permit,
                })
            }
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}
