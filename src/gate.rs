//! Admission gate bounding how many operations of a phase are in flight
//!
//! A counting gate with FIFO hand-off. Callers `acquire` a slot before doing I/O and
//! give it back when the returned [`GatePermit`] is dropped. A pending acquire is
//! abandoned as soon as the run's cancellation token fires.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Counting gate shared by all leaf tasks of one phase
///
/// Cloning is cheap and every clone refers to the same slots.
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
}

/// One admitted slot; returns itself to the gate on drop
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct GatePermit {
    permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// Create a gate with `count` free slots
    ///
    /// Returns [`Error::InvalidArgument`] for a negative count or one larger than the
    /// gate can represent.
    pub fn new(count: i64) -> Result<Self> {
        let slots = usize::try_from(count)
            .map_err(|_| Error::invalid_argument("count", format!("{count} is negative")))?;
        if slots > Semaphore::MAX_PERMITS {
            return Err(Error::invalid_argument(
                "count",
                format!("{count} exceeds {}", Semaphore::MAX_PERMITS),
            ));
        }
        Ok(Self {
            slots: Arc::new(Semaphore::new(slots)),
        })
    }

    /// Take a slot, waiting in FIFO order if none is free
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires before a slot is granted. An
    /// already-cancelled token wins even when slots are free.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            permit = Arc::clone(&self.slots).acquire_owned() => permit
                .map(|permit| GatePermit { permit })
                .map_err(|_| Error::Internal("admission gate closed".to_string())),
        }
    }

    /// Return one slot: wakes the oldest waiter, or adds a free slot if nobody waits
    ///
    /// Pairs with [`GatePermit::forget`]. Releasing more slots than were taken grows
    /// the gate.
    pub fn release(&self) {
        self.slots.add_permits(1);
    }

    /// Number of slots free right now
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

impl GatePermit {
    /// Keep the slot taken after this permit is gone; call [`AdmissionGate::release`] later
    pub fn forget(self) {
        self.permit.forget();
    }
}
