//! Per-phase queues feeding the tick loop.
//!
//! Each [`Order`] has its own bounded queue. Systems are placed inline when
//! there is room; when a bucket is full the placement moves to a spawned task
//! that waits for capacity, so the drain side can keep consuming while the
//! enqueuing side is held back.
//!
//! The drain side counts what each phase still owes for the current batch
//! and only receives from the highest-priority phase with a non-zero count.
//! A deferred placement that has not landed yet therefore holds back every
//! later phase instead of letting it overtake.

use std::sync::Arc;

use ptwar_system::{Order, System, SystemOrder};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

pub(crate) struct PhaseQueues {
    senders: Vec<mpsc::Sender<Arc<dyn System>>>,
    receivers: Vec<mpsc::Receiver<Arc<dyn System>>>,
    pending: [usize; Order::COUNT],
}

impl PhaseQueues {
    pub(crate) fn new(capacity: usize) -> Self {
        let (senders, receivers) = Order::ALL
            .iter()
            .map(|_| mpsc::channel(capacity))
            .unzip();
        Self {
            senders,
            receivers,
            pending: [0; Order::COUNT],
        }
    }

    /// Place a system into the queue of its phase.
    pub(crate) fn enqueue(&mut self, entry: SystemOrder) {
        let index = entry.order.index();
        let tx = &self.senders[index];
        match tx.try_send(entry.system) {
            Ok(()) => self.pending[index] += 1,
            Err(TrySendError::Full(system)) => {
                debug!(order = %entry.order, "phase queue full, deferring enqueue");
                self.pending[index] += 1;
                let tx = tx.clone();
                tokio::spawn(async move {
                    // Fails only once the queues are dropped at shutdown.
                    let _ = tx.send(system).await;
                });
            }
            Err(TrySendError::Closed(_)) => {
                debug!(order = %entry.order, "phase queue closed, system dropped");
            }
        }
    }

    /// Wait for the next system of the highest-priority phase that still has
    /// systems owed. Returns `None` once nothing is owed.
    pub(crate) async fn next(&mut self) -> Option<Arc<dyn System>> {
        let index = self.pending.iter().position(|&owed| owed > 0)?;
        let system = self.receivers[index].recv().await?;
        self.pending[index] -= 1;
        Some(system)
    }

    /// Systems enqueued but not yet handed out.
    pub(crate) fn pending(&self) -> usize {
        self.pending.iter().sum()
    }

    /// Discard everything still owed, including placements that have not
    /// landed yet. Returns the number of systems dropped.
    pub(crate) fn clear(&mut self) -> usize {
        for rx in &mut self.receivers {
            while rx.try_recv().is_ok() {}
        }
        let dropped = self.pending();
        self.pending = [0; Order::COUNT];
        dropped
    }
}
