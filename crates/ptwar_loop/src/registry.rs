//! System registry: setup and periodic systems grouped by phase.
//!
//! Registration may happen from several threads at once, so both maps sit
//! behind a single mutex. The tick loop never holds the lock while systems
//! run: it takes a snapshot of the registered systems and releases it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ptwar_system::{Order, System, SystemOrder};

#[derive(Default)]
struct Inner {
    setup: BTreeMap<Order, Vec<Arc<dyn System>>>,
    systems: BTreeMap<Order, Vec<Arc<dyn System>>>,
}

/// Registry of every system known to a game loop.
#[derive(Default)]
pub struct SystemRegistry {
    inner: Mutex<Inner>,
}

impl SystemRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the maps half-written:
        // every mutation is a single push.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a system to run once before the first periodic tick.
    pub fn add_setup(&self, order: Order, system: Arc<dyn System>) {
        self.lock().setup.entry(order).or_default().push(system);
    }

    /// Queue a system to run on every periodic tick.
    pub fn add_system(&self, order: Order, system: Arc<dyn System>) {
        self.lock().systems.entry(order).or_default().push(system);
    }

    /// Register a batch of periodic systems under a single lock acquisition.
    pub fn extend(&self, systems: impl IntoIterator<Item = SystemOrder>) {
        let mut inner = self.lock();
        for entry in systems {
            inner
                .systems
                .entry(entry.order)
                .or_default()
                .push(entry.system);
        }
    }

    /// Snapshot of the setup systems, in phase order.
    #[must_use]
    pub fn setup_snapshot(&self) -> Vec<SystemOrder> {
        flatten(&self.lock().setup)
    }

    /// Snapshot of the periodic systems, in phase order.
    #[must_use]
    pub fn systems_snapshot(&self) -> Vec<SystemOrder> {
        flatten(&self.lock().systems)
    }

    /// Number of setup systems registered.
    #[must_use]
    pub fn setup_count(&self) -> usize {
        self.lock().setup.values().map(Vec::len).sum()
    }

    /// Number of periodic systems registered.
    #[must_use]
    pub fn system_count(&self) -> usize {
        self.lock().systems.values().map(Vec::len).sum()
    }
}

fn flatten(map: &BTreeMap<Order, Vec<Arc<dyn System>>>) -> Vec<SystemOrder> {
    map.iter()
        .flat_map(|(order, systems)| {
            systems
                .iter()
                .map(|system| SystemOrder::from_arc(*order, Arc::clone(system)))
        })
        .collect()
}

impl std::fmt::Debug for SystemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemRegistry")
            .field("setup", &self.setup_count())
            .field("systems", &self.system_count())
            .finish()
    }
}
