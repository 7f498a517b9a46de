//! The system contract and registration helpers.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::context::{ShutdownSignal, TickContext};
use crate::order::Order;

/// A unit of per-tick behaviour.
///
/// The scheduler treats systems as stateless: any world state a system
/// mutates is owned by the system itself. `on_tick` returns nothing, so a
/// system that needs to report a failure must do so through its own side
/// channel (a hub topic, a log line).
pub trait System: Send + Sync {
    /// Execute one tick step.
    fn on_tick<'a>(&'a self, ctx: &'a TickContext) -> BoxFuture<'a, ()>;

    /// Name used in log output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Adapts a synchronous closure into a [`System`].
pub struct SystemFn<F> {
    name: String,
    func: F,
}

impl<F> SystemFn<F>
where
    F: Fn(&TickContext) + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> System for SystemFn<F>
where
    F: Fn(&TickContext) + Send + Sync + 'static,
{
    fn on_tick<'a>(&'a self, ctx: &'a TickContext) -> BoxFuture<'a, ()> {
        async move { (self.func)(ctx) }.boxed()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for SystemFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemFn").field("name", &self.name).finish()
    }
}

/// A system bound to the phase it runs in. Immutable once created.
#[derive(Clone)]
pub struct SystemOrder {
    pub order: Order,
    pub system: Arc<dyn System>,
}

impl SystemOrder {
    #[must_use]
    pub fn new(order: Order, system: impl System + 'static) -> Self {
        Self {
            order,
            system: Arc::new(system),
        }
    }

    /// Bind an already shared system.
    #[must_use]
    pub fn from_arc(order: Order, system: Arc<dyn System>) -> Self {
        Self { order, system }
    }
}

impl fmt::Debug for SystemOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemOrder")
            .field("order", &self.order)
            .field("system", &self.system.name())
            .finish()
    }
}

/// Bulk source of systems, queried once at registration time.
///
/// Domain modules (world state, AI, economy) implement this to hand their
/// whole set of systems to the scheduler in one call.
pub trait SystemsProvider {
    fn systems(&self, shutdown: &ShutdownSignal) -> Vec<SystemOrder>;
}
