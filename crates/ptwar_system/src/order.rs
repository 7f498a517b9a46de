//! Scheduling phases.

use std::fmt;

/// Priority bucket a system runs in during a tick.
///
/// Phases are totally ordered: within one tick, every queued `First` system
/// is dispatched before any `Second` system, and so on down to `Last`. No
/// ordering is guaranteed between systems that share a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Order {
    First,
    Second,
    Third,
    Fourth,
    Last,
}

impl Order {
    /// Every phase, in precedence order.
    pub const ALL: [Order; 5] = [
        Order::First,
        Order::Second,
        Order::Third,
        Order::Fourth,
        Order::Last,
    ];

    /// Number of phases.
    pub const COUNT: usize = Self::ALL.len();

    /// Position of this phase in [`Order::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Order::First => "first",
            Order::Second => "second",
            Order::Third => "third",
            Order::Fourth => "fourth",
            Order::Last => "last",
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
