#![forbid(unsafe_code)]

//! Path-based property observation for reactive state.
//!
//! This crate provides the observation half of Reflow:
//!
//! - [`Observed`]: a shared, single-threaded property bag whose mutations
//!   notify registered observers.
//! - Path observers: `(path, handler)` entries dispatched synchronously on an
//!   exact path match, in registration order.
//! - Observer chains: multi-segment dotted paths (`"a.b.c"`) are watched at
//!   every segment, so replacing an intermediate object re-links the rest of
//!   the chain against the new object graph.
//! - [`NotificationGate`]: reference-counted suspend/resume of delivery with
//!   a coalescing queue for deferred notifications.
//!
//! # Architecture
//!
//! `Observed` uses `Rc<...>` with interior mutability for single-threaded
//! shared ownership. Chain links hold `Weak` references back to their chain
//! core and to their target objects, so no strong cycles are formed through
//! the subscription graph.
//!
//! # Invariants
//!
//! 1. Observers for a path are dispatched in registration order.
//! 2. A chain exists if and only if its path has two or more segments.
//! 3. Setting a property to a value equal to the current one is a no-op: no
//!    notification fires.
//! 4. Suspend count never goes below zero; delivery resumes only when the
//!    count returns to zero.
//! 5. While suspended, at most one queue entry exists per path, carrying the
//!    earliest recorded `before` and the latest recorded `after`.
//!
//! # Failure Modes
//!
//! - Notifying an unobserved path: silent no-op.
//! - A chain traversing an absent or non-object intermediate: the chain is
//!   truncated there, not an error, and re-extends when the value reappears.
//! - A named handler with no current definition: skipped at delivery time.

pub mod chain;
pub mod notify;
pub mod observed;
pub mod registry;
pub mod value;

pub use notify::NotificationGate;
pub use observed::{ObserveOptions, Observed};
pub use registry::{ObserverFn, ObserverId};
pub use value::{Value, ValueError};
