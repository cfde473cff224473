//! Core reconciliation engine for the intent tracker.
//!
//! Ties the intent store, the external state adapter and the action
//! dispatcher together into a periodic, cancellable reconciliation loop.

pub mod clock;
mod reconciler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use reconciler::{
	CycleStats, LoopState, Reconciler, ReconcilerBuilder, ReconcilerConfig, ReconcilerError,
};
