//! Shared types for the intent tracker.
//!
//! This crate defines the domain types used across the tracker workspace:
//! intents and their lifecycle states, the opaque external handle, and the
//! event hierarchy published over the tracker's event bus.

pub mod events;
pub mod intent;

pub use events::{DispatchEvent, EventBus, IntentEvent, ReconcileEvent, TrackerEvent};
pub use intent::{
	current_timestamp, ExternalHandle, ExternalState, Intent, IntentKind, IntentStatus, NewIntent,
};
