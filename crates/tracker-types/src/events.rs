use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{Intent, IntentStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrackerEvent {
	Intent(IntentEvent),
	Reconcile(ReconcileEvent),
	Dispatch(DispatchEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IntentEvent {
	Created {
		intent: Intent,
	},
	Armed {
		intent_id: String,
		handle: String,
	},
	StatusChanged {
		intent_id: String,
		from: IntentStatus,
		to: IntentStatus,
	},
	Filled {
		intent_id: String,
		delta: f64,
		progress: f64,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReconcileEvent {
	CycleCompleted {
		cycle: u64,
		checked: usize,
		failures: usize,
	},
	QueryFailed {
		intent_id: String,
		error: String,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchEvent {
	YieldCollected {
		intent_id: String,
		amount: f64,
	},
	YieldCollectionFailed {
		intent_id: String,
		error: String,
	},
	Cancelled {
		intent_id: String,
	},
	CancellationFailed {
		intent_id: String,
		error: String,
	},
}

pub struct EventBus {
	sender: broadcast::Sender<TrackerEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers. Send errors only
	/// mean nobody is listening, so callers usually ignore them.
	pub fn publish(
		&self,
		event: TrackerEvent,
	) -> Result<(), broadcast::error::SendError<TrackerEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}

impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}
