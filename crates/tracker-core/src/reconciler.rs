//! Periodic reconciliation loop.
//!
//! One loop instance owns the polling schedule for a tracker: each cycle it
//! queries the external state of every active intent, applies fill and
//! expiry transitions through the store, and hands follow-up actions to the
//! dispatcher. Cycles never overlap, per-intent failures never abort the
//! rest of a cycle, and `stop()` lets an in-flight cycle finish so no
//! mutation is left half-applied.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use tracker_adapter::{AdapterError, AdapterService};
use tracker_dispatch::{ActionDispatcher, DispatchError};
use tracker_storage::{IntentStore, StoreError};
use tracker_types::{
	EventBus, ExternalState, Intent, IntentEvent, IntentStatus, ReconcileEvent, TrackerEvent,
};

/// Errors surfaced by reconciliation of a single intent.
#[derive(Debug, Error)]
pub enum ReconcilerError {
	#[error("Store error: {0}")]
	Store(#[from] StoreError),
	#[error("Dispatch error: {0}")]
	Dispatch(#[from] DispatchError),
	#[error("Adapter error: {0}")]
	Adapter(#[from] AdapterError),
}

/// Loop lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
	Stopped,
	Running,
}

impl fmt::Display for LoopState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Stopped => write!(f, "Stopped"),
			Self::Running => write!(f, "Running"),
		}
	}
}

/// Tuning knobs for the loop.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
	/// Fixed interval between cycle starts.
	pub interval: Duration,
	/// Fraction of `size` at which a fill counts as complete. Absorbs
	/// external rounding; kept configurable rather than hard-coded.
	pub completion_ratio: f64,
}

impl Default for ReconcilerConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(30),
			completion_ratio: 0.99,
		}
	}
}

/// Summary of one reconciliation cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleStats {
	pub cycle: u64,
	pub checked: usize,
	pub failures: usize,
}

struct LoopTask {
	shutdown: watch::Sender<bool>,
	handle: JoinHandle<()>,
}

/// The reconciliation loop.
pub struct Reconciler {
	store: Arc<IntentStore>,
	adapter: Arc<AdapterService>,
	dispatcher: Arc<ActionDispatcher>,
	event_bus: EventBus,
	clock: Arc<dyn Clock>,
	config: ReconcilerConfig,
	state: RwLock<LoopState>,
	task: Mutex<Option<LoopTask>>,
	cycle_seq: AtomicU64,
}

impl Reconciler {
	pub async fn state(&self) -> LoopState {
		*self.state.read().await
	}

	/// Starts the periodic loop. Calling `start` while the loop is already
	/// running is a no-op.
	pub async fn start(self: &Arc<Self>) {
		let mut task = self.task.lock().await;
		if task.is_some() {
			debug!("reconciler already running; start is a no-op");
			return;
		}

		let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
		let this = Arc::clone(self);
		let handle = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(this.config.interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				tokio::select! {
					_ = shutdown_rx.changed() => break,
					_ = ticker.tick() => {
						// The shutdown signal is only observed between
						// cycles, so an in-flight cycle always completes.
						this.run_cycle().await;
					}
				}
			}
		});

		*task = Some(LoopTask {
			shutdown: shutdown_tx,
			handle,
		});
		*self.state.write().await = LoopState::Running;
		info!(interval = ?self.config.interval, "reconciler started");
	}

	/// Stops the loop: no further cycles start, and any in-flight cycle
	/// runs to completion before this returns. Safe to call repeatedly.
	pub async fn stop(&self) {
		let mut task = self.task.lock().await;
		let Some(task) = task.take() else {
			return;
		};

		*self.state.write().await = LoopState::Stopped;
		let _ = task.shutdown.send(true);
		if let Err(e) = task.handle.await {
			warn!(error = %e, "reconciler task ended abnormally");
		}
		info!("reconciler stopped");
	}

	/// Runs a single reconciliation cycle over all active intents.
	///
	/// Public so callers and tests can drive cycles deterministically.
	pub async fn run_cycle(&self) -> CycleStats {
		let cycle = self.cycle_seq.fetch_add(1, Ordering::Relaxed) + 1;

		let intents = match self.store.list_active().await {
			Ok(intents) => intents,
			Err(e) => {
				error!(cycle, error = %e, "failed to list active intents");
				return CycleStats {
					cycle,
					checked: 0,
					failures: 1,
				};
			}
		};
		let checked = intents.len();

		// Queries run concurrently; every state update still funnels
		// through the store's serialized mutation path.
		let results = futures::future::join_all(
			intents.into_iter().map(|intent| self.reconcile_intent(intent)),
		)
		.await;
		let failures = results.iter().filter(|r| r.is_err()).count();

		debug!(cycle, checked, failures, "reconciliation cycle complete");
		self.event_bus
			.publish(TrackerEvent::Reconcile(ReconcileEvent::CycleCompleted {
				cycle,
				checked,
				failures,
			}))
			.ok();

		CycleStats {
			cycle,
			checked,
			failures,
		}
	}

	/// Reconciles one intent, isolating its errors from the rest of the
	/// cycle. Transient errors leave the intent untouched and surface only
	/// as observability signals.
	async fn reconcile_intent(&self, intent: Intent) -> Result<(), ReconcilerError> {
		let result = self.reconcile_inner(&intent).await;
		if let Err(e) = &result {
			warn!(intent_id = %intent.id, error = %e, "intent reconciliation failed");
			self.event_bus
				.publish(TrackerEvent::Reconcile(ReconcileEvent::QueryFailed {
					intent_id: intent.id.clone(),
					error: e.to_string(),
				}))
				.ok();
		}
		result
	}

	async fn reconcile_inner(&self, intent: &Intent) -> Result<(), ReconcilerError> {
		// Expiry comes first: an expired intent gets one best-effort
		// release (when armed) and moves to Expired.
		if intent.is_expired_at(self.clock.now()) {
			let updated = self.dispatcher.expire(intent).await?;
			self.publish_status_change(intent, &updated);
			return Ok(());
		}

		let Some(handle) = &intent.external_handle else {
			return self.arm_intent(intent).await;
		};

		match self.adapter.query_state(handle).await {
			Ok(state) => self.apply_observation(intent, &state).await,
			Err(AdapterError::HandleNotFound(_)) => {
				// The resource was removed externally; there is nothing
				// left to release.
				info!(intent_id = %intent.id, "external resource gone; cancelling");
				let updated = self.dispatcher.cancel_local(intent).await?;
				self.publish_status_change(intent, &updated);
				Ok(())
			}
			Err(e) if e.is_transient() => Err(e.into()),
			Err(e) => {
				warn!(intent_id = %intent.id, error = %e, "permanent query failure; cancelling");
				let updated = self.dispatcher.cancel_local(intent).await?;
				self.publish_status_change(intent, &updated);
				Ok(())
			}
		}
	}

	/// Creates the external resource for an intent that has none yet.
	async fn arm_intent(&self, intent: &Intent) -> Result<(), ReconcilerError> {
		match self.adapter.resolve_external_resource(intent).await {
			Ok(handle) => {
				self.store
					.set_external_handle(&intent.id, handle.clone())
					.await?;
				info!(intent_id = %intent.id, handle = %handle, "intent armed");
				self.event_bus
					.publish(TrackerEvent::Intent(IntentEvent::Armed {
						intent_id: intent.id.clone(),
						handle: handle.to_string(),
					}))
					.ok();
				Ok(())
			}
			// Transient resource-creation failures are retried next cycle.
			Err(e) if e.is_transient() => Err(e.into()),
			Err(e) => {
				warn!(intent_id = %intent.id, error = %e, "condition unreachable; cancelling");
				let updated = self.dispatcher.cancel_local(intent).await?;
				self.publish_status_change(intent, &updated);
				Ok(())
			}
		}
	}

	/// Applies one external observation to an intent.
	async fn apply_observation(
		&self,
		intent: &Intent,
		state: &ExternalState,
	) -> Result<(), ReconcilerError> {
		// Clamp so an over-reporting adapter can never push progress
		// past size or below the last observation.
		let filled = (intent.size - state.remaining_size).clamp(0.0, intent.size);
		if filled <= intent.progress {
			return Ok(());
		}

		let delta = filled - intent.progress;
		let status = if filled >= intent.size * self.config.completion_ratio {
			IntentStatus::Matched
		} else {
			IntentStatus::PartiallyMatched
		};

		let updated = self.store.apply_fill(&intent.id, filled, status).await?;

		self.event_bus
			.publish(TrackerEvent::Intent(IntentEvent::Filled {
				intent_id: intent.id.clone(),
				delta,
				progress: filled,
			}))
			.ok();
		self.publish_status_change(intent, &updated);

		self.dispatcher.on_filled(&updated, delta).await;
		Ok(())
	}

	fn publish_status_change(&self, before: &Intent, after: &Intent) {
		if before.status != after.status {
			self.event_bus
				.publish(TrackerEvent::Intent(IntentEvent::StatusChanged {
					intent_id: after.id.clone(),
					from: before.status,
					to: after.status,
				}))
				.ok();
		}
	}
}

/// Builder wiring the loop's collaborators together.
pub struct ReconcilerBuilder {
	store: Arc<IntentStore>,
	adapter: Arc<AdapterService>,
	dispatcher: Option<Arc<ActionDispatcher>>,
	event_bus: EventBus,
	clock: Arc<dyn Clock>,
	config: ReconcilerConfig,
}

impl ReconcilerBuilder {
	pub fn new(store: Arc<IntentStore>, adapter: Arc<AdapterService>) -> Self {
		Self {
			store,
			adapter,
			dispatcher: None,
			event_bus: EventBus::new(1024),
			clock: Arc::new(SystemClock),
			config: ReconcilerConfig::default(),
		}
	}

	pub fn with_dispatcher(mut self, dispatcher: Arc<ActionDispatcher>) -> Self {
		self.dispatcher = Some(dispatcher);
		self
	}

	pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
		self.event_bus = event_bus;
		self
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
		self.config = config;
		self
	}

	pub fn build(self) -> Arc<Reconciler> {
		let dispatcher = self.dispatcher.unwrap_or_else(|| {
			Arc::new(ActionDispatcher::new(
				self.store.clone(),
				self.adapter.clone(),
				self.event_bus.clone(),
			))
		});

		Arc::new(Reconciler {
			store: self.store,
			adapter: self.adapter,
			dispatcher,
			event_bus: self.event_bus,
			clock: self.clock,
			config: self.config,
			state: RwLock::new(LoopState::Stopped),
			task: Mutex::new(None),
			cycle_seq: AtomicU64::new(0),
		})
	}
}
