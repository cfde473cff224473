//! Action dispatcher for the intent tracker.
//!
//! Issues the side-effecting follow-up actions the reconciler decides on:
//! yield collection after fills, resource release on cancellation and
//! expiry. Follow-up failures never roll back intent state that was already
//! applied; that trade keeps local and remote state from diverging at the
//! cost of a best-effort secondary action.

use std::sync::Arc;
use thiserror::Error;
use tracker_adapter::AdapterService;
use tracker_storage::{IntentStore, StoreError};
use tracker_types::{DispatchEvent, EventBus, Intent, IntentStatus, TrackerEvent};

/// Errors produced by dispatch actions.
#[derive(Debug, Error)]
pub enum DispatchError {
	/// Releasing the external resource failed; the intent keeps its prior
	/// status so the caller can retry later.
	#[error("Cancellation failed for {intent_id}: {reason}")]
	CancellationFailed { intent_id: String, reason: String },
	/// The store rejected the follow-up state change.
	#[error("Store error: {0}")]
	Store(#[from] StoreError),
}

/// Dispatches follow-up actions against the external system.
pub struct ActionDispatcher {
	store: Arc<IntentStore>,
	adapter: Arc<AdapterService>,
	event_bus: EventBus,
}

impl ActionDispatcher {
	pub fn new(store: Arc<IntentStore>, adapter: Arc<AdapterService>, event_bus: EventBus) -> Self {
		Self {
			store,
			adapter,
			event_bus,
		}
	}

	/// Fill hook: collects any accrued secondary yield for the intent's
	/// resource. Failure is logged and reported on the bus; the fill that
	/// was already applied to the intent stands.
	pub async fn on_filled(&self, intent: &Intent, delta: f64) {
		tracing::info!(
			intent_id = %intent.id,
			delta,
			progress = intent.progress,
			"intent fill detected"
		);

		let Some(handle) = &intent.external_handle else {
			return;
		};

		match self.adapter.collect_yield(handle).await {
			Ok(amount) if amount > 0.0 => {
				tracing::info!(intent_id = %intent.id, amount, "collected accrued yield");
				self.event_bus
					.publish(TrackerEvent::Dispatch(DispatchEvent::YieldCollected {
						intent_id: intent.id.clone(),
						amount,
					}))
					.ok();
			}
			Ok(_) => {}
			Err(e) => {
				tracing::warn!(intent_id = %intent.id, error = %e, "yield collection failed");
				self.event_bus
					.publish(TrackerEvent::Dispatch(DispatchEvent::YieldCollectionFailed {
						intent_id: intent.id.clone(),
						error: e.to_string(),
					}))
					.ok();
			}
		}
	}

	/// Cancels an intent: releases the external resource, then transitions
	/// to Cancelled. On release failure the intent keeps its prior status
	/// and the error is returned so a later retry remains possible.
	pub async fn cancel(&self, intent: &Intent) -> Result<Intent, DispatchError> {
		// Re-check the current status before touching the external system;
		// a transition the store would reject must never release the
		// resource first, or local and remote state diverge.
		let current = self.store.get(&intent.id).await?;
		if !current.status.is_active() {
			return Err(DispatchError::Store(StoreError::InvalidTransition(
				format!("cannot cancel intent in status {}", current.status),
			)));
		}

		if let Some(handle) = &current.external_handle {
			if let Err(e) = self.adapter.release_resource(handle).await {
				tracing::warn!(intent_id = %intent.id, error = %e, "resource release failed");
				self.event_bus
					.publish(TrackerEvent::Dispatch(DispatchEvent::CancellationFailed {
						intent_id: intent.id.clone(),
						error: e.to_string(),
					}))
					.ok();
				return Err(DispatchError::CancellationFailed {
					intent_id: intent.id.clone(),
					reason: e.to_string(),
				});
			}
		}

		let updated = self
			.store
			.transition(&intent.id, IntentStatus::Cancelled)
			.await?;

		tracing::info!(intent_id = %intent.id, "intent cancelled");
		self.event_bus
			.publish(TrackerEvent::Dispatch(DispatchEvent::Cancelled {
				intent_id: intent.id.clone(),
			}))
			.ok();
		Ok(updated)
	}

	/// Expires an intent: one best-effort release attempt, then the
	/// Expired transition regardless. The resource may still be reclaimed
	/// by an out-of-band process if the release failed.
	pub async fn expire(&self, intent: &Intent) -> Result<Intent, DispatchError> {
		if let Some(handle) = &intent.external_handle {
			if let Err(e) = self.adapter.release_resource(handle).await {
				tracing::warn!(
					intent_id = %intent.id,
					error = %e,
					"resource release failed while expiring"
				);
			}
		}

		let updated = self
			.store
			.transition(&intent.id, IntentStatus::Expired)
			.await?;
		tracing::info!(intent_id = %intent.id, "intent expired");
		Ok(updated)
	}

	/// Forces an intent to Cancelled without touching the external system.
	/// Used when the external side reports the resource is already gone or
	/// can never be created.
	pub async fn cancel_local(&self, intent: &Intent) -> Result<Intent, DispatchError> {
		let updated = self
			.store
			.transition(&intent.id, IntentStatus::Cancelled)
			.await?;

		tracing::info!(intent_id = %intent.id, "intent cancelled locally");
		self.event_bus
			.publish(TrackerEvent::Dispatch(DispatchEvent::Cancelled {
				intent_id: intent.id.clone(),
			}))
			.ok();
		Ok(updated)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;
	use tracker_adapter::{AdapterError, ExternalStateAdapter};
	use tracker_storage::implementations::memory::MemoryStorage;
	use tracker_storage::StorageService;
	use tracker_types::{ExternalHandle, ExternalState, IntentKind, NewIntent};

	/// Adapter that counts release calls and can be told to fail them.
	struct ReleaseProbe {
		fail_release: bool,
		releases: AtomicUsize,
	}

	#[async_trait]
	impl ExternalStateAdapter for ReleaseProbe {
		async fn resolve_external_resource(
			&self,
			_intent: &Intent,
		) -> Result<ExternalHandle, AdapterError> {
			Ok(ExternalHandle("probe".into()))
		}

		async fn query_state(
			&self,
			_handle: &ExternalHandle,
		) -> Result<ExternalState, AdapterError> {
			Err(AdapterError::TransientQueryError("unused".into()))
		}

		async fn release_resource(&self, handle: &ExternalHandle) -> Result<(), AdapterError> {
			self.releases.fetch_add(1, Ordering::SeqCst);
			if self.fail_release {
				Err(AdapterError::ReleaseFailed(handle.to_string()))
			} else {
				Ok(())
			}
		}

		async fn collect_yield(&self, _handle: &ExternalHandle) -> Result<f64, AdapterError> {
			Err(AdapterError::TransientQueryError("no yield".into()))
		}
	}

	/// Lets the boxed service share the probe with the test.
	struct SharedProbe(Arc<ReleaseProbe>);

	#[async_trait]
	impl ExternalStateAdapter for SharedProbe {
		async fn resolve_external_resource(
			&self,
			intent: &Intent,
		) -> Result<ExternalHandle, AdapterError> {
			self.0.resolve_external_resource(intent).await
		}

		async fn query_state(
			&self,
			handle: &ExternalHandle,
		) -> Result<ExternalState, AdapterError> {
			self.0.query_state(handle).await
		}

		async fn release_resource(&self, handle: &ExternalHandle) -> Result<(), AdapterError> {
			self.0.release_resource(handle).await
		}

		async fn collect_yield(&self, handle: &ExternalHandle) -> Result<f64, AdapterError> {
			self.0.collect_yield(handle).await
		}
	}

	fn harness(fail_release: bool) -> (ActionDispatcher, Arc<IntentStore>, Arc<ReleaseProbe>) {
		let store = Arc::new(IntentStore::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		))));
		let probe = Arc::new(ReleaseProbe {
			fail_release,
			releases: AtomicUsize::new(0),
		});
		let adapter = Arc::new(AdapterService::new(
			Box::new(SharedProbe(probe.clone())),
			Duration::from_secs(1),
		));
		let dispatcher = ActionDispatcher::new(store.clone(), adapter, EventBus::new(16));
		(dispatcher, store, probe)
	}

	async fn armed_intent(store: &IntentStore) -> Intent {
		let intent = store
			.create(NewIntent {
				kind: IntentKind::Buy,
				target: 10.0,
				tolerance: 0.1,
				size: 5.0,
				expires_at: None,
			})
			.await
			.unwrap();
		store
			.set_external_handle(&intent.id, ExternalHandle("probe".into()))
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_cancel_releases_then_transitions() {
		let (dispatcher, store, probe) = harness(false);
		let intent = armed_intent(&store).await;

		let updated = dispatcher.cancel(&intent).await.unwrap();
		assert_eq!(updated.status, IntentStatus::Cancelled);
		assert_eq!(probe.releases.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_cancel_matched_intent_is_rejected_without_release() {
		let (dispatcher, store, probe) = harness(false);
		let intent = armed_intent(&store).await;
		store
			.apply_fill(&intent.id, 5.0, IntentStatus::Matched)
			.await
			.unwrap();

		// The store would reject Matched -> Cancelled, so the external
		// resource must not be released.
		let result = dispatcher.cancel(&intent).await;
		assert!(matches!(
			result,
			Err(DispatchError::Store(StoreError::InvalidTransition(_)))
		));
		assert_eq!(probe.releases.load(Ordering::SeqCst), 0);

		let current = store.get(&intent.id).await.unwrap();
		assert_eq!(current.status, IntentStatus::Matched);
	}

	#[tokio::test]
	async fn test_failed_release_leaves_status_unchanged() {
		let (dispatcher, store, _probe) = harness(true);
		let intent = armed_intent(&store).await;

		let result = dispatcher.cancel(&intent).await;
		assert!(matches!(
			result,
			Err(DispatchError::CancellationFailed { .. })
		));

		// Prior status survives, permitting a later retry.
		let current = store.get(&intent.id).await.unwrap();
		assert_eq!(current.status, IntentStatus::Pending);
	}

	#[tokio::test]
	async fn test_expire_transitions_even_when_release_fails() {
		let (dispatcher, store, _probe) = harness(true);
		let intent = armed_intent(&store).await;

		let updated = dispatcher.expire(&intent).await.unwrap();
		assert_eq!(updated.status, IntentStatus::Expired);
	}

	#[tokio::test]
	async fn test_on_filled_failure_does_not_revert_fill() {
		let (dispatcher, store, _probe) = harness(false);
		let intent = armed_intent(&store).await;
		let filled = store
			.apply_fill(&intent.id, 5.0, IntentStatus::Matched)
			.await
			.unwrap();

		// collect_yield errors in the probe; the fill must stand.
		dispatcher.on_filled(&filled, 5.0).await;
		let current = store.get(&intent.id).await.unwrap();
		assert_eq!(current.status, IntentStatus::Matched);
		assert_eq!(current.progress, 5.0);
	}
}
