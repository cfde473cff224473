//! Authoritative local record of intents.
//!
//! The [`IntentStore`] owns the intent lifecycle rules: creation-time
//! validation, the status transition table, and the progress monotonicity
//! invariant. Every mutation is serialized through a single async mutex so
//! callers never need external synchronization.

use crate::{StorageError, StorageService};
use thiserror::Error;
use tracker_types::{current_timestamp, ExternalHandle, Intent, IntentStatus, NewIntent};

const INTENTS_NAMESPACE: &str = "intents";

/// Errors produced by the intent store.
#[derive(Debug, Error)]
pub enum StoreError {
	/// Intent parameters failed validation; the intent was never stored.
	#[error("Invalid intent: {0}")]
	Validation(String),
	/// No intent with the given id.
	#[error("Intent not found: {0}")]
	NotFound(String),
	/// The requested mutation violates a lifecycle invariant.
	#[error("Invalid transition: {0}")]
	InvalidTransition(String),
	/// The intent is still active and cannot be removed.
	#[error("Intent still active: {0}")]
	IntentStillActive(String),
	/// The underlying storage failed.
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Authoritative store of tracked intents, keyed by id.
///
/// Mutations happen exclusively through the reconciler and the action
/// dispatcher; both funnel through the typed methods here, which hold the
/// mutation lock for the whole read-modify-write.
pub struct IntentStore {
	storage: StorageService,
	mutation_lock: tokio::sync::Mutex<()>,
}

impl IntentStore {
	pub fn new(storage: StorageService) -> Self {
		Self {
			storage,
			mutation_lock: tokio::sync::Mutex::new(()),
		}
	}

	/// Validates and stores a new intent in `Pending` state.
	///
	/// Rejected intents never reach storage.
	pub async fn create(&self, params: NewIntent) -> Result<Intent, StoreError> {
		if !params.size.is_finite() || params.size <= 0.0 {
			return Err(StoreError::Validation(format!(
				"size must be finite and positive, got {}",
				params.size
			)));
		}
		if !params.tolerance.is_finite() || params.tolerance < 0.0 {
			return Err(StoreError::Validation(format!(
				"tolerance must be finite and non-negative, got {}",
				params.tolerance
			)));
		}
		if !params.target.is_finite() {
			return Err(StoreError::Validation(format!(
				"target must be finite, got {}",
				params.target
			)));
		}

		let intent = Intent::new(params);

		let _guard = self.mutation_lock.lock().await;
		self.storage
			.store(INTENTS_NAMESPACE, &intent.id, &intent)
			.await?;
		Ok(intent)
	}

	/// Fetches an intent by id.
	pub async fn get(&self, id: &str) -> Result<Intent, StoreError> {
		match self.storage.retrieve(INTENTS_NAMESPACE, id).await {
			Ok(intent) => Ok(intent),
			Err(StorageError::NotFound) => Err(StoreError::NotFound(id.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	/// Returns every intent the reconciler should still poll
	/// (`Pending` or `PartiallyMatched`). Order is unspecified.
	pub async fn list_active(&self) -> Result<Vec<Intent>, StoreError> {
		let intents: Vec<Intent> = self.storage.retrieve_all(INTENTS_NAMESPACE).await?;
		Ok(intents
			.into_iter()
			.filter(|i| i.status.is_active())
			.collect())
	}

	/// Arms a pending intent with its external resource handle.
	pub async fn set_external_handle(
		&self,
		id: &str,
		handle: ExternalHandle,
	) -> Result<Intent, StoreError> {
		self.mutate(id, |intent| {
			if intent.status != IntentStatus::Pending {
				return Err(StoreError::InvalidTransition(format!(
					"cannot arm intent in status {}",
					intent.status
				)));
			}
			intent.external_handle = Some(handle);
			Ok(())
		})
		.await
	}

	/// Applies a fill observation: new total progress plus the status it
	/// implies. Fails with `InvalidTransition` when the update would make
	/// progress regress, exceed size, or take an illegal status edge.
	pub async fn apply_fill(
		&self,
		id: &str,
		progress: f64,
		status: IntentStatus,
	) -> Result<Intent, StoreError> {
		self.mutate(id, |intent| {
			intent.progress = progress;
			intent.status = status;
			Ok(())
		})
		.await
	}

	/// Transitions an intent to a new status with validation.
	pub async fn transition(&self, id: &str, status: IntentStatus) -> Result<Intent, StoreError> {
		self.mutate(id, |intent| {
			intent.status = status;
			Ok(())
		})
		.await
	}

	/// Removes an intent. Only intents that are no longer active
	/// (Matched, Cancelled or Expired) may be pruned.
	pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
		let _guard = self.mutation_lock.lock().await;
		let intent: Intent = match self.storage.retrieve(INTENTS_NAMESPACE, id).await {
			Ok(intent) => intent,
			Err(StorageError::NotFound) => return Err(StoreError::NotFound(id.to_string())),
			Err(e) => return Err(e.into()),
		};

		if intent.status.is_active() {
			return Err(StoreError::IntentStillActive(id.to_string()));
		}

		self.storage.remove(INTENTS_NAMESPACE, id).await?;
		Ok(())
	}

	/// Read-modify-write with invariant validation, serialized through the
	/// mutation lock.
	async fn mutate<F>(&self, id: &str, updater: F) -> Result<Intent, StoreError>
	where
		F: FnOnce(&mut Intent) -> Result<(), StoreError>,
	{
		let _guard = self.mutation_lock.lock().await;

		let before: Intent = match self.storage.retrieve(INTENTS_NAMESPACE, id).await {
			Ok(intent) => intent,
			Err(StorageError::NotFound) => return Err(StoreError::NotFound(id.to_string())),
			Err(e) => return Err(e.into()),
		};

		let mut after = before.clone();
		updater(&mut after)?;
		Self::validate_mutation(&before, &after)?;
		after.updated_at = current_timestamp();

		self.storage.store(INTENTS_NAMESPACE, id, &after).await?;
		Ok(after)
	}

	/// Enforces the lifecycle invariants between two intent snapshots.
	fn validate_mutation(before: &Intent, after: &Intent) -> Result<(), StoreError> {
		if before.status.is_terminal() {
			return Err(StoreError::InvalidTransition(format!(
				"intent {} is terminal ({})",
				before.id, before.status
			)));
		}

		if before.status != after.status
			&& !Self::is_valid_transition(before.status, after.status)
		{
			return Err(StoreError::InvalidTransition(format!(
				"{} -> {}",
				before.status, after.status
			)));
		}

		// An intent with no external handle cannot leave Pending except to
		// be cancelled or expired outright.
		if after.external_handle.is_none()
			&& before.status == IntentStatus::Pending
			&& matches!(
				after.status,
				IntentStatus::PartiallyMatched | IntentStatus::Matched
			) {
			return Err(StoreError::InvalidTransition(format!(
				"intent {} has no external handle",
				before.id
			)));
		}

		if after.progress < before.progress {
			return Err(StoreError::InvalidTransition(format!(
				"progress cannot decrease ({} -> {})",
				before.progress, after.progress
			)));
		}
		if after.progress > after.size {
			return Err(StoreError::InvalidTransition(format!(
				"progress {} exceeds size {}",
				after.progress, after.size
			)));
		}

		Ok(())
	}

	/// Status transition table. Same-status writes are handled by the
	/// caller skipping the edge check.
	fn is_valid_transition(from: IntentStatus, to: IntentStatus) -> bool {
		use IntentStatus::*;

		match (from, to) {
			(Pending, PartiallyMatched | Matched | Cancelled | Expired) => true,
			(PartiallyMatched, Matched | Cancelled | Expired) => true,
			// Matched, Cancelled and Expired admit no outgoing edges.
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryStorage;
	use tracker_types::IntentKind;

	fn test_store() -> IntentStore {
		IntentStore::new(StorageService::new(Box::new(MemoryStorage::new())))
	}

	fn params() -> NewIntent {
		NewIntent {
			kind: IntentKind::Buy,
			target: 100.0,
			tolerance: 1.0,
			size: 50.0,
			expires_at: None,
		}
	}

	async fn armed_intent(store: &IntentStore) -> Intent {
		let intent = store.create(params()).await.unwrap();
		store
			.set_external_handle(&intent.id, ExternalHandle("pos-1".into()))
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_create_validates_parameters() {
		let store = test_store();

		for size in [0.0, -1.0, f64::NAN, f64::INFINITY] {
			let result = store.create(NewIntent { size, ..params() }).await;
			assert!(matches!(result, Err(StoreError::Validation(_))), "size {}", size);
		}

		let result = store
			.create(NewIntent {
				tolerance: -0.1,
				..params()
			})
			.await;
		assert!(matches!(result, Err(StoreError::Validation(_))));

		let result = store
			.create(NewIntent {
				target: f64::NAN,
				..params()
			})
			.await;
		assert!(matches!(result, Err(StoreError::Validation(_))));

		// Rejected intents never reach storage.
		assert!(store.list_active().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_create_and_get() {
		let store = test_store();
		let intent = store.create(params()).await.unwrap();

		let fetched = store.get(&intent.id).await.unwrap();
		assert_eq!(fetched.id, intent.id);
		assert_eq!(fetched.status, IntentStatus::Pending);
		assert_eq!(fetched.progress, 0.0);

		assert!(matches!(
			store.get("missing").await,
			Err(StoreError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_unarmed_intent_cannot_leave_pending() {
		let store = test_store();
		let intent = store.create(params()).await.unwrap();

		let result = store
			.apply_fill(&intent.id, 10.0, IntentStatus::PartiallyMatched)
			.await;
		assert!(matches!(result, Err(StoreError::InvalidTransition(_))));

		// Cancellation is allowed without a handle; there is nothing to
		// reconcile against.
		store
			.transition(&intent.id, IntentStatus::Cancelled)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_fill_progress_and_status() {
		let store = test_store();
		let intent = armed_intent(&store).await;

		let updated = store
			.apply_fill(&intent.id, 20.0, IntentStatus::PartiallyMatched)
			.await
			.unwrap();
		assert_eq!(updated.progress, 20.0);
		assert_eq!(updated.status, IntentStatus::PartiallyMatched);

		// Progress must never decrease.
		let result = store
			.apply_fill(&intent.id, 10.0, IntentStatus::PartiallyMatched)
			.await;
		assert!(matches!(result, Err(StoreError::InvalidTransition(_))));

		// Progress must never exceed size.
		let result = store
			.apply_fill(&intent.id, 60.0, IntentStatus::Matched)
			.await;
		assert!(matches!(result, Err(StoreError::InvalidTransition(_))));

		let updated = store
			.apply_fill(&intent.id, 50.0, IntentStatus::Matched)
			.await
			.unwrap();
		assert_eq!(updated.status, IntentStatus::Matched);
	}

	#[tokio::test]
	async fn test_terminal_states_are_frozen() {
		let store = test_store();
		let intent = armed_intent(&store).await;

		store
			.transition(&intent.id, IntentStatus::Cancelled)
			.await
			.unwrap();

		// No further status or progress mutation once terminal.
		for status in [
			IntentStatus::Pending,
			IntentStatus::PartiallyMatched,
			IntentStatus::Matched,
			IntentStatus::Expired,
		] {
			let result = store.transition(&intent.id, status).await;
			assert!(matches!(result, Err(StoreError::InvalidTransition(_))));
		}
		let result = store
			.apply_fill(&intent.id, 1.0, IntentStatus::Cancelled)
			.await;
		assert!(matches!(result, Err(StoreError::InvalidTransition(_))));
	}

	#[tokio::test]
	async fn test_matched_admits_no_transitions() {
		let store = test_store();
		let intent = armed_intent(&store).await;

		store
			.apply_fill(&intent.id, 50.0, IntentStatus::Matched)
			.await
			.unwrap();

		let result = store.transition(&intent.id, IntentStatus::Cancelled).await;
		assert!(matches!(result, Err(StoreError::InvalidTransition(_))));
	}

	#[tokio::test]
	async fn test_list_active_filters_statuses() {
		let store = test_store();

		let pending = store.create(params()).await.unwrap();
		let partial = armed_intent(&store).await;
		store
			.apply_fill(&partial.id, 5.0, IntentStatus::PartiallyMatched)
			.await
			.unwrap();
		let cancelled = store.create(params()).await.unwrap();
		store
			.transition(&cancelled.id, IntentStatus::Cancelled)
			.await
			.unwrap();

		let active = store.list_active().await.unwrap();
		let ids: Vec<&str> = active.iter().map(|i| i.id.as_str()).collect();
		assert_eq!(active.len(), 2);
		assert!(ids.contains(&pending.id.as_str()));
		assert!(ids.contains(&partial.id.as_str()));
	}

	#[tokio::test]
	async fn test_remove_requires_inactive_status() {
		let store = test_store();
		let intent = armed_intent(&store).await;

		assert!(matches!(
			store.remove(&intent.id).await,
			Err(StoreError::IntentStillActive(_))
		));

		store
			.transition(&intent.id, IntentStatus::Cancelled)
			.await
			.unwrap();
		store.remove(&intent.id).await.unwrap();
		assert!(matches!(
			store.get(&intent.id).await,
			Err(StoreError::NotFound(_))
		));
	}
}
