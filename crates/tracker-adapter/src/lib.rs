//! External state adapter for the intent tracker.
//!
//! The adapter is the tracker's only window onto the system that actually
//! holds positions and executes trades. The tracker consumes this contract;
//! it never implements the remote side. All calls carry only the opaque
//! handle and request parameters, never internal store state.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracker_types::{ExternalHandle, ExternalState, Intent};

pub mod implementations {
	pub mod simulated;
}

/// Errors surfaced by the external system.
///
/// The reconciler treats transient errors as retry-next-cycle and permanent
/// errors as grounds to cancel the intent.
#[derive(Debug, Error)]
pub enum AdapterError {
	/// Resource creation failed for a reason expected to resolve on retry.
	#[error("Resource creation failed: {0}")]
	ResourceCreationFailed(String),
	/// The external system can never satisfy this intent's condition.
	#[error("Condition unreachable: {0}")]
	ConditionUnreachable(String),
	/// The external resource no longer exists.
	#[error("Handle not found: {0}")]
	HandleNotFound(String),
	/// A read failed in a way expected to resolve on retry.
	#[error("Transient query error: {0}")]
	TransientQueryError(String),
	/// Releasing the external resource failed.
	#[error("Release failed: {0}")]
	ReleaseFailed(String),
	/// The call exceeded the configured timeout.
	#[error("Adapter call timed out after {0:?}")]
	Timeout(Duration),
}

impl AdapterError {
	/// Transient errors leave intent state untouched and are retried on
	/// the next reconciliation cycle.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			Self::ResourceCreationFailed(_)
				| Self::TransientQueryError(_)
				| Self::ReleaseFailed(_)
				| Self::Timeout(_)
		)
	}
}

/// Contract required of the external collaborator.
///
/// `query_state` must be read-only and idempotent from the tracker's
/// perspective; the write operations carry all needed context as arguments.
#[async_trait]
pub trait ExternalStateAdapter: Send + Sync {
	/// Creates the external resource backing an intent and returns its
	/// handle. Called once per intent, when it is first armed.
	async fn resolve_external_resource(
		&self,
		intent: &Intent,
	) -> Result<ExternalHandle, AdapterError>;

	/// Reports the current ground truth for a handle.
	async fn query_state(&self, handle: &ExternalHandle) -> Result<ExternalState, AdapterError>;

	/// Releases the external resource on cancellation. Failure is not
	/// fatal; the resource may still be reclaimed out of band.
	async fn release_resource(&self, handle: &ExternalHandle) -> Result<(), AdapterError>;

	/// Drains any accrued secondary yield (e.g. fees) for a handle,
	/// returning the collected amount. Best effort.
	async fn collect_yield(&self, handle: &ExternalHandle) -> Result<f64, AdapterError>;
}

/// Factory signature for creating an adapter from TOML configuration.
pub type AdapterFactory = fn(&toml::Value) -> Box<dyn ExternalStateAdapter>;

/// Adapter wrapper that bounds every call with a timeout.
///
/// Adapter calls are the reconciler's only suspension points; bounding them
/// keeps an in-flight cycle from blocking `stop()` indefinitely.
pub struct AdapterService {
	adapter: Box<dyn ExternalStateAdapter>,
	timeout: Duration,
}

impl AdapterService {
	pub fn new(adapter: Box<dyn ExternalStateAdapter>, timeout: Duration) -> Self {
		Self { adapter, timeout }
	}

	async fn bounded<T>(
		&self,
		fut: impl std::future::Future<Output = Result<T, AdapterError>>,
	) -> Result<T, AdapterError> {
		match tokio::time::timeout(self.timeout, fut).await {
			Ok(result) => result,
			Err(_) => Err(AdapterError::Timeout(self.timeout)),
		}
	}

	pub async fn resolve_external_resource(
		&self,
		intent: &Intent,
	) -> Result<ExternalHandle, AdapterError> {
		self.bounded(self.adapter.resolve_external_resource(intent))
			.await
	}

	pub async fn query_state(
		&self,
		handle: &ExternalHandle,
	) -> Result<ExternalState, AdapterError> {
		self.bounded(self.adapter.query_state(handle)).await
	}

	pub async fn release_resource(&self, handle: &ExternalHandle) -> Result<(), AdapterError> {
		self.bounded(self.adapter.release_resource(handle)).await
	}

	pub async fn collect_yield(&self, handle: &ExternalHandle) -> Result<f64, AdapterError> {
		self.bounded(self.adapter.collect_yield(handle)).await
	}
}
