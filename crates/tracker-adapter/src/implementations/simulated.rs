//! Simulated external system.
//!
//! An in-memory adapter whose positions fill by a configurable fraction of
//! their size on every query. It exists so the tracker binary can run
//! without a live external system, and so tests can drive deterministic
//! fill progressions.
//!
//! Note: unlike the contract, `query_state` here is not read-only; each
//! query advances the simulation one step. That is a deliberate simulator
//! shortcut, not a model for real adapters.

use crate::{AdapterError, ExternalStateAdapter};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracker_types::{ExternalHandle, ExternalState, Intent};

struct SimulatedPosition {
	size: f64,
	remaining: f64,
	condition_value: f64,
	accrued_yield: f64,
}

/// In-memory stand-in for the external system.
pub struct SimulatedAdapter {
	/// Fraction of the position size that fills on each query, in [0, 1].
	fill_rate: f64,
	/// Yield accrued per unit filled.
	yield_rate: f64,
	next_handle: AtomicU64,
	positions: RwLock<HashMap<ExternalHandle, SimulatedPosition>>,
}

impl SimulatedAdapter {
	pub fn new(fill_rate: f64, yield_rate: f64) -> Self {
		Self {
			fill_rate: fill_rate.clamp(0.0, 1.0),
			yield_rate,
			next_handle: AtomicU64::new(1),
			positions: RwLock::new(HashMap::new()),
		}
	}
}

#[async_trait]
impl ExternalStateAdapter for SimulatedAdapter {
	async fn resolve_external_resource(
		&self,
		intent: &Intent,
	) -> Result<ExternalHandle, AdapterError> {
		let seq = self.next_handle.fetch_add(1, Ordering::Relaxed);
		let handle = ExternalHandle(format!("sim-{}", seq));

		let mut positions = self.positions.write().await;
		positions.insert(
			handle.clone(),
			SimulatedPosition {
				size: intent.size,
				remaining: intent.size,
				condition_value: intent.target,
				accrued_yield: 0.0,
			},
		);
		tracing::debug!(intent_id = %intent.id, handle = %handle, "simulated position opened");
		Ok(handle)
	}

	async fn query_state(&self, handle: &ExternalHandle) -> Result<ExternalState, AdapterError> {
		let mut positions = self.positions.write().await;
		let position = positions
			.get_mut(handle)
			.ok_or_else(|| AdapterError::HandleNotFound(handle.to_string()))?;

		// Advance the simulation one step per observation.
		let step = (position.size * self.fill_rate).min(position.remaining);
		position.remaining -= step;
		position.accrued_yield += step * self.yield_rate;

		Ok(ExternalState {
			remaining_size: position.remaining,
			condition_value: position.condition_value,
		})
	}

	async fn release_resource(&self, handle: &ExternalHandle) -> Result<(), AdapterError> {
		let mut positions = self.positions.write().await;
		match positions.remove(handle) {
			Some(_) => Ok(()),
			None => Err(AdapterError::HandleNotFound(handle.to_string())),
		}
	}

	async fn collect_yield(&self, handle: &ExternalHandle) -> Result<f64, AdapterError> {
		let mut positions = self.positions.write().await;
		let position = positions
			.get_mut(handle)
			.ok_or_else(|| AdapterError::HandleNotFound(handle.to_string()))?;
		Ok(std::mem::take(&mut position.accrued_yield))
	}
}

/// Factory function to create a simulated adapter from configuration.
///
/// Configuration parameters:
/// - `fill_rate`: fraction of size filled per query (default 0.5)
/// - `yield_rate`: yield accrued per unit filled (default 0.001)
pub fn create_adapter(config: &toml::Value) -> Box<dyn ExternalStateAdapter> {
	let fill_rate = config
		.get("fill_rate")
		.and_then(|v| v.as_float())
		.unwrap_or(0.5);
	let yield_rate = config
		.get("yield_rate")
		.and_then(|v| v.as_float())
		.unwrap_or(0.001);

	Box::new(SimulatedAdapter::new(fill_rate, yield_rate))
}
