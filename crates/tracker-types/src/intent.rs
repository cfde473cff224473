//! Intent types for the tracker system.
//!
//! An intent is a stored representation of a user's conditional trading
//! request: a direction, a target condition with a tolerance band, and a
//! requested size. Intents are created in `Pending` state and mutated only
//! by the reconciler and the action dispatcher.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Returns the current unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
	chrono::Utc::now().timestamp().max(0) as u64
}

/// Direction of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
	Buy,
	Sell,
}

impl fmt::Display for IntentKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Buy => write!(f, "buy"),
			Self::Sell => write!(f, "sell"),
		}
	}
}

/// Lifecycle status of an intent.
///
/// Transitions are monotonic: Pending -> PartiallyMatched -> Matched.
/// Cancelled and Expired are terminal and unreachable from each other;
/// Matched admits no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
	Pending,
	PartiallyMatched,
	Matched,
	Cancelled,
	Expired,
}

impl IntentStatus {
	/// Active intents are the ones the reconciler still polls.
	pub fn is_active(&self) -> bool {
		matches!(self, Self::Pending | Self::PartiallyMatched)
	}

	/// Terminal states admit no further status or progress mutation.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Cancelled | Self::Expired)
	}
}

impl fmt::Display for IntentStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Pending => write!(f, "pending"),
			Self::PartiallyMatched => write!(f, "partially_matched"),
			Self::Matched => write!(f, "matched"),
			Self::Cancelled => write!(f, "cancelled"),
			Self::Expired => write!(f, "expired"),
		}
	}
}

/// Opaque reference correlating an intent to a resource in the external
/// system. The tracker never inspects its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalHandle(pub String);

impl fmt::Display for ExternalHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Externally-reported ground truth for one handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalState {
	/// Quantity still unmatched on the external resource.
	pub remaining_size: f64,
	/// Current value of the watched condition (e.g. price).
	pub condition_value: f64,
}

/// Parameters for creating a new intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIntent {
	pub kind: IntentKind,
	/// Target condition value the intent waits for.
	pub target: f64,
	/// Acceptable deviation band around the target.
	pub tolerance: f64,
	/// Requested quantity, strictly positive.
	pub size: f64,
	/// Optional unix-second expiry.
	pub expires_at: Option<u64>,
}

/// A tracked intent and its reconciliation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
	/// Unique identifier, stable for the intent lifetime.
	pub id: String,
	pub kind: IntentKind,
	pub target: f64,
	pub tolerance: f64,
	pub size: f64,
	/// Matched-so-far quantity, monotonically non-decreasing while the
	/// intent is not terminal. Never exceeds `size`.
	pub progress: f64,
	pub status: IntentStatus,
	/// Set once the external resource backing this intent exists.
	pub external_handle: Option<ExternalHandle>,
	pub created_at: u64,
	pub updated_at: u64,
	pub expires_at: Option<u64>,
}

impl Intent {
	/// Builds a fresh Pending intent from creation parameters.
	///
	/// Parameter validation is the store's responsibility; this only
	/// assigns identity and initial state.
	pub fn new(params: NewIntent) -> Self {
		let now = current_timestamp();
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			kind: params.kind,
			target: params.target,
			tolerance: params.tolerance,
			size: params.size,
			progress: 0.0,
			status: IntentStatus::Pending,
			external_handle: None,
			created_at: now,
			updated_at: now,
			expires_at: params.expires_at,
		}
	}

	/// Whether the intent's expiry (if any) has passed at `now`.
	pub fn is_expired_at(&self, now: u64) -> bool {
		self.expires_at.is_some_and(|t| now > t)
	}
}
