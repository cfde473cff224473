//! Injectable time source.
//!
//! Expiry decisions go through a [`Clock`] rather than the system time so
//! tests can drive expiry deterministically.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the current unix timestamp in seconds.
pub trait Clock: Send + Sync {
	fn now(&self) -> u64;
}

/// Production clock backed by the system time.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> u64 {
		tracker_types::current_timestamp()
	}
}

/// Manually advanced clock for tests.
pub struct ManualClock {
	now: AtomicU64,
}

impl ManualClock {
	pub fn new(now: u64) -> Self {
		Self {
			now: AtomicU64::new(now),
		}
	}

	pub fn set(&self, now: u64) {
		self.now.store(now, Ordering::SeqCst);
	}

	pub fn advance(&self, secs: u64) {
		self.now.fetch_add(secs, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now(&self) -> u64 {
		self.now.load(Ordering::SeqCst)
	}
}
