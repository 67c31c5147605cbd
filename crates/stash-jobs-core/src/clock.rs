// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Time sources.
//!
//! Every component that needs "now" takes a [`SharedClock`] so tests can
//! drive schedules and deferrals with a [`ManualClock`].

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
	fn now(&self) -> DateTime<Utc>;

	/// Current time as milliseconds since the Unix epoch.
	fn now_millis(&self) -> i64 {
		self.now().timestamp_millis()
	}
}

pub type SharedClock = Arc<dyn Clock>;

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
	pub fn shared() -> SharedClock {
		Arc::new(SystemClock)
	}
}

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
	millis: Arc<AtomicI64>,
}

impl ManualClock {
	pub fn new(start: DateTime<Utc>) -> Self {
		Self {
			millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
		}
	}

	pub fn set(&self, at: DateTime<Utc>) {
		self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
	}

	pub fn advance(&self, by: Duration) {
		self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		let millis = self.millis.load(Ordering::SeqCst);
		Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
	}

	fn now_millis(&self) -> i64 {
		self.millis.load(Ordering::SeqCst)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn manual_clock_clones_share_time() {
		let start = Utc.with_ymd_and_hms(2024, 11, 17, 12, 0, 0).unwrap();
		let clock = ManualClock::new(start);
		let other = clock.clone();

		other.advance(Duration::seconds(90));

		assert_eq!(clock.now(), start + Duration::seconds(90));
		assert_eq!(clock.now_millis(), start.timestamp_millis() + 90_000);
	}

	#[test]
	fn manual_clock_set_overrides() {
		let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
		let later = Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap();
		clock.set(later);
		assert_eq!(clock.now(), later);
	}

	#[test]
	fn system_clock_is_close_to_utc_now() {
		let drift = (SystemClock.now_millis() - Utc::now().timestamp_millis()).abs();
		assert!(drift < 1_000);
	}
}
