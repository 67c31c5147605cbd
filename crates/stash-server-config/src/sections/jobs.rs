// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Jobs configuration section.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	pub queue_concurrency: Option<usize>,
	pub queue_poll_interval_ms: Option<u64>,
	pub scheduler_poll_interval_ms: Option<u64>,
	pub job_purge_interval_ms: Option<u64>,
	pub shutdown_timeout_ms: Option<u64>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.queue_concurrency.is_some() {
			self.queue_concurrency = other.queue_concurrency;
		}
		if other.queue_poll_interval_ms.is_some() {
			self.queue_poll_interval_ms = other.queue_poll_interval_ms;
		}
		if other.scheduler_poll_interval_ms.is_some() {
			self.scheduler_poll_interval_ms = other.scheduler_poll_interval_ms;
		}
		if other.job_purge_interval_ms.is_some() {
			self.job_purge_interval_ms = other.job_purge_interval_ms;
		}
		if other.shutdown_timeout_ms.is_some() {
			self.shutdown_timeout_ms = other.shutdown_timeout_ms;
		}
	}

	pub fn finalize(self) -> JobsConfig {
		let defaults = JobsConfig::default();
		JobsConfig {
			queue_concurrency: self.queue_concurrency.unwrap_or(defaults.queue_concurrency),
			queue_poll_interval_ms: self
				.queue_poll_interval_ms
				.unwrap_or(defaults.queue_poll_interval_ms),
			scheduler_poll_interval_ms: self
				.scheduler_poll_interval_ms
				.unwrap_or(defaults.scheduler_poll_interval_ms),
			job_purge_interval_ms: self
				.job_purge_interval_ms
				.unwrap_or(defaults.job_purge_interval_ms),
			shutdown_timeout_ms: self
				.shutdown_timeout_ms
				.unwrap_or(defaults.shutdown_timeout_ms),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
	pub queue_concurrency: usize,
	pub queue_poll_interval_ms: u64,
	pub scheduler_poll_interval_ms: u64,
	pub job_purge_interval_ms: u64,
	pub shutdown_timeout_ms: u64,
}

impl JobsConfig {
	pub fn queue_poll_interval(&self) -> Duration {
		Duration::from_millis(self.queue_poll_interval_ms)
	}

	pub fn scheduler_poll_interval(&self) -> Duration {
		Duration::from_millis(self.scheduler_poll_interval_ms)
	}

	pub fn job_purge_interval(&self) -> Duration {
		Duration::from_millis(self.job_purge_interval_ms)
	}

	pub fn shutdown_timeout(&self) -> Duration {
		Duration::from_millis(self.shutdown_timeout_ms)
	}
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			queue_concurrency: 4,
			queue_poll_interval_ms: 1000,
			scheduler_poll_interval_ms: 1000,
			job_purge_interval_ms: 3_600_000, // 1 hour
			shutdown_timeout_ms: 10_000,
		}
	}
}
