// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

/// Runtime settings for [`crate::Jobs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobsOptions {
	/// Maximum number of jobs running at once.
	pub concurrency: usize,
	/// How often the queue looks for newly reservable jobs.
	pub queue_poll_interval: Duration,
	/// How often ready schedules are checked.
	pub scheduler_poll_interval: Duration,
	/// Interval of the built-in purge schedule.
	pub job_purge_interval: Duration,
}

impl Default for JobsOptions {
	fn default() -> Self {
		Self {
			concurrency: 4,
			queue_poll_interval: Duration::from_secs(1),
			scheduler_poll_interval: Duration::from_secs(1),
			job_purge_interval: Duration::from_secs(3600),
		}
	}
}
