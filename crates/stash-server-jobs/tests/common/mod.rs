// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stash_jobs_core::SharedClock;
use stash_server_db::testing::create_test_store;
use stash_server_jobs::{Jobs, JobsOptions};

pub fn test_options() -> JobsOptions {
	JobsOptions {
		concurrency: 4,
		queue_poll_interval: Duration::from_millis(50),
		scheduler_poll_interval: Duration::from_millis(50),
		job_purge_interval: Duration::from_secs(1),
	}
}

pub async fn make_jobs(clock: SharedClock) -> Jobs {
	make_jobs_with(clock, test_options()).await
}

pub async fn make_jobs_with(clock: SharedClock, options: JobsOptions) -> Jobs {
	let store = create_test_store(Arc::clone(&clock)).await;
	Jobs::new(store, options, clock)
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = bool>,
{
	let deadline = tokio::time::Instant::now() + timeout;
	while tokio::time::Instant::now() < deadline {
		if check().await {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	check().await
}
