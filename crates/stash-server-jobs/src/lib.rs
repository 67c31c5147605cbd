// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable job queue and recurring scheduler.
//!
//! [`Jobs`] ties together the pieces:
//!
//! - [`JobQueue`] reserves jobs from the store and runs their handlers with
//!   bounded concurrency.
//! - [`JobManager`] submits jobs and records their state transitions.
//! - [`JobScheduler`] turns recurring schedules into deferred jobs.

pub mod error;
mod handle;
pub mod handler;
pub mod manager;
pub mod options;
pub mod queue;
pub mod scheduler;

pub use error::{JobError, Result};
pub use handler::{FnHandler, JobContext, JobHandler};
pub use manager::JobManager;
pub use options::JobsOptions;
pub use queue::JobQueue;
pub use scheduler::{JobScheduler, PURGE_RESOLVED_JOBS};

use serde_json::Value;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use stash_jobs_core::{
	JobId, JobOptions, JobSchedule, JobTemplate, NewJob, RepeatOptions, SharedClock, SystemClock,
};
use stash_server_db::{JobStore, SqliteJobStore};

/// Entry point to the job system.
#[derive(Clone)]
pub struct Jobs {
	queue: JobQueue,
	manager: JobManager,
	scheduler: JobScheduler,
}

impl Jobs {
	pub fn new(store: Arc<dyn JobStore>, options: JobsOptions, clock: SharedClock) -> Self {
		let queue = JobQueue::new(
			Arc::clone(&store),
			options.concurrency,
			options.queue_poll_interval,
		);
		let manager = JobManager::new(store, queue.clone());
		let scheduler = JobScheduler::new(
			manager.clone(),
			clock,
			options.scheduler_poll_interval,
			options.job_purge_interval,
		);

		Self {
			queue,
			manager,
			scheduler,
		}
	}

	/// Jobs backed by SQLite and the system clock.
	pub fn sqlite(pool: SqlitePool, options: JobsOptions) -> Self {
		let clock = SystemClock::shared();
		let store = Arc::new(SqliteJobStore::new(pool, Arc::clone(&clock)));
		Self::new(store, options, clock)
	}

	/// Register an async closure as the handler for `name`.
	pub fn register_job_handler<F, Fut>(&self, name: impl Into<String>, handler: F)
	where
		F: Fn(JobContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		self
			.queue
			.register_handler(name, Arc::new(FnHandler::new(handler)));
	}

	pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
		self.queue.register_handler(name, handler);
	}

	pub async fn add(&self, name: &str, payload: Value, options: JobOptions) -> Result<JobId> {
		self.manager.add(name, payload, options).await
	}

	pub async fn add_bulk(&self, jobs: Vec<NewJob>) -> Result<Vec<JobId>> {
		self.manager.add_bulk(jobs).await
	}

	pub async fn upsert_job_schedule(
		&self,
		key: &str,
		repeat_options: RepeatOptions,
		job_template: JobTemplate,
	) -> Result<JobSchedule> {
		self
			.scheduler
			.upsert_job_schedule(key, repeat_options, job_template)
			.await
	}

	pub async fn schedule_job_purge(&self) -> Result<JobSchedule> {
		self.scheduler.schedule_job_purge().await
	}

	/// Start running jobs and checking schedules.
	pub async fn start(&self) {
		self.scheduler.start();
		self.queue.start().await;
	}

	/// Stop picking up jobs and checking schedules. Running jobs finish.
	pub fn pause(&self) {
		self.scheduler.stop();
		self.queue.pause();
	}

	pub async fn on_idle(&self) {
		self.queue.on_idle().await
	}

	pub fn is_idle(&self) -> bool {
		self.queue.is_idle()
	}

	/// Pause and wait up to `timeout` for running jobs. Returns whether the
	/// queue drained in time.
	pub async fn shutdown(&self, timeout: Duration) -> bool {
		self.pause();
		match tokio::time::timeout(timeout, self.on_idle()).await {
			Ok(()) => {
				info!("job system shut down");
				true
			}
			Err(_) => {
				warn!(
					in_flight = self.queue.in_flight(),
					timeout_ms = timeout.as_millis() as u64,
					"jobs still running at shutdown"
				);
				false
			}
		}
	}

	pub fn manager(&self) -> &JobManager {
		&self.manager
	}

	pub fn scheduler(&self) -> &JobScheduler {
		&self.scheduler
	}

	pub fn queue(&self) -> &JobQueue {
		&self.queue
	}
}
