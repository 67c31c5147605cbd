// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;

use stash_jobs_core::{
	Job, JobFilter, JobId, JobOptions, JobState, JobStatus, JobUpdate, NewJob,
};
use stash_server_db::{DbError, JobStore};

use crate::error::{JobError, Result};
use crate::queue::JobQueue;

/// Submission and state transitions for jobs.
///
/// Every submission and retry nudges the queue so new work is picked up
/// without waiting for the next poll.
#[derive(Clone)]
pub struct JobManager {
	store: Arc<dyn JobStore>,
	queue: JobQueue,
}

impl JobManager {
	pub fn new(store: Arc<dyn JobStore>, queue: JobQueue) -> Self {
		Self { store, queue }
	}

	pub fn store(&self) -> &Arc<dyn JobStore> {
		&self.store
	}

	pub fn queue(&self) -> &JobQueue {
		&self.queue
	}

	#[instrument(skip(self, payload, options))]
	pub async fn add(&self, name: &str, payload: Value, options: JobOptions) -> Result<JobId> {
		let ids = self
			.add_bulk(vec![NewJob::new(name, payload).with_options(options)])
			.await?;
		ids
			.into_iter()
			.next()
			.ok_or_else(|| DbError::Internal("insert returned no job id".to_string()).into())
	}

	#[instrument(skip(self, jobs), fields(count = jobs.len()))]
	pub async fn add_bulk(&self, jobs: Vec<NewJob>) -> Result<Vec<JobId>> {
		if jobs.is_empty() {
			return Ok(Vec::new());
		}
		let ids = self.store.add_jobs(&jobs).await?;
		self.queue.maybe_fill_queue().await;
		Ok(ids)
	}

	pub async fn pending_count(&self) -> Result<u64> {
		Ok(self.store.count_jobs(JobState::Pending).await?)
	}

	pub async fn fetch_job(&self, id: JobId) -> Result<Option<Job>> {
		Ok(self.store.fetch_job(id).await?)
	}

	pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
		Ok(self.store.list_jobs(filter).await?)
	}

	pub async fn move_job_to_started(&self, id: JobId) -> Result<()> {
		self
			.store
			.update_job(&JobUpdate::new(id).state(JobState::Started))
			.await?;
		Ok(())
	}

	pub async fn update_job_progress(&self, id: JobId, status: JobStatus) -> Result<()> {
		self
			.store
			.update_job(&JobUpdate::new(id).status(status))
			.await?;
		Ok(())
	}

	pub async fn move_job_to_completed(&self, id: JobId, result: Value) -> Result<()> {
		self
			.store
			.update_job(&JobUpdate::new(id).state(JobState::Completed).result(result))
			.await?;
		Ok(())
	}

	/// Fail a job, keeping the error in its result.
	pub async fn move_job_to_failed(&self, id: JobId, error: &JobError) -> Result<()> {
		self
			.store
			.update_job(
				&JobUpdate::new(id)
					.state(JobState::Failed)
					.result(json!({ "error": error.to_string() })),
			)
			.await?;
		Ok(())
	}

	#[instrument(skip(self, job), fields(job_id = %job.id))]
	pub async fn retry_job(&self, job: &Job) -> Result<()> {
		self.store.retry_job(job).await?;
		self.queue.maybe_fill_queue().await;
		Ok(())
	}

	pub async fn purge_resolved_jobs(&self) -> Result<u64> {
		Ok(self.store.purge_resolved_jobs().await?)
	}
}
