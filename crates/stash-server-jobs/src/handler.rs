// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;

use stash_jobs_core::{Job, JobId, JobStatus};

use crate::error::Result;
use crate::manager::JobManager;

/// Work performed for every job with a given name.
///
/// The returned value is stored as the job's result. An error fails the
/// attempt; the job is retried while its attempt budget allows.
#[async_trait]
pub trait JobHandler: Send + Sync {
	async fn run(&self, ctx: JobContext) -> Result<Value>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
	pub fn new(f: F) -> Self {
		Self(f)
	}
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
	F: Fn(JobContext) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Value>> + Send + 'static,
{
	async fn run(&self, ctx: JobContext) -> Result<Value> {
		(self.0)(ctx).await
	}
}

/// What a handler sees of the job it is running.
pub struct JobContext {
	job_id: JobId,
	name: String,
	payload: Value,
	attempts: u32,
	manager: JobManager,
}

impl JobContext {
	pub(crate) fn new(job: &Job, manager: JobManager) -> Self {
		Self {
			job_id: job.id,
			name: job.name.clone(),
			payload: job.payload.clone(),
			attempts: job.attempts(),
			manager,
		}
	}

	pub fn job_id(&self) -> JobId {
		self.job_id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn payload(&self) -> &Value {
		&self.payload
	}

	/// Deserialize the payload into a typed value.
	pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T> {
		Ok(serde_json::from_value(self.payload.clone())?)
	}

	/// Attempts left including the current one.
	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	/// Record progress (clamped to `0.0..=1.0`) and a status message.
	pub async fn progress(&self, progress: f64, message: &str) -> Result<()> {
		self.update_status(JobStatus::progress(progress, message)).await
	}

	/// Merge a status patch into the stored status.
	pub async fn update_status(&self, status: JobStatus) -> Result<()> {
		self.manager.update_job_progress(self.job_id, status).await
	}
}
