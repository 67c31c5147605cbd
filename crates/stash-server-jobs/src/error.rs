// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use stash_jobs_core::ScheduleError;
use stash_server_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
	#[error("no handler registered for job '{0}'")]
	HandlerMissing(String),

	/// A handler reported failure. Retried while attempts remain.
	#[error("{0}")]
	Failed(String),

	#[error("Database error: {0}")]
	Database(#[from] DbError),

	#[error("Scheduling error: {0}")]
	Scheduling(#[from] ScheduleError),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl JobError {
	pub fn failed(message: impl Into<String>) -> Self {
		JobError::Failed(message.into())
	}
}

pub type Result<T> = std::result::Result<T, JobError>;
