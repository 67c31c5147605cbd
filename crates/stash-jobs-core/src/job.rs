// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job records and submission options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for JobId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Lifecycle state of a job.
///
/// Pending → Reserved → Started → Completed | Failed. A retry moves a
/// started job back to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
	Pending,
	Reserved,
	Started,
	Completed,
	Failed,
}

impl JobState {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobState::Pending => "pending",
			JobState::Reserved => "reserved",
			JobState::Started => "started",
			JobState::Completed => "completed",
			JobState::Failed => "failed",
		}
	}

	/// Live jobs hold their deduplication id and are not eligible for purge.
	pub fn is_live(&self) -> bool {
		matches!(
			self,
			JobState::Pending | JobState::Reserved | JobState::Started
		)
	}

	pub fn is_terminal(&self) -> bool {
		!self.is_live()
	}
}

impl fmt::Display for JobState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for JobState {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(JobState::Pending),
			"reserved" => Ok(JobState::Reserved),
			"started" => Ok(JobState::Started),
			"completed" => Ok(JobState::Completed),
			"failed" => Ok(JobState::Failed),
			_ => Err(format!("unknown job state: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduplication {
	pub id: String,
}

/// Options supplied when a job is submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
	/// Higher values are reserved first.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub priority: Option<i64>,
	/// Total invocation budget. Unset means a single attempt.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub attempts: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deduplication: Option<Deduplication>,
	/// Absolute epoch milliseconds before which the job is not reserved.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub defer_until: Option<i64>,
	/// Relative delay in milliseconds, resolved against the submission time.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delay: Option<u64>,
}

impl JobOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_priority(mut self, priority: i64) -> Self {
		self.priority = Some(priority);
		self
	}

	pub fn with_attempts(mut self, attempts: u32) -> Self {
		self.attempts = Some(attempts);
		self
	}

	pub fn with_deduplication_id(mut self, id: impl Into<String>) -> Self {
		self.deduplication = Some(Deduplication { id: id.into() });
		self
	}

	pub fn with_defer_until(mut self, millis: i64) -> Self {
		self.defer_until = Some(millis);
		self
	}

	pub fn with_delay(mut self, millis: u64) -> Self {
		self.delay = Some(millis);
		self
	}

	pub fn priority(&self) -> i64 {
		self.priority.unwrap_or(0)
	}

	pub fn attempts(&self) -> u32 {
		self.attempts.unwrap_or(1)
	}

	pub fn deduplication_id(&self) -> Option<&str> {
		self.deduplication.as_ref().map(|d| d.id.as_str())
	}

	/// The absolute time the job becomes eligible. An explicit `defer_until`
	/// wins over `delay`.
	pub fn resolve_defer_until(&self, now_millis: i64) -> Option<i64> {
		self.defer_until.or_else(|| {
			self.delay
				.map(|delay| now_millis.saturating_add(i64::try_from(delay).unwrap_or(i64::MAX)))
		})
	}
}

/// Progress information reported by a running handler.
///
/// Updates are merged into the stored status, so a patch only needs the
/// fields it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub progress: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub log: Option<Vec<String>>,
}

impl JobStatus {
	/// A progress patch. `progress` is clamped to `0.0..=1.0`.
	pub fn progress(progress: f64, message: impl Into<String>) -> Self {
		let progress = if progress.is_nan() {
			0.0
		} else {
			progress.clamp(0.0, 1.0)
		};
		Self {
			progress: Some(progress),
			message: Some(message.into()),
			log: None,
		}
	}

	pub fn with_log(mut self, log: Vec<String>) -> Self {
		self.log = Some(log);
		self
	}

	pub fn is_empty(&self) -> bool {
		self.progress.is_none() && self.message.is_none() && self.log.is_none()
	}
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
	pub id: JobId,
	pub name: String,
	pub payload: Value,
	pub options: JobOptions,
	pub state: JobState,
	pub status: JobStatus,
	pub result: Option<Value>,
	/// Set only while the job is reserved or started.
	pub reservation: Option<String>,
	pub deduplication_id: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Job {
	pub fn priority(&self) -> i64 {
		self.options.priority()
	}

	/// Remaining invocation budget.
	pub fn attempts(&self) -> u32 {
		self.options.attempts()
	}
}

/// A job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
	pub name: String,
	#[serde(default)]
	pub payload: Value,
	#[serde(default)]
	pub options: JobOptions,
}

impl NewJob {
	pub fn new(name: impl Into<String>, payload: Value) -> Self {
		Self {
			name: name.into(),
			payload,
			options: JobOptions::default(),
		}
	}

	pub fn with_options(mut self, options: JobOptions) -> Self {
		self.options = options;
		self
	}
}

/// A partial update to a stored job. Unset fields are left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
	pub id: JobId,
	pub state: Option<JobState>,
	pub status: Option<JobStatus>,
	pub result: Option<Value>,
}

impl JobUpdate {
	pub fn new(id: JobId) -> Self {
		Self {
			id,
			state: None,
			status: None,
			result: None,
		}
	}

	pub fn state(mut self, state: JobState) -> Self {
		self.state = Some(state);
		self
	}

	pub fn status(mut self, status: JobStatus) -> Self {
		self.status = Some(status);
		self
	}

	pub fn result(mut self, result: Value) -> Self {
		self.result = Some(result);
		self
	}
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
	pub state: Option<JobState>,
	pub name: Option<String>,
	pub limit: Option<u32>,
}

impl JobFilter {
	pub fn with_state(mut self, state: JobState) -> Self {
		self.state = Some(state);
		self
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn with_limit(mut self, limit: u32) -> Self {
		self.limit = Some(limit);
		self
	}
}
