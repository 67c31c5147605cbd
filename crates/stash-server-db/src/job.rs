// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistence for jobs and recurring schedules.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use stash_jobs_core::{
	Job, JobFilter, JobId, JobSchedule, JobState, JobStatus, JobUpdate, NewJob, SharedClock,
};

use crate::error::{DbError, Result};

const JOB_COLUMNS: &str = "id, reservation, deduplication_id, name, state, payload, options, result, status, created_at, updated_at";

const SCHEDULE_COLUMNS: &str = r#"id, "key", repeat_options, job_template, job_id, prev_millis, next_millis, created_at, updated_at"#;

/// Storage contract for the job queue and scheduler.
#[async_trait]
pub trait JobStore: Send + Sync {
	// Job operations

	/// Insert jobs, or return the id of the live job already holding a
	/// submission's deduplication id.
	async fn add_jobs(&self, jobs: &[NewJob]) -> Result<Vec<JobId>>;

	/// Atomically claim the most urgent eligible job, optionally restricted
	/// to the given handler names.
	async fn reserve_job(&self, names: Option<&[String]>) -> Result<Option<Job>>;

	async fn update_job(&self, update: &JobUpdate) -> Result<()>;

	/// Return a job to the pool with one fewer attempt.
	async fn retry_job(&self, job: &Job) -> Result<()>;

	async fn purge_resolved_jobs(&self) -> Result<u64>;
	async fn fetch_job(&self, id: JobId) -> Result<Option<Job>>;
	async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;
	async fn count_jobs(&self, state: JobState) -> Result<u64>;

	// Schedule operations

	/// Insert or replace the schedule with the same key. A schedule without a
	/// `job_id` keeps the stored one.
	async fn upsert_job_schedule(&self, schedule: &JobSchedule) -> Result<JobSchedule>;
	async fn fetch_job_schedule(&self, key: &str) -> Result<Option<JobSchedule>>;

	/// Schedules with no linked job, or whose linked job is no longer pending.
	async fn list_ready_job_schedules(&self, limit: u32) -> Result<Vec<JobSchedule>>;
}

/// SQLite implementation of [`JobStore`].
///
/// All writes go through one in-process lock so reservation and
/// deduplication never race inside a single server.
#[derive(Clone)]
pub struct SqliteJobStore {
	pool: SqlitePool,
	clock: SharedClock,
	write_lock: Arc<Mutex<()>>,
}

impl SqliteJobStore {
	pub fn new(pool: SqlitePool, clock: SharedClock) -> Self {
		Self {
			pool,
			clock,
			write_lock: Arc::new(Mutex::new(())),
		}
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}
}

fn format_timestamp(at: DateTime<Utc>) -> String {
	at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp '{value}': {e}")))
}

#[async_trait]
impl JobStore for SqliteJobStore {
	#[instrument(skip(self, jobs), fields(count = jobs.len()))]
	async fn add_jobs(&self, jobs: &[NewJob]) -> Result<Vec<JobId>> {
		let _guard = self.write_lock.lock().await;
		let now = self.clock.now();
		let now_millis = now.timestamp_millis();
		let now_str = format_timestamp(now);
		let status = serde_json::to_string(&JobStatus::default())?;

		let mut tx = self.pool.begin().await?;
		let mut ids = Vec::with_capacity(jobs.len());

		for job in jobs {
			let mut options = job.options.clone();
			options.defer_until = options.resolve_defer_until(now_millis);
			let options_json = serde_json::to_string(&options)?;

			let (id,): (String,) = sqlx::query_as(
				r#"
				INSERT INTO jobs (id, priority, reservation, deduplication_id, name, state, payload, options, result, status, created_at, updated_at)
				VALUES (?, ?, NULL, ?, ?, 'pending', ?, ?, NULL, ?, ?, ?)
				ON CONFLICT(deduplication_id) DO UPDATE SET updated_at = excluded.updated_at
				RETURNING id
				"#,
			)
			.bind(JobId::new().to_string())
			.bind(options.priority())
			.bind(options.deduplication_id())
			.bind(&job.name)
			.bind(job.payload.to_string())
			.bind(&options_json)
			.bind(&status)
			.bind(&now_str)
			.bind(&now_str)
			.fetch_one(&mut *tx)
			.await?;

			let id: JobId = id
				.parse()
				.map_err(|e: uuid::Error| DbError::Internal(format!("invalid job id: {e}")))?;
			ids.push(id);
		}

		tx.commit().await?;
		tracing::debug!(count = ids.len(), "jobs added");
		Ok(ids)
	}

	#[instrument(skip(self, names))]
	async fn reserve_job(&self, names: Option<&[String]>) -> Result<Option<Job>> {
		let _guard = self.write_lock.lock().await;
		let now = self.clock.now();
		let token = Uuid::new_v4().to_string();
		let names_json = names.map(serde_json::to_string).transpose()?;

		let row = sqlx::query_as::<_, JobRow>(&format!(
			r#"
			UPDATE jobs
			SET reservation = ?, deduplication_id = ?, state = 'reserved', updated_at = ?
			WHERE id = (
				SELECT id FROM jobs
				WHERE reservation IS NULL
					AND state = 'pending'
					AND (json_extract(options, '$.defer_until') IS NULL
						OR json_extract(options, '$.defer_until') <= ?)
					AND (? IS NULL OR name IN (SELECT value FROM json_each(?)))
				ORDER BY priority DESC, created_at DESC, rowid DESC
				LIMIT 1
			)
			RETURNING {JOB_COLUMNS}
			"#
		))
		.bind(&token)
		.bind(&token)
		.bind(format_timestamp(now))
		.bind(now.timestamp_millis())
		.bind(names_json.as_deref())
		.bind(names_json.as_deref())
		.fetch_optional(&self.pool)
		.await?;

		let job = row.map(Job::try_from).transpose()?;
		if let Some(job) = &job {
			tracing::debug!(job_id = %job.id, name = %job.name, "job reserved");
		}
		Ok(job)
	}

	#[instrument(skip(self, update), fields(job_id = %update.id))]
	async fn update_job(&self, update: &JobUpdate) -> Result<()> {
		let _guard = self.write_lock.lock().await;
		let status = update
			.status
			.as_ref()
			.map(serde_json::to_string)
			.transpose()?;
		let result = update.result.as_ref().map(|value| value.to_string());
		let terminal = update.state.is_some_and(|state| state.is_terminal());

		// A job that never got reserved still holds its submission's
		// deduplication id; a terminal job must give it up.
		let outcome = sqlx::query(
			r#"
			UPDATE jobs
			SET state = COALESCE(?, state),
				status = CASE WHEN ? IS NULL THEN status ELSE json_patch(status, ?) END,
				result = COALESCE(?, result),
				deduplication_id = CASE WHEN ? AND reservation IS NULL THEN NULL ELSE deduplication_id END,
				reservation = CASE WHEN ? THEN NULL ELSE reservation END,
				updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(update.state.map(|state| state.as_str()))
		.bind(status.as_deref())
		.bind(status.as_deref())
		.bind(result)
		.bind(terminal)
		.bind(terminal)
		.bind(format_timestamp(self.clock.now()))
		.bind(update.id.to_string())
		.execute(&self.pool)
		.await?;

		if outcome.rows_affected() == 0 {
			return Err(DbError::NotFound(update.id.to_string()));
		}

		Ok(())
	}

	#[instrument(skip(self, job), fields(job_id = %job.id, attempts = job.attempts()))]
	async fn retry_job(&self, job: &Job) -> Result<()> {
		let attempts = job.attempts();
		if attempts < 1 {
			return Ok(());
		}

		let _guard = self.write_lock.lock().await;
		let outcome = sqlx::query(
			r#"
			UPDATE jobs
			SET options = json_set(options, '$.attempts', ?),
				reservation = NULL,
				state = 'pending',
				updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(i64::from(attempts - 1))
		.bind(format_timestamp(self.clock.now()))
		.bind(job.id.to_string())
		.execute(&self.pool)
		.await?;

		if outcome.rows_affected() == 0 {
			return Err(DbError::NotFound(job.id.to_string()));
		}

		Ok(())
	}

	#[instrument(skip(self))]
	async fn purge_resolved_jobs(&self) -> Result<u64> {
		let _guard = self.write_lock.lock().await;
		let outcome = sqlx::query("DELETE FROM jobs WHERE state IN ('completed', 'failed')")
			.execute(&self.pool)
			.await?;

		let purged = outcome.rows_affected();
		tracing::debug!(purged, "resolved jobs purged");
		Ok(purged)
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn fetch_job(&self, id: JobId) -> Result<Option<Job>> {
		let row = sqlx::query_as::<_, JobRow>(&format!(
			"SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(Job::try_from).transpose()
	}

	#[instrument(skip(self, filter))]
	async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
		let state = filter.state.map(|state| state.as_str());
		let limit = filter.limit.map(i64::from).unwrap_or(-1);

		let rows = sqlx::query_as::<_, JobRow>(&format!(
			r#"
			SELECT {JOB_COLUMNS} FROM jobs
			WHERE (? IS NULL OR state = ?)
				AND (? IS NULL OR name = ?)
			ORDER BY created_at DESC, rowid DESC
			LIMIT ?
			"#
		))
		.bind(state)
		.bind(state)
		.bind(filter.name.as_deref())
		.bind(filter.name.as_deref())
		.bind(limit)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(Job::try_from).collect()
	}

	#[instrument(skip(self))]
	async fn count_jobs(&self, state: JobState) -> Result<u64> {
		let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE state = ?")
			.bind(state.as_str())
			.fetch_one(&self.pool)
			.await?;

		Ok(count.max(0) as u64)
	}

	#[instrument(skip(self, schedule), fields(key = %schedule.key))]
	async fn upsert_job_schedule(&self, schedule: &JobSchedule) -> Result<JobSchedule> {
		let _guard = self.write_lock.lock().await;
		let repeat_options = serde_json::to_string(&schedule.repeat_options)?;
		let job_template = serde_json::to_string(&schedule.job_template)?;

		let row = sqlx::query_as::<_, ScheduleRow>(&format!(
			r#"
			INSERT INTO job_schedules (id, "key", repeat_options, job_template, job_id, prev_millis, next_millis, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT("key") DO UPDATE SET
				repeat_options = excluded.repeat_options,
				job_template = excluded.job_template,
				job_id = COALESCE(excluded.job_id, job_schedules.job_id),
				prev_millis = excluded.prev_millis,
				next_millis = excluded.next_millis,
				updated_at = excluded.updated_at
			RETURNING {SCHEDULE_COLUMNS}
			"#
		))
		.bind(schedule.id.to_string())
		.bind(&schedule.key)
		.bind(&repeat_options)
		.bind(&job_template)
		.bind(schedule.job_id.map(|id| id.to_string()))
		.bind(schedule.prev_millis)
		.bind(schedule.next_millis)
		.bind(format_timestamp(schedule.created_at))
		.bind(format_timestamp(self.clock.now()))
		.fetch_one(&self.pool)
		.await?;

		JobSchedule::try_from(row)
	}

	#[instrument(skip(self))]
	async fn fetch_job_schedule(&self, key: &str) -> Result<Option<JobSchedule>> {
		let row = sqlx::query_as::<_, ScheduleRow>(&format!(
			r#"SELECT {SCHEDULE_COLUMNS} FROM job_schedules WHERE "key" = ?"#
		))
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		row.map(JobSchedule::try_from).transpose()
	}

	#[instrument(skip(self))]
	async fn list_ready_job_schedules(&self, limit: u32) -> Result<Vec<JobSchedule>> {
		let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
			r#"
			SELECT {SCHEDULE_COLUMNS} FROM job_schedules
			WHERE job_id IS NULL
				OR NOT EXISTS (
					SELECT 1 FROM jobs
					WHERE jobs.id = job_schedules.job_id AND jobs.state = 'pending'
				)
			ORDER BY next_millis ASC
			LIMIT ?
			"#
		))
		.bind(i64::from(limit))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(JobSchedule::try_from).collect()
	}
}

#[derive(sqlx::FromRow)]
struct JobRow {
	id: String,
	reservation: Option<String>,
	deduplication_id: Option<String>,
	name: String,
	state: String,
	payload: String,
	options: String,
	result: Option<String>,
	status: String,
	created_at: String,
	updated_at: String,
}

impl TryFrom<JobRow> for Job {
	type Error = DbError;

	fn try_from(row: JobRow) -> Result<Self> {
		Ok(Job {
			id: row
				.id
				.parse()
				.map_err(|e: uuid::Error| DbError::Internal(format!("invalid job id: {e}")))?,
			name: row.name,
			payload: serde_json::from_str(&row.payload)?,
			options: serde_json::from_str(&row.options)?,
			state: row.state.parse().map_err(DbError::Internal)?,
			status: serde_json::from_str(&row.status)?,
			result: row.result.as_deref().map(serde_json::from_str).transpose()?,
			reservation: row.reservation,
			deduplication_id: row.deduplication_id,
			created_at: parse_timestamp(&row.created_at)?,
			updated_at: parse_timestamp(&row.updated_at)?,
		})
	}
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
	id: String,
	key: String,
	repeat_options: String,
	job_template: String,
	job_id: Option<String>,
	prev_millis: Option<i64>,
	next_millis: Option<i64>,
	created_at: String,
	updated_at: String,
}

impl TryFrom<ScheduleRow> for JobSchedule {
	type Error = DbError;

	fn try_from(row: ScheduleRow) -> Result<Self> {
		let job_id = row
			.job_id
			.as_deref()
			.map(str::parse::<JobId>)
			.transpose()
			.map_err(|e| DbError::Internal(format!("invalid job id: {e}")))?;

		Ok(JobSchedule {
			id: row
				.id
				.parse()
				.map_err(|e: uuid::Error| DbError::Internal(format!("invalid schedule id: {e}")))?,
			key: row.key,
			repeat_options: serde_json::from_str(&row.repeat_options)?,
			job_template: serde_json::from_str(&row.job_template)?,
			job_id,
			prev_millis: row.prev_millis,
			next_millis: row.next_millis,
			created_at: parse_timestamp(&row.created_at)?,
			updated_at: parse_timestamp(&row.updated_at)?,
		})
	}
}
