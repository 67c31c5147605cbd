// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Recurring schedules that enqueue jobs.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use stash_jobs_core::{JobId, JobSchedule, JobTemplate, RepeatOptions, SharedClock};
use stash_server_db::JobStore;

use crate::error::{JobError, Result};
use crate::handle::OwnedTaskHandle;
use crate::handler::{FnHandler, JobContext};
use crate::manager::JobManager;

/// Name and schedule key of the built-in cleanup job.
pub const PURGE_RESOLVED_JOBS: &str = "purge-resolved-jobs";

/// Schedules handled per tick.
const READY_BATCH_SIZE: u32 = 100;

/// Creates one job per firing of each ready schedule.
///
/// A schedule is ready when it has no instance yet or its last instance has
/// left the pending state. Instances are deferred until the schedule's next
/// firing time.
#[derive(Clone)]
pub struct JobScheduler {
	inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
	manager: JobManager,
	clock: SharedClock,
	poll_interval: Duration,
	purge_interval: Duration,
	timer: Mutex<Option<OwnedTaskHandle>>,
}

impl JobScheduler {
	pub fn new(
		manager: JobManager,
		clock: SharedClock,
		poll_interval: Duration,
		purge_interval: Duration,
	) -> Self {
		Self {
			inner: Arc::new(SchedulerInner {
				manager,
				clock,
				poll_interval: poll_interval.max(Duration::from_millis(1)),
				purge_interval,
				timer: Mutex::new(None),
			}),
		}
	}

	fn store(&self) -> &Arc<dyn JobStore> {
		self.inner.manager.store()
	}

	/// Create or replace the schedule stored under `key`.
	///
	/// Invalid cron patterns, unknown timezones and zero intervals are
	/// rejected before anything is written.
	#[instrument(skip(self, repeat_options, job_template), fields(key = %key, job = %job_template.name))]
	pub async fn upsert_job_schedule(
		&self,
		key: &str,
		repeat_options: RepeatOptions,
		job_template: JobTemplate,
	) -> Result<JobSchedule> {
		repeat_options.validate()?;

		let now = self.inner.clock.now();
		let mut schedule = JobSchedule::new(key, repeat_options, job_template, now);
		schedule.advance_next_millis(now.timestamp_millis())?;

		let stored = self.store().upsert_job_schedule(&schedule).await?;
		info!(next_millis = ?stored.next_millis, "job schedule upserted");
		Ok(stored)
	}

	pub async fn fetch_job_schedule(&self, key: &str) -> Result<Option<JobSchedule>> {
		Ok(self.store().fetch_job_schedule(key).await?)
	}

	/// Enqueue the next instance of every ready schedule. Returns how many
	/// instances were created. A failing schedule is logged and skipped.
	#[instrument(skip(self))]
	pub async fn check_schedules(&self) -> Result<usize> {
		let ready = self
			.store()
			.list_ready_job_schedules(READY_BATCH_SIZE)
			.await?;

		let mut created = 0;
		for schedule in ready {
			let key = schedule.key.clone();
			match self.process_schedule(schedule).await {
				Ok(job_id) => {
					debug!(key = %key, job_id = %job_id, "scheduled job enqueued");
					created += 1;
				}
				Err(e) => warn!(key = %key, error = %e, "failed to process job schedule"),
			}
		}

		Ok(created)
	}

	async fn process_schedule(&self, mut schedule: JobSchedule) -> Result<JobId> {
		schedule.advance_next_millis(self.inner.clock.now_millis())?;

		let job_id = self
			.inner
			.manager
			.add(
				&schedule.job_template.name,
				schedule.job_template.payload.clone(),
				schedule.instance_options(),
			)
			.await?;

		schedule.job_id = Some(job_id);
		self.store().upsert_job_schedule(&schedule).await?;
		Ok(job_id)
	}

	/// Start the periodic schedule check. Restarting replaces the timer.
	pub fn start(&self) {
		let weak = Arc::downgrade(&self.inner);
		let period = self.inner.poll_interval;
		let timer = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				let Some(inner) = weak.upgrade() else {
					break;
				};
				if let Err(e) = (JobScheduler { inner }).check_schedules().await {
					warn!(error = %e, "schedule check failed");
				}
			}
		});

		*self
			.inner
			.timer
			.lock()
			.unwrap_or_else(PoisonError::into_inner) = Some(OwnedTaskHandle::new(timer));
		info!(
			poll_interval_ms = period.as_millis() as u64,
			"job scheduler started"
		);
	}

	pub fn stop(&self) {
		if self
			.inner
			.timer
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take()
			.is_some()
		{
			info!("job scheduler stopped");
		}
	}

	pub fn is_running(&self) -> bool {
		self
			.inner
			.timer
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.as_ref()
			.is_some_and(|timer| !timer.is_finished())
	}

	/// Register the cleanup handler and schedule it every purge interval.
	#[instrument(skip(self))]
	pub async fn schedule_job_purge(&self) -> Result<JobSchedule> {
		let store = Arc::clone(self.store());
		let handler = FnHandler::new(move |_ctx: JobContext| {
			let store = Arc::clone(&store);
			async move {
				let purged = store.purge_resolved_jobs().await?;
				info!(purged, "purged resolved jobs");
				Ok::<_, JobError>(json!({ "purged": purged }))
			}
		});
		self
			.inner
			.manager
			.queue()
			.register_handler(PURGE_RESOLVED_JOBS, Arc::new(handler));

		self
			.upsert_job_schedule(
				PURGE_RESOLVED_JOBS,
				RepeatOptions::every(self.inner.purge_interval),
				JobTemplate::new(PURGE_RESOLVED_JOBS, Value::Null),
			)
			.await
	}
}
