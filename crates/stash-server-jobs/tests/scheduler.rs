// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod common;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use stash_jobs_core::{
	Clock, JobOptions, JobSchedule, JobState, JobTemplate, ManualClock, RepeatOptions, SharedClock,
};
use stash_server_jobs::{JobContext, JobError, Jobs, PURGE_RESOLVED_JOBS};

use common::{make_jobs, wait_for};

fn start_time() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2024, 11, 17, 12, 12, 0).unwrap()
}

async fn manual_jobs() -> (Jobs, ManualClock) {
	let clock = ManualClock::new(start_time());
	let shared: SharedClock = Arc::new(clock.clone());
	(make_jobs(shared).await, clock)
}

#[tokio::test]
async fn test_every_schedule_fires_one_interval_from_now() {
	let (jobs, _) = manual_jobs().await;
	let schedule = jobs
		.upsert_job_schedule(
			"heartbeat",
			RepeatOptions::Every { every: 10_000 },
			JobTemplate::new("beat", json!(null)),
		)
		.await
		.unwrap();

	let now = start_time().timestamp_millis();
	assert_eq!(schedule.next_millis, Some(now + 10_000));
	assert_eq!(schedule.prev_millis, Some(now));
	assert!(schedule.job_id.is_none());
}

#[tokio::test]
async fn test_cron_schedule_fires_at_next_match() {
	let (jobs, _) = manual_jobs().await;
	let schedule = jobs
		.upsert_job_schedule(
			"half-past",
			RepeatOptions::pattern("* 30 * * * *"),
			JobTemplate::new("tick", json!(null)),
		)
		.await
		.unwrap();

	let expected = Utc.with_ymd_and_hms(2024, 11, 17, 12, 30, 0).unwrap();
	assert_eq!(schedule.next_millis, Some(expected.timestamp_millis()));
}

#[tokio::test]
async fn test_invalid_rules_are_rejected_before_storing() {
	let (jobs, _) = manual_jobs().await;

	for repeat in [
		RepeatOptions::pattern("every tuesday"),
		RepeatOptions::pattern_in("0 * * * *", "Nowhere/Special"),
		RepeatOptions::Every { every: 0 },
		RepeatOptions::every(Duration::MAX),
	] {
		let err = jobs
			.upsert_job_schedule("bad", repeat, JobTemplate::new("tick", json!(null)))
			.await
			.unwrap_err();
		assert!(matches!(err, JobError::Scheduling(_)), "unexpected: {err}");
	}

	assert!(jobs
		.scheduler()
		.fetch_job_schedule("bad")
		.await
		.unwrap()
		.is_none());
}

#[tokio::test]
async fn test_check_creates_one_deferred_instance() {
	let (jobs, _) = manual_jobs().await;
	let schedule = jobs
		.upsert_job_schedule(
			"digest",
			RepeatOptions::Every { every: 60_000 },
			JobTemplate::new("send-digest", json!({"list": "weekly"}))
				.with_options(JobOptions::new().with_priority(5)),
		)
		.await
		.unwrap();

	assert_eq!(jobs.scheduler().check_schedules().await.unwrap(), 1);
	// The instance is still pending, so the schedule is not ready again.
	assert_eq!(jobs.scheduler().check_schedules().await.unwrap(), 0);

	let stored = jobs
		.scheduler()
		.fetch_job_schedule("digest")
		.await
		.unwrap()
		.unwrap();
	let job_id = stored.job_id.unwrap();
	let job = jobs.manager().fetch_job(job_id).await.unwrap().unwrap();

	assert_eq!(job.name, "send-digest");
	assert_eq!(job.payload, json!({"list": "weekly"}));
	assert_eq!(job.state, JobState::Pending);
	assert_eq!(job.priority(), 5);
	assert_eq!(job.options.defer_until, schedule.next_millis);
	assert_eq!(job.deduplication_id.as_deref(), Some("digest"));
}

#[tokio::test]
async fn test_schedule_advances_after_instance_resolves() {
	let (jobs, clock) = manual_jobs().await;
	jobs
		.upsert_job_schedule(
			"heartbeat",
			RepeatOptions::Every { every: 10_000 },
			JobTemplate::new("beat", json!(null)),
		)
		.await
		.unwrap();
	jobs.scheduler().check_schedules().await.unwrap();
	let first = jobs
		.scheduler()
		.fetch_job_schedule("heartbeat")
		.await
		.unwrap()
		.unwrap();

	clock.advance(ChronoDuration::milliseconds(10_000));
	jobs
		.manager()
		.move_job_to_completed(first.job_id.unwrap(), json!(null))
		.await
		.unwrap();

	assert_eq!(jobs.scheduler().check_schedules().await.unwrap(), 1);
	let second = jobs
		.scheduler()
		.fetch_job_schedule("heartbeat")
		.await
		.unwrap()
		.unwrap();

	let now = clock.now_millis();
	assert_ne!(second.job_id, first.job_id);
	assert_eq!(second.prev_millis, first.next_millis);
	assert_eq!(second.next_millis, Some(now + 10_000));
	assert!(second.next_millis.unwrap() > now);
}

#[tokio::test]
async fn test_reserved_instance_does_not_block_the_next_one() {
	let (jobs, clock) = manual_jobs().await;
	jobs
		.upsert_job_schedule(
			"digest",
			RepeatOptions::Every { every: 60_000 },
			JobTemplate::new("send-digest", json!(null)),
		)
		.await
		.unwrap();
	assert_eq!(jobs.scheduler().check_schedules().await.unwrap(), 1);
	let first = jobs
		.scheduler()
		.fetch_job_schedule("digest")
		.await
		.unwrap()
		.unwrap()
		.job_id
		.unwrap();

	clock.advance(ChronoDuration::milliseconds(60_000));
	let reserved = jobs.manager().store().reserve_job(None).await.unwrap().unwrap();
	assert_eq!(reserved.id, first);
	assert_ne!(reserved.deduplication_id.as_deref(), Some("digest"));

	assert_eq!(jobs.scheduler().check_schedules().await.unwrap(), 1);
	let second = jobs
		.scheduler()
		.fetch_job_schedule("digest")
		.await
		.unwrap()
		.unwrap()
		.job_id
		.unwrap();
	assert_ne!(second, first);

	let first = jobs.manager().fetch_job(first).await.unwrap().unwrap();
	assert_eq!(first.state, JobState::Reserved);
	let second = jobs.manager().fetch_job(second).await.unwrap().unwrap();
	assert_eq!(second.state, JobState::Pending);
	assert_eq!(second.deduplication_id.as_deref(), Some("digest"));
}

#[tokio::test]
async fn test_one_broken_schedule_does_not_block_others() {
	let (jobs, _) = manual_jobs().await;
	let mut broken = JobSchedule::new(
		"broken",
		RepeatOptions::pattern("definitely not cron"),
		JobTemplate::new("tick", json!(null)),
		start_time(),
	);
	broken.next_millis = Some(0);
	jobs.manager().store().upsert_job_schedule(&broken).await.unwrap();

	jobs
		.upsert_job_schedule(
			"healthy",
			RepeatOptions::Every { every: 1_000 },
			JobTemplate::new("tick", json!(null)),
		)
		.await
		.unwrap();

	assert_eq!(jobs.scheduler().check_schedules().await.unwrap(), 1);
	let healthy = jobs
		.scheduler()
		.fetch_job_schedule("healthy")
		.await
		.unwrap()
		.unwrap();
	assert!(healthy.job_id.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_purge_schedule_removes_resolved_jobs() {
	let (jobs, clock) = manual_jobs().await;
	jobs.register_job_handler("noop", |_ctx: JobContext| async move {
		Ok::<_, JobError>(json!(null))
	});

	let done = jobs.add("noop", json!(null), JobOptions::new()).await.unwrap();
	let waiting = jobs
		.add(
			"noop",
			json!(null),
			JobOptions::new().with_defer_until(i64::MAX),
		)
		.await
		.unwrap();
	jobs.manager().move_job_to_completed(done, json!(null)).await.unwrap();

	let schedule = jobs.schedule_job_purge().await.unwrap();
	assert_eq!(schedule.key, PURGE_RESOLVED_JOBS);
	assert!(jobs.queue().has_handler(PURGE_RESOLVED_JOBS));

	jobs.scheduler().check_schedules().await.unwrap();
	clock.advance(ChronoDuration::seconds(1));

	jobs.queue().start().await;
	jobs.on_idle().await;

	assert!(jobs.manager().fetch_job(done).await.unwrap().is_none());
	assert!(jobs.manager().fetch_job(waiting).await.unwrap().is_some());

	let purge_job = jobs
		.scheduler()
		.fetch_job_schedule(PURGE_RESOLVED_JOBS)
		.await
		.unwrap()
		.unwrap()
		.job_id
		.unwrap();
	let purge_job = jobs.manager().fetch_job(purge_job).await.unwrap().unwrap();
	assert_eq!(purge_job.state, JobState::Completed);
	assert_eq!(purge_job.result, Some(json!({"purged": 1})));
	jobs.pause();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timer_checks_schedules_until_stopped() {
	let (jobs, _) = manual_jobs().await;
	jobs
		.upsert_job_schedule(
			"timed",
			RepeatOptions::Every { every: 60_000 },
			JobTemplate::new("tick", json!(null)),
		)
		.await
		.unwrap();

	jobs.scheduler().start();
	assert!(jobs.scheduler().is_running());

	let scheduler = jobs.scheduler().clone();
	let linked = wait_for(Duration::from_secs(2), || {
		let scheduler = scheduler.clone();
		async move {
			scheduler
				.fetch_job_schedule("timed")
				.await
				.unwrap()
				.is_some_and(|s| s.job_id.is_some())
		}
	})
	.await;
	assert!(linked);

	jobs.scheduler().stop();
	assert!(!jobs.scheduler().is_running());
}
