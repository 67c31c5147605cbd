// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded-concurrency job runner.

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use stash_jobs_core::Job;
use stash_server_db::JobStore;

use crate::error::{JobError, Result};
use crate::handle::OwnedTaskHandle;
use crate::handler::{JobContext, JobHandler};
use crate::manager::JobManager;

/// Pulls reservable jobs from the store and runs them on up to
/// `concurrency` tokio tasks. Created paused.
#[derive(Clone)]
pub struct JobQueue {
	inner: Arc<QueueInner>,
}

struct QueueInner {
	store: Arc<dyn JobStore>,
	handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
	concurrency: usize,
	slots: Arc<Semaphore>,
	in_flight: AtomicUsize,
	idle: Notify,
	paused: AtomicBool,
	poll_interval: Duration,
	poller: Mutex<Option<OwnedTaskHandle>>,
}

impl JobQueue {
	pub fn new(store: Arc<dyn JobStore>, concurrency: usize, poll_interval: Duration) -> Self {
		let concurrency = concurrency.max(1);
		Self {
			inner: Arc::new(QueueInner {
				store,
				handlers: RwLock::new(HashMap::new()),
				concurrency,
				slots: Arc::new(Semaphore::new(concurrency)),
				in_flight: AtomicUsize::new(0),
				idle: Notify::new(),
				paused: AtomicBool::new(true),
				poll_interval: poll_interval.max(Duration::from_millis(1)),
				poller: Mutex::new(None),
			}),
		}
	}

	/// Register the handler for jobs named `name`, replacing any previous one.
	pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
		let name = name.into();
		debug!(name = %name, "registering job handler");
		self
			.inner
			.handlers
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(name, handler);
	}

	pub fn has_handler(&self, name: &str) -> bool {
		self.handler(name).is_some()
	}

	pub fn handler_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self
			.inner
			.handlers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.keys()
			.cloned()
			.collect();
		names.sort();
		names
	}

	fn handler(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
		self
			.inner
			.handlers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(name)
			.cloned()
	}

	pub fn concurrency(&self) -> usize {
		self.inner.concurrency
	}

	pub fn is_paused(&self) -> bool {
		self.inner.paused.load(Ordering::SeqCst)
	}

	/// Number of reservations being run or attempted right now.
	pub fn in_flight(&self) -> usize {
		self.inner.in_flight.load(Ordering::SeqCst)
	}

	pub fn is_idle(&self) -> bool {
		self.in_flight() == 0
	}

	/// Resume dispatching, restart the poll timer and fill free slots.
	#[instrument(skip(self))]
	pub async fn start(&self) {
		self.inner.paused.store(false, Ordering::SeqCst);

		let weak = Arc::downgrade(&self.inner);
		let period = self.inner.poll_interval;
		let poller = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				let Some(inner) = weak.upgrade() else {
					break;
				};
				JobQueue { inner }.maybe_fill_queue().await;
			}
		});
		*self
			.inner
			.poller
			.lock()
			.unwrap_or_else(PoisonError::into_inner) = Some(OwnedTaskHandle::new(poller));

		info!(
			concurrency = self.inner.concurrency,
			poll_interval_ms = period.as_millis() as u64,
			"job queue started"
		);
		self.maybe_fill_queue().await;
	}

	/// Stop dispatching new jobs. Running jobs are left to finish.
	pub fn pause(&self) {
		self.inner.paused.store(true, Ordering::SeqCst);
		self
			.inner
			.poller
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		info!("job queue paused");
	}

	/// Resolve once no job is running.
	pub async fn on_idle(&self) {
		loop {
			let notified = self.inner.idle.notified();
			if self.is_idle() {
				return;
			}
			notified.await;
		}
	}

	/// Reserve and dispatch jobs until the slots are full or nothing is
	/// reservable. Store errors are logged and end this round.
	#[instrument(level = "trace", skip(self))]
	pub async fn maybe_fill_queue(&self) {
		while !self.is_paused() {
			let Ok(permit) = Arc::clone(&self.inner.slots).try_acquire_owned() else {
				return;
			};

			self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
			match self.inner.store.reserve_job(None).await {
				Ok(Some(job)) => self.dispatch(job, permit),
				Ok(None) => {
					drop(permit);
					self.finish_task();
					return;
				}
				Err(e) => {
					warn!(error = %e, "failed to reserve job");
					drop(permit);
					self.finish_task();
					return;
				}
			}
		}
	}

	fn dispatch(&self, job: Job, permit: OwnedSemaphorePermit) {
		let queue = self.clone();
		tokio::spawn(async move {
			queue.run_job(job).await;
			drop(permit);
			queue.maybe_fill_queue().await;
			queue.finish_task();
		});
	}

	fn finish_task(&self) {
		if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
			self.inner.idle.notify_waiters();
		}
	}

	#[instrument(skip(self, job), fields(job_id = %job.id, name = %job.name))]
	async fn run_job(&self, job: Job) {
		let manager = JobManager::new(Arc::clone(&self.inner.store), self.clone());
		if let Err(e) = self.execute(&manager, &job).await {
			error!(error = %e, "failed to record job outcome");
		}
	}

	async fn execute(&self, manager: &JobManager, job: &Job) -> Result<()> {
		let Some(handler) = self.handler(&job.name) else {
			let error = JobError::HandlerMissing(job.name.clone());
			warn!(error = %error, "failing job without handler");
			return manager.move_job_to_failed(job.id, &error).await;
		};

		manager.move_job_to_started(job.id).await?;

		let started = Instant::now();
		let ctx = JobContext::new(job, manager.clone());
		let outcome = match AssertUnwindSafe(handler.run(ctx)).catch_unwind().await {
			Ok(outcome) => outcome,
			Err(panic) => Err(JobError::failed(format!(
				"handler panicked: {}",
				panic_message(panic.as_ref())
			))),
		};
		let duration_ms = started.elapsed().as_millis() as u64;

		match outcome {
			Ok(result) => {
				info!(duration_ms, "job completed");
				manager.move_job_to_completed(job.id, result).await
			}
			Err(error) if job.attempts() > 1 => {
				warn!(
					error = %error,
					attempts_left = job.attempts() - 1,
					duration_ms,
					"job attempt failed, retrying"
				);
				manager.retry_job(job).await
			}
			Err(error) => {
				warn!(error = %error, duration_ms, "job failed");
				manager.move_job_to_failed(job.id, &error).await
			}
		}
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}
