// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the stash job queue.
//!
//! This crate holds the data model shared by the store and the runtime:
//! jobs and their submission options, recurring schedules and the repeat
//! rules that drive them, and the clock abstraction used for all
//! scheduling arithmetic.

pub mod clock;
pub mod error;
pub mod job;
pub mod schedule;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Result, ScheduleError};
pub use job::{
	Deduplication, Job, JobFilter, JobId, JobOptions, JobState, JobStatus, JobUpdate, NewJob,
};
pub use schedule::{JobSchedule, JobTemplate, RepeatOptions, ScheduleId};
