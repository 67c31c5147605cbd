// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Recurring schedules and repeat rules.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, ScheduleError};
use crate::job::{JobId, JobOptions};

/// Upper bound on cron steps taken while catching a schedule up to now.
const MAX_CATCH_UP_STEPS: usize = 10_000;

/// Unique identifier for a schedule row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub Uuid);

impl ScheduleId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for ScheduleId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ScheduleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ScheduleId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// How often a schedule fires.
///
/// Persisted as `{"every": 10000}` or `{"pattern": "0 3 * * *", "tz": "Europe/Berlin"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepeatOptions {
	/// Fixed interval in milliseconds.
	Every { every: u64 },
	/// Cron expression, 5, 6 or 7 fields, evaluated in `tz` (UTC when unset).
	Pattern {
		pattern: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		tz: Option<String>,
	},
}

impl RepeatOptions {
	pub fn every(interval: Duration) -> Self {
		RepeatOptions::Every {
			every: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
		}
	}

	pub fn pattern(pattern: impl Into<String>) -> Self {
		RepeatOptions::Pattern {
			pattern: pattern.into(),
			tz: None,
		}
	}

	pub fn pattern_in(pattern: impl Into<String>, tz: impl Into<String>) -> Self {
		RepeatOptions::Pattern {
			pattern: pattern.into(),
			tz: Some(tz.into()),
		}
	}

	/// Check the rule without evaluating it.
	pub fn validate(&self) -> Result<()> {
		match self {
			RepeatOptions::Every { every } => {
				if *every == 0 {
					return Err(ScheduleError::ZeroInterval);
				}
				Ok(())
			}
			RepeatOptions::Pattern { pattern, tz } => {
				parse_pattern(pattern)?;
				parse_timezone(tz.as_deref())?;
				Ok(())
			}
		}
	}

	/// The first firing strictly after `prev_millis`.
	pub fn next_after(&self, prev_millis: i64) -> Result<i64> {
		match self {
			RepeatOptions::Every { every } => {
				let every = interval_millis(*every)?;
				prev_millis
					.checked_add(every)
					.ok_or(ScheduleError::TimestampOutOfRange(prev_millis))
			}
			RepeatOptions::Pattern { pattern, tz } => {
				let schedule = parse_pattern(pattern)?;
				let tz = parse_timezone(tz.as_deref())?;
				next_occurrence(&schedule, tz, pattern, prev_millis)
			}
		}
	}
}

fn next_occurrence(schedule: &Schedule, tz: Tz, pattern: &str, prev_millis: i64) -> Result<i64> {
	let after = Utc
		.timestamp_millis_opt(prev_millis)
		.single()
		.ok_or(ScheduleError::TimestampOutOfRange(prev_millis))?
		.with_timezone(&tz);

	schedule
		.after(&after)
		.next()
		.map(|next| next.with_timezone(&Utc).timestamp_millis())
		.ok_or_else(|| ScheduleError::NoUpcomingOccurrence(pattern.to_string()))
}

/// The last firing at or before `at_millis`, if any.
fn previous_occurrence(schedule: &Schedule, tz: Tz, at_millis: i64) -> Result<Option<i64>> {
	let bound = at_millis.saturating_add(1);
	let before = Utc
		.timestamp_millis_opt(bound)
		.single()
		.ok_or(ScheduleError::TimestampOutOfRange(bound))?
		.with_timezone(&tz);

	Ok(schedule
		.after(&before)
		.next_back()
		.map(|prev| prev.with_timezone(&Utc).timestamp_millis()))
}

fn interval_millis(every: u64) -> Result<i64> {
	if every == 0 {
		return Err(ScheduleError::ZeroInterval);
	}
	Ok(i64::try_from(every).unwrap_or(i64::MAX))
}

/// Widen a 5-field Unix expression to the seconds-first format of the
/// `cron` crate. 6 and 7 field expressions pass through.
fn to_cron_crate_format(expression: &str) -> String {
	if expression.split_whitespace().count() == 5 {
		format!("0 {} *", expression.trim())
	} else {
		expression.trim().to_string()
	}
}

fn parse_pattern(expression: &str) -> Result<Schedule> {
	Schedule::from_str(&to_cron_crate_format(expression)).map_err(|e| {
		ScheduleError::InvalidCronExpression {
			expression: expression.to_string(),
			message: e.to_string(),
		}
	})
}

fn parse_timezone(tz: Option<&str>) -> Result<Tz> {
	match tz {
		None => Ok(Tz::UTC),
		Some(name) => name
			.parse()
			.map_err(|_| ScheduleError::InvalidTimezone(name.to_string())),
	}
}

/// The job a schedule creates on every firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
	pub name: String,
	#[serde(default)]
	pub payload: Value,
	#[serde(default)]
	pub options: JobOptions,
}

impl JobTemplate {
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

/// A named recurring schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSchedule {
	pub id: ScheduleId,
	pub key: String,
	pub repeat_options: RepeatOptions,
	pub job_template: JobTemplate,
	/// The most recently created instance.
	pub job_id: Option<JobId>,
	pub prev_millis: Option<i64>,
	pub next_millis: Option<i64>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl JobSchedule {
	pub fn new(
		key: impl Into<String>,
		repeat_options: RepeatOptions,
		job_template: JobTemplate,
		now: DateTime<Utc>,
	) -> Self {
		Self {
			id: ScheduleId::new(),
			key: key.into(),
			repeat_options,
			job_template,
			job_id: None,
			prev_millis: None,
			next_millis: None,
			created_at: now,
			updated_at: now,
		}
	}

	pub fn calculate_next_execution_time(&self, prev_millis: i64) -> Result<i64> {
		self.repeat_options.next_after(prev_millis)
	}

	/// Move `next_millis` past `now_millis`, recording the last firing that
	/// was passed over in `prev_millis`. A future `next_millis` is left alone.
	pub fn advance_next_millis(&mut self, now_millis: i64) -> Result<i64> {
		let mut candidate = self.next_millis.unwrap_or(now_millis);

		let (pattern, tz) = match &self.repeat_options {
			RepeatOptions::Every { every } => {
				let every = interval_millis(*every)?;
				if candidate <= now_millis {
					let behind = now_millis
						.checked_sub(candidate)
						.ok_or(ScheduleError::TimestampOutOfRange(candidate))?;
					let prev = candidate + behind / every * every;
					candidate = prev
						.checked_add(every)
						.ok_or(ScheduleError::TimestampOutOfRange(prev))?;
					self.prev_millis = Some(prev);
				}
				self.next_millis = Some(candidate);
				return Ok(candidate);
			}
			RepeatOptions::Pattern { pattern, tz } => (pattern, tz),
		};
		let schedule = parse_pattern(pattern)?;
		let tz = parse_timezone(tz.as_deref())?;

		let mut steps = 0;
		while candidate <= now_millis {
			if steps == MAX_CATCH_UP_STEPS {
				let last = previous_occurrence(&schedule, tz, now_millis)?;
				self.prev_millis = Some(last.unwrap_or(candidate));
				candidate = next_occurrence(&schedule, tz, pattern, now_millis)?;
				break;
			}
			self.prev_millis = Some(candidate);
			candidate = next_occurrence(&schedule, tz, pattern, candidate)?;
			steps += 1;
		}

		self.next_millis = Some(candidate);
		Ok(candidate)
	}

	/// Instances share this id so at most one is live at a time.
	pub fn deduplication_id(&self) -> String {
		self.job_template
			.options
			.deduplication_id()
			.unwrap_or(&self.key)
			.to_string()
	}

	/// Options for the next instance: the template's options, deduplicated
	/// on the schedule and deferred until `next_millis`.
	pub fn instance_options(&self) -> JobOptions {
		let mut options = self
			.job_template
			.options
			.clone()
			.with_deduplication_id(self.deduplication_id());
		options.defer_until = self.next_millis;
		options.delay = None;
		options
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	fn millis(rfc3339: &str) -> i64 {
		DateTime::parse_from_rfc3339(rfc3339)
			.unwrap()
			.timestamp_millis()
	}

	fn schedule(repeat: RepeatOptions) -> JobSchedule {
		JobSchedule::new(
			"test",
			repeat,
			JobTemplate::new("noop", Value::Null),
			Utc::now(),
		)
	}

	#[test]
	fn seconds_pattern_finds_next_matching_minute() {
		let s = schedule(RepeatOptions::pattern("* 30 * * * *"));
		let next = s
			.calculate_next_execution_time(millis("2024-11-17T12:12:00Z"))
			.unwrap();
		assert_eq!(next, millis("2024-11-17T12:30:00Z"));
	}

	#[test]
	fn five_field_pattern_is_widened() {
		let s = schedule(RepeatOptions::pattern("0 0 * * *"));
		let next = s
			.calculate_next_execution_time(millis("2026-01-19T10:30:00Z"))
			.unwrap();
		assert_eq!(next, millis("2026-01-20T00:00:00Z"));
	}

	#[test]
	fn pattern_is_evaluated_in_timezone() {
		let s = schedule(RepeatOptions::pattern_in("0 9 * * *", "America/New_York"));
		// 09:00 EST is 14:00 UTC in January.
		let next = s
			.calculate_next_execution_time(millis("2026-01-19T12:00:00Z"))
			.unwrap();
		assert_eq!(next, millis("2026-01-19T14:00:00Z"));
	}

	#[test]
	fn pattern_occurrence_is_strictly_after_prev() {
		let s = schedule(RepeatOptions::pattern("0 * * * *"));
		let prev = millis("2024-11-17T12:00:00Z");
		assert_eq!(
			s.calculate_next_execution_time(prev).unwrap(),
			millis("2024-11-17T13:00:00Z")
		);
	}

	#[test]
	fn invalid_rules_are_rejected() {
		assert!(matches!(
			RepeatOptions::pattern("not a cron").validate(),
			Err(ScheduleError::InvalidCronExpression { .. })
		));
		assert!(matches!(
			RepeatOptions::pattern_in("0 * * * *", "Mars/Olympus").validate(),
			Err(ScheduleError::InvalidTimezone(_))
		));
		assert_eq!(
			RepeatOptions::Every { every: 0 }.validate(),
			Err(ScheduleError::ZeroInterval)
		);
		assert!(RepeatOptions::every(Duration::from_secs(1)).validate().is_ok());
	}

	#[test]
	fn every_rule_advances_from_now_when_unset() {
		let now = millis("2024-11-17T12:00:00Z");
		let mut s = schedule(RepeatOptions::Every { every: 10_000 });

		let next = s.advance_next_millis(now).unwrap();

		assert_eq!(next, now + 10_000);
		assert_eq!(s.next_millis, Some(now + 10_000));
		assert_eq!(s.prev_millis, Some(now));
	}

	#[test]
	fn future_next_is_not_skipped() {
		let now = millis("2024-11-17T12:00:00Z");
		let mut s = schedule(RepeatOptions::Every { every: 10_000 });
		s.next_millis = Some(now + 5_000);
		s.prev_millis = Some(now - 5_000);

		assert_eq!(s.advance_next_millis(now).unwrap(), now + 5_000);
		assert_eq!(s.prev_millis, Some(now - 5_000));
	}

	#[test]
	fn every_rule_catches_up_missed_firings() {
		let now = millis("2024-11-17T12:00:00Z");
		let mut s = schedule(RepeatOptions::Every { every: 1_000 });
		s.next_millis = Some(now - 10_500);

		let next = s.advance_next_millis(now).unwrap();

		assert_eq!(next, now + 500);
		assert_eq!(s.prev_millis, Some(now - 500));
	}

	#[test]
	fn cron_rule_catches_up_with_a_bounded_walk() {
		let now = millis("2024-11-17T12:00:30Z");
		let mut s = schedule(RepeatOptions::pattern("* * * * * *"));
		// A day behind on a per-second rule is more than the step cap.
		s.next_millis = Some(now - 86_400_000);

		let next = s.advance_next_millis(now).unwrap();

		assert_eq!(next, millis("2024-11-17T12:00:31Z"));
		assert_eq!(s.prev_millis, Some(millis("2024-11-17T12:00:30Z")));
	}

	#[test]
	fn capped_cron_walk_records_last_firing_before_now() {
		let now = millis("2024-11-17T12:47:10Z");
		let mut s = schedule(RepeatOptions::pattern("0 * * * * *"));
		// Twenty days of per-minute firings is past the step cap.
		s.next_millis = Some(now - 20 * 86_400_000);

		let next = s.advance_next_millis(now).unwrap();

		assert_eq!(next, millis("2024-11-17T12:48:00Z"));
		assert_eq!(s.prev_millis, Some(millis("2024-11-17T12:47:00Z")));
	}

	#[test]
	fn oversized_interval_is_an_error_not_an_overflow() {
		let now = millis("2024-11-17T12:12:00Z");
		let mut s = schedule(RepeatOptions::every(Duration::MAX));
		assert!(s.repeat_options.validate().is_ok());

		assert_eq!(
			s.advance_next_millis(now),
			Err(ScheduleError::TimestampOutOfRange(now))
		);
		assert!(s.next_millis.is_none());
		assert!(s.prev_millis.is_none());
		assert!(matches!(
			s.calculate_next_execution_time(now),
			Err(ScheduleError::TimestampOutOfRange(_))
		));

		// A lagging schedule with a huge interval fails the same way.
		let mut lagging = schedule(RepeatOptions::Every { every: u64::MAX });
		lagging.next_millis = Some(i64::MIN);
		assert!(lagging.advance_next_millis(now).is_err());
	}

	#[test]
	fn instance_options_default_dedup_to_key() {
		let mut s = schedule(RepeatOptions::Every { every: 1_000 });
		s.next_millis = Some(42);
		let options = s.instance_options();
		assert_eq!(options.deduplication_id(), Some("test"));
		assert_eq!(options.defer_until, Some(42));

		s.job_template.options = JobOptions::new()
			.with_deduplication_id("custom")
			.with_delay(5);
		let options = s.instance_options();
		assert_eq!(options.deduplication_id(), Some("custom"));
		assert_eq!(options.delay, None);
	}

	#[test]
	fn repeat_options_json_shape() {
		let every: RepeatOptions = serde_json::from_value(json!({"every": 5000})).unwrap();
		assert_eq!(every, RepeatOptions::Every { every: 5000 });

		let pattern: RepeatOptions =
			serde_json::from_value(json!({"pattern": "0 * * * *"})).unwrap();
		assert_eq!(pattern, RepeatOptions::pattern("0 * * * *"));

		assert_eq!(
			serde_json::to_value(RepeatOptions::pattern_in("0 * * * *", "UTC")).unwrap(),
			json!({"pattern": "0 * * * *", "tz": "UTC"})
		);
	}

	proptest! {
		#[test]
		fn advance_always_lands_after_now(
			every in 1u64..100_000_000,
			start in 0i64..4_000_000_000_000,
			offset in -1_000_000_000i64..1_000_000_000,
			now in 0i64..4_000_000_000_000,
		) {
			let mut s = schedule(RepeatOptions::Every { every });
			s.next_millis = Some(start + offset);
			let next = s.advance_next_millis(now).unwrap();
			prop_assert!(next > now);
			prop_assert_eq!(s.next_millis, Some(next));
			if let Some(prev) = s.prev_millis {
				prop_assert!(prev <= now);
				prop_assert_eq!(prev + every as i64, next);
			}
		}

		#[test]
		fn cron_advance_always_lands_after_now(
			minute in 0u32..60,
			now in 1_600_000_000_000i64..1_900_000_000_000,
			behind in 0i64..1_000_000_000,
		) {
			let mut s = schedule(RepeatOptions::pattern(format!("{minute} * * * *")));
			s.next_millis = Some(now - behind);
			let next = s.advance_next_millis(now).unwrap();
			prop_assert!(next > now);
			prop_assert!(next - now <= 3_600_000);
		}
	}
}
