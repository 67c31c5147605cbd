// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for repeat rules and schedule arithmetic.

use thiserror::Error;

/// Result type for scheduling operations.
pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Errors raised while validating or evaluating a repeat rule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
	#[error("invalid cron expression '{expression}': {message}")]
	InvalidCronExpression { expression: String, message: String },

	#[error("invalid timezone: {0}")]
	InvalidTimezone(String),

	#[error("repeat interval must be greater than zero")]
	ZeroInterval,

	#[error("cron expression '{0}' has no upcoming occurrence")]
	NoUpcomingOccurrence(String),

	#[error("timestamp out of range: {0}")]
	TimestampOutOfRange(i64),
}
