// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for the stash job queue.
//!
//! Provides the [`JobStore`] contract used by the queue and scheduler, its
//! SQLite implementation, connection pooling and embedded migrations.

pub mod error;
pub mod job;
pub mod migrations;
pub mod pool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{DbError, Result};
pub use job::{JobStore, SqliteJobStore};
pub use migrations::run_migrations;
pub use pool::create_pool;
