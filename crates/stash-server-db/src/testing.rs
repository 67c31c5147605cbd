// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;

use stash_jobs_core::SharedClock;

use crate::job::SqliteJobStore;
use crate::migrations::run_migrations;

/// A private in-memory database. A single connection keeps every query on
/// the same database.
pub async fn create_test_pool() -> SqlitePool {
	SqlitePoolOptions::new()
		.max_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect("sqlite::memory:")
		.await
		.unwrap()
}

pub async fn create_job_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	run_migrations(&pool).await.unwrap();
	pool
}

pub async fn create_test_store(clock: SharedClock) -> Arc<SqliteJobStore> {
	let pool = create_job_test_pool().await;
	Arc::new(SqliteJobStore::new(pool, clock))
}
