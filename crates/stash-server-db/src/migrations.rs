// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Embedded schema migrations.

use sqlx::sqlite::SqlitePool;

use crate::error::Result;

const MIGRATIONS: &[(&str, &str)] = &[
	(
		"001_create_jobs",
		include_str!("../migrations/001_create_jobs.sql"),
	),
	(
		"002_create_job_schedules",
		include_str!("../migrations/002_create_job_schedules.sql"),
	),
];

/// Apply every embedded migration. Safe to run on an already migrated
/// database.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	for (name, sql) in MIGRATIONS {
		for stmt in statements(sql) {
			if let Err(e) = sqlx::query(stmt).execute(pool).await {
				let msg = e.to_string();
				if !msg.contains("already exists") && !msg.contains("duplicate column") {
					return Err(e.into());
				}
			}
		}
		tracing::debug!(migration = %name, "migration applied");
	}

	tracing::info!(count = MIGRATIONS.len(), "database migrations complete");
	Ok(())
}

/// Split a migration into statements, dropping comment-only fragments.
fn statements(sql: &str) -> impl Iterator<Item = &str> {
	sql.split(';').filter(|stmt| {
		stmt
			.lines()
			.map(str::trim)
			.any(|line| !line.is_empty() && !line.starts_with("--"))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[tokio::test]
	async fn migrations_are_idempotent() {
		let pool = create_test_pool().await;
		run_migrations(&pool).await.unwrap();
		run_migrations(&pool).await.unwrap();

		let tables: Vec<(String,)> = sqlx::query_as(
			"SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('jobs', 'job_schedules') ORDER BY name",
		)
		.fetch_all(&pool)
		.await
		.unwrap();

		let names: Vec<_> = tables.into_iter().map(|(name,)| name).collect();
		assert_eq!(names, vec!["job_schedules", "jobs"]);
	}

	#[test]
	fn comment_only_fragments_are_skipped() {
		let sql = "-- header\n\nCREATE TABLE a (id TEXT);\n-- trailing\n";
		let stmts: Vec<_> = statements(sql).collect();
		assert_eq!(stmts.len(), 1);
		assert!(stmts[0].contains("CREATE TABLE a"));
	}
}
