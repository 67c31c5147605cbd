// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stash job server binary.

use anyhow::Context;
use stash_server_config::ServerConfig;
use stash_server_jobs::{Jobs, JobsOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn jobs_options(config: &ServerConfig) -> JobsOptions {
	JobsOptions {
		concurrency: config.jobs.queue_concurrency,
		queue_poll_interval: config.jobs.queue_poll_interval(),
		scheduler_poll_interval: config.jobs.scheduler_poll_interval(),
		job_purge_interval: config.jobs.job_purge_interval(),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = stash_server_config::load_config().context("failed to load configuration")?;

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let pool = stash_server_db::create_pool(&config.database.url, config.database.max_connections)
		.await
		.with_context(|| format!("failed to open database {}", config.database.url))?;
	stash_server_db::run_migrations(&pool)
		.await
		.context("failed to run migrations")?;

	let jobs = Jobs::sqlite(pool.clone(), jobs_options(&config));
	let purge = jobs
		.schedule_job_purge()
		.await
		.context("failed to schedule job purge")?;
	tracing::info!(
		key = %purge.key,
		next_millis = ?purge.next_millis,
		"job purge scheduled"
	);

	jobs.start().await;
	tracing::info!(
		database = %config.database.url,
		concurrency = config.jobs.queue_concurrency,
		"job system started"
	);

	tokio::signal::ctrl_c()
		.await
		.context("failed to listen for shutdown signal")?;
	tracing::info!("Received shutdown signal");

	if !jobs.shutdown(config.jobs.shutdown_timeout()).await {
		tracing::warn!("shutting down with jobs still running");
	}
	pool.close().await;

	tracing::info!("Server shutdown complete");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[test]
	fn test_jobs_options_follow_config() {
		let mut config = ServerConfig::default();
		config.jobs.queue_concurrency = 7;
		config.jobs.job_purge_interval_ms = 90_000;

		let options = jobs_options(&config);
		assert_eq!(options.concurrency, 7);
		assert_eq!(options.queue_poll_interval, Duration::from_secs(1));
		assert_eq!(options.job_purge_interval, Duration::from_secs(90));
	}
}
