// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the stash job server.
//!
//! Layers are loaded from built-in defaults, a TOML file and `STASH_SERVER_*`
//! environment variables, then merged and resolved into a [`ServerConfig`].
//!
//! ```ignore
//! use stash_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("running {} jobs at once", config.jobs.queue_concurrency);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use std::path::PathBuf;

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub jobs: JobsConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`STASH_SERVER_*`)
/// 2. Config file (`STASH_SERVER_CONFIG`, else `/etc/stash/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	let toml = match std::env::var("STASH_SERVER_CONFIG") {
		Ok(path) if !path.is_empty() => TomlSource::new(path),
		_ => TomlSource::system(),
	};
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(toml),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(config_path: impl Into<PathBuf>) -> Result<ServerConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let jobs = layer.jobs.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	validate_config(&database, &jobs)?;

	info!(
		database = %database.url,
		max_connections = database.max_connections,
		queue_concurrency = jobs.queue_concurrency,
		job_purge_interval_ms = jobs.job_purge_interval_ms,
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		database,
		jobs,
		logging,
	})
}

/// Validate cross-field configuration rules.
fn validate_config(database: &DatabaseConfig, jobs: &JobsConfig) -> Result<(), ConfigError> {
	if database.max_connections == 0 {
		return Err(ConfigError::Validation(
			"database.max_connections must be at least 1".to_string(),
		));
	}
	if jobs.queue_concurrency == 0 {
		return Err(ConfigError::Validation(
			"jobs.queue_concurrency must be at least 1".to_string(),
		));
	}

	let intervals = [
		("jobs.queue_poll_interval_ms", jobs.queue_poll_interval_ms),
		(
			"jobs.scheduler_poll_interval_ms",
			jobs.scheduler_poll_interval_ms,
		),
		("jobs.job_purge_interval_ms", jobs.job_purge_interval_ms),
	];
	for (key, value) in intervals {
		if value == 0 {
			return Err(ConfigError::Validation(format!(
				"{key} must be greater than zero"
			)));
		}
	}

	Ok(())
}
