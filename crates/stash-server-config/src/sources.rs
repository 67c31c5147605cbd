// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{DatabaseConfigLayer, JobsConfigLayer, LoggingConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file yields an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/stash/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: STASH_SERVER_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(load_database_from_env()?),
			jobs: Some(load_jobs_from_env()?),
			logging: Some(load_logging_from_env()),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {kind} value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	env_parse(name, "u32")
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	env_parse(name, "u64")
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
	env_parse(name, "usize")
}

fn load_database_from_env() -> Result<DatabaseConfigLayer, ConfigError> {
	Ok(DatabaseConfigLayer {
		url: env_var("STASH_SERVER_DATABASE_URL"),
		max_connections: env_u32("STASH_SERVER_DATABASE_MAX_CONNECTIONS")?,
	})
}

fn load_jobs_from_env() -> Result<JobsConfigLayer, ConfigError> {
	Ok(JobsConfigLayer {
		queue_concurrency: env_usize("STASH_SERVER_QUEUE_CONCURRENCY")?,
		queue_poll_interval_ms: env_u64("STASH_SERVER_QUEUE_POLL_INTERVAL_MS")?,
		scheduler_poll_interval_ms: env_u64("STASH_SERVER_SCHEDULER_POLL_INTERVAL_MS")?,
		job_purge_interval_ms: env_u64("STASH_SERVER_JOB_PURGE_INTERVAL_MS")?,
		shutdown_timeout_ms: env_u64("STASH_SERVER_SHUTDOWN_TIMEOUT_MS")?,
	})
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("STASH_SERVER_LOG_LEVEL"),
	}
}
