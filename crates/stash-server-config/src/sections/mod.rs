// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for stash-server.

pub mod database;
pub mod jobs;
pub mod logging;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use jobs::{JobsConfig, JobsConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
