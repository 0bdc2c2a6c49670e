// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Worker Configuration
//!
//! Runtime settings are read from environment variables, after an optional
//! `.env` file has been loaded:
//!
//! | Variable               | Default                       |
//! |------------------------|-------------------------------|
//! | `URL_AMQP`             | required                      |
//! | `TOPOLOGY_PATH`        | `config/rabbitmq.config.json` |
//! | `SCHEMAS_DIR`          | `schemas`                     |
//! | `WORKER_MAX_IN_FLIGHT` | `16` (`0` removes the cap)    |
//! | `CONNECTION_NAME`      | `task-workers`                |
//! | `LOG_FORMAT`           | `compact` (or `json`)         |

use crate::errors::WorkerError;
use serde::Deserialize;
use tracing::error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerConfig {
    pub url_amqp: String,
    #[serde(default = "default_topology_path")]
    pub topology_path: String,
    #[serde(default = "default_schemas_dir")]
    pub schemas_dir: String,
    #[serde(default = "default_max_in_flight")]
    pub worker_max_in_flight: u16,
    #[serde(default = "default_connection_name")]
    pub connection_name: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_topology_path() -> String {
    "config/rabbitmq.config.json".to_owned()
}

fn default_schemas_dir() -> String {
    "schemas".to_owned()
}

fn default_max_in_flight() -> u16 {
    16
}

fn default_connection_name() -> String {
    "task-workers".to_owned()
}

impl WorkerConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, WorkerError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Reads the configuration from explicit key/value pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, WorkerError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars).map_err(|err| {
            error!(error = err.to_string(), "invalid configuration");
            WorkerError::ConfigError(err.to_string())
        })
    }
}
