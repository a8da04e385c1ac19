// SPDX-License-Identifier: AGPL-3.0-or-later
// SpatDB - On-Demand Spatial Omics Feature Platform
// Copyright (C) 2026 SpatDB Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Environment-driven runtime configuration.
//!
//! All knobs are read once at startup from the process environment. Missing
//! optional variables fall back to compiled defaults; the database
//! credentials are required and their absence is a hard error.
//!
//! | Variable                              | Default | Meaning                                   |
//! |---------------------------------------|---------|-------------------------------------------|
//! | `SINGLE_CELL_DATABASE_HOST`           | (none)  | PostgreSQL host, optionally `host:port`   |
//! | `SINGLE_CELL_DATABASE_USER`           | (none)  | PostgreSQL role                           |
//! | `SINGLE_CELL_DATABASE_PASSWORD`       | (none)  | PostgreSQL password                       |
//! | `SINGLE_CELL_DATABASE_NAME`           | scstudies | Database name                           |
//! | `DATABASE_DOWNLOAD_CACHE_SAMPLE_LIMIT`| 1000    | Max samples held by the cell cache        |
//! | `DATABASE_DOWNLOAD_CACHE_LIMIT_MB`    | 500     | Max payload bytes held by the cell cache  |
//! | `JOB_COMPUTATION_TIMEOUT_SECONDS`     | 150     | Watchdog for a single metric job          |
//! | `FEATURE_COMPUTATION_TIMEOUT_SECONDS` | 600     | Client-side wait bound for a feature      |
//! | `CELL_NUMBER_LIMIT_PROXIMITY`         | 750000  | Cell ceiling for proximity jobs           |
//! | `CELL_NUMBER_LIMIT_NEIGHBORHOOD`      | 500000  | Cell ceiling for neighborhood jobs        |
//! | `DISABLE_FAST_CACHE_RECREATION`       | (unset) | Skip expensive cache recreation on assess |

use std::env;
use std::time::Duration;

use crate::error::{Result, SpatDbError};

const DEFAULT_DATABASE_NAME: &str = "scstudies";
const DEFAULT_CACHE_SAMPLE_LIMIT: usize = 1000;
const DEFAULT_CACHE_LIMIT_MB: usize = 500;
const DEFAULT_JOB_TIMEOUT_SECONDS: u64 = 150;
const DEFAULT_FEATURE_TIMEOUT_SECONDS: u64 = 600;
const DEFAULT_PROXIMITY_CELL_LIMIT: u64 = 750_000;
const DEFAULT_NEIGHBORHOOD_CELL_LIMIT: u64 = 500_000;

/// Connection parameters for the feature store.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Limits for the in-memory cell payload cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub sample_limit: usize,
    pub size_limit_bytes: usize,
}

/// Timeouts and per-family ceilings for metric computation.
#[derive(Debug, Clone, Copy)]
pub struct ComputationSettings {
    pub job_timeout: Duration,
    pub feature_timeout: Duration,
    pub proximity_cell_limit: u64,
    pub neighborhood_cell_limit: u64,
}

/// Full runtime configuration, assembled from the environment.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub computation: ComputationSettings,
    pub disable_fast_cache_recreation: bool,
}

impl EnvironmentConfig {
    pub fn from_env() -> Result<Self> {
        let raw_host = required("SINGLE_CELL_DATABASE_HOST")?;
        let (host, port) = split_host_port(&raw_host)?;
        let database = DatabaseSettings {
            host,
            port,
            user: required("SINGLE_CELL_DATABASE_USER")?,
            password: required("SINGLE_CELL_DATABASE_PASSWORD")?,
            database: optional("SINGLE_CELL_DATABASE_NAME")
                .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
        };
        let cache = CacheSettings {
            sample_limit: parsed(
                "DATABASE_DOWNLOAD_CACHE_SAMPLE_LIMIT",
                DEFAULT_CACHE_SAMPLE_LIMIT,
            )?,
            size_limit_bytes: parsed("DATABASE_DOWNLOAD_CACHE_LIMIT_MB", DEFAULT_CACHE_LIMIT_MB)?
                * 1_000_000,
        };
        let computation = ComputationSettings {
            job_timeout: Duration::from_secs(parsed(
                "JOB_COMPUTATION_TIMEOUT_SECONDS",
                DEFAULT_JOB_TIMEOUT_SECONDS,
            )?),
            feature_timeout: Duration::from_secs(parsed(
                "FEATURE_COMPUTATION_TIMEOUT_SECONDS",
                DEFAULT_FEATURE_TIMEOUT_SECONDS,
            )?),
            proximity_cell_limit: parsed(
                "CELL_NUMBER_LIMIT_PROXIMITY",
                DEFAULT_PROXIMITY_CELL_LIMIT,
            )?,
            neighborhood_cell_limit: parsed(
                "CELL_NUMBER_LIMIT_NEIGHBORHOOD",
                DEFAULT_NEIGHBORHOOD_CELL_LIMIT,
            )?,
        };
        Ok(Self {
            database,
            cache,
            computation,
            disable_fast_cache_recreation: env::var("DISABLE_FAST_CACHE_RECREATION").is_ok(),
        })
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| SpatDbError::MissingEnvironment(name.to_string()))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|_| SpatDbError::InvalidEnvironment {
                name: name.to_string(),
                value,
            }),
    }
}

fn split_host_port(raw: &str) -> Result<(String, u16)> {
    match raw.rsplit_once(':') {
        None => Ok((raw.to_string(), 5432)),
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| SpatDbError::InvalidEnvironment {
                    name: "SINGLE_CELL_DATABASE_HOST".to_string(),
                    value: raw.to_string(),
                })?;
            Ok((host.to_string(), port))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_without_port_defaults_to_5432() {
        let (host, port) = split_host_port("db.internal").unwrap();
        assert_eq!(host, "db.internal");
        assert_eq!(port, 5432);
    }

    #[test]
    fn host_with_port_is_split() {
        let (host, port) = split_host_port("localhost:5433").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 5433);
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(split_host_port("db:notaport").is_err());
    }
}
