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

//! Synchronous wait for a feature to finish.
//!
//! The gateway schedules (or re-reads) a feature, and while it is pending
//! sits on a dedicated LISTEN connection. Each notification triggers a
//! re-query. The wait is bounded by the per-feature timeout; on expiry
//! the feature's remaining queue entries are cleared so workers stop
//! burning retries on it, and whatever values exist are returned. A
//! timeout is an outcome, not an error.
//!
//! While waiting, the gateway re-publishes `new_items_in_queue` as a
//! heartbeat so a worker that went to sleep just before an enqueue still
//! wakes up.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use spatdb_core::config::EnvironmentConfig;
use spatdb_core::metrics::MetricsResult;
use spatdb_storage::error::Result;
use spatdb_storage::{
    NotificationListener, JobQueue, QueuePolicy, JOB_COMPLETE_CHANNEL, NEW_ITEMS_CHANNEL,
};

use crate::scheduler::{FamilyStrategy, OnDemandScheduler};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

pub struct CompletionGateway<'a> {
    config: &'a EnvironmentConfig,
    client: &'a tokio_postgres::Client,
}

impl<'a> CompletionGateway<'a> {
    pub fn new(config: &'a EnvironmentConfig, client: &'a tokio_postgres::Client) -> Self {
        Self { config, client }
    }

    /// Schedules the feature and blocks until it completes or the
    /// per-feature timeout expires.
    pub async fn wait_for_feature(&self, primary_study: &str, strategy: &FamilyStrategy) -> Result<MetricsResult> {
        let scheduler = OnDemandScheduler::new(self.client, QueuePolicy::default());
        let (mut result, specification) =
            scheduler.get_or_schedule(primary_study, strategy).await?;
        if !result.pending {
            return Ok(result);
        }

        let mut listener = NotificationListener::connect(
            &self.config.database,
            &[NEW_ITEMS_CHANNEL, JOB_COMPLETE_CHANNEL],
        )
        .await?;
        let deadline = Instant::now() + self.config.computation.feature_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let slice = remaining.min(HEARTBEAT_INTERVAL);
            match listener.wait(slice).await? {
                Some(_) => listener.drain(),
                None => {
                    // Heartbeat: nudge any worker that slept through the
                    // original enqueue.
                    listener.notify(NEW_ITEMS_CHANNEL).await?;
                }
            }
            let (requeried, _) = scheduler.get_or_schedule(primary_study, strategy).await?;
            result = requeried;
            if !result.pending {
                info!(specification, "feature completed while waiting");
                return Ok(result);
            }
        }

        let queue = JobQueue::new(self.client, QueuePolicy::default());
        let cleared = queue.clear_specification(specification).await?;
        warn!(
            specification,
            cleared, "feature wait timed out; returning partial values"
        );
        Ok(result)
    }
}
