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

//! The computation worker.
//!
//! A worker is a single-threaded loop over the job queue:
//!
//! ```text
//!   pop (prefer cached samples) -> load payload -> decode -> compute
//!        ^                                                      |
//!        |            insert value, mark complete               v
//!        +------------------------------------------------------+
//! ```
//!
//! An empty pop parks the worker on `LISTEN new_items_in_queue`, with a
//! short poll as a safety net against missed notifications.
//!
//! Per-job outcomes:
//! - a computed value (including a legitimate None) is inserted and the
//!   queue entry completed;
//! - an oversized proximity sample or a compute timeout inserts a null
//!   so the sample is never retried for a result it cannot produce;
//! - a hard error (missing blob, malformed payload) inserts nothing and
//!   leaves the queue entry in flight, so the retry policy applies.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use spatdb_compute::compute_metric;
use spatdb_core::cell_codec::{decode_cells, decode_header};
use spatdb_core::config::EnvironmentConfig;
use spatdb_core::phenotype::ChannelOrder;
use spatdb_core::study::{FeatureMethod, VIRTUAL_SAMPLE};
use spatdb_core::CellDataArrays;
use spatdb_storage::error::{Result, StorageError};
use spatdb_storage::{
    BlobIndex, CellDataEncoding, DatabaseClient, FeatureRegistry, FeatureValues, JobQueue,
    NotificationListener, PoppedJob, QueuePolicy, NEW_ITEMS_CHANNEL,
};

use crate::cache::{CachedCells, CellDataCache};

const POLL_INTERVAL: Duration = Duration::from_secs(3);
const COMPLETION_LOG_INTERVAL: Duration = Duration::from_secs(60);

pub struct ComputationWorker {
    config: EnvironmentConfig,
    cache: CellDataCache,
}

impl ComputationWorker {
    pub fn new(config: EnvironmentConfig) -> Self {
        let cache = CellDataCache::new(config.cache.clone());
        Self { config, cache }
    }

    /// Runs the pop/compute loop until the connection fails.
    pub async fn run(&self) -> Result<()> {
        let db = DatabaseClient::connect(&self.config.database).await?;
        let mut listener =
            NotificationListener::connect(&self.config.database, &[NEW_ITEMS_CHANNEL]).await?;
        let queue = JobQueue::new(db.client(), QueuePolicy::default());
        let mut log = CompletionLog::new();
        info!("computation worker started");

        loop {
            let preference = self.cache.resident_keys();
            match queue.pop(&preference).await? {
                Some(job) => {
                    match self.process(db.client(), &job).await {
                        Ok(()) => log.record(&job),
                        Err(err) => {
                            // The queue entry stays in flight and is
                            // retried once its timeout lapses.
                            error!(
                                specification = job.specification,
                                sample = %job.sample,
                                retries = job.retries,
                                %err,
                                "job failed"
                            );
                        }
                    }
                    log.flush_if_due();
                }
                None => {
                    log.flush_if_due();
                    if listener.wait(POLL_INTERVAL).await?.is_some() {
                        listener.drain();
                    }
                }
            }
        }
    }

    async fn process(&self, client: &tokio_postgres::Client, job: &PoppedJob) -> Result<()> {
        let registry = FeatureRegistry::new(client);
        let values = FeatureValues::new(client);
        let queue = JobQueue::new(client, QueuePolicy::default());

        let method = registry.method_of(job.specification).await?;
        let specifiers = registry.specifiers_of(job.specification).await?;
        let analysis_study = registry.study_of(job.specification).await?;
        let primary_study = registry.primary_study_of(&analysis_study).await?;

        let cells = self
            .load_cells(client, &analysis_study, &primary_study, &job.sample)
            .await?;
        let header = decode_header(&cells.payload)?;

        if let Some(limit) = self.cell_limit(method) {
            if u64::from(header.cell_count) > limit {
                warn!(
                    specification = job.specification,
                    sample = %job.sample,
                    cell_count = header.cell_count,
                    limit,
                    "sample exceeds the cell ceiling for this family, recording a null"
                );
                values.insert(job.specification, &job.sample, None).await?;
                queue.complete(job.specification, &job.sample).await?;
                return Ok(());
            }
        }

        let (_, mut arrays) = decode_cells(&cells.payload)?;
        if method == FeatureMethod::PopulationFraction {
            if let Some(restriction) = registry.cell_restriction(job.specification).await? {
                arrays = restrict_arrays(arrays, &restriction);
            }
        }
        let channel_order = ChannelOrder::new(cells.channel_names.as_ref().clone())?;

        let value = self
            .compute_with_timeout(method, specifiers, arrays, channel_order, job)
            .await?;
        values.insert(job.specification, &job.sample, value).await?;
        queue.complete(job.specification, &job.sample).await?;
        debug!(
            specification = job.specification,
            sample = %job.sample,
            ?value,
            "job finished"
        );
        Ok(())
    }

    /// Per-family ceiling on sample size, applied before decoding.
    fn cell_limit(&self, method: FeatureMethod) -> Option<u64> {
        match method {
            FeatureMethod::Proximity => Some(self.config.computation.proximity_cell_limit),
            FeatureMethod::NeighborhoodEnrichment
            | FeatureMethod::CoOccurrence
            | FeatureMethod::RipleyStatistic => {
                Some(self.config.computation.neighborhood_cell_limit)
            }
            FeatureMethod::PopulationFraction | FeatureMethod::GnnImportanceScore => None,
        }
    }

    /// Read-through payload load keyed by the analysis study, so the pop
    /// preference matches what is resident.
    async fn load_cells(
        &self,
        client: &tokio_postgres::Client,
        analysis_study: &str,
        primary_study: &str,
        sample: &str,
    ) -> Result<CachedCells> {
        if let Some(cached) = self.cache.retrieve(analysis_study, sample) {
            return Ok(cached);
        }
        let blobs = BlobIndex::new(client);
        let payload = if sample == VIRTUAL_SAMPLE {
            blobs.assemble_virtual_payload(primary_study).await?
        } else {
            blobs.cells_payload(sample, CellDataEncoding::Raw).await?
        };
        let index = blobs.expressions_index(primary_study).await?;
        Ok(self
            .cache
            .consider_insertion(analysis_study, sample, payload, index.channels))
    }

    async fn compute_with_timeout(
        &self,
        method: FeatureMethod,
        specifiers: Vec<String>,
        arrays: CellDataArrays,
        channel_order: ChannelOrder,
        job: &PoppedJob,
    ) -> Result<Option<f64>> {
        let handle = tokio::task::spawn_blocking(move || {
            compute_metric(method, &specifiers, &arrays, &channel_order)
        });
        match tokio::time::timeout(self.config.computation.job_timeout, handle).await {
            Ok(Ok(outcome)) => Ok(outcome?),
            Ok(Err(join_error)) => Err(StorageError::Core(
                spatdb_core::SpatDbError::Internal(format!("compute task panicked: {join_error}")),
            )),
            Err(_) => {
                warn!(
                    specification = job.specification,
                    sample = %job.sample,
                    timeout_seconds = self.config.computation.job_timeout.as_secs(),
                    "computation timed out, recording a null"
                );
                Ok(None)
            }
        }
    }
}

/// Keeps completed-job announcements to at most one line per minute.
struct CompletionLog {
    completed: u64,
    recent: Vec<(i32, String)>,
    last_flush: Instant,
}

impl CompletionLog {
    fn new() -> Self {
        Self {
            completed: 0,
            recent: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    fn record(&mut self, job: &PoppedJob) {
        self.completed += 1;
        if self.recent.len() == 3 {
            self.recent.remove(0);
        }
        self.recent.push((job.specification, job.sample.clone()));
    }

    fn flush_if_due(&mut self) {
        if self.completed == 0 || self.last_flush.elapsed() < COMPLETION_LOG_INTERVAL {
            return;
        }
        let recent = self
            .recent
            .iter()
            .map(|(spec, sample)| format!("{spec}/{sample}"))
            .collect::<Vec<_>>()
            .join(", ");
        info!(completed = self.completed, recent, "jobs completed");
        self.completed = 0;
        self.recent.clear();
        self.last_flush = Instant::now();
    }
}

fn restrict_arrays(arrays: CellDataArrays, cells: &[u32]) -> CellDataArrays {
    let allowed: HashSet<u32> = cells.iter().copied().collect();
    let mut restricted = CellDataArrays {
        identifiers: Vec::new(),
        x: Vec::new(),
        y: Vec::new(),
        phenotype_words: Vec::new(),
    };
    for (index, identifier) in arrays.identifiers.iter().enumerate() {
        if allowed.contains(identifier) {
            restricted.identifiers.push(*identifier);
            restricted.x.push(arrays.x[index]);
            restricted.y.push(arrays.y[index]);
            restricted.phenotype_words.push(arrays.phenotype_words[index]);
        }
    }
    restricted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_arrays() -> CellDataArrays {
        CellDataArrays {
            identifiers: vec![10, 11, 12, 13],
            x: vec![1, 2, 3, 4],
            y: vec![5, 6, 7, 8],
            phenotype_words: vec![0b01, 0b10, 0b11, 0b00],
        }
    }

    #[test]
    fn restriction_keeps_only_listed_cells() {
        let restricted = restrict_arrays(sample_arrays(), &[11, 13, 99]);
        assert_eq!(restricted.identifiers, vec![11, 13]);
        assert_eq!(restricted.x, vec![2, 4]);
        assert_eq!(restricted.y, vec![6, 8]);
        assert_eq!(restricted.phenotype_words, vec![0b10, 0b00]);
    }

    #[test]
    fn restriction_with_empty_list_drops_everything() {
        let restricted = restrict_arrays(sample_arrays(), &[]);
        assert!(restricted.identifiers.is_empty());
    }

    #[test]
    fn completion_log_keeps_three_most_recent() {
        let mut log = CompletionLog::new();
        for n in 0..5 {
            log.record(&PoppedJob {
                specification: n,
                sample: format!("sample {n}"),
                retries: 0,
            });
        }
        assert_eq!(log.completed, 5);
        let specs: Vec<i32> = log.recent.iter().map(|(s, _)| *s).collect();
        assert_eq!(specs, vec![2, 3, 4]);
    }
}
