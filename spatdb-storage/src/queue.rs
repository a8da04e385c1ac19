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

//! Durable job queue over `quantitative_feature_value_queue`.
//!
//! One row per `(specification, sample)` job. A job is *active* when it
//! has never been started, or when its last start is older than the retry
//! interval, and its retry budget is not exhausted. The pop is a single
//! `DELETE ... RETURNING` statement, which is the only serialization point
//! between racing workers; the popped job is immediately re-inserted
//! marked in-flight so a crashed worker's job resurfaces after the
//! interval.
//!
//! Claim protocol:
//!
//! ```text
//!   worker A                   worker B
//!   --------                   --------
//!   DELETE..RETURNING row
//!                              DELETE..RETURNING (no row)
//!   INSERT in-flight copy
//!   compute, insert value
//!   DELETE in-flight copy, NOTIFY one_job_complete
//! ```

use std::time::Duration;

use tracing::{debug, info};

use crate::error::Result;
use crate::notify::{JOB_COMPLETE_CHANNEL, NEW_ITEMS_CHANNEL};

/// Retry parameters of the active-job predicate.
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    pub max_retries: i32,
    pub retry_interval: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_secs(180),
        }
    }
}

/// A claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoppedJob {
    pub specification: i32,
    pub sample: String,
    pub retries: i32,
}

const ENQUEUE: &str = "\
    INSERT INTO quantitative_feature_value_queue
    (feature, subject, computation_start, retries)
    SELECT $1, unnest($2::text[]), NULL, 0";

const POP_UNCONSTRAINED: &str = "\
    WITH candidate AS (
        SELECT q.feature, q.subject
        FROM quantitative_feature_value_queue q
        WHERE q.retries < $1
          AND (q.computation_start IS NULL
               OR now() - q.computation_start > make_interval(secs => $2))
        ORDER BY q.computation_start ASC NULLS FIRST
        LIMIT 1
    )
    DELETE FROM quantitative_feature_value_queue q
    USING candidate c
    WHERE q.feature = c.feature AND q.subject = c.subject
    RETURNING q.feature, q.subject, q.computation_start IS NOT NULL, q.retries";

const POP_PREFERRED: &str = "\
    WITH candidate AS (
        SELECT q.feature, q.subject
        FROM quantitative_feature_value_queue q
        JOIN feature_specification fs ON fs.identifier = q.feature
        WHERE q.retries < $1
          AND (q.computation_start IS NULL
               OR now() - q.computation_start > make_interval(secs => $2))
          AND (fs.study, q.subject) IN (SELECT * FROM unnest($3::text[], $4::text[]))
        ORDER BY q.computation_start ASC NULLS FIRST
        LIMIT 1
    )
    DELETE FROM quantitative_feature_value_queue q
    USING candidate c
    WHERE q.feature = c.feature AND q.subject = c.subject
    RETURNING q.feature, q.subject, q.computation_start IS NOT NULL, q.retries";

pub struct JobQueue<'a> {
    client: &'a tokio_postgres::Client,
    policy: QueuePolicy,
}

impl<'a> JobQueue<'a> {
    pub fn new(client: &'a tokio_postgres::Client, policy: QueuePolicy) -> Self {
        Self { client, policy }
    }

    /// Bulk-enqueues one job per sample in a single statement and wakes
    /// the workers.
    pub async fn enqueue(&self, specification: i32, samples: &[String]) -> Result<()> {
        self.client
            .execute(ENQUEUE, &[&specification, &samples])
            .await?;
        info!(specification, jobs = samples.len(), "jobs enqueued");
        self.client
            .batch_execute(&format!("NOTIFY {NEW_ITEMS_CHANNEL}"))
            .await?;
        Ok(())
    }

    /// Claims one active job, preferring `(study, sample)` pairs from the
    /// preference list when given, falling back to any job.
    pub async fn pop(&self, preference: &[(String, String)]) -> Result<Option<PoppedJob>> {
        if !preference.is_empty() {
            let studies: Vec<&str> = preference.iter().map(|p| p.0.as_str()).collect();
            let samples: Vec<&str> = preference.iter().map(|p| p.1.as_str()).collect();
            if let Some(job) = self
                .pop_statement(POP_PREFERRED, Some((&studies, &samples)))
                .await?
            {
                return Ok(Some(job));
            }
        }
        self.pop_statement(POP_UNCONSTRAINED, None).await
    }

    async fn pop_statement(
        &self,
        statement: &str,
        preference: Option<(&Vec<&str>, &Vec<&str>)>,
    ) -> Result<Option<PoppedJob>> {
        let interval_seconds = self.policy.retry_interval.as_secs_f64();
        let row = match preference {
            None => {
                self.client
                    .query_opt(statement, &[&self.policy.max_retries, &interval_seconds])
                    .await?
            }
            Some((studies, samples)) => {
                self.client
                    .query_opt(
                        statement,
                        &[&self.policy.max_retries, &interval_seconds, studies, samples],
                    )
                    .await?
            }
        };
        let Some(row) = row else {
            return Ok(None);
        };
        let specification: i32 = row.get(0);
        let sample: String = row.get(1);
        let was_in_flight: bool = row.get(2);
        let retries: i32 = row.get(3);
        let retries = if was_in_flight { retries + 1 } else { retries };
        self.client
            .execute(
                "INSERT INTO quantitative_feature_value_queue
                 (feature, subject, computation_start, retries)
                 VALUES ($1, $2, now(), $3)",
                &[&specification, &sample, &retries],
            )
            .await?;
        debug!(specification, sample = %sample, retries, "job claimed");
        Ok(Some(PoppedJob {
            specification,
            sample,
            retries,
        }))
    }

    /// Removes the in-flight row after its value landed and publishes the
    /// completion.
    pub async fn complete(&self, specification: i32, sample: &str) -> Result<()> {
        self.client
            .execute(
                "DELETE FROM quantitative_feature_value_queue
                 WHERE feature = $1 AND subject = $2",
                &[&specification, &sample],
            )
            .await?;
        self.client
            .batch_execute(&format!("NOTIFY {JOB_COMPLETE_CHANNEL}"))
            .await?;
        Ok(())
    }

    /// Drops every queue entry of a specification; used by the wait
    /// gateway on timeout so workers stop retrying a stuck feature.
    pub async fn clear_specification(&self, specification: i32) -> Result<u64> {
        let cleared = self
            .client
            .execute(
                "DELETE FROM quantitative_feature_value_queue WHERE feature = $1",
                &[&specification],
            )
            .await?;
        if cleared > 0 {
            info!(specification, cleared, "queue entries cleared");
        }
        Ok(cleared)
    }

    /// `(total, in_flight)` row counts for operational status output.
    pub async fn status(&self) -> Result<(u64, u64)> {
        let row = self
            .client
            .query_one(
                "SELECT count(*), count(computation_start)
                 FROM quantitative_feature_value_queue",
                &[],
            )
            .await?;
        Ok((row.get::<_, i64>(0) as u64, row.get::<_, i64>(1) as u64))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_operational_settings() {
        let policy = QueuePolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_interval, Duration::from_secs(180));
    }

    #[test]
    fn enqueue_inserts_all_samples_in_one_statement() {
        assert!(ENQUEUE.contains("unnest($2::text[])"));
        assert!(ENQUEUE.contains("INSERT INTO quantitative_feature_value_queue"));
        assert_eq!(ENQUEUE.matches("INSERT").count(), 1);
    }

    #[test]
    fn pop_statements_share_the_active_predicate() {
        for statement in [POP_UNCONSTRAINED, POP_PREFERRED] {
            assert!(statement.contains("retries < $1"));
            assert!(statement.contains("NULLS FIRST"));
            assert!(statement.contains("DELETE FROM quantitative_feature_value_queue"));
            assert!(statement.contains("RETURNING"));
        }
        assert!(POP_PREFERRED.contains("unnest"));
    }
}
