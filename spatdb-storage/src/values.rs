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

//! Feature values: one row per `(specification, subject)`, value nullable.
//!
//! Null is a first-class result, meaning "computed, but undefined for this
//! subject". The unique constraint on the pair is the serialization point
//! for racing workers: the second insert fails and is logged, never
//! retried.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::Result;

pub struct FeatureValues<'a> {
    client: &'a tokio_postgres::Client,
}

impl<'a> FeatureValues<'a> {
    pub fn new(client: &'a tokio_postgres::Client) -> Self {
        Self { client }
    }

    /// Inserts one value row. Returns false when the row already existed,
    /// which is an expected outcome under worker races.
    pub async fn insert(
        &self,
        specification: i32,
        subject: &str,
        value: Option<f64>,
    ) -> Result<bool> {
        let outcome = self
            .client
            .execute(
                "INSERT INTO quantitative_feature_value (feature, subject, value)
                 VALUES ($1, $2, $3)",
                &[&specification, &subject, &value],
            )
            .await;
        match outcome {
            Ok(_) => {
                debug!(specification, subject, ?value, "feature value inserted");
                Ok(true)
            }
            Err(err) => {
                let err = crate::error::StorageError::from(err);
                if err.is_unique_violation() {
                    warn!(specification, subject, "feature value already present");
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// All values of a specification, keyed by subject.
    pub async fn values_map(&self, specification: i32) -> Result<BTreeMap<String, Option<f64>>> {
        let rows = self
            .client
            .query(
                "SELECT subject, value FROM quantitative_feature_value WHERE feature = $1",
                &[&specification],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<_, String>(0), r.get::<_, Option<f64>>(1)))
            .collect())
    }

    pub async fn count(&self, specification: i32) -> Result<u64> {
        let row = self
            .client
            .query_one(
                "SELECT count(*) FROM quantitative_feature_value WHERE feature = $1",
                &[&specification],
            )
            .await?;
        Ok(row.get::<_, i64>(0) as u64)
    }
}
