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

//! SpatDB Storage
//!
//! PostgreSQL access layer for the feature platform. Relevant tables:
//!
//! | Table                               | Role                                  |
//! |-------------------------------------|---------------------------------------|
//! | `study_lookup`                      | Known studies                         |
//! | `specimen_data_measurement_process` | Sample-to-study membership            |
//! | `histological_structure_identification` | Cell-to-sample membership        |
//! | `ondemand_studies_index`            | Binary blob index                     |
//! | `feature_specification`             | Registered features                   |
//! | `feature_specifier`                 | Ordered specifier lists               |
//! | `feature_specification_hash`        | Uniqueness of the registered triple   |
//! | `quantitative_feature_value`        | One value per (feature, subject)      |
//! | `quantitative_feature_value_queue`  | Outstanding per-sample jobs           |
//! | `cell_set_cache`                    | Cell-set restrictions for counts      |

pub mod blobs;
pub mod compression;
pub mod connection;
pub mod error;
pub mod features;
pub mod importance;
pub mod notify;
pub mod queue;
pub mod values;

pub use blobs::{BlobIndex, CellDataEncoding};
pub use connection::DatabaseClient;
pub use error::{Result, StorageError};
pub use features::{FeatureRegistry, SweepThresholds};
pub use importance::{ImportanceTranscriber, ImportanceUpload};
pub use notify::{NotificationListener, JOB_COMPLETE_CHANNEL, NEW_ITEMS_CHANNEL};
pub use queue::{JobQueue, PoppedJob, QueuePolicy};
pub use values::FeatureValues;
