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

//! SpatDB On-Demand
//!
//! The computation side of the platform: requests come in as metric
//! family calls, get registered as feature specifications, and are
//! worked off sample by sample through a database-backed job queue.
//!
//! ```text
//!   OnDemandRequester ---> OnDemandScheduler ---> quantitative_feature_value_queue
//!          |                                                 |
//!          v                                                 v
//!   CompletionGateway <--- NOTIFY channels <--- ComputationWorker (+ CellDataCache)
//! ```
//!
//! The requester, scheduler, and gateway run inside API server processes;
//! workers run as separate processes and share nothing with them except
//! the database. [`CacheAssessor`] and [`SubsampleWriter`] are offline
//! maintenance entry points.

pub mod assessment;
pub mod cache;
pub mod gateway;
pub mod requests;
pub mod scheduler;
pub mod subsample_writer;
pub mod worker;

pub use assessment::{CacheAssessor, StudyAssessment};
pub use cache::{CachedCells, CellDataCache};
pub use gateway::CompletionGateway;
pub use requests::{CountsResult, OnDemandRequester, SampleCounts};
pub use scheduler::{FamilyStrategy, OnDemandScheduler};
pub use subsample_writer::{SubsampleHeader, SubsampleWriter};
pub use worker::ComputationWorker;
