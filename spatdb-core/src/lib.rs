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

//! SpatDB Core
//!
//! Fundamental types and codecs for the on-demand spatial feature platform.
//!
//! # Core Components
//!
//! - **Cell codec**: the compact binary per-sample cell representation
//! - **Float8**: the custom 8-bit float used for quantized intensities
//! - **Phenotype**: criteria parsing and bit-mask signature compilation
//! - **Study vocabulary**: blob types, metric families, the virtual sample
//! - **Configuration**: environment-driven runtime settings

pub mod cell_codec;
pub mod config;
pub mod error;
pub mod float8;
pub mod metrics;
pub mod phenotype;
pub mod study;

pub use cell_codec::{CellDataArrays, PayloadHeader};
pub use config::EnvironmentConfig;
pub use error::{Result, SpatDbError};
pub use float8::Float8;
pub use metrics::MetricsResult;
pub use phenotype::{ChannelOrder, PhenotypeCriteria, SignaturePair};
pub use study::{BlobType, ExpressionsIndex, FeatureMethod, VIRTUAL_SAMPLE};
