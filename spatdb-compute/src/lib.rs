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

//! SpatDB Compute
//!
//! Pure metric computers over decoded cell arrays. Nothing in this crate
//! touches the store; the worker feeds it arrays and specifiers, and gets
//! back optional finite floats.

pub mod counts;
pub mod dispatch;
pub mod grid;
pub mod neighborhood;
pub mod proximity;
pub mod subsample;
pub mod threshold;

pub use dispatch::compute_metric;
pub use grid::GridIndex;
