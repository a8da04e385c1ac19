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

//! Error types for SpatDB

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpatDbError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Malformed cell payload: {details}. Offset: {offset}")]
    MalformedPayload { details: String, offset: usize },

    #[error("Value {value} exceeds the representable range of the 8-bit float format")]
    FloatOverflow { value: f64 },

    #[error("Negative value {value} cannot be encoded as an 8-bit float")]
    FloatNegative { value: f64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Unknown feature class: {0}")]
    UnknownFeatureClass(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvironment(String),

    #[error("Invalid environment value for {name}: {value}")]
    InvalidEnvironment { name: String, value: String },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SpatDbError {
    fn from(err: serde_json::Error) -> Self {
        SpatDbError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SpatDbError>;
