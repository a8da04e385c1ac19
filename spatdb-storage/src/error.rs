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

//! Error types for the storage layer.

use std::io;

use thiserror::Error;
use tokio_postgres::error::SqlState;

use spatdb_core::SpatDbError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Core(#[from] SpatDbError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("missing blob: ({specimen}, {blob_type})")]
    MissingBlob {
        specimen: String,
        blob_type: String,
    },

    #[error("expected exactly one {blob_type} blob for study {study}, found {found}")]
    AmbiguousBlob {
        study: String,
        blob_type: String,
        found: u64,
    },

    #[error("unknown study: {0}")]
    UnknownStudy(String),

    #[error("listener channel closed")]
    ListenerClosed,
}

impl StorageError {
    /// True for a unique-constraint violation, which the value-insert path
    /// treats as "someone else already computed this".
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StorageError::Postgres(err) => {
                err.code() == Some(&SqlState::UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Core(SpatDbError::Serialization(err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
