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

//! Database connections.
//!
//! Each [`DatabaseClient`] owns one TCP connection and the spawned driver
//! task that pumps it. The platform deliberately runs many short-lived
//! single connections rather than a pool: workers hold one for their whole
//! life, API calls open one per request, and the wait gateway opens a
//! dedicated one for LISTEN traffic.

use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::error;

use spatdb_core::config::DatabaseSettings;

use crate::error::Result;

/// A live connection to the feature store.
pub struct DatabaseClient {
    client: Client,
    driver: JoinHandle<()>,
}

impl DatabaseClient {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database);
        let (client, connection) = config.connect(NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(%err, "database connection terminated");
            }
        });
        Ok(Self { client, driver })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Publishes a NOTIFY on the given channel.
    pub async fn notify(&self, channel: &str) -> Result<()> {
        // Channel names are compiled-in constants, never user input.
        self.client
            .batch_execute(&format!("NOTIFY {channel}"))
            .await?;
        Ok(())
    }
}

impl Drop for DatabaseClient {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
