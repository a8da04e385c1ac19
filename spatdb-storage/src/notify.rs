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

//! Cross-process wakeups over PostgreSQL LISTEN/NOTIFY.
//!
//! Two channels carry all coordination: `new_items_in_queue` when the
//! scheduler enqueues, `one_job_complete` when a worker lands a value.
//! A [`NotificationListener`] holds its own dedicated connection; the
//! driver task forwards async notifications into an in-process channel so
//! callers can await them with a timeout.

use std::time::Duration;

use futures_util::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, NoTls};
use tracing::{debug, error};

use spatdb_core::config::DatabaseSettings;

use crate::error::{Result, StorageError};

pub const NEW_ITEMS_CHANNEL: &str = "new_items_in_queue";
pub const JOB_COMPLETE_CHANNEL: &str = "one_job_complete";

/// A dedicated LISTEN connection delivering channel names as they fire.
pub struct NotificationListener {
    // The client must outlive the subscription; dropping it closes the
    // connection and silently ends the stream.
    client: Client,
    receiver: mpsc::UnboundedReceiver<String>,
    driver: JoinHandle<()>,
}

impl NotificationListener {
    /// Connects and subscribes to the given channels.
    pub async fn connect(settings: &DatabaseSettings, channels: &[&str]) -> Result<Self> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database);
        let (client, mut connection) = config.connect(NoTls).await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let driver = tokio::spawn(async move {
            let mut stream =
                futures_util::stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = stream.next().await {
                match message {
                    Ok(AsyncMessage::Notification(notification)) => {
                        debug!(channel = notification.channel(), "notification received");
                        if sender.send(notification.channel().to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(%err, "listener connection failed");
                        break;
                    }
                }
            }
        });

        for channel in channels {
            // Channel names are compiled-in constants, never user input.
            client.batch_execute(&format!("LISTEN {channel}")).await?;
        }
        Ok(Self {
            client,
            receiver,
            driver,
        })
    }

    /// Publishes on a channel through the listener's own connection; used
    /// for the wait gateway's heartbeat.
    pub async fn notify(&self, channel: &str) -> Result<()> {
        self.client.batch_execute(&format!("NOTIFY {channel}")).await?;
        Ok(())
    }

    /// Waits up to `timeout` for the next notification. `Ok(None)` means
    /// the timeout elapsed; an error means the connection is gone.
    pub async fn wait(&mut self, timeout: Duration) -> Result<Option<String>> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(channel)) => Ok(Some(channel)),
            Ok(None) => Err(StorageError::ListenerClosed),
        }
    }

    /// Drains anything already queued without waiting.
    pub fn drain(&mut self) {
        while self.receiver.try_recv().is_ok() {}
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
