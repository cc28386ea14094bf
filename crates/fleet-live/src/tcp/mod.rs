// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Async TCP connection layer with automatic reconnection.
//!
//! Provides a connection handle for line-delimited live-update feeds with
//! automatic reconnection (exponential backoff), address hot-reload, an
//! optional idle timeout and graceful shutdown.

use std::time::Duration;

use log::{error, info, warn};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Transport failures.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),
}

/// Feed address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Configuration for TCP connections.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address in "host:port" format.
    pub address: String,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay: Duration,
    /// Upper bound for the doubling reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Drop the connection if no line arrives within this window.
    pub read_timeout: Option<Duration>,
    /// Channel buffer size for received data.
    pub buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            read_timeout: Some(Duration::from_secs(60)),
            buffer_size: 64,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to connect.
    Connecting,
    /// Successfully connected.
    Connected,
    /// Disconnected (will attempt reconnect).
    Disconnected,
    /// Connection error occurred.
    Error(String),
}

/// Events emitted by the connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// One non-empty line received.
    DataReceived(Vec<u8>),
}

/// Control side of a connection: address changes and shutdown.
///
/// Cheap to clone; every clone controls the same background task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    address_tx: watch::Sender<String>,
    cancel_token: CancellationToken,
}

impl ConnectionHandle {
    /// Change the server address.
    ///
    /// The connection will disconnect and reconnect to the new address.
    pub fn set_address(&self, address: String) {
        self.address_tx.send_replace(address);
    }

    /// Get the current server address.
    #[must_use]
    pub fn current_address(&self) -> String {
        self.address_tx.borrow().clone()
    }

    /// Shut down the connection.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Handle to a managed TCP connection.
///
/// The connection runs in a background task and automatically reconnects
/// on disconnect. Use `recv()` to receive events, or [`Connection::split`]
/// to hand the event stream to another task.
#[derive(Debug)]
pub struct Connection {
    event_rx: mpsc::Receiver<ConnectionEvent>,
    handle: ConnectionHandle,
}

impl Connection {
    /// Spawn a new connection task with the given configuration.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: ConnectionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.buffer_size.max(1));
        let (address_tx, address_rx) = watch::channel(config.address.clone());
        let cancel_token = CancellationToken::new();

        let task_cancel = cancel_token.clone();
        tokio::spawn(async move {
            connection_loop(event_tx, address_rx, task_cancel, config).await;
        });

        Self {
            event_rx,
            handle: ConnectionHandle {
                address_tx,
                cancel_token,
            },
        }
    }

    /// Receive the next event from the connection.
    ///
    /// Returns `None` if the connection has been shut down.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Separate the control handle from the event stream.
    ///
    /// Dropping the receiver stops the background task on its next send.
    #[must_use]
    pub fn split(self) -> (ConnectionHandle, mpsc::Receiver<ConnectionEvent>) {
        (self.handle, self.event_rx)
    }

    pub fn set_address(&self, address: String) {
        self.handle.set_address(address);
    }

    #[must_use]
    pub fn current_address(&self) -> String {
        self.handle.current_address()
    }

    pub fn shutdown(&self) {
        self.handle.shutdown();
    }
}

/// Reconnect delay after `failures` consecutive failed attempts.
fn backoff(config: &ConnectionConfig, failures: u32) -> Duration {
    let factor = 1u32 << failures.min(16);
    config
        .reconnect_delay
        .saturating_mul(factor)
        .min(config.max_reconnect_delay)
}

async fn connection_loop(
    event_tx: mpsc::Sender<ConnectionEvent>,
    mut address_rx: watch::Receiver<String>,
    cancel_token: CancellationToken,
    config: ConnectionConfig,
) {
    let mut failures: u32 = 0;

    loop {
        if cancel_token.is_cancelled() {
            info!("Connection cancelled");
            return;
        }

        let current_address = address_rx.borrow_and_update().clone();

        if event_tx
            .send(ConnectionEvent::StateChanged(ConnectionState::Connecting))
            .await
            .is_err()
        {
            return; // Receiver dropped
        }

        info!("Connecting to {}...", current_address);

        match connect_and_process(
            &current_address,
            &event_tx,
            &mut address_rx,
            &cancel_token,
            config.read_timeout,
            &mut failures,
        )
        .await
        {
            Ok(ReconnectReason::AddressChanged) => {
                info!("Feed address changed, reconnecting immediately...");
                failures = 0;
                continue;
            }
            Ok(ReconnectReason::ConnectionClosed) => {
                info!("Connection closed normally");
                let _ = event_tx
                    .send(ConnectionEvent::StateChanged(ConnectionState::Disconnected))
                    .await;
            }
            Ok(ReconnectReason::Cancelled) => {
                info!("Connection cancelled");
                return;
            }
            Err(e) => {
                error!("Connection error: {}", e);
                let _ = event_tx
                    .send(ConnectionEvent::StateChanged(ConnectionState::Error(
                        e.to_string(),
                    )))
                    .await;
            }
        }

        let delay = backoff(&config, failures);
        failures = failures.saturating_add(1);
        warn!("Reconnecting in {} ms...", delay.as_millis());

        tokio::select! {
            () = sleep(delay) => {}
            _ = address_rx.changed() => {
                info!("Feed address changed during reconnect delay");
                failures = 0;
            }
            () = cancel_token.cancelled() => {
                info!("Connection cancelled during reconnect delay");
                return;
            }
        }
    }
}

enum ReconnectReason {
    AddressChanged,
    ConnectionClosed,
    Cancelled,
}

async fn connect_and_process(
    address: &str,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    address_rx: &mut watch::Receiver<String>,
    cancel_token: &CancellationToken,
    read_timeout: Option<Duration>,
    failures: &mut u32,
) -> Result<ReconnectReason, FeedError> {
    let stream = tokio::select! {
        result = TcpStream::connect(address) => result.map_err(|source| FeedError::Connect {
            address: address.to_string(),
            source,
        })?,
        () = cancel_token.cancelled() => return Ok(ReconnectReason::Cancelled),
    };
    info!("Connected to {}", address);
    *failures = 0;

    if event_tx
        .send(ConnectionEvent::StateChanged(ConnectionState::Connected))
        .await
        .is_err()
    {
        return Ok(ReconnectReason::Cancelled);
    }

    let reader = BufReader::new(stream);
    let mut lines = reader.lines();

    loop {
        let next_line = async {
            match read_timeout {
                Some(limit) => timeout(limit, lines.next_line())
                    .await
                    .map_err(|_elapsed| FeedError::IdleTimeout(limit))?
                    .map_err(FeedError::from),
                None => lines.next_line().await.map_err(FeedError::from),
            }
        };

        tokio::select! {
            line_result = next_line => {
                match line_result? {
                    Some(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if event_tx
                            .send(ConnectionEvent::DataReceived(line.into_bytes()))
                            .await
                            .is_err()
                        {
                            return Ok(ReconnectReason::Cancelled);
                        }
                    }
                    None => {
                        info!("Connection closed by server");
                        return Ok(ReconnectReason::ConnectionClosed);
                    }
                }
            }

            _ = address_rx.changed() => {
                let new_address = address_rx.borrow_and_update().clone();
                if new_address != address {
                    info!("Feed address changed from {} to {}", address, new_address);
                    return Ok(ReconnectReason::AddressChanged);
                }
            }

            () = cancel_token.cancelled() => {
                return Ok(ReconnectReason::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn next_data(rx: &mut mpsc::Receiver<ConnectionEvent>) -> Vec<u8> {
        loop {
            match timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(ConnectionEvent::DataReceived(data))) => return data,
                Ok(Some(ConnectionEvent::StateChanged(_))) => {}
                other => panic!("expected data, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ConnectionConfig {
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(3),
            ..Default::default()
        };
        assert_eq!(backoff(&config, 0), Duration::from_millis(500));
        assert_eq!(backoff(&config, 1), Duration::from_secs(1));
        assert_eq!(backoff(&config, 2), Duration::from_secs(2));
        assert_eq!(backoff(&config, 3), Duration::from_secs(3));
        assert_eq!(backoff(&config, 40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_receives_lines_and_skips_blank() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"first\n\n  \nsecond\n").await.unwrap();
            sleep(Duration::from_millis(200)).await;
        });

        let connection = Connection::spawn(ConnectionConfig {
            address,
            ..Default::default()
        });
        let (handle, mut rx) = connection.split();

        assert_eq!(next_data(&mut rx).await, b"first");
        assert_eq!(next_data(&mut rx).await, b"second");
        handle.shutdown();
        assert!(handle.is_shut_down());
    }

    #[tokio::test]
    async fn test_idle_timeout_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            sleep(Duration::from_secs(2)).await;
        });

        let mut connection = Connection::spawn(ConnectionConfig {
            address,
            read_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        });

        let mut saw_error = false;
        while let Ok(Some(event)) = timeout(Duration::from_secs(2), connection.recv()).await {
            if let ConnectionEvent::StateChanged(ConnectionState::Error(msg)) = event {
                assert!(msg.contains("no data received"));
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
        connection.shutdown();
    }

    #[tokio::test]
    async fn test_set_address_updates_handle() {
        let connection = Connection::spawn(ConnectionConfig {
            address: "127.0.0.1:1".to_string(),
            ..Default::default()
        });
        connection.set_address("127.0.0.1:2".to_string());
        assert_eq!(connection.current_address(), "127.0.0.1:2");
        connection.shutdown();
    }
}
