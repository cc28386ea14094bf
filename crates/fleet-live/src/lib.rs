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

//! Live vehicle positions for transit fleet maps.
//!
//! This library turns an irregular stream of vehicle position snapshots into
//! smooth marker motion on a map, while keeping popups, stop clusters and
//! route overlays consistent with the operator's selection. It is split into
//! layers that can be used independently:
//!
//! - **Protocol layer**: snapshot decoding (plain JSON and socket.io event
//!   frames)
//! - **Connection layer**: async TCP with automatic reconnection and address
//!   hot-reload
//! - **Map layers**: marker lifecycle and animation, popup rendering, stop
//!   clustering and route overlays, all drawing through [`MapSurface`]
//!
//! # Quick Start
//!
//! Use [`LiveFeed`] to receive snapshots and a [`MapController`] to render
//! them:
//!
//! ```no_run
//! use fleet_live::{FeedConfig, LiveFeed};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut feed = LiveFeed::spawn(FeedConfig::default());
//!     while let Some(snapshot) = feed.changed().await {
//!         println!("{} vehicles", snapshot.len());
//!     }
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Protocol Layer Only
//!
//! ```
//! use fleet_live::protocol::{Protocol, SnapshotParser};
//!
//! let mut parser = SnapshotParser::new();
//! let line = br#"42["bus_positions",{"V1":{"lon":29.0,"lat":41.0}}]"#;
//! if let Ok(Some(snapshot)) = parser.parse(line) {
//!     println!("Got {} vehicles", snapshot.len());
//! }
//! ```

pub mod animation;
pub mod controller;
pub mod geo;
pub mod layer;
pub mod popup;
pub mod protocol;
pub mod routes;
pub mod selection;
pub mod stops;
pub mod surface;
pub mod tcp;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::watch;

pub use animation::{AnimationTask, AnimationTuning, FrameQueue, Pose};
pub use controller::{MapController, FLY_TO_ZOOM};
pub use geo::LonLat;
pub use layer::{LayerStats, MarkerState, VehicleLayer};
pub use popup::{FieldKey, FieldVisibility, PopupRow, PopupState};
pub use protocol::{ParseError, Protocol, Snapshot, SnapshotParser, VehicleId, VehiclePosition};
pub use routes::{Direction, RouteGeometry, RoutePattern, RouteSummary};
pub use selection::SelectionSet;
pub use stops::{ClusterOptions, StopFeature, StopPage, StopRecord};
pub use surface::{MapSurface, MarkerHandle, PopupHandle};
pub use tcp::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionState, FeedError,
};

/// Configuration for the full-stack live feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Connection configuration.
    pub connection: ConnectionConfig,
    /// socket.io event carrying position snapshots.
    pub event_name: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            event_name: protocol::DEFAULT_EVENT_NAME.to_string(),
        }
    }
}

/// Full-stack live feed that wires connection and parser together.
///
/// Only the newest snapshot is kept: a consumer that falls behind skips
/// straight to the latest one instead of replaying stale positions.
#[derive(Debug)]
pub struct LiveFeed {
    handle: ConnectionHandle,
    snapshot_rx: watch::Receiver<Option<Arc<Snapshot>>>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl LiveFeed {
    /// Spawn the connection and the parsing task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: FeedConfig) -> Self {
        Self::spawn_with_wake(config, || {})
    }

    /// Like [`LiveFeed::spawn`], calling `wake` whenever a new snapshot or
    /// connection state is published, e.g. to request a UI repaint.
    #[must_use]
    pub fn spawn_with_wake<W>(config: FeedConfig, wake: W) -> Self
    where
        W: Fn() + Send + 'static,
    {
        let (handle, mut events) = Connection::spawn(config.connection).split();
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let mut parser = SnapshotParser::for_event(config.event_name);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ConnectionEvent::StateChanged(state) => {
                        state_tx.send_replace(state);
                        wake();
                    }
                    ConnectionEvent::DataReceived(data) => {
                        if let Some(snapshot) = parse_line(&mut parser, &data) {
                            snapshot_tx.send_replace(Some(Arc::new(snapshot)));
                            wake();
                        }
                    }
                }
            }
            debug!("Live feed event stream ended");
        });

        Self {
            handle,
            snapshot_rx,
            state_rx,
        }
    }

    /// The newest snapshot if one arrived since the last call.
    pub fn take_if_changed(&mut self) -> Option<Arc<Snapshot>> {
        if self.snapshot_rx.has_changed().unwrap_or(false) {
            self.snapshot_rx.borrow_and_update().clone()
        } else {
            None
        }
    }

    /// Wait for the next snapshot. Returns `None` once the feed stopped.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            self.snapshot_rx.changed().await.ok()?;
            if let Some(snapshot) = self.snapshot_rx.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
    }

    /// The newest snapshot received so far.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshot_rx.borrow().clone()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Change the feed address; the connection reconnects immediately.
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

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

fn parse_line(parser: &mut SnapshotParser, data: &[u8]) -> Option<Snapshot> {
    match parser.parse(data) {
        Ok(Some(snapshot)) => {
            if !snapshot.malformed.is_empty() {
                debug!(
                    "Snapshot carried {} malformed records: {:?}",
                    snapshot.malformed.len(),
                    snapshot.malformed
                );
            }
            Some(snapshot)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Parse error: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_line_skips_garbage() {
        let mut parser = SnapshotParser::new();
        assert!(parse_line(&mut parser, b"not json").is_none());
        assert!(parse_line(&mut parser, b"2").is_none());
        let snapshot = parse_line(&mut parser, br#"{"V1":{"lon":29.0,"lat":41.0}}"#).unwrap();
        assert!(snapshot.contains("V1"));
    }

    #[tokio::test]
    async fn test_live_feed_publishes_latest_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"0{\"sid\":\"abc\"}\n42[\"bus_positions\",{\"V1\":{\"lon\":29.0,\"lat\":41.0,\"ts\":1000}}]\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let mut feed = LiveFeed::spawn(FeedConfig {
            connection: ConnectionConfig {
                address,
                ..Default::default()
            },
            ..Default::default()
        });

        let snapshot = tokio::time::timeout(Duration::from_secs(5), feed.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.positions["V1"].ts, 1000);
        assert!(feed.latest().is_some());
        assert!(feed.take_if_changed().is_none());
        feed.shutdown();
    }

    #[tokio::test]
    async fn test_wake_called_for_each_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"{\"V1\":{\"lon\":29.0,\"lat\":41.0}}\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        let mut feed = LiveFeed::spawn_with_wake(
            FeedConfig {
                connection: ConnectionConfig {
                    address,
                    ..Default::default()
                },
                ..Default::default()
            },
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::timeout(Duration::from_secs(5), feed.changed())
            .await
            .unwrap()
            .unwrap();
        // connecting, connected and the snapshot itself
        assert!(wakes.load(Ordering::SeqCst) >= 3);
        feed.shutdown();
    }
}
