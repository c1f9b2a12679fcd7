//! [`SyncEngine`] – the handle a home-automation host holds.
//!
//! ```rust,no_run
//! use calyps_runtime::{EngineConfig, SyncEngine};
//! use calyps_types::{Level, ShutterCommand};
//!
//! # async fn run() -> Result<(), calyps_types::CalypsError> {
//! let engine = SyncEngine::new(EngineConfig::for_box("http://calypshome.local")?)?;
//! engine.refresh_inventory().await?;
//! let live = engine.spawn_live_channel();
//!
//! let mut changes = engine.subscribe();
//! engine.dispatch("12", ShutterCommand::Level(Level::new(80)?)).await?;
//! while let Ok(change) = changes.recv().await {
//!     println!("{} is {}", change.display_name, change.motion);
//! }
//! # live.abort();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use calyps_link::{ChangeBus, ChannelConfig, EventChannel, HttpTransport, HttpTransportConfig, Transport};
use calyps_twin::{MOTION_REVERT_DELAY, TwinTracker};
use calyps_types::{CalypsError, ShutterCommand, TwinChange};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::discovery::{self, DiscoveryConfig, DiscoveryReport};
use crate::dispatcher;
use crate::live::{self, LiveStats};

/// Depth of the queue between the socket and the twins.
const EVENT_QUEUE_DEPTH: usize = 64;

/// Everything the engine needs to reach one box.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub transport: HttpTransportConfig,
    pub discovery: DiscoveryConfig,
    pub channel: ChannelConfig,
    /// How long a moving twin stays moving without news.
    pub motion_revert: Duration,
}

impl EngineConfig {
    /// Defaults for the box at `url`.
    ///
    /// # Errors
    ///
    /// [`CalypsError::Channel`] when no socket endpoint can be derived from
    /// `url`.
    pub fn for_box(url: &str) -> Result<Self, CalypsError> {
        Ok(Self {
            transport: HttpTransportConfig::new(url),
            discovery: DiscoveryConfig::default(),
            channel: ChannelConfig::for_box(url)?,
            motion_revert: MOTION_REVERT_DELAY,
        })
    }
}

/// Keeps the twins of one box in sync and relays commands to it.
///
/// Clones share the transport, the twins and the change bus.
#[derive(Clone)]
pub struct SyncEngine {
    transport: Arc<dyn Transport>,
    tracker: TwinTracker,
    discovery: DiscoveryConfig,
    channel: ChannelConfig,
}

impl SyncEngine {
    /// Build an engine talking HTTP to the box.
    ///
    /// # Errors
    ///
    /// [`CalypsError::Config`] when the HTTP client cannot be built.
    pub fn new(config: EngineConfig) -> Result<Self, CalypsError> {
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Build an engine over any [`Transport`].
    pub fn with_transport(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self {
            transport,
            tracker: TwinTracker::new(ChangeBus::default(), config.motion_revert),
            discovery: config.discovery,
            channel: config.channel,
        }
    }

    pub fn tracker(&self) -> &TwinTracker {
        &self.tracker
    }

    /// Run discovery once.
    ///
    /// # Errors
    ///
    /// [`CalypsError::DiscoveryExhausted`] after the last failed attempt.
    /// The engine does not retry on its own after that.
    pub async fn refresh_inventory(&self) -> Result<DiscoveryReport, CalypsError> {
        discovery::refresh(self.transport.as_ref(), &self.tracker, &self.discovery).await
    }

    /// Keep the event socket connected and apply its level events.
    ///
    /// Runs for as long as the process wants live updates.
    ///
    /// # Errors
    ///
    /// Only for a socket endpoint that can never work; see
    /// [`ChannelError::is_fatal`](calyps_types::ChannelError::is_fatal).
    pub async fn connect_live_channel(&self) -> Result<LiveStats, CalypsError> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let channel = EventChannel::new(self.channel.clone());
        info!(url = %self.channel.url, "starting live channel");

        let (outcome, stats) = tokio::join!(channel.run(tx), live::pump(rx, self.tracker.clone()));
        if let Err(e) = &outcome {
            error!(error = %e, "live channel stopped");
        }
        outcome?;
        Ok(stats)
    }

    /// [`connect_live_channel`](Self::connect_live_channel) on a background task.
    pub fn spawn_live_channel(&self) -> JoinHandle<Result<LiveStats, CalypsError>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.connect_live_channel().await })
    }

    /// Send `command` to the shutter `identity`.
    ///
    /// # Errors
    ///
    /// See [`dispatcher::dispatch`].
    pub async fn dispatch(&self, identity: &str, command: ShutterCommand) -> Result<String, CalypsError> {
        dispatcher::dispatch(self.transport.as_ref(), &self.tracker, identity, command).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TwinChange> {
        self.tracker.subscribe()
    }

    pub fn snapshot(&self, identity: &str) -> Option<TwinChange> {
        self.tracker.snapshot(identity)
    }

    pub fn snapshots(&self) -> Vec<TwinChange> {
        self.tracker.snapshots()
    }
}
