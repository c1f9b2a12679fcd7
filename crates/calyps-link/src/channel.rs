//! [`EventChannel`] – the box's push socket, kept alive for the process
//! lifetime.
//!
//! One session is:
//!
//! 1. connect to `ws://<box>/` negotiating the `lws-mirror-protocol`
//!    sub-protocol,
//! 2. send [`LOGIN_FRAME`],
//! 3. send a heartbeat every [`ChannelConfig::heartbeat_interval`] while
//!    forwarding every decoded [`LevelEvent`] to the consumer.
//!
//! Any connect error, read error, write error or close ends the session; the
//! client then waits a jittered, exponentially growing delay and starts a new
//! one.  There is no attempt cap, and the delay drops back to the first tier
//! once a session has been established.  The heartbeat ticker lives inside
//! the session, so a dead connection can never leave a timer behind.
//!
//! [`EventChannel::run`] only returns when the consumer hangs up or the
//! endpoint itself is invalid.

use std::time::Duration;

use calyps_types::ChannelError;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request, header};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, trace, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::frame::{Heartbeat, LOGIN_FRAME, LevelEvent, parse_level_event};

/// Sub-protocol the box's socket server expects.
pub const DEFAULT_PROTOCOL: &str = "lws-mirror-protocol";

/// Interval between two heartbeat frames.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Settings of the event socket.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    pub protocol: String,
    pub heartbeat_interval: Duration,
    pub reconnect: BackoffPolicy,
}

impl ChannelConfig {
    /// Defaults for the socket living on the same origin as `box_url`.
    pub fn for_box(box_url: &str) -> Result<Self, ChannelError> {
        Ok(Self {
            url: channel_url(box_url)?,
            protocol: DEFAULT_PROTOCOL.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect: BackoffPolicy::reconnect(),
        })
    }
}

/// Derive the socket endpoint from any http(s) URL on the box.
pub fn channel_url(box_url: &str) -> Result<String, ChannelError> {
    let mut url = Url::parse(box_url.trim())
        .map_err(|e| ChannelError::InvalidEndpoint(format!("`{box_url}`: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChannelError::InvalidEndpoint(format!(
                "unsupported scheme `{other}` in `{box_url}`"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ChannelError::InvalidEndpoint(format!("cannot use {scheme} for `{box_url}`")))?;
    url.set_path("");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

enum SessionEnd {
    /// The event consumer was dropped; nothing left to do.
    ConsumerGone,
    /// The connection failed or ended; reconnect.
    Dropped(ChannelError),
}

/// Self-healing client of the box's event socket.
#[derive(Debug, Clone)]
pub struct EventChannel {
    config: ChannelConfig,
}

impl EventChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Keep a session open, reconnecting forever, and forward level events
    /// to `events`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidEndpoint`] when the configured URL or
    /// sub-protocol cannot be turned into a handshake request.  Returns
    /// `Ok(())` once the receiving half of `events` is dropped.
    pub async fn run(&self, events: mpsc::Sender<LevelEvent>) -> Result<(), ChannelError> {
        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            let request = self.request()?;
            match self.session(request, &events, &mut backoff).await {
                SessionEnd::ConsumerGone => {
                    info!("event consumer gone, closing event channel");
                    return Ok(());
                }
                SessionEnd::Dropped(cause) => {
                    backoff.record_attempt();
                    let delay = backoff.next_delay();
                    warn!(
                        error = %cause,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "event channel lost, reconnecting"
                    );
                    tokio::select! {
                        _ = time::sleep(delay) => {}
                        _ = events.closed() => return Ok(()),
                    }
                }
            }
        }
    }

    fn request(&self) -> Result<Request<()>, ChannelError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::InvalidEndpoint(format!("`{}`: {e}", self.config.url)))?;
        let protocol = HeaderValue::from_str(&self.config.protocol).map_err(|e| {
            ChannelError::InvalidEndpoint(format!("sub-protocol `{}`: {e}", self.config.protocol))
        })?;
        request
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, protocol);
        Ok(request)
    }

    async fn session(
        &self,
        request: Request<()>,
        events: &mpsc::Sender<LevelEvent>,
        backoff: &mut Backoff,
    ) -> SessionEnd {
        let (socket, _response) = match connect_async(request).await {
            Ok(pair) => pair,
            Err(e) => {
                return SessionEnd::Dropped(ChannelError::Connect {
                    url: self.config.url.clone(),
                    details: e.to_string(),
                });
            }
        };
        info!(url = %self.config.url, "event channel connected");
        backoff.reset();

        let (mut sink, mut stream) = socket.split();
        if let Err(e) = sink.send(Message::Text(LOGIN_FRAME.into())).await {
            return SessionEnd::Dropped(ChannelError::Socket(e.to_string()));
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = Heartbeat::start();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let frame = heartbeat.next_frame();
                    trace!(%frame, "heartbeat");
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        return SessionEnd::Dropped(ChannelError::Socket(e.to_string()));
                    }
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !forward(text.as_str(), events).await {
                            return SessionEnd::ConsumerGone;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Dropped(ChannelError::Closed);
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Dropped(ChannelError::Socket(e.to_string()));
                    }
                    Some(Ok(_)) => {}
                },
                _ = events.closed() => return SessionEnd::ConsumerGone,
            }
        }
    }
}

/// Decode one frame and hand it to the consumer; `false` once the consumer
/// is gone.
async fn forward(text: &str, events: &mpsc::Sender<LevelEvent>) -> bool {
    match parse_level_event(text) {
        Ok(Some(event)) => events.send(event).await.is_ok(),
        Ok(None) => {
            trace!(frame = text, "ignoring non-level frame");
            true
        }
        Err(e) => {
            warn!(error = %e, frame = text, "dropping malformed level frame");
            true
        }
    }
}
