use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::{SinkExt, StreamExt};
use shared::protocol::{AuthHandshake, ClientMessage, ServerEvent};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the 1-based `attempt`, or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt - 1)?;
        self.base_delay.checked_mul(factor)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).map_while(|attempt| self.delay_for(attempt))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceSignal {
    Event(ServerEvent),
    Connected { resumed: bool },
    Disconnected { reason: String },
    GaveUp { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct EventSourceConfig {
    pub server_url: String,
    pub path: String,
    pub handshake: AuthHandshake,
    pub reconnect: ReconnectPolicy,
}

pub fn websocket_url(server_url: &str, path: &str) -> Result<Url> {
    let mut url =
        Url::parse(server_url).with_context(|| format!("invalid server url: {server_url}"))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => bail!("server_url must start with http:// or https://, got {other}://"),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot switch {server_url} to {scheme}"))?;
    url.set_path(path);
    Ok(url)
}

/// Real-time channel over a websocket, reconnecting with backoff.
pub struct WebSocketEventSource {
    url: Url,
    handshake: AuthHandshake,
    reconnect: ReconnectPolicy,
}

impl WebSocketEventSource {
    pub fn new(config: EventSourceConfig) -> Result<Self> {
        Ok(Self {
            url: websocket_url(&config.server_url, &config.path)?,
            handshake: config.handshake,
            reconnect: config.reconnect,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Frames queued on `outbound` while disconnected go out after the next
    /// handshake.
    pub fn spawn(
        self,
        signals: mpsc::Sender<SourceSignal>,
        outbound: mpsc::Receiver<ClientMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(signals, outbound))
    }

    async fn run(
        self,
        signals: mpsc::Sender<SourceSignal>,
        mut outbound: mpsc::Receiver<ClientMessage>,
    ) {
        let mut ever_connected = false;
        let mut failures = 0u32;
        loop {
            match self
                .connect_once(&signals, &mut outbound, ever_connected)
                .await
            {
                Ok(Some(reason)) => {
                    ever_connected = true;
                    failures = 0;
                    info!(url = %self.url, "channel: disconnected: {reason}");
                    if signals
                        .send(SourceSignal::Disconnected { reason })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    warn!(url = %self.url, attempt = failures, "channel: connect failed: {err:#}");
                }
            }
            if signals.is_closed() {
                return;
            }

            failures += 1;
            let Some(delay) = self.reconnect.delay_for(failures) else {
                let attempts = failures - 1;
                warn!(url = %self.url, attempts, "channel: giving up on reconnect");
                let _ = signals.send(SourceSignal::GaveUp { attempts }).await;
                return;
            };
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            debug!(delay_ms, "channel: reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    /// `Ok(Some(reason))` once an established connection ends, `Ok(None)`
    /// when the session stopped listening.
    async fn connect_once(
        &self,
        signals: &mpsc::Sender<SourceSignal>,
        outbound: &mut mpsc::Receiver<ClientMessage>,
        resumed: bool,
    ) -> Result<Option<String>> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {}", self.url))?;
        let (mut writer, mut reader) = ws_stream.split();

        let hello = serde_json::to_string(&ClientMessage::Authenticate(self.handshake.clone()))
            .context("failed to encode handshake")?;
        writer
            .send(Message::Text(hello))
            .await
            .context("failed to send handshake")?;
        info!(url = %self.url, resumed, "channel: connected");
        if signals
            .send(SourceSignal::Connected { resumed })
            .await
            .is_err()
        {
            return Ok(None);
        }

        loop {
            tokio::select! {
                frame = reader.next() => {
                    let Some(frame) = frame else {
                        return Ok(Some("stream ended".into()));
                    };
                    match frame {
                        Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                debug!(event = event.name(), "channel: event received");
                                if signals.send(SourceSignal::Event(event)).await.is_err() {
                                    return Ok(None);
                                }
                            }
                            Err(err) => warn!("channel: invalid server event: {err}"),
                        },
                        Ok(Message::Close(_)) => return Ok(Some("closed by server".into())),
                        Ok(_) => {}
                        Err(err) => return Ok(Some(format!("websocket receive failed: {err}"))),
                    }
                }
                Some(message) = outbound.recv() => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!("channel: failed to encode client message: {err}");
                            continue;
                        }
                    };
                    if let Err(err) = writer.send(Message::Text(text)).await {
                        return Ok(Some(format!("websocket send failed: {err}")));
                    }
                    debug!("channel: client message sent");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/event_source_tests.rs"]
mod tests;
