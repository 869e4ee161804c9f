//! WebSocket client to the remote conversational agent service.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use voicebridge_core::protocol::{AgentInbound, AgentOutbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected handle to the agent service: a send side guarded by a mutex
/// (mirroring the split-sink pattern for a single logical writer shared by
/// multiple pump tasks) and a receive side already drained into a channel.
pub struct AgentConnection {
    sink: Arc<Mutex<futures::stream::SplitSink<WsStream, Message>>>,
    pub inbound: mpsc::Receiver<AgentOutbound>,
}

impl AgentConnection {
    /// Connect to `<base_url>/<session_id>` and spawn a receive loop that
    /// parses every text frame into an [`AgentOutbound`] and forwards it on
    /// a bounded channel. Malformed frames are logged and dropped; the
    /// receive loop ends (closing the channel) when the socket closes.
    pub async fn connect(base_url: &str, session_id: &str, ping_interval: Duration) -> anyhow::Result<Self> {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), session_id);
        let (ws_stream, _response) = connect_async(&url).await?;
        let (sink, mut stream) = ws_stream.split();
        let sink = Arc::new(Mutex::new(sink));

        let (tx, rx) = mpsc::channel(32);
        let keepalive_sink = sink.clone();

        tokio::spawn(async move {
            let mut ping_tick = tokio::time::interval(ping_interval);
            ping_tick.tick().await; // first tick fires immediately; discard
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<AgentOutbound>(&text) {
                                    Ok(parsed) => {
                                        if tx.send(parsed).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => warn!(error = %e, "malformed agent message, dropping"),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {} // binary/ping/pong frames carry no protocol meaning here
                            Some(Err(e)) => {
                                warn!(error = %e, "agent websocket read error");
                                break;
                            }
                        }
                    }
                    _ = ping_tick.tick() => {
                        let mut guard = keepalive_sink.lock().await;
                        if guard.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("agent websocket receive loop ended");
        });

        Ok(Self { sink, inbound: rx })
    }

    pub async fn send(&self, msg: &AgentInbound) -> anyhow::Result<()> {
        let text = serde_json::to_string(msg)?;
        let mut guard = self.sink.lock().await;
        guard.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn close(&self) {
        let mut guard = self.sink.lock().await;
        let _ = guard.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_inbound_serializes_to_expected_shape() {
        let msg = AgentInbound::audio_data(&[1, 2, 3]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"audio_data""#));
    }
}
