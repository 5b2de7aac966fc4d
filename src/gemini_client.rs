//! WebSocket session transport for the Gemini Live API
//!
//! Each opened session runs as one background task that owns both halves of the
//! socket: it sends the setup frame, forwards queued outbound input, and turns
//! server frames into transport events. The handle only holds the outbound
//! queue, so sending never waits on the network.

use crate::events::{EventSink, LiveMessage, MediaEnvelope};
use crate::gemini::{
    endpoint_url, parse_server_content, ClientMessage, GeminiError, LiveConfig, RealtimeInput,
    Result, ServerMessage,
};
use crate::transport::{SessionHandle, SessionTransport, SharedHandle};

use futures_util::{Sink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Opens Live API sessions over WebSocket.
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    url: String,
}

impl GeminiTransport {
    pub fn new(api_key: &str) -> Self {
        Self {
            url: endpoint_url(api_key),
        }
    }

    /// Point the transport at another endpoint (local proxies, tests).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl SessionTransport for GeminiTransport {
    fn open(&self, config: LiveConfig, events: EventSink) -> Result<SharedHandle> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let url = self.url.clone();
        let session = events.session();

        info!("Opening Gemini Live session {} with model {}", session, config.model);
        let task = tokio::spawn(run_session(url, config, outbound_rx, events));

        Ok(Arc::new(GeminiSessionHandle {
            session,
            outbound_tx,
            task,
        }))
    }
}

/// Outbound side of one session. Dropping it tears the connection down.
pub struct GeminiSessionHandle {
    session: u64,
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    task: JoinHandle<()>,
}

impl SessionHandle for GeminiSessionHandle {
    fn send_realtime_input(&self, envelope: MediaEnvelope) -> Result<()> {
        let input = RealtimeInput::from_envelope(&envelope)?;
        self.outbound_tx
            .send(ClientMessage::RealtimeInput(input))
            .map_err(|_| GeminiError::ChannelClosed)
    }
}

impl Drop for GeminiSessionHandle {
    fn drop(&mut self) {
        debug!("Dropping handle for session {}", self.session);
        self.task.abort();
    }
}

fn encode(msg: &ClientMessage) -> Result<Message> {
    Ok(Message::text(serde_json::to_string(msg)?))
}

async fn run_session(
    url: String,
    config: LiveConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
    events: EventSink,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, resp)) => {
            debug!("WebSocket connection response: {:?}", resp.status());
            ws
        }
        Err(e) => {
            error!("Failed to connect to Gemini Live: {}", e);
            events.error(GeminiError::WebSocket(e).to_string());
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();

    let setup = ClientMessage::Setup(config.to_setup());
    if let Err(e) = send_message(&mut sink, &setup).await {
        error!("Failed to send setup message: {}", e);
        events.error(e.to_string());
        return;
    }
    info!("Setup message sent, waiting for acknowledgment");

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(msg) = outbound else {
                    // Every handle is gone.
                    debug!("Outbound queue closed, ending session {}", events.session());
                    break;
                };
                if let Err(e) = send_message(&mut sink, &msg).await {
                    debug!("Dropped outbound input: {}", e);
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_text_message(text.as_str(), &events) {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            if !handle_text_message(text, &events) {
                                break;
                            }
                        }
                        Err(_) => debug!("Ignoring non UTF-8 binary frame ({} bytes)", bytes.len()),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!("WebSocket closed: {:?}", frame);
                        events.closed();
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {:?}", e);
                        events.error(GeminiError::WebSocket(e).to_string());
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        events.closed();
                        break;
                    }
                }
            }
        }
    }

    info!("Session {} task terminated", events.session());
}

async fn send_message<S>(sink: &mut S, msg: &ClientMessage) -> Result<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    sink.send(encode(msg)?).await?;
    Ok(())
}

/// Parse one server frame and forward what it carries.
///
/// Returns false once the event receiver has gone away.
fn handle_text_message(text: &str, events: &EventSink) -> bool {
    let server_message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Unrecognized server message ({}): {}", e, text);
            return true;
        }
    };

    match server_message {
        ServerMessage::SetupComplete { .. } => {
            info!("Gemini session setup complete");
            events.open()
        }
        ServerMessage::ServerContent { server_content } => {
            let message: LiveMessage = parse_server_content(&server_content);
            if message.audio.is_empty() && !message.turn_complete {
                return true;
            }
            events.message(message)
        }
        ServerMessage::GoAway { go_away } => {
            warn!("Server will disconnect soon: {}", go_away);
            true
        }
        ServerMessage::ToolCall { tool_call } => {
            debug!("Ignoring tool call: {}", tool_call);
            true
        }
        ServerMessage::SessionResumptionUpdate { .. } => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TransportEventKind;
    use base64::Engine;
    use serde_json::json;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<crate::events::TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(7, tx), rx)
    }

    #[test]
    fn test_setup_complete_emits_open() {
        let (events, mut rx) = sink();
        assert!(handle_text_message(&json!({"setupComplete": {}}).to_string(), &events));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.session, 7);
        assert_eq!(event.kind, TransportEventKind::Open);
    }

    #[test]
    fn test_server_content_emits_message() {
        let (events, mut rx) = sink();
        let data = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3, 4]);
        let frame = json!({
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"data": data, "mimeType": "audio/pcm;rate=24000"}}]},
                "turnComplete": true
            }
        });
        assert!(handle_text_message(&frame.to_string(), &events));
        match rx.try_recv().unwrap().kind {
            TransportEventKind::Message(message) => {
                assert_eq!(message.audio.len(), 1);
                assert_eq!(message.audio[0].payload_base64(), data);
                assert!(message.turn_complete);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_uninteresting_frames_emit_nothing() {
        let (events, mut rx) = sink();
        assert!(handle_text_message("{\"usageMetadata\":{}}", &events));
        assert!(handle_text_message("not json", &events));
        assert!(handle_text_message(&json!({"goAway": {}}).to_string(), &events));
        assert!(handle_text_message(
            &json!({"serverContent": {"generationComplete": true}}).to_string(),
            &events
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_receiver_gone_stops_the_session() {
        let (events, rx) = sink();
        drop(rx);
        assert!(!handle_text_message(&json!({"setupComplete": {}}).to_string(), &events));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_error() {
        let (events, mut rx) = sink();
        let transport = GeminiTransport::new("key").with_url("ws://127.0.0.1:9/");
        let handle = transport.open(LiveConfig::default(), events).unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.kind, TransportEventKind::Error(_)));
        // Sending after the task ended is harmless.
        let _ = handle.send_realtime_input(MediaEnvelope::new("AAAA", "audio/pcm;rate=16000"));
    }
}
