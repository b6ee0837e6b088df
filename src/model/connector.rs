//! Opening model connections.
//!
//! [`ModelConnector`] is the seam the call orchestrator uses to obtain a
//! [`ModelClient`]; production wires in [`WebSocketConnector`], tests wire in
//! an in-memory double.

use crate::error::BridgeError;
use crate::model::client::{ModelClient, ModelEventSink, ModelSessionOptions, TransportCommand};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Creates one model connection per call.
pub trait ModelConnector: Send + Sync {
    /// Start connecting and return immediately with a client in the
    /// `Connecting` state. Progress is reported through `events`.
    fn connect(&self, call_id: &str, events: Arc<dyn ModelEventSink>) -> ModelClient;
}

/// Connects to the model's streaming endpoint over a real WebSocket.
pub struct WebSocketConnector {
    url: String,
    options: ModelSessionOptions,
}

impl WebSocketConnector {
    pub fn new(url: String, options: ModelSessionOptions) -> Self {
        Self { url, options }
    }
}

impl ModelConnector for WebSocketConnector {
    fn connect(&self, call_id: &str, events: Arc<dyn ModelEventSink>) -> ModelClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = ModelClient::new(call_id, self.options.clone(), tx, events);
        tokio::spawn(run_connection(self.url.clone(), client.clone(), rx));
        client
    }
}

/// Drive one model WebSocket until either side closes it.
///
/// ## Tasks:
/// - **Writer**: drains queued [`TransportCommand`]s into the socket sink
/// - **Reader** (this future): feeds text frames to the client, decoding binary
///   frames as UTF-8 first
async fn run_connection(
    url: String,
    client: ModelClient,
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
) {
    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(err) => {
            client.transport_error(&BridgeError::from(err).to_string());
            client.transport_closed();
            return;
        }
    };
    info!(call_id = %client.call_id(), "Model WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let writer_call_id = client.call_id().to_string();
    let writer = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            match command {
                TransportCommand::Frame(text) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        warn!(call_id = %writer_call_id, "Model send failed: {}", err);
                        break;
                    }
                }
                TransportCommand::Close => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => client.handle_frame(&text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => client.handle_frame(&text),
                Err(err) => debug!(call_id = %client.call_id(), "Dropping non-UTF-8 binary frame: {}", err),
            },
            Ok(Message::Close(reason)) => {
                debug!(call_id = %client.call_id(), "Model sent close: {:?}", reason);
                break;
            }
            Ok(_) => {}
            Err(err) => {
                client.transport_error(&BridgeError::from(err).to_string());
                break;
            }
        }
    }

    writer.abort();
    client.transport_closed();
}
