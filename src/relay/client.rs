use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::RelayError;
use crate::grid::{Node, PlacementObserver};
use crate::persona::PersonaProfile;
use crate::scenario::StructuredScenario;

use super::{ClientEvent, MapDataRequest, PlacedNode, PromptRequest, ServerEvent, StructuredRequest};

/// Inbound events from the relay, in arrival order.
pub type RelayEvents = mpsc::UnboundedReceiver<ServerEvent>;

/// An owned connection to the relay. Nothing is shared process-wide: whoever
/// connects holds the client and ends the session with [`RelayClient::disconnect`].
#[derive(Debug)]
pub struct RelayClient {
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    next_request: AtomicU64,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Connects to a relay websocket, e.g. `ws://127.0.0.1:3000/api/socket`.
    pub async fn connect(url: &str) -> Result<(Self, RelayEvents), RelayError> {
        let (stream, _) = connect_async(url).await?;
        tracing::info!(%url, "connected to relay");
        let (mut sink, mut source) = stream.split();

        let (outbound, mut queued) = mpsc::unbounded_channel::<ClientEvent>();
        let (inbound, events) = mpsc::unbounded_channel::<ServerEvent>();

        let writer = tokio::spawn(async move {
            while let Some(event) = queued.recv().await {
                let frame = match event.to_frame() {
                    Ok(frame) => frame,
                    Err(error) => {
                        tracing::error!(%error, "failed to encode relay event");
                        continue;
                    }
                };
                if let Err(error) = sink.send(Message::Text(frame)).await {
                    tracing::debug!(%error, "relay write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(frame)) => match ServerEvent::from_frame(&frame) {
                        Ok(event) => {
                            if inbound.send(event).is_err() {
                                break;
                            }
                        }
                        Err(error) => tracing::warn!(%error, "ignoring unrecognised relay frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        tracing::debug!(%error, "relay read failed");
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                outbound: Some(outbound),
                next_request: AtomicU64::new(0),
                writer: Some(writer),
                reader: Some(reader),
            },
            events,
        ))
    }

    /// A client without a socket; outbound events land on the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (outbound, queued) = mpsc::unbounded_channel();
        (
            Self {
                outbound: Some(outbound),
                next_request: AtomicU64::new(0),
                writer: None,
                reader: None,
            },
            queued,
        )
    }

    fn send(&self, event: ClientEvent) -> Result<(), RelayError> {
        self.outbound
            .as_ref()
            .ok_or(RelayError::Disconnected)?
            .send(event)
            .map_err(|_| RelayError::Disconnected)
    }

    /// Request ids are shared by every request kind and start at 1.
    fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn send_text(
        &self,
        event: fn(PromptRequest) -> ClientEvent,
        text: impl Into<String>,
    ) -> Result<u64, RelayError> {
        let request_id = self.next_request_id();
        self.send(event(PromptRequest {
            text: text.into(),
            request_id: Some(request_id),
        }))?;
        Ok(request_id)
    }

    /// Sends a scenario prompt and returns the request id the completion will echo.
    pub fn send_prompt(&self, text: impl Into<String>) -> Result<u64, RelayError> {
        self.send_text(ClientEvent::InitialPrompt, text)
    }

    /// Asks for the structured breakdown of a scenario (`structuredResult`).
    pub fn request_structured(&self, text: impl Into<String>) -> Result<u64, RelayError> {
        self.send_text(ClientEvent::StructuredFormat, text)
    }

    /// Asks for a storyboard of a scenario (`storyboardResult`).
    pub fn request_storyboard(&self, text: impl Into<String>) -> Result<u64, RelayError> {
        self.send_text(ClientEvent::StoryboardFormat, text)
    }

    /// Asks for scenario prose written from an edited breakdown (`convertedScenario`).
    pub fn convert_structured(&self, structured: &StructuredScenario) -> Result<u64, RelayError> {
        let request_id = self.next_request_id();
        self.send(ClientEvent::ConvertStructured(StructuredRequest {
            structured: structured.clone(),
            request_id: Some(request_id),
        }))?;
        Ok(request_id)
    }

    pub fn flourish_persona(&self, brief: impl Into<String>) -> Result<u64, RelayError> {
        self.send_text(ClientEvent::FlourishPersona, brief)
    }

    /// Asks for a journey document drawn from a persona (`mapDataGenerated`).
    pub fn generate_map_data(&self, profile: &PersonaProfile) -> Result<u64, RelayError> {
        let request_id = self.next_request_id();
        self.send(ClientEvent::GenerateMapData(MapDataRequest {
            profile: profile.clone(),
            request_id: Some(request_id),
        }))?;
        Ok(request_id)
    }

    pub fn notify_node_placed(&self, node: &Node) -> Result<(), RelayError> {
        self.send(ClientEvent::NodePlaced(PlacedNode::from(node)))
    }

    /// Observer that forwards grid placements over this connection. It does not
    /// keep the connection open: once the client disconnects, notifications are
    /// dropped.
    pub fn placement_notifier(&self) -> Option<PlacementNotifier> {
        self.outbound.as_ref().map(|outbound| PlacementNotifier {
            outbound: outbound.downgrade(),
        })
    }

    /// Flushes queued events, closes the socket and stops the reader.
    pub async fn disconnect(mut self) {
        self.outbound.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        tracing::info!("disconnected from relay");
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Fire-and-forget `nodePlaced` broadcaster registered on the grid.
#[derive(Debug, Clone)]
pub struct PlacementNotifier {
    outbound: mpsc::WeakUnboundedSender<ClientEvent>,
}

impl PlacementObserver for PlacementNotifier {
    fn node_placed(&self, node: &Node) {
        let sent = self.outbound.upgrade().is_some_and(|outbound| {
            outbound
                .send(ClientEvent::NodePlaced(PlacedNode::from(node)))
                .is_ok()
        });
        if !sent {
            tracing::debug!("relay closed, dropping nodePlaced notification");
        }
    }
}
