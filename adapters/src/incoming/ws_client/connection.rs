use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};
use url::Url;

use oekaki_application::contracts::wire::InboundFrame;
use oekaki_application::error::AppError;

use crate::wire::envelope::{decode_transport_binary, decode_transport_text};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Application error: {0}")]
    Application(#[from] AppError),

    #[error("Invalid session URL: {0}")]
    InvalidUrl(String),
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Lifecycle signals handed to the session run loop. Frames arrive
/// pre-decoded; the loop feeds them to the controller one at a time.
#[derive(Debug)]
pub enum TransportEvent {
    Opened,
    Frames(Vec<InboundFrame>),
    Closed(String),
}

/// A connected relay socket: an outbound byte queue drained by the write
/// task, and an event stream produced by the read task. Both tasks own
/// their half of the split stream; the drawing loop never blocks on
/// socket I/O.
pub struct WsSession {
    pub outbound: mpsc::UnboundedSender<Vec<u8>>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

pub async fn connect(session_url: &str) -> ConnectionResult<WsSession> {
    Url::parse(session_url).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;

    info!("connecting to {session_url}");
    let (stream, _response) = connect_async(session_url).await?;
    let (mut sink, mut source) = stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

    event_tx.send(TransportEvent::Opened).ok();

    tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            if let Err(err) = sink.send(Message::binary(bytes)).await {
                warn!("socket write failed: {err}");
                break;
            }
        }
        sink.close().await.ok();
        debug!("write loop finished");
    });

    tokio::spawn(async move {
        let mut close_reason: Option<String> = None;
        while let Some(item) = source.next().await {
            match item {
                Ok(Message::Binary(data)) => {
                    let frames = decode_transport_binary(&data);
                    if !frames.is_empty() {
                        event_tx.send(TransportEvent::Frames(frames)).ok();
                    }
                }
                Ok(Message::Text(text)) => {
                    let frames = decode_transport_text(text.as_str());
                    if !frames.is_empty() {
                        event_tx.send(TransportEvent::Frames(frames)).ok();
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!("received close frame");
                    close_reason = Some(frame.map_or_else(
                        || "closed by peer".to_string(),
                        |f| f.reason.as_str().to_string(),
                    ));
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(err) => {
                    warn!("socket read failed: {err}");
                    close_reason = Some(err.to_string());
                    break;
                }
            }
        }
        let reason = close_reason.unwrap_or_else(|| "stream ended".to_string());
        event_tx.send(TransportEvent::Closed(reason)).ok();
        debug!("read loop finished");
    });

    Ok(WsSession {
        outbound: outbound_tx,
        events: event_rx,
    })
}
