/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::{EventSink, ResumeParams, Transport, TransportEvent, TransportHandle, close_code};
use crate::utils::ChannelError;

/// WebSocket transport built on `tokio-tungstenite`.
///
/// Resumption metadata travels as query parameters on the connection URL
/// (`client_id`, `session_id`, `last_message_seq`). `http`/`https` targets are
/// rewritten to `ws`/`wss`.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Creates a new WebSocket transport.
    pub fn new() -> Self {
        Self
    }
}

/// Builds the connection URL for `target` with the resumption parameters appended.
pub(crate) fn build_url(target: &str, resume: &ResumeParams) -> Result<Url, ChannelError> {
    let mut url = Url::parse(target).map_err(|e| {
        ChannelError::TransportUnavailable(format!("invalid target '{target}': {e}"))
    })?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(ChannelError::TransportUnavailable(format!(
                "unsupported scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        ChannelError::TransportUnavailable(format!("cannot use scheme '{scheme}' for '{target}'"))
    })?;

    let encoded =
        serde_urlencoded::to_string(resume).map_err(|e| ChannelError::Codec(e.to_string()))?;
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
        _ => encoded,
    };
    url.set_query(Some(&query));
    Ok(url)
}

impl Transport for WebSocketTransport {
    fn open(
        &self,
        target: &str,
        resume: &ResumeParams,
        sink: EventSink,
    ) -> BoxFuture<'static, Result<Box<dyn TransportHandle>, ChannelError>> {
        let url = match build_url(target, resume) {
            Ok(url) => url,
            Err(e) => return futures_util::future::ready(Err(e)).boxed(),
        };

        async move {
            debug!("Opening WebSocket connection to {}", url);
            let (ws_stream, _response) = connect_async(url.to_string())
                .await
                .map_err(|e| ChannelError::TransportUnavailable(e.to_string()))?;
            info!("WebSocket connection established (attempt {})", sink.attempt());

            let (mut write, mut read) = ws_stream.split();
            let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

            tokio::spawn(async move {
                while let Some(message) = outbound_rx.recv().await {
                    let is_close = matches!(message, Message::Close(_));
                    if let Err(e) = write.send(message).await {
                        warn!("WebSocket write failed: {}", e);
                        break;
                    }
                    if is_close {
                        break;
                    }
                }
                let _ = write.close().await;
                debug!("WebSocket writer stopped");
            });

            tokio::spawn(async move {
                let mut reported = false;
                while let Some(frame) = read.next().await {
                    let delivered = match frame {
                        Ok(Message::Text(text)) => sink.emit(TransportEvent::MessageReceived(
                            text.as_str().as_bytes().to_vec(),
                        )),
                        Ok(Message::Binary(bytes)) => {
                            sink.emit(TransportEvent::MessageReceived(bytes.to_vec()))
                        }
                        Ok(Message::Close(frame)) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                                .unwrap_or((close_code::NORMAL, String::new()));
                            sink.emit(TransportEvent::Closed { code, reason });
                            reported = true;
                            break;
                        }
                        // Control frames are answered by tungstenite itself.
                        Ok(_) => true,
                        Err(e) => {
                            sink.emit(TransportEvent::Errored(e.to_string()));
                            reported = true;
                            break;
                        }
                    };
                    if !delivered {
                        debug!("Event sink closed, stopping WebSocket reader");
                        reported = true;
                        break;
                    }
                }
                if !reported {
                    sink.emit(TransportEvent::Closed {
                        code: close_code::ABNORMAL,
                        reason: "stream ended without close frame".to_string(),
                    });
                }
            });

            let handle: Box<dyn TransportHandle> = Box::new(WebSocketHandle {
                outbound,
                closed: false,
            });
            Ok::<_, ChannelError>(handle)
        }
        .boxed()
    }
}

struct WebSocketHandle {
    outbound: mpsc::UnboundedSender<Message>,
    closed: bool,
}

impl TransportHandle for WebSocketHandle {
    fn send(&mut self, bytes: Vec<u8>) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::SendFailed("connection closed".to_string()));
        }
        let message = match String::from_utf8(bytes) {
            Ok(text) => Message::text(text),
            Err(e) => Message::binary(e.into_bytes()),
        };
        self.outbound
            .send(message)
            .map_err(|_| ChannelError::SendFailed("writer task ended".to_string()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = self.outbound.send(Message::Close(Some(frame)));
    }
}
