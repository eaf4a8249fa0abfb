//! Text-message transports for the schedule server
//!
//! `ws://` and `wss://` addresses use WebSocket text frames. `tcp://`,
//! `unix://` and bare socket paths use newline-delimited JSON framed by
//! [`ClientCodec`].

use std::path::PathBuf;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::codec::Framed;
use url::Url;

use trajsync_protocol::{encode_request, ClientCodec, Request};
use trajsync_utils::{Result, TrajsyncError};

/// Trait alias for streams that can be used with Framed
pub trait StreamTrait: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamTrait for T {}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An ordered, bidirectional text-message connection
pub enum Transport {
    /// Newline-delimited JSON over a byte stream
    Framed(Framed<Box<dyn StreamTrait>, ClientCodec>),
    /// One JSON message per WebSocket text frame
    WebSocket(Box<WsStream>),
}

impl Transport {
    /// Connect to an address URL
    pub async fn connect(addr: &str) -> Result<Self> {
        if addr.starts_with("ws://") || addr.starts_with("wss://") {
            let (ws, _) = tokio_tungstenite::connect_async(addr).await.map_err(|e| {
                TrajsyncError::connection(format!("Failed to connect to {}: {}", addr, e))
            })?;
            tracing::debug!(addr = %addr, "WebSocket handshake complete");
            return Ok(Transport::WebSocket(Box::new(ws)));
        }

        let stream: Box<dyn StreamTrait> = if addr.starts_with("tcp://") {
            let url = Url::parse(addr).map_err(|e| {
                TrajsyncError::connection(format!("Invalid TCP URL '{}': {}", addr, e))
            })?;

            let host = url
                .host_str()
                .ok_or_else(|| TrajsyncError::connection("Missing host in TCP URL"))?;
            let port = url
                .port()
                .ok_or_else(|| TrajsyncError::connection("Missing port in TCP URL"))?;

            let tcp_addr = format!("{}:{}", host, port);
            let tcp_stream = TcpStream::connect(&tcp_addr).await.map_err(|e| {
                TrajsyncError::connection(format!("Failed to connect to {}: {}", tcp_addr, e))
            })?;

            Box::new(tcp_stream)
        } else {
            // Assume Unix socket (either unix:// prefix or raw path)
            let path_str = if addr.starts_with("unix://") {
                let url = Url::parse(addr)
                    .map_err(|e| TrajsyncError::connection(format!("Invalid Unix URL: {}", e)))?;
                url.path().to_string()
            } else {
                addr.to_string()
            };

            let path = PathBuf::from(path_str);
            let unix_stream = UnixStream::connect(&path).await.map_err(|e| {
                TrajsyncError::connection(format!("Failed to connect to {}: {}", path.display(), e))
            })?;

            Box::new(unix_stream)
        };

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected byte stream
    pub fn from_stream(stream: Box<dyn StreamTrait>) -> Self {
        Transport::Framed(Framed::new(stream, ClientCodec::new()))
    }

    /// Send one request
    pub async fn send(&mut self, request: Request) -> Result<()> {
        match self {
            Transport::Framed(framed) => framed
                .send(request)
                .await
                .map_err(|e| TrajsyncError::connection(format!("Failed to send: {}", e))),
            Transport::WebSocket(ws) => {
                let text = encode_request(&request)
                    .map_err(|e| TrajsyncError::connection(format!("Failed to send: {}", e)))?;
                ws.send(Message::Text(text))
                    .await
                    .map_err(|e| TrajsyncError::connection(format!("Failed to send: {}", e)))
            }
        }
    }

    /// Receive the next inbound message
    ///
    /// Returns `None` once the peer has closed the connection. Cancel safe.
    pub async fn recv(&mut self) -> Option<Result<String>> {
        match self {
            Transport::Framed(framed) => framed.next().await.map(|result| {
                result.map_err(|e| TrajsyncError::connection(format!("Failed to receive: {}", e)))
            }),
            Transport::WebSocket(ws) => loop {
                match ws.next().await? {
                    Ok(Message::Text(text)) => return Some(Ok(text)),
                    Ok(Message::Binary(data)) => {
                        return Some(String::from_utf8(data).map_err(|_| {
                            TrajsyncError::invalid_message("binary frame is not valid UTF-8")
                        }))
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "WebSocket closed by server");
                        return None;
                    }
                    // Ping/pong are answered by tungstenite itself
                    Ok(_) => continue,
                    Err(e) => {
                        return Some(Err(TrajsyncError::connection(format!(
                            "Failed to receive: {}",
                            e
                        ))))
                    }
                }
            },
        }
    }

    /// Release the underlying connection
    pub async fn close(&mut self) {
        let result = match self {
            Transport::Framed(framed) => SinkExt::<Request>::close(framed)
                .await
                .map_err(|e| e.to_string()),
            Transport::WebSocket(ws) => WebSocketStream::close(&mut **ws, None)
                .await
                .map_err(|e| e.to_string()),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Error while closing transport");
        }
    }
}
