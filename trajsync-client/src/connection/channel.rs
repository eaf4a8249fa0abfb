//! Request/response correlation over a single socket
//!
//! The schedule server answers each request with exactly one message and
//! carries no request id, so a response can only be paired with its request
//! by position. The channel therefore keeps at most one request on the
//! wire: calls are queued and the connection task sends the next one only
//! after the previous response has been received.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

use trajsync_protocol::{Request, RequestKind, Response, ResponseHeader};
use trajsync_utils::{Result, TrajsyncError};

use super::transport::Transport;

/// Default time allowed for the connection handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for the server to answer one request
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Closed,
}

/// Tunables for a channel
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    /// Number of calls that may wait behind the in-flight one
    pub queue_capacity: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            queue_capacity: 100,
        }
    }
}

/// A queued call and the slot its result is delivered to
struct PendingCall {
    request: Request,
    reply: oneshot::Sender<Result<Response>>,
}

struct Shared {
    addr: String,
    calls: mpsc::Sender<PendingCall>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
}

/// Handle to a correlated request/response connection
///
/// Clones share the same connection and queue.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    /// Connect with default options
    pub async fn open(addr: &str) -> Result<Self> {
        Self::open_with(addr, ChannelOptions::default()).await
    }

    /// Connect to `addr`, failing if the handshake does not complete in time
    pub async fn open_with(addr: &str, options: ChannelOptions) -> Result<Self> {
        let transport = match timeout(options.connect_timeout, Transport::connect(addr)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TrajsyncError::ConnectionTimeout {
                    millis: options.connect_timeout.as_millis() as u64,
                })
            }
        };

        tracing::info!(addr = %addr, "Connected to schedule server");
        Ok(Self::from_transport(addr, transport, options))
    }

    /// Start a channel over an established transport
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_transport(addr: &str, transport: Transport, options: ChannelOptions) -> Self {
        let (calls_tx, calls_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            addr: addr.to_string(),
            calls: calls_tx,
            state: state_tx,
            shutdown: shutdown_tx,
        });

        tokio::spawn(connection_task(
            transport,
            calls_rx,
            shutdown_rx,
            Arc::downgrade(&shared),
            options.response_timeout,
        ));

        Self { shared }
    }

    /// Address this channel was opened with
    pub fn addr(&self) -> &str {
        &self.shared.addr
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Wait until the channel has closed
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        // The sender lives in `shared`, so this only ends on Closed
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Send a request and wait for its response
    ///
    /// Calls made while another is in flight wait their turn. Fails with
    /// [`TrajsyncError::Protocol`] when the response answers a different
    /// kind of request, and with [`TrajsyncError::ChannelClosed`] when the
    /// channel is torn down before the response arrives.
    pub async fn call(&self, request: Request) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared
            .calls
            .send(PendingCall {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TrajsyncError::ChannelClosed)?;

        reply_rx.await.map_err(|_| TrajsyncError::ChannelClosed)?
    }

    /// Tear down the channel
    ///
    /// Fails the in-flight call and every queued call with
    /// [`TrajsyncError::ChannelClosed`] and releases the connection.
    pub async fn close(&self) {
        self.shared.shutdown.send_replace(true);
        self.closed().await;
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("addr", &self.shared.addr)
            .field("state", &self.state())
            .finish()
    }
}

/// Check the tag of an inbound message against the outstanding request and
/// decode it
fn match_response(kind: RequestKind, text: &str) -> Result<Response> {
    let header: ResponseHeader = serde_json::from_str(text)
        .map_err(|e| TrajsyncError::invalid_message(format!("undecodable response: {}", e)))?;

    if !header.answers(kind) {
        tracing::warn!(
            expected = %kind,
            received = %header.response,
            "Received response for wrong request"
        );
        return Err(TrajsyncError::protocol("response/request tag mismatch"));
    }

    serde_json::from_str(text)
        .map_err(|e| TrajsyncError::invalid_message(format!("malformed {} response: {}", kind, e)))
}

/// Background task that owns the socket and serializes calls
async fn connection_task(
    mut transport: Transport,
    mut calls: mpsc::Receiver<PendingCall>,
    mut shutdown: watch::Receiver<bool>,
    shared: std::sync::Weak<Shared>,
    response_timeout: Duration,
) {
    loop {
        let call = tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            next = calls.recv() => match next {
                Some(call) => call,
                // Every handle dropped
                None => break,
            },

            inbound = transport.recv() => match inbound {
                Some(Ok(text)) => {
                    tracing::warn!(len = text.len(), "Dropping unsolicited message");
                    continue;
                }
                Some(Err(TrajsyncError::InvalidMessage(e))) => {
                    tracing::warn!(error = %e, "Dropping unsolicited invalid message");
                    continue;
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Connection failed while idle");
                    break;
                }
                None => {
                    tracing::info!("Server closed connection");
                    break;
                }
            },
        };

        if call.reply.is_closed() {
            tracing::debug!(request = %call.request.kind(), "Caller gone before send, skipping");
            continue;
        }

        let kind = call.request.kind();
        if let Err(e) = transport.send(call.request).await {
            tracing::error!(error = %e, "Failed to send request");
            let _ = call.reply.send(Err(e));
            break;
        }
        tracing::debug!(request = %kind, "Request sent, awaiting response");

        let inbound = tokio::select! {
            biased;

            _ = shutdown.changed() => {
                let _ = call.reply.send(Err(TrajsyncError::ChannelClosed));
                break;
            }

            inbound = timeout(response_timeout, transport.recv()) => inbound,
        };

        match inbound {
            Ok(Some(Ok(text))) => {
                let _ = call.reply.send(match_response(kind, &text));
            }
            Ok(Some(Err(e @ TrajsyncError::InvalidMessage(_)))) => {
                let _ = call.reply.send(Err(e));
            }
            Ok(Some(Err(e))) => {
                tracing::error!(error = %e, "Failed to receive response");
                let _ = call.reply.send(Err(e));
                break;
            }
            Ok(None) => {
                tracing::info!("Server closed connection with a request in flight");
                let _ = call.reply.send(Err(TrajsyncError::ChannelClosed));
                break;
            }
            Err(_) => {
                // A late answer would be paired with the next request
                tracing::warn!(request = %kind, "Response timed out, closing channel");
                let _ = call.reply.send(Err(TrajsyncError::ConnectionTimeout {
                    millis: response_timeout.as_millis() as u64,
                }));
                break;
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.state.send_replace(ConnectionState::Closed);
    }

    calls.close();
    let mut failed = 0usize;
    while let Some(call) = calls.recv().await {
        let _ = call.reply.send(Err(TrajsyncError::ChannelClosed));
        failed += 1;
    }
    if failed > 0 {
        tracing::debug!(failed, "Failed queued calls on teardown");
    }

    transport.close().await;
    tracing::info!("Channel closed");
}
