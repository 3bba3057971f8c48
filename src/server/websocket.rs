//! WebSocket server implementation
//!
//! Accepts TCP connections, upgrades them to WebSocket sessions and wires
//! each session into the relay: connect on accept, one inbound call per text
//! frame in arrival order, disconnect on close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::relay::{ClientHandle, Relay};

/// How long a closing session may spend flushing queued frames
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for every session task to finish
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket server feeding chat sessions into the relay
pub struct WebSocketServer {
    config: Arc<RelayConfig>,
    relay: Arc<Relay>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server with a fresh relay
    pub fn new(config: RelayConfig) -> Self {
        Self::with_relay(config, Arc::new(Relay::new()))
    }

    /// Create a server around an existing relay
    pub fn with_relay(config: RelayConfig, relay: Arc<Relay>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            relay,
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("WebSocket relay listening on ws://{}", addr);

        self.serve(listener).await
    }

    /// Serve sessions from an already bound listener until shutdown
    ///
    /// Returns once every session has closed and deregistered, or once
    /// `SHUTDOWN_TIMEOUT` expires and the stragglers are aborted.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let relay = Arc::clone(&self.relay);
                            let config = Arc::clone(&self.config);
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            sessions.spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, relay, config, shutdown_rx).await {
                                    warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Reap finished sessions
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        if !sessions.is_empty() {
            info!("Closing {} active sessions...", sessions.len());
        }

        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} sessions still open after {:?}, aborting them",
                sessions.len(),
                SHUTDOWN_TIMEOUT
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        info!(
            "All sessions closed ({} connections registered)",
            self.relay.connection_count().await
        );
        Ok(())
    }
}

/// Apply origin policy and subprotocol selection to an upgrade request
fn negotiate(
    config: &RelayConfig,
    request: &Request,
    mut response: Response,
) -> Result<Response, ErrorResponse> {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    if !config.origin_allowed(origin) {
        info!("Connection from origin {:?} rejected", origin);
        let mut rejection = ErrorResponse::new(Some("Origin not allowed".to_string()));
        *rejection.status_mut() = StatusCode::FORBIDDEN;
        return Err(rejection);
    }

    if let Some(wanted) = config.subprotocol.as_deref() {
        let offered = request
            .headers()
            .get_all(header::SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|protocol| protocol.trim() == wanted);

        if offered {
            if let Ok(value) = HeaderValue::from_str(wanted) {
                response
                    .headers_mut()
                    .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
            }
        }
    }

    Ok(response)
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<Relay>,
    config: Arc<RelayConfig>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    debug!("Handling request from {}", peer_addr);

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);

    let ws_stream = accept_hdr_async_with_config(
        stream,
        |request: &Request, response: Response| negotiate(&config, request, response),
        Some(ws_config),
    )
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (handle, mut outbound_rx) = ClientHandle::channel(config.outbound_capacity);
    let id = relay.connect(handle.clone()).await;
    info!("Connection {} accepted from {}", id, peer_addr);

    // Drains this client's queue so slow sockets only stall themselves
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let closing = matches!(frame, Message::Close(_));
            if let Err(e) = ws_sender.send(frame).await {
                debug!("Write to connection {} failed: {}", id, e);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received message from {}: {}", id, text);
                        relay.inbound(id, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Received binary message from {} ({} bytes), ignoring", id, data.len());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = handle.push(Message::Pong(data));
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} requested close", id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", id, e);
                        break;
                    }
                    None => {
                        info!("Connection closed by {}", id);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, closing connection {}", id);
                let _ = handle.push(Message::Close(None));
                break;
            }
        }
    }

    relay.disconnect(id).await;
    drop(handle);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!("Connection {} did not drain in time, dropping it", id);
        writer.abort();
    }

    info!("Peer {} disconnected", peer_addr);
    Ok(())
}
