// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! WebSocket server for status queries and arm/disarm commands

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{ClientRequest, StreamingConfig};
use crate::core::{CommandOutcome, Controller, Event};
use crate::error::Result;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket status server
pub struct StatusServer {
    listener: TcpListener,
    controller: Controller,
    max_clients: usize,
    connections: Arc<AtomicUsize>,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
}

/// One accepted connection, counted from accept until the handler exits
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(connections: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(connections.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct ClientHandle {
    addr: SocketAddr,
    subscribed: bool,
}

impl StatusServer {
    /// Bind the listener so port conflicts surface at startup
    pub async fn bind(config: &StreamingConfig, controller: Controller) -> Result<Self> {
        let listener = TcpListener::bind(config.socket_addr()).await?;
        info!("Status server listening on ws://{}", listener.local_addr()?);

        Ok(Self {
            listener,
            controller,
            max_clients: config.max_clients,
            connections: Arc::new(AtomicUsize::new(0)),
            clients: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Open connections, including ones still handshaking
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let Some(slot) = ConnectionSlot::acquire(&self.connections, self.max_clients) else {
                                warn!("Max clients reached, rejecting connection from {}", addr);
                                continue;
                            };

                            tokio::spawn(handle_connection(
                                slot,
                                stream,
                                addr,
                                self.controller.clone(),
                                self.clients.clone(),
                                shutdown.resubscribe(),
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Status server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Build the reply for one request
fn respond(controller: &Controller, request: &ClientRequest, subscribed: &mut bool) -> serde_json::Value {
    match request {
        ClientRequest::Status => json!({
            "type": "status",
            "data": controller.status(),
        }),
        ClientRequest::Arm => command_reply("arm", controller.arm()),
        ClientRequest::Disarm => command_reply("disarm", controller.disarm()),
        ClientRequest::ClearAlarm => command_reply("clear_alarm", controller.clear_alarm()),
        ClientRequest::Ping => json!({"type": "pong"}),
        ClientRequest::Subscribe => {
            *subscribed = true;
            json!({"type": "subscribed"})
        }
        ClientRequest::Unsubscribe => {
            *subscribed = false;
            json!({"type": "unsubscribed"})
        }
        ClientRequest::Snapshot => snapshot_reply(controller),
        ClientRequest::Alerts { limit } => json!({
            "type": "alerts",
            "data": controller.recent_alerts(*limit),
        }),
    }
}

fn command_reply(command: &str, result: Result<CommandOutcome>) -> serde_json::Value {
    match result {
        Ok(outcome) => json!({
            "type": "command",
            "command": command,
            "changed": outcome.changed(),
            "state": outcome.state(),
        }),
        Err(e) => json!({
            "type": "error",
            "command": command,
            "message": e.to_string(),
        }),
    }
}

fn snapshot_reply(controller: &Controller) -> serde_json::Value {
    let encode = |bytes: Vec<u8>| base64::engine::general_purpose::STANDARD.encode(bytes);

    if let Some(frame) = controller.live_frame() {
        return json!({
            "type": "snapshot",
            "source": "live",
            "sequence": frame.sequence(),
            "captured_at": frame.captured_at(),
            "width": frame.width(),
            "height": frame.height(),
            "format": "pgm",
            "data": encode(frame.to_pgm()),
        });
    }

    let stored = controller
        .latest_snapshot()
        .and_then(|latest| match latest {
            Some(snapshot) => Ok(Some((std::fs::read(&snapshot.path)?, snapshot))),
            None => Ok(None),
        });
    match stored {
        Ok(Some((bytes, snapshot))) => json!({
            "type": "snapshot",
            "source": "alert",
            "name": snapshot.name,
            "captured_at": snapshot.modified,
            "format": "pgm",
            "data": encode(bytes),
        }),
        Ok(None) => json!({
            "type": "error",
            "command": "snapshot",
            "message": "no frame available",
        }),
        Err(e) => json!({
            "type": "error",
            "command": "snapshot",
            "message": e.to_string(),
        }),
    }
}

fn event_message(event: &Event) -> serde_json::Value {
    json!({
        "type": "event",
        "data": event,
    })
}

async fn handle_connection(
    _slot: ConnectionSlot,
    stream: TcpStream,
    addr: SocketAddr,
    controller: Controller,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let client_id = uuid::Uuid::new_v4().to_string();

    let ws_stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, accept_async(stream)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!("WebSocket handshake from {} timed out", addr);
            return;
        }
    };

    info!("New status connection from {} (id: {})", addr, client_id);

    clients.write().await.insert(
        client_id.clone(),
        ClientHandle {
            addr,
            subscribed: false,
        },
    );

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut events = controller.subscribe_events();
    let mut subscribed = false;

    let welcome = json!({
        "type": "welcome",
        "client_id": client_id,
        "server": "homeguard",
        "version": env!("CARGO_PKG_VERSION"),
        "state": controller.current_state(),
    });

    if let Err(e) = ws_sender.send(Message::Text(welcome.to_string())).await {
        warn!("Failed to send welcome: {}", e);
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from {}: {}", addr, text);

                        let reply = match serde_json::from_str::<ClientRequest>(&text) {
                            Ok(request) => {
                                let reply = respond(&controller, &request, &mut subscribed);
                                if matches!(request, ClientRequest::Subscribe | ClientRequest::Unsubscribe) {
                                    if let Some(client) = clients.write().await.get_mut(&client_id) {
                                        client.subscribed = subscribed;
                                    }
                                }
                                reply
                            }
                            Err(e) => json!({"type": "error", "message": format!("invalid request: {}", e)}),
                        };

                        if let Err(e) = ws_sender.send(Message::Text(reply.to_string())).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Status connection closed by client {}", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) if subscribed => {
                        if let Err(e) = ws_sender.send(Message::Text(event_message(&event).to_string())).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} lagged, skipped {} events", addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = shutdown.recv() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    if let Some(client) = clients.write().await.remove(&client_id) {
        info!("Status client {} disconnected", client.addr);
    }
}
