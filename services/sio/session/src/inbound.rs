//! Inbound loop: reads, classifies and routes packets from the transport.

use crate::error::{CloseReason, TransportError};
use crate::handlers::{CONNECTION, ERROR, MESSAGE};
use crate::keepalive;
use crate::session::Session;
use crate::state::SessionState;
use serde_json::Value;
use sio_wire::{classify, decode_packet, Handshake, Inbound, OutboundPacket, Packet, PacketType, ProtocolVersion};
use tracing::{debug, error, info, warn};

/// Run until the session closes or the transport is closed locally
pub(crate) async fn run(session: Session) {
    let inner = &session.inner;
    debug!("Inbound loop started");

    loop {
        if session.state().is_terminal() {
            break;
        }
        if !session.is_connected() {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(inner.config.read_throttle) => {}
            }
        }

        let read = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            read = inner.transport.read() => read,
        };

        let message = match read {
            Ok(message) => message,
            Err(e) => {
                if handle_read_error(&session, e).await {
                    continue;
                }
                break;
            }
        };

        if !route(&session, &message).await {
            break;
        }
    }

    debug!("Inbound loop stopped");
}

/// Returns whether the loop should keep reading
async fn handle_read_error(session: &Session, err: TransportError) -> bool {
    match err {
        TransportError::ConnectionClosed => {
            debug!("Transport closed locally, inbound loop exiting");
            false
        }
        e if e.is_abnormal_close() => {
            warn!("Abnormal transport close: {}", e);
            match session.reconnect().await {
                Ok(()) => true,
                Err(reconnect) => {
                    error!("Reconnect failed: {}", reconnect);
                    session.close_with(Some(CloseReason::from(&e))).await;
                    false
                }
            }
        }
        e => {
            error!("Transport read failed: {}", e);
            session.close_with(Some(CloseReason::from(&e))).await;
            false
        }
    }
}

/// Returns whether the loop should keep reading
async fn route(session: &Session, message: &[u8]) -> bool {
    let classified = match classify(message) {
        Ok(classified) => classified,
        Err(e) => {
            debug!("Ignoring inbound message: {}", e);
            return true;
        }
    };

    match classified {
        Inbound::Open(body) => handle_open(session, body).await,
        Inbound::Close => {
            info!("Server sent close notice");
            if let Err(e) = session.reconnect().await {
                warn!("Reconnect after close notice failed: {}", e);
                session.close_with(None).await;
                return false;
            }
            true
        }
        Inbound::Ping => {
            session.inner.heartbeat.notify_one();
            // v4: the server pings, the client answers
            let _ = session.push(OutboundPacket::Pong).await;
            true
        }
        Inbound::Pong => {
            session.inner.heartbeat.notify_one();
            true
        }
        Inbound::Upgrade | Inbound::Noop => true,
        Inbound::Message(payload) | Inbound::Raw(payload) => {
            let binary = session.binary_message() || matches!(classified, Inbound::Raw(_));
            let payload = payload.to_vec();
            let session = session.clone();
            // Dispatch is concurrent; handlers may observe packets out of order
            tokio::spawn(async move { process_message(&session, &payload, binary).await });
            true
        }
    }
}

async fn handle_open(session: &Session, body: &[u8]) -> bool {
    let header = match Handshake::parse(body) {
        Ok(header) => header,
        Err(e) => {
            error!("Malformed open packet: {}", e);
            session.close_with(Some(CloseReason::ParseOpenMsg(e.to_string()))).await;
            return false;
        }
    };
    info!(
        "Handshake sid={} interval={}ms timeout={}ms",
        header.sid, header.ping_interval, header.ping_timeout
    );
    session.set_header(header);
    session.inner.heartbeat.notify_one();

    match session.protocol() {
        ProtocolVersion::V3 => {
            mark_connected(session);
            // v3: the client pings, the server answers
            session.replace_pinger(tokio::spawn(keepalive::pinger(session.clone())));
        }
        ProtocolVersion::V4 => {
            let _ = session.push(OutboundPacket::Connect).await;
        }
    }
    true
}

fn mark_connected(session: &Session) {
    if session.inner.state.transition(SessionState::Connecting, SessionState::Connected)
        || session.is_connected()
    {
        info!("Session {} connected", session.id());
        session.fire(CONNECTION, Vec::new());
    }
}

/// Decode one socket.io packet and act on it
pub(crate) async fn process_message(session: &Session, payload: &[u8], binary: bool) {
    let packet = match decode_packet(payload, binary) {
        Ok(packet) => packet,
        Err(e) => {
            error!("Undecodable packet: {}", e);
            session.close_with(Some(CloseReason::Transport(e.to_string()))).await;
            return;
        }
    };
    if !packet.is_default_nsp() {
        debug!("Ignoring packet for namespace {}", packet.nsp);
        return;
    }

    match packet.kind {
        PacketType::Connect => match session.protocol() {
            ProtocolVersion::V4 => mark_connected(session),
            ProtocolVersion::V3 => debug!("Namespace connect acknowledged"),
        },
        PacketType::Disconnect => {
            info!("Server disconnected the namespace");
            session.close_with(Some(CloseReason::ServerDisconnect)).await;
        }
        PacketType::Event | PacketType::BinaryEvent => dispatch_event(session, packet).await,
        PacketType::Ack | PacketType::BinaryAck => match packet.id {
            Some(id) => {
                if !session.inner.acks.resolve(id, packet.args()) {
                    debug!("Late or unknown ack {}", id);
                }
            }
            None => warn!("Ack packet without id"),
        },
        PacketType::ConnectError => {
            warn!("Namespace connect refused: {:?}", packet.data);
            session.fire(ERROR, packet.args());
        }
    }
}

async fn dispatch_event(session: &Session, packet: Packet) {
    let Some(method) = packet.event_name().map(str::to_string) else {
        warn!("Event packet without a method name");
        return;
    };

    let reply = if session.inner.handlers.contains(&method) {
        session.fire(&method, packet.args())
    } else {
        let mut full = vec![Value::String(method.clone())];
        full.extend(packet.args());
        session.fire(MESSAGE, full)
    };

    if let (Some(id), Some(args)) = (packet.id, reply) {
        debug!("Acknowledging '{}' with id {}", method, id);
        let ack = OutboundPacket::Packet {
            packet: Packet::ack(id, args),
            priority: false,
        };
        if let Err(e) = session.push(ack).await {
            warn!("Failed to queue ack {}: {}", id, e);
        }
    }
}
