//! Outbound loop: drains the queue into the transport in submission order.

use crate::error::CloseReason;
use crate::session::Session;
use sio_wire::{encode_outbound, OutboundPacket};
use std::collections::VecDeque;
use tracing::{debug, error, warn};

/// Run until the session closes
pub(crate) async fn run(session: Session) {
    let inner = &session.inner;
    let protocol = session.protocol();
    let binary = session.binary_message();
    let overflow_at = inner.queue.capacity().saturating_sub(1).max(1);
    let mut buffer: VecDeque<OutboundPacket> = VecDeque::new();
    debug!("Outbound loop started");

    loop {
        if session.state().is_terminal() {
            break;
        }

        let popped = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            packet = inner.queue.pop() => match packet {
                Some(packet) => Some(packet),
                None => break,
            },
            // retry a retained buffer even when nothing new arrives
            _ = tokio::time::sleep(inner.config.write_pause), if !buffer.is_empty() => None,
        };

        match popped {
            Some(OutboundPacket::Close) => {
                session.close_with(None).await;
                break;
            }
            Some(packet) if packet.is_bypass() => {
                let written = match encode_outbound(&packet, protocol, binary) {
                    Ok(frame) => inner.transport.write(frame).await.map_err(|e| CloseReason::from(&e)),
                    Err(e) => Err(CloseReason::Transport(e.to_string())),
                };
                if let Err(reason) = written {
                    error!("Failed to write {:?}: {}", packet, reason);
                    session.close_with(Some(reason)).await;
                    break;
                }
                continue;
            }
            Some(packet) => buffer.push_back(packet),
            None => {}
        }

        if buffer.len() >= overflow_at {
            error!("Outbound buffer reached {} packets", buffer.len());
            session.close_with(Some(CloseReason::QueueOverflow)).await;
            break;
        }

        if !session.is_connected() {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(inner.config.write_pause) => {}
            }
            continue;
        }

        flush(&session, &mut buffer, protocol, binary).await;
    }

    debug!("Outbound loop stopped, {} packet(s) unsent", buffer.len());
}

/// Write buffered packets in order, stopping at the first failure
async fn flush(
    session: &Session,
    buffer: &mut VecDeque<OutboundPacket>,
    protocol: sio_wire::ProtocolVersion,
    binary: bool,
) {
    while let Some(packet) = buffer.front() {
        let frame = match encode_outbound(packet, protocol, binary) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Dropping unencodable packet: {}", e);
                buffer.pop_front();
                continue;
            }
        };

        match session.inner.transport.write(frame).await {
            Ok(()) => {
                buffer.pop_front();
            }
            Err(e) => {
                warn!("Write failed, retaining {} packet(s): {}", buffer.len(), e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backoff::FixedBackoff;
    use crate::handlers::DISCONNECTION;
    use crate::mock::MockTransport;
    use crate::session::{SessionBuilder, SessionConfig};
    use crate::state::SessionState;
    use serde_json::{json, Value};
    use sio_wire::{OutboundPacket, ProtocolVersion};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn config(capacity: usize) -> SessionConfig {
        SessionConfig {
            queue_capacity: capacity,
            push_timeout: Duration::from_secs(1),
            backoff: Arc::new(FixedBackoff(Duration::from_millis(10))),
            ..SessionConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_while_connecting() {
        let mock = MockTransport::new(ProtocolVersion::V3, false);
        let reasons: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&reasons);
        let session = SessionBuilder::new()
            .config(config(4))
            .on(DISCONNECTION, move |_, args| {
                seen.lock().unwrap().extend(args);
                None
            })
            .start(mock.clone());

        let mut senders = Vec::new();
        for i in 0..8 {
            let s = session.clone();
            senders.push(tokio::spawn(async move { s.emit("fill", None, vec![json!(i)]).await }));
        }
        mock.wait_until(|| session.state() == SessionState::Closed).await;
        for sender in senders {
            let _ = sender.await.unwrap();
        }

        let reasons = reasons.lock().unwrap();
        assert_eq!(reasons.len(), 1);
        assert_eq!(reasons[0]["code"], 103);
        assert_eq!(reasons[0]["text"], "socket overflood");
        assert_eq!(mock.written_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_retains_order() {
        let mock = MockTransport::new(ProtocolVersion::V3, false);
        let session = SessionBuilder::new().config(config(64)).start(mock.clone());
        mock.push_text(r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#);
        mock.wait_until(|| session.is_connected()).await;

        mock.fail_writes(true);
        for i in 0..3 {
            session.emit("retry", None, vec![json!(i)]).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(mock.written_count(), 0);

        mock.fail_writes(false);
        for i in 0..3 {
            assert_eq!(mock.next_written_except_ping().await, format!(r#"42["retry",{}]"#, i));
        }
        session.close().await;
    }

    #[tokio::test]
    async fn test_buffered_until_connected() {
        let mock = MockTransport::new(ProtocolVersion::V3, false);
        let session = SessionBuilder::new().config(config(64)).start(mock.clone());

        session.emit("early", None, Vec::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(mock.written_count(), 0);

        mock.push_text(r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#);
        assert_eq!(mock.next_written_except_ping().await, r#"42["early"]"#);
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_signal_closes_session() {
        let mock = MockTransport::new(ProtocolVersion::V4, false);
        let session = SessionBuilder::new().config(config(64)).start(mock.clone());

        session.push(OutboundPacket::Close).await.unwrap();
        mock.wait_until(|| session.state() == SessionState::Closed).await;
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn test_priority_keeps_queue_position() {
        let mock = MockTransport::new(ProtocolVersion::V3, false);
        let session = SessionBuilder::new().config(config(64)).start(mock.clone());
        mock.push_text(r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#);
        mock.wait_until(|| session.is_connected()).await;

        let urgent = Some(crate::session::MessageContext { priority: true });
        session.emit("first", None, Vec::new()).await.unwrap();
        session.emit("second", urgent, Vec::new()).await.unwrap();

        assert_eq!(mock.next_written_except_ping().await, r#"42["first"]"#);
        let frame = mock.next_frame_except_ping().await;
        assert!(frame.priority);
        assert_eq!(frame.as_text(), Some(r#"42["second"]"#));
        session.close().await;
    }
}
