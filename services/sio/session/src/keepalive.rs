//! Heartbeat supervision: the v3 pinger and the liveness watchdog.

use crate::error::CloseReason;
use crate::session::Session;
use crate::state::SessionState;
use sio_wire::{Handshake, OutboundPacket};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Poll period while waiting for the session to connect
const IDLE_POLL: Duration = Duration::from_millis(200);

fn negotiated(session: &Session) -> Handshake {
    let header = session.header();
    if header.ping_interval > 0 {
        return header;
    }
    let (interval, timeout) = session.inner.transport.ping_params();
    Handshake {
        ping_interval: interval.as_millis() as u64,
        ping_timeout: timeout.as_millis() as u64,
        ..header
    }
}

/// Reconnect when no heartbeat evidence arrives within
/// `pingInterval + pingTimeout`; close with "ping timeout" if that fails.
pub(crate) async fn watchdog(session: Session) {
    let inner = &session.inner;

    loop {
        let state = session.state();
        if state.is_terminal() {
            break;
        }
        if state != SessionState::Connected {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(IDLE_POLL) => continue,
            }
        }

        let window = negotiated(&session).liveness_window();

        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = inner.heartbeat.notified() => continue,
            _ = tokio::time::sleep(window) => {
                if !session.is_connected() {
                    continue;
                }
                warn!("No heartbeat for {:?}, reconnecting", window);
                if let Err(e) = session.reconnect().await {
                    error!("Reconnect after heartbeat timeout failed: {}", e);
                    session.close_with(Some(CloseReason::PingTimeout)).await;
                    break;
                }
            }
        }
    }

    debug!("Heartbeat watchdog stopped");
}

/// v3 pinger: queue a ping every interval while connected
pub(crate) async fn pinger(session: Session) {
    let interval = negotiated(&session).interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = session.inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !session.is_connected() {
            break;
        }
        if session.push(OutboundPacket::Ping).await.is_err() {
            break;
        }
    }

    debug!("Pinger stopped");
}

#[cfg(test)]
mod tests {
    use super::negotiated;
    use crate::backoff::FixedBackoff;
    use crate::handlers::DISCONNECTION;
    use crate::mock::MockTransport;
    use crate::session::{SessionBuilder, SessionConfig};
    use crate::state::SessionState;
    use serde_json::Value;
    use sio_wire::ProtocolVersion;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn config() -> SessionConfig {
        SessionConfig {
            backoff: Arc::new(FixedBackoff(Duration::from_millis(10))),
            ..SessionConfig::default()
        }
    }

    async fn connect_v4(mock: &Arc<MockTransport>, session: &crate::Session, header: &str) {
        mock.push_text(header);
        assert_eq!(mock.next_written().await, "40");
        mock.push_text("40");
        mock.wait_until(|| session.is_connected()).await;
    }

    #[tokio::test]
    async fn test_window_falls_back_to_transport_params() {
        let mock = MockTransport::new(ProtocolVersion::V4, false);
        let session = SessionBuilder::new().config(config()).start(mock.clone());
        assert_eq!(negotiated(&session).liveness_window(), Duration::from_secs(45));

        connect_v4(&mock, &session, r#"0{"sid":"hb","pingInterval":1000,"pingTimeout":500}"#).await;
        assert_eq!(negotiated(&session).liveness_window(), Duration::from_millis(1500));
        assert_eq!(negotiated(&session).interval(), Duration::from_secs(1));
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_one_reconnect() {
        let mock = MockTransport::new(ProtocolVersion::V4, false);
        let session = SessionBuilder::new().config(config()).start(mock.clone());
        connect_v4(&mock, &session, r#"0{"sid":"hb","pingInterval":1000,"pingTimeout":1000}"#).await;

        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert_eq!(mock.reconnect_attempts(), 1);
        assert!(session.is_connected());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_suppresses_timeout() {
        let mock = MockTransport::new(ProtocolVersion::V4, false);
        let session = SessionBuilder::new().config(config()).start(mock.clone());
        connect_v4(&mock, &session, r#"0{"sid":"hb","pingInterval":1000,"pingTimeout":1000}"#).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        mock.push_text("2");
        assert_eq!(mock.next_written().await, "3");
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(mock.reconnect_attempts(), 0);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_failed_reconnect_closes() {
        let mock = MockTransport::new(ProtocolVersion::V4, false);
        mock.fail_reconnects(true);
        let reasons: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&reasons);
        let session = SessionBuilder::new()
            .config(config())
            .on(DISCONNECTION, move |_, args| {
                seen.lock().unwrap().extend(args);
                None
            })
            .start(mock.clone());
        connect_v4(&mock, &session, r#"0{"sid":"hb","pingInterval":1000,"pingTimeout":1000}"#).await;

        mock.wait_until(|| session.state() == SessionState::Closed).await;

        assert_eq!(mock.reconnect_attempts(), 5);
        assert_eq!(reasons.lock().unwrap()[0]["text"], "ping timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_v3_pinger_sends_pings() {
        let mock = MockTransport::new(ProtocolVersion::V3, false);
        let session = SessionBuilder::new().config(config()).start(mock.clone());
        mock.push_text(r#"0{"sid":"p","pingInterval":1000,"pingTimeout":5000}"#);
        mock.wait_until(|| session.is_connected()).await;

        assert_eq!(mock.next_written().await, "2");
        mock.push_text("3");
        assert_eq!(mock.next_written().await, "2");
        assert_eq!(mock.reconnect_attempts(), 0);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_handshake_replaces_pinger() {
        let mock = MockTransport::new(ProtocolVersion::V3, false);
        let session = SessionBuilder::new().config(config()).start(mock.clone());
        mock.push_text(r#"0{"sid":"p1","pingInterval":1000,"pingTimeout":5000}"#);
        mock.wait_until(|| session.is_connected()).await;
        mock.push_text(r#"0{"sid":"p2","pingInterval":1000,"pingTimeout":5000}"#);
        mock.wait_until(|| session.id() == "p2").await;

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let pings = mock.drain_written().into_iter().filter(|f| f == "2").count();
        assert!(pings <= 4, "expected a single pinger, saw {} pings", pings);
        session.close().await;
    }
}
