//! socket.io client binary.
//!
//! Dials a server, logs lifecycle events and inbound messages, optionally
//! emits messages or waits for an acknowledgement, then runs until Ctrl-C
//! or until the session closes.

use clap::Parser;
use serde_json::Value;
use sio_session::{SessionBuilder, CONNECTION, DISCONNECTION, ERROR, MESSAGE, RECONNECTION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod logging;
mod config;

use config::ClientConfig;
use logging::SioLogFormatter;

/// socket.io client with automatic reconnection
#[derive(Parser, Debug)]
#[command(name = "sio-client", version, about = "socket.io client with automatic reconnection")]
struct Args {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Use wss://
    #[arg(long)]
    secure: bool,

    /// engine.io protocol version (3 or 4)
    #[arg(long)]
    protocol: Option<u8>,

    /// Exchange msgpack binary frames
    #[arg(long)]
    binary: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Text to send as a "message" event once connected (repeatable)
    #[arg(long)]
    emit: Vec<String>,

    /// Event to send once connected, waiting for its acknowledgement
    #[arg(long)]
    ack: Option<String>,

    /// How long to wait for the acknowledgement, e.g. 5s
    #[arg(long, default_value = "5s")]
    ack_timeout: humantime::Duration,

    /// How long to wait for the connection, e.g. 30s
    #[arg(long, default_value = "30s")]
    connect_wait: humantime::Duration,
}

impl Args {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(protocol) = self.protocol {
            config.server.protocol = protocol;
        }
        config.server.secure |= self.secure;
        config.server.binary |= self.binary;
    }
}

fn describe(args: &[Value]) -> String {
    args.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("sio_client={}", args.log_level).parse()?)
        .add_directive(format!("sio_session={}", args.log_level).parse()?)
        .add_directive(format!("sio_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(SioLogFormatter::new("sio-client"))
        .init();

    component_info!("client", "Starting sio-client v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ClientConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    let connected = Arc::new(Notify::new());
    let closed = Arc::new(Notify::new());
    let on_connect = Arc::clone(&connected);
    let on_close = Arc::clone(&closed);

    let url = config.url();
    let session = SessionBuilder::new()
        .config(config.session_config())
        .on(CONNECTION, move |session, _| {
            component_info!("session", "Connected, sid={}", session.id());
            on_connect.notify_one();
            None
        })
        .on(RECONNECTION, |_, _| {
            component_warn!("session", "Reconnected");
            None
        })
        .on(DISCONNECTION, move |_, args| {
            component_warn!("session", "Disconnected: {}", describe(&args));
            on_close.notify_one();
            None
        })
        .on(ERROR, |_, args| {
            component_error!("session", "Server refused connection: {}", describe(&args));
            None
        })
        .on(MESSAGE, |_, args| {
            component_info!("message", "{}", describe(&args));
            None
        })
        .dial(&url, &config.connector())
        .await?;

    component_debug!("client", "Dialed {} ({:?})", url, session.protocol());

    tokio::select! {
        _ = connected.notified() => {}
        _ = closed.notified() => anyhow::bail!("session closed before connecting"),
        _ = tokio::time::sleep(Duration::from(args.connect_wait)) => {
            session.close().await;
            anyhow::bail!("not connected after {}", args.connect_wait);
        }
    }

    for text in &args.emit {
        session.emit(MESSAGE, None, vec![Value::String(text.clone())]).await?;
    }

    if let Some(method) = &args.ack {
        match session.ack(method, args.ack_timeout.into(), None, Vec::new()).await {
            Ok(reply) => component_info!("ack", "{} -> {}", method, describe(&reply)),
            Err(e) => component_error!("ack", "{} failed: {}", method, e),
        }
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            component_info!("client", "Interrupted, closing");
        }
        _ = closed.notified() => {}
    }

    session.close().await;
    let stats = session.stats();
    component_info!(
        "client",
        "Closed: {} bytes in, {} bytes out, {} ack(s) pending",
        stats.bytes_in,
        stats.bytes_out,
        stats.pending_acks
    );
    component_debug!("client", "Final state {}", serde_json::to_string(&session.state())?);
    Ok(())
}
