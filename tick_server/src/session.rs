//! Per-connection session lifecycle.
//!
//! One session per accepted TCP connection: a reader loop (this thread) that
//! decodes line-framed client frames and mutates the registry, and a writer
//! thread that serializes outbound frames and emits heartbeats on its own
//! independent cadence. The heartbeat signals transport liveness only; it
//! says nothing about data freshness.
//!
//! Error discipline follows the protocol taxonomy: a malformed or
//! out-of-bounds frame is answered with an `error` frame and the session
//! stays open with its registry state untouched. Only a transport failure
//! (EOF, read/write error) closes the session, and every close path funnels
//! through the same cleanup that erases the registry entry and outbound
//! sink exactly once.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded, select};
use log::{debug, error, info, warn};
use tick_common::Result;
use tick_common::StreamError;
use tick_common::protocol::{ClientMessage, ServerMessage, StatusKind, decode_frame, encode_frame};

use crate::registry::{ConnectionId, SubscriptionRegistry};
use crate::scheduler::OutboundSinks;

/// Outbound frame buffer per connection. When full, the scheduler drops that
/// connection's batch for the cycle instead of blocking.
pub const OUTBOUND_BUFFER: usize = 64;

/// Run one connection's session to completion.
///
/// Blocks on the reader loop; cleanup (sink removal, registry erase, socket
/// shutdown) runs on every exit path, including abnormal ones.
pub fn handle_connection(
    id: ConnectionId,
    stream: TcpStream,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    sinks: Arc<OutboundSinks>,
    heartbeat_interval: Duration,
) -> Result<()> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    info!("connection {} open from {}", id, peer);

    let (outbound_tx, outbound_rx) = bounded::<ServerMessage>(OUTBOUND_BUFFER);
    sinks.register(id, outbound_tx.clone())?;

    let writer_stream = stream.try_clone()?;
    let writer = thread::spawn(move || writer_loop(writer_stream, outbound_rx, heartbeat_interval));

    let result = read_loop(id, &stream, &registry, &outbound_tx);

    // Single cleanup funnel: dropping the sink closes the writer's channel,
    // the socket shutdown unblocks whichever side is still waiting.
    if let Err(e) = sinks.remove(id) {
        error!("sink map poisoned while closing connection {}: {}", id, e);
    }
    drop(outbound_tx);
    match registry.lock() {
        Ok(mut reg) => reg.remove_connection(id),
        Err(e) => error!("registry lock poisoned while closing connection {}: {}", id, e),
    }
    let _ = stream.shutdown(Shutdown::Both);
    let _ = writer.join();

    info!("connection {} closed", id);
    result
}

fn read_loop(
    id: ConnectionId,
    stream: &TcpStream,
    registry: &Mutex<SubscriptionRegistry>,
    outbound_tx: &Sender<ServerMessage>,
) -> Result<()> {
    // Connection acknowledged before anything else; the subscribed set is
    // empty by definition at this point.
    send_frame(
        outbound_tx,
        ServerMessage::Status {
            status: StatusKind::Connected,
            subscribed_symbols: Some(Vec::new()),
            message: None,
        },
    )?;

    let reader = BufReader::new(stream.try_clone()?);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!("connection {} read error: {}", id, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = match decode_frame::<ClientMessage>(&line) {
            Ok(msg) => apply_request(registry, id, msg)?,
            Err(e) => {
                warn!("connection {} sent a malformed frame: {}", id, e);
                ServerMessage::Error {
                    code: e.wire_code().to_string(),
                    message: e.to_string(),
                }
            }
        };
        send_frame(outbound_tx, reply)?;
    }
    Ok(())
}

/// Apply one decoded client request against the registry and produce the
/// frame answering it.
///
/// An accepted mutation is answered with an authoritative `status` frame
/// carrying the complete current symbol set (even when it just became
/// empty). A rejected one is answered with an `error` frame and leaves the
/// registry untouched.
pub fn apply_request(
    registry: &Mutex<SubscriptionRegistry>,
    id: ConnectionId,
    msg: ClientMessage,
) -> Result<ServerMessage> {
    let outcome = {
        let mut reg = registry.lock()?;
        match msg {
            ClientMessage::Subscribe { symbols } => reg.subscribe(id, &symbols),
            ClientMessage::Unsubscribe { symbols } => reg.unsubscribe(id, &symbols),
        }
    };
    Ok(match outcome {
        Ok(full_set) => ServerMessage::Status {
            status: StatusKind::Subscribed,
            subscribed_symbols: Some(full_set),
            message: None,
        },
        Err(e @ StreamError::InvalidRequest(_)) => {
            warn!("connection {} request rejected: {}", id, e);
            ServerMessage::Error {
                code: e.wire_code().to_string(),
                message: e.to_string(),
            }
        }
        Err(e) => return Err(e),
    })
}

fn send_frame(outbound_tx: &Sender<ServerMessage>, msg: ServerMessage) -> Result<()> {
    outbound_tx
        .send(msg)
        .map_err(|e| StreamError::ChannelSend(format!("session outbound: {}", e)))
}

/// Writer half of the session: drains the outbound channel and interleaves
/// heartbeats on an independent fixed cadence, regardless of tick activity.
fn writer_loop(
    mut stream: TcpStream,
    outbound_rx: Receiver<ServerMessage>,
    heartbeat_interval: Duration,
) {
    let heartbeat = crossbeam_channel::tick(heartbeat_interval);
    loop {
        select! {
            recv(outbound_rx) -> msg => match msg {
                Ok(msg) => {
                    if let Err(e) = write_frame(&mut stream, &msg) {
                        debug!("outbound write failed: {}", e);
                        break;
                    }
                }
                // Channel closed: the session is tearing down.
                Err(_) => break,
            },
            recv(heartbeat) -> _ => {
                let hb = ServerMessage::Heartbeat {
                    server_time: Utc::now().timestamp_millis(),
                };
                if let Err(e) = write_frame(&mut stream, &hb) {
                    debug!("heartbeat write failed: {}", e);
                    break;
                }
            }
        }
    }
    // Unblocks the reader so the cleanup funnel runs when the writer dies
    // first (e.g., the peer stopped draining).
    let _ = stream.shutdown(Shutdown::Both);
}

fn write_frame(stream: &mut TcpStream, msg: &ServerMessage) -> Result<()> {
    let frame = encode_frame(msg)?;
    stream.write_all(frame.as_bytes())?;
    Ok(())
}
