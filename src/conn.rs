use anyhow::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{RelayError, SendError};
use crate::protocol::{self, Inbound};
use crate::relay;
use crate::state::ServerState;

/// Lines queued per peer before a slow consumer starts losing broadcasts.
const OUTBOUND_QUEUE: usize = 256;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Shared handle for one client's socket. The write half lives in a
/// dedicated task fed by a bounded queue, so `send` never blocks and a
/// stalled peer cannot hold up anyone else. The read half stays with the
/// supervisor task; no two tasks ever touch the same half.
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    name: OnceLock<String>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    state: Mutex<Lifecycle>,
}

/// Read side of a connection, owned exclusively by its supervisor.
pub struct ConnReader {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl ConnReader {
    /// Next newline-terminated line; `Ok(None)` once the peer closes.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.lines.next_line().await
    }
}

impl Connection {
    pub fn open(stream: TcpStream, peer: SocketAddr) -> Result<(Arc<Self>, ConnReader), RelayError> {
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);

        let conn = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            name: OnceLock::new(),
            outbound: Mutex::new(Some(tx)),
            state: Mutex::new(Lifecycle::Connecting),
        });

        tokio::spawn(write_loop(conn.id, write_half, rx));

        let reader = ConnReader {
            lines: BufReader::new(read_half).lines(),
        };

        Ok((conn, reader))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Display name; set exactly once when the handshake completes.
    pub fn name(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or("<unnamed>")
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.state.lock().unwrap()
    }

    fn activate(&self, name: String) {
        let _ = self.name.set(name);
        *self.state.lock().unwrap() = Lifecycle::Active;
    }

    /// Queue one line for delivery. Fails with `Backlogged` when the peer
    /// has stopped draining its queue, `Closed` once the connection is done;
    /// either way the failure stays with this one recipient.
    pub fn send(&self, line: String) -> Result<(), SendError> {
        if matches!(self.lifecycle(), Lifecycle::Closing | Lifecycle::Closed) {
            return Err(SendError::Closed);
        }

        let outbound = self.outbound.lock().unwrap();
        match outbound.as_ref() {
            None => Err(SendError::Closed),
            Some(tx) => tx.try_send(line).map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => SendError::Backlogged,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            }),
        }
    }

    /// Idempotent; safe to race with an in-flight `send` (the send fails).
    /// Queued lines are still drained before the socket is shut down.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == Lifecycle::Closed {
                return;
            }
            *state = Lifecycle::Closing;
        }

        self.outbound.lock().unwrap().take();

        *self.state.lock().unwrap() = Lifecycle::Closed;
    }

    #[cfg(test)]
    pub(crate) fn stub(name: &str, capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            peer: ([127, 0, 0, 1], 0).into(),
            name: OnceLock::new(),
            outbound: Mutex::new(Some(tx)),
            state: Mutex::new(Lifecycle::Connecting),
        });
        conn.activate(name.to_string());
        (conn, rx)
    }
}

async fn write_loop(id: u64, mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        if let Err(err) = write_line(&mut writer, &line).await {
            debug!(conn = id, %err, "write failed, abandoning outbound queue");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

/// Read lines until a non-empty display name arrives. Blank lines are
/// skipped; losing the peer first means the connection is discarded without
/// ever being registered.
async fn handshake(reader: &mut ConnReader) -> Result<String, RelayError> {
    loop {
        match reader.next_line().await {
            Ok(Some(line)) if !line.is_empty() => return Ok(line),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return Err(RelayError::Handshake),
        }
    }
}

/// Per-connection supervisor: handshake, register, relay until the peer
/// quits or the transport dies, then clean up. Every failure stays inside
/// this task.
pub async fn handle(state: ServerState, socket: TcpStream, peer: SocketAddr) -> Result<()> {
    let (conn, mut reader) = Connection::open(socket, peer)?;

    let name = match handshake(&mut reader).await {
        Ok(name) => name,
        Err(_) => {
            debug!(%peer, "peer left before introducing itself");
            conn.close();
            return Ok(());
        }
    };

    conn.activate(name.clone());

    if let Err(err) = state.registry.register(conn.clone()) {
        warn!(%peer, name = %name, "rejected: {err}");
        let _ = conn.send(protocol::announcement(&relay::now_stamp(), &err.to_string()));
        conn.close();
        return Ok(());
    }

    info!(conn = conn.id(), %peer, name = %name, "joined");
    relay::announce(&state.registry, &protocol::join_notice(&name));

    let result = read_loop(&state, &name, &mut reader).await;

    // Deregister before announcing, so the departer never sees its own notice.
    state.registry.deregister(&conn);
    conn.close();

    info!(conn = conn.id(), name = %name, "left");
    relay::announce(&state.registry, &protocol::leave_notice(&name));

    result
}

async fn read_loop(state: &ServerState, name: &str, reader: &mut ConnReader) -> Result<()> {
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            // Peer closed its socket: same termination path as a read error.
            Ok(None) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        match Inbound::parse(&line) {
            Inbound::Quit => return Ok(()),
            message => {
                info!(name = %name, "{}", message.log_summary());
                relay::broadcast(&state.registry, name, &message);
            }
        }
    }
}
