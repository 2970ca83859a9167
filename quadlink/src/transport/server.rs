//! Multi-client TCP server with heartbeat liveness
//!
//! # Threads
//!
//! - **Foreground**: the embedding application calls [`Server::send`],
//!   [`Server::receive`] or [`Server::interact`] from its own tick. Each call
//!   makes one non-blocking read pass and one write pass.
//! - **Liveness** (`quadlink-server-detect`): every `detect_interval` reads,
//!   drops peers silent for longer than `timeout`, queues a heartbeat to every
//!   remaining peer and writes.
//!
//! Both share one `parking_lot::Mutex` around the listener and connection
//! list. Sockets are non-blocking, so the lock is only held for one pass.
//!
//! Outbound queues are unbounded: a stalled peer that never becomes writable
//! keeps accumulating frames until the liveness timeout removes it.

use super::Endpoint;
use super::connection::{Connection, Poll, Role};
use super::frame::{DEFAULT_MAX_FRAME_LEN, Frame};
use super::timer::LoopTimer;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

/// Server transport settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:8006`
    pub bind_address: String,
    /// Liveness task period
    pub detect_interval: Duration,
    /// Idle time after which a peer is dropped
    pub timeout: Duration,
    /// Largest accepted frame payload
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8006".to_string(),
            detect_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Listener plus live connections, guarded as one unit
struct ServerState {
    listener: TcpListener,
    connections: Vec<Connection>,
    timeout: Duration,
    max_frame_len: usize,
}

impl ServerState {
    /// Accept every pending connection
    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    match Connection::new(stream, Role::Server, self.max_frame_len) {
                        Ok(conn) => {
                            self.connections.push(conn);
                            log::info!(
                                "Connected by {}, connection number {}",
                                addr,
                                self.connections.len()
                            );
                        }
                        Err(e) => log::warn!("Failed to set up connection from {}: {}", addr, e),
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// One non-blocking receive pass over the listener and every peer
    fn read(&mut self) {
        self.accept();
        self.retain_ok(|conn| conn.read());
    }

    /// One non-blocking send pass over every peer with queued output
    fn write(&mut self) {
        self.retain_ok(|conn| {
            if conn.has_pending_output() {
                conn.write()
            } else {
                Ok(Poll::WouldBlock)
            }
        });
    }

    /// Run `op` on each connection, dropping those that fault
    fn retain_ok<F>(&mut self, mut op: F)
    where
        F: FnMut(&mut Connection) -> Result<Poll>,
    {
        let before = self.connections.len();
        self.connections.retain_mut(|conn| match op(conn) {
            Ok(_) => true,
            Err(e) => {
                log_removal(conn, &e);
                false
            }
        });
        if self.connections.len() != before {
            log::info!("Connection number {}", self.connections.len());
        }
    }

    /// Drop idle peers, heartbeat the rest
    fn detect(&mut self) {
        self.read();

        let timeout = self.timeout;
        self.connections.retain(|conn| {
            if conn.idle_for() > timeout {
                log_removal(conn, &Error::Timeout);
                false
            } else {
                true
            }
        });

        for conn in &mut self.connections {
            conn.enqueue(Frame::Heartbeat);
        }
        self.write();
    }
}

fn log_removal(conn: &Connection, reason: &Error) {
    match reason {
        Error::PeerClosed => log::info!("{} closed the connection", conn.peer()),
        Error::Timeout => log::warn!(
            "{} silent for {:?}, removing",
            conn.peer(),
            conn.idle_for()
        ),
        e => log::warn!("{} removed: {}", conn.peer(), e),
    }
}

/// TCP server accepting any number of monitor connections
pub struct Server {
    state: Arc<Mutex<ServerState>>,
    local_addr: SocketAddr,
    _detect: LoopTimer,
}

impl Server {
    /// Bind the listener and start the liveness task
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_address).map_err(|e| {
            Error::Other(format!("Failed to bind to {}: {}", config.bind_address, e))
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(Mutex::new(ServerState {
            listener,
            connections: Vec::new(),
            timeout: config.timeout,
            max_frame_len: config.max_frame_len,
        }));

        let detect_state = Arc::clone(&state);
        let detect = LoopTimer::start(
            "quadlink-server-detect",
            config.detect_interval,
            move || detect_state.lock().detect(),
        )?;

        log::info!("Server listening on {}", local_addr);

        Ok(Self {
            state,
            local_addr,
            _detect: detect,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Peer addresses of live connections
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.state
            .lock()
            .connections
            .iter()
            .map(Connection::peer)
            .collect()
    }

    /// Queue `data` to every live connection and write
    pub fn send(&self, data: &[u8]) {
        let mut state = self.state.lock();
        for conn in &mut state.connections {
            conn.enqueue(Frame::Data(data.to_vec()));
        }
        state.write();
    }

    /// Read, then return the newest frame of each connection
    ///
    /// Older frames still queued are discarded: live telemetry only cares
    /// about the latest sample. Use [`interact`](Self::interact) when every
    /// frame matters.
    pub fn receive(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut state = self.state.lock();
        state.read();
        state
            .connections
            .iter_mut()
            .filter_map(|conn| conn.take_latest().map(|frame| (conn.peer(), frame)))
            .collect()
    }

    /// Read, hand every decoded frame to `handler`, queue its replies, write
    ///
    /// Replies go back to the connection the frame arrived on. The handler
    /// runs under the server lock and must not call back into the server.
    pub fn interact<F>(&self, mut handler: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>>,
    {
        let mut state = self.state.lock();
        state.read();
        for conn in &mut state.connections {
            while let Some(frame) = conn.pop_inbound() {
                if let Some(reply) = handler(&frame) {
                    conn.enqueue(Frame::Data(reply));
                }
            }
        }
        state.write();
    }

    /// Run one liveness pass now (the background task does this periodically)
    pub fn detect(&self) {
        self.state.lock().detect();
    }
}

impl Endpoint for Server {
    fn send(&self, data: &[u8]) {
        Server::send(self, data);
    }

    fn interact(&self, handler: &mut dyn FnMut(&[u8]) -> Option<Vec<u8>>) {
        Server::interact(self, handler);
    }

    fn is_connected(&self) -> bool {
        self.connection_count() > 0
    }
}
