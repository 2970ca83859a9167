//! Auto-reconnecting TCP client
//!
//! # Connection Lifecycle
//!
//! ```text
//!            open()                 connect ok
//! Closed ───────────▶ Connecting ──────────────▶ Open
//!   ▲                    │  ▲                      │
//!   │      close()       │  │   timeout / fault    │
//!   └────────────────────┘  └──────────────────────┘
//! ```
//!
//! - `open()` spawns a `quadlink-connect` thread that retries a bounded
//!   connect until it succeeds or the client is closed.
//! - Once connected, a `quadlink-client-detect` timer reads every
//!   `detect_interval`, echoes server heartbeats and restarts the link when
//!   nothing arrived for `timeout`.
//! - Foreground faults (peer closed, I/O error) also restart the link.
//!
//! Every `open()` starts a new generation. Connect loops and timers carry
//! the generation they were started for and stand down as soon as it is no
//! longer current, so a `close()` during a connect attempt closes the
//! half-open socket instead of publishing it.
//!
//! Open, close, restart and link publication all run under one lifecycle
//! lock. A fault only restarts the generation it was observed on, so a
//! `close()` can never be undone by a liveness restart in flight.

use super::Endpoint;
use super::connection::{Connection, Role};
use super::frame::{DEFAULT_MAX_FRAME_LEN, Frame};
use super::timer::LoopTimer;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while waiting to retry
const RETRY_SLICE: Duration = Duration::from_millis(10);

/// Client transport settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port`
    pub server_address: String,
    /// Silence after which the link is restarted
    pub timeout: Duration,
    /// Liveness task period
    pub detect_interval: Duration,
    /// Bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Pause between failed attempts
    pub retry_delay: Duration,
    /// Largest accepted frame payload
    pub max_frame_len: usize,
}

impl ClientConfig {
    /// Defaults for the given server address
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:8006".to_string(),
            timeout: Duration::from_secs(3),
            detect_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Observable link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not active
    Closed,
    /// Active, no socket yet
    Connecting,
    /// Active with a live socket
    Open,
}

/// Link resources detached by a close, released outside the lifecycle lock
///
/// Stopping the liveness timer joins its thread, and that thread may itself
/// be waiting for the lifecycle lock.
struct Detached {
    timer: Option<LoopTimer>,
    link: Option<Connection>,
}

impl Detached {
    fn release(self) {
        if let Some(mut timer) = self.timer {
            timer.stop();
        }
        if let Some(conn) = self.link {
            log::info!("Disconnected from {}", conn.peer());
            conn.close();
        }
    }
}

struct Inner {
    config: ClientConfig,
    /// Serializes open, close, restart and link publication
    lifecycle: Mutex<()>,
    active: AtomicBool,
    /// Set once the owning `Client` is dropped; `open()` becomes a no-op
    disposed: AtomicBool,
    generation: AtomicU64,
    /// Successful connects so far
    connections: AtomicU64,
    link: Mutex<Option<Connection>>,
    detect: Mutex<Option<LoopTimer>>,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.active.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    fn open(self: &Arc<Self>) {
        let _lifecycle = self.lifecycle.lock();
        self.open_locked();
    }

    fn open_locked(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) || self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("quadlink-connect".to_string())
            .spawn(move || inner.connect_loop(generation));
        if let Err(e) = spawned {
            log::error!("Failed to spawn connect thread: {}", e);
            self.active.store(false, Ordering::SeqCst);
        }
    }

    fn close(&self) {
        let detached = {
            let _lifecycle = self.lifecycle.lock();
            self.close_locked()
        };
        detached.release();
    }

    fn close_locked(&self) -> Detached {
        self.active.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Detached {
            timer: self.detect.lock().take(),
            link: self.link.lock().take(),
        }
    }

    fn restart(self: &Arc<Self>) {
        let detached = {
            let _lifecycle = self.lifecycle.lock();
            let detached = self.close_locked();
            self.open_locked();
            detached
        };
        detached.release();
    }

    /// Restart after a fault seen on `generation`, unless it already ended
    fn restart_if_current(self: &Arc<Self>, generation: u64, reason: &Error) {
        let detached = {
            let _lifecycle = self.lifecycle.lock();
            if !self.is_current(generation) {
                return;
            }
            log::warn!("Link lost ({}), reconnecting", reason);
            let detached = self.close_locked();
            self.open_locked();
            detached
        };
        detached.release();
    }

    fn connect_loop(self: Arc<Self>, generation: u64) {
        log::info!("Connecting to {}", self.config.server_address);

        while self.is_current(generation) {
            let attempt = self
                .try_connect()
                .and_then(|stream| self.establish(stream, generation));

            match attempt {
                Ok(()) => return,
                Err(e) => {
                    log::warn!(
                        "Connection to {} failed ({}), retrying in {:?}",
                        self.config.server_address,
                        e,
                        self.config.retry_delay
                    );
                    self.pause(generation, self.config.retry_delay);
                }
            }
        }

        log::debug!("Connect loop for generation {} abandoned", generation);
    }

    fn try_connect(&self) -> Result<TcpStream> {
        let mut last_err = None;
        for addr in self.config.server_address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => Error::Io(e),
            None => Error::Other(format!(
                "{} did not resolve to any address",
                self.config.server_address
            )),
        })
    }

    /// Publish a freshly connected socket, unless the generation moved on
    fn establish(self: &Arc<Self>, stream: TcpStream, generation: u64) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_current(generation) {
            log::debug!("Connected after close, dropping socket");
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(());
        }

        let conn = Connection::new(stream, Role::Client, self.config.max_frame_len)?;
        let peer = conn.peer();

        let weak: Weak<Inner> = Arc::downgrade(self);
        let timer = LoopTimer::start(
            "quadlink-client-detect",
            self.config.detect_interval,
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.detect(generation);
                }
            },
        )?;

        *self.link.lock() = Some(conn);
        *self.detect.lock() = Some(timer);
        self.connections.fetch_add(1, Ordering::SeqCst);

        log::info!("Server {} connected", peer);
        Ok(())
    }

    fn pause(&self, generation: u64, delay: Duration) {
        let until = Instant::now() + delay;
        while self.is_current(generation) {
            let now = Instant::now();
            if now >= until {
                break;
            }
            thread::sleep((until - now).min(RETRY_SLICE));
        }
    }

    /// Liveness pass: read, restart on silence, flush heartbeat echoes
    fn detect(self: &Arc<Self>, generation: u64) {
        if !self.is_current(generation) {
            return;
        }

        let fault = {
            let mut link = self.link.lock();
            let Some(conn) = link.as_mut() else {
                return;
            };
            match conn.read() {
                Err(e) => Some(e),
                Ok(_) if conn.idle_for() > self.config.timeout => Some(Error::Timeout),
                Ok(_) if conn.has_pending_heartbeat() => conn.write().err(),
                Ok(_) => None,
            }
        };

        if let Some(e) = fault {
            self.restart_if_current(generation, &e);
        }
    }

    /// Run `op` against the open connection; restart the link if it faults
    fn with_link<R, F>(self: &Arc<Self>, op: F) -> Option<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let (generation, result) = {
            let mut link = self.link.lock();
            let conn = link.as_mut()?;
            (self.generation.load(Ordering::SeqCst), op(conn))
        };

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.restart_if_current(generation, &e);
                None
            }
        }
    }
}

/// TCP client that keeps a single link to the robot alive
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Create a closed client
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                lifecycle: Mutex::new(()),
                active: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                connections: AtomicU64::new(0),
                link: Mutex::new(None),
                detect: Mutex::new(None),
            }),
        }
    }

    /// Create a client and start connecting right away
    pub fn connect(config: ClientConfig) -> Self {
        let client = Self::new(config);
        client.open();
        client
    }

    /// Settings this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Start connecting in the background (no-op if already active)
    pub fn open(&self) {
        self.inner.open();
    }

    /// Stop the liveness task and drop the link; aborts pending attempts
    ///
    /// Once this returns the client stays closed until the next `open()`,
    /// even if a liveness restart was running concurrently.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Close, then open again, as one step
    pub fn restart(&self) {
        self.inner.restart();
    }

    /// Number of connections established so far
    ///
    /// Changes on every (re)connect, including reconnects too quick to be
    /// seen through [`state`](Self::state).
    pub fn connection_epoch(&self) -> u64 {
        self.inner.connections.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        if !self.inner.active.load(Ordering::SeqCst) {
            ConnectionState::Closed
        } else if self.inner.link.lock().is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Connecting
        }
    }

    /// Active and holding a live socket
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Server address of the live socket
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.link.lock().as_ref().map(Connection::peer)
    }

    /// Queue `data` and write; dropped silently when not connected
    pub fn send(&self, data: &[u8]) {
        self.inner.with_link(|conn| {
            conn.enqueue(Frame::Data(data.to_vec()));
            conn.write()
        });
    }

    /// Read, then return only the newest decoded frame
    ///
    /// Older frames queued since the last call are discarded.
    pub fn receive(&self) -> Option<Vec<u8>> {
        self.inner
            .with_link(|conn| {
                conn.read()?;
                Ok(conn.take_latest())
            })
            .flatten()
    }

    /// Read, hand every decoded frame to `handler`, queue its replies, write
    ///
    /// The handler runs under the link lock and must not call back into the
    /// client.
    pub fn interact<F>(&self, mut handler: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>>,
    {
        self.inner.with_link(|conn| {
            conn.read()?;
            while let Some(frame) = conn.pop_inbound() {
                if let Some(reply) = handler(&frame) {
                    conn.enqueue(Frame::Data(reply));
                }
            }
            conn.write()
        });
    }
}

impl Endpoint for Client {
    fn send(&self, data: &[u8]) {
        Client::send(self, data);
    }

    fn interact(&self, handler: &mut dyn FnMut(&[u8]) -> Option<Vec<u8>>) {
        Client::interact(self, handler);
    }

    fn is_connected(&self) -> bool {
        Client::is_connected(self)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn fast_config(addr: SocketAddr) -> ClientConfig {
        ClientConfig {
            server_address: addr.to_string(),
            timeout: Duration::from_secs(30),
            detect_interval: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
            retry_delay: Duration::from_millis(50),
            ..ClientConfig::default()
        }
    }

    fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn refused_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn test_new_client_is_closed() {
        let client = Client::new(ClientConfig::default());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(!client.is_connected());
        assert_eq!(client.receive(), None);
        client.send(b"ignored");
    }

    #[test]
    fn test_open_reaches_open_state() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = Client::connect(fast_config(listener.local_addr().unwrap()));
        let (_peer, _) = listener.accept().unwrap();

        assert!(wait_for(|| client.state() == ConnectionState::Open));
        assert_eq!(client.peer_addr(), Some(listener.local_addr().unwrap()));

        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.peer_addr(), None);
    }

    #[test]
    fn test_keeps_connecting_while_unreachable() {
        let client = Client::connect(fast_config(refused_addr()));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(client.state(), ConnectionState::Connecting);

        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_open_twice_is_noop() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = Client::connect(fast_config(listener.local_addr().unwrap()));
        client.open();
        let (_peer, _) = listener.accept().unwrap();
        assert!(wait_for(|| client.is_connected()));

        listener.set_nonblocking(true).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(listener.accept().is_err(), "second connection was made");
    }

    #[test]
    fn test_send_frames_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = Client::connect(fast_config(listener.local_addr().unwrap()));
        let (mut peer, _) = listener.accept().unwrap();
        assert!(wait_for(|| client.is_connected()));

        client.send(b"gait");
        let expected = Frame::Data(b"gait".to_vec()).encode();
        let mut got = vec![0u8; expected.len()];
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        peer.read_exact(&mut got).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_close_during_liveness_restart_is_final() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept and hold sockets without ever writing, so the client keeps
        // timing out and restarting
        let accepting = Arc::new(AtomicBool::new(true));
        let acceptor = {
            let accepting = Arc::clone(&accepting);
            thread::spawn(move || {
                let mut held = Vec::new();
                while accepting.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => held.push(stream),
                        Err(_) => thread::sleep(Duration::from_millis(1)),
                    }
                }
            })
        };

        let config = ClientConfig {
            timeout: Duration::from_millis(6),
            detect_interval: Duration::from_millis(2),
            retry_delay: Duration::from_millis(1),
            ..fast_config(addr)
        };

        for i in 0..40u64 {
            let client = Client::connect(config.clone());
            thread::sleep(Duration::from_millis(4 + i % 7));
            client.close();
            assert_eq!(client.state(), ConnectionState::Closed);

            thread::sleep(Duration::from_millis(30));
            assert_eq!(client.state(), ConnectionState::Closed, "reopened on pass {}", i);
            assert_eq!(client.peer_addr(), None);
        }

        accepting.store(false, Ordering::SeqCst);
        acceptor.join().unwrap();
    }

    #[test]
    fn test_connection_epoch_counts_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = Client::new(fast_config(listener.local_addr().unwrap()));
        assert_eq!(client.connection_epoch(), 0);
        client.open();

        let (first, _) = listener.accept().unwrap();
        assert!(wait_for(|| client.connection_epoch() == 1));

        drop(first);
        // A foreground read sees the close and reconnects
        assert!(wait_for(|| {
            client.receive();
            client.connection_epoch() == 2
        }));
        let (_second, _) = listener.accept().unwrap();
        assert!(client.is_connected());
    }
}
