//! One duplex peer channel over a non-blocking TCP socket
//!
//! A `Connection` owns everything the transport tracks per peer:
//!
//! - the socket and peer address
//! - an inbound accumulator (`FrameDecoder`) and the queue of decoded payloads
//! - the outbound FIFO of frames plus the unsent tail of the frame in flight
//! - the instant of the last successful receive, for liveness checks
//!
//! All socket calls are non-blocking. "Would block" is reported as
//! [`Poll::WouldBlock`], never as an error; errors always mean the connection
//! is finished (`Error::PeerClosed` or `Error::Io`).

use super::frame::{Frame, FrameDecoder};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// Receive chunk size
const READ_CHUNK: usize = 4096;

/// Max chunks read per pass, so one chatty peer cannot starve the others
const MAX_READS_PER_PASS: usize = 16;

/// Which end of the link this connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a server; heartbeats from the peer are skipped
    Server,
    /// Dialed by a client; heartbeats from the peer are echoed back
    Client,
}

/// Outcome of a non-blocking I/O attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Made progress (bytes moved)
    Ready(usize),
    /// Socket not ready, nothing moved
    WouldBlock,
}

/// Per-peer transport state
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    role: Role,
    decoder: FrameDecoder,
    inbound: VecDeque<Vec<u8>>,
    outbound: VecDeque<Frame>,
    /// Encoded bytes of the front outbound frame, and how many went out
    in_flight: Vec<u8>,
    in_flight_sent: usize,
    last_rx: Instant,
    read_buf: Box<[u8; READ_CHUNK]>,
}

impl Connection {
    /// Wrap a connected stream, switching it to non-blocking mode
    pub fn new(stream: TcpStream, role: Role, max_frame_len: usize) -> Result<Self> {
        stream.set_nonblocking(true)?;
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY: {}", e);
        }
        let peer = stream.peer_addr()?;

        Ok(Self {
            stream,
            peer,
            role,
            decoder: FrameDecoder::with_max_frame_len(max_frame_len),
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            in_flight: Vec::new(),
            in_flight_sent: 0,
            last_rx: Instant::now(),
            read_buf: Box::new([0u8; READ_CHUNK]),
        })
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Time since the last successful receive
    pub fn idle_for(&self) -> Duration {
        self.last_rx.elapsed()
    }

    /// Queue a frame for sending
    pub fn enqueue(&mut self, frame: Frame) {
        self.outbound.push_back(frame);
    }

    /// True if anything is waiting to be written
    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// True if a heartbeat is queued (client echo waiting to go out)
    pub fn has_pending_heartbeat(&self) -> bool {
        self.outbound.iter().any(|f| matches!(f, Frame::Heartbeat))
    }

    /// Number of decoded payloads not yet handed out
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Pop the newest decoded payload, dropping everything older
    pub fn take_latest(&mut self) -> Option<Vec<u8>> {
        let latest = self.inbound.pop_back();
        let dropped = self.inbound.len();
        if dropped > 0 {
            log::trace!("{}: dropping {} stale frames", self.peer, dropped);
            self.inbound.clear();
        }
        latest
    }

    /// Pop the oldest decoded payload
    pub fn pop_inbound(&mut self) -> Option<Vec<u8>> {
        self.inbound.pop_front()
    }

    /// Receive whatever is available and decode complete frames
    ///
    /// Updates the last-receive instant whenever any bytes arrive.
    pub fn read(&mut self) -> Result<Poll> {
        let mut total = 0;

        for _ in 0..MAX_READS_PER_PASS {
            match self.stream.read(&mut self.read_buf[..]) {
                Ok(0) => return Err(Error::PeerClosed),
                Ok(n) => {
                    self.decoder.extend(&self.read_buf[..n]);
                    total += n;
                    if n < READ_CHUNK {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        if total == 0 {
            return Ok(Poll::WouldBlock);
        }

        self.last_rx = Instant::now();
        self.decode();
        Ok(Poll::Ready(total))
    }

    fn decode(&mut self) {
        while let Some(frame) = self.decoder.next_frame() {
            match frame {
                Frame::Data(payload) => {
                    log::trace!("{}: frame of {} bytes", self.peer, payload.len());
                    self.inbound.push_back(payload);
                }
                Frame::Heartbeat => {
                    if self.role == Role::Client {
                        self.outbound.push_back(Frame::Heartbeat);
                    }
                }
            }
        }
    }

    /// Drain the outbound queue in FIFO order
    ///
    /// Each frame is sent completely before the next one is dequeued. If the
    /// socket fills up mid-frame, the unsent tail is kept for the next call.
    pub fn write(&mut self) -> Result<Poll> {
        let mut total = 0;

        loop {
            if self.in_flight_sent == self.in_flight.len() {
                let Some(frame) = self.outbound.front() else {
                    break;
                };
                self.in_flight.clear();
                frame.encode_into(&mut self.in_flight);
                self.in_flight_sent = 0;
            }

            match self.stream.write(&self.in_flight[self.in_flight_sent..]) {
                Ok(0) => return Err(Error::PeerClosed),
                Ok(n) => {
                    self.in_flight_sent += n;
                    total += n;
                    if self.in_flight_sent == self.in_flight.len() {
                        self.outbound.pop_front();
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        if total == 0 {
            Ok(Poll::WouldBlock)
        } else {
            Ok(Poll::Ready(total))
        }
    }

    /// Shut the socket down in both directions
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
