//! Versioned packet envelope and payload dispatch
//!
//! ```text
//! Envelope := version:u8 ack:u8 type:u8 body
//! ```
//!
//! | Type | Payload   | Body |
//! |------|-----------|------|
//! | 1    | Sensor    | [`sensor`] |
//! | 2    | State     | 2 bytes |
//! | 3    | Command   | 3 bytes |
//! | 4    | Parameter | [`parameter`] |
//!
//! A non-zero `ack` asks the receiver to answer with its current payload of
//! that type. The reply itself never requests an ack.

pub mod control;
pub mod parameter;
pub mod sensor;

pub use control::{CommandState, SystemState};
pub use parameter::{Gait, ParameterSet, ParameterStore};
pub use sensor::{Block, SensorFrame};

use crate::archive::SensorArchive;
use crate::error::{Error, Result};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::time::Instant;

/// The only protocol version spoken
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Envelope header length
pub const HEADER_LEN: usize = 3;

/// Payload type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    Sensor = 0x01,
    State = 0x02,
    Command = 0x03,
    Parameter = 0x04,
}

impl TryFrom<u8> for PayloadType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0x01 => Ok(PayloadType::Sensor),
            0x02 => Ok(PayloadType::State),
            0x03 => Ok(PayloadType::Command),
            0x04 => Ok(PayloadType::Parameter),
            other => Err(other),
        }
    }
}

impl From<PayloadType> for u8 {
    fn from(kind: PayloadType) -> u8 {
        kind as u8
    }
}

/// Three header bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    /// Requested reply type, 0 for none
    pub ack: u8,
    /// Payload type of the body
    pub kind: u8,
}

impl Header {
    pub fn new(kind: PayloadType, ack: Option<PayloadType>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            ack: ack.map_or(0, u8::from),
            kind: kind.into(),
        }
    }

    pub fn payload_type(&self) -> Option<PayloadType> {
        PayloadType::try_from(self.kind).ok()
    }

    /// Requested reply type, if any and known
    pub fn ack_type(&self) -> Option<PayloadType> {
        match self.ack {
            0 => None,
            ack => PayloadType::try_from(ack).ok(),
        }
    }
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            ack: 0,
            kind: 0,
        }
    }
}

/// Header plus borrowed body of one received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub header: Header,
    pub body: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Split `bytes` into header and body
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        match bytes {
            [version, ack, kind, body @ ..] => Ok(Self {
                header: Header {
                    version: *version,
                    ack: *ack,
                    kind: *kind,
                },
                body,
            }),
            _ => Err(Error::InvalidPacket(format!(
                "envelope needs {} header bytes, got {}",
                HEADER_LEN,
                bytes.len()
            ))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(&[self.header.version, self.header.ack, self.header.kind]);
        out.extend_from_slice(self.body);
        out
    }
}

/// One decoded payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Sensor(SensorFrame),
    State(SystemState),
    Command(CommandState),
    Parameter(ParameterSet),
}

impl Payload {
    /// Decode a body of the given type
    ///
    /// Returns `Ok(None)` for a parameter body whose flag marks it empty.
    /// The synthetic sensor body is not understood here; see
    /// [`Protocol::decode`].
    pub fn decode(kind: PayloadType, body: &[u8]) -> Result<Option<Self>> {
        Ok(Some(match kind {
            PayloadType::Sensor => Payload::Sensor(SensorFrame::from_bytes(body)?),
            PayloadType::State => Payload::State(SystemState::decode(body)?),
            PayloadType::Command => Payload::Command(CommandState::decode(body)?),
            PayloadType::Parameter => match ParameterSet::decode(body)? {
                Some(set) => Payload::Parameter(set),
                None => return Ok(None),
            },
        }))
    }

    pub fn kind(&self) -> PayloadType {
        match self {
            Payload::Sensor(_) => PayloadType::Sensor,
            Payload::State(_) => PayloadType::State,
            Payload::Command(_) => PayloadType::Command,
            Payload::Parameter(_) => PayloadType::Parameter,
        }
    }

    /// Body bytes; sensor frames encode their dirty blocks
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Sensor(frame) => frame.to_bytes(),
            Payload::State(state) => state.encode().to_vec(),
            Payload::Command(cmd) => cmd.encode().to_vec(),
            Payload::Parameter(set) => set.encode(),
        }
    }

    /// Complete envelope carrying this payload
    pub fn to_envelope(&self, ack: Option<PayloadType>) -> Vec<u8> {
        let body = self.encode();
        Envelope {
            header: Header::new(self.kind(), ack),
            body: &body,
        }
        .encode()
    }
}

/// Per-link protocol state: latest payload of each type plus dispatch
///
/// Received payloads overwrite the matching field; outgoing envelopes are
/// built from the same fields. Sensor payloads are additionally pushed into
/// the attached archive, if any.
pub struct Protocol {
    /// Latest sensor sample
    pub sensor: SensorFrame,
    /// Latest robot state
    pub state: SystemState,
    /// Latest operator command
    pub command: CommandState,
    /// Current gait parameters
    pub parameters: ParameterSet,
    received: Header,
    outgoing: Header,
    received_count: u64,
    archive: Option<SensorArchive>,
    rng: SmallRng,
    started: Instant,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol {
    pub fn new() -> Self {
        Self {
            sensor: SensorFrame::new(),
            state: SystemState::default(),
            command: CommandState::default(),
            parameters: ParameterSet::new(),
            received: Header::default(),
            outgoing: Header::default(),
            received_count: 0,
            archive: None,
            rng: SmallRng::from_entropy(),
            started: Instant::now(),
        }
    }

    /// Use a fixed seed for synthetic sensor data
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn with_archive(mut self, archive: SensorArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Attach a new archive, returning the previous one
    pub fn replace_archive(&mut self, archive: SensorArchive) -> Option<SensorArchive> {
        self.archive.replace(archive)
    }

    pub fn take_archive(&mut self) -> Option<SensorArchive> {
        self.archive.take()
    }

    pub fn archive(&self) -> Option<&SensorArchive> {
        self.archive.as_ref()
    }

    pub fn archive_mut(&mut self) -> Option<&mut SensorArchive> {
        self.archive.as_mut()
    }

    /// Header of the last decoded envelope
    pub fn last_header(&self) -> Header {
        self.received
    }

    /// Envelopes routed to a payload so far
    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    /// Seconds since this protocol was created
    fn session_time(&self) -> f32 {
        self.started.elapsed().as_secs_f32()
    }

    /// Replace the sensor sample with a fully dirty random one
    pub fn stage_synthetic_sensor(&mut self) {
        let timestamp = self.session_time();
        let frame = SensorFrame::synthetic(&mut self.rng, timestamp);
        self.sensor.assign_from(&frame);
    }

    /// Decode one envelope and apply its payload
    ///
    /// Returns the routed payload type, or `None` when the type is unknown
    /// and the body was ignored. Only routed envelopes are counted.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Option<PayloadType>> {
        let envelope = Envelope::parse(bytes)?;
        self.received = envelope.header;

        let Some(kind) = envelope.header.payload_type() else {
            log::debug!("Ignoring payload type {:#04x}", envelope.header.kind);
            return Ok(None);
        };

        if envelope.header.version != PROTOCOL_VERSION {
            log::debug!("Unexpected envelope version {:#04x}", envelope.header.version);
        }

        match kind {
            PayloadType::Sensor if envelope.body == sensor::TEST_BODY => {
                self.stage_synthetic_sensor();
                self.archive_sensor()?;
            }
            _ => match Payload::decode(kind, envelope.body) {
                Ok(Some(payload)) => self.apply(payload)?,
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Dropping {:?} payload: {}", kind, e);
                    return Err(e);
                }
            },
        }

        self.received_count += 1;
        Ok(Some(kind))
    }

    fn apply(&mut self, payload: Payload) -> Result<()> {
        match payload {
            Payload::Sensor(frame) => {
                self.sensor.merge_from(&frame);
                self.archive_sensor()?;
            }
            Payload::State(state) => self.state = state,
            Payload::Command(cmd) => self.command = cmd,
            Payload::Parameter(set) => self.parameters = set,
        }
        Ok(())
    }

    /// Push the dirty sensor blocks, flushing first if a field is full
    fn archive_sensor(&mut self) -> Result<()> {
        let Some(archive) = self.archive.as_mut() else {
            return Ok(());
        };
        if archive.is_full() {
            if let Err(e) = archive.flush() {
                log::warn!("Sensor log flush failed: {}", e);
            }
        }
        archive.push(&mut self.sensor)
    }

    /// Envelope for the staged outgoing type and ack
    ///
    /// Encoding a sensor payload clears its dirty flags.
    pub fn encode(&mut self) -> Vec<u8> {
        let body = match self.outgoing.payload_type() {
            Some(PayloadType::Sensor) => self.sensor.encode(),
            Some(PayloadType::State) => self.state.encode().to_vec(),
            Some(PayloadType::Command) => self.command.encode().to_vec(),
            Some(PayloadType::Parameter) => self.parameters.encode(),
            None => Vec::new(),
        };
        Envelope {
            header: self.outgoing,
            body: &body,
        }
        .encode()
    }

    /// Stage `kind` and `ack`, then encode
    pub fn collect(&mut self, kind: PayloadType, ack: Option<PayloadType>) -> Vec<u8> {
        self.outgoing = Header::new(kind, ack);
        self.encode()
    }

    /// Handle one received envelope, returning the acknowledgement if asked
    ///
    /// A bad body is logged and still acknowledged, since the header asking
    /// for the reply was read. Only envelopes too short for a header get no
    /// reply.
    pub fn process(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        if let Err(e) = self.decode(bytes) {
            log::warn!("Failed to process envelope: {}", e);
            if bytes.len() < HEADER_LEN {
                return None;
            }
        }
        let ack = self.received.ack_type()?;
        Some(self.collect(ack, None))
    }
}
