//! Frame codec for the legacy marker-search wire format
//!
//! ```text
//! ┌─────────────────┬───────────────┬──────────────────┬────────────────────┐
//! │ "framehead" (9) │ len: u32 (LE) │ payload[len]     │ checksum: u64 (LE) │
//! └─────────────────┴───────────────┴──────────────────┴────────────────────┘
//!
//! ┌─────────────────┐
//! │ "heartbeat" (9) │   sent verbatim, no length or checksum
//! └─────────────────┘
//! ```
//!
//! The checksum is the plain byte sum of the payload modulo 2^64. It is not a
//! CRC and gives no protection against transposed bytes; it exists for wire
//! compatibility with the robot controller only.
//!
//! On a checksum mismatch the extractor skips just the 9-byte head marker and
//! rescans, so one corrupted frame never costs the frames buffered after it.

use std::fmt;

/// Marker preceding every data frame
pub const FRAME_HEAD: &[u8; 9] = b"framehead";

/// Marker sent on its own as a liveness check
pub const HEARTBEAT: &[u8; 9] = b"heartbeat";

/// Bytes following the head marker before the payload (length field)
const LEN_FIELD_SIZE: usize = 4;

/// Trailing checksum size
const CHECKSUM_SIZE: usize = 8;

/// Default upper bound on a single payload (1 MiB)
///
/// Sensor frames are ~200 bytes, parameter frames ~90. Anything claiming to
/// be larger is treated as a corrupted length field.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Compact the accumulator once this many consumed bytes pile up
const COMPACT_THRESHOLD: usize = 4096;

/// One unit on the wire
#[derive(Clone, PartialEq, Eq)]
pub enum Frame {
    /// Checksummed, length-prefixed payload
    Data(Vec<u8>),
    /// Bare liveness marker
    Heartbeat,
}

impl Frame {
    /// Encoded size on the wire
    pub fn wire_len(&self) -> usize {
        match self {
            Frame::Data(payload) => {
                FRAME_HEAD.len() + LEN_FIELD_SIZE + payload.len() + CHECKSUM_SIZE
            }
            Frame::Heartbeat => HEARTBEAT.len(),
        }
    }

    /// Append the wire encoding to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.wire_len());
        match self {
            Frame::Data(payload) => {
                buf.extend_from_slice(FRAME_HEAD);
                buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                buf.extend_from_slice(payload);
                buf.extend_from_slice(&checksum(payload).to_le_bytes());
            }
            Frame::Heartbeat => buf.extend_from_slice(HEARTBEAT),
        }
    }

    /// Wire encoding as a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        self.encode_into(&mut buf);
        buf
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Data(payload) => write!(f, "Data({} bytes)", payload.len()),
            Frame::Heartbeat => write!(f, "Heartbeat"),
        }
    }
}

/// Additive checksum: sum of all payload bytes, wrapping at 2^64
#[inline]
pub fn checksum(payload: &[u8]) -> u64 {
    payload
        .iter()
        .fold(0u64, |acc, &b| acc.wrapping_add(u64::from(b)))
}

/// Position of `needle` in `haystack`, if any
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Incremental frame extractor over an accumulating byte stream
///
/// Feed received bytes with [`extend`](Self::extend), then drain complete
/// frames with [`next_frame`](Self::next_frame) until it returns `None`.
/// Incomplete trailing bytes stay buffered for the next receive.
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Start of unconsumed data in `buffer`
    start: usize,
    max_frame_len: usize,
    corrupted: u64,
}

impl FrameDecoder {
    /// Create a decoder with the default frame size limit
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a decoder rejecting payloads longer than `max_frame_len`
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
            start: 0,
            max_frame_len,
            corrupted: 0,
        }
    }

    /// Append received bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.start > 0 && (self.start >= COMPACT_THRESHOLD || self.start == self.buffer.len())
        {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered, not yet consumed bytes
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.start
    }

    /// Frames dropped so far because of bad checksums or lengths
    pub fn corrupted(&self) -> u64 {
        self.corrupted
    }

    /// Discard everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.start = 0;
    }

    /// Extract the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let pending = &self.buffer[self.start..];
            let head = find(pending, FRAME_HEAD);
            let beat = find(pending, HEARTBEAT);

            let idx = match (head, beat) {
                (None, None) => {
                    // Keep only what could still be the start of a marker
                    let keep = pending.len().min(FRAME_HEAD.len() - 1);
                    self.start += pending.len() - keep;
                    return None;
                }
                (Some(h), Some(b)) if b < h => {
                    self.start += b + HEARTBEAT.len();
                    return Some(Frame::Heartbeat);
                }
                (None, Some(b)) => {
                    self.start += b + HEARTBEAT.len();
                    return Some(Frame::Heartbeat);
                }
                (Some(h), _) => h,
            };

            let len_at = idx + FRAME_HEAD.len();
            let payload_at = len_at + LEN_FIELD_SIZE;
            if pending.len() < payload_at {
                return None;
            }

            let mut len_bytes = [0u8; LEN_FIELD_SIZE];
            len_bytes.copy_from_slice(&pending[len_at..payload_at]);
            let len = u32::from_le_bytes(len_bytes) as usize;

            if len > self.max_frame_len {
                log::debug!(
                    "Frame length {} exceeds limit {}, resynchronizing",
                    len,
                    self.max_frame_len
                );
                self.corrupted += 1;
                self.start += len_at;
                continue;
            }

            let checksum_at = payload_at + len;
            let frame_end = checksum_at + CHECKSUM_SIZE;
            if pending.len() < frame_end {
                return None;
            }

            let payload = &pending[payload_at..checksum_at];
            let mut sum_bytes = [0u8; CHECKSUM_SIZE];
            sum_bytes.copy_from_slice(&pending[checksum_at..frame_end]);
            let received = u64::from_le_bytes(sum_bytes);
            let calculated = checksum(payload);

            if received != calculated {
                log::debug!(
                    "Checksum mismatch: received={:#018x}, calculated={:#018x}, len={}",
                    received,
                    calculated,
                    len
                );
                self.corrupted += 1;
                // Don't trust anything but the marker itself
                self.start += len_at;
                continue;
            }

            let frame = Frame::Data(payload.to_vec());
            self.start += frame_end;
            return Some(frame);
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(frames: &[Frame]) -> Vec<u8> {
        let mut buf = Vec::new();
        for frame in frames {
            frame.encode_into(&mut buf);
        }
        buf
    }

    fn drain(decoder: &mut FrameDecoder) -> Vec<Frame> {
        std::iter::from_fn(|| decoder.next_frame()).collect()
    }

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::Data(vec![0x01, 0x00, 0x03, 0x00, 0x01, 0x00]),
            Frame::Heartbeat,
            Frame::Data(b"walk forward".to_vec()),
            Frame::Data(vec![]),
            Frame::Heartbeat,
            Frame::Data((0..=255u8).collect()),
        ]
    }

    #[test]
    fn test_encode_layout() {
        let bytes = Frame::Data(vec![1, 2, 3]).encode();
        assert_eq!(&bytes[..9], FRAME_HEAD);
        assert_eq!(&bytes[9..13], &3u32.to_le_bytes());
        assert_eq!(&bytes[13..16], &[1, 2, 3]);
        assert_eq!(&bytes[16..], &6u64.to_le_bytes());

        assert_eq!(Frame::Heartbeat.encode(), HEARTBEAT.to_vec());
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0xFF; 4]), 4 * 255);
        assert_eq!(checksum(&[1, 2, 3, 250]), 256);
    }

    #[test]
    fn test_whole_stream() {
        let frames = sample_frames();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream(&frames));
        assert_eq!(drain(&mut decoder), frames);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_chunked_delivery_every_split() {
        let frames = sample_frames();
        let bytes = stream(&frames);

        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut out = Vec::new();
            decoder.extend(&bytes[..split]);
            out.extend(drain(&mut decoder));
            decoder.extend(&bytes[split..]);
            out.extend(drain(&mut decoder));
            assert_eq!(out, frames, "split at {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let frames = sample_frames();
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        for byte in stream(&frames) {
            decoder.extend(&[byte]);
            out.extend(drain(&mut decoder));
        }
        assert_eq!(out, frames);
    }

    #[test]
    fn test_resync_after_corruption() {
        let first = Frame::Data(b"first frame".to_vec());
        let bad = Frame::Data(b"corrupt me".to_vec());
        let next = Frame::Data(b"still arrives".to_vec());
        let mut bytes = stream(&[first.clone(), bad, next.clone()]);

        // Flip a byte inside the second payload
        let offset = first.wire_len() + FRAME_HEAD.len() + LEN_FIELD_SIZE + 2;
        bytes[offset] ^= 0x5A;

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(drain(&mut decoder), vec![first, next]);
        assert_eq!(decoder.corrupted(), 1);
    }

    #[test]
    fn test_heartbeats_are_transparent() {
        let data: Vec<Frame> = (0..5u8).map(|i| Frame::Data(vec![i; 3])).collect();
        let mut interleaved = Vec::new();
        for frame in &data {
            interleaved.push(Frame::Heartbeat);
            interleaved.push(frame.clone());
        }

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream(&interleaved));
        let only_data: Vec<Frame> = drain(&mut decoder)
            .into_iter()
            .filter(|f| !matches!(f, Frame::Heartbeat))
            .collect();
        assert_eq!(only_data, data);
    }

    #[test]
    fn test_garbage_prefix_is_skipped() {
        let frame = Frame::Data(b"payload".to_vec());
        let mut bytes = b"noise before".to_vec();
        frame.encode_into(&mut bytes);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_frame(), Some(frame));
        assert_eq!(decoder.next_frame(), None);
    }

    #[test]
    fn test_partial_marker_is_kept() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"xxframe");
        assert_eq!(decoder.next_frame(), None);
        assert_eq!(decoder.buffered(), 7);

        decoder.extend(b"head");
        decoder.extend(&0u32.to_le_bytes());
        decoder.extend(&0u64.to_le_bytes());
        assert_eq!(decoder.next_frame(), Some(Frame::Data(vec![])));
    }

    #[test]
    fn test_noise_does_not_accumulate() {
        let mut decoder = FrameDecoder::new();
        for _ in 0..100 {
            decoder.extend(&[b'z'; 100]);
            assert_eq!(decoder.next_frame(), None);
        }
        assert!(decoder.buffered() < FRAME_HEAD.len());
    }

    #[test]
    fn test_oversized_length_resyncs() {
        let mut bytes = FRAME_HEAD.to_vec();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        let good = Frame::Data(b"ok".to_vec());
        good.encode_into(&mut bytes);

        let mut decoder = FrameDecoder::with_max_frame_len(64);
        decoder.extend(&bytes);
        assert_eq!(decoder.next_frame(), Some(good));
        assert_eq!(decoder.corrupted(), 1);
    }

    #[test]
    fn test_heartbeat_text_inside_payload() {
        let frame = Frame::Data(b"xxheartbeatxx".to_vec());
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame.encode());
        assert_eq!(drain(&mut decoder), vec![frame]);
    }
}
