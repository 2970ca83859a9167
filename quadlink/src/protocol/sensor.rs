//! Sensor telemetry payload
//!
//! ```text
//! Sensor := flags:u8 block*
//! block  := timestamp:f32 values:f32[N]
//! ```
//!
//! | Bit  | Block | Values | Layout |
//! |------|-------|--------|--------|
//! | 0x01 | forc  | 12 | cylinder force, 4 legs × 3 joints |
//! | 0x02 | disp  | 12 | cylinder displacement, 4 legs × 3 joints |
//! | 0x04 | foot  | 12 | foot force, 4 feet × xyz |
//! | 0x08 | imu   | 9  | attitude / angular velocity / acceleration × 3 axes |
//!
//! Blocks appear in bit order and only when their bit is set. Legs are
//! ordered LF, RF, LB, RB. All values are little-endian.

use crate::error::{Error, Result};
use rand::Rng;

/// Body that asks the receiver to generate a random frame
pub const TEST_BODY: &[u8] = b"test";

/// One flagged block of a sensor frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Forc,
    Disp,
    Foot,
    Imu,
}

impl Block {
    /// Wire order
    pub const ALL: [Block; 4] = [Block::Forc, Block::Disp, Block::Foot, Block::Imu];

    /// Presence bit in the flags byte
    pub const fn flag(self) -> u8 {
        match self {
            Block::Forc => 0x01,
            Block::Disp => 0x02,
            Block::Foot => 0x04,
            Block::Imu => 0x08,
        }
    }

    /// Number of f32 values after the timestamp
    pub const fn value_count(self) -> usize {
        match self {
            Block::Imu => 9,
            _ => 12,
        }
    }

    /// Encoded size including the timestamp
    pub const fn wire_len(self) -> usize {
        4 * (1 + self.value_count())
    }

    pub const fn name(self) -> &'static str {
        match self {
            Block::Forc => "forc",
            Block::Disp => "disp",
            Block::Foot => "foot",
            Block::Imu => "imu",
        }
    }
}

/// Flags byte with every block present
pub const ALL_BLOCKS: u8 = 0x0F;

/// Body length implied by a flags byte (flags byte included)
///
/// Bits above 0x08 carry no block and are ignored.
pub fn expected_len(flags: u8) -> usize {
    1 + Block::ALL
        .iter()
        .filter(|block| flags & block.flag() != 0)
        .map(|block| block.wire_len())
        .sum::<usize>()
}

/// One telemetry sample with per-block dirty tracking
///
/// A block is dirty when it was updated since it was last encoded or
/// archived. Dirty blocks are what `encode` sends and what the archive
/// appends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorFrame {
    /// Cylinder force per leg and joint
    pub forc: [[f32; 3]; 4],
    /// Cylinder displacement per leg and joint
    pub disp: [[f32; 3]; 4],
    /// Foot force per foot, xyz
    pub foot: [[f32; 3]; 4],
    /// Rows: attitude (yaw, pitch, roll), angular velocity, acceleration
    pub imu: [[f32; 3]; 3],
    pub forc_time: f32,
    pub disp_time: f32,
    pub foot_time: f32,
    pub imu_time: f32,
    dirty: u8,
}

impl SensorFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Random sample for testing the pipeline without a robot
    ///
    /// Attitude is drawn from ±90°, angular velocity from ±180, everything
    /// else from [0, 1). All blocks are dirty.
    pub fn synthetic<R: Rng>(rng: &mut R, timestamp: f32) -> Self {
        let mut frame = Self::new();
        for block in Block::ALL {
            let (time, values) = frame.block_mut(block);
            *time = timestamp;
            for v in values {
                *v = rng.gen_range(0.0..1.0);
            }
        }
        for v in &mut frame.imu[0] {
            *v = *v * 180.0 - 90.0;
        }
        for v in &mut frame.imu[1] {
            *v = *v * 360.0 - 180.0;
        }
        frame.dirty = ALL_BLOCKS;
        frame
    }

    /// Timestamp and flattened values of one block
    pub fn block(&self, block: Block) -> (f32, &[f32]) {
        match block {
            Block::Forc => (self.forc_time, self.forc.as_flattened()),
            Block::Disp => (self.disp_time, self.disp.as_flattened()),
            Block::Foot => (self.foot_time, self.foot.as_flattened()),
            Block::Imu => (self.imu_time, self.imu.as_flattened()),
        }
    }

    pub fn block_mut(&mut self, block: Block) -> (&mut f32, &mut [f32]) {
        match block {
            Block::Forc => (&mut self.forc_time, self.forc.as_flattened_mut()),
            Block::Disp => (&mut self.disp_time, self.disp.as_flattened_mut()),
            Block::Foot => (&mut self.foot_time, self.foot.as_flattened_mut()),
            Block::Imu => (&mut self.imu_time, self.imu.as_flattened_mut()),
        }
    }

    pub fn is_dirty(&self, block: Block) -> bool {
        self.dirty & block.flag() != 0
    }

    /// Dirty blocks as a flags byte
    pub fn dirty_flags(&self) -> u8 {
        self.dirty
    }

    pub fn mark_dirty(&mut self, block: Block) {
        self.dirty |= block.flag();
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty = ALL_BLOCKS;
    }

    pub fn clear_dirty(&mut self, block: Block) {
        self.dirty &= !block.flag();
    }

    pub fn clear_all_dirty(&mut self) {
        self.dirty = 0;
    }

    /// Copy every value from `other` and mark every block dirty
    pub fn assign_from(&mut self, other: &SensorFrame) {
        *self = other.clone();
        self.dirty = ALL_BLOCKS;
    }

    /// Copy only the blocks dirty in `other`, marking them dirty here
    pub fn merge_from(&mut self, other: &SensorFrame) {
        for block in Block::ALL {
            if other.is_dirty(block) {
                let (src_time, src) = other.block(block);
                let (time, values) = self.block_mut(block);
                *time = src_time;
                values.copy_from_slice(src);
                self.mark_dirty(block);
            }
        }
    }

    /// Serialize dirty blocks without touching the flags
    pub fn to_bytes(&self) -> Vec<u8> {
        let flags = self.dirty & ALL_BLOCKS;
        let mut body = Vec::with_capacity(expected_len(flags));
        body.push(flags);
        for block in Block::ALL {
            if flags & block.flag() != 0 {
                let (time, values) = self.block(block);
                body.extend_from_slice(&time.to_le_bytes());
                for v in values {
                    body.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        body
    }

    /// Serialize dirty blocks, then clear every dirty flag
    pub fn encode(&mut self) -> Vec<u8> {
        let body = self.to_bytes();
        self.clear_all_dirty();
        body
    }

    /// Apply a wire body: overwrite the flagged blocks and mark them dirty
    ///
    /// The body length must match its flags exactly. On mismatch nothing is
    /// modified.
    pub fn decode(&mut self, body: &[u8]) -> Result<()> {
        let Some(&flags) = body.first() else {
            return Err(Error::InvalidPacket("empty sensor body".to_string()));
        };
        let expected = expected_len(flags);
        if body.len() != expected {
            return Err(Error::LengthMismatch {
                expected,
                actual: body.len(),
            });
        }

        let mut words = body[1..]
            .chunks_exact(4)
            .map(|w| f32::from_le_bytes([w[0], w[1], w[2], w[3]]));
        for block in Block::ALL {
            if flags & block.flag() == 0 {
                continue;
            }
            let (time, values) = self.block_mut(block);
            *time = words.next().unwrap_or_default();
            for v in values {
                *v = words.next().unwrap_or_default();
            }
            self.mark_dirty(block);
        }
        Ok(())
    }

    /// Decode into a fresh frame
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        let mut frame = Self::new();
        frame.decode(body)?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn test_expected_len() {
        assert_eq!(expected_len(0x00), 1);
        assert_eq!(expected_len(0x01), 53);
        assert_eq!(expected_len(0x08), 41);
        assert_eq!(expected_len(0x0F), 1 + 52 * 3 + 40);
        assert_eq!(expected_len(0xF4), 53);
    }

    #[test]
    fn test_encode_only_dirty_blocks() {
        let mut frame = SensorFrame::new();
        frame.imu_time = 2.5;
        frame.imu[2] = [0.0, 0.0, 9.8];
        frame.mark_dirty(Block::Imu);

        let body = frame.encode();
        assert_eq!(body.len(), 41);
        assert_eq!(body[0], 0x08);
        assert_eq!(&body[1..5], &2.5f32.to_le_bytes());
        assert_eq!(&body[37..41], &9.8f32.to_le_bytes());
        assert_eq!(frame.dirty_flags(), 0);
    }

    #[test]
    fn test_decode_restores_encoded_blocks() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut sent = SensorFrame::synthetic(&mut rng, 12.0);
        sent.clear_dirty(Block::Disp);
        let expected = sent.clone();
        let body = sent.encode();

        let mut got = SensorFrame::new();
        got.decode(&body).unwrap();
        assert_eq!(got.forc, expected.forc);
        assert_eq!(got.foot, expected.foot);
        assert_eq!(got.imu, expected.imu);
        assert_eq!(got.imu_time, 12.0);
        assert_eq!(got.disp, [[0.0; 3]; 4]);
        assert!(got.is_dirty(Block::Forc));
        assert!(!got.is_dirty(Block::Disp));
    }

    #[test]
    fn test_decode_keeps_absent_blocks() {
        let mut frame = SensorFrame::new();
        frame.disp[1][1] = 4.0;

        let mut update = SensorFrame::new();
        update.forc[0][0] = 1.0;
        update.mark_dirty(Block::Forc);
        frame.decode(&update.encode()).unwrap();

        assert_eq!(frame.forc[0][0], 1.0);
        assert_eq!(frame.disp[1][1], 4.0);
    }

    #[test]
    fn test_length_mismatch_leaves_frame_untouched() {
        let mut frame = SensorFrame::new();
        frame.forc[0][0] = 3.0;

        let mut body = vec![0x01];
        body.extend(std::iter::repeat_n(0u8, 40));
        assert!(matches!(
            frame.decode(&body),
            Err(Error::LengthMismatch {
                expected: 53,
                actual: 41
            })
        ));
        assert_eq!(frame.forc[0][0], 3.0);
        assert_eq!(frame.dirty_flags(), 0);
    }

    #[test]
    fn test_empty_body_rejected() {
        assert!(matches!(
            SensorFrame::new().decode(&[]),
            Err(Error::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_synthetic_ranges() {
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..50 {
            let frame = SensorFrame::synthetic(&mut rng, 1.0);
            assert_eq!(frame.dirty_flags(), ALL_BLOCKS);
            assert!(frame.imu[0].iter().all(|v| (-90.0..90.0).contains(v)));
            assert!(frame.imu[1].iter().all(|v| (-180.0..180.0).contains(v)));
            assert!(frame.forc.as_flattened().iter().all(|v| (0.0..1.0).contains(v)));
        }
    }

    #[test]
    fn test_assign_from_marks_all_dirty() {
        let mut source = SensorFrame::new();
        source.foot[3] = [1.0, 2.0, 3.0];

        let mut frame = SensorFrame::new();
        frame.assign_from(&source);
        assert_eq!(frame.foot[3], [1.0, 2.0, 3.0]);
        assert_eq!(frame.dirty_flags(), ALL_BLOCKS);
    }

    #[test]
    fn test_merge_copies_dirty_blocks_only() {
        let mut source = SensorFrame::new();
        source.forc[0][0] = 5.0;
        source.disp[0][0] = 6.0;
        source.mark_dirty(Block::Disp);

        let mut frame = SensorFrame::new();
        frame.merge_from(&source);
        assert_eq!(frame.forc[0][0], 0.0);
        assert_eq!(frame.disp[0][0], 6.0);
        assert_eq!(frame.dirty_flags(), Block::Disp.flag());
    }
}
