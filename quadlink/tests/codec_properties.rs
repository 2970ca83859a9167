//! Property tests for the wire codecs
//!
//! - control and parameter bodies survive encode/decode for any values
//! - sensor bodies carry exactly the flagged blocks
//! - frame decoding does not depend on how the stream is chunked
//! - a corrupted frame costs only itself
//!
//! Run with: `cargo test --test codec_properties`

use proptest::prelude::*;
use quadlink::protocol::sensor::expected_len;
use quadlink::protocol::{
    Block, CommandState, Gait, ParameterSet, Protocol, SensorFrame, SystemState,
};
use quadlink::transport::{Frame, FrameDecoder};

fn drain(decoder: &mut FrameDecoder, out: &mut Vec<Frame>) {
    while let Some(frame) = decoder.next_frame() {
        out.push(frame);
    }
}

fn any_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        3 => proptest::collection::vec(any::<u8>(), 0..64).prop_map(Frame::Data),
        1 => Just(Frame::Heartbeat),
    ]
}

// ── Control bodies ────────────────────────────────────────────

proptest! {
    #[test]
    fn system_state_round_trip(basic in any::<u8>(), gait in any::<u8>()) {
        let state = SystemState { basic, gait };
        prop_assert_eq!(SystemState::decode(&state.encode()).unwrap(), state);
    }

    #[test]
    fn command_state_round_trip(switch in any::<u8>(), gait in any::<u8>(), rc in any::<u8>()) {
        let cmd = CommandState { switch, gait, rc };
        prop_assert_eq!(CommandState::decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn control_bodies_reject_other_lengths(body in proptest::collection::vec(any::<u8>(), 0..8)) {
        prop_assert_eq!(SystemState::decode(&body).is_ok(), body.len() == SystemState::LEN);
        prop_assert_eq!(CommandState::decode(&body).is_ok(), body.len() == CommandState::LEN);
    }
}

// ── Parameters ────────────────────────────────────────────────

proptest! {
    #[test]
    fn parameter_set_round_trip(values in proptest::collection::vec(-1e6f32..1e6f32, 21)) {
        let mut set = ParameterSet::new();
        for (gait, tuple) in Gait::ALL.into_iter().zip(values.chunks_exact(3)) {
            set.set(gait, [tuple[0], tuple[1], tuple[2]]);
        }

        prop_assert_eq!(ParameterSet::decode(&set.encode()).unwrap(), Some(set));
        prop_assert_eq!(ParameterSet::from_text(&set.to_text()).unwrap(), set);
    }
}

// ── Sensor ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn sensor_body_carries_flagged_blocks(
        flags in 0u8..16,
        values in proptest::collection::vec(-1e6f32..1e6f32, 52),
    ) {
        let mut source = SensorFrame::new();
        let mut values = values.into_iter();
        for block in Block::ALL {
            let (time, slots) = source.block_mut(block);
            *time = values.next().unwrap_or_default();
            for v in slots {
                *v = values.next().unwrap_or_default();
            }
            if flags & block.flag() != 0 {
                source.mark_dirty(block);
            }
        }

        let body = source.encode();
        prop_assert_eq!(body.len(), expected_len(flags));
        prop_assert_eq!(source.dirty_flags(), 0);

        let decoded = SensorFrame::from_bytes(&body).unwrap();
        prop_assert_eq!(decoded.dirty_flags(), flags);
        for block in Block::ALL {
            if flags & block.flag() != 0 {
                prop_assert_eq!(decoded.block(block), source.block(block));
            } else {
                let (time, slots) = decoded.block(block);
                prop_assert_eq!(time, 0.0);
                prop_assert!(slots.iter().all(|v| *v == 0.0));
            }
        }
    }

    #[test]
    fn sensor_body_length_must_match_flags(
        flags in 0u8..16,
        extra in 1usize..8,
        trim in any::<bool>(),
    ) {
        let expected = expected_len(flags);
        let len = if trim && expected > extra { expected - extra } else { expected + extra };
        let mut body = vec![0u8; len];
        body[0] = flags;

        let mut frame = SensorFrame::new();
        prop_assert!(frame.decode(&body).is_err());
        prop_assert_eq!(frame, SensorFrame::new());
    }
}

// ── Envelopes ─────────────────────────────────────────────────

proptest! {
    /// Arbitrary input never panics and a reply never asks for an ack
    #[test]
    fn process_tolerates_any_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let mut protocol = Protocol::new();
        if let Some(reply) = protocol.process(&bytes) {
            prop_assert_eq!(reply[1], 0);
        }
    }
}

// ── Framing ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn chunking_does_not_change_frames(
        frames in proptest::collection::vec(any_frame(), 1..8),
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
    ) {
        let stream: Vec<u8> = frames.iter().flat_map(Frame::encode).collect();

        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len())).collect();
        points.push(stream.len());
        points.sort_unstable();

        let mut decoder = FrameDecoder::new();
        let mut chunked = Vec::new();
        let mut from = 0;
        for to in points {
            decoder.extend(&stream[from..to]);
            drain(&mut decoder, &mut chunked);
            from = to;
        }

        prop_assert_eq!(&chunked, &frames);
        prop_assert_eq!(decoder.corrupted(), 0);
    }

    #[test]
    fn corrupt_frame_loses_only_itself(
        // Payload bytes stay below the marker letters so no marker appears inside
        payloads in proptest::collection::vec(
            proptest::collection::vec(0u8..0x60, 1..48),
            2..6,
        ),
        victim in any::<prop::sample::Index>(),
        at in any::<prop::sample::Index>(),
        mask in 1u8..0x20,
    ) {
        let k = victim.index(payloads.len());
        let frames: Vec<Frame> = payloads.into_iter().map(Frame::Data).collect();

        let mut stream = Vec::new();
        let mut payload_at = 0;
        for (i, frame) in frames.iter().enumerate() {
            if i == k {
                // Marker and length field precede the payload
                payload_at = stream.len() + 9 + 4;
            }
            frame.encode_into(&mut stream);
        }
        let Frame::Data(victim_payload) = &frames[k] else {
            unreachable!();
        };
        stream[payload_at + at.index(victim_payload.len())] ^= mask;

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        let mut decoded = Vec::new();
        drain(&mut decoder, &mut decoded);

        let expected: Vec<Frame> = frames
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != k)
            .map(|(_, f)| f.clone())
            .collect();
        prop_assert_eq!(decoded, expected);
        prop_assert_eq!(decoder.corrupted(), 1);
    }
}
