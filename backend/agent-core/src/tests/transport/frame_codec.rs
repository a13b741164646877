// Unit tests for the length-prefixed frame codec

use crate::error::transport::TransportError;
use crate::transport::frame_codec::{
    FRAME_HEADER_LEN, declared_len, encode_frame, extract_frame, length_header,
};

fn encode(payload: &[u8]) -> Vec<u8> {
    encode_frame(payload).expect("payload fits in 32 bits")
}

/// Feeds `stream` to a fresh buffer in chunks cut at `cuts` and collects every frame.
fn drain_in_chunks(stream: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut frames = Vec::new();
    let mut start = 0;

    for &end in cuts.iter().chain(std::iter::once(&stream.len())) {
        buffer.extend_from_slice(&stream[start..end]);
        while let Some(frame) = extract_frame(&mut buffer) {
            frames.push(frame);
        }
        start = end;
    }

    assert!(buffer.is_empty(), "No bytes should remain after the last frame");
    frames
}

/// **VALUE**: Verifies the exact wire layout of an encoded frame.
///
/// **WHY THIS MATTERS**: The controller is a separate program. If the header is not a
/// 4-byte big-endian length, every message is misread on the other side.
///
/// **BUG THIS CATCHES**: Would catch little-endian headers or a header that counts itself.
#[test]
fn given_payload_when_encoded_then_prefixes_big_endian_length() {
    // GIVEN: A 5-byte payload
    let payload = b"hello";

    // WHEN: Encoding it
    let frame = encode(payload);

    // THEN: Header is 0x00000005 followed by the payload
    assert_eq!(&frame[..FRAME_HEADER_LEN], &[0, 0, 0, 5]);
    assert_eq!(&frame[FRAME_HEADER_LEN..], payload);
}

/// **VALUE**: Verifies that "no frame yet" leaves the buffer byte-for-byte unchanged.
///
/// **WHY THIS MATTERS**: TCP delivers arbitrary fragments. Consuming bytes of an
/// incomplete frame would desynchronize the stream for the rest of the session.
///
/// **BUG THIS CATCHES**: Would catch draining the header before the payload has arrived.
#[test]
fn given_incomplete_buffers_when_extracting_then_returns_none_and_leaves_buffer_unchanged() {
    // GIVEN: Empty, short-header and short-payload buffers
    let mut truncated = encode(b"partial payload");
    truncated.truncate(truncated.len() - 1);
    let cases: Vec<Vec<u8>> = vec![Vec::new(), vec![0, 0, 1], truncated];

    for case in cases {
        let mut buffer = case.clone();

        // WHEN: Extracting
        let frame = extract_frame(&mut buffer);

        // THEN: Nothing is returned and nothing is consumed
        assert!(frame.is_none(), "Should not extract from {case:?}");
        assert_eq!(buffer, case, "Buffer must be untouched");
    }
}

/// **VALUE**: Verifies that a huge declared length is treated as "not yet", not as an error.
///
/// **WHY THIS MATTERS**: The codec does not bound frame sizes; that decision is made one
/// layer up. The codec itself must never panic on an absurd header.
///
/// **BUG THIS CATCHES**: Would catch overflow in `4 + len` or slicing past the buffer end.
#[test]
fn given_max_declared_length_when_extracting_then_waits_for_more_bytes() {
    // GIVEN: A header declaring u32::MAX bytes and a few payload bytes
    let mut buffer = u32::MAX.to_be_bytes().to_vec();
    buffer.extend_from_slice(b"abc");
    let before = buffer.clone();

    // WHEN: Extracting
    let frame = extract_frame(&mut buffer);

    // THEN: No frame and no change
    assert!(frame.is_none());
    assert_eq!(buffer, before);
    assert_eq!(declared_len(&buffer), Some(u32::MAX));
}

/// **VALUE**: Verifies round-trips across payload sizes from empty to 64 KiB.
///
/// **WHY THIS MATTERS**: Empty payloads are valid protobuf messages (all fields default),
/// and large read results cross several TCP reads.
///
/// **BUG THIS CATCHES**: Would catch rejecting zero-length frames or truncating large ones.
#[test]
fn given_payloads_up_to_64k_when_round_tripped_then_identical() {
    for size in [0usize, 1, 3, 4, 5, 255, 256, 4096, 65_535, 65_536, 70_000] {
        // GIVEN: A payload of `size` patterned bytes
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

        // WHEN: Encoding then extracting
        let mut buffer = encode(&payload);
        let frame = extract_frame(&mut buffer);

        // THEN: Same payload, empty buffer
        assert_eq!(frame.as_deref(), Some(payload.as_slice()), "size {size}");
        assert!(buffer.is_empty());
    }
}

/// **VALUE**: Verifies that several frames delivered in one read are all drained in order.
///
/// **WHY THIS MATTERS**: A fast controller pipelines commands. One `read()` often contains
/// more than one frame plus the start of the next.
///
/// **BUG THIS CATCHES**: Would catch extracting only the first frame per read, or dropping
/// the trailing partial frame.
#[test]
fn given_two_frames_and_partial_when_extracting_repeatedly_then_drains_complete_frames() {
    // GIVEN: Two complete frames followed by half of a third
    let third = encode(b"third");
    let mut buffer = encode(b"first");
    buffer.extend(encode(b"second"));
    buffer.extend_from_slice(&third[..6]);

    // WHEN: Extracting until none is left
    let mut frames = Vec::new();
    while let Some(frame) = extract_frame(&mut buffer) {
        frames.push(frame);
    }

    // THEN: Both complete frames in order, partial third still buffered
    assert_eq!(frames, vec![b"first".to_vec(), b"second".to_vec()]);
    assert_eq!(buffer, third[..6].to_vec());
}

/// **VALUE**: Verifies chunk-boundary independence for every split point.
///
/// **WHY THIS MATTERS**: Where TCP cuts the stream is outside our control. Decoding must
/// give the same frames no matter how the bytes were chunked.
///
/// **BUG THIS CATCHES**: Would catch any state that depends on a read starting at a frame
/// boundary.
#[test]
fn given_any_chunking_when_extracting_then_yields_original_sequence() {
    // GIVEN: Three frames of different sizes, including an empty one
    let payloads: Vec<Vec<u8>> = vec![b"alpha".to_vec(), Vec::new(), vec![7u8; 300]];
    let stream: Vec<u8> = payloads.iter().flat_map(|p| encode(p)).collect();

    // WHEN/THEN: Every single cut point yields the original sequence
    for cut in 0..=stream.len() {
        assert_eq!(drain_in_chunks(&stream, &[cut]), payloads, "cut at {cut}");
    }

    // WHEN/THEN: Every fixed chunk size yields the original sequence
    for chunk_size in 1..=stream.len() {
        let cuts: Vec<usize> = (chunk_size..stream.len()).step_by(chunk_size).collect();
        assert_eq!(
            drain_in_chunks(&stream, &cuts),
            payloads,
            "chunk size {chunk_size}"
        );
    }
}

/// **VALUE**: Verifies the oversized-payload guard reports a typed error.
///
/// **WHY THIS MATTERS**: Encoding must never emit a header that disagrees with the payload.
///
/// **BUG THIS CATCHES**: Would catch a silent `as u32` truncation of the length.
#[test]
fn given_frame_too_large_error_when_displayed_then_names_limit() {
    // GIVEN: The error the encoder returns for oversized payloads
    let error = TransportError::FrameTooLarge {
        declared: 10,
        limit: 4,
        location: common::ErrorLocation::caller(),
    };

    // WHEN: Rendering it
    let rendered = error.to_string();

    // THEN: Both numbers are present
    assert!(rendered.contains("declared 10 bytes"));
    assert!(rendered.contains("limit 4"));
}

/// **VALUE**: Verifies the header for the largest representable length and the
/// error for one byte more.
///
/// **WHY THIS MATTERS**: The error is what an operator sees when an event grows
/// past 4 GiB; it has to name the real size.
///
/// **BUG THIS CATCHES**: Would catch reporting `u32::MAX` instead of the actual
/// payload length.
#[cfg(target_pointer_width = "64")]
#[test]
fn given_length_over_u32_when_building_header_then_error_carries_real_length() {
    // GIVEN: The boundary lengths
    let max = u32::MAX as usize;
    let oversized = max + 1;

    // WHEN: Building both headers
    let max_header = length_header(max).expect("u32::MAX fits");
    let error = length_header(oversized).expect_err("u32::MAX + 1 does not fit");

    // THEN: The boundary encodes, the overflow reports its own length
    assert_eq!(max_header, [0xFF, 0xFF, 0xFF, 0xFF]);
    match error {
        TransportError::FrameTooLarge {
            declared, limit, ..
        } => {
            assert_eq!(declared, oversized as u64);
            assert_eq!(limit, u64::from(u32::MAX));
        }
        other => panic!("Expected FrameTooLarge, got {other:?}"),
    }
}
