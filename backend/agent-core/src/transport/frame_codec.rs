//! Length-prefixed framing for the TCP byte stream.
//!
//! Every frame on the wire is a 4-byte big-endian length `N` followed by exactly
//! `N` payload bytes:
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | Payload (N)      |
//! +----------------------------+------------------+
//! ```
//!
//! The codec is stateless. Callers own the receive buffer and call
//! [`extract_frame`] until it returns `None`, so several frames delivered by a
//! single read are all drained. Partial frames stay in the buffer untouched.

use crate::error::transport::TransportError;

use common::ErrorLocation;

use std::panic::Location;

/// Size of the length header in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Returns the payload length declared by the header at the front of `buffer`,
/// or `None` if fewer than [`FRAME_HEADER_LEN`] bytes are buffered.
pub fn declared_len(buffer: &[u8]) -> Option<u32> {
    let header: [u8; FRAME_HEADER_LEN] = buffer.get(..FRAME_HEADER_LEN)?.try_into().ok()?;
    Some(u32::from_be_bytes(header))
}

/// Removes one complete frame from the front of `buffer` and returns its payload.
///
/// Returns `None` and leaves `buffer` unchanged when the header is incomplete or
/// the declared payload has not fully arrived. No upper bound is applied to the
/// declared length here.
pub fn extract_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let len = declared_len(buffer)? as usize;
    let frame_len = FRAME_HEADER_LEN.checked_add(len)?;

    if buffer.len() < frame_len {
        return None;
    }

    let payload = buffer[FRAME_HEADER_LEN..frame_len].to_vec();
    buffer.drain(..frame_len);
    Some(payload)
}

/// Prepends the big-endian length header to `payload`.
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] if the payload length does not fit
/// in 32 bits.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let header = length_header(payload.len())?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Big-endian header declaring a payload of `len` bytes.
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] carrying `len` if it exceeds
/// `u32::MAX`.
#[track_caller]
pub fn length_header(len: usize) -> Result<[u8; FRAME_HEADER_LEN], TransportError> {
    let declared = u32::try_from(len).map_err(|_| TransportError::FrameTooLarge {
        declared: len as u64,
        limit: u64::from(u32::MAX),
        location: ErrorLocation::from(Location::caller()),
    })?;
    Ok(declared.to_be_bytes())
}
