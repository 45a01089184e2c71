//! Terminator-delimited frames.
//!
//! Every message in either direction is UTF-8 text followed by a single
//! 0x04 (End of Transmission) byte. There is no length prefix, so the only
//! way to find a frame boundary is to scan for the terminator.

use bytes::{BufMut, Bytes, BytesMut};
use memchr::memchr;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const TERMINATOR: u8 = 0x04;

// -----------------------------------------------------------------------------
// ----- encode_frame ----------------------------------------------------------

/// Append `message` plus the terminator to `out`.
#[inline]
pub fn encode_frame(message: &[u8], terminator: u8, out: &mut BytesMut) {
    out.reserve(message.len() + 1);
    out.extend_from_slice(message);
    out.put_u8(terminator);
}

// -----------------------------------------------------------------------------
// ----- split_frame -----------------------------------------------------------

/// Take one complete frame, terminator included, off the front of `inbox`.
///
/// Returns `None` when the terminator hasn't arrived yet; `inbox` is left
/// untouched in that case.
#[inline]
pub fn split_frame(inbox: &mut BytesMut, terminator: u8) -> Option<Bytes> {
    let end = memchr(terminator, inbox)?;
    Some(inbox.split_to(end + 1).freeze())
}

/// Frame contents without the trailing terminator.
#[inline]
pub fn strip_terminator(frame: &[u8], terminator: u8) -> &[u8] {
    match frame.split_last() {
        Some((last, rest)) if *last == terminator => rest,
        _ => frame,
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
