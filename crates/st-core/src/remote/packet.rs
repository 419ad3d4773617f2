//! Remote serial protocol framing.
//!
//! A packet is `$<payload>#<cc>` where `cc` is the modulo-256 sum of the
//! payload bytes as two lowercase hex digits. Peers acknowledge each packet
//! with a single `+` (or `-` to request a retransmit).

use super::ProtocolError;

pub const ACK: u8 = b'+';
pub const NACK: u8 = b'-';

/// Modulo-256 sum of the payload bytes.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Checksum as sent on the wire.
pub fn checksum_hex(payload: &str) -> String {
    format!("{:02x}", checksum(payload.as_bytes()))
}

/// Frame a command for transmission.
pub fn frame(command: &str) -> String {
    format!("${command}#{}", checksum_hex(command))
}

/// State of a receive buffer after scanning for one packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Scan {
    /// Not enough bytes yet.
    Incomplete,
    /// A full packet; `consumed` bytes of the buffer belong to it.
    Packet { payload: String, consumed: usize },
}

/// Scan `buf` for one complete packet.
///
/// Leading acknowledgement bytes are skipped. Bytes other than `+`/`-`
/// before the `$` are line noise and are skipped as well.
pub fn scan(buf: &[u8]) -> Result<Scan, ProtocolError> {
    let Some(start) = buf.iter().position(|b| *b == b'$') else {
        return Ok(Scan::Incomplete);
    };
    let body = &buf[start + 1..];
    let Some(hash) = body.iter().position(|b| *b == b'#') else {
        return Ok(Scan::Incomplete);
    };
    if body.len() < hash + 3 {
        return Ok(Scan::Incomplete);
    }

    let payload = &body[..hash];
    let sent = &body[hash + 1..hash + 3];
    let sent = std::str::from_utf8(sent)
        .ok()
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .ok_or_else(|| ProtocolError::MalformedFrame(String::from_utf8_lossy(sent).into_owned()))?;
    let computed = checksum(payload);
    if sent != computed {
        return Err(ProtocolError::ChecksumMismatch {
            expected: computed,
            got: sent,
        });
    }

    Ok(Scan::Packet {
        payload: String::from_utf8_lossy(payload).into_owned(),
        consumed: start + 1 + hash + 3,
    })
}

/// Whether `buf` holds the start of a packet that has not finished.
pub fn is_partial(buf: &[u8]) -> bool {
    buf.contains(&b'$')
}

/// `E<nn>` error reply.
pub fn is_error_reply(payload: &str) -> bool {
    payload.len() == 3
        && payload.starts_with('E')
        && payload[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Decode a hex payload into bytes.
pub fn decode_hex(payload: &str) -> Result<Vec<u8>, ProtocolError> {
    hex::decode(payload).map_err(|e| ProtocolError::InvalidHex(e.to_string()))
}

/// Stop reply reporting SIGTRAP, i.e. a completed single step.
pub fn is_step_stop(payload: &str) -> bool {
    payload.starts_with("S05") || payload.starts_with("T05")
}
