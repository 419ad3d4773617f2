//! Remote debug target access.
//!
//! [`RemoteTarget`] is the seam between the recording loop and the wire:
//! the loop only ever sees typed results, so tests drive it with scripted
//! targets and production uses [`GdbClient`] over TCP.

pub mod client;
pub mod packet;

use st_common::{RegisterBank, REGISTER_COUNT};
use st_config::ByteOrder;
use thiserror::Error;

pub use client::{connect, GdbClient};

/// Hex characters in a full register read reply.
pub const REGISTER_PAYLOAD_LEN: usize = REGISTER_COUNT * 8;

/// Connection-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake with {address} failed")]
    HandshakeFailed { address: String },

    #[error("read timeout after {millis}ms")]
    ReadTimeout { millis: u64 },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A reply arrived but could not be understood.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("truncated reply: {0:?}")]
    Truncated(String),

    #[error("checksum mismatch: computed {expected:02x}, received {got:02x}")]
    ChecksumMismatch { expected: u8, got: u8 },

    #[error("invalid hex payload: {0}")]
    InvalidHex(String),

    #[error("register payload too short: {got} hex chars, need {need}")]
    RegisterPayload { got: usize, need: usize },

    #[error("target replied with error {0}")]
    ErrorReply(String),
}

/// Any failure of a remote target operation.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TargetError {
    pub fn is_transport(&self) -> bool {
        matches!(self, TargetError::Transport(_))
    }
}

impl From<TransportError> for st_common::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect { address, source } => st_common::Error::Connect {
                address,
                reason: source.to_string(),
            },
            TransportError::HandshakeFailed { address } => {
                st_common::Error::HandshakeFailed { address }
            }
            TransportError::ReadTimeout { millis } => st_common::Error::ReadTimeout { millis },
            TransportError::ConnectionClosed => st_common::Error::ConnectionClosed,
            TransportError::Io(e) => st_common::Error::Io(e),
        }
    }
}

impl From<TargetError> for st_common::Error {
    fn from(err: TargetError) -> Self {
        match err {
            TargetError::Transport(e) => e.into(),
            TargetError::Protocol(ProtocolError::RegisterPayload { got, need }) => {
                st_common::Error::RegisterPayload { got, need }
            }
            TargetError::Protocol(e) => st_common::Error::Protocol(e.to_string()),
        }
    }
}

/// Operations the recorder needs from a halted target.
pub trait RemoteTarget {
    /// Execute one instruction. `Ok(false)` means the target did not report
    /// a completed step and recording must stop.
    fn single_step(&mut self) -> Result<bool, TargetError>;

    fn read_registers(&mut self) -> Result<RegisterBank, TargetError>;

    /// Read `len` bytes at `address`. An empty result means the memory was
    /// unavailable, never that it holds zeros.
    fn read_memory(&mut self, address: u32, len: u32) -> Result<Vec<u8>, TargetError>;

    /// Drop replies that arrived after their request gave up and return
    /// their payloads. Called before a timed-out request is sent again.
    fn resync(&mut self) -> Result<Vec<String>, TargetError> {
        Ok(Vec::new())
    }
}

impl<T: RemoteTarget + ?Sized> RemoteTarget for &mut T {
    fn single_step(&mut self) -> Result<bool, TargetError> {
        (**self).single_step()
    }

    fn read_registers(&mut self) -> Result<RegisterBank, TargetError> {
        (**self).read_registers()
    }

    fn read_memory(&mut self, address: u32, len: u32) -> Result<Vec<u8>, TargetError> {
        (**self).read_memory(address, len)
    }

    fn resync(&mut self) -> Result<Vec<String>, TargetError> {
        (**self).resync()
    }
}

/// Decode a `g` reply into the register bank.
///
/// Each register is 8 hex characters in wire order. Extra trailing
/// registers (FPU state on some stubs) are ignored.
pub fn decode_registers(payload: &str, order: ByteOrder) -> Result<RegisterBank, ProtocolError> {
    if payload.len() < REGISTER_PAYLOAD_LEN {
        return Err(ProtocolError::RegisterPayload {
            got: payload.len(),
            need: REGISTER_PAYLOAD_LEN,
        });
    }
    let registers = payload
        .get(..REGISTER_PAYLOAD_LEN)
        .ok_or_else(|| ProtocolError::InvalidHex("non-ASCII register payload".to_string()))?;
    let bytes = packet::decode_hex(registers)?;

    let mut words = [0u32; REGISTER_COUNT];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
        *word = match order {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        };
    }
    Ok(RegisterBank::from_words(words))
}
