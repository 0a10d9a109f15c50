//! Error taxonomy for the container codec.
//!
//! Mirrors the four-way classification from the format design: recoverable
//! framing errors, recoverable envelope errors, fatal input errors, and
//! configuration errors. The reader's main loop matches on [`CodecError`] to
//! decide whether to log-and-continue or to stop.

use thiserror::Error;

/// Errors raised while packing or parsing the on-disk packet envelope.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("expected magic token, found other bytes")]
    ExpectedMagic,

    #[error("truncated read: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("stream ended after {got} of 4 length-field bytes")]
    TruncatedLength { got: usize },

    #[error("declared packet length {0} exceeds PACKET_MAXLENGTH")]
    LengthTooLarge(u32),

    #[error("declared packet length is zero")]
    ZeroLength,

    #[error("magic token found inside packet payload")]
    EmbeddedMagic,

    #[error("unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while wrapping or unwrapping a symmetric key in a KEY
/// packet's OpenPGP envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("failed to wrap key: {0}")]
    WrapFailed(String),

    #[error("failed to decrypt KEY packet: {0}")]
    DecryptFailed(String),

    #[error(
        "KEY packet signed by fingerprint {got}, expected {expected}"
    )]
    SignatureMismatch { expected: String, got: String },

    #[error("unwrapped key material is not exactly 16 bytes (got {0})")]
    BadKeyLength(usize),
}

/// Errors raised by the AEAD engine.
#[derive(Debug, Error)]
pub enum AeadError {
    #[error("AEAD authentication tag did not verify (MAC invalid)")]
    MacInvalid,

    #[error("plaintext too large for a single packet ({0} bytes)")]
    PlaintextTooLarge(usize),
}

/// Top-level codec error. Distinguishes recoverable conditions (which the
/// reader logs and continues past) from fatal ones (which terminate the
/// read loop) and configuration errors (which abort before any packet is
/// emitted).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Aead(#[from] AeadError),

    #[error("unrecoverable truncation at offset {offset}: {reason}")]
    UnrecoverableTruncation { offset: u64, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
