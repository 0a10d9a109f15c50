//! EncroCrypt container codec.
//!
//! Wraps an arbitrary byte stream into a sequence of self-describing,
//! authenticated packets whose symmetric keys are themselves wrapped in
//! signed public-key envelopes. A [`codec::Writer`] appends packets to an
//! append-only output; a [`codec::Reader`] consumes them end-to-end,
//! resynchronising past corruption and never emitting plaintext that has
//! not passed AEAD verification.
//!
//! The five cooperating pieces, leaves-first:
//!
//! - [`framer`] packs and parses the on-disk packet envelope.
//! - [`resync`] scans forward for the magic token after a framing error.
//! - [`envelope`] wraps and unwraps the per-session symmetric key with an
//!   external OpenPGP implementation.
//! - [`aead`] performs per-packet authenticated encryption.
//! - [`codec`] drives the writer and reader state machines on top of the
//!   above.

pub mod aead;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod framer;
pub mod resync;

pub use codec::{Reader, Writer};
pub use config::Config;
pub use error::{AeadError, CodecError, EnvelopeError, FramingError, Result};
