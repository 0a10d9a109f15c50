//! Codec State Machine: the top-level encrypt and decrypt drivers.
//!
//! [`Writer`] owns the current symmetric key and invocation counter and
//! turns plaintext chunks into framed, encrypted packets. [`Reader`] runs
//! the packet loop on the other side: it resynchronises past corruption,
//! dispatches KEY and DATA packets, and never emits plaintext that has not
//! passed AEAD verification.

use crate::aead::{self, KEY_LEN, NONCE_LEN};
use crate::config::Config;
use crate::envelope;
use crate::error::{CodecError, FramingError, Result};
use crate::framer::{self, PacketType, PACKET_MAXLENGTH};
use crate::resync::{self, PushbackReader, ResyncOutcome};
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Per-DATA-packet overhead: `timestamp(4) || nonce(16) || tag(16)`.
const DATA_OVERHEAD: usize = 4 + NONCE_LEN + 16;

/// Upper bound on AEAD invocations under one key before rotation.
///
/// The source's rotation check used strict `>`, which lets a key see
/// `2^32 + 1` invocations before a new one is generated. Rotating on `>=`
/// keeps every key strictly within the NIST SP 800-38D bound.
pub const MAX_GCM_INVOCATIONS: u64 = 1 << 32;

/// Writer session. Owns the current key and invocation counter; never
/// buffers plaintext across calls to [`Writer::encrypt`].
pub struct Writer {
    config: Config,
    current_key: Option<Zeroizing<[u8; KEY_LEN]>>,
    invocations_under_current_key: u64,
}

impl Writer {
    pub fn new(config: Config) -> Self {
        Writer {
            config,
            current_key: None,
            invocations_under_current_key: 0,
        }
    }

    /// Encrypts `chunk`, returning the bytes to append to the output file.
    /// Allocates and frames a fresh KEY packet on the first call and again
    /// whenever the invocation bound is reached.
    pub fn encrypt(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();

        if self.current_key.is_none() {
            self.rotate_key(&mut out)?;
        }

        let mut remaining = chunk;
        while !remaining.is_empty() {
            if self.invocations_under_current_key >= MAX_GCM_INVOCATIONS {
                self.rotate_key(&mut out)?;
            }

            let take = remaining.len().min(PACKET_MAXLENGTH as usize - DATA_OVERHEAD);
            let (slice, rest) = remaining.split_at(take);
            remaining = rest;

            let key = self.current_key.as_deref().copied().expect("key established above");
            let nonce = aead::generate_nonce();
            let (ciphertext, tag) = aead::encrypt_chunk(&key, &nonce, slice)?;

            let timestamp = current_minute();
            let mut payload = Vec::with_capacity(DATA_OVERHEAD + ciphertext.len());
            payload.extend_from_slice(&timestamp.to_be_bytes());
            payload.extend_from_slice(&nonce);
            payload.extend_from_slice(&ciphertext);
            payload.extend_from_slice(&tag);

            out.extend_from_slice(&framer::pack(PacketType::Data, &payload));
            self.invocations_under_current_key += 1;
        }

        Ok(out)
    }

    fn rotate_key(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let key = aead::generate_key();
        let encrypt_fingerprint = self
            .config
            .encrypt_fingerprint
            .as_deref()
            .ok_or_else(|| CodecError::Configuration("writer requires an encrypt_fingerprint".into()))?;

        let wrapped = envelope::wrap(
            &key,
            encrypt_fingerprint,
            &self.config.signing_fingerprint,
            self.config.keystore_path.as_deref(),
        )?;

        out.extend_from_slice(&framer::pack(PacketType::Key, &wrapped));
        self.current_key = Some(Zeroizing::new(key));
        self.invocations_under_current_key = 0;
        debug!("rotated to a fresh symmetric key");
        Ok(())
    }
}

fn current_minute() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (secs / 60) as u32
}

/// Reader session state, tracked only for diagnostics (the one-shot
/// "data before key" warning and end-of-input handling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingKey,
    Keyed,
    Terminated,
}

/// Reader session. Runs the packet loop described in the codec's decrypt
/// operation: resynchronise past corruption, dispatch by packet type,
/// never write plaintext that hasn't verified.
pub struct Reader {
    config: Config,
    current_key: Option<Zeroizing<[u8; KEY_LEN]>>,
    state: State,
    warned_data_before_key: bool,
}

impl Reader {
    pub fn new(config: Config) -> Self {
        Reader {
            config,
            current_key: None,
            state: State::AwaitingKey,
            warned_data_before_key: false,
        }
    }

    /// Consumes `input` until end of stream, writing verified plaintext to
    /// `output`. If `seek_until` is given, DATA packets whose stored
    /// timestamp (in seconds) is earlier than it are skipped without
    /// decryption.
    pub fn decrypt<R: Read, W: Write>(
        &mut self,
        input: R,
        mut output: W,
        seek_until: Option<u64>,
    ) -> Result<()> {
        let mut reader = PushbackReader::new(input);

        loop {
            let magic = reader.read(framer::MAGIC.len())?;
            if magic.is_empty() {
                self.state = State::Terminated;
                return Ok(());
            }

            if magic.as_slice() != framer::MAGIC.as_slice() {
                reader.push_back(magic);
                match resync::resynchronise(&mut reader, framer::MAGIC.as_slice())? {
                    ResyncOutcome::Found => {
                        warn!(offset = reader.offset(), "resynchronised after noise in input");
                        // The resynchroniser has already consumed the magic
                        // token; push it back so the normal per-iteration
                        // magic check and read_packet call below see it again.
                        reader.push_back(framer::MAGIC.to_vec());
                        continue;
                    }
                    ResyncOutcome::EndOfStream => {
                        self.state = State::Terminated;
                        return Err(CodecError::UnrecoverableTruncation {
                            offset: reader.offset(),
                            reason: "end of stream while resynchronising".into(),
                        });
                    }
                }
            }

            reader.push_back(magic);
            match framer::read_packet(&mut reader) {
                Ok((packet_type, payload)) => self.dispatch(packet_type, payload, &mut output, seek_until)?,
                Err(FramingError::EmbeddedMagic) => {
                    warn!(offset = reader.offset(), "discarded packet containing embedded magic");
                    continue;
                }
                Err(FramingError::LengthTooLarge(len)) => {
                    warn!(offset = reader.offset(), length = len, "oversize length, treating as noise");
                    continue;
                }
                Err(FramingError::ZeroLength) => {
                    warn!(offset = reader.offset(), "zero-length packet, treating as noise");
                    continue;
                }
                Err(FramingError::Truncated { expected, got }) => {
                    self.state = State::Terminated;
                    return Err(CodecError::UnrecoverableTruncation {
                        offset: reader.offset(),
                        reason: format!("truncated packet: expected {expected} bytes, got {got}"),
                    });
                }
                Err(FramingError::TruncatedLength { got }) => {
                    // The stream ended mid-length-field: magic and the type
                    // byte were both read cleanly, but no more bytes follow.
                    // Treated as a clean end of input rather than a failure,
                    // matching an append-only writer that stops between
                    // packets rather than mid-header.
                    debug!(offset = reader.offset(), got, "stream ended at a length field, treating as clean EOF");
                    self.state = State::Terminated;
                    return Ok(());
                }
                Err(other) => {
                    warn!(offset = reader.offset(), error = %other, "framing error, discarding packet");
                    continue;
                }
            }
        }
    }

    fn dispatch<W: Write>(
        &mut self,
        packet_type: PacketType,
        payload: Vec<u8>,
        output: &mut W,
        seek_until: Option<u64>,
    ) -> Result<()> {
        match packet_type {
            PacketType::Key => self.handle_key(payload),
            PacketType::Data => self.handle_data(payload, output, seek_until),
            PacketType::Unknown(byte) => {
                warn!(type_byte = byte, "unknown packet type, treating as corruption");
                Ok(())
            }
        }
    }

    fn handle_key(&mut self, payload: Vec<u8>) -> Result<()> {
        match envelope::unwrap(
            &payload,
            &self.config.signing_fingerprint,
            self.config.keystore_path.as_deref(),
        ) {
            Ok((key, signer)) => {
                self.current_key = Some(Zeroizing::new(key));
                self.state = State::Keyed;
                self.warned_data_before_key = false;
                info!(signer = %signer, "adopted new symmetric key");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "rejected KEY packet");
                Ok(())
            }
        }
    }

    fn handle_data<W: Write>(&mut self, payload: Vec<u8>, output: &mut W, seek_until: Option<u64>) -> Result<()> {
        if payload.len() < DATA_OVERHEAD {
            warn!(len = payload.len(), "DATA packet shorter than fixed overhead, discarding");
            return Ok(());
        }

        let timestamp = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let nonce_start = 4;
        let ciphertext_start = nonce_start + NONCE_LEN;
        let tag_start = payload.len() - 16;

        let nonce: [u8; NONCE_LEN] = payload[nonce_start..ciphertext_start]
            .try_into()
            .expect("fixed-size slice");
        let ciphertext = &payload[ciphertext_start..tag_start];
        let tag: [u8; 16] = payload[tag_start..].try_into().expect("fixed-size slice");

        let Some(key) = self.current_key.as_deref().copied() else {
            if !self.warned_data_before_key {
                warn!("data before key: discarding DATA packets until a KEY packet is accepted");
                self.warned_data_before_key = true;
            }
            return Ok(());
        };

        if let Some(seek_until) = seek_until {
            let stored_seconds = timestamp as u64 * 60;
            if stored_seconds < seek_until {
                debug!(stored_seconds, seek_until, "skipping packet before seek target");
                return Ok(());
            }
        }

        match aead::decrypt_chunk(&key, &nonce, ciphertext, &tag) {
            Ok(plaintext) => {
                output.write_all(&plaintext)?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "DATA packet failed to verify, skipping");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::generate_test_identity;
    use std::io::Cursor;

    fn session_pair() -> (Config, Config) {
        let (cert, _path, dir) = generate_test_identity("writer@example.test");
        let fingerprint = cert.fingerprint().to_hex();
        // Leak the temp dir for the duration of the test process; the
        // returned configs borrow its path as an owned PathBuf.
        let path = dir.path().to_path_buf();
        std::mem::forget(dir);

        let writer_config = Config::for_writer(fingerprint.clone(), fingerprint.clone(), Some(path.clone()));
        let reader_config = Config::for_reader(fingerprint, Some(path));
        (writer_config, reader_config)
    }

    #[test]
    fn round_trip_single_chunk() {
        let (writer_config, reader_config) = session_pair();
        let mut writer = Writer::new(writer_config);
        let framed = writer.encrypt(b"hello").unwrap();

        let mut reader = Reader::new(reader_config);
        let mut plaintext = Vec::new();
        reader.decrypt(Cursor::new(framed), &mut plaintext, None).unwrap();

        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn first_packet_is_a_key_packet() {
        let (writer_config, _reader_config) = session_pair();
        let mut writer = Writer::new(writer_config);
        let framed = writer.encrypt(b"x").unwrap();

        let mut cursor = PushbackReader::new(Cursor::new(framed));
        let (packet_type, _payload) = framer::read_packet(&mut cursor).unwrap();
        assert_eq!(packet_type, PacketType::Key);
    }

    #[test]
    fn chunk_invariance() {
        let (writer_config, reader_config) = session_pair();
        let mut writer = Writer::new(writer_config);

        let mut framed = Vec::new();
        for part in [&b"abc"[..], &b"def"[..], &b"ghijk"[..]] {
            framed.extend(writer.encrypt(part).unwrap());
        }

        let mut reader = Reader::new(reader_config);
        let mut plaintext = Vec::new();
        reader.decrypt(Cursor::new(framed), &mut plaintext, None).unwrap();

        assert_eq!(plaintext, b"abcdefghijk");
    }

    #[test]
    fn tampered_ciphertext_yields_no_plaintext_for_that_packet() {
        let (writer_config, reader_config) = session_pair();
        let mut writer = Writer::new(writer_config);

        let mut framed = writer.encrypt(b"first").unwrap();
        let second = writer.encrypt(b"second").unwrap();
        let tamper_at = framed.len() + framer::MAGIC.len() + 1 + 4 + 4 + NONCE_LEN;
        framed.extend(second);
        framed[tamper_at] ^= 0xFF;

        let mut reader = Reader::new(reader_config);
        let mut plaintext = Vec::new();
        reader.decrypt(Cursor::new(framed), &mut plaintext, None).unwrap();

        assert_eq!(plaintext, b"second");
    }

    #[test]
    fn resynchronises_past_spliced_noise() {
        let (writer_config, reader_config) = session_pair();
        let mut writer = Writer::new(writer_config);

        let mut framed = writer.encrypt(b"A").unwrap();
        framed.extend(std::iter::repeat(b'.').take(64));
        framed.extend(writer.encrypt(b"B").unwrap());

        let mut reader = Reader::new(reader_config);
        let mut plaintext = Vec::new();
        reader.decrypt(Cursor::new(framed), &mut plaintext, None).unwrap();

        assert_eq!(plaintext, b"AB");
    }

    #[test]
    fn wrong_signing_fingerprint_rejects_key_and_emits_no_data() {
        let (writer_config, _) = session_pair();
        let mut writer = Writer::new(writer_config.clone());
        let framed = writer.encrypt(b"secret").unwrap();

        let reader_config = Config::for_reader(
            "0000000000000000000000000000000000000000",
            writer_config.keystore_path.clone(),
        );
        let mut reader = Reader::new(reader_config);
        let mut plaintext = Vec::new();
        reader.decrypt(Cursor::new(framed), &mut plaintext, None).unwrap();

        assert!(plaintext.is_empty());
    }

    #[test]
    fn stream_ending_mid_length_field_finishes_cleanly() {
        let (writer_config, reader_config) = session_pair();
        let mut writer = Writer::new(writer_config);
        let mut framed = writer.encrypt(b"complete").unwrap();

        // Simulate a writer that stopped between packets: magic and the
        // type byte made it out, but the length field did not.
        framed.extend_from_slice(framer::MAGIC.as_slice());
        framed.push(0x02);
        framed.extend_from_slice(&[0x00, 0x00]);

        let mut reader = Reader::new(reader_config);
        let mut plaintext = Vec::new();
        reader.decrypt(Cursor::new(framed), &mut plaintext, None).unwrap();
        assert_eq!(plaintext, b"complete");
    }

    #[test]
    fn seek_skips_packets_before_target() {
        let (writer_config, reader_config) = session_pair();
        let mut writer = Writer::new(writer_config);
        let framed = writer.encrypt(b"payload").unwrap();

        // seek_until far in the future than the stored (current) timestamp.
        let far_future = u64::MAX - 1;
        let mut reader = Reader::new(reader_config);
        let mut plaintext = Vec::new();
        reader
            .decrypt(Cursor::new(framed), &mut plaintext, Some(far_future))
            .unwrap();

        assert!(plaintext.is_empty());
    }

    #[test]
    fn rotates_key_once_invocation_bound_is_reached() {
        let (writer_config, reader_config) = session_pair();
        let mut writer = Writer::new(writer_config);
        let mut framed = writer.encrypt(b"before rotation").unwrap();

        // Force the next call to rotate without actually performing
        // 2^32 AEAD invocations.
        writer.invocations_under_current_key = MAX_GCM_INVOCATIONS;
        let first_key = writer.current_key.clone();
        framed.extend(writer.encrypt(b"after rotation").unwrap());
        assert_ne!(writer.current_key, first_key);

        let mut reader = Reader::new(reader_config);
        let mut plaintext = Vec::new();
        reader.decrypt(Cursor::new(framed), &mut plaintext, None).unwrap();
        assert_eq!(plaintext, b"before rotationafter rotation");

        let mut cursor = PushbackReader::new(Cursor::new(
            writer.encrypt(&[]).unwrap_or_default(),
        ));
        // A trailing empty encrypt call emits nothing; confirms the
        // writer never frames a packet for zero input.
        assert!(cursor.read(1).unwrap().is_empty());
    }
}
