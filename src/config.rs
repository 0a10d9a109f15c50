//! Session configuration record.
//!
//! The Python source kept these as module-scope globals; this crate passes
//! an explicit record into each session constructor instead; see the design
//! note on process-global state.

use std::path::PathBuf;

/// Fingerprints and keystore location shared by a writer or reader session.
///
/// Fingerprints are opaque strings to the codec: equality comparison is
/// used verbatim when checking signatures, never parsed or normalised.
#[derive(Debug, Clone)]
pub struct Config {
    /// The pinned fingerprint every KEY packet must be signed by.
    pub signing_fingerprint: String,
    /// Recipient fingerprint the writer encrypts KEY packets to. Required
    /// to construct a [`crate::codec::Writer`]; ignored by a reader.
    pub encrypt_fingerprint: Option<String>,
    /// Directory of ASCII-armored OpenPGP certificates. `None` means an
    /// empty keystore, which is only useful in tests.
    pub keystore_path: Option<PathBuf>,
}

impl Config {
    /// Builds a configuration suitable for [`crate::codec::Writer`].
    pub fn for_writer(
        signing_fingerprint: impl Into<String>,
        encrypt_fingerprint: impl Into<String>,
        keystore_path: Option<PathBuf>,
    ) -> Self {
        Config {
            signing_fingerprint: signing_fingerprint.into(),
            encrypt_fingerprint: Some(encrypt_fingerprint.into()),
            keystore_path,
        }
    }

    /// Builds a configuration suitable for [`crate::codec::Reader`].
    pub fn for_reader(signing_fingerprint: impl Into<String>, keystore_path: Option<PathBuf>) -> Self {
        Config {
            signing_fingerprint: signing_fingerprint.into(),
            encrypt_fingerprint: None,
            keystore_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_writer_sets_encrypt_fingerprint() {
        let config = Config::for_writer("AAAA", "BBBB", None);
        assert_eq!(config.encrypt_fingerprint.as_deref(), Some("BBBB"));
    }

    #[test]
    fn for_reader_leaves_encrypt_fingerprint_absent() {
        let config = Config::for_reader("AAAA", None);
        assert!(config.encrypt_fingerprint.is_none());
    }
}
