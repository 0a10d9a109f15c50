//! Key Envelope Adapter: wraps and unwraps the 16-byte symmetric key
//! carried in a KEY packet using an external OpenPGP implementation.
//!
//! This is the single place in the crate that speaks `sequoia-openpgp`;
//! everything above this module only ever sees raw key bytes and opaque
//! fingerprint strings, mirroring how the Python source's `EncroCrypt`
//! class only ever touched `self.gpg.encrypt()`/`self.gpg.decrypt()` and
//! never the GnuPG wire format itself.

use crate::aead::KEY_LEN;
use crate::error::EnvelopeError;
use sequoia_openpgp as openpgp;
use openpgp::cert::prelude::*;
use openpgp::crypto::SessionKey;
use openpgp::types::SymmetricAlgorithm::AES256;
use openpgp::packet::{PKESK, SKESK};
use openpgp::parse::stream::{
    DecryptionHelper, Decryptor, GoodChecksum, MessageLayer, MessageStructure, VerificationHelper,
};
use openpgp::parse::Parse;
use openpgp::policy::{Policy, StandardPolicy};
use openpgp::serialize::stream::{Encryptor, LiteralWriter, Message, Signer};
use openpgp::Cert;
use openpgp::Fingerprint;
use openpgp::KeyHandle;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A directory of ASCII-armored OpenPGP certificates (public or with
/// secret key material), the Rust stand-in for the "GnuPG home directory"
/// the Python source hands to `gnupg.GPG(gnupghome=...)`. The codec does
/// not manage the directory's contents; it only reads certificates from
/// it by fingerprint.
pub struct Keystore {
    certs: Vec<Cert>,
}

impl Keystore {
    /// Loads every certificate found directly inside `path`. Each file is
    /// parsed independently; a file containing several armored
    /// certificates back to back is not split (use one file per
    /// certificate, as a GnuPG home directory's exported keyring would
    /// not normally require here).
    pub fn load(path: &Path) -> Result<Self, EnvelopeError> {
        let mut certs = Vec::new();
        let entries = std::fs::read_dir(path)
            .map_err(|e| EnvelopeError::WrapFailed(format!("cannot read keystore {}: {e}", path.display())))?;

        for entry in entries {
            let entry = entry
                .map_err(|e| EnvelopeError::WrapFailed(format!("cannot read keystore entry: {e}")))?;
            if !entry.path().is_file() {
                continue;
            }
            match Cert::from_file(entry.path()) {
                Ok(cert) => certs.push(cert),
                Err(_) => continue, // not a certificate file; ignore, like GnuPG ignoring junk in its homedir
            }
        }

        Ok(Keystore { certs })
    }

    fn empty() -> Self {
        Keystore { certs: Vec::new() }
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> Option<&Cert> {
        self.certs
            .iter()
            .find(|cert| cert.fingerprint().to_hex() == fingerprint)
    }
}

/// Wraps 16 raw key bytes into a signed, encrypted KEY packet payload.
///
/// The recipient is looked up by `recipient_fingerprint` and must carry a
/// usable storage-encryption-capable key; the signer is looked up by
/// `signer_fingerprint` and must carry unencrypted secret signing key
/// material. Fails with [`EnvelopeError::WrapFailed`] if the keystore is
/// missing, either fingerprint is unknown, or signing/encryption setup
/// fails for any other reason.
pub fn wrap(
    key: &[u8; KEY_LEN],
    recipient_fingerprint: &str,
    signer_fingerprint: &str,
    keystore_path: Option<&Path>,
) -> Result<Vec<u8>, EnvelopeError> {
    let keystore = load_keystore(keystore_path)?;
    let policy = StandardPolicy::new();

    let recipient_cert = keystore
        .find_by_fingerprint(recipient_fingerprint)
        .ok_or_else(|| EnvelopeError::WrapFailed(format!("unknown recipient fingerprint {recipient_fingerprint}")))?;
    let signer_cert = keystore
        .find_by_fingerprint(signer_fingerprint)
        .ok_or_else(|| EnvelopeError::WrapFailed(format!("unknown signer fingerprint {signer_fingerprint}")))?;

    let recipients = recipient_cert
        .keys()
        .with_policy(&policy, None)
        .alive()
        .revoked(false)
        .for_storage_encryption();

    let signing_key = signer_cert
        .keys()
        .unencrypted_secret()
        .with_policy(&policy, None)
        .alive()
        .revoked(false)
        .for_signing()
        .next()
        .ok_or_else(|| EnvelopeError::WrapFailed(format!("no usable secret signing key for {signer_fingerprint}")))?;

    let mut signing_keypair = signing_key
        .key()
        .clone()
        .into_keypair()
        .map_err(|e| EnvelopeError::WrapFailed(format!("signing key is not directly usable: {e}")))?;

    let mut buf = Vec::new();
    {
        let message = Message::new(&mut buf);
        let message = Encryptor::for_recipients(message, recipients)
            .symmetric_algo(AES256)
            .build()
            .map_err(|e| EnvelopeError::WrapFailed(format!("failed to build encryptor: {e}")))?;
        let message = Signer::new(message, &mut signing_keypair)
            .build()
            .map_err(|e| EnvelopeError::WrapFailed(format!("failed to build signer: {e}")))?;
        let mut message = LiteralWriter::new(message)
            .build()
            .map_err(|e| EnvelopeError::WrapFailed(format!("failed to build literal writer: {e}")))?;
        message
            .write_all(key)
            .map_err(|e| EnvelopeError::WrapFailed(format!("failed to write key material: {e}")))?;
        message
            .finalize()
            .map_err(|e| EnvelopeError::WrapFailed(format!("failed to finalize message: {e}")))?;
    }

    Ok(buf)
}

/// Unwraps a KEY packet payload, returning the 16-byte symmetric key and
/// the fingerprint that signed it.
///
/// Fails with [`EnvelopeError::DecryptFailed`] if no key in the keystore
/// can decrypt the message, and with
/// [`EnvelopeError::SignatureMismatch`] if decryption succeeds but the
/// message was not validly signed by `expected_signer_fingerprint` —
/// these are distinct outcomes so the reader can tell "we don't hold the
/// key yet" apart from "someone we don't trust signed this".
pub fn unwrap(
    payload: &[u8],
    expected_signer_fingerprint: &str,
    keystore_path: Option<&Path>,
) -> Result<([u8; KEY_LEN], String), EnvelopeError> {
    let keystore = load_keystore(keystore_path)?;
    let policy = StandardPolicy::new();

    let helper = Helper {
        keystore: &keystore,
        policy: &policy,
        signer: None,
    };

    let mut decryptor = Decryptor::from_bytes(&policy, payload, helper, None)
        .map_err(|e| EnvelopeError::DecryptFailed(e.to_string()))?;

    let mut key_material = Vec::new();
    std::io::Read::read_to_end(&mut decryptor, &mut key_material)
        .map_err(|e| EnvelopeError::DecryptFailed(e.to_string()))?;

    if key_material.len() != KEY_LEN {
        return Err(EnvelopeError::BadKeyLength(key_material.len()));
    }

    let signer = decryptor.helper_ref().signer.clone().ok_or_else(|| EnvelopeError::SignatureMismatch {
        expected: expected_signer_fingerprint.to_string(),
        got: "<unsigned>".to_string(),
    })?;

    if signer.to_hex() != expected_signer_fingerprint {
        return Err(EnvelopeError::SignatureMismatch {
            expected: expected_signer_fingerprint.to_string(),
            got: signer.to_hex(),
        });
    }

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&key_material);
    Ok((key, signer.to_hex()))
}

fn load_keystore(path: Option<&Path>) -> Result<Keystore, EnvelopeError> {
    match path {
        Some(path) => Keystore::load(path),
        None => Ok(Keystore::empty()),
    }
}

/// Bridges `sequoia-openpgp`'s streaming verification/decryption callbacks
/// to the adapter's fingerprint-pinning contract.
struct Helper<'a> {
    keystore: &'a Keystore,
    policy: &'a dyn Policy,
    signer: Option<Fingerprint>,
}

impl<'a> VerificationHelper for Helper<'a> {
    fn get_public_keys(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(self.keystore.certs.clone())
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        for layer in structure.into_iter() {
            if let MessageLayer::SignatureGroup { results } = layer {
                for result in results {
                    if let Ok(GoodChecksum { ka, .. }) = result {
                        self.signer = Some(ka.key().fingerprint());
                    }
                }
            }
        }
        // Fingerprint pinning is enforced by the caller (`unwrap`), not
        // here: a missing or mismatched signer should not abort parsing,
        // it should surface as a classified `SignatureMismatch` so the
        // reader can log the offset and keep going.
        Ok(())
    }
}

impl<'a> DecryptionHelper for Helper<'a> {
    fn decrypt<D>(
        &mut self,
        pkesks: &[PKESK],
        _skesks: &[SKESK],
        sym_algo: Option<openpgp::types::SymmetricAlgorithm>,
        mut decrypt: D,
    ) -> openpgp::Result<Option<Fingerprint>>
    where
        D: FnMut(openpgp::types::SymmetricAlgorithm, &SessionKey) -> bool,
    {
        for cert in &self.keystore.certs {
            let decryption_keys: Vec<_> = cert
                .keys()
                .unencrypted_secret()
                .with_policy(self.policy, None)
                .alive()
                .revoked(false)
                .for_storage_encryption()
                .collect();

            for key_amalgamation in decryption_keys {
                let key = key_amalgamation.key().clone();
                let keypair = match key.into_keypair() {
                    Ok(keypair) => keypair,
                    Err(_) => continue,
                };
                let mut keypair = keypair;

                for pkesk in pkesks {
                    if let Some((algo, session_key)) = pkesk.decrypt(&mut keypair, sym_algo) {
                        if decrypt(algo, &session_key) {
                            return Ok(Some(cert.fingerprint()));
                        }
                    }
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
pub(crate) fn generate_test_identity(userid: &str) -> (Cert, PathBuf, tempfile_handle::TempDir) {
    let (cert, _revocation) = CertBuilder::general_purpose(None, Some(userid))
        .generate()
        .expect("test cert generation");

    let dir = tempfile_handle::tempdir();
    let path = dir.path().join(format!("{}.asc", cert.fingerprint().to_hex()));
    let armored = {
        use openpgp::armor;
        use openpgp::serialize::Serialize;
        let mut buf = Vec::new();
        {
            let mut writer = armor::Writer::new(&mut buf, armor::Kind::SecretKey)
                .expect("armor writer");
            cert.as_tsk().serialize(&mut writer).expect("serialize cert");
            writer.finalize().expect("finalize armor");
        }
        buf
    };
    std::fs::write(&path, armored).expect("write test cert");

    (cert, path, dir)
}

#[cfg(test)]
mod tempfile_handle {
    //! Minimal temp-directory helper so the envelope tests don't need an
    //! extra dev-dependency: a unique directory under `std::env::temp_dir()`
    //! that removes itself on drop.
    use std::path::{Path, PathBuf};

    pub struct TempDir(PathBuf);

    impl TempDir {
        pub fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    pub fn tempdir() -> TempDir {
        let mut path = std::env::temp_dir();
        let unique = format!(
            "encrocrypt-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0)
        );
        path.push(unique);
        std::fs::create_dir_all(&path).expect("create temp dir");
        TempDir(path)
    }
}
