//! Authenticated encryption and decryption of a single DATA packet's payload.
//!
//! AES-GCM with a 128-bit key and a 128-bit nonce. The `aes-gcm` crate's
//! nonce size is a type parameter, so this instantiates `AesGcm<Aes128,
//! U16>` directly rather than reaching for the crate's predefined 96-bit-
//! nonce alias (`Aes128Gcm`). No associated data is authenticated; the
//! DATA packet's timestamp field lives outside the AEAD boundary by design
//! (see the Codec State Machine's module docs).

use crate::error::AeadError;
use aes_gcm::aead::generic_array::{typenum::U16, GenericArray};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{aes::Aes128, AesGcm};

type Cipher = AesGcm<Aes128, U16>;

pub const KEY_LEN: usize = 16;
pub const NONCE_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

/// Generates a fresh 16-byte symmetric key from the OS random source.
pub fn generate_key() -> [u8; KEY_LEN] {
    let key = Cipher::generate_key(&mut OsRng);
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(key.as_slice());
    out
}

/// Samples a fresh 16-byte nonce. Nonces are always drawn uniformly at
/// random; they must never be derived from a counter or clock (the bounded
/// invocation count under one key keeps the collision probability
/// negligible, per NIST SP 800-38D).
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let nonce = Cipher::generate_nonce(&mut OsRng);
    let mut out = [0u8; NONCE_LEN];
    out.copy_from_slice(nonce.as_slice());
    out
}

/// Encrypts `plaintext` under `key`/`nonce`, returning ciphertext (the same
/// length as `plaintext`) and a detached 16-byte authentication tag.
pub fn encrypt_chunk(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN]), AeadError> {
    let cipher = Cipher::new(GenericArray::from_slice(key));
    let mut combined = cipher
        .encrypt(GenericArray::from_slice(nonce), plaintext)
        .map_err(|_| AeadError::MacInvalid)?;
    let tag_start = combined.len() - TAG_LEN;
    let tag_bytes = combined.split_off(tag_start);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);
    Ok((combined, tag))
}

/// Decrypts `ciphertext` under `key`/`nonce`, verifying `tag`. On
/// authentication failure no partial plaintext is returned at all.
pub fn decrypt_chunk(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>, AeadError> {
    let cipher = Cipher::new(GenericArray::from_slice(key));
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let plaintext = cipher
        .decrypt(GenericArray::from_slice(nonce), combined.as_slice())
        .map_err(|_| AeadError::MacInvalid)?;

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = generate_key();
        let nonce = generate_nonce();
        let plaintext = b"a video frame's worth of bytes";

        let (ciphertext, tag) = encrypt_chunk(&key, &nonce, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());

        let decrypted = decrypt_chunk(&key, &nonce, &ciphertext, &tag).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_to_verify() {
        let key = generate_key();
        let nonce = generate_nonce();
        let (mut ciphertext, tag) = encrypt_chunk(&key, &nonce, b"hello").unwrap();
        ciphertext[0] ^= 0xFF;

        let err = decrypt_chunk(&key, &nonce, &ciphertext, &tag).unwrap_err();
        assert!(matches!(err, AeadError::MacInvalid));
    }

    #[test]
    fn wrong_key_fails_to_verify() {
        let key = generate_key();
        let other_key = generate_key();
        let nonce = generate_nonce();
        let (ciphertext, tag) = encrypt_chunk(&key, &nonce, b"hello").unwrap();

        let err = decrypt_chunk(&other_key, &nonce, &ciphertext, &tag).unwrap_err();
        assert!(matches!(err, AeadError::MacInvalid));
    }

    #[test]
    fn nonces_are_not_reused_across_calls() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
    }
}
