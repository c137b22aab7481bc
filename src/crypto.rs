//! Low-level cryptographic operations: the Sealer.
//!
//! This module and `keys` are the only places in the crate that import `ring`.
//! Everything else seals and opens exclusively through the functions here.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit fixed protocol constant, issued once per cipher
//!   instance by `OneShotNonce`
//! - **Key size**: 256 bits (32 bytes), fresh per seal
//!
//! # Layout of a sealed blob
//! ```text
//! [ magic "EURK" (4) ][ version (1) ][ ciphertext ][ GCM tag (16) ]
//! ```
//! The five header bytes are authenticated as associated data.

use ring::aead::{
    self, Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM,
};
use ring::error::Unspecified;
use zeroize::Zeroizing;

use crate::error::{EurekaError, Result};
use crate::keys::SymmetricKey;

/// The AEAD algorithm used throughout eureka.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = aead::NONCE_LEN;

/// Size of the GCM authentication tag in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Leading bytes of every sealed blob.
pub const MAGIC: [u8; 4] = *b"EURK";

/// Blob format version written by this build.
pub const FORMAT_VERSION: u8 = 1;

/// Magic plus version byte.
pub const HEADER_LEN: usize = MAGIC.len() + 1;

/// The protocol nonce. Safe only because every seal uses a fresh key.
const FIXED_NONCE: [u8; NONCE_LEN] = [0u8; NONCE_LEN];

/// A nonce sequence that yields the protocol nonce exactly once.
///
/// A cipher instance bound to it can perform one seal or one open. Any second
/// operation fails instead of silently repeating the (key, nonce) pair.
pub(crate) struct OneShotNonce {
    nonce: Option<[u8; NONCE_LEN]>,
}

impl OneShotNonce {
    pub(crate) fn new() -> Self {
        Self {
            nonce: Some(FIXED_NONCE),
        }
    }
}

impl NonceSequence for OneShotNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, Unspecified> {
        self.nonce
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(Unspecified)
    }
}

/// The opaque output of `seal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob(Vec<u8>);

impl SealedBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for SealedBlob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn header() -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..MAGIC.len()].copy_from_slice(&MAGIC);
    header[MAGIC.len()] = FORMAT_VERSION;
    header
}

/// Validate the blob header and return it for use as associated data.
fn read_header(blob: &[u8]) -> Result<[u8; HEADER_LEN]> {
    let header: [u8; HEADER_LEN] = blob
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(EurekaError::UnrecognizedBlob)?;
    if header[..MAGIC.len()] != MAGIC {
        return Err(EurekaError::UnrecognizedBlob);
    }
    let version = header[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(EurekaError::UnsupportedVersion(version));
    }
    Ok(header)
}

fn unbound_key(key: &SymmetricKey) -> Result<UnboundKey> {
    UnboundKey::new(ALGORITHM, key.as_bytes()).map_err(|_| EurekaError::KeyFormat)
}

/// Seal a plaintext under `key` with AES-256-GCM.
///
/// The key must be freshly generated and must not have sealed before;
/// otherwise this fails with `KeyReuse` before any encryption happens.
pub fn seal(plaintext: &[u8], key: &SymmetricKey) -> Result<SealedBlob> {
    key.claim_for_sealing()?;

    let mut sealing = SealingKey::new(unbound_key(key)?, OneShotNonce::new());
    let header = header();

    let mut output = Vec::with_capacity(HEADER_LEN + plaintext.len() + ALGORITHM.tag_len());
    output.extend_from_slice(&header);
    output.extend_from_slice(plaintext);

    // Encrypts `output[HEADER_LEN..]` in place. The only failure is a spent
    // nonce sequence.
    let tag = sealing
        .seal_in_place_separate_tag(Aad::from(header), &mut output[HEADER_LEN..])
        .map_err(|_| EurekaError::KeyReuse)?;
    output.extend_from_slice(tag.as_ref());

    Ok(SealedBlob(output))
}

/// Verify and decrypt a sealed blob.
///
/// A wrong key and a modified blob both yield `Authentication`. No partial
/// plaintext is ever returned; the working buffer is zeroised on failure.
pub fn open(blob: &[u8], key: &SymmetricKey) -> Result<Vec<u8>> {
    let header = read_header(blob)?;
    let body = &blob[HEADER_LEN..];
    if body.len() < TAG_LEN {
        return Err(EurekaError::Authentication);
    }

    let mut opening = OpeningKey::new(unbound_key(key)?, OneShotNonce::new());
    let mut in_out = Zeroizing::new(body.to_vec());

    let plaintext_len = opening
        .open_in_place(Aad::from(header), &mut in_out[..])
        .map_err(|_| EurekaError::Authentication)?
        .len();
    in_out.truncate(plaintext_len);

    Ok(std::mem::take(&mut *in_out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = SymmetricKey::generate().unwrap();
        let sealed = seal(b"secret message", &key).unwrap();
        assert_eq!(sealed.len(), HEADER_LEN + 14 + TAG_LEN);
        assert_eq!(&sealed.as_bytes()[..4], b"EURK");
        assert_eq!(sealed.as_bytes()[4], FORMAT_VERSION);

        let opened = open(sealed.as_bytes(), &key).unwrap();
        assert_eq!(opened, b"secret message");
    }

    #[test]
    fn test_empty_plaintext() {
        let key = SymmetricKey::generate().unwrap();
        let sealed = seal(b"", &key).unwrap();
        assert_eq!(sealed.len(), HEADER_LEN + TAG_LEN);
        assert!(open(sealed.as_bytes(), &key).unwrap().is_empty());
    }

    #[test]
    fn test_one_shot_nonce_yields_once() {
        let mut nonces = OneShotNonce::new();
        let first = nonces.advance().unwrap();
        assert_eq!(first.as_ref(), &FIXED_NONCE);
        assert!(nonces.advance().is_err());
    }

    #[test]
    fn test_key_cannot_seal_twice() {
        let key = SymmetricKey::generate().unwrap();
        seal(b"first", &key).unwrap();
        assert!(matches!(seal(b"second", &key), Err(EurekaError::KeyReuse)));
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let key = SymmetricKey::generate().unwrap();
        let other = SymmetricKey::generate().unwrap();
        let sealed = seal(b"for key one", &key).unwrap();
        assert!(matches!(
            open(sealed.as_bytes(), &other),
            Err(EurekaError::Authentication)
        ));
    }

    #[test]
    fn test_header_checks() {
        let key = SymmetricKey::generate().unwrap();
        let sealed = seal(b"payload", &key).unwrap().into_bytes();

        assert!(matches!(open(&sealed[..3], &key), Err(EurekaError::UnrecognizedBlob)));

        let mut foreign = sealed.clone();
        foreign[0] = b'X';
        assert!(matches!(open(&foreign, &key), Err(EurekaError::UnrecognizedBlob)));

        let mut future = sealed.clone();
        future[4] = 9;
        assert!(matches!(open(&future, &key), Err(EurekaError::UnsupportedVersion(9))));

        let truncated = &sealed[..HEADER_LEN + TAG_LEN - 1];
        assert!(matches!(open(truncated, &key), Err(EurekaError::Authentication)));
    }
}
