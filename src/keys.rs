//! Key generation, parsing, and ownership.
//!
//! A `SymmetricKey` is the one-time secret that opens a sealed blob. It is
//! either drawn from the system randomness source for a new seal, or decoded
//! from the hexadecimal string a recipient received out of band.
//!
//! - Not `Clone`. A key cannot be duplicated without going through hex.
//! - Zeroised on drop.
//! - Remembers where it came from and whether it has sealed already. The
//!   Sealer uses a fixed nonce, so only a freshly generated key that has not
//!   sealed before may seal.

use std::cell::Cell;
use std::fmt;

use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{EurekaError, Result};

/// Size of a key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Length of the hexadecimal key representation.
pub const KEY_HEX_LEN: usize = KEY_LEN * 2;

/// Where a key's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Drawn from the system randomness source.
    Generated,
    /// Decoded from a hexadecimal string.
    Parsed,
}

/// A 256-bit AES-GCM key.
pub struct SymmetricKey {
    bytes: [u8; KEY_LEN],
    origin: KeyOrigin,
    sealed: Cell<bool>,
}

impl SymmetricKey {
    fn empty(origin: KeyOrigin) -> Self {
        Self {
            bytes: [0u8; KEY_LEN],
            origin,
            sealed: Cell::new(false),
        }
    }

    /// Generate a key from the system's secure randomness source.
    ///
    /// Fails with `Environment` when the platform cannot provide random bytes.
    /// There is no fallback to a weaker source.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut key = Self::empty(KeyOrigin::Generated);
        rng.fill(&mut key.bytes)
            .map_err(|_| EurekaError::Environment)?;
        Ok(key)
    }

    /// Decode a key from 64 hexadecimal characters, in either case.
    ///
    /// Whitespace is not trimmed; that belongs to whoever read the string.
    pub fn parse(hex_key: &str) -> Result<Self> {
        if hex_key.len() != KEY_HEX_LEN {
            return Err(EurekaError::KeyFormat);
        }
        let mut key = Self::empty(KeyOrigin::Parsed);
        hex::decode_to_slice(hex_key, &mut key.bytes).map_err(|_| EurekaError::KeyFormat)?;
        Ok(key)
    }

    /// The lowercase hexadecimal form handed to the recipient.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.bytes))
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    /// Borrow the raw key bytes for cipher construction.
    ///
    /// `pub(crate)`: raw bytes never leave the crate.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Mark the key as used for sealing.
    ///
    /// Succeeds once per generated key. Parsed keys never seal: whoever sent
    /// them has already sealed under the fixed nonce.
    pub(crate) fn claim_for_sealing(&self) -> Result<()> {
        if self.origin != KeyOrigin::Generated || self.sealed.replace(true) {
            return Err(EurekaError::KeyReuse);
        }
        Ok(())
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .field("origin", &self.origin)
            .finish()
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}
