//! # eureka
//!
//! Seal a file or folder into a single AES-256-GCM blob that only the holder
//! of a one-time key can open, and restore it again.
//!
//! The seal path archives the input into one self-delimiting byte stream,
//! seals it under a freshly generated 256-bit key, and writes
//! `<name>.encrypted`. The key is returned as 64 hex characters to be sent
//! over a separate channel. The open path reverses this into a restore
//! directory that must not exist yet.
//!
//! ## Public API
//!
//! Most callers only need [`Pipeline`]. The building blocks are public too:
//! [`archive`] for the stream format, [`crypto`] for sealing, and
//! [`keys`] for key generation and parsing.

pub mod archive;
pub mod audit;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod pipeline;

pub use crypto::SealedBlob;
pub use error::{EurekaError, Result};
pub use keys::SymmetricKey;
pub use pipeline::{Pipeline, PipelineOptions, SealOutcome};

/// Generate a fresh one-time key from the system randomness source.
pub fn generate_key() -> Result<SymmetricKey> {
    SymmetricKey::generate()
}

/// Decode a key received as 64 hexadecimal characters.
pub fn parse_key(hex_key: &str) -> Result<SymmetricKey> {
    SymmetricKey::parse(hex_key)
}
