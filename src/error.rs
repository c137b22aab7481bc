//! Error types for eureka.
//!
//! Every variant is a distinct failure mode of the seal/open pipeline. Errors
//! are surfaced to the immediate caller and never retried: each one reflects
//! bad input, a wrong key, or an environment that cannot be recovered.
//!
//! Authentication failures are deliberately uniform. A wrong key and a
//! tampered blob produce the same variant with the same message.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for eureka operations.
pub type Result<T> = std::result::Result<T, EurekaError>;

/// The single error type for all eureka operations.
#[derive(Debug, Error)]
pub enum EurekaError {
    /// The source path is missing or cannot be read.
    #[error("cannot read input {}: {source}", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The key is not 64 hexadecimal characters.
    #[error("the key has to be a 256-bit hexadecimal string")]
    KeyFormat,

    /// The AEAD tag did not verify.
    #[error("cannot decrypt: the key is not correct or the file was modified")]
    Authentication,

    /// The decrypted archive stream is malformed or truncated.
    #[error("malformed archive: {0}")]
    Format(String),

    /// An archive entry would land outside the destination directory.
    #[error("unsafe path in archive: {0}")]
    Path(String),

    /// The restore destination already exists.
    #[error("{} already exists, refusing to overwrite", .0.display())]
    Collision(PathBuf),

    /// The system randomness source failed.
    #[error("randomness cannot be generated on this system")]
    Environment,

    /// The blob does not start with the eureka header.
    #[error("not a eureka sealed file")]
    UnrecognizedBlob,

    /// The blob header names a format version this build cannot open.
    #[error("unsupported sealed file version {0}")]
    UnsupportedVersion(u8),

    /// The key was parsed from input or has already sealed a blob.
    #[error("this key cannot seal: sealing requires a freshly generated key")]
    KeyReuse,

    /// Filesystem failure while writing output.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl EurekaError {
    pub(crate) fn input(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Input {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_message_is_generic() {
        let msg = EurekaError::Authentication.to_string();
        assert!(!msg.contains("tag"));
        assert!(msg.contains("key is not correct or the file was modified"));
    }

    #[test]
    fn test_input_error_names_path() {
        let err = EurekaError::input(
            "missing.txt",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        assert!(err.to_string().contains("missing.txt"));
    }
}
