//! rollcall-vault — At-rest protection for biometric templates.
//!
//! Descriptors are encrypted with AES-256-GCM under a key derived once
//! from the service secret, and carry a SHA-256 digest of the plaintext
//! for duplicate detection and integrity checks without decryption.
//! Decryption fails closed: a bad authentication tag is an error, never
//! best-effort plaintext.

mod cipher;
mod template;

pub use cipher::{template_hash, verify_integrity, TemplateCipher};
pub use template::{EncryptedTemplate, EnrolledProfile};

use rollcall_core::types::DescriptorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("malformed template field: {field}")]
    InvalidFormat { field: &'static str },
    /// Tampered or corrupted template. Fatal for this template — flag
    /// it for manual review, never retry with relaxed checks.
    #[error("template integrity check failed")]
    IntegrityFailure,
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}
