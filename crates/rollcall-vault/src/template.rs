//! Stored template and profile types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An encrypted biometric template as persisted at rest.
///
/// All fields are hex-encoded: a 16-byte IV (32 chars), a 16-byte GCM
/// tag (32 chars), and a SHA-256 digest of the plaintext (64 chars).
/// The digest allows duplicate detection and integrity checks without
/// decrypting. Plaintext descriptors are never persisted or logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedTemplate {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
    pub template_hash: String,
}

/// All enrolled templates for one user, one per enrollment image.
///
/// Replaced wholesale on re-enrollment and deleted with the profile —
/// never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledProfile {
    pub user_id: String,
    pub templates: Vec<EncryptedTemplate>,
    /// Mean quality score across the enrollment images.
    pub enrollment_quality: f32,
    pub created_at: DateTime<Utc>,
}
