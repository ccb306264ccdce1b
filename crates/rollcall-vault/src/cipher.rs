//! Template encryption and integrity hashing.

use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, KeyInit, Nonce, Tag};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use rollcall_core::types::FaceDescriptor;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::template::EncryptedTemplate;
use crate::VaultError;

/// AES-256-GCM with a 16-byte nonce, matching the at-rest IV format.
type TemplateAead = AesGcm<Aes256, U16>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Domain-separation salt for template key derivation. Fixed — the key
/// is derived from the service secret, not from any user password.
const DOMAIN_SALT: &[u8] = b"rollcall/template-key/v1";

/// Encrypts and decrypts biometric templates under a single derived key.
///
/// Key derivation runs once, at construction, through Argon2id; the
/// cipher value is then cheap to share read-only across the engine.
pub struct TemplateCipher {
    aead: TemplateAead,
}

impl TemplateCipher {
    pub fn new(service_secret: &str) -> Result<Self, VaultError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(service_secret.as_bytes(), DOMAIN_SALT, &mut key)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

        let aead = TemplateAead::new(Key::<TemplateAead>::from_slice(&key));
        Ok(Self { aead })
    }

    /// Encrypt a descriptor with a fresh random 16-byte IV.
    ///
    /// The template hash is computed over the plaintext in parallel so
    /// stored templates can be deduplicated without decryption.
    pub fn encrypt(&self, descriptor: &FaceDescriptor) -> Result<EncryptedTemplate, VaultError> {
        let plaintext = descriptor.to_le_bytes();
        let hash = hex::encode(Sha256::digest(&plaintext));

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext;
        let tag = self
            .aead
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| VaultError::IntegrityFailure)?;

        Ok(EncryptedTemplate {
            ciphertext: hex::encode(&buffer),
            iv: hex::encode(iv),
            auth_tag: hex::encode(tag),
            template_hash: hash,
        })
    }

    /// Decrypt a stored template, verifying the tag as part of
    /// decryption. Fails closed on any mismatch.
    pub fn decrypt(&self, template: &EncryptedTemplate) -> Result<FaceDescriptor, VaultError> {
        let iv = decode_field(&template.iv, IV_LEN, "iv")?;
        let tag = decode_field(&template.auth_tag, TAG_LEN, "auth_tag")?;
        let mut buffer = hex::decode(&template.ciphertext)
            .map_err(|_| VaultError::InvalidFormat { field: "ciphertext" })?;

        self.aead
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&iv),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| {
                tracing::warn!(
                    template_hash = %template.template_hash,
                    "template failed authentication — flagging for review"
                );
                VaultError::IntegrityFailure
            })?;

        Ok(FaceDescriptor::from_le_bytes(&buffer)?)
    }
}

fn decode_field(hex_str: &str, expected_len: usize, field: &'static str) -> Result<Vec<u8>, VaultError> {
    let bytes = hex::decode(hex_str).map_err(|_| VaultError::InvalidFormat { field })?;
    if bytes.len() != expected_len {
        return Err(VaultError::InvalidFormat { field });
    }
    Ok(bytes)
}

/// One-way digest of a descriptor's canonical plaintext form.
pub fn template_hash(descriptor: &FaceDescriptor) -> String {
    hex::encode(Sha256::digest(descriptor.to_le_bytes()))
}

/// Recompute a descriptor's digest and compare against an expected
/// hex digest in constant time. Never short-circuits.
pub fn verify_integrity(descriptor: &FaceDescriptor, expected_hash: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hash) else {
        return false;
    };
    let computed = Sha256::digest(descriptor.to_le_bytes());
    if expected.len() != computed.len() {
        return false;
    }
    computed.as_slice().ct_eq(&expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TemplateCipher {
        TemplateCipher::new("test-service-secret").unwrap()
    }

    fn descriptor() -> FaceDescriptor {
        let values: Vec<f32> = (0..128).map(|i| (i as f32).sin()).collect();
        FaceDescriptor::from_vec(values).unwrap()
    }

    /// Flip one bit inside a hex-encoded field.
    fn flip_bit(hex_str: &str, byte_index: usize) -> String {
        let mut bytes = hex::decode(hex_str).unwrap();
        bytes[byte_index] ^= 0x01;
        hex::encode(bytes)
    }

    #[test]
    fn test_roundtrip() {
        let c = cipher();
        let d = descriptor();
        let template = c.encrypt(&d).unwrap();
        let back = c.decrypt(&template).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_at_rest_field_formats() {
        let template = cipher().encrypt(&descriptor()).unwrap();
        assert_eq!(template.iv.len(), 32);
        assert_eq!(template.auth_tag.len(), 32);
        assert_eq!(template.template_hash.len(), 64);
        // 128 f32 values → 512 plaintext bytes → 1024 hex chars
        assert_eq!(template.ciphertext.len(), 1024);
        assert!(template.iv.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fresh_iv_per_template() {
        let c = cipher();
        let d = descriptor();
        let a = c.encrypt(&d).unwrap();
        let b = c.encrypt(&d).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
        // Same plaintext → same digest: duplicate detection works
        // without decryption.
        assert_eq!(a.template_hash, b.template_hash);
    }

    #[test]
    fn test_ciphertext_bit_flip_fails_closed() {
        let c = cipher();
        let mut template = c.encrypt(&descriptor()).unwrap();
        template.ciphertext = flip_bit(&template.ciphertext, 100);
        assert!(matches!(
            c.decrypt(&template),
            Err(VaultError::IntegrityFailure)
        ));
    }

    #[test]
    fn test_auth_tag_bit_flip_fails_closed() {
        let c = cipher();
        let mut template = c.encrypt(&descriptor()).unwrap();
        template.auth_tag = flip_bit(&template.auth_tag, 0);
        assert!(matches!(
            c.decrypt(&template),
            Err(VaultError::IntegrityFailure)
        ));
    }

    #[test]
    fn test_iv_bit_flip_fails_closed() {
        let c = cipher();
        let mut template = c.encrypt(&descriptor()).unwrap();
        template.iv = flip_bit(&template.iv, 3);
        assert!(matches!(
            c.decrypt(&template),
            Err(VaultError::IntegrityFailure)
        ));
    }

    #[test]
    fn test_truncated_iv_is_format_error() {
        let c = cipher();
        let mut template = c.encrypt(&descriptor()).unwrap();
        template.iv.truncate(30);
        assert!(matches!(
            c.decrypt(&template),
            Err(VaultError::InvalidFormat { field: "iv" })
        ));
    }

    #[test]
    fn test_non_hex_ciphertext_is_format_error() {
        let c = cipher();
        let mut template = c.encrypt(&descriptor()).unwrap();
        template.ciphertext = "zz".repeat(512);
        assert!(matches!(
            c.decrypt(&template),
            Err(VaultError::InvalidFormat { field: "ciphertext" })
        ));
    }

    #[test]
    fn test_different_secret_cannot_decrypt() {
        let template = cipher().encrypt(&descriptor()).unwrap();
        let other = TemplateCipher::new("some-other-secret").unwrap();
        assert!(matches!(
            other.decrypt(&template),
            Err(VaultError::IntegrityFailure)
        ));
    }

    #[test]
    fn test_hash_matches_template_hash() {
        let c = cipher();
        let d = descriptor();
        let template = c.encrypt(&d).unwrap();
        assert_eq!(template_hash(&d), template.template_hash);
    }

    #[test]
    fn test_verify_integrity() {
        let d = descriptor();
        let hash = template_hash(&d);
        assert!(verify_integrity(&d, &hash));

        let other = FaceDescriptor::from_vec(vec![0.5; 128]).unwrap();
        assert!(!verify_integrity(&other, &hash));
        assert!(!verify_integrity(&d, "not-hex"));
        assert!(!verify_integrity(&d, "abcd"));
    }
}
