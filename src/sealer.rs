// ============================================================================
// Crypto Sealer - Authenticated Payload Encryption
// ============================================================================
//
// Seals message content with ChaCha20-Poly1305 (96-bit random nonce, 128-bit
// tag). Sealed payload layout:
//
//   [format_version (1)] [key_version (1)] [nonce (12)] [ciphertext || tag (16)]
//
// One key ring per process: a current key version plus retired versions kept
// for opening payloads sealed before a rotation. Nonces are random per seal
// and a key version is never reassigned, so (key, nonce) pairs are never
// reused.
//
// ============================================================================

use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, ChaCha20Poly1305, Nonce,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{
    message_resource, AuditAction, AuditActor, AuditEvent, AuditEventType, AuditLog, AuditOutcome,
};
use crate::message::Classification;

pub const FORMAT_VERSION: u8 = 1;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const HEADER_SIZE: usize = 2;

/// Minimum sealed payload: header + nonce + tag (empty plaintext).
pub const MIN_SEALED_SIZE: usize = HEADER_SIZE + NONCE_SIZE + TAG_SIZE;

#[derive(Error, Debug)]
pub enum SealError {
    #[error("payload authentication failed")]
    Integrity,

    #[error("sealed payload too short ({0} bytes)")]
    TooShort(usize),

    #[error("unsupported sealed payload format version {0}")]
    UnsupportedFormat(u8),

    #[error("no key material for key version {0}")]
    UnknownKeyVersion(u8),

    #[error("key material error: {0}")]
    KeyMaterial(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),
}

struct KeyRing {
    current: u8,
    ciphers: HashMap<u8, ChaCha20Poly1305>,
}

/// Symmetric sealer shared by the gateway and the content endpoint.
pub struct CryptoSealer {
    keys: RwLock<KeyRing>,
    audit: Arc<AuditLog>,
}

impl CryptoSealer {
    /// Build a sealer from a 64-hex-char (32 byte) key.
    pub fn from_hex_key(
        hex_key: &str,
        key_version: u8,
        audit: Arc<AuditLog>,
    ) -> Result<Self, SealError> {
        let cipher = cipher_from_hex(hex_key)?;
        let mut ciphers = HashMap::new();
        ciphers.insert(key_version, cipher);
        Ok(Self {
            keys: RwLock::new(KeyRing {
                current: key_version,
                ciphers,
            }),
            audit,
        })
    }

    pub fn current_key_version(&self) -> u8 {
        self.keys.read().expect("key ring lock poisoned").current
    }

    /// Seal plaintext under the current key. Emits an SC `ENCRYPT` event.
    pub async fn seal(
        &self,
        plaintext: &[u8],
        classification: Classification,
        actor: &AuditActor,
        message_id: Option<Uuid>,
    ) -> Result<Vec<u8>, SealError> {
        let (sealed, key_version) = {
            let ring = self.keys.read().expect("key ring lock poisoned");
            let cipher = ring
                .ciphers
                .get(&ring.current)
                .ok_or(SealError::UnknownKeyVersion(ring.current))?;

            let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
            let ciphertext = cipher
                .encrypt(&nonce, plaintext)
                .map_err(|e| SealError::Encrypt(e.to_string()))?;

            let mut sealed = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + ciphertext.len());
            sealed.push(FORMAT_VERSION);
            sealed.push(ring.current);
            sealed.extend_from_slice(&nonce);
            sealed.extend_from_slice(&ciphertext);
            (sealed, ring.current)
        };

        self.audit
            .emit(AuditEvent::new(
                AuditEventType::Encrypt,
                actor.clone(),
                AuditAction::new(
                    "ENCRYPT",
                    seal_resource(message_id),
                    AuditOutcome::Success,
                ),
                serde_json::json!({
                    "classification": classification,
                    "key_version": key_version,
                    "plaintext_bytes": plaintext.len(),
                }),
            ))
            .await;

        Ok(sealed)
    }

    /// Open a sealed payload, verifying the tag before returning plaintext.
    /// A failed verification emits SC `INTEGRITY_CHECK` with outcome FAILURE
    /// and returns an error; partial data is never produced.
    pub async fn open(
        &self,
        sealed: &[u8],
        actor: &AuditActor,
        message_id: Option<Uuid>,
    ) -> Result<Vec<u8>, SealError> {
        let result = self.open_inner(sealed);

        match &result {
            Ok(_) => {
                self.audit
                    .emit(AuditEvent::new(
                        AuditEventType::Decrypt,
                        actor.clone(),
                        AuditAction::new(
                            "DECRYPT",
                            seal_resource(message_id),
                            AuditOutcome::Success,
                        ),
                        serde_json::Value::Null,
                    ))
                    .await;
            }
            Err(e) => {
                self.audit
                    .emit(AuditEvent::new(
                        AuditEventType::IntegrityCheck,
                        actor.clone(),
                        AuditAction::new(
                            "DECRYPT",
                            seal_resource(message_id),
                            AuditOutcome::Failure,
                        )
                        .with_reason(e.to_string()),
                        serde_json::Value::Null,
                    ))
                    .await;
            }
        }

        result
    }

    fn open_inner(&self, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
        if sealed.len() < MIN_SEALED_SIZE {
            return Err(SealError::TooShort(sealed.len()));
        }
        if sealed[0] != FORMAT_VERSION {
            return Err(SealError::UnsupportedFormat(sealed[0]));
        }
        let key_version = sealed[1];
        let (nonce_bytes, ciphertext) = sealed[HEADER_SIZE..].split_at(NONCE_SIZE);

        let ring = self.keys.read().expect("key ring lock poisoned");
        let cipher = ring
            .ciphers
            .get(&key_version)
            .ok_or(SealError::UnknownKeyVersion(key_version))?;

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SealError::Integrity)
    }

    /// Install a new current key. The retired key stays in the ring so
    /// payloads sealed under it remain readable. Reusing an existing version
    /// number is refused.
    pub async fn rotate(
        &self,
        hex_key: &str,
        key_version: u8,
        actor: &AuditActor,
    ) -> Result<(), SealError> {
        let cipher = cipher_from_hex(hex_key)?;
        let previous = {
            let mut ring = self.keys.write().expect("key ring lock poisoned");
            if ring.ciphers.contains_key(&key_version) {
                return Err(SealError::KeyMaterial(format!(
                    "key version {key_version} already exists"
                )));
            }
            let previous = ring.current;
            ring.ciphers.insert(key_version, cipher);
            ring.current = key_version;
            previous
        };

        self.audit
            .emit(AuditEvent::new(
                AuditEventType::KeyRotate,
                actor.clone(),
                AuditAction::new("KEY_ROTATE", "sealing-key".to_string(), AuditOutcome::Success),
                serde_json::json!({
                    "previous_version": previous,
                    "new_version": key_version,
                }),
            ))
            .await;

        tracing::info!(
            previous_version = previous,
            new_version = key_version,
            "sealing key rotated"
        );
        Ok(())
    }
}

fn seal_resource(message_id: Option<Uuid>) -> String {
    match message_id {
        Some(id) => message_resource(id),
        None => "payload".to_string(),
    }
}

fn cipher_from_hex(hex_key: &str) -> Result<ChaCha20Poly1305, SealError> {
    if hex_key.len() != 64 {
        return Err(SealError::KeyMaterial(
            "sealing key must be 64 hex characters (32 bytes)".to_string(),
        ));
    }
    let bytes = hex::decode(hex_key)
        .map_err(|e| SealError::KeyMaterial(format!("invalid hex in sealing key: {e}")))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SealError::KeyMaterial("sealing key must be exactly 32 bytes".to_string()))?;
    Ok(ChaCha20Poly1305::new(&key.into()))
}
