//! Ephemeral Identifier & Envelope (C8): short-lived `did:ephemeral:<uuid>`
//! identifiers bound to a single recipient public key, plus the staged
//! pickup table the wallet later reads from.

use crate::canonical::sha256_hex;
use crate::classification::Clearance;
use crate::error::BrokerError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hkdf::Hkdf;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactedSectionRef {
    pub section_id: String,
    pub clearance: Clearance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralMetadata {
    pub ephemeral_did: String,
    pub original_document_id: String,
    pub recipient_did: String,
    pub clearance_level: Clearance,
    pub redacted_sections: Vec<RedactedSectionRef>,
    pub issuer_did: String,
    pub public_key: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub views_allowed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupRecord {
    pub encrypted_content: String,
    pub nonce: String,
    pub server_public_key: String,
    pub wallet_did: String,
    pub document_id: String,
    pub ephemeral_did: String,
    pub content_type: String,
    pub expires_at: DateTime<Utc>,
    pub views_remaining: i64,
}

pub struct CreateEphemeralInput {
    pub original_document_id: String,
    pub recipient_did: String,
    pub clearance_level: Clearance,
    pub redacted_sections: Vec<RedactedSectionRef>,
    pub ttl_ms: i64,
    pub views_allowed: i64,
    pub issuer_did: String,
}

const MIN_TTL_MS: i64 = 60_000;
const MAX_TTL_MS: i64 = 24 * 60 * 60 * 1000;
const DEFAULT_TTL_MS: i64 = 60 * 60 * 1000;

pub struct EphemeralStore {
    metadata: Mutex<HashMap<String, EphemeralMetadata>>,
    pickups: Mutex<HashMap<String, PickupRecord>>,
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EphemeralStore {
    pub fn new() -> Self {
        EphemeralStore {
            metadata: Mutex::new(HashMap::new()),
            pickups: Mutex::new(HashMap::new()),
        }
    }

    /// Generates a fresh X25519 keypair, embeds the public key, and returns
    /// the metadata record plus the server's secret (the caller needs the
    /// secret immediately to seal the envelope; it is never stored).
    pub fn create_ephemeral_did(
        &self,
        input: CreateEphemeralInput,
    ) -> Result<(EphemeralMetadata, StaticSecret), BrokerError> {
        let ttl_ms = if input.ttl_ms <= 0 {
            DEFAULT_TTL_MS
        } else {
            input.ttl_ms.clamp(MIN_TTL_MS, MAX_TTL_MS)
        };

        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);

        let now = Utc::now();
        let metadata = EphemeralMetadata {
            ephemeral_did: format!("did:ephemeral:{}", uuid::Uuid::new_v4()),
            original_document_id: input.original_document_id,
            recipient_did: input.recipient_did,
            clearance_level: input.clearance_level,
            redacted_sections: input.redacted_sections,
            issuer_did: input.issuer_did,
            public_key: BASE64.encode(public.as_bytes()),
            issued_at: now,
            expires_at: now + Duration::milliseconds(ttl_ms),
            views_allowed: input.views_allowed,
        };

        self.metadata
            .lock()
            .insert(metadata.ephemeral_did.clone(), metadata.clone());
        Ok((metadata, secret))
    }

    pub fn stage(&self, pickup_id: String, record: PickupRecord) {
        self.pickups.lock().insert(pickup_id, record);
    }

    /// 404 if unknown, 410 (and deletes) if expired.
    pub fn fetch(&self, pickup_id: &str) -> Result<PickupRecord, BrokerError> {
        let mut pickups = self.pickups.lock();
        let record = pickups
            .get(pickup_id)
            .ok_or_else(|| BrokerError::NotFound(format!("pickup {pickup_id}")))?;

        if Utc::now() > record.expires_at {
            pickups.remove(pickup_id);
            return Err(BrokerError::Gone(format!("pickup {pickup_id}")));
        }

        let mut record = record.clone();
        // views_allowed = -1 means unlimited within TTL (Open Question 2);
        // it never turns into an unlimited-across-sessions exemption from expiry.
        if record.views_remaining > 0 {
            record.views_remaining -= 1;
            pickups.insert(pickup_id.to_string(), record.clone());
        } else if record.views_remaining == 0 {
            pickups.remove(pickup_id);
            return Err(BrokerError::Gone(format!("pickup {pickup_id} has no views remaining")));
        }
        Ok(record)
    }

    /// Hourly sweep: evict pickups and metadata past expiry that were never read.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        {
            let mut pickups = self.pickups.lock();
            let before = pickups.len();
            pickups.retain(|_, r| r.expires_at > now);
            removed += before - pickups.len();
        }
        {
            let mut metadata = self.metadata.lock();
            metadata.retain(|_, m| m.expires_at > now);
        }
        removed
    }
}

/// ECDH(server_secret, recipient_public) -> HKDF -> AES-256-GCM seal.
/// Returns (ciphertext, nonce, content_hash), all base64 except the hash.
pub fn seal_envelope(
    server_secret: &StaticSecret,
    recipient_public_key: &[u8],
    plaintext: &[u8],
    aad_context: &[u8],
) -> Result<(String, String, String), BrokerError> {
    if recipient_public_key.len() != 32 {
        return Err(BrokerError::InputInvalid(
            "x25519 public key must be 32 bytes".into(),
        ));
    }
    let mut recipient_bytes = [0u8; 32];
    recipient_bytes.copy_from_slice(recipient_public_key);
    let recipient = PublicKey::from(recipient_bytes);

    let shared_secret = server_secret.diffie_hellman(&recipient);
    let hk = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
    let mut key_bytes = [0u8; 32];
    hk.expand(b"ephemeral-envelope", &mut key_bytes)
        .expect("32 bytes is a valid HKDF output length");

    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: aad_context,
            },
        )
        .map_err(|_| BrokerError::Internal("envelope encryption failed".into()))?;

    let content_hash = sha256_hex(plaintext);
    Ok((
        BASE64.encode(ciphertext),
        BASE64.encode(nonce_bytes),
        content_hash,
    ))
}
