//! Section Crypto (C5): per-level keyring derived from the company secret,
//! per-section AEAD, and the clearance-gated decryption projection.

use super::{DocumentMeta, ParsedDocument, ParsedSection};
use crate::classification::Clearance;
use crate::error::BrokerError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSection {
    pub section_id: String,
    pub clearance: Clearance,
    pub ciphertext: String,
    pub nonce: String,
    pub auth_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub document_package_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub metadata: DocumentMeta,
    pub encrypted_sections: Vec<EncryptedSection>,
    /// level rank -> opaque key handle (the level label under this construction).
    pub keyring: BTreeMap<u8, String>,
}

#[derive(Debug, Clone)]
pub enum ProjectedSection {
    Visible {
        section_id: String,
        clearance: Clearance,
        content: String,
    },
    Redacted {
        section_id: String,
        clearance: Clearance,
    },
}

const TAG_LEN: usize = 16;

fn level_key(company_secret: &[u8], level: Clearance) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, company_secret);
    let mut out = [0u8; 32];
    hk.expand(level.to_string().as_bytes(), &mut out)
        .expect("32 bytes is a valid HKDF output length");
    out
}

fn aad(document_package_id: &str, section_id: &str, level: Clearance) -> Vec<u8> {
    format!("{document_package_id}||{section_id}||{}", level.rank()).into_bytes()
}

pub fn encrypt(parsed: &ParsedDocument, document_package_id: &str, company_secret: &[u8]) -> Result<Package, BrokerError> {
    let mut encrypted_sections = Vec::with_capacity(parsed.sections.len());
    let mut keyring = BTreeMap::new();
    for level in Clearance::ALL {
        keyring.insert(level.rank(), level.to_string());
    }

    for section in &parsed.sections {
        let key_bytes = level_key(company_secret, section.clearance);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        let cipher = Aes256Gcm::new(key);

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let associated_data = aad(document_package_id, &section.section_id, section.clearance);
        let sealed = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: section.content.as_bytes(),
                    aad: &associated_data,
                },
            )
            .map_err(|_| BrokerError::Internal("section encryption failed".into()))?;

        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        encrypted_sections.push(EncryptedSection {
            section_id: section.section_id.clone(),
            clearance: section.clearance,
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce_bytes),
            auth_tag: BASE64.encode(tag),
        });
    }

    Ok(Package {
        document_package_id: document_package_id.to_string(),
        created_at: chrono::Utc::now(),
        metadata: parsed.metadata.clone(),
        encrypted_sections,
        keyring,
    })
}

pub fn decrypt_for_user(
    package: &Package,
    user_clearance: Clearance,
    company_secret: &[u8],
) -> Result<Vec<ProjectedSection>, BrokerError> {
    let mut projected = Vec::with_capacity(package.encrypted_sections.len());

    for section in &package.encrypted_sections {
        if section.clearance > user_clearance {
            projected.push(ProjectedSection::Redacted {
                section_id: section.section_id.clone(),
                clearance: section.clearance,
            });
            continue;
        }

        let key_bytes = level_key(company_secret, section.clearance);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        let cipher = Aes256Gcm::new(key);

        let nonce_bytes = BASE64
            .decode(&section.nonce)
            .map_err(|_| BrokerError::Internal("malformed nonce".into()))?;
        let ciphertext = BASE64
            .decode(&section.ciphertext)
            .map_err(|_| BrokerError::Internal("malformed ciphertext".into()))?;
        let tag = BASE64
            .decode(&section.auth_tag)
            .map_err(|_| BrokerError::Internal("malformed auth tag".into()))?;

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let associated_data = aad(&package.document_package_id, &section.section_id, section.clearance);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed,
                    aad: &associated_data,
                },
            )
            .map_err(|_| BrokerError::Internal(format!(
                "AEAD failure decrypting section {}",
                section.section_id
            )))?;

        projected.push(ProjectedSection::Visible {
            section_id: section.section_id.clone(),
            clearance: section.clearance,
            content: String::from_utf8(plaintext)
                .map_err(|_| BrokerError::Internal("section plaintext not valid UTF-8".into()))?,
        });
    }

    Ok(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{summarize, SourceFormat};

    fn sample_parsed() -> ParsedDocument {
        let sections = vec![
            ParsedSection {
                section_id: "s1".into(),
                clearance: Clearance::Internal,
                content: "Welcome".into(),
            },
            ParsedSection {
                section_id: "s2".into(),
                clearance: Clearance::Confidential,
                content: "Budget".into(),
            },
            ParsedSection {
                section_id: "s3".into(),
                clearance: Clearance::TopSecret,
                content: "Plans".into(),
            },
        ];
        let metadata = summarize(&sections, "Report".into(), SourceFormat::Html);
        ParsedDocument {
            sections,
            metadata,
            original_bytes: None,
        }
    }

    #[test]
    fn round_trip_at_max_clearance() {
        let parsed = sample_parsed();
        let secret = b"company-secret";
        let package = encrypt(&parsed, "pkg-1", secret).unwrap();
        let projected = decrypt_for_user(&package, Clearance::TopSecret, secret).unwrap();

        assert_eq!(projected.len(), parsed.sections.len());
        for (original, got) in parsed.sections.iter().zip(projected.iter()) {
            match got {
                ProjectedSection::Visible { section_id, content, .. } => {
                    assert_eq!(section_id, &original.section_id);
                    assert_eq!(content, &original.content);
                }
                ProjectedSection::Redacted { .. } => panic!("expected visible section"),
            }
        }
    }

    #[test]
    fn partial_clearance_redacts_above_level_and_preserves_order() {
        let parsed = sample_parsed();
        let secret = b"company-secret";
        let package = encrypt(&parsed, "pkg-1", secret).unwrap();
        let projected = decrypt_for_user(&package, Clearance::Confidential, secret).unwrap();

        assert!(matches!(projected[0], ProjectedSection::Visible { .. }));
        assert!(matches!(projected[1], ProjectedSection::Visible { .. }));
        assert!(matches!(projected[2], ProjectedSection::Redacted { .. }));
    }

    #[test]
    fn wrong_secret_fails_closed() {
        let parsed = sample_parsed();
        let package = encrypt(&parsed, "pkg-1", b"right-secret").unwrap();
        let result = decrypt_for_user(&package, Clearance::TopSecret, b"wrong-secret");
        assert!(result.is_err());
    }
}
