//! Signed Registry Store (C3) + Document Registry Core (C7).
//!
//! A single-writer, mutex-guarded in-memory map mirrored to a signed JSON
//! file on every mutation. The mutex is only held across the in-memory
//! mutation; the file write happens after release, following the
//! take-lock/mutate/release/I-O/take-lock/commit pattern (spec §5).

pub mod bloom;
pub mod employee_map;
pub mod soft_delete;

use crate::classification::Clearance;
use crate::error::BrokerError;
use crate::persist;
use bloom::BloomFilter;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRef {
    pub file_id: String,
    pub original_file_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub title: String,
    pub overall_classification: Clearance,
    pub releasable_to: HashSet<String>,
    pub bloom_filter: BloomFilter,
    /// Company identifier -> AEAD ciphertext (base64) of a per-company metadata slice.
    pub encrypted_metadata: HashMap<String, String>,
    pub content_encryption_key: String,
    pub storage: StorageRef,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryState {
    version: u32,
    saved_at: DateTime<Utc>,
    document_count: usize,
    documents: Vec<DocumentRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub title: String,
    pub classification_level: Clearance,
    pub content_encryption_key: String,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

pub struct DocumentRegistry {
    path: PathBuf,
    signature_key: Vec<u8>,
    documents: Mutex<HashMap<String, DocumentRecord>>,
    /// Single-writer discipline: only one save may be in flight at a time,
    /// independent of the `documents` read/mutate lock.
    writer: Mutex<()>,
}

impl DocumentRegistry {
    /// Load the registry from disk, or start empty if the file is absent.
    /// A signature mismatch is fatal: the caller should refuse to start.
    pub fn open(path: PathBuf, signature_key: Vec<u8>) -> Result<Self, BrokerError> {
        let state: Option<RegistryState> = persist::load(&path, &signature_key)?;
        let documents = match state {
            Some(state) => state
                .documents
                .into_iter()
                .map(|d| (d.document_id.clone(), d))
                .collect(),
            None => HashMap::new(),
        };
        Ok(DocumentRegistry {
            path,
            signature_key,
            documents: Mutex::new(documents),
            writer: Mutex::new(()),
        })
    }

    fn persist(&self) -> Result<(), BrokerError> {
        let _writer_guard = self.writer.lock();
        let snapshot: Vec<DocumentRecord> = {
            let documents = self.documents.lock();
            documents.values().cloned().collect()
        };
        let state = RegistryState {
            version: 1,
            saved_at: Utc::now(),
            document_count: snapshot.len(),
            documents: snapshot,
        };
        persist::save(&self.path, &self.signature_key, &state)
    }

    pub fn register(&self, record: DocumentRecord) -> Result<DocumentRecord, BrokerError> {
        if record.releasable_to.is_empty() {
            return Err(BrokerError::InputInvalid(
                "releasableTo must not be empty".into(),
            ));
        }
        let mut record = record;
        record.bloom_filter = BloomFilter::from_elements(&record.releasable_to);
        record.created_at = Utc::now();
        record.updated_at = record.created_at;

        {
            let mut documents = self.documents.lock();
            documents.insert(record.document_id.clone(), record.clone());
        }
        self.persist()?;
        Ok(record)
    }

    pub fn get(&self, document_id: &str) -> Option<DocumentRecord> {
        self.documents.lock().get(document_id).cloned()
    }

    /// Discovery per §4.7: Bloom short-circuit, exact `releasableTo` check,
    /// clearance gating, then a per-company metadata projection.
    pub fn discover(&self, issuer_did: &str, caller_clearance: Clearance) -> Vec<DocumentSummary> {
        let documents = self.documents.lock();
        documents
            .values()
            .filter(|record| record.bloom_filter.contains(issuer_did))
            .filter(|record| record.releasable_to.contains(issuer_did))
            .filter(|record| caller_clearance >= record.overall_classification)
            .map(|record| DocumentSummary {
                document_id: record.document_id.clone(),
                title: record.title.clone(),
                classification_level: record.overall_classification,
                content_encryption_key: record.content_encryption_key.clone(),
                created_at: record.created_at,
                metadata: record.metadata.clone(),
            })
            .collect()
    }

    /// Authorization check reused by the download pipeline (C9): releasability
    /// only. Unlike `discover`, this does not gate on `overall_classification`
    /// — a caller below the document's top section level still authorizes
    /// here and receives a per-section redacted projection downstream (§8 S3).
    pub fn authorize(
        &self,
        document_id: &str,
        issuer_did: &str,
        _caller_clearance: Clearance,
    ) -> Result<DocumentRecord, BrokerError> {
        let record = self
            .get(document_id)
            .ok_or_else(|| BrokerError::NotFound(format!("document {document_id}")))?;
        if !record.releasable_to.contains(issuer_did) {
            return Err(BrokerError::AccessDenied(format!(
                "{issuer_did} is not in the releasable-to set for {document_id}"
            )));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_record(id: &str, releasable_to: &[&str], level: Clearance) -> DocumentRecord {
        DocumentRecord {
            document_id: id.into(),
            title: "Quarterly Report".into(),
            overall_classification: level,
            releasable_to: releasable_to.iter().map(|s| s.to_string()).collect(),
            bloom_filter: BloomFilter::new(),
            encrypted_metadata: HashMap::new(),
            content_encryption_key: "key-handle".into(),
            storage: StorageRef {
                file_id: "file-1".into(),
                original_file_id: None,
            },
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn s1_register_and_filter_by_company() {
        let dir = tempdir().unwrap();
        let registry = DocumentRegistry::open(
            dir.path().join("registry.json"),
            b"sig-key".to_vec(),
        )
        .unwrap();

        registry
            .register(sample_record(
                "did:doc:1",
                &["did:prism:ACME"],
                Clearance::Confidential,
            ))
            .unwrap();

        assert!(registry
            .discover("did:prism:TECHCORP", Clearance::Restricted)
            .is_empty());
        assert!(registry
            .discover("did:prism:ACME", Clearance::Internal)
            .is_empty());
        let found = registry.discover("did:prism:ACME", Clearance::Confidential);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].document_id, "did:doc:1");
    }

    #[test]
    fn s2_crash_recovery_round_trips_and_rejects_tamper() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let key = b"sig-key".to_vec();

        {
            let registry = DocumentRegistry::open(path.clone(), key.clone()).unwrap();
            registry
                .register(sample_record("did:doc:1", &["did:prism:ACME"], Clearance::Internal))
                .unwrap();
            registry
                .register(sample_record("did:doc:2", &["did:prism:GLOBEX"], Clearance::Restricted))
                .unwrap();
        }

        let reopened = DocumentRegistry::open(path.clone(), key.clone()).unwrap();
        assert!(reopened.get("did:doc:1").is_some());
        assert!(reopened.get("did:doc:2").is_some());

        let mut bytes = std::fs::read(&path).unwrap();
        let idx = bytes.iter().position(|b| b.is_ascii_alphanumeric()).unwrap();
        bytes[idx] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let result = DocumentRegistry::open(path, key);
        assert!(matches!(result, Err(BrokerError::IntegrityViolation { .. })));
    }

    #[test]
    fn releasable_to_never_empty() {
        let dir = tempdir().unwrap();
        let registry = DocumentRegistry::open(dir.path().join("r.json"), b"k".to_vec()).unwrap();
        let mut record = sample_record("did:doc:3", &["did:prism:ACME"], Clearance::Internal);
        record.releasable_to.clear();
        assert!(registry.register(record).is_err());
    }
}
