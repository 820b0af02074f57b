//! Generic HMAC-signed JSON-at-rest persistence (C3's mechanism, reused for
//! the registry, the soft-deleted-connections table, and the
//! employee-connection-mapping table — three independent files, same shape).

use crate::canonical;
use crate::error::BrokerError;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, serde::Deserialize)]
struct SignedFile<T> {
    state: T,
    signature: String,
    signed_at: DateTime<Utc>,
}

/// Serialize `state` deterministically, sign it, and atomically write it to
/// `path` (temp file + rename, so a crash mid-write never corrupts the file
/// readers observe).
pub fn save<T: Serialize>(path: &Path, key: &[u8], state: &T) -> Result<(), BrokerError> {
    let signature = canonical::hmac_canonical(key, state)
        .map_err(|e| BrokerError::Internal(format!("serializing state: {e}")))?;
    let envelope = SignedFile {
        state,
        signature,
        signed_at: Utc::now(),
    };
    let bytes = serde_json::to_vec_pretty(&envelope)
        .map_err(|e| BrokerError::Internal(format!("serializing envelope: {e}")))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| BrokerError::Internal(format!("creating {}: {e}", parent.display())))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &bytes)
        .map_err(|e| BrokerError::Internal(format!("writing {}: {e}", tmp_path.display())))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| BrokerError::Internal(format!("renaming into {}: {e}", path.display())))?;
    Ok(())
}

/// Load and verify `path`. Returns `Ok(None)` if the file does not exist yet
/// (a fresh deployment). Any signature mismatch is `IntegrityViolation` and
/// must never be silently accepted.
pub fn load<T: DeserializeOwned + Serialize>(
    path: &Path,
    key: &[u8],
) -> Result<Option<T>, BrokerError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(BrokerError::Internal(format!(
                "reading {}: {e}",
                path.display()
            )))
        }
    };

    let envelope: SignedFile<T> = serde_json::from_slice(&bytes).map_err(|_| {
        BrokerError::IntegrityViolation {
            path: path.display().to_string(),
        }
    })?;

    let expected = canonical::hmac_canonical(key, &envelope.state)
        .map_err(|e| BrokerError::Internal(format!("recomputing signature: {e}")))?;

    if !canonical::signatures_match(&expected, &envelope.signature) {
        return Err(BrokerError::IntegrityViolation {
            path: path.display().to_string(),
        });
    }

    Ok(Some(envelope.state))
}
