//! Soft-deleted connections table (§4.7): a per-company hidden-set the
//! upstream Cloud Agent doesn't know about. Union-subtraction against a live
//! listing from C1 is how a caller's effective connection list is computed;
//! this module only owns the hidden half.

use crate::error::BrokerError;
use crate::persist;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SoftDeleteState {
    by_company: HashMap<String, HashSet<String>>,
}

pub struct SoftDeleteStore {
    path: PathBuf,
    signature_key: Vec<u8>,
    state: Mutex<SoftDeleteState>,
}

impl SoftDeleteStore {
    pub fn open(path: PathBuf, signature_key: Vec<u8>) -> Result<Self, BrokerError> {
        let state = persist::load(&path, &signature_key)?.unwrap_or_default();
        Ok(SoftDeleteStore {
            path,
            signature_key,
            state: Mutex::new(state),
        })
    }

    pub fn hide(&self, company_id: &str, connection_id: &str) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock();
            state
                .by_company
                .entry(company_id.to_string())
                .or_default()
                .insert(connection_id.to_string());
        }
        self.persist()
    }

    pub fn is_hidden(&self, company_id: &str, connection_id: &str) -> bool {
        self.state
            .lock()
            .by_company
            .get(company_id)
            .is_some_and(|set| set.contains(connection_id))
    }

    /// `live` minus the hidden set for this company.
    pub fn visible<'a>(&self, company_id: &str, live: &'a [String]) -> Vec<&'a String> {
        let state = self.state.lock();
        let hidden = state.by_company.get(company_id);
        live.iter()
            .filter(|id| !hidden.is_some_and(|h| h.contains(*id)))
            .collect()
    }

    fn persist(&self) -> Result<(), BrokerError> {
        let snapshot = self.state.lock().clone();
        persist::save(&self.path, &self.signature_key, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hidden_connections_are_subtracted_from_live_list() {
        let dir = tempdir().unwrap();
        let store =
            SoftDeleteStore::open(dir.path().join("soft-deleted.json"), b"key".to_vec()).unwrap();
        store.hide("acme", "conn-1").unwrap();

        let live = vec!["conn-1".to_string(), "conn-2".to_string()];
        let visible = store.visible("acme", &live);
        assert_eq!(visible, vec![&"conn-2".to_string()]);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("soft-deleted.json");
        {
            let store = SoftDeleteStore::open(path.clone(), b"key".to_vec()).unwrap();
            store.hide("acme", "conn-1").unwrap();
        }
        let reopened = SoftDeleteStore::open(path, b"key".to_vec()).unwrap();
        assert!(reopened.is_hidden("acme", "conn-1"));
    }
}
