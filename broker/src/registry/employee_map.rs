//! Employee-connection-mapping table (§6 persisted files): resolves a login
//! identifier (email or DID string) to the DIDComm connection the Session &
//! Auth Core should send proof requests over.

use crate::error::BrokerError;
use crate::persist;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeConnection {
    pub connection_id: String,
    pub email: String,
    pub name: String,
    pub department: String,
    pub personal_wallet_connection_id: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct MappingState {
    by_identifier: HashMap<String, EmployeeConnection>,
}

pub struct EmployeeMappingStore {
    path: PathBuf,
    signature_key: Vec<u8>,
    state: Mutex<MappingState>,
}

impl EmployeeMappingStore {
    pub fn open(path: PathBuf, signature_key: Vec<u8>) -> Result<Self, BrokerError> {
        let state = persist::load(&path, &signature_key)?.unwrap_or_default();
        Ok(EmployeeMappingStore {
            path,
            signature_key,
            state: Mutex::new(state),
        })
    }

    pub fn insert(&self, identifier: &str, connection: EmployeeConnection) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock();
            state.by_identifier.insert(identifier.to_string(), connection);
        }
        self.persist()
    }

    pub fn resolve(&self, identifier: &str) -> Option<EmployeeConnection> {
        self.state.lock().by_identifier.get(identifier).cloned()
    }

    fn persist(&self) -> Result<(), BrokerError> {
        let snapshot = self.state.lock().clone();
        persist::save(&self.path, &self.signature_key, &snapshot)
    }
}
