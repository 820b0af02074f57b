//! Session & Auth Core (C10): the login state machine per spec §4.10 —
//! `initiate`, `status` (poll), `verify` — plus the session table.

use crate::canonical;
use crate::classification::Clearance;
use crate::cloud_agent::CloudAgentClient;
use crate::error::BrokerError;
use crate::registry::employee_map::EmployeeMappingStore;
use crate::vp::{self, CredentialClaim};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const LOGIN_DOMAIN: &str = "employee-portal.techcorp.com";
const PENDING_AUTH_TTL: Duration = Duration::minutes(5);
const SESSION_TTL: Duration = Duration::hours(4);

struct PendingAuth {
    challenge: String,
    connection_id: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Employee {
    pub connection_id: String,
    pub subject_did: String,
    pub role: String,
    pub department: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Training {
    pub has_training: bool,
    pub training_year: Option<i64>,
    pub certificate_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub employee: Employee,
    pub training: Training,
    pub clearance: Clearance,
    pub authenticated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginStatus {
    Pending,
    Received,
    Verified,
    Failed,
}

pub struct InitiateResult {
    pub presentation_id: String,
}

pub struct VerifyResult {
    pub session_token: String,
    pub employee: Employee,
    pub training: Training,
}

pub struct SessionCore {
    tenant_agent: Arc<CloudAgentClient>,
    employee_map: Arc<EmployeeMappingStore>,
    accepted_issuers: HashSet<String>,
    pending: Mutex<HashMap<String, PendingAuth>>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionCore {
    pub fn new(
        tenant_agent: Arc<CloudAgentClient>,
        employee_map: Arc<EmployeeMappingStore>,
        accepted_issuers: HashSet<String>,
    ) -> Self {
        SessionCore {
            tenant_agent,
            employee_map,
            accepted_issuers,
            pending: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn fresh_challenge() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub async fn initiate(&self, identifier: &str) -> Result<InitiateResult, BrokerError> {
        let connection = self
            .employee_map
            .resolve(identifier)
            .ok_or_else(|| BrokerError::NotFound(format!("employee {identifier}")))?;

        let challenge = Self::fresh_challenge();
        let proof_request = self
            .tenant_agent
            .create_proof_request(
                &connection.connection_id,
                &challenge,
                LOGIN_DOMAIN,
                "login",
                "JWT",
            )
            .await?;

        self.pending.lock().insert(
            proof_request.presentation_id.clone(),
            PendingAuth {
                challenge,
                connection_id: connection.connection_id.clone(),
                created_at: Utc::now(),
            },
        );

        Ok(InitiateResult {
            presentation_id: proof_request.presentation_id,
        })
    }

    pub async fn status(&self, presentation_id: &str) -> Result<LoginStatus, BrokerError> {
        let expired = {
            let pending = self.pending.lock();
            let entry = pending
                .get(presentation_id)
                .ok_or_else(|| BrokerError::NotFound(format!("presentation {presentation_id}")))?;
            Utc::now() - entry.created_at > PENDING_AUTH_TTL
        };
        if expired {
            self.pending.lock().remove(presentation_id);
            return Ok(LoginStatus::Failed);
        }

        let state = self.tenant_agent.get_proof_request(presentation_id).await?;
        Ok(map_presentation_state(&state.state))
    }

    /// Finalizes login: fetches the verified VP, enforces challenge/domain
    /// binding and the accepted-issuer set, and mints a session.
    pub async fn verify(&self, presentation_id: &str) -> Result<VerifyResult, BrokerError> {
        let pending = {
            let mut pending = self.pending.lock();
            pending
                .remove(presentation_id)
                .ok_or_else(|| BrokerError::NotFound(format!("presentation {presentation_id}")))?
        };
        if Utc::now() - pending.created_at > PENDING_AUTH_TTL {
            return Err(BrokerError::Gone(format!("presentation {presentation_id}")));
        }

        let state = self.tenant_agent.get_proof_request(presentation_id).await?;
        if map_presentation_state(&state.state) != LoginStatus::Verified {
            return Err(BrokerError::InputInvalid(
                "presentation is not yet verified".into(),
            ));
        }
        let vp_jwt = state
            .data
            .first()
            .ok_or_else(|| BrokerError::Internal("verified presentation carried no VP".into()))?;

        let vp_payload = vp::decode_jwt_payload(vp_jwt)?;
        let proof = vp::extract_vp_proof(&vp_payload)?;
        if !canonical::signatures_match(&pending.challenge, &proof.challenge) {
            return Err(BrokerError::ChallengeMismatch);
        }
        if !canonical::signatures_match(LOGIN_DOMAIN, &proof.domain) {
            return Err(BrokerError::DomainMismatch);
        }

        let mut employee: Option<Employee> = None;
        let mut training = Training::default();
        let mut clearance: Option<Clearance> = None;

        for vc_jwt in vp::extract_credential_jwts(&vp_payload) {
            let claim = vp::classify_credential(&vc_jwt)?;
            let issuer = match &claim {
                CredentialClaim::EmployeeRole { issuer, .. }
                | CredentialClaim::CisTraining { issuer, .. }
                | CredentialClaim::SecurityClearance { issuer, .. } => Some(issuer.clone()),
                CredentialClaim::Unrecognized => None,
            };
            if let Some(issuer) = issuer {
                if !self.accepted_issuers.contains(&issuer) {
                    return Err(BrokerError::InvalidIssuer(issuer));
                }
            }

            match claim {
                CredentialClaim::EmployeeRole {
                    subject_did,
                    role,
                    department,
                    ..
                } => {
                    employee = Some(Employee {
                        connection_id: pending.connection_id.clone(),
                        subject_did,
                        role,
                        department,
                    });
                }
                CredentialClaim::CisTraining {
                    subject_did,
                    training_year,
                    certificate_number,
                    expiry_date,
                    ..
                } => {
                    let owner_matches = employee
                        .as_ref()
                        .map(|e| e.subject_did == subject_did)
                        .unwrap_or(true);
                    if owner_matches && expiry_date > Utc::now() {
                        training = Training {
                            has_training: true,
                            training_year: Some(training_year),
                            certificate_number: Some(certificate_number),
                        };
                    }
                }
                CredentialClaim::SecurityClearance {
                    subject_did,
                    clearance_level,
                    ..
                } => {
                    let owner_matches = employee
                        .as_ref()
                        .map(|e| e.subject_did == subject_did)
                        .unwrap_or(true);
                    if owner_matches {
                        clearance = Some(clearance_level);
                    }
                }
                CredentialClaim::Unrecognized => {}
            }
        }

        let employee = employee.ok_or_else(|| {
            BrokerError::InputInvalid("presentation carried no EmployeeRole credential".into())
        })?;

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let session = Session {
            token: token.clone(),
            employee: employee.clone(),
            training: training.clone(),
            clearance: clearance.unwrap_or_else(Clearance::unclassified_default),
            authenticated_at: Utc::now(),
        };
        self.sessions.lock().insert(token.clone(), session);

        Ok(VerifyResult {
            session_token: token,
            employee,
            training,
        })
    }

    /// Returns the session if it exists and has not exceeded the 4h TTL;
    /// expired sessions are evicted on access as well as by the hourly sweep.
    pub fn lookup(&self, token: &str) -> Result<Session, BrokerError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get(token)
            .ok_or(BrokerError::Unauthorized)?
            .clone();
        if Utc::now() - session.authenticated_at > SESSION_TTL {
            sessions.remove(token);
            return Err(BrokerError::SessionExpired);
        }
        Ok(session)
    }

    pub fn logout(&self, token: &str) {
        self.sessions.lock().remove(token);
    }

    pub fn sweep_expired(&self) -> (usize, usize) {
        let now = Utc::now();
        let pending_removed = {
            let mut pending = self.pending.lock();
            let before = pending.len();
            pending.retain(|_, p| now - p.created_at <= PENDING_AUTH_TTL);
            before - pending.len()
        };
        let sessions_removed = {
            let mut sessions = self.sessions.lock();
            let before = sessions.len();
            sessions.retain(|_, s| now - s.authenticated_at <= SESSION_TTL);
            before - sessions.len()
        };
        (pending_removed, sessions_removed)
    }
}

fn map_presentation_state(state: &str) -> LoginStatus {
    match state {
        "PresentationVerified" => LoginStatus::Verified,
        "PresentationReceived" | "PresentationPending" => LoginStatus::Received,
        "RequestPending" | "RequestSent" => LoginStatus::Pending,
        _ => LoginStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentation_state_mapping_covers_known_states() {
        assert_eq!(map_presentation_state("RequestPending"), LoginStatus::Pending);
        assert_eq!(map_presentation_state("PresentationReceived"), LoginStatus::Received);
        assert_eq!(map_presentation_state("PresentationVerified"), LoginStatus::Verified);
        assert_eq!(map_presentation_state("PresentationRejected"), LoginStatus::Failed);
    }

    #[test]
    fn session_lookup_rejects_unknown_token() {
        let core = SessionCore::new(
            Arc::new(CloudAgentClient::tenant("http://localhost:1", "key")),
            Arc::new(EmployeeMappingStore::open(std::env::temp_dir().join("nonexistent-employee-map.json"), b"k".to_vec()).unwrap()),
            HashSet::new(),
        );
        assert!(matches!(core.lookup("unknown-token"), Err(BrokerError::Unauthorized)));
    }
}
