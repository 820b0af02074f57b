//! Resource Authorization Core (C11): the two-step dual-VP flow per spec
//! §4.11, correlated by a single shared challenge, evaluated against the
//! resource policy table (§6).

use crate::canonical;
use crate::classification::Clearance;
use crate::cloud_agent::CloudAgentClient;
use crate::error::BrokerError;
use crate::vp::{self, CredentialClaim};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const AUTH_SESSION_TTL: Duration = Duration::minutes(5);
const RESOURCE_AUTH_DOMAIN: &str = "employee-portal.techcorp.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    AwaitingEnterpriseVp,
    EnterpriseVpVerified,
    AwaitingPersonalVp,
    Authorized,
    Denied,
    Expired,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRow {
    pub required_clearance: Clearance,
    /// `*` means any role satisfies the requirement.
    pub required_role: String,
}

pub struct PolicyTable {
    rows: HashMap<String, PolicyRow>,
}

impl PolicyTable {
    pub fn new(rows: HashMap<String, PolicyRow>) -> Self {
        PolicyTable { rows }
    }

    pub fn get(&self, resource_id: &str) -> Option<&PolicyRow> {
        self.rows.get(resource_id)
    }

    /// Loads `path` if given and present; otherwise seeds the four example
    /// rows a fresh deployment ships with, so `/resource/authorize/*`
    /// has something to evaluate against out of the box.
    pub fn load_or_seed(path: Option<&std::path::Path>) -> Result<Self, BrokerError> {
        if let Some(path) = path {
            if let Ok(bytes) = std::fs::read(path) {
                let rows: HashMap<String, PolicyRow> = serde_json::from_slice(&bytes)
                    .map_err(|e| BrokerError::Internal(format!("parsing {}: {e}", path.display())))?;
                return Ok(PolicyTable::new(rows));
            }
        }
        Ok(PolicyTable::new(Self::seed_rows()))
    }

    fn seed_rows() -> HashMap<String, PolicyRow> {
        let mut rows = HashMap::new();
        rows.insert(
            "project-alpha".to_string(),
            PolicyRow {
                required_clearance: Clearance::Confidential,
                required_role: "Engineer".to_string(),
            },
        );
        rows.insert(
            "financial-reports".to_string(),
            PolicyRow {
                required_clearance: Clearance::Restricted,
                required_role: "*".to_string(),
            },
        );
        rows.insert(
            "employee-records".to_string(),
            PolicyRow {
                required_clearance: Clearance::Confidential,
                required_role: "HR".to_string(),
            },
        );
        rows.insert(
            "infrastructure-plans".to_string(),
            PolicyRow {
                required_clearance: Clearance::TopSecret,
                required_role: "IT".to_string(),
            },
        );
        rows
    }
}

struct PendingResourceAuth {
    resource_id: String,
    employee_connection_id: String,
    personal_connection_id: Option<String>,
    challenge: String,
    enterprise_presentation_id: String,
    personal_presentation_id: Option<String>,
    enterprise_claims: Option<(String, String)>, // (role, department)
    created_at: DateTime<Utc>,
    status: AuthStatus,
}

pub struct InitiateResult {
    pub session_id: String,
    pub enterprise_presentation_id: String,
}

#[derive(Serialize)]
pub struct StatusResult {
    pub status: AuthStatus,
    pub enterprise_vp_verified: bool,
    pub personal_vp_received: bool,
}

#[derive(Serialize)]
pub struct VerifyResult {
    pub authorized: bool,
    pub reason: Option<String>,
    pub employee_role: Option<String>,
    pub department: Option<String>,
    pub clearance_level: Option<Clearance>,
}

pub struct ResourceAuthCore {
    enterprise_agent: Arc<CloudAgentClient>,
    policy: PolicyTable,
    pending: Mutex<HashMap<String, PendingResourceAuth>>,
}

impl ResourceAuthCore {
    pub fn new(enterprise_agent: Arc<CloudAgentClient>, policy: PolicyTable) -> Self {
        ResourceAuthCore {
            enterprise_agent,
            policy,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn fresh_challenge() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Step 1: enterprise proof request over the employee's tenant connection.
    pub async fn initiate(
        &self,
        resource_id: &str,
        employee_connection_id: &str,
    ) -> Result<InitiateResult, BrokerError> {
        if self.policy.get(resource_id).is_none() {
            return Err(BrokerError::NotFound(format!("resource {resource_id}")));
        }

        let challenge = Self::fresh_challenge();
        let proof_request = self
            .enterprise_agent
            .create_proof_request(
                employee_connection_id,
                &challenge,
                RESOURCE_AUTH_DOMAIN,
                "resource-authorization",
                "JWT",
            )
            .await?;

        let session_id = uuid::Uuid::new_v4().to_string();
        self.pending.lock().insert(
            session_id.clone(),
            PendingResourceAuth {
                resource_id: resource_id.to_string(),
                employee_connection_id: employee_connection_id.to_string(),
                personal_connection_id: None,
                challenge,
                enterprise_presentation_id: proof_request.presentation_id.clone(),
                personal_presentation_id: None,
                enterprise_claims: None,
                created_at: Utc::now(),
                status: AuthStatus::AwaitingEnterpriseVp,
            },
        );

        Ok(InitiateResult {
            session_id,
            enterprise_presentation_id: proof_request.presentation_id,
        })
    }

    fn expire_if_stale(&self, pending: &mut PendingResourceAuth) -> bool {
        if Utc::now() - pending.created_at > AUTH_SESSION_TTL {
            pending.status = AuthStatus::Expired;
            true
        } else {
            false
        }
    }

    /// Step 2: poll the enterprise VP; on verification, extract role/department.
    pub async fn status(&self, session_id: &str) -> Result<StatusResult, BrokerError> {
        let (enterprise_presentation_id, already_verified) = {
            let mut pending = self.pending.lock();
            let entry = pending
                .get_mut(session_id)
                .ok_or_else(|| BrokerError::NotFound(format!("resource auth session {session_id}")))?;
            if self.expire_if_stale(entry) {
                return Ok(StatusResult {
                    status: AuthStatus::Expired,
                    enterprise_vp_verified: false,
                    personal_vp_received: false,
                });
            }
            (
                entry.enterprise_presentation_id.clone(),
                entry.status as u8 >= AuthStatus::EnterpriseVpVerified as u8,
            )
        };

        if !already_verified {
            let state = self
                .enterprise_agent
                .get_proof_request(&enterprise_presentation_id)
                .await?;
            if state.state == "PresentationVerified" {
                let vp_jwt = state
                    .data
                    .first()
                    .ok_or_else(|| BrokerError::Internal("verified presentation carried no VP".into()))?;
                let claims = extract_employee_role(vp_jwt)?;

                let mut pending = self.pending.lock();
                if let Some(entry) = pending.get_mut(session_id) {
                    entry.enterprise_claims = Some(claims);
                    entry.status = AuthStatus::EnterpriseVpVerified;
                }
            }
        }

        let pending = self.pending.lock();
        let entry = pending
            .get(session_id)
            .ok_or_else(|| BrokerError::NotFound(format!("resource auth session {session_id}")))?;
        Ok(StatusResult {
            status: entry.status,
            enterprise_vp_verified: entry.status as u8 >= AuthStatus::EnterpriseVpVerified as u8,
            personal_vp_received: entry.personal_presentation_id.is_some(),
        })
    }

    /// Step 3: second proof request over the personal-wallet connection,
    /// reusing the same challenge/domain.
    pub async fn request_clearance(
        &self,
        session_id: &str,
        personal_connection_id: &str,
    ) -> Result<String, BrokerError> {
        let (challenge,) = {
            let pending = self.pending.lock();
            let entry = pending
                .get(session_id)
                .ok_or_else(|| BrokerError::NotFound(format!("resource auth session {session_id}")))?;
            if entry.status != AuthStatus::EnterpriseVpVerified {
                return Err(BrokerError::InputInvalid(
                    "enterprise VP must verify before requesting clearance".into(),
                ));
            }
            (entry.challenge.clone(),)
        };

        let proof_request = self
            .enterprise_agent
            .create_proof_request(
                personal_connection_id,
                &challenge,
                RESOURCE_AUTH_DOMAIN,
                "resource-authorization-clearance",
                "JWT",
            )
            .await?;

        let mut pending = self.pending.lock();
        let entry = pending
            .get_mut(session_id)
            .ok_or_else(|| BrokerError::NotFound(format!("resource auth session {session_id}")))?;
        entry.personal_connection_id = Some(personal_connection_id.to_string());
        entry.personal_presentation_id = Some(proof_request.presentation_id.clone());
        entry.status = AuthStatus::AwaitingPersonalVp;

        Ok(proof_request.presentation_id)
    }

    /// Step 4: refresh both presentations and evaluate the policy table.
    pub async fn verify(&self, session_id: &str) -> Result<VerifyResult, BrokerError> {
        let mut pending_guard = self.pending.lock();
        let entry = pending_guard
            .get_mut(session_id)
            .ok_or_else(|| BrokerError::NotFound(format!("resource auth session {session_id}")))?;
        if self.expire_if_stale(entry) {
            return Err(BrokerError::Gone(format!("resource auth session {session_id}")));
        }
        let (role, department) = entry
            .enterprise_claims
            .clone()
            .ok_or_else(|| BrokerError::InputInvalid("enterprise VP has not verified yet".into()))?;
        let personal_presentation_id = entry
            .personal_presentation_id
            .clone()
            .ok_or_else(|| BrokerError::InputInvalid("personal clearance VP not requested yet".into()))?;
        let resource_id = entry.resource_id.clone();
        let challenge = entry.challenge.clone();
        drop(pending_guard);

        let state = self
            .enterprise_agent
            .get_proof_request(&personal_presentation_id)
            .await?;
        if state.state != "PresentationVerified" {
            return Ok(VerifyResult {
                authorized: false,
                reason: Some("personal clearance presentation not yet verified".to_string()),
                employee_role: Some(role),
                department: Some(department),
                clearance_level: None,
            });
        }
        let vp_jwt = state
            .data
            .first()
            .ok_or_else(|| BrokerError::Internal("verified presentation carried no VP".into()))?;

        let vp_payload = vp::decode_jwt_payload(vp_jwt)?;
        let proof = vp::extract_vp_proof(&vp_payload)?;
        if !canonical::signatures_match(&challenge, &proof.challenge) {
            return Err(BrokerError::ChallengeMismatch);
        }
        if !canonical::signatures_match(RESOURCE_AUTH_DOMAIN, &proof.domain) {
            return Err(BrokerError::DomainMismatch);
        }

        let mut clearance_level = None;
        for vc_jwt in vp::extract_credential_jwts(&vp_payload) {
            if let CredentialClaim::SecurityClearance { clearance_level: level, .. } =
                vp::classify_credential(&vc_jwt)?
            {
                clearance_level = Some(level);
            }
        }
        let clearance_level = clearance_level
            .ok_or_else(|| BrokerError::InputInvalid("personal VP carried no SecurityClearance".into()))?;

        let policy = self
            .policy
            .get(&resource_id)
            .ok_or_else(|| BrokerError::NotFound(format!("resource {resource_id}")))?;

        let role_ok = policy.required_role == "*" || policy.required_role == role;
        let clearance_ok = clearance_level >= policy.required_clearance;

        let (authorized, reason) = if !clearance_ok {
            (
                false,
                Some(format!(
                    "Insufficient clearance: {clearance_level} < {}",
                    policy.required_clearance
                )),
            )
        } else if !role_ok {
            (
                false,
                Some(format!(
                    "Role {role} does not satisfy required role {}",
                    policy.required_role
                )),
            )
        } else {
            (true, None)
        };

        if authorized {
            let mut pending = self.pending.lock();
            if let Some(entry) = pending.get_mut(session_id) {
                entry.status = AuthStatus::Authorized;
            }
        } else {
            let mut pending = self.pending.lock();
            if let Some(entry) = pending.get_mut(session_id) {
                entry.status = AuthStatus::Denied;
            }
        }

        Ok(VerifyResult {
            authorized,
            reason,
            employee_role: Some(role),
            department: Some(department),
            clearance_level: Some(clearance_level),
        })
    }

    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, p| now - p.created_at <= AUTH_SESSION_TTL);
        before - pending.len()
    }
}

fn extract_employee_role(vp_jwt: &str) -> Result<(String, String), BrokerError> {
    let vp_payload = vp::decode_jwt_payload(vp_jwt)?;
    for vc_jwt in vp::extract_credential_jwts(&vp_payload) {
        if let CredentialClaim::EmployeeRole { role, department, .. } = vp::classify_credential(&vc_jwt)? {
            return Ok((role, department));
        }
    }
    Err(BrokerError::InputInvalid(
        "enterprise VP carried no EmployeeRole credential".into(),
    ))
}
