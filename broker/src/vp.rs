//! Shared Verifiable-Presentation/Credential JWT shape-detection (spec
//! design note: "ad-hoc JWT decoding becomes a two-step: header/payload
//! decode for shape detection, signature verification delegated to the
//! Cloud Agent"). This core never verifies a VC/VP signature itself.

use crate::classification::Clearance;
use crate::error::BrokerError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub struct VpProof {
    pub challenge: String,
    pub domain: String,
}

pub fn decode_jwt_payload(jwt: &str) -> Result<Value, BrokerError> {
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() != 3 {
        return Err(BrokerError::InputInvalid("malformed JWT".into()));
    }
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| BrokerError::InputInvalid("JWT payload is not valid base64url".into()))?;
    serde_json::from_slice(&payload_bytes)
        .map_err(|_| BrokerError::InputInvalid("JWT payload is not valid JSON".into()))
}

pub fn extract_vp_proof(vp_payload: &Value) -> Result<VpProof, BrokerError> {
    let proof = vp_payload
        .pointer("/vp/proof")
        .ok_or_else(|| BrokerError::InputInvalid("VP is missing proof".into()))?;
    let challenge = proof
        .get("challenge")
        .and_then(Value::as_str)
        .ok_or_else(|| BrokerError::InputInvalid("VP proof is missing challenge".into()))?
        .to_string();
    let domain = proof
        .get("domain")
        .and_then(Value::as_str)
        .ok_or_else(|| BrokerError::InputInvalid("VP proof is missing domain".into()))?
        .to_string();
    Ok(VpProof { challenge, domain })
}

pub fn extract_credential_jwts(vp_payload: &Value) -> Vec<String> {
    vp_payload
        .pointer("/vp/verifiableCredential")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn credential_subject(vc_payload: &Value) -> &Value {
    static NULL: Value = Value::Null;
    vc_payload
        .pointer("/vc/credentialSubject")
        .or_else(|| vc_payload.get("credentialSubject"))
        .unwrap_or(&NULL)
}

fn issuer(vc_payload: &Value) -> Option<String> {
    vc_payload
        .get("iss")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub enum CredentialClaim {
    EmployeeRole {
        issuer: String,
        subject_did: String,
        role: String,
        department: String,
    },
    CisTraining {
        issuer: String,
        subject_did: String,
        training_year: i64,
        certificate_number: String,
        expiry_date: DateTime<Utc>,
    },
    SecurityClearance {
        issuer: String,
        subject_did: String,
        clearance_level: Clearance,
    },
    Unrecognized,
}

/// Decodes one VC JWT and classifies it by the shape of its
/// `credentialSubject` (spec §4.10): `role`+`department` is EmployeeRole,
/// `trainingYear`+`certificateNumber` is CISTraining, `clearanceLevel` is
/// SecurityClearance.
pub fn classify_credential(vc_jwt: &str) -> Result<CredentialClaim, BrokerError> {
    let payload = decode_jwt_payload(vc_jwt)?;
    let issuer = issuer(&payload).ok_or_else(|| BrokerError::InputInvalid("VC is missing iss".into()))?;
    let subject_did = payload
        .get("sub")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let subject = credential_subject(&payload);

    if let (Some(role), Some(department)) = (
        subject.get("role").and_then(Value::as_str),
        subject.get("department").and_then(Value::as_str),
    ) {
        return Ok(CredentialClaim::EmployeeRole {
            issuer,
            subject_did,
            role: role.to_string(),
            department: department.to_string(),
        });
    }

    if let (Some(training_year), Some(certificate_number)) = (
        subject.get("trainingYear").and_then(Value::as_i64),
        subject.get("certificateNumber").and_then(Value::as_str),
    ) {
        let expiry_date = subject
            .get("expiryDate")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| BrokerError::InputInvalid("CISTraining is missing expiryDate".into()))?;
        let subject_did = subject
            .get("prismDid")
            .and_then(Value::as_str)
            .unwrap_or(&subject_did)
            .to_string();
        return Ok(CredentialClaim::CisTraining {
            issuer,
            subject_did,
            training_year,
            certificate_number: certificate_number.to_string(),
            expiry_date,
        });
    }

    if let Some(level) = subject.get("clearanceLevel").and_then(Value::as_str) {
        let clearance_level = Clearance::from_label(level)
            .ok_or_else(|| BrokerError::InputInvalid(format!("unknown clearance level {level}")))?;
        let subject_did = subject
            .get("prismDid")
            .and_then(Value::as_str)
            .unwrap_or(&subject_did)
            .to_string();
        return Ok(CredentialClaim::SecurityClearance {
            issuer,
            subject_did,
            clearance_level,
        });
    }

    Ok(CredentialClaim::Unrecognized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn fake_jwt(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn classifies_employee_role() {
        let vc = fake_jwt(&serde_json::json!({
            "iss": "did:prism:ACME",
            "sub": "did:prism:employee-1",
            "vc": { "credentialSubject": { "role": "Engineer", "department": "IT" } }
        }));
        let claim = classify_credential(&vc).unwrap();
        assert!(matches!(claim, CredentialClaim::EmployeeRole { role, .. } if role == "Engineer"));
    }

    #[test]
    fn classifies_security_clearance() {
        let vc = fake_jwt(&serde_json::json!({
            "iss": "did:prism:ACME",
            "sub": "did:prism:employee-1",
            "credentialSubject": { "clearanceLevel": "TOP-SECRET", "prismDid": "did:prism:employee-1" }
        }));
        let claim = classify_credential(&vc).unwrap();
        assert!(matches!(
            claim,
            CredentialClaim::SecurityClearance { clearance_level: Clearance::TopSecret, .. }
        ));
    }

    #[test]
    fn extracts_proof_challenge_and_domain() {
        let vp_payload = serde_json::json!({
            "vp": { "proof": { "challenge": "abc123", "domain": "employee-portal.techcorp.com" } }
        });
        let proof = extract_vp_proof(&vp_payload).unwrap();
        assert_eq!(proof.challenge, "abc123");
        assert_eq!(proof.domain, "employee-portal.techcorp.com");
    }
}
