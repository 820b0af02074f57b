//! Cloud-Agent Client (C1): a thin JSON RPC facade over the two external
//! Cloud Agents (tenant, enterprise) this core never runs itself.

use crate::error::BrokerError;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Escapes everything outside `[A-Za-z0-9]`, which is more conservative than
/// strictly necessary for a query string but keeps the encoding trivial to
/// reason about for schema names/versions, which are short identifiers.
const QUERY_COMPONENT: &AsciiSet = NON_ALPHANUMERIC;

#[derive(Debug, Clone)]
pub struct CloudAgentClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    label: &'static str,
}

impl CloudAgentClient {
    pub fn tenant(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::new(base_url, api_key, "tenant")
    }

    pub fn enterprise(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::new(base_url, api_key, "enterprise")
    }

    fn new(base_url: impl Into<String>, api_key: impl Into<String>, label: &'static str) -> Self {
        CloudAgentClient {
            base_url: base_url.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
            label,
        }
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, BrokerError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(agent = self.label, %path, "cloud agent call");

        let mut req = self
            .http
            .request(method, &url)
            .header("X-API-Key", &self.api_key);
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await.map_err(|e| BrokerError::UpstreamError {
            status: 0,
            detail: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(agent = self.label, %path, %status, "cloud agent call failed");
            return Err(BrokerError::UpstreamError {
                status: status.as_u16(),
                detail,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::UpstreamError {
                status: status.as_u16(),
                detail: format!("decoding response: {e}"),
            })
    }

    /// Onboarding (C12) step 1: a fresh wallet for a new employee's tenant agent.
    pub async fn create_wallet(&self, name: &str) -> Result<WalletRecord, BrokerError> {
        self.call(
            reqwest::Method::POST,
            "/wallets",
            Some(&serde_json::json!({ "name": name })),
        )
        .await
    }

    /// Onboarding (C12) step 2: the entity record backing the wallet's keys.
    pub async fn create_entity(&self, name: &str, wallet_id: &str) -> Result<EntityRecord, BrokerError> {
        self.call(
            reqwest::Method::POST,
            "/entities",
            Some(&serde_json::json!({ "name": name, "walletId": wallet_id })),
        )
        .await
    }

    pub async fn get_did_publication_status(&self, operation_id: &str) -> Result<PublicationStatus, BrokerError> {
        self.call(
            reqwest::Method::GET,
            &format!("/did-registrar/publications/{operation_id}"),
            None,
        )
        .await
    }

    /// Onboarding (C12) step 8: the employee's tenant wallet accepts an
    /// invitation produced by the enterprise agent.
    pub async fn accept_invitation(&self, invitation: &Value) -> Result<ConnectionRecord, BrokerError> {
        self.call(
            reqwest::Method::POST,
            "/connection-invitations",
            Some(&serde_json::json!({ "invitation": invitation })),
        )
        .await
    }

    pub async fn create_did(&self, wallet: &str, template: &str) -> Result<CreateDidResult, BrokerError> {
        self.call(
            reqwest::Method::POST,
            "/wallets/did",
            Some(&serde_json::json!({ "wallet": wallet, "template": template })),
        )
        .await
    }

    pub async fn publish_did(&self, long_form_did: &str) -> Result<PublicationStatus, BrokerError> {
        self.call(
            reqwest::Method::POST,
            &format!("/did-registrar/publications/{long_form_did}"),
            None,
        )
        .await
    }

    pub async fn create_connection(
        &self,
        label: &str,
        goal: Option<&str>,
    ) -> Result<ConnectionRecord, BrokerError> {
        self.call(
            reqwest::Method::POST,
            "/connections",
            Some(&serde_json::json!({ "label": label, "goal": goal })),
        )
        .await
    }

    pub async fn get_connection(&self, connection_id: &str) -> Result<ConnectionRecord, BrokerError> {
        self.call(
            reqwest::Method::GET,
            &format!("/connections/{connection_id}"),
            None,
        )
        .await
    }

    pub async fn list_connections(&self) -> Result<Vec<ConnectionRecord>, BrokerError> {
        self.call(reqwest::Method::GET, "/connections", None).await
    }

    /// `403 InvalidStateForOperation` is recoverable by the caller (C7 falls
    /// back to soft-delete); every other non-2xx status propagates.
    pub async fn delete_connection(&self, connection_id: &str) -> Result<(), BrokerError> {
        match self
            .call::<Value>(
                reqwest::Method::DELETE,
                &format!("/connections/{connection_id}"),
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(BrokerError::UpstreamError { status: 403, .. }) => Err(BrokerError::Conflict(
                "InvalidStateForOperation".to_string(),
            )),
            Err(other) => Err(other),
        }
    }

    pub async fn create_proof_request(
        &self,
        connection_id: &str,
        challenge: &str,
        domain: &str,
        goal: &str,
        credential_format: &str,
    ) -> Result<ProofRequestRecord, BrokerError> {
        self.call(
            reqwest::Method::POST,
            "/present-proof/presentations",
            Some(&serde_json::json!({
                "connectionId": connection_id,
                "options": { "challenge": challenge, "domain": domain },
                "goalCode": goal,
                "credentialFormat": credential_format,
            })),
        )
        .await
    }

    pub async fn get_proof_request(&self, presentation_id: &str) -> Result<ProofRequestState, BrokerError> {
        self.call(
            reqwest::Method::GET,
            &format!("/present-proof/presentations/{presentation_id}"),
            None,
        )
        .await
    }

    pub async fn create_credential_offer(
        &self,
        offer: CredentialOfferInput,
    ) -> Result<CredentialOfferResult, BrokerError> {
        self.call(
            reqwest::Method::POST,
            "/issue-credentials/credential-offers",
            Some(&serde_json::to_value(&offer).map_err(|e| {
                BrokerError::Internal(format!("serializing credential offer: {e}"))
            })?),
        )
        .await
    }

    pub async fn get_credential_record(&self, record_id: &str) -> Result<CredentialRecord, BrokerError> {
        self.call(
            reqwest::Method::GET,
            &format!("/issue-credentials/records/{record_id}"),
            None,
        )
        .await
    }

    /// Idempotent: a `409` is resolved by looking the schema up rather than
    /// surfaced as a `Conflict` to the caller.
    pub async fn ensure_schema(
        &self,
        name: &str,
        version: &str,
        properties: &Value,
        issuer_did: &str,
    ) -> Result<String, BrokerError> {
        let result = self
            .call::<SchemaResult>(
                reqwest::Method::POST,
                "/schema-registry/schemas",
                Some(&serde_json::json!({
                    "name": name,
                    "version": version,
                    "properties": properties,
                    "author": issuer_did,
                })),
            )
            .await;

        match result {
            Ok(schema) => Ok(schema.guid),
            Err(BrokerError::UpstreamError { status: 409, .. }) => {
                let name = utf8_percent_encode(name, QUERY_COMPONENT);
                let version = utf8_percent_encode(version, QUERY_COMPONENT);
                let existing: SchemaResult = self
                    .call(
                        reqwest::Method::GET,
                        &format!("/schema-registry/schemas?name={name}&version={version}"),
                        None,
                    )
                    .await?;
                Ok(existing.guid)
            }
            Err(other) => Err(other),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WalletRecord {
    #[serde(rename = "walletId")]
    pub wallet_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EntityRecord {
    #[serde(rename = "entityId")]
    pub entity_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateDidResult {
    #[serde(rename = "longFormDid")]
    pub long_form_did: String,
    #[serde(rename = "operationId")]
    pub operation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PublicationStatus {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionRecord {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    pub invitation: Option<Value>,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct ProofRequestRecord {
    #[serde(rename = "presentationId")]
    pub presentation_id: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct ProofRequestState {
    pub state: String,
    #[serde(default)]
    pub data: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CredentialOfferInput {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    #[serde(rename = "schemaId", skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    #[serde(rename = "issuingDid")]
    pub issuing_did: String,
    #[serde(rename = "credentialFormat")]
    pub credential_format: String,
    pub claims: Value,
    #[serde(rename = "automaticIssuance")]
    pub automatic_issuance: bool,
}

#[derive(Debug, Deserialize)]
pub struct CredentialOfferResult {
    #[serde(rename = "recordId")]
    pub record_id: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct CredentialRecord {
    pub state: String,
    #[serde(default)]
    pub claims: Option<Value>,
    #[serde(default)]
    pub jwt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SchemaResult {
    guid: String,
}
