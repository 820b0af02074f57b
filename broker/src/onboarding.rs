//! Onboarding & Keying (C12): the one-time linear sequence that turns a new
//! hire into a DID-holding, DIDComm-connected, EmployeeRole-credentialed
//! wallet entry in the employee-connection-mapping table.
//!
//! Every step is attempted in order; the first failure aborts the whole
//! sequence and is reported with the step name attached so an operator can
//! tell which Cloud Agent call needs retrying.

use crate::cloud_agent::CloudAgentClient;
use crate::error::BrokerError;
use crate::registry::employee_map::{EmployeeConnection, EmployeeMappingStore};
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const PUBLICATION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const PUBLICATION_POLL_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_secs(1);
const CONNECTION_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const CREDENTIAL_POLL_INTERVAL: Duration = Duration::from_secs(1);
const CREDENTIAL_POLL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    WalletCreate,
    EntityCreate,
    ApiSecretGenerate,
    DidCreate,
    DidPublish,
    DidPublicationPoll,
    InvitationCreate,
    InvitationAccept,
    ConnectionPoll,
    CredentialOfferCreate,
    CredentialSentPoll,
    MappingPersist,
}

impl OnboardingStep {
    const ORDER: [OnboardingStep; 12] = [
        OnboardingStep::WalletCreate,
        OnboardingStep::EntityCreate,
        OnboardingStep::ApiSecretGenerate,
        OnboardingStep::DidCreate,
        OnboardingStep::DidPublish,
        OnboardingStep::DidPublicationPoll,
        OnboardingStep::InvitationCreate,
        OnboardingStep::InvitationAccept,
        OnboardingStep::ConnectionPoll,
        OnboardingStep::CredentialOfferCreate,
        OnboardingStep::CredentialSentPoll,
        OnboardingStep::MappingPersist,
    ];
}

#[derive(Debug, thiserror::Error)]
#[error("onboarding failed at step {step:?}: {source}")]
pub struct OnboardingError {
    pub step: OnboardingStep,
    #[source]
    pub source: BrokerError,
}

impl From<OnboardingError> for BrokerError {
    fn from(e: OnboardingError) -> Self {
        BrokerError::Internal(format!("{e}"))
    }
}

pub struct OnboardingInput {
    pub email: String,
    pub name: String,
    pub department: String,
    pub role: String,
}

pub struct OnboardingResult {
    pub employee_connection_id: String,
    pub wallet_id: String,
    pub long_form_did: String,
    pub api_secret: String,
    pub credential_record_id: String,
}

/// `{enterpriseAgentUrl, enterpriseAgentName, enterpriseAgentApiKey,
/// enterpriseAgentWalletId}`: the service-configuration credential offered to
/// a freshly onboarded employee so their wallet can find its way back.
#[derive(Debug, Serialize)]
pub struct ServiceConfiguration {
    #[serde(rename = "enterpriseAgentUrl")]
    pub enterprise_agent_url: String,
    #[serde(rename = "enterpriseAgentName")]
    pub enterprise_agent_name: String,
    #[serde(rename = "enterpriseAgentApiKey")]
    pub enterprise_agent_api_key: String,
    #[serde(rename = "enterpriseAgentWalletId")]
    pub enterprise_agent_wallet_id: String,
}

pub struct OnboardingCore {
    tenant_agent: Arc<CloudAgentClient>,
    enterprise_agent: Arc<CloudAgentClient>,
    enterprise_agent_url: String,
    enterprise_agent_wallet_id: String,
    employee_map: Arc<EmployeeMappingStore>,
}

impl OnboardingCore {
    pub fn new(
        tenant_agent: Arc<CloudAgentClient>,
        enterprise_agent: Arc<CloudAgentClient>,
        enterprise_agent_url: String,
        enterprise_agent_wallet_id: String,
        employee_map: Arc<EmployeeMappingStore>,
    ) -> Self {
        OnboardingCore {
            tenant_agent,
            enterprise_agent,
            enterprise_agent_url,
            enterprise_agent_wallet_id,
            employee_map,
        }
    }

    fn step_err(step: OnboardingStep) -> impl Fn(BrokerError) -> OnboardingError {
        move |source| OnboardingError { step, source }
    }

    pub async fn onboard(&self, input: OnboardingInput) -> Result<OnboardingResult, OnboardingError> {
        use OnboardingStep::*;

        let wallet = self
            .tenant_agent
            .create_wallet(&input.email)
            .await
            .map_err(Self::step_err(WalletCreate))?;

        let _entity = self
            .tenant_agent
            .create_entity(&input.name, &wallet.wallet_id)
            .await
            .map_err(Self::step_err(EntityCreate))?;

        let mut secret_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let api_secret = hex::encode(secret_bytes);

        let did = self
            .tenant_agent
            .create_did(&wallet.wallet_id, "prism")
            .await
            .map_err(Self::step_err(DidCreate))?;

        self.tenant_agent
            .publish_did(&did.long_form_did)
            .await
            .map_err(Self::step_err(DidPublish))?;

        poll_until(
            PUBLICATION_POLL_INTERVAL,
            PUBLICATION_POLL_TIMEOUT,
            || self.tenant_agent.get_did_publication_status(&did.operation_id),
            |status| status.status == "confirmed" || status.status == "published",
        )
        .await
        .map_err(Self::step_err(DidPublicationPoll))?;

        let enterprise_connection = self
            .enterprise_agent
            .create_connection(&input.email, Some("onboarding"))
            .await
            .map_err(Self::step_err(InvitationCreate))?;
        let invitation = enterprise_connection
            .invitation
            .clone()
            .ok_or_else(|| BrokerError::Internal("connection carried no invitation".into()))
            .map_err(Self::step_err(InvitationCreate))?;

        let tenant_connection = self
            .tenant_agent
            .accept_invitation(&invitation)
            .await
            .map_err(Self::step_err(InvitationAccept))?;

        poll_until(
            CONNECTION_POLL_INTERVAL,
            CONNECTION_POLL_TIMEOUT,
            || {
                self.enterprise_agent
                    .get_connection(&enterprise_connection.connection_id)
            },
            |conn| conn.state == "ConnectionResponseSent" || conn.state == "ConnectionCompleted",
        )
        .await
        .map_err(Self::step_err(ConnectionPoll))?;
        poll_until(
            CONNECTION_POLL_INTERVAL,
            CONNECTION_POLL_TIMEOUT,
            || self.tenant_agent.get_connection(&tenant_connection.connection_id),
            |conn| conn.state == "ConnectionResponseReceived" || conn.state == "ConnectionCompleted",
        )
        .await
        .map_err(Self::step_err(ConnectionPoll))?;

        let offer = crate::cloud_agent::CredentialOfferInput {
            connection_id: enterprise_connection.connection_id.clone(),
            schema_id: None,
            issuing_did: did.long_form_did.clone(),
            credential_format: "JWT".to_string(),
            claims: serde_json::json!({
                "role": input.role,
                "department": input.department,
            }),
            automatic_issuance: true,
        };
        let offer_result = self
            .enterprise_agent
            .create_credential_offer(offer)
            .await
            .map_err(Self::step_err(CredentialOfferCreate))?;

        poll_until(
            CREDENTIAL_POLL_INTERVAL,
            CREDENTIAL_POLL_TIMEOUT,
            || self.enterprise_agent.get_credential_record(&offer_result.record_id),
            |record| record.state == "CredentialSent",
        )
        .await
        .map_err(Self::step_err(CredentialSentPoll))?;

        self.employee_map
            .insert(
                &input.email,
                EmployeeConnection {
                    connection_id: enterprise_connection.connection_id.clone(),
                    email: input.email.clone(),
                    name: input.name,
                    department: input.department,
                    personal_wallet_connection_id: None,
                },
            )
            .map_err(Self::step_err(MappingPersist))?;

        Ok(OnboardingResult {
            employee_connection_id: enterprise_connection.connection_id,
            wallet_id: wallet.wallet_id,
            long_form_did: did.long_form_did,
            api_secret,
            credential_record_id: offer_result.record_id,
        })
    }

    pub fn service_configuration(&self, wallet_id: &str) -> ServiceConfiguration {
        ServiceConfiguration {
            enterprise_agent_url: self.enterprise_agent_url.clone(),
            enterprise_agent_name: "TechCorp Enterprise Agent".to_string(),
            enterprise_agent_api_key: wallet_id.to_string(),
            enterprise_agent_wallet_id: self.enterprise_agent_wallet_id.clone(),
        }
    }
}

async fn poll_until<T, F, Fut, P>(
    interval: Duration,
    timeout: Duration,
    mut fetch: F,
    done: P,
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BrokerError>>,
    P: Fn(&T) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let value = fetch().await?;
        if done(&value) {
            return Ok(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BrokerError::UpstreamError {
                status: 0,
                detail: "timed out waiting for upstream state".to_string(),
            });
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_order_covers_every_variant() {
        assert_eq!(OnboardingStep::ORDER.len(), 12);
    }

    #[test]
    fn onboarding_error_carries_step() {
        let err = OnboardingError {
            step: OnboardingStep::DidPublish,
            source: BrokerError::Internal("boom".into()),
        };
        assert_eq!(err.step, OnboardingStep::DidPublish);
    }
}
