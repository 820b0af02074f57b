//! Section-Level Download Pipeline (C9): authorize, project, prepare,
//! complete, pickup. The SSI-staged shape (prepare/complete/pickup) is the
//! specified default; `direct_download` is the legacy single-call shape.

use crate::blob_store::BlobStore;
use crate::classification::Clearance;
use crate::cloud_agent::{CloudAgentClient, CredentialOfferInput};
use crate::ephemeral::{CreateEphemeralInput, EphemeralStore, PickupRecord, RedactedSectionRef};
use crate::error::BrokerError;
use crate::registry::{DocumentRecord, DocumentRegistry};
use crate::section::crypto::{self, Package, ProjectedSection};
use crate::section::redact;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const HTML_CONTENT_TYPE: &str = "text/html";
const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const PREPARED_TTL_MINUTES: i64 = 10;

/// Joins a relative endpoint path onto the configured base URL via `url::Url`
/// rather than raw `format!` concatenation, so a misconfigured `base_url`
/// (missing scheme, stray query string) fails fast instead of silently
/// producing a broken pickup URL handed back to a wallet.
fn join_endpoint(base_url: &str, relative: &str) -> Result<String, BrokerError> {
    let mut base = base_url.trim_end_matches('/').to_string();
    base.push('/');
    let base = url::Url::parse(&base)
        .map_err(|e| BrokerError::Internal(format!("base_url is not a valid URL: {e}")))?;
    let joined = base
        .join(relative)
        .map_err(|e| BrokerError::Internal(format!("joining endpoint path: {e}")))?;
    Ok(joined.to_string())
}

pub struct Projection {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub record: DocumentRecord,
    pub redacted_section_ids: HashSet<String>,
}

struct PreparedDownload {
    redacted_bytes: Vec<u8>,
    content_type: String,
    record: DocumentRecord,
    redacted_section_ids: HashSet<String>,
    issuer_did: String,
    expires_at: DateTime<Utc>,
}

pub struct PrepareResult {
    pub pickup_id: String,
    pub service_endpoint_url: String,
}

pub struct CompleteResult {
    pub ephemeral_did: String,
    pub ephemeral_service_endpoint: String,
    pub title: String,
    pub classification: Clearance,
    pub clearance_level_granted: Clearance,
    pub section_summary: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub views_allowed: i64,
    pub content_hash: String,
    pub credential_offer_warning: Option<String>,
}

pub struct DownloadPipeline {
    registry: Arc<DocumentRegistry>,
    blobs: Arc<BlobStore>,
    ephemeral: Arc<EphemeralStore>,
    cloud_agent: Arc<CloudAgentClient>,
    company_secret: Vec<u8>,
    base_url: String,
    prepared: Mutex<HashMap<String, PreparedDownload>>,
}

impl DownloadPipeline {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        blobs: Arc<BlobStore>,
        ephemeral: Arc<EphemeralStore>,
        cloud_agent: Arc<CloudAgentClient>,
        company_secret: Vec<u8>,
        base_url: String,
    ) -> Self {
        DownloadPipeline {
            registry,
            blobs,
            ephemeral,
            cloud_agent,
            company_secret,
            base_url,
            prepared: Mutex::new(HashMap::new()),
        }
    }

    fn fetch_package(&self, record: &DocumentRecord) -> Result<Package, BrokerError> {
        let bytes = self.blobs.get(&record.storage.file_id)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BrokerError::Internal(format!("decoding stored package: {e}")))
    }

    /// Step 1 (Authorize) + step 2 (Project).
    fn authorize_and_project(
        &self,
        document_id: &str,
        issuer_did: &str,
        caller_clearance: Clearance,
    ) -> Result<Projection, BrokerError> {
        let record = self
            .registry
            .authorize(document_id, issuer_did, caller_clearance)?;
        let package = self.fetch_package(&record)?;

        let redacted_section_ids: HashSet<String> = package
            .encrypted_sections
            .iter()
            .filter(|s| s.clearance > caller_clearance)
            .map(|s| s.section_id.clone())
            .collect();

        if let Some(original_file_id) = &record.storage.original_file_id {
            let original_bytes = self.blobs.get(original_file_id)?;
            let redacted = redact::redact_docx(&original_bytes, &redacted_section_ids)?;
            return Ok(Projection {
                bytes: redacted,
                content_type: DOCX_CONTENT_TYPE.to_string(),
                record,
                redacted_section_ids,
            });
        }

        let projected = crypto::decrypt_for_user(&package, caller_clearance, &self.company_secret)?;
        let html = render(&package, &projected, caller_clearance);
        Ok(Projection {
            bytes: html.into_bytes(),
            content_type: HTML_CONTENT_TYPE.to_string(),
            record,
            redacted_section_ids,
        })
    }

    /// Direct (legacy, non-staged) form: projection bytes returned in-band.
    pub fn direct_download(
        &self,
        document_id: &str,
        issuer_did: &str,
        caller_clearance: Clearance,
    ) -> Result<(Vec<u8>, String), BrokerError> {
        let projection = self.authorize_and_project(document_id, issuer_did, caller_clearance)?;
        Ok((projection.bytes, projection.content_type))
    }

    /// Step 3 (Prepare): stash the projection and hand back a pickup URL shell.
    pub fn prepare_download(
        &self,
        document_id: &str,
        issuer_did: &str,
        caller_clearance: Clearance,
    ) -> Result<PrepareResult, BrokerError> {
        let projection = self.authorize_and_project(document_id, issuer_did, caller_clearance)?;
        let pickup_id = uuid::Uuid::new_v4().to_string();
        let prepared = PreparedDownload {
            redacted_bytes: projection.bytes,
            content_type: projection.content_type,
            record: projection.record,
            redacted_section_ids: projection.redacted_section_ids,
            issuer_did: issuer_did.to_string(),
            expires_at: Utc::now() + Duration::minutes(PREPARED_TTL_MINUTES),
        };
        self.prepared.lock().insert(pickup_id.clone(), prepared);

        let service_endpoint_url = join_endpoint(
            &self.base_url,
            &format!("ephemeral-documents/content/{pickup_id}"),
        )?;
        Ok(PrepareResult {
            service_endpoint_url,
            pickup_id,
        })
    }

    /// Step 4 (Complete): seal the prepared bytes to the wallet's key, stage
    /// the pickup record, and attempt a `DocumentCopy` credential offer.
    pub async fn complete_download(
        &self,
        pickup_id: &str,
        wallet_did: &str,
        wallet_connection_id: Option<&str>,
        wallet_public_key_b64: &str,
        clearance_level_granted: Clearance,
        ttl_ms: i64,
        views_allowed: i64,
    ) -> Result<CompleteResult, BrokerError> {
        let prepared = {
            let mut prepared = self.prepared.lock();
            prepared
                .remove(pickup_id)
                .ok_or_else(|| BrokerError::NotFound(format!("prepared download {pickup_id}")))?
        };

        if Utc::now() > prepared.expires_at {
            return Err(BrokerError::Gone(format!("prepared download {pickup_id}")));
        }

        let wallet_public_key = BASE64
            .decode(wallet_public_key_b64)
            .map_err(|_| BrokerError::InputInvalid("x25519PublicKey must be base64".into()))?;

        let redacted_sections: Vec<RedactedSectionRef> = prepared
            .redacted_section_ids
            .iter()
            .map(|id| RedactedSectionRef {
                section_id: id.clone(),
                clearance: prepared.record.overall_classification,
            })
            .collect();

        let (ephemeral_meta, server_secret) = self.ephemeral.create_ephemeral_did(CreateEphemeralInput {
            original_document_id: prepared.record.document_id.clone(),
            recipient_did: wallet_did.to_string(),
            clearance_level: clearance_level_granted,
            redacted_sections,
            ttl_ms,
            views_allowed,
            issuer_did: prepared.issuer_did.clone(),
        })?;

        let aad = format!("{}||{}", ephemeral_meta.ephemeral_did, prepared.record.document_id);
        let (ciphertext, nonce, content_hash) = crate::ephemeral::seal_envelope(
            &server_secret,
            &wallet_public_key,
            &prepared.redacted_bytes,
            aad.as_bytes(),
        )?;

        self.ephemeral.stage(
            pickup_id.to_string(),
            PickupRecord {
                encrypted_content: ciphertext,
                nonce,
                server_public_key: ephemeral_meta.public_key.clone(),
                wallet_did: wallet_did.to_string(),
                document_id: prepared.record.document_id.clone(),
                ephemeral_did: ephemeral_meta.ephemeral_did.clone(),
                content_type: prepared.content_type,
                expires_at: ephemeral_meta.expires_at,
                views_remaining: views_allowed,
            },
        );

        let ephemeral_service_endpoint = join_endpoint(
            &self.base_url,
            &format!("ephemeral-documents/content/{pickup_id}"),
        )?;

        let section_summary = serde_json::json!({
            "redactedSectionCount": prepared.redacted_section_ids.len(),
            "perLevelCounts": prepared.record.metadata.get("perLevelCounts").cloned().unwrap_or(serde_json::json!({})),
        });

        let credential_offer_warning = match wallet_connection_id {
            Some(connection_id) => {
                let offer = CredentialOfferInput {
                    connection_id: connection_id.to_string(),
                    schema_id: None,
                    issuing_did: prepared.issuer_did.clone(),
                    credential_format: "JWT".to_string(),
                    claims: serde_json::json!({
                        "ephemeralDID": ephemeral_meta.ephemeral_did,
                        "ephemeralServiceEndpoint": ephemeral_service_endpoint,
                        "title": prepared.record.title,
                        "classification": prepared.record.overall_classification,
                        "clearanceLevelGranted": clearance_level_granted,
                        "sectionSummary": section_summary,
                        "accessRights": {
                            "expiresAt": ephemeral_meta.expires_at,
                            "viewsAllowed": views_allowed,
                        },
                        "contentHash": content_hash,
                    }),
                    automatic_issuance: true,
                };
                match self.cloud_agent.create_credential_offer(offer).await {
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(error = %e, "DocumentCopy credential offer failed; document remains accessible via the service endpoint");
                        Some(format!("credential offer failed: {e}"))
                    }
                }
            }
            None => Some("no DIDComm connection; document remains accessible via the service endpoint".to_string()),
        };

        Ok(CompleteResult {
            ephemeral_did: ephemeral_meta.ephemeral_did,
            ephemeral_service_endpoint,
            title: prepared.record.title,
            classification: prepared.record.overall_classification,
            clearance_level_granted,
            section_summary,
            expires_at: ephemeral_meta.expires_at,
            views_allowed,
            content_hash,
            credential_offer_warning,
        })
    }

    /// Step 5 (Pickup): delegate straight to the ephemeral store's expiry rules.
    pub fn pickup(&self, pickup_id: &str) -> Result<PickupRecord, BrokerError> {
        self.ephemeral.fetch(pickup_id)
    }

    pub fn sweep_expired_prepared(&self) -> usize {
        let now = Utc::now();
        let mut prepared = self.prepared.lock();
        let before = prepared.len();
        prepared.retain(|_, p| p.expires_at > now);
        before - prepared.len()
    }
}

fn render(package: &Package, projected: &[ProjectedSection], user_clearance: Clearance) -> String {
    redact::render_html(&package.metadata.title, projected, user_clearance)
}
