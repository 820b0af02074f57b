//! HTTP Surface & Wiring (C17): the `axum` router binding every core to its
//! routes, plus the shared `AppState` each handler reads from.
//!
//! Handlers stay thin: decode the request, call into the relevant core, map
//! the result to a response. Every fallible path returns `BrokerError`, which
//! already knows how to render itself (see `error.rs`).

use crate::blob_store::BlobStore;
use crate::classification::Clearance;
use crate::cloud_agent::CloudAgentClient;
use crate::download::DownloadPipeline;
use crate::ephemeral::EphemeralStore;
use crate::error::{BrokerError, BrokerResult};
use crate::registry::employee_map::EmployeeMappingStore;
use crate::registry::soft_delete::SoftDeleteStore;
use crate::registry::{DocumentRecord, DocumentRegistry, StorageRef};
use crate::resource_auth::ResourceAuthCore;
use crate::section::{self, ParsedDocument};
use crate::session::{Session, SessionCore};
use axum::extract::{Multipart, Path as AxPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub registry: Arc<DocumentRegistry>,
    pub blobs: Arc<BlobStore>,
    pub ephemeral: Arc<EphemeralStore>,
    pub session: Arc<SessionCore>,
    pub download: Arc<DownloadPipeline>,
    pub resource_auth: Arc<ResourceAuthCore>,
    pub employee_map: Arc<EmployeeMappingStore>,
    pub soft_delete: Arc<SoftDeleteStore>,
    pub tenant_agent: Arc<CloudAgentClient>,
    pub enterprise_agent: Arc<CloudAgentClient>,
    pub company_secret: Vec<u8>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/initiate", post(auth_initiate))
        .route("/auth/status/{presentationId}", get(auth_status))
        .route("/auth/verify", post(auth_verify))
        .route("/profile", get(profile))
        .route("/auth/logout", post(auth_logout))
        .route("/documents/discover", get(documents_discover))
        .route("/documents/register", post(documents_register))
        .route(
            "/classified-documents/upload",
            post(classified_documents_upload),
        )
        .route(
            "/classified-documents/download",
            post(classified_documents_download),
        )
        .route(
            "/documents/prepare-download/{documentDID}",
            post(documents_prepare_download),
        )
        .route(
            "/documents/complete-download/{storageId}",
            post(documents_complete_download),
        )
        .route(
            "/ephemeral-documents/content/{pickupId}",
            get(ephemeral_documents_content),
        )
        .route("/resource/authorize/initiate", post(resource_authorize_initiate))
        .route(
            "/resource/authorize/status/{sessionId}",
            get(resource_authorize_status),
        )
        .route(
            "/resource/authorize/request-clearance/{sessionId}",
            post(resource_authorize_request_clearance),
        )
        .route(
            "/resource/authorize/verify/{sessionId}",
            post(resource_authorize_verify),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn session_token(headers: &HeaderMap) -> BrokerResult<&str> {
    headers
        .get("x-session-token")
        .or_else(|| headers.get("x-session-id"))
        .and_then(|v| v.to_str().ok())
        .ok_or(BrokerError::Unauthorized)
}

fn require_session(state: &AppState, headers: &HeaderMap) -> BrokerResult<Session> {
    state.session.lookup(session_token(headers)?)
}

// ---- auth ----------------------------------------------------------------

#[derive(Deserialize)]
struct InitiateLoginRequest {
    identifier: String,
}

async fn auth_initiate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitiateLoginRequest>,
) -> BrokerResult<Json<Value>> {
    let result = state.session.initiate(&req.identifier).await?;
    Ok(Json(json!({ "presentationId": result.presentation_id })))
}

async fn auth_status(
    State(state): State<Arc<AppState>>,
    AxPath(presentation_id): AxPath<String>,
) -> BrokerResult<Json<Value>> {
    let status = state.session.status(&presentation_id).await?;
    Ok(Json(json!({ "status": status })))
}

#[derive(Deserialize)]
struct VerifyLoginRequest {
    #[serde(rename = "presentationId")]
    presentation_id: String,
}

async fn auth_verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyLoginRequest>,
) -> BrokerResult<Json<Value>> {
    let result = state.session.verify(&req.presentation_id).await?;
    Ok(Json(json!({
        "sessionToken": result.session_token,
        "employee": result.employee,
        "training": result.training,
    })))
}

async fn profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> BrokerResult<Json<Session>> {
    Ok(Json(require_session(&state, &headers)?))
}

async fn auth_logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> BrokerResult<StatusCode> {
    let token = session_token(&headers)?;
    state.session.logout(token);
    Ok(StatusCode::NO_CONTENT)
}

// ---- documents -------------------------------------------------------------

#[derive(Deserialize)]
struct DiscoverQuery {
    #[serde(rename = "issuerDid")]
    issuer_did: String,
}

async fn documents_discover(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DiscoverQuery>,
) -> BrokerResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let results = state.registry.discover(&query.issuer_did, session.clearance);
    Ok(Json(json!({
        "documents": results,
        "clearanceLevel": session.clearance,
    })))
}

struct IngestResult {
    record: DocumentRecord,
    section_count: usize,
    clearance_level_stats: BTreeMap<String, usize>,
}

fn ingest_document(
    state: &AppState,
    title: String,
    releasable_to: Vec<String>,
    bytes: Vec<u8>,
    is_docx: bool,
    metadata: Value,
) -> BrokerResult<IngestResult> {
    let parsed: ParsedDocument = if is_docx {
        section::docx::parse(&bytes, &title)?
    } else {
        let text = String::from_utf8(bytes)
            .map_err(|_| BrokerError::InputInvalid("document body is not valid UTF-8".into()))?;
        section::html::parse(&text, &title)?
    };
    let section_count = parsed.sections.len();
    let clearance_level_stats = parsed.metadata.per_level_counts.clone();

    let document_id = uuid::Uuid::new_v4().to_string();
    let package = section::crypto::encrypt(&parsed, &document_id, &state.company_secret)?;
    let package_bytes = serde_json::to_vec(&package)
        .map_err(|e| BrokerError::Internal(format!("serializing package: {e}")))?;
    let put = state.blobs.put(&package_bytes, parsed.metadata.overall_classification)?;

    let original_file_id = match &parsed.original_bytes {
        Some(original) => Some(state.blobs.put(original, parsed.metadata.overall_classification)?.file_id),
        None => None,
    };

    let releasable_to: HashSet<String> = releasable_to.into_iter().collect();
    let record = DocumentRecord {
        document_id,
        title: parsed.metadata.title.clone(),
        overall_classification: parsed.metadata.overall_classification,
        releasable_to,
        bloom_filter: crate::registry::bloom::BloomFilter::new(),
        encrypted_metadata: HashMap::new(),
        content_encryption_key: package.document_package_id.clone(),
        storage: StorageRef {
            file_id: put.file_id,
            original_file_id,
        },
        metadata,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    let record = state.registry.register(record)?;
    Ok(IngestResult {
        record,
        section_count,
        clearance_level_stats,
    })
}

#[derive(Deserialize)]
struct RegisterDocumentRequest {
    title: String,
    #[serde(rename = "releasableTo")]
    releasable_to: Vec<String>,
    /// Base64-encoded document body (HTML markup, or a DOCX container).
    content: String,
    #[serde(rename = "isDocx", default)]
    is_docx: bool,
    #[serde(default)]
    metadata: Value,
}

/// Response shape for `/documents/register` (spec §6: `{documentDID, …}`).
/// Carries the public record fields only — never the storage file ids or
/// the content-encryption key handle.
#[derive(Serialize)]
struct RegisterResponse {
    #[serde(rename = "documentDID")]
    document_id: String,
    title: String,
    #[serde(rename = "overallClassification")]
    overall_classification: Clearance,
    #[serde(rename = "releasableTo")]
    releasable_to: Vec<String>,
    #[serde(rename = "createdAt")]
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<DocumentRecord> for RegisterResponse {
    fn from(record: DocumentRecord) -> Self {
        RegisterResponse {
            document_id: record.document_id,
            title: record.title,
            overall_classification: record.overall_classification,
            releasable_to: record.releasable_to.into_iter().collect(),
            created_at: record.created_at,
        }
    }
}

/// Response shape for `/classified-documents/upload` (spec §6).
#[derive(Serialize)]
struct UploadResponse {
    #[serde(rename = "documentDID")]
    document_id: String,
    #[serde(rename = "overallClassification")]
    overall_classification: Clearance,
    #[serde(rename = "sectionCount")]
    section_count: usize,
    #[serde(rename = "clearanceLevelStats")]
    clearance_level_stats: BTreeMap<String, usize>,
}

impl From<IngestResult> for UploadResponse {
    fn from(result: IngestResult) -> Self {
        UploadResponse {
            document_id: result.record.document_id,
            overall_classification: result.record.overall_classification,
            section_count: result.section_count,
            clearance_level_stats: result.clearance_level_stats,
        }
    }
}

async fn documents_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterDocumentRequest>,
) -> BrokerResult<Json<RegisterResponse>> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    let bytes = BASE64
        .decode(&req.content)
        .map_err(|_| BrokerError::InputInvalid("content must be base64".into()))?;
    let result = ingest_document(
        &state,
        req.title,
        req.releasable_to,
        bytes,
        req.is_docx,
        req.metadata,
    )?;
    Ok(Json(result.record.into()))
}

async fn classified_documents_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> BrokerResult<Json<UploadResponse>> {
    let mut title: Option<String> = None;
    let mut releasable_to: Vec<String> = Vec::new();
    let mut metadata: Value = json!({});
    let mut bytes: Option<Vec<u8>> = None;
    let mut is_docx = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BrokerError::InputInvalid(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "title" => {
                title = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| BrokerError::InputInvalid(e.to_string()))?,
                )
            }
            "releasableTo" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| BrokerError::InputInvalid(e.to_string()))?;
                releasable_to = text.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            }
            "metadata" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| BrokerError::InputInvalid(e.to_string()))?;
                metadata = serde_json::from_str(&text)
                    .map_err(|_| BrokerError::InputInvalid("metadata must be JSON".into()))?;
            }
            "file" => {
                is_docx = field
                    .file_name()
                    .map(|name| name.ends_with(".docx"))
                    .unwrap_or(false);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| BrokerError::InputInvalid(e.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let title = title.ok_or_else(|| BrokerError::InputInvalid("missing title field".into()))?;
    if releasable_to.is_empty() {
        return Err(BrokerError::InputInvalid("releasableTo must not be empty".into()));
    }
    let bytes = bytes.ok_or_else(|| BrokerError::InputInvalid("missing file field".into()))?;

    let result = ingest_document(&state, title, releasable_to, bytes, is_docx, metadata)?;
    Ok(Json(result.into()))
}

#[derive(Deserialize)]
struct DownloadRequest {
    #[serde(rename = "documentId")]
    document_id: String,
    #[serde(rename = "issuerDid")]
    issuer_did: String,
}

async fn classified_documents_download(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DownloadRequest>,
) -> BrokerResult<Response> {
    let session = require_session(&state, &headers)?;
    let (bytes, content_type) =
        state
            .download
            .direct_download(&req.document_id, &req.issuer_did, session.clearance)?;
    Ok(([("content-type", content_type)], bytes).into_response())
}

#[derive(Deserialize)]
struct PrepareDownloadQuery {
    #[serde(rename = "issuerDid")]
    issuer_did: String,
}

async fn documents_prepare_download(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxPath(document_id): AxPath<String>,
    Query(query): Query<PrepareDownloadQuery>,
) -> BrokerResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let result =
        state
            .download
            .prepare_download(&document_id, &query.issuer_did, session.clearance)?;
    Ok(Json(json!({
        "pickupId": result.pickup_id,
        "serviceEndpointUrl": result.service_endpoint_url,
    })))
}

#[derive(Deserialize)]
struct CompleteDownloadRequest {
    #[serde(rename = "walletDid")]
    wallet_did: String,
    #[serde(rename = "walletConnectionId", default)]
    wallet_connection_id: Option<String>,
    #[serde(rename = "x25519PublicKey")]
    x25519_public_key: String,
    #[serde(rename = "ttlMs", default = "default_ttl_ms")]
    ttl_ms: i64,
    #[serde(rename = "viewsAllowed", default = "default_views_allowed")]
    views_allowed: i64,
}

fn default_ttl_ms() -> i64 {
    3_600_000
}

fn default_views_allowed() -> i64 {
    -1
}

async fn documents_complete_download(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxPath(pickup_id): AxPath<String>,
    Json(req): Json<CompleteDownloadRequest>,
) -> BrokerResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let result = state
        .download
        .complete_download(
            &pickup_id,
            &req.wallet_did,
            req.wallet_connection_id.as_deref(),
            &req.x25519_public_key,
            session.clearance,
            req.ttl_ms,
            req.views_allowed,
        )
        .await?;

    Ok(Json(json!({
        "ephemeralDid": result.ephemeral_did,
        "ephemeralServiceEndpoint": result.ephemeral_service_endpoint,
        "title": result.title,
        "classification": result.classification,
        "clearanceLevelGranted": result.clearance_level_granted,
        "sectionSummary": result.section_summary,
        "expiresAt": result.expires_at,
        "viewsAllowed": result.views_allowed,
        "contentHash": result.content_hash,
        "credentialOfferWarning": result.credential_offer_warning,
    })))
}

async fn ephemeral_documents_content(
    State(state): State<Arc<AppState>>,
    AxPath(pickup_id): AxPath<String>,
) -> BrokerResult<Json<Value>> {
    let record = state.download.pickup(&pickup_id)?;
    Ok(Json(json!({
        "encryptedContent": record.encrypted_content,
        "nonce": record.nonce,
        "serverPublicKey": record.server_public_key,
        "walletDid": record.wallet_did,
        "documentId": record.document_id,
        "ephemeralDid": record.ephemeral_did,
        "contentType": record.content_type,
        "expiresAt": record.expires_at,
        "viewsRemaining": record.views_remaining,
    })))
}

// ---- resource authorization ------------------------------------------------

#[derive(Deserialize)]
struct ResourceAuthorizeInitiateRequest {
    #[serde(rename = "resourceId")]
    resource_id: String,
    #[serde(rename = "employeeConnectionId")]
    employee_connection_id: String,
}

async fn resource_authorize_initiate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResourceAuthorizeInitiateRequest>,
) -> BrokerResult<Json<Value>> {
    let result = state
        .resource_auth
        .initiate(&req.resource_id, &req.employee_connection_id)
        .await?;
    Ok(Json(json!({
        "sessionId": result.session_id,
        "enterprisePresentationId": result.enterprise_presentation_id,
    })))
}

async fn resource_authorize_status(
    State(state): State<Arc<AppState>>,
    AxPath(session_id): AxPath<String>,
) -> BrokerResult<Json<Value>> {
    let result = state.resource_auth.status(&session_id).await?;
    Ok(Json(json!(result)))
}

#[derive(Deserialize)]
struct RequestClearanceRequest {
    #[serde(rename = "personalConnectionId")]
    personal_connection_id: String,
}

async fn resource_authorize_request_clearance(
    State(state): State<Arc<AppState>>,
    AxPath(session_id): AxPath<String>,
    Json(req): Json<RequestClearanceRequest>,
) -> BrokerResult<Json<Value>> {
    let presentation_id = state
        .resource_auth
        .request_clearance(&session_id, &req.personal_connection_id)
        .await?;
    Ok(Json(json!({ "personalPresentationId": presentation_id })))
}

async fn resource_authorize_verify(
    State(state): State<Arc<AppState>>,
    AxPath(session_id): AxPath<String>,
) -> BrokerResult<Json<Value>> {
    let result = state.resource_auth.verify(&session_id).await?;
    Ok(Json(json!(result)))
}
