//! Crate-level scenario tests (spec §8 S1/S3/S4/S5/S6) exercising the axum
//! router in-process via `tower::ServiceExt::oneshot`. There is no real Cloud
//! Agent to dial in these tests, so every scenario that needs one points its
//! `CloudAgentClient`s at a local `wiremock::MockServer` seeded with the exact
//! responses the scenario needs.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine;
use broker::blob_store::BlobStore;
use broker::classification::Clearance;
use broker::cloud_agent::CloudAgentClient;
use broker::download::DownloadPipeline;
use broker::ephemeral::EphemeralStore;
use broker::http::{router, AppState};
use broker::registry::employee_map::{EmployeeConnection, EmployeeMappingStore};
use broker::registry::soft_delete::SoftDeleteStore;
use broker::registry::DocumentRegistry;
use broker::resource_auth::{PolicyRow, PolicyTable, ResourceAuthCore};
use broker::session::SessionCore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ACCEPTED_ISSUER: &str = "did:prism:ACME";

fn fake_jwt(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    format!("{header}.{body}.signature")
}

fn employee_role_vc(subject_did: &str, role: &str, department: &str) -> String {
    fake_jwt(&json!({
        "iss": ACCEPTED_ISSUER,
        "sub": subject_did,
        "vc": { "credentialSubject": { "role": role, "department": department } }
    }))
}

fn clearance_vc(subject_did: &str, level: &str) -> String {
    fake_jwt(&json!({
        "iss": ACCEPTED_ISSUER,
        "sub": subject_did,
        "credentialSubject": { "clearanceLevel": level, "prismDid": subject_did }
    }))
}

fn vp_jwt(challenge: &str, domain: &str, credentials: Vec<String>) -> String {
    fake_jwt(&json!({
        "vp": {
            "proof": { "challenge": challenge, "domain": domain },
            "verifiableCredential": credentials,
        }
    }))
}

/// A full `AppState` over temp-directory persistence, wired to a wiremock
/// tenant/enterprise Cloud Agent pair. `state` stays reachable after `app` is
/// built so tests can seed stores (employee map, ephemeral pickups) directly,
/// the same way `main.rs` hands the same `Arc`s to every core.
struct Harness {
    app: axum::Router,
    state: Arc<AppState>,
    _dir: TempDir,
}

async fn harness(tenant_server: &MockServer, enterprise_server: &MockServer) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let signature_key = b"registry-signature-key".to_vec();
    let company_secret = b"company-section-secret".to_vec();

    let registry = Arc::new(
        DocumentRegistry::open(dir.path().join("registry.json"), signature_key.clone()).unwrap(),
    );
    let blobs = Arc::new(BlobStore::new(dir.path().join("blobs")).unwrap());
    let ephemeral = Arc::new(EphemeralStore::new());
    let employee_map = Arc::new(
        EmployeeMappingStore::open(dir.path().join("employee-map.json"), signature_key.clone())
            .unwrap(),
    );
    let soft_delete = Arc::new(
        SoftDeleteStore::open(dir.path().join("soft-deleted.json"), signature_key.clone()).unwrap(),
    );

    let tenant_agent = Arc::new(CloudAgentClient::tenant(tenant_server.uri(), "tenant-key"));
    let enterprise_agent = Arc::new(CloudAgentClient::enterprise(
        enterprise_server.uri(),
        "enterprise-key",
    ));

    let mut accepted_issuers = std::collections::HashSet::new();
    accepted_issuers.insert(ACCEPTED_ISSUER.to_string());

    let session = Arc::new(SessionCore::new(
        tenant_agent.clone(),
        employee_map.clone(),
        accepted_issuers,
    ));

    let download = Arc::new(DownloadPipeline::new(
        registry.clone(),
        blobs.clone(),
        ephemeral.clone(),
        enterprise_agent.clone(),
        company_secret.clone(),
        "https://broker.example.com".to_string(),
    ));

    let mut rows = HashMap::new();
    rows.insert(
        "infrastructure-plans".to_string(),
        PolicyRow {
            required_clearance: Clearance::TopSecret,
            required_role: "IT".to_string(),
        },
    );
    let resource_auth = Arc::new(ResourceAuthCore::new(enterprise_agent.clone(), PolicyTable::new(rows)));

    let state = Arc::new(AppState {
        registry,
        blobs,
        ephemeral,
        session,
        download,
        resource_auth,
        employee_map,
        soft_delete,
        tenant_agent,
        enterprise_agent,
        company_secret,
    });

    Harness {
        app: router(state.clone()),
        state,
        _dir: dir,
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn bytes_body(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

fn multipart_body(boundary: &str, title: &str, releasable_to: &str, html: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\n{title}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"releasableTo\"\r\n\r\n{releasable_to}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"briefing.html\"\r\nContent-Type: text/html\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(html.as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn post_json_auth(
    app: &axum::Router,
    uri: &str,
    token: &str,
    body: Value,
) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("x-session-token", token)
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get_auth(app: &axum::Router, uri: &str, token: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("x-session-token", token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Seeds the employee map and mounts the tenant-agent login flow, then drives
/// `/auth/initiate` + `/auth/verify` over HTTP and returns the session token.
async fn login(
    app: &axum::Router,
    state: &AppState,
    tenant_server: &MockServer,
    identifier: &str,
    connection_id: &str,
    role: &str,
    department: &str,
    clearance_label: &str,
) -> String {
    state
        .employee_map
        .insert(
            identifier,
            EmployeeConnection {
                connection_id: connection_id.to_string(),
                email: identifier.to_string(),
                name: "Test Employee".to_string(),
                department: department.to_string(),
                personal_wallet_connection_id: None,
            },
        )
        .unwrap();

    Mock::given(method("POST"))
        .and(path_regex("^/present-proof/presentations$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "presentationId": format!("pres-{connection_id}"),
            "state": "RequestSent",
        })))
        .mount(tenant_server)
        .await;

    let initiate = post_json(app, "/auth/initiate", json!({ "identifier": identifier })).await;
    assert_eq!(initiate.status(), StatusCode::OK);
    let initiate_body = json_body(initiate).await;
    let presentation_id = initiate_body["presentationId"].as_str().unwrap().to_string();

    let subject_did = format!("did:prism:{connection_id}");

    // The challenge SessionCore generated is internal; recover it from the
    // request body the broker sent to `create_proof_request` so the mocked
    // verified presentation can echo it back for the challenge-binding check.
    let requests = tenant_server.received_requests().await.unwrap();
    let create_request = requests
        .iter()
        .find(|r| r.url.path() == "/present-proof/presentations")
        .expect("broker must have called create_proof_request");
    let sent_body: Value = serde_json::from_slice(&create_request.body).unwrap();
    let challenge = sent_body["options"]["challenge"].as_str().unwrap().to_string();

    let vc = clearance_vc(&subject_did, clearance_label);
    let role_vc = employee_role_vc(&subject_did, role, department);
    let vp_payload = vp_jwt(&challenge, "employee-portal.techcorp.com", vec![role_vc, vc]);

    Mock::given(method("GET"))
        .and(path_regex(format!("^/present-proof/presentations/{presentation_id}$")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "PresentationVerified",
            "data": [vp_payload],
        })))
        .mount(tenant_server)
        .await;

    let verify = post_json(app, "/auth/verify", json!({ "presentationId": presentation_id })).await;
    assert_eq!(verify.status(), StatusCode::OK);
    let verify_body = json_body(verify).await;
    verify_body["sessionToken"].as_str().unwrap().to_string()
}

/// S1: register a document releasable only to one company, then discover it
/// under different issuer/clearance combinations via the HTTP surface.
#[tokio::test]
async fn s1_register_and_discover_filters_by_company_and_clearance() {
    let tenant_server = MockServer::start().await;
    let enterprise_server = MockServer::start().await;
    let harness = harness(&tenant_server, &enterprise_server).await;

    let register = post_json(
        &harness.app,
        "/documents/register",
        json!({
            "title": "Quarterly Report",
            "releasableTo": ["did:prism:ACME"],
            "content": BASE64.encode("<html><body><div data-clearance=\"CONFIDENTIAL\">Numbers</div></body></html>"),
        }),
    )
    .await;
    assert_eq!(register.status(), StatusCode::OK);

    let token = login(
        &harness.app,
        &harness.state,
        &tenant_server,
        "alice@acme.example",
        "conn-alice",
        "Engineer",
        "Engineering",
        "CONFIDENTIAL",
    )
    .await;

    let other_issuer = get_auth(
        &harness.app,
        "/documents/discover?issuerDid=did:prism:TECHCORP",
        &token,
    )
    .await;
    let other_issuer_body = json_body(other_issuer).await;
    assert!(other_issuer_body["documents"].as_array().unwrap().is_empty());

    let matched = get_auth(&harness.app, "/documents/discover?issuerDid=did:prism:ACME", &token).await;
    let matched_body = json_body(matched).await;
    assert_eq!(matched_body["documents"].as_array().unwrap().len(), 1);
    assert_eq!(matched_body["clearanceLevel"], "CONFIDENTIAL");
}

/// S3: upload an HTML document with three clearance-tagged sections, log in
/// as a CONFIDENTIAL employee, and download it directly — the projection
/// must contain the INTERNAL/CONFIDENTIAL sections verbatim and redact the
/// TOP-SECRET one, while the record's overall classification stays TOP-SECRET.
#[tokio::test]
async fn s3_section_projection_redacts_above_caller_clearance() {
    let tenant_server = MockServer::start().await;
    let enterprise_server = MockServer::start().await;
    let harness = harness(&tenant_server, &enterprise_server).await;

    let html = r#"<html><head><title>Quarterly Briefing</title></head><body>
        <div id="s1" data-clearance="INTERNAL">Welcome to the briefing.</div>
        <div id="s2" data-clearance="CONFIDENTIAL">Budget numbers.</div>
        <div id="s3" data-clearance="TOP-SECRET">Nuclear launch codes.</div>
    </body></html>"#;
    let boundary = "X-BOUNDARY-1";
    let body = multipart_body(boundary, "Quarterly Briefing", "did:prism:ACME", html);

    let upload_response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/classified-documents/upload")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(upload_response.status(), StatusCode::OK);
    let record = json_body(upload_response).await;
    let document_id = record["documentDID"].as_str().unwrap().to_string();
    assert_eq!(record["overallClassification"], "TOP-SECRET");
    assert_eq!(record["sectionCount"], 3);
    assert_eq!(record["clearanceLevelStats"]["CONFIDENTIAL"], 1);
    assert_eq!(record["clearanceLevelStats"]["TOP-SECRET"], 1);

    let token = login(
        &harness.app,
        &harness.state,
        &tenant_server,
        "alice@acme.example",
        "conn-alice",
        "Engineer",
        "Engineering",
        "CONFIDENTIAL",
    )
    .await;

    let download = post_json_auth(
        &harness.app,
        "/classified-documents/download",
        &token,
        json!({ "documentId": document_id, "issuerDid": "did:prism:ACME" }),
    )
    .await;
    assert_eq!(download.status(), StatusCode::OK);
    let html_out = String::from_utf8(bytes_body(download).await).unwrap();
    assert!(html_out.contains("Welcome to the briefing."));
    assert!(html_out.contains("Budget numbers."));
    assert!(!html_out.contains("Nuclear launch codes."));
    assert!(html_out.to_uppercase().contains("REDACTED"));
}

/// S4: prepare a download, complete it, pick it up once, then seed an
/// already-expired pickup record directly (this core never mocks the wall
/// clock) and confirm `GET` maps expiry to 410 and a second read to 404.
#[tokio::test]
async fn s4_ephemeral_pickup_staged_then_expires_and_is_deleted() {
    let tenant_server = MockServer::start().await;
    let enterprise_server = MockServer::start().await;
    let harness = harness(&tenant_server, &enterprise_server).await;

    let body = multipart_body(
        "B2",
        "Internal Memo",
        "did:prism:ACME",
        "<html><body><div data-clearance=\"INTERNAL\">Memo text.</div></body></html>",
    );
    let upload = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/classified-documents/upload")
                .header("content-type", "multipart/form-data; boundary=B2")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let record = json_body(upload).await;
    let document_id = record["documentDID"].as_str().unwrap().to_string();

    let token = login(
        &harness.app,
        &harness.state,
        &tenant_server,
        "bob@acme.example",
        "conn-bob",
        "Engineer",
        "Engineering",
        "INTERNAL",
    )
    .await;

    let prepare = post_json_auth(
        &harness.app,
        &format!("/documents/prepare-download/{document_id}?issuerDid=did:prism:ACME"),
        &token,
        json!({}),
    )
    .await;
    assert_eq!(prepare.status(), StatusCode::OK);
    let prepare_body = json_body(prepare).await;
    let pickup_id = prepare_body["pickupId"].as_str().unwrap().to_string();

    let recipient_secret = x25519_dalek::StaticSecret::random_from_rng(rand::thread_rng());
    let recipient_public = x25519_dalek::PublicKey::from(&recipient_secret);
    let wallet_key_b64 = BASE64.encode(recipient_public.as_bytes());

    let complete = post_json_auth(
        &harness.app,
        &format!("/documents/complete-download/{pickup_id}"),
        &token,
        json!({
            "walletDid": "did:wallet:bob",
            "x25519PublicKey": wallet_key_b64,
        }),
    )
    .await;
    assert_eq!(complete.status(), StatusCode::OK);

    let pickup = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/ephemeral-documents/content/{pickup_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(pickup.status(), StatusCode::OK);

    // Seed an already-expired pickup directly (no real clock to travel).
    let expired_id = "expired-pickup";
    harness.state.ephemeral.stage(
        expired_id.to_string(),
        broker::ephemeral::PickupRecord {
            encrypted_content: "ZGVhZA==".to_string(),
            nonce: "bm9uY2U=".to_string(),
            server_public_key: "a2V5".to_string(),
            wallet_did: "did:wallet:bob".to_string(),
            document_id: document_id.clone(),
            ephemeral_did: "did:ephemeral:expired".to_string(),
            content_type: "text/html".to_string(),
            expires_at: chrono::Utc::now() - chrono::Duration::seconds(1),
            views_remaining: -1,
        },
    );

    let gone = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/ephemeral-documents/content/{expired_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::GONE);

    let gone_again = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/ephemeral-documents/content/{expired_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(gone_again.status(), StatusCode::NOT_FOUND);
}

/// S5: dual-VP resource authorization — insufficient clearance is denied,
/// then re-verifying with a sufficient clearance authorizes.
#[tokio::test]
async fn s5_dual_vp_resource_authorization_blocks_then_allows() {
    let tenant_server = MockServer::start().await;
    let enterprise_server = MockServer::start().await;
    let harness = harness(&tenant_server, &enterprise_server).await;

    let initiate = post_json(
        &harness.app,
        "/resource/authorize/initiate",
        json!({ "resourceId": "infrastructure-plans", "employeeConnectionId": "conn-carol" }),
    )
    .await;
    assert_eq!(initiate.status(), StatusCode::OK);
    let initiate_body = json_body(initiate).await;
    let session_id = initiate_body["sessionId"].as_str().unwrap().to_string();
    let enterprise_presentation_id = initiate_body["enterprisePresentationId"]
        .as_str()
        .unwrap()
        .to_string();

    let requests = enterprise_server.received_requests().await.unwrap();
    let create_request = requests
        .iter()
        .find(|r| r.url.path() == "/present-proof/presentations")
        .unwrap();
    let sent_body: Value = serde_json::from_slice(&create_request.body).unwrap();
    let challenge = sent_body["options"]["challenge"].as_str().unwrap().to_string();

    let enterprise_vp = vp_jwt(
        &challenge,
        "employee-portal.techcorp.com",
        vec![employee_role_vc("did:prism:carol", "IT", "IT")],
    );
    Mock::given(method("GET"))
        .and(path_regex(format!("^/present-proof/presentations/{enterprise_presentation_id}$")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "PresentationVerified",
            "data": [enterprise_vp],
        })))
        .mount(&enterprise_server)
        .await;

    let status = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/resource/authorize/status/{session_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);

    let request_clearance = post_json(
        &harness.app,
        &format!("/resource/authorize/request-clearance/{session_id}"),
        json!({ "personalConnectionId": "conn-carol-personal" }),
    )
    .await;
    assert_eq!(request_clearance.status(), StatusCode::OK);
    let request_clearance_body = json_body(request_clearance).await;
    let personal_presentation_id = request_clearance_body["personalPresentationId"]
        .as_str()
        .unwrap()
        .to_string();

    let restricted_vp = vp_jwt(
        &challenge,
        "employee-portal.techcorp.com",
        vec![clearance_vc("did:prism:carol", "RESTRICTED")],
    );
    Mock::given(method("GET"))
        .and(path_regex(format!("^/present-proof/presentations/{personal_presentation_id}$")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "PresentationVerified",
            "data": [restricted_vp],
        })))
        .mount(&enterprise_server)
        .await;

    let denied = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/resource/authorize/verify/{session_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::OK);
    let denied_body = json_body(denied).await;
    assert_eq!(denied_body["authorized"], false);
    assert!(denied_body["reason"]
        .as_str()
        .unwrap()
        .contains("Insufficient clearance"));
}

/// S6: a login whose VP carries a VC from an issuer outside the accepted set
/// is rejected at the HTTP boundary rather than minting a session.
#[tokio::test]
async fn s6_login_rejects_untrusted_issuer() {
    let tenant_server = MockServer::start().await;
    let enterprise_server = MockServer::start().await;
    let harness = harness(&tenant_server, &enterprise_server).await;

    harness
        .state
        .employee_map
        .insert(
            "eve@acme.example",
            EmployeeConnection {
                connection_id: "conn-eve".to_string(),
                email: "eve@acme.example".to_string(),
                name: "Eve".to_string(),
                department: "Engineering".to_string(),
                personal_wallet_connection_id: None,
            },
        )
        .unwrap();

    Mock::given(method("POST"))
        .and(path_regex("^/present-proof/presentations$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "presentationId": "pres-eve",
            "state": "RequestSent",
        })))
        .mount(&tenant_server)
        .await;

    let initiate = post_json(
        &harness.app,
        "/auth/initiate",
        json!({ "identifier": "eve@acme.example" }),
    )
    .await;
    assert_eq!(initiate.status(), StatusCode::OK);

    let requests = tenant_server.received_requests().await.unwrap();
    let create_request = requests
        .iter()
        .find(|r| r.url.path() == "/present-proof/presentations")
        .unwrap();
    let sent_body: Value = serde_json::from_slice(&create_request.body).unwrap();
    let challenge = sent_body["options"]["challenge"].as_str().unwrap().to_string();

    let untrusted_vc = fake_jwt(&json!({
        "iss": "did:prism:UNTRUSTED",
        "sub": "did:prism:eve",
        "vc": { "credentialSubject": { "role": "Engineer", "department": "Engineering" } }
    }));
    let vp = vp_jwt(&challenge, "employee-portal.techcorp.com", vec![untrusted_vc]);

    Mock::given(method("GET"))
        .and(path_regex("^/present-proof/presentations/pres-eve$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "PresentationVerified",
            "data": [vp],
        })))
        .mount(&tenant_server)
        .await;

    let verify = post_json(&harness.app, "/auth/verify", json!({ "presentationId": "pres-eve" })).await;
    assert_eq!(verify.status(), StatusCode::FORBIDDEN);
    let body = json_body(verify).await;
    assert_eq!(body["error"], "InvalidIssuer");
}

/// `/healthz` is always reachable without a session.
#[tokio::test]
async fn healthz_is_public() {
    let tenant_server = MockServer::start().await;
    let enterprise_server = MockServer::start().await;
    let harness = harness(&tenant_server, &enterprise_server).await;

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
