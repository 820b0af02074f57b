use anyhow::{Context, Result};
use broker::cloud_agent::CloudAgentClient;
use broker::config::Config;
use broker::download::DownloadPipeline;
use broker::ephemeral::EphemeralStore;
use broker::http::{self, AppState};
use broker::janitor::Janitor;
use broker::registry::employee_map::EmployeeMappingStore;
use broker::registry::soft_delete::SoftDeleteStore;
use broker::registry::DocumentRegistry;
use broker::resource_auth::{PolicyTable, ResourceAuthCore};
use broker::session::SessionCore;
use clap::Parser;
use std::collections::HashSet;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::from_default_env().add_directive("broker=info".parse()?);
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let registry_key = config.registry_signature_key.expose_bytes().to_vec();
    let company_secret = config.section_encryption_secret.expose_bytes().to_vec();

    let registry = Arc::new(
        DocumentRegistry::open(config.registry_path(), registry_key.clone())
            .context("opening document registry")?,
    );
    let blobs = Arc::new(
        broker::blob_store::BlobStore::new(config.blob_dir()).context("opening blob store")?,
    );
    let ephemeral = Arc::new(EphemeralStore::new());
    let employee_map = Arc::new(
        EmployeeMappingStore::open(config.employee_mapping_path(), registry_key.clone())
            .context("opening employee mapping store")?,
    );
    let soft_delete = Arc::new(
        SoftDeleteStore::open(config.soft_deleted_path(), registry_key.clone())
            .context("opening soft-delete store")?,
    );

    let tenant_agent = Arc::new(CloudAgentClient::tenant(
        config.tenant_agent_url.clone(),
        config.tenant_agent_api_key.expose().to_string(),
    ));
    let enterprise_agent = Arc::new(CloudAgentClient::enterprise(
        config.enterprise_agent_url.clone(),
        config.enterprise_agent_api_key.expose().to_string(),
    ));

    let accepted_issuers: HashSet<String> = config.accepted_issuers.iter().cloned().collect();
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
        config.base_url.clone(),
    ));

    let policy = PolicyTable::load_or_seed(config.resource_policy_path.as_deref())
        .context("loading resource policy table")?;
    let resource_auth = Arc::new(ResourceAuthCore::new(enterprise_agent.clone(), policy));

    let janitor = Arc::new(Janitor::new(
        session.clone(),
        resource_auth.clone(),
        ephemeral.clone(),
        download.clone(),
    ));
    janitor.spawn();

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

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "classified-document broker listening");
    axum::serve(listener, app).await.context("serving http")?;
    Ok(())
}
