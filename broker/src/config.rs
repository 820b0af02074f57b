//! Process-wide configuration (C14): CLI flags with environment fallback,
//! in the teacher's `clap`-derive idiom.

use clap::Parser;
use std::fmt;
use std::path::PathBuf;

/// A secret value whose `Debug`/`Display` never leaks the contents into logs.
#[derive(Clone)]
pub struct Secret(pub String);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(REDACTED)")
    }
}

impl std::str::FromStr for Secret {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Secret(s.to_string()))
    }
}

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn expose_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "broker", about = "Enterprise classified-document broker")]
pub struct Config {
    /// Address the HTTP server listens on.
    #[arg(long, env = "BROKER_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: String,

    /// Root directory for the registry file, blob store, and auxiliary tables.
    #[arg(long, env = "BROKER_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Base URL this process is reachable at, used to build ephemeral
    /// service-endpoint URLs.
    #[arg(long, env = "BROKER_BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Tenant Cloud Agent base URL (employee wallets).
    #[arg(long, env = "BROKER_TENANT_AGENT_URL")]
    pub tenant_agent_url: String,
    #[arg(long, env = "BROKER_TENANT_AGENT_API_KEY")]
    pub tenant_agent_api_key: Secret,

    /// Enterprise Cloud Agent base URL (company-side connections/offers).
    #[arg(long, env = "BROKER_ENTERPRISE_AGENT_URL")]
    pub enterprise_agent_url: String,
    #[arg(long, env = "BROKER_ENTERPRISE_AGENT_API_KEY")]
    pub enterprise_agent_api_key: Secret,

    /// Per-department secrets used when an onboarding/authorization step is
    /// scoped to a specific enterprise department.
    #[arg(long, env = "BROKER_HR_SECRET", default_value = "")]
    pub hr_secret: Secret,
    #[arg(long, env = "BROKER_IT_SECRET", default_value = "")]
    pub it_secret: Secret,
    #[arg(long, env = "BROKER_SECURITY_SECRET", default_value = "")]
    pub security_secret: Secret,

    /// Comma-separated set of DIDs trusted as credential issuers.
    #[arg(long, env = "BROKER_ACCEPTED_ISSUERS", value_delimiter = ',')]
    pub accepted_issuers: Vec<String>,

    /// JSON file mapping company identifier -> DID.
    #[arg(long, env = "BROKER_COMPANY_CATALOGUE")]
    pub company_catalogue_path: Option<PathBuf>,

    /// HMAC key signing the persisted registry and auxiliary tables at rest.
    #[arg(long, env = "BROKER_REGISTRY_SIGNATURE_KEY")]
    pub registry_signature_key: Secret,

    /// Root secret section keys are derived from via HKDF.
    #[arg(long, env = "BROKER_SECTION_ENCRYPTION_SECRET")]
    pub section_encryption_secret: Secret,

    /// JSON file describing the resource-authorization policy table (§6).
    #[arg(long, env = "BROKER_RESOURCE_POLICY_FILE")]
    pub resource_policy_path: Option<PathBuf>,

    /// Emit JSON logs instead of the human-readable formatter.
    #[arg(long, env = "BROKER_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Config {
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("document-registry.json")
    }

    pub fn soft_deleted_path(&self) -> PathBuf {
        self.data_dir.join("soft-deleted-connections.json")
    }

    pub fn employee_mapping_path(&self) -> PathBuf {
        self.data_dir.join("employee-connection-mappings.json")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}
