//! Enterprise classified-document broker: the core services behind an SSI
//! portal that lets companies discover, exchange, and view each other's
//! classification-gated documents without either side running a database.
//!
//! Every module corresponds to one component of the broker's design: the
//! Cloud-Agent facade, signed-at-rest persistence, the section parser/crypto/
//! redaction trio, the session and resource-authorization state machines, and
//! the HTTP surface wiring them together behind `axum`.

pub mod blob_store;
pub mod canonical;
pub mod classification;
pub mod cloud_agent;
pub mod config;
pub mod download;
pub mod ephemeral;
pub mod error;
pub mod http;
pub mod janitor;
pub mod onboarding;
pub mod persist;
pub mod registry;
pub mod resource_auth;
pub mod section;
pub mod session;
pub mod vp;
