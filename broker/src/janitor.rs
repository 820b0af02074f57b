//! Janitor (C13): one periodic background task sweeping every in-memory
//! table that carries a TTL, so expired state doesn't accumulate forever
//! under a long-running process. Short URLs and other shortening services
//! are an external collaborator out of scope for this core (no such table
//! exists here to sweep).

use crate::download::DownloadPipeline;
use crate::ephemeral::EphemeralStore;
use crate::resource_auth::ResourceAuthCore;
use crate::session::SessionCore;
use std::sync::Arc;
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_secs(60);
const PENDING_SWEEP_EVERY: u32 = 5;
const SESSION_SWEEP_EVERY: u32 = 60;
const EPHEMERAL_SWEEP_EVERY: u32 = 60;

pub struct Janitor {
    session: Arc<SessionCore>,
    resource_auth: Arc<ResourceAuthCore>,
    ephemeral: Arc<EphemeralStore>,
    download: Arc<DownloadPipeline>,
}

impl Janitor {
    pub fn new(
        session: Arc<SessionCore>,
        resource_auth: Arc<ResourceAuthCore>,
        ephemeral: Arc<EphemeralStore>,
        download: Arc<DownloadPipeline>,
    ) -> Self {
        Janitor {
            session,
            resource_auth,
            ephemeral,
            download,
        }
    }

    /// Spawns the sweep loop; the returned handle is detached, the task runs
    /// for the lifetime of the process.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks: u32 = 0;
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                ticks += 1;

                let prepared_removed = self.download.sweep_expired_prepared();
                if prepared_removed > 0 {
                    tracing::debug!(count = prepared_removed, "swept expired prepared downloads");
                }

                if ticks % PENDING_SWEEP_EVERY == 0 {
                    let (pending_logins, sessions) = self.session.sweep_expired();
                    let pending_resource_auths = self.resource_auth.sweep_expired();
                    if pending_logins + sessions + pending_resource_auths > 0 {
                        tracing::debug!(
                            pending_logins,
                            sessions,
                            pending_resource_auths,
                            "swept expired auth state"
                        );
                    }
                }

                if ticks % SESSION_SWEEP_EVERY == 0 {
                    let (_, sessions) = self.session.sweep_expired();
                    if sessions > 0 {
                        tracing::info!(sessions, "hourly session sweep");
                    }
                }

                if ticks % EPHEMERAL_SWEEP_EVERY == 0 {
                    let removed = self.ephemeral.sweep_expired();
                    if removed > 0 {
                        tracing::info!(removed, "hourly ephemeral pickup sweep");
                    }
                }
            }
        })
    }
}
