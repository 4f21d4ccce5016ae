use std::env;

use chrono::Utc;
use km_core::errors::*;
use km_core::k8s::{
    LeaseState,
    try_claim_lease,
    try_renew_lease,
};
use km_core::prelude::*;
use tokio::time::{
    Duration,
    Instant,
    sleep,
};
use tracing::*;

use crate::exporter::set_leader;

pub fn holder_identity() -> String {
    env::var(POD_NAME_ENV_VAR).unwrap_or_else(|_| format!("{CONTROLLER_NAME}-{}", std::process::id()))
}

/// Block until this process holds the leader lease.
pub async fn acquire_leadership(client: &kube::Client, ns: &str, holder: &str) {
    set_leader(false);
    loop {
        let wait = match try_claim_lease(client, ns, holder, Utc::now()).await {
            Ok(LeaseState::Claimed) => break,
            Ok(LeaseState::WaitingForClaim(secs)) => Duration::from_secs(secs.max(LEASE_RETRY_SECONDS)),
            Ok(LeaseState::Unknown) => Duration::from_secs(LEASE_RETRY_SECONDS),

            // Someone else claimed it between our read and our write
            Err(err) => {
                warn!("could not claim lease: {err}");
                Duration::from_secs(LEASE_RETRY_SECONDS)
            },
        };
        sleep(wait).await;
    }

    info!("{holder} is now the leader");
    set_leader(true);
}

/// Renew the lease forever.  Returns an error once leadership is gone, either because someone
/// else holds the lease or because renewals kept failing until it ran out.
pub async fn keep_leadership(client: &kube::Client, ns: &str, holder: &str) -> EmptyResult {
    let lease_duration = Duration::from_secs(LEASE_DURATION_SECONDS as u64);
    let mut last_renewed = Instant::now();
    loop {
        sleep(Duration::from_secs(LEASE_RENEW_SECONDS)).await;
        match try_renew_lease(client, ns, holder, Utc::now()).await {
            Ok(LeaseState::Claimed) => last_renewed = Instant::now(),
            Ok(_) => {
                set_leader(false);
                return Err(anyhow!("{holder} lost the leader lease"));
            },
            Err(err) if last_renewed.elapsed() < lease_duration => warn!("could not renew lease: {err}"),
            Err(err) => {
                set_leader(false);
                return Err(err.context(format!("{holder} could not renew the leader lease in time")));
            },
        }
    }
}
