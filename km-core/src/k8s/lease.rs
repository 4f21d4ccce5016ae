use chrono::{
    DateTime,
    Utc,
};
use k8s_openapi::api::coordination::v1 as coordinationv1;
use kube::api::Patch;
use serde_json::json;
use tracing::*;

use crate::prelude::*;

#[derive(Debug, Eq, PartialEq)]
pub enum LeaseState {
    Unknown,
    Claimed,
    WaitingForClaim(u64),
}

fn lease_spec(holder: &str, now: DateTime<Utc>) -> coordinationv1::LeaseSpec {
    coordinationv1::LeaseSpec {
        holder_identity: Some(holder.into()),
        lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
        acquire_time: Some(metav1::MicroTime(now)),
        renew_time: Some(metav1::MicroTime(now)),
        ..Default::default()
    }
}

pub fn build_lease(ns: &str, holder: &str, now: DateTime<Utc>) -> coordinationv1::Lease {
    coordinationv1::Lease {
        metadata: metav1::ObjectMeta {
            namespace: Some(ns.into()),
            name: Some(LEASE_NAME.into()),
            ..Default::default()
        },
        spec: Some(lease_spec(holder, now)),
    }
}

/// Seconds until a lease last renewed at `renew_time` runs out; zero or less means it has expired
/// and whoever held it is presumed gone.
pub fn remaining_lease_time(duration_seconds: Option<i32>, renew_time: Option<&metav1::MicroTime>, now: DateTime<Utc>) -> i64 {
    let Some(renewed) = renew_time else {
        return 0;
    };
    renewed.0.timestamp() + duration_seconds.unwrap_or(0) as i64 - now.timestamp()
}

/// Try to become the one active controller.  The lease lives in `ns` under a fixed name; it's
/// taken if nobody holds it or the holder stopped renewing, and otherwise we report how long to
/// wait before trying again.
pub async fn try_claim_lease(client: &kube::Client, ns: &str, holder: &str, now: DateTime<Utc>) -> anyhow::Result<LeaseState> {
    let lease_api = kube::Api::<coordinationv1::Lease>::namespaced(client.clone(), ns);
    let mut lease_state = LeaseState::Unknown;
    let mut lease_entry = lease_api
        .entry(LEASE_NAME)
        .await?
        .and_modify(|lease| {
            let take = match &lease.spec {
                Some(coordinationv1::LeaseSpec {
                    holder_identity: Some(current),
                    lease_duration_seconds,
                    renew_time,
                    ..
                }) => {
                    let remaining = remaining_lease_time(*lease_duration_seconds, renew_time.as_ref(), now);
                    if current.as_str() == holder {
                        lease_state = LeaseState::Claimed;
                        false
                    } else if remaining > 0 {
                        info!("leadership is held by {current} for another {remaining}s");
                        lease_state = LeaseState::WaitingForClaim(remaining as u64);
                        false
                    } else {
                        warn!("{current} stopped renewing the lease; taking over");
                        true
                    }
                },
                _ => true,
            };

            // Only the spec is replaced; the resourceVersion is kept, so a racing claimant gets a
            // conflict instead of silently overwriting us
            if take {
                lease.spec = Some(lease_spec(holder, now));
            }
        })
        .or_insert(|| build_lease(ns, holder, now));

    Ok(match lease_state {
        LeaseState::Unknown => {
            info!("acquiring lease {ns}/{LEASE_NAME} as {holder}");
            lease_entry.commit(&Default::default()).await?;
            LeaseState::Claimed
        },
        state => state,
    })
}

/// Push the lease's renew time forward.  If someone else has taken it in the meantime nothing is
/// written, and the returned state says how long their claim has left.
pub async fn try_renew_lease(client: &kube::Client, ns: &str, holder: &str, now: DateTime<Utc>) -> anyhow::Result<LeaseState> {
    let lease_api = kube::Api::<coordinationv1::Lease>::namespaced(client.clone(), ns);
    let lease = lease_api.get(LEASE_NAME).await?;
    let spec = lease.spec.unwrap_or_default();
    if spec.holder_identity.as_deref() != Some(holder) {
        let remaining = remaining_lease_time(spec.lease_duration_seconds, spec.renew_time.as_ref(), now);
        warn!("lease {ns}/{LEASE_NAME} is now held by {:?}", spec.holder_identity);
        return Ok(LeaseState::WaitingForClaim(remaining.max(0) as u64));
    }

    let mut patch = json!({
        "spec": {
            "leaseDurationSeconds": LEASE_DURATION_SECONDS,
            "renewTime": metav1::MicroTime(now),
        },
    });
    if let Some(rv) = lease.metadata.resource_version {
        patch["metadata"] = json!({"resourceVersion": rv});
    }
    lease_api.patch(LEASE_NAME, &Default::default(), &Patch::Merge(&patch)).await?;
    Ok(LeaseState::Claimed)
}
