use std::sync::Arc;

use km_core::errors::*;
use km_core::k8s::namespaced_api;
use km_core::prelude::*;
use kube::runtime::controller::Action;
use tokio::time::Duration;
use tracing::*;

use crate::context::KmakeContext;
use crate::errors::*;

pub const REQUEUE_NOW: Duration = Duration::ZERO;
pub const REQUEUE_BACKOFF: Duration = Duration::from_secs(BACKOFF_DELAY_SECONDS);
pub const REQUEUE_JOB_POLL: Duration = Duration::from_secs(JOB_POLL_DELAY_SECONDS);
pub const REQUEUE_CASCADE: Duration = Duration::from_secs(CASCADE_POLL_DELAY_SECONDS);
pub const REQUEUE_ERROR: Duration = Duration::from_secs(ERROR_RETRY_DELAY_SECONDS);

// The object handed to us by the controller comes out of the reflector cache, which can lag behind
// writes we made on a previous pass; always act on what the apiserver has right now.
pub(crate) async fn refetch<K: KmakeResource>(ctx: &KmakeContext, obj: &K) -> anyhow::Result<Option<K>> {
    let api = namespaced_api::<K, K>(&ctx.client, obj)?;
    let fresh = api.get_opt(&obj.name_any()).await?;
    if fresh.is_none() {
        debug!("{} no longer exists", obj.namespaced_name());
    }
    Ok(fresh)
}

// Errors in what the user asked for won't fix themselves on a retry; wait for the object to change
pub fn error_policy<K: KmakeResource>(obj: Arc<K>, err: &AnyhowError, _ctx: Arc<KmakeContext>) -> Action {
    if err.is::<KmakeControllerError>() {
        warn!("cannot reconcile {}: {err}", obj.namespaced_name());
        return Action::await_change();
    }

    kmerr!(err, "reconcile failed on {}", obj.namespaced_name());
    Action::requeue(REQUEUE_ERROR)
}
