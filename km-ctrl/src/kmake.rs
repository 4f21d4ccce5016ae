use std::ops::Deref;
use std::sync::Arc;

use km_core::k8s::{
    add_finalizer,
    delete_collection_ignore_not_found,
    label_selector,
    namespaced_api,
    remove_finalizer,
};
use km_core::prelude::*;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use tracing::*;

use crate::children::ensure_child;
use crate::context::KmakeContext;
use crate::errors::*;
use crate::lifecycle::*;
use crate::objects::*;
use crate::status::{
    record,
    record_runs,
};

fn runs_selector(kmake: &Kmake) -> ListParams {
    ListParams::default().labels(&label_selector(&[(KMAKE_LABEL_KEY, &kmake.name_any())]))
}

// Runs are labelled with (rather than just owned by) their Kmake, so they have to be removed
// explicitly; the finalizer stays until none are left.
async fn cleanup(ctx: &KmakeContext, kmake: &mut Kmake) -> anyhow::Result<Action> {
    record(ctx, kmake, Phase::Delete, SubResourceKind::Runs, None).await?;

    let runs_api = namespaced_api::<KmakeRun, Kmake>(&ctx.client, kmake)?;
    let lp = runs_selector(kmake);
    delete_collection_ignore_not_found(&runs_api, &lp).await?;

    let remaining = runs_api.list(&lp).await?.items.len();
    if remaining > 0 {
        info!("waiting for {remaining} run(s) of {} to go away", kmake.namespaced_name());
        return Ok(Action::requeue(REQUEUE_CASCADE));
    }

    remove_finalizer(&ctx.client, kmake).await?;
    Ok(Action::await_change())
}

async fn sync_runs(ctx: &KmakeContext, kmake: &mut Kmake) -> EmptyResult {
    let runs_api = namespaced_api::<KmakeRun, Kmake>(&ctx.client, kmake)?;
    let runs = runs_api.list(&runs_selector(kmake)).await?.items;
    record_runs(ctx, kmake, run_manifests(&runs)).await
}

pub(crate) async fn reconcile_kmake(ctx: &KmakeContext, kmake: &mut Kmake) -> anyhow::Result<Action> {
    if kmake.is_being_deleted() {
        if kmake.has_finalizer() {
            return cleanup(ctx, kmake).await;
        }
        return Ok(Action::await_change());
    }

    if !kmake.has_finalizer() {
        add_finalizer(&ctx.client, kmake).await?;
        return Ok(Action::await_change());
    }

    let env_map = build_env_configmap(kmake, &kmake.spec.variables)?;
    if ensure_child(ctx, kmake, SubResourceKind::EnvMap, env_map, configmap_differs).await?.is_none() {
        return Ok(Action::requeue(REQUEUE_NOW));
    }

    let rules_map = build_rules_configmap(kmake)?;
    if ensure_child(ctx, kmake, SubResourceKind::KmakeMap, rules_map, configmap_differs).await?.is_none() {
        return Ok(Action::requeue(REQUEUE_NOW));
    }

    let desired_claim = build_storage_claim(kmake)?;
    let Some(claim) = ensure_child(ctx, kmake, SubResourceKind::Pvc, desired_claim, claim_differs).await? else {
        return Ok(Action::requeue(REQUEUE_NOW));
    };

    let claim_name = claim.name_any();
    if !is_claim_bound(&claim) {
        record(ctx, kmake, Phase::BackOff, SubResourceKind::Pvc, Some(&claim_name)).await?;
        return Ok(Action::requeue(REQUEUE_BACKOFF));
    }

    let backed_off = kmake.phase() == Some(Phase::BackOff)
        && kmake
            .kmake_status()
            .and_then(|s| s.last_action.as_ref())
            .is_some_and(|a| a.kind == SubResourceKind::Pvc);
    if backed_off {
        record(ctx, kmake, Phase::Provision, SubResourceKind::Pvc, Some(&claim_name)).await?;
    }

    sync_runs(ctx, kmake).await?;
    record(ctx, kmake, Phase::Ready, SubResourceKind::Main, None).await?;
    Ok(Action::await_change())
}

#[instrument(parent=None, skip_all, fields(kmake=kmake.name_any()))]
pub async fn reconcile(kmake: Arc<Kmake>, ctx: Arc<KmakeContext>) -> Result<Action, AnyhowError> {
    let Some(mut kmake) = refetch(&ctx, kmake.deref()).await? else {
        return Ok(Action::await_change());
    };

    Ok(reconcile_kmake(&ctx, &mut kmake).await?)
}
