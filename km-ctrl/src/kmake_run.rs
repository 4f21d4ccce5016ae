use std::ops::Deref;
use std::sync::Arc;

use km_core::k8s::{
    add_finalizer,
    namespaced_api,
    owner_reference,
    remove_finalizer,
};
use km_core::prelude::*;
use kube::Resource;
use kube::api::Patch;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use serde_json::json;
use tracing::*;

use crate::context::KmakeContext;
use crate::errors::*;
use crate::jobs::{
    launch_job,
    track_job,
};
use crate::lifecycle::*;
use crate::objects::build_run_job;
use crate::status::record;

pub(crate) fn is_owned_by(run: &KmakeRun, kmake: &Kmake) -> bool {
    run.owner_references()
        .iter()
        .any(|owner| owner.kind == Kmake::kind(&()) && Some(&owner.uid) == kmake.meta().uid.as_ref())
}

// Existing owners are kept; the Kmake only becomes the controller if nothing else already is.
async fn attach_owner(ctx: &KmakeContext, run: &mut KmakeRun, kmake: &Kmake) -> EmptyResult {
    let mut owners = run.owner_references().to_vec();
    let controller = !owners.iter().any(|owner| owner.controller == Some(true));
    owners.push(owner_reference(kmake, controller)?);

    let mut patch = json!({"metadata": {"ownerReferences": owners}});
    if let Some(rv) = run.resource_version() {
        patch["metadata"]["resourceVersion"] = json!(rv);
    }

    let api = namespaced_api::<KmakeRun, KmakeRun>(&ctx.client, run)?;
    *run = api.patch(&run.name_any(), &Default::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn launch(ctx: &KmakeContext, run: &mut KmakeRun, kmake: &Kmake) -> anyhow::Result<Action> {
    let run_name = run.name_any();
    match run.spec.operation.clone() {
        None => {
            record(ctx, run, Phase::Error, SubResourceKind::Main, Some("Unknown operation")).await?;
            Ok(Action::await_change())
        },
        Some(KmakeRunOperation::Dummy(_)) => {
            record(ctx, run, Phase::Success, SubResourceKind::Dummy, Some(&run_name)).await?;
            Ok(Action::await_change())
        },
        Some(KmakeRunOperation::FileWait(_)) => {
            record(ctx, run, Phase::Success, SubResourceKind::FileWait, Some(&run_name)).await?;
            Ok(Action::await_change())
        },
        Some(KmakeRunOperation::Job(request)) => {
            if !kmake.is_provisioned() {
                record(ctx, run, Phase::BackOff, SubResourceKind::Pvc, Some(&kmake.name_any())).await?;
                return Ok(Action::requeue(REQUEUE_BACKOFF));
            }

            let job = build_run_job(run, kmake, &request)?;
            launch_job(ctx, run, job).await
        },
    }
}

pub(crate) async fn reconcile_run(ctx: &KmakeContext, run: &mut KmakeRun) -> anyhow::Result<Action> {
    if run.is_being_deleted() {
        if run.has_finalizer() {
            record(ctx, run, Phase::Delete, SubResourceKind::Main, None).await?;
            remove_finalizer(&ctx.client, run).await?;
        }
        return Ok(Action::await_change());
    }

    if !run.has_finalizer() {
        add_finalizer(&ctx.client, run).await?;
        return Ok(Action::await_change());
    }

    let Some(kmake_name) = run.kmake_name().map(String::from) else {
        record(ctx, run, Phase::Error, SubResourceKind::Kmake, Some("No kmake set")).await?;
        return Ok(Action::await_change());
    };

    let kmake_api = namespaced_api::<Kmake, KmakeRun>(&ctx.client, run)?;
    let Some(kmake) = kmake_api.get_opt(&kmake_name).await? else {
        record(ctx, run, Phase::BackOff, SubResourceKind::Kmake, Some(&kmake_name)).await?;
        return Ok(Action::requeue(REQUEUE_BACKOFF));
    };

    if !is_owned_by(run, &kmake) {
        attach_owner(ctx, run, &kmake).await?;
        record(ctx, run, Phase::Update, SubResourceKind::Kmake, Some(&kmake_name)).await?;
        return Ok(Action::await_change());
    }

    if run.has_ended() {
        debug!("{} has already finished", run.namespaced_name());
        return Ok(Action::await_change());
    }

    if run.is_new() {
        // The Kmake picks the run up into its registry on its next pass
        if ctx.kmake_trigger.unbounded_send(ObjectRef::from_obj(&kmake)).is_err() {
            warn!("kmake controller is not listening, {} will be registered on its next resync", kmake_name);
        }
        record(ctx, run, Phase::Wait, SubResourceKind::Kmake, Some(&kmake_name)).await?;
        return Ok(Action::await_change());
    }

    // A KmakeNowScheduler picks tagged runs up and executes them through a start command
    if let Some(tag) = run.label(SCHEDULER_LABEL_KEY) {
        debug!("{} is scheduled by {tag}; leaving it to the scheduler", run.namespaced_name());
        return Ok(Action::await_change());
    }

    if let Some(job_name) = run.child(SubResourceKind::Job).map(String::from) {
        return track_job(ctx, run, &job_name).await;
    }

    launch(ctx, run, &kmake).await
}

#[instrument(parent=None, skip_all, fields(run=run.name_any()))]
pub async fn reconcile(run: Arc<KmakeRun>, ctx: Arc<KmakeContext>) -> Result<Action, AnyhowError> {
    let Some(mut run) = refetch(&ctx, run.deref()).await? else {
        return Ok(Action::await_change());
    };

    Ok(reconcile_run(&ctx, &mut run).await?)
}
