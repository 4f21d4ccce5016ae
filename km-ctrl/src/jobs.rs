use km_core::k8s::namespaced_api;
use km_core::prelude::*;
use kube::api::PostParams;
use kube::runtime::controller::Action;
use tracing::*;

use crate::context::KmakeContext;
use crate::lifecycle::REQUEUE_JOB_POLL;
use crate::status::record;

/// Follow a job that `obj` has already launched and fold its state into `obj`'s status.
pub(crate) async fn track_job<K: KmakeResource>(ctx: &KmakeContext, obj: &mut K, job_name: &str) -> anyhow::Result<Action> {
    let api = namespaced_api::<batchv1::Job, K>(&ctx.client, obj)?;
    let Some(job) = api.get_opt(job_name).await? else {
        warn!("job {job_name} for {} has disappeared", obj.namespaced_name());
        record(ctx, obj, Phase::Abort, SubResourceKind::Job, Some(job_name)).await?;
        return Ok(Action::await_change());
    };

    let status = job.status.unwrap_or_default();
    let (phase, action) = if status.active.unwrap_or(0) > 0 {
        (Phase::Active, Action::requeue(REQUEUE_JOB_POLL))
    } else if status.succeeded.unwrap_or(0) > 0 {
        (Phase::Success, Action::await_change())
    } else if status.failed.unwrap_or(0) > 0 {
        (Phase::Error, Action::await_change())
    } else {
        debug!("job {job_name} has not started yet");
        return Ok(Action::requeue(REQUEUE_JOB_POLL));
    };

    record(ctx, obj, phase, SubResourceKind::Job, Some(job_name)).await?;
    Ok(action)
}

pub(crate) async fn launch_job<K: KmakeResource>(ctx: &KmakeContext, owner: &mut K, job: batchv1::Job) -> anyhow::Result<Action> {
    let api = namespaced_api::<batchv1::Job, K>(&ctx.client, owner)?;
    match api.create(&PostParams::default(), &job).await {
        Ok(created) => {
            record(ctx, owner, Phase::Provision, SubResourceKind::Job, Some(&created.name_any())).await?;
            Ok(Action::await_change())
        },
        Err(err) => {
            let prefix = job.metadata.generate_name.unwrap_or_default();
            record(ctx, owner, Phase::Error, SubResourceKind::Job, Some(&prefix)).await?;
            Err(err.into())
        },
    }
}
