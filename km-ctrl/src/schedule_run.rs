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
use kube::api::{
    ListParams,
    PostParams,
};
use kube::runtime::controller::Action;
use tracing::*;

use crate::context::KmakeContext;
use crate::errors::*;
use crate::jobs::{
    launch_job,
    track_job,
};
use crate::lifecycle::*;
use crate::lineage::build_lineage_configmap;
use crate::objects::build_start_job;
use crate::status::record;

/// Label selector for the schedule-runs that a stop/restart/reset command sweeps away.  `run`
/// narrows it to a single run and `workload` to one side of the yes/no split; with neither, every
/// record of the schedule instance matches.
pub(crate) fn sibling_selector(instance: &str, run: Option<&str>, workload: Option<&str>) -> String {
    let mut labels = vec![(SCHEDULE_INSTANCE_LABEL_KEY, instance)];
    if let Some(run) = run {
        labels.push((RUN_LABEL_KEY, run));
    }
    if let Some(workload) = workload {
        labels.push((WORKLOAD_LABEL_KEY, workload));
    }
    label_selector(&labels)
}

// A command never sweeps itself away
async fn delete_siblings(ctx: &KmakeContext, kmsr: &KmakeScheduleRun, selector: &str) -> anyhow::Result<Option<usize>> {
    let api = namespaced_api::<KmakeScheduleRun, KmakeScheduleRun>(&ctx.client, kmsr)?;
    let lp = ListParams::default()
        .labels(selector)
        .fields(&format!("metadata.name!={}", kmsr.name_any()));
    delete_collection_ignore_not_found(&api, &lp).await
}

async fn ensure_lineage(
    ctx: &KmakeContext,
    kmsr: &mut KmakeScheduleRun,
    run: &KmakeRun,
    kmake: &Kmake,
) -> anyhow::Result<String> {
    let api = namespaced_api::<corev1::ConfigMap, KmakeScheduleRun>(&ctx.client, kmsr)?;
    if let Some(name) = kmsr.child(SubResourceKind::Owner)
        && let Some(existing) = api.get_opt(name).await?
    {
        return Ok(existing.name_any());
    }

    let lineage = build_lineage_configmap(kmsr, run, kmake)?;
    let name = api.create(&PostParams::default(), &lineage).await?.name_any();
    record(ctx, kmsr, Phase::Provision, SubResourceKind::Owner, Some(&name)).await?;
    Ok(name)
}

async fn start(ctx: &KmakeContext, kmsr: &mut KmakeScheduleRun) -> anyhow::Result<Action> {
    if kmsr.has_ended() {
        return Ok(Action::await_change());
    }

    let Some(run_name) = kmsr.run_name().map(String::from) else {
        record(ctx, kmsr, Phase::Error, SubResourceKind::Runs, Some("No kmakerun set")).await?;
        return Ok(Action::await_change());
    };

    let run_api = namespaced_api::<KmakeRun, KmakeScheduleRun>(&ctx.client, kmsr)?;
    let Some(run) = run_api.get_opt(&run_name).await? else {
        info!("run {run_name} for {} no longer exists", kmsr.namespaced_name());
        return Ok(Action::await_change());
    };

    if let Some(job_name) = kmsr.child(SubResourceKind::Job).map(String::from) {
        return track_job(ctx, kmsr, &job_name).await;
    }

    let Some(kmake_name) = kmsr.kmake_name().or(run.kmake_name()).map(String::from) else {
        record(ctx, kmsr, Phase::Error, SubResourceKind::Kmake, Some("No kmake set")).await?;
        return Ok(Action::await_change());
    };

    let kmake_api = namespaced_api::<Kmake, KmakeScheduleRun>(&ctx.client, kmsr)?;
    let Some(kmake) = kmake_api.get_opt(&kmake_name).await? else {
        record(ctx, kmsr, Phase::BackOff, SubResourceKind::Kmake, Some(&kmake_name)).await?;
        return Ok(Action::requeue(REQUEUE_BACKOFF));
    };

    match run.spec.operation.clone() {
        None => {
            record(ctx, kmsr, Phase::Error, SubResourceKind::Main, Some("Unknown operation")).await?;
            Ok(Action::await_change())
        },
        Some(KmakeRunOperation::Dummy(_)) => {
            record(ctx, kmsr, Phase::Success, SubResourceKind::Dummy, Some(&run_name)).await?;
            Ok(Action::await_change())
        },
        Some(KmakeRunOperation::FileWait(_)) => {
            record(ctx, kmsr, Phase::Success, SubResourceKind::FileWait, Some(&run_name)).await?;
            Ok(Action::await_change())
        },
        Some(KmakeRunOperation::Job(request)) => {
            if !kmake.is_provisioned() {
                record(ctx, kmsr, Phase::BackOff, SubResourceKind::Pvc, Some(&kmake_name)).await?;
                return Ok(Action::requeue(REQUEUE_BACKOFF));
            }

            let lineage = ensure_lineage(ctx, kmsr, &run, &kmake).await?;
            let job = build_start_job(kmsr, &run, &kmake, &request, &lineage)?;
            launch_job(ctx, kmsr, job).await
        },
    }
}

// Restart and stop share a shape: clear out the instance's records for one run, on the "no" or
// "yes" side of the workload split respectively.
async fn sweep_run(
    ctx: &KmakeContext,
    kmsr: &mut KmakeScheduleRun,
    phase: Phase,
    run: Option<String>,
    workload: &str,
) -> anyhow::Result<Action> {
    if !kmsr.is_new() {
        return Ok(Action::await_change());
    }

    let Some(instance) = kmsr.schedule_instance().map(String::from) else {
        record(ctx, kmsr, Phase::Error, SubResourceKind::Runs, Some("No scheduler set")).await?;
        return Ok(Action::await_change());
    };

    let Some(run_name) = run.or_else(|| kmsr.run_name().map(String::from)) else {
        record(ctx, kmsr, Phase::Error, SubResourceKind::Runs, Some("No kmakerun set")).await?;
        return Ok(Action::await_change());
    };

    let name = kmsr.name_any();
    let selector = sibling_selector(&instance, Some(&run_name), Some(workload));
    if let Err(err) = delete_siblings(ctx, kmsr, &selector).await {
        record(ctx, kmsr, Phase::Error, SubResourceKind::Runs, Some(&name)).await?;
        return Err(err);
    }

    record(ctx, kmsr, phase, SubResourceKind::Runs, Some(&name)).await?;
    Ok(Action::await_change())
}

async fn reset(ctx: &KmakeContext, kmsr: &mut KmakeScheduleRun, full: bool) -> anyhow::Result<Action> {
    if !kmsr.is_new() {
        return Ok(Action::await_change());
    }

    let Some(instance) = kmsr.schedule_instance().map(String::from) else {
        record(ctx, kmsr, Phase::Error, SubResourceKind::Runs, Some("No scheduler set")).await?;
        return Ok(Action::await_change());
    };

    let selector = sibling_selector(&instance, None, (!full).then_some(WORKLOAD_YES));
    match delete_siblings(ctx, kmsr, &selector).await {
        Ok(Some(0)) => record(ctx, kmsr, Phase::Delete, SubResourceKind::Runs, Some("No resources found")).await?,
        Ok(_) => record(ctx, kmsr, Phase::Delete, SubResourceKind::Runs, None).await?,
        Err(err) => {
            let name = kmsr.name_any();
            record(ctx, kmsr, Phase::Error, SubResourceKind::Runs, Some(&name)).await?;
            return Err(err);
        },
    }
    Ok(Action::await_change())
}

pub(crate) async fn reconcile_schedule_run(ctx: &KmakeContext, kmsr: &mut KmakeScheduleRun) -> anyhow::Result<Action> {
    if kmsr.is_being_deleted() {
        if kmsr.has_finalizer() {
            record(ctx, kmsr, Phase::Delete, SubResourceKind::Main, None).await?;
            remove_finalizer(&ctx.client, kmsr).await?;
        }
        return Ok(Action::await_change());
    }

    if !kmsr.has_finalizer() {
        add_finalizer(&ctx.client, kmsr).await?;
        return Ok(Action::await_change());
    }

    match kmsr.spec.operation.clone() {
        Some(KmakeScheduleRunOperation::Start(_)) => start(ctx, kmsr).await,
        Some(KmakeScheduleRunOperation::Restart(op)) => sweep_run(ctx, kmsr, Phase::Restart, op.run, WORKLOAD_NO).await,
        Some(KmakeScheduleRunOperation::Stop(op)) => sweep_run(ctx, kmsr, Phase::Stop, op.run, WORKLOAD_YES).await,
        Some(KmakeScheduleRunOperation::Reset(op)) => reset(ctx, kmsr, op.full).await,
        Some(op) => {
            debug!("nothing to do for {} command {}", op.as_str(), kmsr.namespaced_name());
            Ok(Action::await_change())
        },
        None => {
            record(ctx, kmsr, Phase::Error, SubResourceKind::Runs, Some("Unknown operation")).await?;
            Ok(Action::await_change())
        },
    }
}

#[instrument(parent=None, skip_all, fields(kmsr=kmsr.name_any()))]
pub async fn reconcile(kmsr: Arc<KmakeScheduleRun>, ctx: Arc<KmakeContext>) -> Result<Action, AnyhowError> {
    let Some(mut kmsr) = refetch(&ctx, kmsr.deref()).await? else {
        return Ok(Action::await_change());
    };

    Ok(reconcile_schedule_run(&ctx, &mut kmsr).await?)
}
