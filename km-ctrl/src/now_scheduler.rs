use std::collections::BTreeSet;
use std::ops::Deref;
use std::sync::Arc;

use km_core::errors::*;
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

use crate::children::ensure_child;
use crate::context::KmakeContext;
use crate::errors::*;
use crate::lifecycle::*;
use crate::objects::*;
use crate::status::{
    record,
    record_runs,
};

fn instance_selector(scheduler: &KmakeNowScheduler) -> ListParams {
    ListParams::default().labels(&label_selector(&[(SCHEDULE_INSTANCE_LABEL_KEY, &scheduler.name_any())]))
}

// The finalizer stays until every start command the scheduler issued is gone
async fn cleanup(
    ctx: &KmakeContext,
    scheduler: &mut KmakeNowScheduler,
    kmsr_api: &kube::Api<KmakeScheduleRun>,
) -> anyhow::Result<Action> {
    record(ctx, scheduler, Phase::Delete, SubResourceKind::Main, None).await?;

    let lp = instance_selector(scheduler);
    delete_collection_ignore_not_found(kmsr_api, &lp).await?;

    let remaining = kmsr_api.list(&lp).await?.items.len();
    if remaining > 0 {
        info!("waiting for {remaining} schedule run(s) of {} to go away", scheduler.namespaced_name());
        return Ok(Action::requeue(REQUEUE_CASCADE));
    }

    remove_finalizer(&ctx.client, scheduler).await?;
    Ok(Action::await_change())
}

pub(crate) async fn reconcile_scheduler(ctx: &KmakeContext, scheduler: &mut KmakeNowScheduler) -> anyhow::Result<Action> {
    let interval = ctx.opts.scheduler_interval;
    let kmsr_api = namespaced_api::<KmakeScheduleRun, KmakeNowScheduler>(&ctx.client, scheduler)?;

    if scheduler.is_being_deleted() {
        if scheduler.has_finalizer() {
            return cleanup(ctx, scheduler, &kmsr_api).await;
        }
        return Ok(Action::await_change());
    }

    if !scheduler.has_finalizer() {
        add_finalizer(&ctx.client, scheduler).await?;
        return Ok(Action::requeue(interval));
    }

    let env_map = build_env_configmap(scheduler, &scheduler.spec.variables)?;
    let Some(env_map) = ensure_child(ctx, scheduler, SubResourceKind::EnvMap, env_map, configmap_differs).await? else {
        return Ok(Action::requeue(REQUEUE_NOW));
    };
    let env_name = env_map.name_any();

    let mut commands = kmsr_api.list(&instance_selector(scheduler)).await?.items;
    let mut triggered: BTreeSet<String> = commands.iter().filter_map(|c| c.run_name().map(String::from)).collect();

    let run_api = namespaced_api::<KmakeRun, KmakeNowScheduler>(&ctx.client, scheduler)?;
    let mut misconfigured = vec![];
    for tag in scheduler.spec.monitor.clone() {
        let lp = ListParams::default().labels(&label_selector(&[(SCHEDULER_LABEL_KEY, &tag)]));
        for run in run_api.list(&lp).await?.items {
            let run_name = run.name_any();
            if triggered.contains(&run_name) {
                continue;
            }

            let Some(kmake_name) = run.kmake_name() else {
                warn!("run {run_name} is tagged {tag} but has no kmake label");
                misconfigured.push(run_name);
                continue;
            };

            let command = build_start_command(scheduler, &env_name, kmake_name, &run_name)?;
            let created = kmsr_api.create(&PostParams::default(), &command).await?;
            record(ctx, scheduler, Phase::Provision, SubResourceKind::Runs, Some(&created.name_any())).await?;
            triggered.insert(run_name);
            commands.push(created);
        }
    }

    record_runs(ctx, scheduler, schedule_run_manifests(&commands)).await?;
    match misconfigured.first() {
        Some(run_name) => record(ctx, scheduler, Phase::Error, SubResourceKind::Runs, Some(run_name)).await?,
        None => record(ctx, scheduler, Phase::Ready, SubResourceKind::Main, None).await?,
    }
    Ok(Action::requeue(interval))
}

#[instrument(parent=None, skip_all, fields(scheduler=scheduler.name_any()))]
pub async fn reconcile(scheduler: Arc<KmakeNowScheduler>, ctx: Arc<KmakeContext>) -> Result<Action, AnyhowError> {
    let Some(mut scheduler) = refetch(&ctx, scheduler.deref()).await? else {
        return Ok(Action::await_change());
    };

    Ok(reconcile_scheduler(&ctx, &mut scheduler).await?)
}

// Schedulers poll; a failed pass is just retried on the normal cadence
pub fn error_policy(scheduler: Arc<KmakeNowScheduler>, err: &AnyhowError, ctx: Arc<KmakeContext>) -> Action {
    kmerr!(err, "scheduler pass failed for {}", scheduler.namespaced_name());
    Action::requeue(ctx.opts.scheduler_interval)
}
