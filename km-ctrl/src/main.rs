mod children;
mod context;
mod errors;
mod exporter;
mod jobs;
mod kmake;
mod kmake_run;
mod leader;
mod lifecycle;
mod lineage;
mod now_scheduler;
mod objects;
mod schedule_run;
mod status;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use kube::runtime::controller::Controller;
use kube::runtime::watcher;
use km_core::logging;
use km_core::metrics::PrometheusRecorder;
use km_core::prelude::*;
use serde::de::DeserializeOwned;
use tracing::*;

use crate::context::KmakeContext;

#[derive(Clone, Debug, Default, Parser)]
struct Options {
    /// Only watch and manage objects in this namespace (default: all namespaces)
    #[arg(long)]
    namespace: Option<String>,

    /// How often each KmakeNowScheduler re-scans for runs to start
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    scheduler_interval: Duration,

    #[arg(long)]
    json_logs: bool,

    /// Only act while holding the leader lease, so that replicas don't race each other
    #[arg(long)]
    enable_leader_election: bool,

    #[arg(long, default_value = "default")]
    leader_election_namespace: String,

    /// Where to serve /metrics and /healthz; "0" disables the endpoint
    #[arg(long, default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

fn scoped_api<K>(client: &kube::Client, opts: &Options) -> kube::Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
{
    match &opts.namespace {
        Some(ns) => kube::Api::namespaced(client.clone(), ns),
        None => kube::Api::all(client.clone()),
    }
}

async fn log_outcome<K: Resource<DynamicType = ()>, E: std::error::Error>(
    res: Result<(kube::runtime::reflector::ObjectRef<K>, kube::runtime::controller::Action), E>,
) {
    exporter::record_outcome(&K::kind(&()), res.is_ok());
    match res {
        Ok((obj, action)) => debug!("reconciled {obj}: {action:?}"),
        Err(err) => warn!("reconcile failed: {err}"),
    }
}

#[instrument(ret, err)]
async fn run(opts: Options) -> EmptyResult {
    let metrics_addr = exporter::parse_metrics_addr(&opts.metrics_addr)?;
    let recorder = PrometheusRecorder::new();
    recorder.install()?;

    let client = kube::Client::try_default().await?;
    let holder = leader::holder_identity();
    if opts.enable_leader_election {
        leader::acquire_leadership(&client, &opts.leader_election_namespace, &holder).await;
    }

    let (trigger_tx, trigger_rx) = futures::channel::mpsc::unbounded();
    let ctx = Arc::new(KmakeContext::new(client.clone(), opts.clone(), trigger_tx));
    let cfg = watcher::Config::default();

    let kmake_ctrl = Controller::new(scoped_api::<Kmake>(&client, &opts), cfg.clone())
        .owns(scoped_api::<corev1::ConfigMap>(&client, &opts), cfg.clone())
        .owns(scoped_api::<corev1::PersistentVolumeClaim>(&client, &opts), cfg.clone())
        .owns(scoped_api::<KmakeRun>(&client, &opts), cfg.clone())
        .reconcile_on(trigger_rx)
        .run(kmake::reconcile, lifecycle::error_policy, ctx.clone())
        .for_each(log_outcome);

    let run_ctrl = Controller::new(scoped_api::<KmakeRun>(&client, &opts), cfg.clone())
        .owns(scoped_api::<batchv1::Job>(&client, &opts), cfg.clone())
        .run(kmake_run::reconcile, lifecycle::error_policy, ctx.clone())
        .for_each(log_outcome);

    let schedule_run_ctrl = Controller::new(scoped_api::<KmakeScheduleRun>(&client, &opts), cfg.clone())
        .owns(scoped_api::<batchv1::Job>(&client, &opts), cfg.clone())
        .owns(scoped_api::<corev1::ConfigMap>(&client, &opts), cfg.clone())
        .run(schedule_run::reconcile, lifecycle::error_policy, ctx.clone())
        .for_each(log_outcome);

    let scheduler_ctrl = Controller::new(scoped_api::<KmakeNowScheduler>(&client, &opts), cfg.clone())
        .owns(scoped_api::<corev1::ConfigMap>(&client, &opts), cfg.clone())
        .owns(scoped_api::<KmakeScheduleRun>(&client, &opts), cfg)
        .run(now_scheduler::reconcile, now_scheduler::error_policy, ctx)
        .for_each(log_outcome);

    let controllers = async {
        futures::join!(kmake_ctrl, run_ctrl, schedule_run_ctrl, scheduler_ctrl);
        EmptyResult::Ok(())
    };

    let metrics_server = async {
        match metrics_addr {
            Some(addr) => exporter::build_server(addr, recorder)
                .launch()
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from),
            None => futures::future::pending::<EmptyResult>().await,
        }
    };

    // Losing the lease ends the process; a restarted replica goes back to waiting for it
    let leadership = async {
        if opts.enable_leader_election {
            leader::keep_leadership(&client, &opts.leader_election_namespace, &holder).await
        } else {
            futures::future::pending::<EmptyResult>().await
        }
    };

    info!("starting kmake controllers");
    tokio::select! {
        res = controllers => res,
        res = metrics_server => res,
        res = leadership => res,
    }
}

#[tokio::main]
async fn main() -> EmptyResult {
    let args = Options::parse();
    logging::setup(&args.verbosity, args.json_logs);
    run(args).await
}

#[cfg(test)]
mod tests;
