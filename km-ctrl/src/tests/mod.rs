mod kmake_run_test;
mod schedule_run_test;

use futures::channel::mpsc::{
    UnboundedReceiver,
    unbounded,
};
// can't import prelude because that doesn't include "PATCH" for some reason
use httpmock::Method::*;
use km_testutils::*;
use kube::runtime::reflector::ObjectRef;
use rstest::*;
use serde::Serialize;

use super::*;

fn test_ctx(client: kube::Client) -> KmakeContext {
    let opts = Options { scheduler_interval: Duration::from_secs(10), ..Default::default() };
    KmakeContext::new(client, opts, unbounded().0)
}

fn test_ctx_with_trigger(client: kube::Client) -> (KmakeContext, UnboundedReceiver<ObjectRef<Kmake>>) {
    let (tx, rx) = unbounded();
    (KmakeContext::new(client, Default::default(), tx), rx)
}

fn job_request(run: &KmakeRun) -> KmakeRunJob {
    match &run.spec.operation {
        Some(KmakeRunOperation::Job(job)) => job.clone(),
        _ => panic!("test run is not a job"),
    }
}

// Every recorded transition is a status write followed by a metadata write on the object itself
fn handle_writes<K: Serialize>(
    fake_apiserver: &mut MockServerBuilder,
    path: String,
    obj: &K,
    status_hits: usize,
    object_hits: usize,
) {
    let status_path = format!("{path}/status");
    let status_body = serde_json::to_value(obj).unwrap();
    let object_body = status_body.clone();
    fake_apiserver
        .handle_multiple(status_hits, move |when, then| {
            when.method(PATCH).path(&status_path);
            then.json_body(status_body.clone());
        })
        .handle_multiple(object_hits, move |when, then| {
            when.method(PATCH).path(&path);
            then.json_body(object_body.clone());
        });
}
