use assertables::*;
use kube::runtime::controller::Action;

use super::*;
use crate::kmake_run::{
    is_owned_by,
    reconcile_run,
};
use crate::lifecycle::*;

fn run_obj_path() -> String {
    format!("{}/{TEST_RUN}", kmake_path("kmakeruns"))
}

fn handle_kmake(fake_apiserver: &mut MockServerBuilder, kmake: Kmake) {
    fake_apiserver.handle(move |when, then| {
        when.method(GET).path(format!("{}/{TEST_KMAKE}", kmake_path("kmakes")));
        then.json_body_obj(&kmake);
    });
}

#[rstest]
fn test_is_owned_by(test_run: KmakeRun, test_run_registered: KmakeRun, test_kmake: Kmake) {
    assert!(!is_owned_by(&test_run, &test_kmake));
    assert!(is_owned_by(&test_run_registered, &test_kmake));

    let mut other = test_kmake.clone();
    other.metadata.uid = Some("some-other-uid".into());
    assert!(!is_owned_by(&test_run_registered, &other));
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_no_kmake_label(mut test_run: KmakeRun) {
    test_run.metadata.labels = None;
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_writes(&mut fake_apiserver, run_obj_path(), &test_run.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(test_run.status.as_ref().unwrap().status, "Error Kmake (No kmake set)");
    assert!(test_run.has_ended());
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_kmake_missing(mut test_run: KmakeRun) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_not_found(format!("{}/{TEST_KMAKE}", kmake_path("kmakes")));
    handle_writes(&mut fake_apiserver, run_obj_path(), &test_run.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run).await.unwrap();
    assert_eq!(action, Action::requeue(REQUEUE_BACKOFF));
    assert_eq!(test_run.phase(), Some(Phase::BackOff));
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_attaches_owner(mut test_run: KmakeRun, test_kmake: Kmake, test_run_registered: KmakeRun) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake.clone());

    let mut owned = test_run_registered.clone();
    owned.status = None;

    // One write for the owner reference, one for the Update transition
    handle_writes(&mut fake_apiserver, run_obj_path(), &owned, 1, 2);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(is_owned_by(&test_run, &test_kmake));
    assert_eq!(test_run.status.as_ref().unwrap().status, format!("Update Kmake ({TEST_KMAKE})"));
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_new_registers_with_kmake(test_run_registered: KmakeRun, test_kmake: Kmake) {
    let mut run = test_run_registered;
    run.status = None;
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake);
    handle_writes(&mut fake_apiserver, run_obj_path(), &run.clone(), 1, 1);
    fake_apiserver.build();
    let (ctx, mut trigger) = test_ctx_with_trigger(client);

    let action = reconcile_run(&ctx, &mut run).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(run.child(SubResourceKind::Kmake), Some(TEST_KMAKE));
    assert!(!run.is_new());

    let triggered = trigger.next().await.unwrap();
    assert_eq!(triggered.name, TEST_KMAKE);
    assert_eq!(triggered.namespace.as_deref(), Some(TEST_NAMESPACE));
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_kmake_not_provisioned(mut test_run_registered: KmakeRun, test_kmake: Kmake) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake);
    handle_writes(&mut fake_apiserver, run_obj_path(), &test_run_registered.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run_registered).await.unwrap();
    assert_eq!(action, Action::requeue(REQUEUE_BACKOFF));
    assert_eq!(test_run_registered.status.as_ref().unwrap().status, format!("BackOff PVC ({TEST_KMAKE})"));
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_launches_job(mut test_run_registered: KmakeRun, test_kmake_ready: Kmake) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake_ready);
    fake_apiserver.handle(|when, then| {
        when.method(POST).path(batch_path("jobs"));
        then.json_body_obj(&test_job(0, 0, 0));
    });
    handle_writes(&mut fake_apiserver, run_obj_path(), &test_run_registered.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run_registered).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(test_run_registered.child(SubResourceKind::Job), Some(TEST_JOB));
    assert!(test_run_registered.is_active());
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_scheduler_tagged_no_job(mut test_run_registered: KmakeRun, test_kmake_ready: Kmake) {
    test_run_registered
        .labels_mut()
        .insert(SCHEDULER_LABEL_KEY.into(), TEST_MONITOR_TAG.into());
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake_ready);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run_registered).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_none!(test_run_registered.child(SubResourceKind::Job));
    assert_eq!(test_run_registered.phase(), Some(Phase::Wait));
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_job_create_fails(mut test_run_registered: KmakeRun, test_kmake_ready: Kmake) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake_ready);
    fake_apiserver.handle(|when, then| {
        when.method(POST).path(batch_path("jobs"));
        then.status(403).json_body(serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "reason": "Forbidden",
            "code": 403
        }));
    });
    handle_writes(&mut fake_apiserver, run_obj_path(), &test_run_registered.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    assert!(reconcile_run(&ctx, &mut test_run_registered).await.is_err());
    assert_eq!(test_run_registered.status.as_ref().unwrap().status, "Error Job (test-run-job-)");
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_dummy(mut test_run_registered: KmakeRun, test_kmake: Kmake) {
    test_run_registered.spec.operation = Some(KmakeRunOperation::Dummy(KmakeRunDummy {}));
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake);
    handle_writes(&mut fake_apiserver, run_obj_path(), &test_run_registered.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run_registered).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(test_run_registered.status.as_ref().unwrap().status, format!("Success Dummy ({TEST_RUN})"));
    assert!(test_run_registered.has_ended());
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_unknown_operation(mut test_run_registered: KmakeRun, test_kmake: Kmake) {
    test_run_registered.spec.operation = None;
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake);
    handle_writes(&mut fake_apiserver, run_obj_path(), &test_run_registered.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    reconcile_run(&ctx, &mut test_run_registered).await.unwrap();
    assert_eq!(test_run_registered.status.as_ref().unwrap().status, "Error Main (Unknown operation)");
    fake_apiserver.assert();
}

#[rstest]
#[case::active(test_job(1, 0, 0), Some(Phase::Active), Action::requeue(REQUEUE_JOB_POLL))]
#[case::succeeded(test_job(0, 1, 0), Some(Phase::Success), Action::await_change())]
#[case::failed(test_job(0, 0, 1), Some(Phase::Error), Action::await_change())]
#[case::pending(test_job(0, 0, 0), None, Action::requeue(REQUEUE_JOB_POLL))]
#[tokio::test]
async fn test_reconcile_run_tracks_job(
    mut test_run_registered: KmakeRun,
    test_kmake_ready: Kmake,
    #[case] job: batchv1::Job,
    #[case] expected_phase: Option<Phase>,
    #[case] expected_action: Action,
) {
    test_run_registered
        .kmake_status_mut()
        .apply(Phase::Provision, SubResourceKind::Job, Some(TEST_JOB));
    test_run_registered.sync_status_metadata().unwrap();
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake_ready);
    fake_apiserver.handle(move |when, then| {
        when.method(GET).path(format!("{}/{TEST_JOB}", batch_path("jobs")));
        then.json_body_obj(&job);
    });

    let writes = expected_phase.map_or(0, |_| 1);
    handle_writes(&mut fake_apiserver, run_obj_path(), &test_run_registered.clone(), writes, writes);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run_registered).await.unwrap();
    assert_eq!(action, expected_action);
    assert_eq!(test_run_registered.phase(), expected_phase.or(Some(Phase::Provision)));
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_job_disappeared(mut test_run_registered: KmakeRun, test_kmake_ready: Kmake) {
    test_run_registered
        .kmake_status_mut()
        .apply(Phase::Active, SubResourceKind::Job, Some(TEST_JOB));
    test_run_registered
        .kmake_status_mut()
        .resources
        .insert(SubResourceKind::Job, TEST_JOB.into());
    test_run_registered.sync_status_metadata().unwrap();
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake_ready);
    fake_apiserver.handle_not_found(format!("{}/{TEST_JOB}", batch_path("jobs")));
    handle_writes(&mut fake_apiserver, run_obj_path(), &test_run_registered.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run_registered).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(test_run_registered.phase(), Some(Phase::Abort));
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_ended_is_noop(mut test_run_registered: KmakeRun, test_kmake: Kmake) {
    test_run_registered
        .kmake_status_mut()
        .apply(Phase::Success, SubResourceKind::Job, Some(TEST_JOB));
    test_run_registered.sync_status_metadata().unwrap();
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_kmake(&mut fake_apiserver, test_kmake);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run_registered).await.unwrap();
    assert_eq!(action, Action::await_change());
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_run_deleted(mut test_run_registered: KmakeRun) {
    mark_deleted(&mut test_run_registered.metadata);
    let (mut fake_apiserver, client) = make_fake_apiserver();

    // Delete Main, then the finalizer goes
    handle_writes(&mut fake_apiserver, run_obj_path(), &test_run_registered.clone(), 1, 2);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_run(&ctx, &mut test_run_registered).await.unwrap();
    assert_eq!(action, Action::await_change());
    fake_apiserver.assert();
}
