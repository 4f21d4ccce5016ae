use assertables::*;
use kube::runtime::controller::Action;

use super::*;
use crate::lifecycle::*;
use crate::schedule_run::{
    reconcile_schedule_run,
    sibling_selector,
};

fn kmsr_obj_path() -> String {
    format!("{}/{TEST_SCHEDULE_RUN}", kmake_path("kmakescheduleruns"))
}

fn with_operation(mut kmsr: KmakeScheduleRun, op: KmakeScheduleRunOperation) -> KmakeScheduleRun {
    kmsr.spec.operation = Some(op);
    kmsr
}

fn handle_run_and_kmake(fake_apiserver: &mut MockServerBuilder, run: KmakeRun, kmake: Kmake) {
    fake_apiserver
        .handle(move |when, then| {
            when.method(GET).path(format!("{}/{TEST_RUN}", kmake_path("kmakeruns")));
            then.json_body_obj(&run);
        })
        .handle(move |when, then| {
            when.method(GET).path(format!("{}/{TEST_KMAKE}", kmake_path("kmakes")));
            then.json_body_obj(&kmake);
        });
}

#[rstest]
#[case::one_run(
    Some(TEST_RUN),
    Some(WORKLOAD_NO),
    "bythepowerof.github.io/schedule-instance=test-scheduler,bythepowerof.github.io/run=test-run,bythepowerof.github.io/workload=no"
)]
#[case::workloads(
    None,
    Some(WORKLOAD_YES),
    "bythepowerof.github.io/schedule-instance=test-scheduler,bythepowerof.github.io/workload=yes"
)]
#[case::everything(None, None, "bythepowerof.github.io/schedule-instance=test-scheduler")]
fn test_sibling_selector(#[case] run: Option<&str>, #[case] workload: Option<&str>, #[case] expected: &str) {
    assert_eq!(sibling_selector(TEST_SCHEDULER, run, workload), expected);
}

#[rstest]
#[tokio::test]
async fn test_reconcile_unknown_operation(mut test_schedule_run: KmakeScheduleRun) {
    test_schedule_run.spec.operation = None;
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_writes(&mut fake_apiserver, kmsr_obj_path(), &test_schedule_run.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_schedule_run(&ctx, &mut test_schedule_run).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(test_schedule_run.status.as_ref().unwrap().status, "Error Runs (Unknown operation)");
    assert!(test_schedule_run.has_ended());
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_start_no_run_label(mut test_schedule_run: KmakeScheduleRun) {
    test_schedule_run.labels_mut().remove(RUN_LABEL_KEY);
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_writes(&mut fake_apiserver, kmsr_obj_path(), &test_schedule_run.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    reconcile_schedule_run(&ctx, &mut test_schedule_run).await.unwrap();
    assert_eq!(test_schedule_run.status.as_ref().unwrap().status, "Error Runs (No kmakerun set)");
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_start_run_gone(mut test_schedule_run: KmakeScheduleRun) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_not_found(format!("{}/{TEST_RUN}", kmake_path("kmakeruns")));
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_schedule_run(&ctx, &mut test_schedule_run).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_none!(test_schedule_run.status);
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_start_kmake_missing(mut test_schedule_run: KmakeScheduleRun, test_run: KmakeRun) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver
        .handle(move |when, then| {
            when.method(GET).path(format!("{}/{TEST_RUN}", kmake_path("kmakeruns")));
            then.json_body_obj(&test_run);
        })
        .handle_not_found(format!("{}/{TEST_KMAKE}", kmake_path("kmakes")));
    handle_writes(&mut fake_apiserver, kmsr_obj_path(), &test_schedule_run.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_schedule_run(&ctx, &mut test_schedule_run).await.unwrap();
    assert_eq!(action, Action::requeue(REQUEUE_BACKOFF));
    assert_eq!(test_schedule_run.label(STATUS_LABEL_KEY), Some("BackOff"));
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_start_dummy(
    mut test_schedule_run: KmakeScheduleRun,
    mut test_run: KmakeRun,
    test_kmake_ready: Kmake,
) {
    test_run.spec.operation = Some(KmakeRunOperation::Dummy(KmakeRunDummy {}));
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_run_and_kmake(&mut fake_apiserver, test_run, test_kmake_ready);
    handle_writes(&mut fake_apiserver, kmsr_obj_path(), &test_schedule_run.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_schedule_run(&ctx, &mut test_schedule_run).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(test_schedule_run.status.as_ref().unwrap().status, format!("Success Dummy ({TEST_RUN})"));
    assert!(test_schedule_run.has_ended());
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_start_job(mut test_schedule_run: KmakeScheduleRun, test_run: KmakeRun, test_kmake_ready: Kmake) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_run_and_kmake(&mut fake_apiserver, test_run, test_kmake_ready);

    let lineage = corev1::ConfigMap {
        metadata: metav1::ObjectMeta {
            name: Some(TEST_LINEAGE_MAP.into()),
            namespace: Some(TEST_NAMESPACE.into()),
            ..Default::default()
        },
        ..Default::default()
    };
    fake_apiserver
        .handle(move |when, then| {
            when.method(POST).path(core_path("configmaps"));
            then.json_body_obj(&lineage);
        })
        .handle(|when, then| {
            when.method(POST).path(batch_path("jobs"));
            then.json_body_obj(&test_job(0, 0, 0));
        });

    // Provision Owner, then Provision Job
    handle_writes(&mut fake_apiserver, kmsr_obj_path(), &test_schedule_run.clone(), 2, 2);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_schedule_run(&ctx, &mut test_schedule_run).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(test_schedule_run.child(SubResourceKind::Owner), Some(TEST_LINEAGE_MAP));
    assert_eq!(test_schedule_run.child(SubResourceKind::Job), Some(TEST_JOB));
    assert!(!test_schedule_run.has_ended());
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_start_tracks_job(mut test_schedule_run: KmakeScheduleRun, test_run: KmakeRun) {
    test_schedule_run
        .kmake_status_mut()
        .apply(Phase::Provision, SubResourceKind::Job, Some(TEST_JOB));
    test_schedule_run.sync_status_metadata().unwrap();
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver
        .handle(move |when, then| {
            when.method(GET).path(format!("{}/{TEST_RUN}", kmake_path("kmakeruns")));
            then.json_body_obj(&test_run);
        })
        .handle(|when, then| {
            when.method(GET).path(format!("{}/{TEST_JOB}", batch_path("jobs")));
            then.json_body_obj(&test_job(0, 1, 0));
        });
    handle_writes(&mut fake_apiserver, kmsr_obj_path(), &test_schedule_run.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    reconcile_schedule_run(&ctx, &mut test_schedule_run).await.unwrap();
    assert_eq!(test_schedule_run.phase(), Some(Phase::Success));
    assert!(test_schedule_run.has_ended());
    fake_apiserver.assert();
}

#[rstest]
#[case::restart(
    KmakeScheduleRunOperation::Restart(KmakeScheduleRunRestart { run: None }),
    WORKLOAD_NO,
    "Restart"
)]
#[case::stop(
    KmakeScheduleRunOperation::Stop(KmakeScheduleRunStop { run: Some(TEST_RUN.into()) }),
    WORKLOAD_YES,
    "Stop"
)]
#[tokio::test]
async fn test_reconcile_sweep_run(
    test_schedule_run: KmakeScheduleRun,
    #[case] op: KmakeScheduleRunOperation,
    #[case] workload: &'static str,
    #[case] phase: &str,
) {
    let mut kmsr = with_operation(test_schedule_run, op);
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle(move |when, then| {
        when.method(DELETE)
            .path(kmake_path("kmakescheduleruns"))
            .query_param("labelSelector", sibling_selector(TEST_SCHEDULER, Some(TEST_RUN), Some(workload)))
            .query_param("fieldSelector", format!("metadata.name!={TEST_SCHEDULE_RUN}"));
        then.json_body(list_body::<KmakeScheduleRun>(&[]));
    });
    handle_writes(&mut fake_apiserver, kmsr_obj_path(), &kmsr.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_schedule_run(&ctx, &mut kmsr).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(kmsr.status.as_ref().unwrap().status, format!("{phase} Runs ({TEST_SCHEDULE_RUN})"));
    assert!(kmsr.has_ended());
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_stop_no_instance(test_schedule_run: KmakeScheduleRun) {
    let mut kmsr = with_operation(test_schedule_run, KmakeScheduleRunOperation::Stop(Default::default()));
    kmsr.labels_mut().remove(SCHEDULE_INSTANCE_LABEL_KEY);
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_writes(&mut fake_apiserver, kmsr_obj_path(), &kmsr.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    reconcile_schedule_run(&ctx, &mut kmsr).await.unwrap();
    assert_eq!(kmsr.status.as_ref().unwrap().status, "Error Runs (No scheduler set)");
    fake_apiserver.assert();
}

#[rstest]
#[case::nothing_found(false, vec![], "Delete Runs (No resources found)")]
#[case::swept(false, vec![km_testutils::test_schedule_run()], "Delete Runs")]
#[case::full_nothing_found(true, vec![], "Delete Runs (No resources found)")]
#[case::full_swept(true, vec![km_testutils::test_schedule_run()], "Delete Runs")]
#[tokio::test]
async fn test_reconcile_reset(
    test_schedule_run: KmakeScheduleRun,
    #[case] full: bool,
    #[case] deleted: Vec<KmakeScheduleRun>,
    #[case] expected: &str,
) {
    let reset = KmakeScheduleRunOperation::Reset(KmakeScheduleRunReset { recurse: false, full });
    let mut kmsr = with_operation(test_schedule_run, reset);
    // A full reset sweeps every run under the scheduler, not just the workloads
    let selector = if full {
        sibling_selector(TEST_SCHEDULER, None, None)
    } else {
        sibling_selector(TEST_SCHEDULER, None, Some(WORKLOAD_YES))
    };
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle(move |when, then| {
        when.method(DELETE)
            .path(kmake_path("kmakescheduleruns"))
            .query_param("labelSelector", &selector);
        then.json_body(list_body(&deleted));
    });
    handle_writes(&mut fake_apiserver, kmsr_obj_path(), &kmsr.clone(), 1, 1);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    reconcile_schedule_run(&ctx, &mut kmsr).await.unwrap();
    assert_eq!(kmsr.status.as_ref().unwrap().status, expected);
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_reset_only_once(test_schedule_run: KmakeScheduleRun) {
    let mut kmsr = with_operation(test_schedule_run, KmakeScheduleRunOperation::Reset(Default::default()));
    kmsr.kmake_status_mut().apply(Phase::Delete, SubResourceKind::Runs, None);
    kmsr.sync_status_metadata().unwrap();
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_schedule_run(&ctx, &mut kmsr).await.unwrap();
    assert_eq!(action, Action::await_change());
    fake_apiserver.assert();
}

#[rstest]
#[case::delete(KmakeScheduleRunOperation::Delete(Default::default()))]
#[case::create(KmakeScheduleRunOperation::Create(Default::default()))]
#[case::force(KmakeScheduleRunOperation::Force(Default::default()))]
#[tokio::test]
async fn test_reconcile_reserved_operations(test_schedule_run: KmakeScheduleRun, #[case] op: KmakeScheduleRunOperation) {
    let mut kmsr = with_operation(test_schedule_run, op);
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_schedule_run(&ctx, &mut kmsr).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_none!(kmsr.status);
    fake_apiserver.assert();
}

#[rstest]
#[tokio::test]
async fn test_reconcile_schedule_run_deleted(mut test_schedule_run: KmakeScheduleRun) {
    mark_deleted(&mut test_schedule_run.metadata);
    let (mut fake_apiserver, client) = make_fake_apiserver();
    handle_writes(&mut fake_apiserver, kmsr_obj_path(), &test_schedule_run.clone(), 1, 2);
    fake_apiserver.build();
    let ctx = test_ctx(client);

    let action = reconcile_schedule_run(&ctx, &mut test_schedule_run).await.unwrap();
    assert_eq!(action, Action::await_change());
    fake_apiserver.assert();
}
