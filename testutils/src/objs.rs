use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use km_api::v1::*;
use rstest::fixture;

use crate::constants::*;

fn test_meta(name: &str, finalizer: &str, labels: &[(&str, &str)]) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        namespace: Some(TEST_NAMESPACE.into()),
        name: Some(name.into()),
        uid: Some(format!("{name}-uid")),
        resource_version: Some(TEST_RESOURCE_VERSION.into()),
        finalizers: Some(vec![finalizer.into()]),
        labels: (!labels.is_empty()).then(|| labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        ..Default::default()
    }
}

pub fn test_pod_template() -> corev1::PodTemplateSpec {
    corev1::PodTemplateSpec {
        spec: Some(corev1::PodSpec {
            containers: vec![corev1::Container {
                name: "make".into(),
                image: Some(TEST_IMAGE.into()),
                command: Some(vec!["make".into()]),
                args: Some(vec!["-f".into(), "/usr/share/kmake/kmake.mk".into()]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[fixture]
pub fn test_kmake() -> Kmake {
    let mut kmake = Kmake::new(
        TEST_KMAKE,
        KmakeSpec {
            variables: BTreeMap::from([("FOO".into(), "bar".into())]),
            rules: vec![KmakeRule {
                targets: vec!["all".into()],
                commands: vec!["@echo $(FOO)".into()],
                ..Default::default()
            }],
            storage_template: corev1::PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".into()]),
                resources: Some(corev1::VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".into(), Quantity("1Gi".into()))])),
                    ..Default::default()
                }),
                ..Default::default()
            },
            job_template: batchv1::JobTemplateSpec {
                spec: Some(batchv1::JobSpec { template: test_pod_template(), ..Default::default() }),
                ..Default::default()
            },
        },
    );
    kmake.metadata = test_meta(TEST_KMAKE, KMAKE_FINALIZER, &[]);
    kmake
}

/// A Kmake whose env, rule and storage children have all been provisioned.
#[fixture]
pub fn test_kmake_ready(test_kmake: Kmake) -> Kmake {
    let mut kmake = test_kmake;
    let status = kmake.kmake_status_mut();
    status.resources.insert(SubResourceKind::EnvMap, TEST_ENV_MAP.into());
    status.resources.insert(SubResourceKind::KmakeMap, TEST_RULES_MAP.into());
    status.resources.insert(SubResourceKind::Pvc, TEST_PVC.into());
    status.apply(Phase::Ready, SubResourceKind::Main, None);
    kmake.sync_status_metadata().unwrap();
    kmake
}

#[fixture]
pub fn test_run() -> KmakeRun {
    let mut run = KmakeRun::new(
        TEST_RUN,
        KmakeRunSpec {
            operation: Some(KmakeRunOperation::Job(KmakeRunJob {
                targets: vec!["all".into()],
                ..Default::default()
            })),
        },
    );
    run.metadata = test_meta(TEST_RUN, KMAKE_RUN_FINALIZER, &[(KMAKE_LABEL_KEY, TEST_KMAKE)]);
    run
}

/// A run that is already owned by (and registered with) the test Kmake.
#[fixture]
pub fn test_run_registered(test_run: KmakeRun, test_kmake: Kmake) -> KmakeRun {
    let mut run = test_run;
    run.metadata.owner_references = Some(vec![metav1::OwnerReference {
        api_version: "bythepowerof.github.com/v1".into(),
        kind: "Kmake".into(),
        name: TEST_KMAKE.into(),
        uid: test_kmake.metadata.uid.unwrap(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]);
    run.kmake_status_mut().apply(Phase::Wait, SubResourceKind::Kmake, Some(TEST_KMAKE));
    run.sync_status_metadata().unwrap();
    run
}

#[fixture]
pub fn test_schedule_run() -> KmakeScheduleRun {
    let mut kmsr = KmakeScheduleRun::new(TEST_SCHEDULE_RUN, KmakeScheduleRunSpec::start());
    kmsr.metadata = test_meta(
        TEST_SCHEDULE_RUN,
        KMAKE_SCHEDULE_RUN_FINALIZER,
        &[
            (KMAKE_LABEL_KEY, TEST_KMAKE),
            (RUN_LABEL_KEY, TEST_RUN),
            (SCHEDULE_INSTANCE_LABEL_KEY, TEST_SCHEDULER),
            (SCHEDULE_ENV_LABEL_KEY, TEST_SCHEDULE_ENV_MAP),
            (WORKLOAD_LABEL_KEY, WORKLOAD_YES),
        ],
    );
    kmsr
}

#[fixture]
pub fn test_scheduler() -> KmakeNowScheduler {
    let mut scheduler = KmakeNowScheduler::new(
        TEST_SCHEDULER,
        KmakeNowSchedulerSpec {
            variables: BTreeMap::from([("WHEN".into(), "now".into())]),
            monitor: vec![TEST_MONITOR_TAG.into()],
        },
    );
    scheduler.metadata = test_meta(TEST_SCHEDULER, KMAKE_NOW_SCHEDULER_FINALIZER, &[]);
    scheduler
}

pub fn test_job(active: i32, succeeded: i32, failed: i32) -> batchv1::Job {
    batchv1::Job {
        metadata: metav1::ObjectMeta {
            namespace: Some(TEST_NAMESPACE.into()),
            name: Some(TEST_JOB.into()),
            ..Default::default()
        },
        status: Some(batchv1::JobStatus {
            active: Some(active),
            succeeded: Some(succeeded),
            failed: Some(failed),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn mark_deleted(meta: &mut metav1::ObjectMeta) {
    meta.deletion_timestamp = Some(serde_json::from_value(serde_json::json!("2025-01-01T00:00:00Z")).unwrap());
}
