use std::collections::BTreeMap;

use km_core::k8s::build_child_meta;
use km_core::prelude::*;
use kube::Resource;
use serde_json::json;

use crate::errors::*;
use crate::lineage::lineage_owners;

type VolumeInfo = (corev1::VolumeMount, corev1::Volume);

pub(crate) fn build_env_configmap<K>(owner: &K, variables: &BTreeMap<String, String>) -> anyhow::Result<corev1::ConfigMap>
where
    K: Resource<DynamicType = ()>,
{
    Ok(corev1::ConfigMap {
        metadata: build_child_meta(owner, ENV_MAP_SUFFIX)?,
        data: Some(variables.clone()),
        ..Default::default()
    })
}

pub(crate) fn build_rules_configmap(kmake: &Kmake) -> anyhow::Result<corev1::ConfigMap> {
    let rules = json!({"rules": &kmake.spec.rules});
    let data = BTreeMap::from([
        (RULES_YAML_KEY.into(), serde_yaml::to_string(&rules)?),
        (RULES_JSON_KEY.into(), serde_json::to_string(&rules)?),
        (RULES_MAKEFILE_KEY.into(), kmake.spec.to_makefile()),
    ]);

    Ok(corev1::ConfigMap {
        metadata: build_child_meta(kmake, RULES_MAP_SUFFIX)?,
        data: Some(data),
        ..Default::default()
    })
}

pub(crate) fn build_storage_claim(kmake: &Kmake) -> anyhow::Result<corev1::PersistentVolumeClaim> {
    Ok(corev1::PersistentVolumeClaim {
        metadata: build_child_meta(kmake, PVC_SUFFIX)?,
        spec: Some(kmake.spec.storage_template.clone()),
        ..Default::default()
    })
}

pub(crate) fn configmap_differs(current: &corev1::ConfigMap, desired: &corev1::ConfigMap) -> bool {
    let empty = BTreeMap::new();
    current.data.as_ref().unwrap_or(&empty) != desired.data.as_ref().unwrap_or(&empty) || !current.labels_match(desired)
}

// Only the requested resources are compared; everything else in a claim spec is either immutable
// or filled in by the apiserver.
pub(crate) fn claim_differs(current: &corev1::PersistentVolumeClaim, desired: &corev1::PersistentVolumeClaim) -> bool {
    let resources = |pvc: &corev1::PersistentVolumeClaim| pvc.spec.as_ref().and_then(|s| s.resources.clone());
    resources(current) != resources(desired) || !current.labels_match(desired)
}

pub(crate) fn is_claim_bound(pvc: &corev1::PersistentVolumeClaim) -> bool {
    pvc.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(PVC_BOUND_PHASE)
}

fn configmap_volume(volume_name: &str, cm_name: &str, path: &str) -> VolumeInfo {
    (
        corev1::VolumeMount {
            name: volume_name.into(),
            mount_path: path.into(),
            ..Default::default()
        },
        corev1::Volume {
            name: volume_name.into(),
            config_map: Some(corev1::ConfigMapVolumeSource { name: cm_name.into(), ..Default::default() }),
            ..Default::default()
        },
    )
}

fn claim_volume(volume_name: &str, claim_name: &str, path: &str) -> VolumeInfo {
    (
        corev1::VolumeMount {
            name: volume_name.into(),
            mount_path: path.into(),
            ..Default::default()
        },
        corev1::Volume {
            name: volume_name.into(),
            persistent_volume_claim: Some(corev1::PersistentVolumeClaimVolumeSource {
                claim_name: claim_name.into(),
                ..Default::default()
            }),
            ..Default::default()
        },
    )
}

fn env_from_configmap(cm_name: &str) -> corev1::EnvFromSource {
    corev1::EnvFromSource {
        config_map_ref: Some(corev1::ConfigMapEnvSource { name: cm_name.into(), ..Default::default() }),
        ..Default::default()
    }
}

fn kmake_child<'a>(kmake: &'a Kmake, kind: SubResourceKind) -> anyhow::Result<&'a str> {
    kmake
        .child(kind)
        .ok_or_else(|| KmakeControllerError::missing_child(&format!("{} {kind}", kmake.namespaced_name())))
}

/// Layer a run's job request on top of a pod template and wire in the Kmake's children.
///
/// The template is the run's own if it has one, otherwise the Kmake's job template.  Image,
/// command and args overrides apply to the first container, and the run's targets are appended to
/// its args.  Every job gets the env configmap (as files and as environment), the storage claim,
/// and the rendered rules; `extra_volumes` and `extra_env` add anything caller-specific on top.
fn assemble_job(
    metadata: metav1::ObjectMeta,
    kmake: &Kmake,
    request: &KmakeRunJob,
    extra_volumes: Vec<VolumeInfo>,
    extra_env: Vec<String>,
) -> anyhow::Result<batchv1::Job> {
    let env_map = kmake_child(kmake, SubResourceKind::EnvMap)?;
    let rules_map = kmake_child(kmake, SubResourceKind::KmakeMap)?;
    let claim = kmake_child(kmake, SubResourceKind::Pvc)?;

    let mut spec = match &request.template {
        Some(template) => batchv1::JobSpec { template: template.clone(), ..Default::default() },
        None => kmake.spec.job_template.spec.clone().unwrap_or_default(),
    };

    let mut volumes = vec![
        configmap_volume(ENV_VOLUME_NAME, env_map, ENV_MOUNT_PATH),
        claim_volume(PVC_VOLUME_NAME, claim, PVC_MOUNT_PATH),
        configmap_volume(RULES_VOLUME_NAME, rules_map, RULES_MOUNT_PATH),
    ];
    volumes.extend(extra_volumes);

    let job_name = metadata.generate_name.clone().unwrap_or_default();
    let pod_spec = spec.template.spec.get_or_insert_default();
    let container = pod_spec
        .containers
        .first_mut()
        .ok_or_else(|| KmakeControllerError::missing_container(&job_name))?;

    if let Some(image) = &request.image {
        container.image = Some(image.clone());
    }
    if let Some(command) = &request.command {
        container.command = Some(command.clone());
    }
    if let Some(args) = &request.args {
        container.args = Some(args.clone());
    }
    container.args.get_or_insert_default().extend(request.targets.iter().cloned());

    let env_from = container.env_from.get_or_insert_default();
    env_from.push(env_from_configmap(env_map));
    env_from.extend(extra_env.iter().map(|cm| env_from_configmap(cm)));

    for (mount, volume) in volumes {
        container.volume_mounts.get_or_insert_default().push(mount);
        pod_spec.volumes.get_or_insert_default().push(volume);
    }

    if pod_spec.restart_policy.is_none() {
        pod_spec.restart_policy = Some(DEFAULT_RESTART_POLICY.into());
    }

    Ok(batchv1::Job { metadata, spec: Some(spec), ..Default::default() })
}

pub(crate) fn build_run_job(run: &KmakeRun, kmake: &Kmake, request: &KmakeRunJob) -> anyhow::Result<batchv1::Job> {
    let mut metadata = build_child_meta(run, JOB_SUFFIX)?;
    metadata.labels.get_or_insert_default().insert(RUN_LABEL_KEY.into(), run.name_any());
    assemble_job(metadata, kmake, request, vec![], vec![])
}

pub(crate) fn build_start_job(
    kmsr: &KmakeScheduleRun,
    run: &KmakeRun,
    kmake: &Kmake,
    request: &KmakeRunJob,
    lineage_map: &str,
) -> anyhow::Result<batchv1::Job> {
    let mut metadata = build_child_meta(kmsr, JOB_SUFFIX)?;
    metadata.owner_references = Some(lineage_owners(kmsr, run, kmake)?);
    let labels = metadata.labels.get_or_insert_default();
    labels.insert(RUN_LABEL_KEY.into(), run.name_any());
    labels.insert(SCHEDULE_RUN_LABEL_KEY.into(), kmsr.name_any());

    let mut extra_volumes = vec![configmap_volume(LINEAGE_VOLUME_NAME, lineage_map, LINEAGE_MOUNT_PATH)];
    let mut extra_env = vec![];
    if let Some(schedule_env) = kmsr.schedule_env() {
        extra_volumes.push(configmap_volume(SCHEDULE_ENV_VOLUME_NAME, schedule_env, SCHEDULE_ENV_MOUNT_PATH));
        extra_env.push(schedule_env.to_string());
    }

    assemble_job(metadata, kmake, request, extra_volumes, extra_env)
}

pub(crate) fn build_start_command(
    scheduler: &KmakeNowScheduler,
    env_map: &str,
    kmake_name: &str,
    run_name: &str,
) -> anyhow::Result<KmakeScheduleRun> {
    let mut metadata = build_child_meta(scheduler, SCHEDULE_RUN_SUFFIX)?;
    let labels = metadata.labels.get_or_insert_default();
    labels.insert(KMAKE_LABEL_KEY.into(), kmake_name.into());
    labels.insert(SCHEDULE_INSTANCE_LABEL_KEY.into(), scheduler.name_any());
    labels.insert(SCHEDULE_ENV_LABEL_KEY.into(), env_map.into());
    labels.insert(RUN_LABEL_KEY.into(), run_name.into());
    labels.insert(WORKLOAD_LABEL_KEY.into(), WORKLOAD_YES.into());
    labels.insert(STATUS_LABEL_KEY.into(), Phase::Provision.to_string());

    Ok(KmakeScheduleRun {
        metadata,
        spec: KmakeScheduleRunSpec::start(),
        status: None,
    })
}

pub(crate) fn run_manifests(runs: &[KmakeRun]) -> BTreeMap<String, KmakeRunManifest> {
    runs.iter()
        .map(|run| {
            let manifest = KmakeRunManifest {
                schedule_run_name: None,
                run_phase: run.phase(),
                kmake_name: run.kmake_name().map(Into::into),
                run_type: run.spec.operation.as_ref().map(|op| op.as_str().into()),
            };
            (run.name_any(), manifest)
        })
        .collect()
}

/// Index schedule-runs by the run they refer to.  Several commands can name the same run; the
/// start command wins, otherwise the last one listed does.
pub(crate) fn schedule_run_manifests(kmsrs: &[KmakeScheduleRun]) -> BTreeMap<String, KmakeRunManifest> {
    let mut manifests: BTreeMap<String, (bool, KmakeRunManifest)> = BTreeMap::new();
    for kmsr in kmsrs {
        let Some(run_name) = kmsr.run_name() else { continue };
        if let Some((true, _)) = manifests.get(run_name)
            && !kmsr.is_start()
        {
            continue;
        }

        let manifest = KmakeRunManifest {
            schedule_run_name: Some(kmsr.name_any()),
            run_phase: kmsr.phase(),
            kmake_name: kmsr.kmake_name().map(Into::into),
            run_type: kmsr.spec.operation.as_ref().map(|op| op.as_str().into()),
        };
        manifests.insert(run_name.into(), (kmsr.is_start(), manifest));
    }
    manifests.into_iter().map(|(run, (_, manifest))| (run, manifest)).collect()
}
