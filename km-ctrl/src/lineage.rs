use std::collections::BTreeMap;

use km_core::k8s::{
    build_child_meta,
    owner_reference,
};
use km_core::prelude::*;
use kube::Resource;
use serde_json::json;

// A start command's job is owned by the schedule-run (as controller) and, for lineage, by the run
// and the Kmake behind it.
pub(crate) fn lineage_owners(
    kmsr: &KmakeScheduleRun,
    run: &KmakeRun,
    kmake: &Kmake,
) -> anyhow::Result<Vec<metav1::OwnerReference>> {
    Ok(vec![owner_reference(kmake, false)?, owner_reference(run, false)?, owner_reference(kmsr, true)?])
}

/// A merge-patch document that adds `owner` as a (non-controlling) owner of whatever it's applied
/// to, so that objects a job creates can be tied back into the lineage.
pub(crate) fn owner_patch<K>(owner: &K) -> anyhow::Result<String>
where
    K: Resource<DynamicType = ()>,
{
    let patch = json!({"metadata": {"ownerReferences": [owner_reference(owner, false)?]}});
    Ok(serde_yaml::to_string(&patch)?)
}

pub(crate) fn build_lineage_configmap(
    kmsr: &KmakeScheduleRun,
    run: &KmakeRun,
    kmake: &Kmake,
) -> anyhow::Result<corev1::ConfigMap> {
    let owners = lineage_owners(kmsr, run, kmake)?;
    let data = BTreeMap::from([
        (OWNER_YAML_KEY.into(), serde_yaml::to_string(&owners)?),
        (OWNER_JSON_KEY.into(), serde_json::to_string(&owners)?),
        (KMAKE_OWNER_PATCH_KEY.into(), owner_patch(kmake)?),
        (KMAKE_RUN_OWNER_PATCH_KEY.into(), owner_patch(run)?),
        (KMAKE_SCHEDULE_RUN_OWNER_PATCH_KEY.into(), owner_patch(kmsr)?),
    ]);

    Ok(corev1::ConfigMap {
        metadata: build_child_meta(kmsr, LINEAGE_MAP_SUFFIX)?,
        data: Some(data),
        ..Default::default()
    })
}
