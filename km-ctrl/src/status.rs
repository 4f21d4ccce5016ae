use std::collections::BTreeMap;

use km_core::k8s::{
    map_merge_patch,
    namespaced_api,
};
use km_core::prelude::*;
use kube::api::Patch;
use kube::runtime::events::{
    Event,
    EventType,
};
use serde_json::json;
use tracing::*;

use crate::context::KmakeContext;

/// Record a lifecycle transition on `obj`.
///
/// An audit event is published for every call, but the object itself is only written when the
/// transition's message differs from the one already stored.  When it does, the structured status
/// is merge-patched first, and then the sub-resource map is mirrored into the resources
/// annotation (and, for kinds that carry it, the phase into the status label) using the
/// resourceVersion returned by the status write.  An unchanged message still rewrites the
/// metadata if the stored annotation or label has fallen behind the status.  `obj` is updated in
/// place so that subsequent writes in the same reconcile see the new state.
pub(crate) async fn record<K: KmakeResource>(
    ctx: &KmakeContext,
    obj: &mut K,
    phase: Phase,
    kind: SubResourceKind,
    name: Option<&str>,
) -> EmptyResult {
    let msg = KmakeStatus::message(phase, kind, name);
    publish(ctx, obj, phase, kind, &msg).await;

    if !obj.kmake_status_mut().apply(phase, kind, name) {
        if obj.status_metadata_in_sync() {
            debug!("{}: {msg} (unchanged)", obj.namespaced_name());
            return Ok(());
        }

        info!("{}: {msg} (repairing stale metadata)", obj.namespaced_name());
        let api = namespaced_api::<K, K>(&ctx.client, obj)?;
        return persist_metadata(&api, obj).await;
    }

    info!("{}: {msg}", obj.namespaced_name());
    persist(ctx, obj).await
}

/// Replace the run registry in `obj`'s status, if it changed.
pub(crate) async fn record_runs<K: KmakeResource>(
    ctx: &KmakeContext,
    obj: &mut K,
    runs: BTreeMap<String, KmakeRunManifest>,
) -> EmptyResult {
    let current = obj.kmake_status().map(|s| s.runs.clone()).unwrap_or_default();
    if current == runs {
        return Ok(());
    }

    debug!("{}: run registry now has {} entries", obj.namespaced_name(), runs.len());
    let api = namespaced_api::<K, K>(&ctx.client, obj)?;
    let patch = json!({"status": {"runs": map_merge_patch(&current, &runs)?}});
    let updated = api
        .patch_status(&obj.name_any(), &Default::default(), &Patch::Merge(&patch))
        .await?;

    obj.kmake_status_mut().runs = runs;
    obj.meta_mut().resource_version = updated.resource_version();
    Ok(())
}

async fn publish<K: KmakeResource>(ctx: &KmakeContext, obj: &K, phase: Phase, kind: SubResourceKind, msg: &str) {
    let event = Event {
        type_: if phase.is_failure() { EventType::Warning } else { EventType::Normal },
        reason: format!("{phase}{kind}"),
        note: Some(msg.into()),
        action: phase.to_string(),
        secondary: None,
    };

    if let Err(err) = ctx.recorder.publish(&event, &obj.object_ref(&())).await {
        warn!("could not publish event for {}: {err}", obj.namespaced_name());
    }
}

async fn persist<K: KmakeResource>(ctx: &KmakeContext, obj: &mut K) -> EmptyResult {
    let api = namespaced_api::<K, K>(&ctx.client, obj)?;
    let status = obj.kmake_status_mut().clone();

    let status_patch = json!({
        "status": {
            "status": &status.status,
            "phase": &status.phase,
            "lastAction": &status.last_action,
            "resources": &status.resources,
        }
    });
    let updated = api
        .patch_status(&obj.name_any(), &Default::default(), &Patch::Merge(&status_patch))
        .await?;
    obj.meta_mut().resource_version = updated.resource_version();

    persist_metadata(&api, obj).await
}

// Mirrors the status into the resources annotation and, for kinds that carry it, the status label
async fn persist_metadata<K: KmakeResource>(api: &kube::Api<K>, obj: &mut K) -> EmptyResult {
    let (resources, phase_label) = obj.status_metadata()?;
    let mut meta_patch = json!({"metadata": {"annotations": {RESOURCES_ANNOTATION_KEY: &resources}}});
    if let Some(phase) = phase_label {
        meta_patch["metadata"]["labels"] = json!({STATUS_LABEL_KEY: phase});
    }
    if let Some(rv) = obj.resource_version() {
        meta_patch["metadata"]["resourceVersion"] = json!(rv);
    }
    let updated = api.patch(&obj.name_any(), &Default::default(), &Patch::Merge(&meta_patch)).await?;

    obj.sync_status_metadata()?;
    obj.meta_mut().resource_version = updated.resource_version();
    Ok(())
}
