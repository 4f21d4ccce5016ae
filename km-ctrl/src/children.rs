use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use km_core::k8s::{
    delete_ignore_not_found,
    namespaced_api,
};
use km_core::prelude::*;
use kube::Resource;
use kube::api::PostParams;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::*;

use crate::context::KmakeContext;
use crate::status::record;

#[derive(Debug)]
pub(crate) enum ChildState<C> {
    Created(String),
    Deleted,
    Current(C),
}

/// Bring a single child in line with `desired`.  Children are never patched: a child that has
/// drifted is deleted, and the next pass creates a fresh one under a new generated name.  A child
/// that is already terminating counts as gone.
pub(crate) async fn converge_child<C>(
    api: &kube::Api<C>,
    recorded: Option<&str>,
    desired: &C,
    differs: fn(&C, &C) -> bool,
) -> anyhow::Result<ChildState<C>>
where
    C: Resource + Clone + Debug + DeserializeOwned + Serialize,
{
    if let Some(name) = recorded
        && let Some(current) = api.get_opt(name).await?
        && current.meta().deletion_timestamp.is_none()
    {
        if differs(&current, desired) {
            info!("{} is out of date, deleting", current.namespaced_name());
            delete_ignore_not_found(api, name).await?;
            return Ok(ChildState::Deleted);
        }
        return Ok(ChildState::Current(current));
    }

    let created = api.create(&PostParams::default(), desired).await?;
    Ok(ChildState::Created(created.name_any()))
}

/// Converge a child of `owner` and record any change against it.  Returns the live child if it
/// was already current, or None if something changed and the caller should requeue.
pub(crate) async fn ensure_child<K, C>(
    ctx: &KmakeContext,
    owner: &mut K,
    kind: SubResourceKind,
    desired: C,
    differs: fn(&C, &C) -> bool,
) -> anyhow::Result<Option<C>>
where
    K: KmakeResource,
    C: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned + Serialize,
{
    let api = namespaced_api::<C, K>(&ctx.client, owner)?;
    let state = converge_child(&api, owner.child(kind), &desired, differs).await?;
    match state {
        ChildState::Created(name) => {
            record(ctx, owner, Phase::Provision, kind, Some(&name)).await?;
            Ok(None)
        },
        ChildState::Deleted => {
            record(ctx, owner, Phase::Delete, kind, None).await?;
            Ok(None)
        },
        ChildState::Current(child) => Ok(Some(child)),
    }
}
