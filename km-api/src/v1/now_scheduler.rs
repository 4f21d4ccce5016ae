use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

use super::KmakeStatus;

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[kube(group = "bythepowerof.github.com", version = "v1", kind = "KmakeNowScheduler", namespaced)]
#[kube(shortname = "kmns")]
#[kube(status = "KmakeStatus")]
#[kube(printcolumn = r#"{"name":"status", "type":"string", "description":"last recorded transition", "jsonPath":".status.status"}"#)]
#[serde(rename_all = "camelCase")]
pub struct KmakeNowSchedulerSpec {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    // Scheduler tags; every KmakeRun labelled with one of these is started by this scheduler
    #[serde(default)]
    pub monitor: Vec<String>,
}
