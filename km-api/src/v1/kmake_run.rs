use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

use super::*;

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KmakeRunJob {
    // If unset, the job is built from the owning Kmake's job template
    pub template: Option<corev1::PodTemplateSpec>,

    #[serde(default)]
    pub targets: Vec<String>,

    pub image: Option<String>,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct KmakeRunDummy {}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct KmakeRunFileWait {
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum KmakeRunOperation {
    Job(KmakeRunJob),
    Dummy(KmakeRunDummy),
    FileWait(KmakeRunFileWait),
}

impl KmakeRunOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            KmakeRunOperation::Job(_) => "job",
            KmakeRunOperation::Dummy(_) => "dummy",
            KmakeRunOperation::FileWait(_) => "fileWait",
        }
    }
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(group = "bythepowerof.github.com", version = "v1", kind = "KmakeRun", namespaced)]
#[kube(shortname = "kmr")]
#[kube(status = "KmakeStatus")]
#[kube(printcolumn = r#"{"name":"status", "type":"string", "description":"last recorded transition", "jsonPath":".status.status"}"#)]
#[serde(rename_all = "camelCase")]
pub struct KmakeRunSpec {
    #[serde(default, deserialize_with = "lenient_operation")]
    pub operation: Option<KmakeRunOperation>,
}

impl KmakeRun {
    pub fn kmake_name(&self) -> Option<&str> {
        self.label(KMAKE_LABEL_KEY)
    }

    pub fn has_ended(&self) -> bool {
        self.phase().is_some_and(|p| p.is_terminal())
    }

    pub fn is_active(&self) -> bool {
        self.child(SubResourceKind::Job).is_some() && !self.has_ended()
    }

    /// A run is new until it has either registered with its Kmake or launched a job.
    pub fn is_new(&self) -> bool {
        self.child(SubResourceKind::Kmake).is_none() && self.child(SubResourceKind::Job).is_none() && !self.has_ended()
    }
}
