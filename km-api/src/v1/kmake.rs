use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

use super::*;

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KmakeRule {
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub double_colon: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_pattern: String,

    #[serde(default)]
    pub prereqs: Vec<String>,

    #[serde(default)]
    pub commands: Vec<String>,
}

impl fmt::Display for KmakeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.double_colon { "::" } else { ":" };
        write!(f, "{}{sep} ", self.targets.join(" "))?;
        if !self.target_pattern.is_empty() {
            write!(f, "{}: ", self.target_pattern)?;
        }
        writeln!(f, "{}", self.prereqs.join(" "))?;
        for cmd in &self.commands {
            writeln!(f, "\t{cmd}")?;
        }
        writeln!(f)
    }
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[kube(group = "bythepowerof.github.com", version = "v1", kind = "Kmake", namespaced)]
#[kube(shortname = "km")]
#[kube(status = "KmakeStatus")]
#[kube(printcolumn = r#"{"name":"status", "type":"string", "description":"last recorded transition", "jsonPath":".status.status"}"#)]
#[serde(rename_all = "camelCase")]
pub struct KmakeSpec {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub rules: Vec<KmakeRule>,

    #[serde(default)]
    pub storage_template: corev1::PersistentVolumeClaimSpec,

    #[serde(default)]
    pub job_template: batchv1::JobTemplateSpec,
}

impl KmakeSpec {
    pub fn to_makefile(&self) -> String {
        self.rules.iter().map(|r| r.to_string()).collect()
    }
}

impl Kmake {
    /// Whether every child a job needs to mount has been created.
    pub fn is_provisioned(&self) -> bool {
        [SubResourceKind::EnvMap, SubResourceKind::KmakeMap, SubResourceKind::Pvc]
            .iter()
            .all(|kind| self.child(*kind).is_some())
    }
}
