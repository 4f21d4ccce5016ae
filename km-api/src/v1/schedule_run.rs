use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

use super::*;

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct KmakeScheduleRunStart {}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct KmakeScheduleRunRestart {
    pub run: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct KmakeScheduleRunStop {
    pub run: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct KmakeScheduleRunDelete {}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct KmakeScheduleRunCreate {}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct KmakeScheduleRunReset {
    #[serde(default)]
    pub recurse: bool,

    // Also remove the non-workload records (stop/restart markers) for the instance
    #[serde(default)]
    pub full: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct KmakeScheduleRunForce {
    pub operation: Option<String>,

    #[serde(default)]
    pub recurse: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum KmakeScheduleRunOperation {
    Start(KmakeScheduleRunStart),
    Restart(KmakeScheduleRunRestart),
    Stop(KmakeScheduleRunStop),
    Delete(KmakeScheduleRunDelete),
    Create(KmakeScheduleRunCreate),
    Reset(KmakeScheduleRunReset),
    Force(KmakeScheduleRunForce),
}

impl KmakeScheduleRunOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            KmakeScheduleRunOperation::Start(_) => "start",
            KmakeScheduleRunOperation::Restart(_) => "restart",
            KmakeScheduleRunOperation::Stop(_) => "stop",
            KmakeScheduleRunOperation::Delete(_) => "delete",
            KmakeScheduleRunOperation::Create(_) => "create",
            KmakeScheduleRunOperation::Reset(_) => "reset",
            KmakeScheduleRunOperation::Force(_) => "force",
        }
    }
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(group = "bythepowerof.github.com", version = "v1", kind = "KmakeScheduleRun", namespaced)]
#[kube(shortname = "kmsr")]
#[kube(status = "KmakeStatus")]
#[kube(printcolumn = r#"{"name":"status", "type":"string", "description":"last recorded transition", "jsonPath":".status.status"}"#)]
#[serde(rename_all = "camelCase")]
pub struct KmakeScheduleRunSpec {
    #[serde(default, deserialize_with = "lenient_operation")]
    pub operation: Option<KmakeScheduleRunOperation>,
}

impl KmakeScheduleRunSpec {
    pub fn start() -> Self {
        KmakeScheduleRunSpec {
            operation: Some(KmakeScheduleRunOperation::Start(KmakeScheduleRunStart {})),
        }
    }
}

impl KmakeScheduleRun {
    pub fn is_start(&self) -> bool {
        matches!(self.spec.operation, Some(KmakeScheduleRunOperation::Start(_)))
    }

    pub fn kmake_name(&self) -> Option<&str> {
        self.label(KMAKE_LABEL_KEY)
    }

    pub fn run_name(&self) -> Option<&str> {
        self.label(RUN_LABEL_KEY)
    }

    pub fn schedule_instance(&self) -> Option<&str> {
        self.label(SCHEDULE_INSTANCE_LABEL_KEY)
    }

    pub fn schedule_env(&self) -> Option<&str> {
        self.label(SCHEDULE_ENV_LABEL_KEY)
    }

    pub fn is_new(&self) -> bool {
        self.phase().is_none()
    }

    /// Start commands last as long as their job; every other command is done as soon as it has
    /// recorded anything at all.
    pub fn has_ended(&self) -> bool {
        match self.phase() {
            Some(phase) if self.is_start() => phase.is_terminal(),
            Some(_) => true,
            None => false,
        }
    }
}
