use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Phase {
    Provision,
    Delete,
    BackOff,
    Update,
    Error,
    Active,
    Success,
    Abort,
    Wait,
    Stop,
    Restart,
    Ready,
    Get,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Provision => "Provision",
            Phase::Delete => "Delete",
            Phase::BackOff => "BackOff",
            Phase::Update => "Update",
            Phase::Error => "Error",
            Phase::Active => "Active",
            Phase::Success => "Success",
            Phase::Abort => "Abort",
            Phase::Wait => "Wait",
            Phase::Stop => "Stop",
            Phase::Restart => "Restart",
            Phase::Ready => "Ready",
            Phase::Get => "Get",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Success | Phase::Error | Phase::Abort)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Phase::Error | Phase::Abort)
    }

    // Only provisioning-style transitions name a child resource; for every other phase the name
    // in the message is informational.
    pub fn records_child(&self) -> bool {
        matches!(self, Phase::Provision | Phase::Wait)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize)]
pub enum SubResourceKind {
    #[serde(rename = "PVC")]
    Pvc,
    EnvMap,
    KmakeMap,
    Main,
    Kmake,
    Job,
    Runs,
    Schedule,
    SchEnvMap,
    Dummy,
    FileWait,
    Owner,
    #[serde(rename = "Kmsr")]
    ScheduleRun,
}

impl SubResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubResourceKind::Pvc => "PVC",
            SubResourceKind::EnvMap => "EnvMap",
            SubResourceKind::KmakeMap => "KmakeMap",
            SubResourceKind::Main => "Main",
            SubResourceKind::Kmake => "Kmake",
            SubResourceKind::Job => "Job",
            SubResourceKind::Runs => "Runs",
            SubResourceKind::Schedule => "Schedule",
            SubResourceKind::SchEnvMap => "SchEnvMap",
            SubResourceKind::Dummy => "Dummy",
            SubResourceKind::FileWait => "FileWait",
            SubResourceKind::Owner => "Owner",
            SubResourceKind::ScheduleRun => "Kmsr",
        }
    }
}

impl fmt::Display for SubResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastAction {
    pub kind: SubResourceKind,
    pub name: Option<String>,
}

/// One entry in a run registry: which run, in what phase, launched through what.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KmakeRunManifest {
    pub schedule_run_name: Option<String>,
    pub run_phase: Option<Phase>,
    pub kmake_name: Option<String>,
    pub run_type: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KmakeStatus {
    /// Human-readable form of the last recorded transition; never read back by the controllers.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    pub phase: Option<Phase>,
    pub last_action: Option<LastAction>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(with = "BTreeMap<String, String>")]
    pub resources: BTreeMap<SubResourceKind, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runs: BTreeMap<String, KmakeRunManifest>,
}

impl KmakeStatus {
    pub fn message(phase: Phase, kind: SubResourceKind, name: Option<&str>) -> String {
        match name {
            Some(name) if !name.is_empty() => format!("{phase} {kind} ({name})"),
            _ => format!("{phase} {kind}"),
        }
    }

    pub fn child(&self, kind: SubResourceKind) -> Option<&str> {
        self.resources.get(&kind).map(String::as_str)
    }

    /// Apply a transition to the record.  Returns false (and leaves the record untouched) if the
    /// transition's message is the one already stored.
    pub fn apply(&mut self, phase: Phase, kind: SubResourceKind, name: Option<&str>) -> bool {
        let message = Self::message(phase, kind, name);
        if self.status == message {
            return false;
        }

        let name = name.filter(|n| !n.is_empty());
        if phase.records_child()
            && let Some(name) = name
        {
            self.resources.insert(kind, name.into());
        }

        self.status = message;
        self.phase = Some(phase);
        self.last_action = Some(LastAction { kind, name: name.map(Into::into) });
        true
    }
}
