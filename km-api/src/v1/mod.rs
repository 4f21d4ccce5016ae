mod kmake;
mod kmake_run;
mod now_scheduler;
mod schedule_run;
mod status;

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
pub use kmake::*;
pub use kmake_run::*;
use kube::{
    Resource,
    ResourceExt,
};
pub use now_scheduler::*;
pub use schedule_run::*;
use serde::de::DeserializeOwned;
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
};
pub use status::*;

pub const API_GROUP: &str = "bythepowerof.github.com";

// All labels and annotations used by the controllers live under this domain
pub const KMAKE_LABEL_KEY: &str = "bythepowerof.github.io/kmake";
pub const RUN_LABEL_KEY: &str = "bythepowerof.github.io/run";
pub const SCHEDULE_INSTANCE_LABEL_KEY: &str = "bythepowerof.github.io/schedule-instance";
pub const SCHEDULE_ENV_LABEL_KEY: &str = "bythepowerof.github.io/schedule-env";
pub const SCHEDULER_LABEL_KEY: &str = "bythepowerof.github.io/scheduler";
pub const SCHEDULE_RUN_LABEL_KEY: &str = "bythepowerof.github.io/schedulerun";
pub const STATUS_LABEL_KEY: &str = "bythepowerof.github.io/status";
pub const WORKLOAD_LABEL_KEY: &str = "bythepowerof.github.io/workload";
pub const RESOURCES_ANNOTATION_KEY: &str = "bythepowerof.github.io/kmake";

pub const WORKLOAD_YES: &str = "yes";
pub const WORKLOAD_NO: &str = "no";

pub const KMAKE_FINALIZER: &str = "kmake.finalizers.bythepowerof.github.com";
pub const KMAKE_RUN_FINALIZER: &str = "kmakerun.finalizers.bythepowerof.github.com";
pub const KMAKE_SCHEDULE_RUN_FINALIZER: &str = "kmakeschedulerun.finalizers.bythepowerof.github.com";
pub const KMAKE_NOW_SCHEDULER_FINALIZER: &str = "kmakenowscheduler.finalizers.bythepowerof.github.com";

/// Behaviour shared by the four kmake kinds: every one of them carries a [`KmakeStatus`], is
/// protected by its own finalizer, and is reconciled by a controller that records its progress
/// through the status recorder.
pub trait KmakeResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    const FINALIZER: &'static str;

    /// Whether the current phase is mirrored into the `status` label (used for label-selecting
    /// schedule-runs by phase).
    const PHASE_LABEL: bool = false;

    fn kmake_status(&self) -> Option<&KmakeStatus>;
    fn kmake_status_mut(&mut self) -> &mut KmakeStatus;

    fn phase(&self) -> Option<Phase> {
        self.kmake_status().and_then(|s| s.phase)
    }

    fn child(&self, kind: SubResourceKind) -> Option<&str> {
        self.kmake_status().and_then(|s| s.child(kind))
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.labels().get(key).map(String::as_str)
    }

    fn is_being_deleted(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == Self::FINALIZER)
    }

    /// The resources annotation and status label that mirror the current status.
    fn status_metadata(&self) -> serde_json::Result<(String, Option<&'static str>)> {
        let resources = match self.kmake_status() {
            Some(status) => serde_json::to_string(&status.resources)?,
            None => "{}".into(),
        };
        let phase_label = if Self::PHASE_LABEL { self.phase().map(|p| p.as_str()) } else { None };
        Ok((resources, phase_label))
    }

    /// Whether the stored annotation (and label) still match the status; a metadata write can fail
    /// after the status write went through, leaving them behind.
    fn status_metadata_in_sync(&self) -> bool {
        let Ok((resources, phase_label)) = self.status_metadata() else {
            return false;
        };
        self.annotations().get(RESOURCES_ANNOTATION_KEY) == Some(&resources)
            && (phase_label.is_none() || self.label(STATUS_LABEL_KEY) == phase_label)
    }

    fn sync_status_metadata(&mut self) -> serde_json::Result<()> {
        let (resources, phase_label) = self.status_metadata()?;
        self.annotations_mut().insert(RESOURCES_ANNOTATION_KEY.into(), resources);
        if let Some(phase) = phase_label {
            self.labels_mut().insert(STATUS_LABEL_KEY.into(), phase.into());
        }
        Ok(())
    }
}

macro_rules! kmake_resource {
    ($kind:ty, $finalizer:expr) => {
        kmake_resource!($kind, $finalizer, false);
    };

    ($kind:ty, $finalizer:expr, $phase_label:expr) => {
        impl KmakeResource for $kind {
            const FINALIZER: &'static str = $finalizer;
            const PHASE_LABEL: bool = $phase_label;

            fn kmake_status(&self) -> Option<&KmakeStatus> {
                self.status.as_ref()
            }

            fn kmake_status_mut(&mut self) -> &mut KmakeStatus {
                self.status.get_or_insert_with(Default::default)
            }
        }
    };
}

kmake_resource!(Kmake, KMAKE_FINALIZER);
kmake_resource!(KmakeRun, KMAKE_RUN_FINALIZER);
kmake_resource!(KmakeScheduleRun, KMAKE_SCHEDULE_RUN_FINALIZER, true);
kmake_resource!(KmakeNowScheduler, KMAKE_NOW_SCHEDULER_FINALIZER);

// Operation unions are "exactly one of" on the wire; anything that doesn't decode to a single
// known variant (nothing set, several set, unknown key) is surfaced as `None` so the object itself
// still deserializes and the controller can report it instead of wedging the watch.
fn lenient_operation<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).ok())
}

#[cfg(test)]
mod tests;
