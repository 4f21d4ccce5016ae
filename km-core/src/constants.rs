// Child resource name suffixes; children are created with generateName "<owner>-<suffix>-"
pub const ENV_MAP_SUFFIX: &str = "env";
pub const RULES_MAP_SUFFIX: &str = "kmake";
pub const PVC_SUFFIX: &str = "pvc";
pub const JOB_SUFFIX: &str = "job";
pub const LINEAGE_MAP_SUFFIX: &str = "owner";
pub const SCHEDULE_RUN_SUFFIX: &str = "kmsr";

// Rule configmap keys
pub const RULES_YAML_KEY: &str = "kmake.yaml";
pub const RULES_JSON_KEY: &str = "kmake.json";
pub const RULES_MAKEFILE_KEY: &str = "kmake.mk";

// Lineage configmap keys
pub const OWNER_YAML_KEY: &str = "owner.yaml";
pub const OWNER_JSON_KEY: &str = "owner.json";
pub const KMAKE_OWNER_PATCH_KEY: &str = "kmake-owner-patch.yaml";
pub const KMAKE_RUN_OWNER_PATCH_KEY: &str = "kmakerun-owner-patch.yaml";
pub const KMAKE_SCHEDULE_RUN_OWNER_PATCH_KEY: &str = "kmake-schedulerun-owner-patch.yaml";

// Job volumes and where they're mounted
pub const ENV_VOLUME_NAME: &str = "kmake-env";
pub const ENV_MOUNT_PATH: &str = "/usr/share/env";
pub const PVC_VOLUME_NAME: &str = "kmake-pvc";
pub const PVC_MOUNT_PATH: &str = "/usr/share/pvc";
pub const RULES_VOLUME_NAME: &str = "kmake-rules";
pub const RULES_MOUNT_PATH: &str = "/usr/share/kmake";
pub const SCHEDULE_ENV_VOLUME_NAME: &str = "kmake-schedule-env";
pub const SCHEDULE_ENV_MOUNT_PATH: &str = "/usr/share/schedule";
pub const LINEAGE_VOLUME_NAME: &str = "kmake-owner";
pub const LINEAGE_MOUNT_PATH: &str = "/usr/share/owner";

pub const DEFAULT_RESTART_POLICY: &str = "Never";
pub const PVC_BOUND_PHASE: &str = "Bound";

// Env vars
pub const POD_NAME_ENV_VAR: &str = "POD_NAME";
pub const CONTROLLER_NAME: &str = "kmake-controller";

// Timing
pub const BACKOFF_DELAY_SECONDS: u64 = 60;
pub const JOB_POLL_DELAY_SECONDS: u64 = 60;
pub const CASCADE_POLL_DELAY_SECONDS: u64 = 5;
pub const ERROR_RETRY_DELAY_SECONDS: u64 = 30;

// Leader election
pub const LEASE_NAME: &str = "kmake-controller-leader";
pub const LEASE_DURATION_SECONDS: i32 = 15;
pub const LEASE_RENEW_SECONDS: u64 = 5;
pub const LEASE_RETRY_SECONDS: u64 = 2;
