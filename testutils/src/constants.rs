pub const TEST_NAMESPACE: &str = "test-namespace";
pub const TEST_KMAKE: &str = "test-kmake";
pub const TEST_RUN: &str = "test-run";
pub const TEST_SCHEDULE_RUN: &str = "test-kmsr";
pub const TEST_SCHEDULER: &str = "test-scheduler";
pub const TEST_MONITOR_TAG: &str = "nightly";

// Names the fake apiserver "generates" for children
pub const TEST_ENV_MAP: &str = "test-kmake-env-abcde";
pub const TEST_RULES_MAP: &str = "test-kmake-kmake-abcde";
pub const TEST_PVC: &str = "test-kmake-pvc-abcde";
pub const TEST_JOB: &str = "test-run-job-abcde";
pub const TEST_SCHEDULE_ENV_MAP: &str = "test-scheduler-env-abcde";
pub const TEST_LINEAGE_MAP: &str = "test-kmsr-owner-abcde";

pub const TEST_IMAGE: &str = "busybox:1.36";
pub const TEST_RESOURCE_VERSION: &str = "1234";
