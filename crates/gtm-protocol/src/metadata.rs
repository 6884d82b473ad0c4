//! Instance metadata keys and serial console markers.
//!
//! Keys prefixed with `_test_` are owned by the test manager. The script
//! keys are reserved by the provisioning platform and run at boot and
//! shutdown respectively.

/// Directory the agent uploads its report into.
pub const OUTS_PATH_KEY: &str = "_test_outspath";

/// Optional test filter passed to the test binary as `-test.run`.
pub const RUN_FILTER_KEY: &str = "_test_run";

/// Location of the suite's test binary.
pub const TEST_BINARY_PATH_KEY: &str = "_test_binarypath";

/// Platform-reserved startup script key.
pub const STARTUP_SCRIPT_KEY: &str = "startup-script";

/// Platform-reserved shutdown script key.
pub const SHUTDOWN_SCRIPT_KEY: &str = "shutdown-script";

/// Object name of the structured report inside the outs directory.
pub const REPORT_FILE_NAME: &str = "junit.xml";

/// Printed on the serial console after the report has been uploaded.
pub const AGENT_SUCCESS_MARKER: &str = "GuestTestAgent: done";

/// Printed on the serial console when the agent gives up.
pub const AGENT_FAILURE_MARKER: &str = "GuestTestAgent: failed";

/// Prefix of agent progress lines, usable as a wait-step status match.
pub const AGENT_STATUS_MARKER: &str = "GuestTestAgent: status";
