//! Guest Test Manager Protocol
//!
//! Everything the orchestrator and the in-guest agent must agree on:
//! metadata key names, console markers, `gs://` object URLs and the
//! object store used to move test binaries and reports around.

pub mod metadata;
pub mod storage;
pub mod url;

pub use metadata::{
    AGENT_FAILURE_MARKER, AGENT_STATUS_MARKER, AGENT_SUCCESS_MARKER, OUTS_PATH_KEY,
    REPORT_FILE_NAME, RUN_FILTER_KEY, SHUTDOWN_SCRIPT_KEY, STARTUP_SCRIPT_KEY,
    TEST_BINARY_PATH_KEY,
};
pub use storage::{FsObjectStore, HttpObjectStore, ObjectStore, StorageError, StorageResult};
pub use url::{GcsUrl, UrlError};
