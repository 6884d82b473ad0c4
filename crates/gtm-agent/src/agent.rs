//! The agent's single run: metadata, scratch dir, test binary, report.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use gtm_protocol::{
    GcsUrl, ObjectStore, AGENT_FAILURE_MARKER, AGENT_SUCCESS_MARKER, OUTS_PATH_KEY,
    REPORT_FILE_NAME, RUN_FILTER_KEY, TEST_BINARY_PATH_KEY,
};
use gtm_report::ReportCounts;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::metadata::MetadataSource;
use crate::{AgentError, AgentResult};

/// Characters used for the scratch directory suffix.
pub const WORK_DIR_ALPHABET: &[u8] = b"bdghjlmnpqrstvwxyz0123456789";

const WORK_DIR_SUFFIX_LEN: usize = 5;
const WORK_DIR_ATTEMPTS: usize = 10;

/// Local name used when the binary URL has no file name.
const FALLBACK_BINARY_NAME: &str = "image_test.test";

/// errno for exec of a binary that is still open for writing somewhere.
const TEXT_FILE_BUSY: i32 = 26;
const SPAWN_ATTEMPTS: u32 = 5;

/// Arguments for the test binary: verbose output, plus `-test.run` when a
/// non-empty filter is given.
pub fn build_test_args(filter: Option<&str>) -> Vec<String> {
    let mut args = vec!["-test.v".to_string()];
    if let Some(filter) = filter.filter(|f| !f.is_empty()) {
        args.push("-test.run".to_string());
        args.push(filter.to_string());
    }
    args
}

/// Random string drawn from [`WORK_DIR_ALPHABET`].
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| WORK_DIR_ALPHABET[rng.gen_range(0..WORK_DIR_ALPHABET.len())] as char)
        .collect()
}

/// Console line announcing how the run ended.
pub fn console_line(result: &AgentResult<AgentOutcome>) -> String {
    match result {
        Ok(outcome) => format!(
            "{} report={} tests={} failed={}",
            AGENT_SUCCESS_MARKER, outcome.report_url, outcome.counts.total, outcome.counts.failed
        ),
        Err(e) => format!("{}: {}", AGENT_FAILURE_MARKER, e),
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub work_dir: PathBuf,
    pub report_url: GcsUrl,
    pub counts: ReportCounts,
    /// Exit code of the test binary; `None` if it was killed by a signal.
    pub exit_code: Option<i32>,
}

/// One agent run against a metadata source and an object store.
pub struct Agent<'a> {
    config: AgentConfig,
    metadata: &'a dyn MetadataSource,
    store: &'a dyn ObjectStore,
}

impl<'a> Agent<'a> {
    pub fn new(
        config: AgentConfig,
        metadata: &'a dyn MetadataSource,
        store: &'a dyn ObjectStore,
    ) -> Self {
        Self {
            config,
            metadata,
            store,
        }
    }

    /// Run the test binary once and upload its report.
    pub fn run(&self) -> AgentResult<AgentOutcome> {
        let outs = self.required_url(OUTS_PATH_KEY)?;
        info!(outs = %outs, "read outs path");

        let filter = match self.metadata.attribute(RUN_FILTER_KEY) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(error = %e, "could not read run filter, running the full suite");
                None
            }
        };
        let binary_url = self.required_url(TEST_BINARY_PATH_KEY)?;
        info!(binary = %binary_url, filter = ?filter, "read test settings");

        let work_dir = make_work_dir(&self.config.work_root)?;
        info!(work_dir = %work_dir.display(), "created working directory");

        let binary_name = binary_url.file_name().unwrap_or(FALLBACK_BINARY_NAME);
        let binary_path = work_dir.join(binary_name);
        let bytes = self.store.download_to_file(&binary_url, &binary_path)?;
        set_mode(&binary_path, 0o755)?;
        debug!(path = %binary_path.display(), bytes, "downloaded test binary");

        let args = build_test_args(filter.as_deref());
        info!(args = ?args, "running test binary");
        let started = Instant::now();
        let (status, output) = run_captured(&binary_path, &args, &work_dir)?;
        info!(
            status = %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "test binary exited"
        );
        debug!("test output:\n{}", output);

        let package = Path::new(binary_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(binary_name);
        let (report, xml) = gtm_report::canonicalize(&output, package)?;

        let report_url = outs.join(REPORT_FILE_NAME);
        self.store.upload(&report_url, xml.as_bytes())?;
        info!(report = %report_url, "uploaded report");

        Ok(AgentOutcome {
            work_dir,
            report_url,
            counts: report.counts(),
            exit_code: status.code(),
        })
    }

    fn required_url(&self, key: &'static str) -> AgentResult<GcsUrl> {
        let value = self
            .metadata
            .attribute(key)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(AgentError::MissingAttribute(key))?;
        Ok(value.parse()?)
    }
}

/// Create `<root>/test-<suffix>` with mode 0755.
fn make_work_dir(root: &Path) -> AgentResult<PathBuf> {
    for _ in 0..WORK_DIR_ATTEMPTS {
        let dir = root.join(format!("test-{}", random_suffix(WORK_DIR_SUFFIX_LEN)));
        match fs::create_dir(&dir) {
            Ok(()) => {
                set_mode(&dir, 0o755)?;
                return Ok(dir);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(AgentError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free working directory name under {}", root.display()),
    )))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Run `binary` to completion, returning its status and its stdout and
/// stderr as one stream, in the order the binary wrote them.
fn run_captured(binary: &Path, args: &[String], work_dir: &Path) -> AgentResult<(ExitStatus, String)> {
    let mut attempt = 0;
    let (mut child, mut reader) = loop {
        attempt += 1;
        let (reader, stdout, stderr) = combined_output()?;
        let spawned = Command::new(binary)
            .args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn();
        match spawned {
            Ok(child) => break (child, reader),
            // Exec of a just-written binary races writable fds inherited by
            // concurrent forks. The test binary itself is never rerun.
            Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempt < SPAWN_ATTEMPTS => {
                thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
            }
            Err(e) => return Err(AgentError::SpawnFailed(e.to_string())),
        }
    };

    // The command and its copies of the write end are gone, so this reads
    // until the child and its descendants close the pipe.
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let status = child.wait()?;

    let mut output = String::from_utf8_lossy(&bytes).into_owned();
    if !output.ends_with('\n') {
        output.push('\n');
    }
    Ok((status, output))
}

/// One pipe serving as both stdout and stderr of the child.
#[cfg(unix)]
fn combined_output() -> io::Result<(fs::File, Stdio, Stdio)> {
    let (read_end, write_end) = nix::unistd::pipe().map_err(io::Error::from)?;
    let stderr = write_end.try_clone()?;
    Ok((fs::File::from(read_end), Stdio::from(write_end), Stdio::from(stderr)))
}

#[cfg(not(unix))]
fn combined_output() -> io::Result<(fs::File, Stdio, Stdio)> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "combined test output needs a unix guest",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_test_args_without_filter() {
        assert_eq!(build_test_args(None), vec!["-test.v"]);
        assert_eq!(build_test_args(Some("")), vec!["-test.v"]);
    }

    #[test]
    fn test_build_test_args_with_filter() {
        assert_eq!(
            build_test_args(Some("TestVm1")),
            vec!["-test.v", "-test.run", "TestVm1"]
        );
    }

    #[test]
    fn test_random_suffix_uses_alphabet() {
        let suffix = random_suffix(5);
        assert_eq!(suffix.len(), 5);
        assert!(suffix.bytes().all(|b| WORK_DIR_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_make_work_dir() {
        let temp = tempfile::tempdir().unwrap();
        let dir = make_work_dir(temp.path()).unwrap();

        assert!(dir.is_dir());
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("test-"));
        assert_eq!(name.len(), "test-".len() + WORK_DIR_SUFFIX_LEN);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_console_line_on_failure() {
        let line = console_line(&Err(AgentError::MissingAttribute(OUTS_PATH_KEY)));
        assert!(line.starts_with(AGENT_FAILURE_MARKER));
        assert!(line.contains("_test_outspath"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_captured_keeps_stream_order() {
        use gtm_protocol::FsObjectStore;

        let temp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(temp.path().join("storage"));
        let url: GcsUrl = "gs://sources/run1/testbinary".parse().unwrap();
        store
            .upload(
                &url,
                b"#!/bin/sh\necho a\necho b >&2\necho c\necho d >&2\nexit 1\n",
            )
            .unwrap();

        let binary = temp.path().join("suite.test");
        store.download_to_file(&url, &binary).unwrap();
        set_mode(&binary, 0o755).unwrap();
        let (status, output) = run_captured(&binary, &[], temp.path()).unwrap();

        assert_eq!(status.code(), Some(1));
        assert_eq!(output, "a\nb\nc\nd\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_captured_terminates_output() {
        let temp = tempfile::tempdir().unwrap();
        let binary = temp.path().join("quiet.test");
        fs::write(&binary, "#!/bin/sh\nprintf 'no newline'\n").unwrap();
        set_mode(&binary, 0o755).unwrap();

        let (status, output) = run_captured(&binary, &[], temp.path()).unwrap();
        assert!(status.success());
        assert_eq!(output, "no newline\n");
    }
}
