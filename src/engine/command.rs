//! Engine adapter that shells out to an engine binary.
//!
//! The graph is written as JSON to a scratch file and the binary is run as
//! `<binary> [prefix args] -project P -zone Z [-validate] <file>`. Every
//! output line is forwarded to the graph's log sink.

use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;

use super::{new_run_id, EngineError, EngineResult, ProvisioningEngine};
use crate::graph::ProvisioningGraph;

/// Output lines kept for the error message of a failed run.
const TAIL_LINES: usize = 20;

/// Runs graphs with an external engine binary.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    binary: PathBuf,
    prefix_args: Vec<String>,
    scratch_dir: PathBuf,
}

impl CommandEngine {
    pub fn new(binary: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            prefix_args: Vec::new(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Arguments placed before the engine flags, e.g. a script for an
    /// interpreter given as the binary.
    pub fn with_prefix_args(mut self, args: Vec<String>) -> Self {
        self.prefix_args = args;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Write the graph file, temp-then-rename.
    fn write_graph(&self, graph: &ProvisioningGraph) -> EngineResult<PathBuf> {
        fs::create_dir_all(&self.scratch_dir)?;
        let stem = match &graph.run_id {
            Some(run_id) => format!("{}-{}", graph.name, run_id),
            None => format!("{}-{}", graph.name, new_run_id()),
        };
        let final_path = self.scratch_dir.join(format!("{}.wf.json", stem));
        let temp_path = self.scratch_dir.join(format!(".{}.wf.json.tmp", stem));
        fs::write(&temp_path, graph.to_json()?)?;
        fs::rename(&temp_path, &final_path)?;
        Ok(final_path)
    }

    fn run(&self, graph: &ProvisioningGraph, validate_only: bool) -> EngineResult<()> {
        let invalid = |reason: String| EngineError::Invalid {
            name: graph.name.clone(),
            reason,
        };
        graph.validate().map_err(|e| invalid(e.to_string()))?;
        let project = graph
            .project
            .as_deref()
            .ok_or_else(|| invalid("project is not set".to_string()))?;
        let zone = graph
            .zone
            .as_deref()
            .ok_or_else(|| invalid("zone is not set".to_string()))?;

        let path = self.write_graph(graph)?;
        let mut command = Command::new(&self.binary);
        command
            .args(&self.prefix_args)
            .args(["-project", project, "-zone", zone]);
        if validate_only {
            command.arg("-validate");
        }
        command
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(
            workflow = %graph.name,
            binary = %self.binary.display(),
            validate_only,
            "starting engine"
        );
        let result = run_logged(command, graph);
        let _ = fs::remove_file(&path);
        let (status, tail) = result?;

        if status.success() {
            return Ok(());
        }
        let reason = format!("engine exited with {}: {}", status, tail.join("\n"));
        if validate_only {
            Err(invalid(reason))
        } else {
            Err(EngineError::Failed {
                name: graph.name.clone(),
                reason,
            })
        }
    }
}

/// Run `command`, sending each output line to the graph's log sink.
/// Returns the exit status and the last output lines.
fn run_logged(
    mut command: Command,
    graph: &ProvisioningGraph,
) -> EngineResult<(std::process::ExitStatus, Vec<String>)> {
    let mut child = command
        .spawn()
        .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let tail = Mutex::new(VecDeque::with_capacity(TAIL_LINES));

    thread::scope(|scope| {
        if let Some(stdout) = stdout {
            scope.spawn(|| forward_lines(stdout, graph, &tail));
        }
        if let Some(stderr) = stderr {
            scope.spawn(|| forward_lines(stderr, graph, &tail));
        }
    });
    let status = child.wait()?;

    let tail = tail.into_inner().unwrap_or_else(|e| e.into_inner());
    Ok((status, tail.into_iter().collect()))
}

fn forward_lines<R: Read>(reader: R, graph: &ProvisioningGraph, tail: &Mutex<VecDeque<String>>) {
    for line in BufReader::new(reader).lines().map_while(Result::ok) {
        graph.log(&line);
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}

impl ProvisioningEngine for CommandEngine {
    fn allocate_run_id(&self) -> String {
        new_run_id()
    }

    fn validate(&self, graph: &ProvisioningGraph) -> EngineResult<()> {
        self.run(graph, true)
    }

    fn execute(&self, graph: &ProvisioningGraph) -> EngineResult<()> {
        self.run(graph, false)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::logsink::{BufferedLogger, WorkflowLogger};
    use crate::workflow::TestWorkflow;

    fn graph(logger: Arc<dyn WorkflowLogger>) -> ProvisioningGraph {
        let mut wf = TestWorkflow::new("image-validation", "debian-10");
        wf.create_vm("vm").unwrap();
        let mut graph = wf.graph().unwrap().clone();
        graph.project = Some("proj".to_string());
        graph.zone = Some("us-west1-b".to_string());
        graph.run_id = Some("01run".to_string());
        graph.set_logger(logger);
        graph
    }

    fn engine(dir: &Path, script: &str) -> CommandEngine {
        let script_path = dir.join("engine.sh");
        fs::write(&script_path, script).unwrap();
        CommandEngine::new("/bin/sh", dir.join("scratch"))
            .with_prefix_args(vec![script_path.to_string_lossy().to_string()])
    }

    #[test]
    fn test_execute_passes_flags_and_forwards_output() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(
            temp.path(),
            "echo \"args: $*\"\ngrep -c CreateDisks \"$5\"\necho 'from stderr' >&2\n",
        );
        let logger = Arc::new(BufferedLogger::new());
        let graph = graph(logger.clone());

        engine.execute(&graph).unwrap();

        let messages: Vec<String> = logger.entries().into_iter().map(|e| e.message).collect();
        let expected_file = temp
            .path()
            .join("scratch")
            .join("image-validation-01run.wf.json");
        assert!(messages.contains(&format!(
            "args: -project proj -zone us-west1-b {}",
            expected_file.display()
        )));
        assert!(messages.contains(&"1".to_string()));
        assert!(messages.contains(&"from stderr".to_string()));
        // Scratch file is removed after the run.
        assert!(!expected_file.exists());
    }

    #[test]
    fn test_validate_adds_flag() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path(), "echo \"args: $*\"\n");
        let logger = Arc::new(BufferedLogger::new());

        engine.validate(&graph(logger.clone())).unwrap();

        let entries = logger.entries();
        assert!(entries[0].message.contains("-zone us-west1-b -validate "));
    }

    #[test]
    fn test_nonzero_exit_is_failure_with_tail() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path(), "echo 'step wait-vm timed out'\nexit 3\n");
        let logger = Arc::new(BufferedLogger::new());

        let err = engine.execute(&graph(logger)).unwrap_err();

        match err {
            EngineError::Failed { name, reason } => {
                assert_eq!(name, "image-validation");
                assert!(reason.contains("step wait-vm timed out"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_zone_is_invalid() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path(), "exit 0\n");
        let mut graph = graph(Arc::new(BufferedLogger::new()));
        graph.zone = None;

        assert!(matches!(
            engine.execute(&graph),
            Err(EngineError::Invalid { .. })
        ));
    }

    #[test]
    fn test_missing_binary_is_spawn_failure() {
        let temp = tempfile::tempdir().unwrap();
        let engine = CommandEngine::new(temp.path().join("no-such-engine"), temp.path());
        let graph = graph(Arc::new(BufferedLogger::new()));

        assert!(matches!(
            engine.execute(&graph),
            Err(EngineError::SpawnFailed(_))
        ));
    }
}
