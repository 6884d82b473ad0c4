//! Per-workflow results and the run summary.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use gtm_report::{CaseOutcome, PackageReport, TestCase, TestReport};
use serde::{Deserialize, Serialize};

/// How a workflow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Excluded by the suite filter.
    Skipped,
    /// Suite setup failed or never built a graph.
    SetupFailed,
    /// The engine or result collection failed.
    WorkflowFailed,
    WorkflowSuccess,
}

impl Outcome {
    /// True for outcomes that do not fail the run.
    pub fn is_ok(self) -> bool {
        matches!(self, Outcome::Skipped | Outcome::WorkflowSuccess)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Skipped => "skipped",
            Outcome::SetupFailed => "setup_failed",
            Outcome::WorkflowFailed => "workflow_failed",
            Outcome::WorkflowSuccess => "workflow_success",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single result recorded for a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub image: String,
    pub outcome: Outcome,
    /// Canonical report on success, error message on failure, empty otherwise.
    pub payload: String,
}

impl TestResult {
    pub fn new(name: &str, image: &str, outcome: Outcome, payload: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            outcome,
            payload: payload.into(),
        }
    }

    /// `<name> [<image>]`, the label used in summaries and reports.
    pub fn label(&self) -> String {
        format!("{} [{}]", self.name, self.image)
    }

    /// One summary line.
    pub fn summary_line(&self) -> String {
        match self.outcome {
            Outcome::WorkflowSuccess => {
                let detail = match gtm_report::parse_junit_xml(&self.payload) {
                    Ok(report) => {
                        let counts = report.counts();
                        format!(
                            "{} tests, {} passed, {} failed, {} skipped",
                            counts.total, counts.passed, counts.failed, counts.skipped
                        )
                    }
                    Err(e) => format!("unreadable report: {}", e),
                };
                format!("{}: {} ({})", self.label(), self.outcome, detail)
            }
            Outcome::Skipped => format!("{}: {}", self.label(), self.outcome),
            Outcome::SetupFailed | Outcome::WorkflowFailed => {
                let first_line = self.payload.lines().next().unwrap_or_default();
                if first_line.is_empty() {
                    format!("{}: {}", self.label(), self.outcome)
                } else {
                    format!("{}: {}: {}", self.label(), self.outcome, first_line)
                }
            }
        }
    }
}

/// Totals per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub skipped: usize,
    pub setup_failed: usize,
    pub workflow_failed: usize,
    pub workflow_success: usize,
}

/// All results of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub results: Vec<TestResult>,
}

impl RunSummary {
    pub fn new(results: Vec<TestResult>) -> Self {
        Self { results }
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for result in &self.results {
            match result.outcome {
                Outcome::Skipped => counts.skipped += 1,
                Outcome::SetupFailed => counts.setup_failed += 1,
                Outcome::WorkflowFailed => counts.workflow_failed += 1,
                Outcome::WorkflowSuccess => counts.workflow_success += 1,
            }
        }
        counts
    }

    /// True when every workflow was skipped or succeeded.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_ok())
    }

    /// One line per workflow, sorted by label, then a totals line.
    pub fn lines(&self) -> Vec<String> {
        let mut sorted: Vec<&TestResult> = self.results.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.image.cmp(&b.image)));
        let mut lines: Vec<String> = sorted.iter().map(|r| r.summary_line()).collect();
        let counts = self.counts();
        lines.push(format!(
            "{} workflows: {} succeeded, {} failed, {} setup failed, {} skipped",
            self.results.len(),
            counts.workflow_success,
            counts.workflow_failed,
            counts.setup_failed,
            counts.skipped
        ));
        lines
    }

    /// Combined report with one package per workflow.
    ///
    /// Successful workflows contribute their test cases. Every other
    /// workflow is represented by a single case: failing for setup or
    /// workflow failures, skipped for filtered-out suites.
    pub fn combined_report(&self) -> TestReport {
        let mut report = TestReport::default();
        for result in &self.results {
            let mut package = PackageReport::new(result.label());
            match result.outcome {
                Outcome::WorkflowSuccess => match gtm_report::parse_junit_xml(&result.payload) {
                    Ok(parsed) => {
                        package.duration_secs = parsed.duration_secs();
                        package.tests = parsed.packages.into_iter().flat_map(|p| p.tests).collect();
                    }
                    Err(e) => package.tests.push(placeholder(
                        "report",
                        CaseOutcome::Fail,
                        &format!("unreadable report: {}", e),
                    )),
                },
                Outcome::WorkflowFailed => package.tests.push(placeholder(
                    "workflow",
                    CaseOutcome::Fail,
                    &result.payload,
                )),
                Outcome::SetupFailed => {
                    package
                        .tests
                        .push(placeholder("setup", CaseOutcome::Fail, &result.payload))
                }
                Outcome::Skipped => package.tests.push(placeholder(
                    "workflow",
                    CaseOutcome::Skip,
                    "excluded by filter",
                )),
            }
            report.packages.push(package);
        }
        report
    }

    /// Write the combined report as JUnit XML, temp-then-rename.
    pub fn write_junit(&self, path: &Path) -> io::Result<()> {
        let xml = gtm_report::write_junit_xml(&self.combined_report());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "junit.xml".to_string());
        let temp_path = path.with_file_name(format!(".{}.tmp", file_name));
        fs::write(&temp_path, xml)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

fn placeholder(name: &str, outcome: CaseOutcome, message: &str) -> TestCase {
    let mut case = TestCase::new(name, outcome, 0.0);
    case.output = message.lines().map(str::to_string).collect();
    case
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
=== RUN   TestVm1
--- PASS: TestVm1 (0.50s)
=== RUN   TestVm2
    ssh_test.go:9: refused
--- FAIL: TestVm2 (0.25s)
";

    fn success() -> TestResult {
        let (_, xml) = gtm_report::canonicalize(REPORT, "ssh").unwrap();
        TestResult::new("ssh", "debian-10", Outcome::WorkflowSuccess, xml)
    }

    fn summary() -> RunSummary {
        RunSummary::new(vec![
            success(),
            TestResult::new(
                "oslogin",
                "windows-2019",
                Outcome::SetupFailed,
                "image windows-2019 is not supported",
            ),
            TestResult::new("shutdown-scripts", "debian-10", Outcome::Skipped, ""),
            TestResult::new(
                "image-validation",
                "debian-10",
                Outcome::WorkflowFailed,
                "graph \"image-validation\" failed: wait timed out",
            ),
        ])
    }

    #[test]
    fn test_counts_and_success() {
        let summary = summary();
        assert_eq!(
            summary.counts(),
            OutcomeCounts {
                skipped: 1,
                setup_failed: 1,
                workflow_failed: 1,
                workflow_success: 1
            }
        );
        assert!(!summary.is_success());

        let ok = RunSummary::new(vec![
            success(),
            TestResult::new("x", "y", Outcome::Skipped, ""),
        ]);
        assert!(ok.is_success());
        assert!(RunSummary::default().is_success());
    }

    #[test]
    fn test_summary_lines() {
        let lines = summary().lines();
        assert_eq!(lines.len(), 5);
        assert_eq!(
            lines[0],
            "image-validation [debian-10]: workflow_failed: graph \"image-validation\" failed: wait timed out"
        );
        assert_eq!(lines[2], "shutdown-scripts [debian-10]: skipped");
        assert_eq!(
            lines[3],
            "ssh [debian-10]: workflow_success (2 tests, 1 passed, 1 failed, 0 skipped)"
        );
        assert_eq!(
            lines[4],
            "4 workflows: 1 succeeded, 1 failed, 1 setup failed, 1 skipped"
        );
    }

    #[test]
    fn test_combined_report() {
        let report = summary().combined_report();
        assert_eq!(report.packages.len(), 4);

        let ssh = &report.packages[0];
        assert_eq!(ssh.name, "ssh [debian-10]");
        assert_eq!(ssh.tests.len(), 2);

        let setup = &report.packages[1];
        assert_eq!(setup.tests[0].name, "setup");
        assert_eq!(setup.tests[0].outcome, CaseOutcome::Fail);
        assert_eq!(setup.tests[0].output, vec!["image windows-2019 is not supported"]);

        assert_eq!(report.packages[2].tests[0].outcome, CaseOutcome::Skip);

        let counts = report.counts();
        assert_eq!(counts.total, 5);
        assert_eq!(counts.failed, 3);
        assert_eq!(counts.skipped, 1);
    }

    #[test]
    fn test_write_junit() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("out").join("junit.xml");

        summary().write_junit(&path).unwrap();

        let xml = fs::read_to_string(&path).unwrap();
        assert!(xml.contains("<testsuite name=\"ssh [debian-10]\""));
        let parsed = gtm_report::parse_junit_xml(&xml).unwrap();
        assert_eq!(parsed.packages.len(), 4);
        assert!(!temp.path().join("out").join(".junit.xml.tmp").exists());
    }
}
