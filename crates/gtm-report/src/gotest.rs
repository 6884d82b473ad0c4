//! Parser for `go test -v` style output.
//!
//! Recognized lines:
//! - `=== RUN   TestName` starts a test
//! - `=== PAUSE|CONT|NAME TestName` switches the test output belongs to
//! - `--- PASS|FAIL|SKIP: TestName (0.00s)` finishes a test, possibly indented for subtests
//! - `ok  <package> 0.01s` / `FAIL <package> 0.01s` closes a package
//!
//! Everything else is log output of the test that was last started or
//! finished. A test that starts but never reports a result is a failure.
//! Output belonging to no test in a package that ran no tests (a binary that
//! crashed before its first test) becomes one failing case named after the
//! package.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::model::{CaseOutcome, PackageReport, TestCase, TestReport};
use crate::{ReportError, ReportResult};

/// Output line appended to tests that never reported a result.
const INCOMPLETE_MESSAGE: &str = "test did not complete";

/// Output line appended to the case standing in for a package without results.
const NO_RESULTS_MESSAGE: &str = "binary produced no test results";

/// Lines the test runner prints for a package that legitimately has no tests.
const NO_TESTS_PREFIX: &str = "testing: warning: no tests to run";

fn run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^=== RUN\s+(\S+)").expect("static regex"))
}

fn control_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^=== (?:PAUSE|CONT|NAME)\s+(\S+)").expect("static regex"))
}

fn result_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*--- (PASS|FAIL|SKIP): (\S+)(?: \(([0-9.]+)s\))?").expect("static regex")
    })
}

fn package_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(ok|FAIL)\s+(\S+)\s+(?:([0-9.]+)s|\(cached\)|\[no test files\])")
            .expect("static regex")
    })
}

struct PendingCase {
    name: String,
    outcome: Option<CaseOutcome>,
    duration_secs: f64,
    output: Vec<String>,
}

/// Index of the still-running case called `name`, inserting one if needed.
fn pending_index(cases: &mut Vec<PendingCase>, name: &str) -> usize {
    if let Some(idx) = cases
        .iter()
        .rposition(|c| c.name == name && c.outcome.is_none())
    {
        return idx;
    }
    cases.push(PendingCase {
        name: name.to_string(),
        outcome: None,
        duration_secs: 0.0,
        output: Vec::new(),
    });
    cases.len() - 1
}

fn latest_index(cases: &[PendingCase], name: &str) -> Option<usize> {
    cases.iter().rposition(|c| c.name == name)
}

fn finish_package(
    name: &str,
    duration_secs: f64,
    cases: &mut Vec<PendingCase>,
    stray: &mut Vec<String>,
) -> PackageReport {
    if cases.is_empty() && !stray.is_empty() {
        let mut output: Vec<String> = stray.drain(..).collect();
        output.push(NO_RESULTS_MESSAGE.to_string());
        cases.push(PendingCase {
            name: name.to_string(),
            outcome: Some(CaseOutcome::Fail),
            duration_secs: 0.0,
            output,
        });
    }
    stray.clear();

    let tests = cases
        .drain(..)
        .map(|mut case| {
            let outcome = case.outcome.unwrap_or_else(|| {
                case.output.push(INCOMPLETE_MESSAGE.to_string());
                CaseOutcome::Fail
            });
            TestCase {
                name: case.name,
                duration_secs: case.duration_secs,
                outcome,
                output: case.output,
            }
        })
        .collect();
    PackageReport {
        name: name.to_string(),
        duration_secs,
        tests,
    }
}

fn parse_secs(value: Option<regex_lite::Match<'_>>) -> f64 {
    value.and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0)
}

/// Parse verbose test binary output into a report.
///
/// Output without a package summary line is attributed to `package`, with
/// the package duration taken as the sum of its test durations.
pub fn parse_go_test_output(input: &str, package: &str) -> ReportResult<TestReport> {
    if input.trim().is_empty() {
        return Err(ReportError::EmptyOutput);
    }

    let mut report = TestReport::default();
    let mut cases: Vec<PendingCase> = Vec::new();
    let mut current: Option<usize> = None;
    let mut stray: Vec<String> = Vec::new();

    for line in input.lines() {
        if let Some(caps) = run_re().captures(line) {
            current = Some(pending_index(&mut cases, &caps[1]));
            continue;
        }

        if let Some(caps) = control_re().captures(line) {
            current = latest_index(&cases, &caps[1]);
            continue;
        }

        if let Some(caps) = result_re().captures(line) {
            let outcome = match &caps[1] {
                "PASS" => CaseOutcome::Pass,
                "SKIP" => CaseOutcome::Skip,
                _ => CaseOutcome::Fail,
            };
            let idx = pending_index(&mut cases, &caps[2]);
            cases[idx].outcome = Some(outcome);
            cases[idx].duration_secs = parse_secs(caps.get(3));
            current = Some(idx);
            continue;
        }

        if let Some(caps) = package_re().captures(line) {
            let duration = parse_secs(caps.get(3));
            report
                .packages
                .push(finish_package(&caps[2], duration, &mut cases, &mut stray));
            current = None;
            continue;
        }

        let text = line.trim_start();
        if text.is_empty() || text == "PASS" || text == "FAIL" {
            continue;
        }
        match current {
            Some(idx) => cases[idx].output.push(text.to_string()),
            None if text.starts_with(NO_TESTS_PREFIX) => {}
            None => stray.push(text.to_string()),
        }
    }

    if !cases.is_empty() || report.packages.is_empty() {
        // An empty f64 sum is -0.0, which renders as "-0.000".
        let duration = cases.iter().fold(0.0, |acc, c| acc + c.duration_secs);
        report
            .packages
            .push(finish_package(package, duration, &mut cases, &mut stray));
    }

    Ok(report)
}
