//! Structured test report.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Outcome of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseOutcome {
    Pass,
    Fail,
    Skip,
}

/// A single test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Test name as printed by the test binary, subtests included (`TestA/sub`).
    pub name: String,
    pub duration_secs: f64,
    pub outcome: CaseOutcome,
    /// Log lines attributed to the test.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, outcome: CaseOutcome, duration_secs: f64) -> Self {
        Self {
            name: name.into(),
            duration_secs,
            outcome,
            output: Vec::new(),
        }
    }
}

/// All test cases of one package (one test binary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageReport {
    pub name: String,
    pub duration_secs: f64,
    pub tests: Vec<TestCase>,
}

impl PackageReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration_secs: 0.0,
            tests: Vec::new(),
        }
    }

    pub fn counts(&self) -> ReportCounts {
        let mut counts = ReportCounts::default();
        for test in &self.tests {
            counts.record(test.outcome);
        }
        counts
    }
}

/// Pass/fail/skip tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl ReportCounts {
    fn record(&mut self, outcome: CaseOutcome) {
        self.total += 1;
        match outcome {
            CaseOutcome::Pass => self.passed += 1,
            CaseOutcome::Fail => self.failed += 1,
            CaseOutcome::Skip => self.skipped += 1,
        }
    }

    fn add(&mut self, other: ReportCounts) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// A full report: one entry per package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub packages: Vec<PackageReport>,
}

impl TestReport {
    pub fn counts(&self) -> ReportCounts {
        let mut counts = ReportCounts::default();
        for package in &self.packages {
            counts.add(package.counts());
        }
        counts
    }

    /// Names of every test case across all packages.
    pub fn test_names(&self) -> BTreeSet<String> {
        self.packages
            .iter()
            .flat_map(|p| p.tests.iter().map(|t| t.name.clone()))
            .collect()
    }

    /// True when no test case failed.
    pub fn is_success(&self) -> bool {
        self.counts().failed == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.packages.iter().fold(0.0, |acc, p| acc + p.duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TestReport {
        let mut ssh = PackageReport::new("ssh");
        ssh.tests.push(TestCase::new("TestVm1", CaseOutcome::Pass, 0.1));
        ssh.tests.push(TestCase::new("TestVm2", CaseOutcome::Fail, 0.2));
        let mut boot = PackageReport::new("boot");
        boot.tests.push(TestCase::new("TestBoot", CaseOutcome::Skip, 0.0));
        TestReport {
            packages: vec![ssh, boot],
        }
    }

    #[test]
    fn test_counts_across_packages() {
        let counts = sample().counts();
        assert_eq!(
            counts,
            ReportCounts {
                total: 3,
                passed: 1,
                failed: 1,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_names_and_success() {
        let report = sample();
        let names: Vec<_> = report.test_names().into_iter().collect();
        assert_eq!(names, vec!["TestBoot", "TestVm1", "TestVm2"]);
        assert!(!report.is_success());
        assert!(TestReport::default().is_success());
    }

    #[test]
    fn test_empty_report_duration_is_positive_zero() {
        let duration = TestReport::default().duration_secs();
        assert_eq!(duration, 0.0);
        assert!(duration.is_sign_positive());
    }

    #[test]
    fn test_serializes_outcome_lowercase() {
        let case = TestCase::new("TestX", CaseOutcome::Skip, 0.0);
        let json = serde_json::to_value(&case).unwrap();
        assert_eq!(json["outcome"], "skip");
        assert!(json.get("output").is_none());
    }
}
