//! Test report conversion.
//!
//! Turns the verbose output of a Go test binary into a [`TestReport`] and
//! moves reports to and from JUnit XML, the structured format consumed by CI.

mod gotest;
mod junit;
mod model;

pub use gotest::parse_go_test_output;
pub use junit::{parse_junit_xml, write_junit_xml};
pub use model::{CaseOutcome, PackageReport, ReportCounts, TestCase, TestReport};

/// Errors converting reports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("test output is empty")]
    EmptyOutput,

    #[error("invalid JUnit XML: {0}")]
    InvalidJunit(String),
}

/// Result type for report conversion.
pub type ReportResult<T> = Result<T, ReportError>;

/// Parse either a JUnit document or raw test binary output.
///
/// Input starting with `<` is treated as XML. Anything else is parsed as
/// `go test -v` output, attributed to `default_package` unless the output
/// names its package.
pub fn parse_report(text: &str, default_package: &str) -> ReportResult<TestReport> {
    if text.trim_start().starts_with('<') {
        parse_junit_xml(text)
    } else {
        parse_go_test_output(text, default_package)
    }
}

/// Parse a report in either format and re-serialize it as canonical JUnit XML.
pub fn canonicalize(text: &str, default_package: &str) -> ReportResult<(TestReport, String)> {
    let report = parse_report(text, default_package)?;
    let xml = write_junit_xml(&report);
    Ok((report, xml))
}
