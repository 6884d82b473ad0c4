//! JUnit XML reading and writing.
//!
//! The writer emits one `<testsuite>` per package. Failing cases carry their
//! output as the body of a `<failure>` element, skipped cases carry it in the
//! `message` attribute of `<skipped>`, and passing cases drop it. Parsing what
//! the writer produced and writing it again yields identical text.
//!
//! The reader is a small tag scanner, not a general XML parser. It accepts the
//! JUnit subset emitted by common test runners: `testsuites`, `testsuite`,
//! `testcase`, `failure`, `error` and `skipped`. Other elements are ignored.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::model::{CaseOutcome, PackageReport, TestCase, TestReport};
use crate::{ReportError, ReportResult};

/// `message` attribute written on `<failure>` elements.
const FAILURE_MESSAGE: &str = "Failed";

/// Serialize a report as JUnit XML.
pub fn write_junit_xml(report: &TestReport) -> String {
    let counts = report.counts();
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuites tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{:.3}\">\n",
        counts.total,
        counts.failed,
        counts.skipped,
        report.duration_secs()
    ));

    for package in &report.packages {
        let counts = package.counts();
        xml.push_str(&format!(
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"0\" skipped=\"{}\" time=\"{:.3}\">\n",
            attr_escape(&package.name),
            counts.total,
            counts.failed,
            counts.skipped,
            package.duration_secs
        ));

        for test in &package.tests {
            let open = format!(
                "    <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\"",
                attr_escape(&package.name),
                attr_escape(&test.name),
                test.duration_secs
            );
            match test.outcome {
                CaseOutcome::Pass => {
                    xml.push_str(&open);
                    xml.push_str("></testcase>\n");
                }
                CaseOutcome::Fail => {
                    xml.push_str(&open);
                    xml.push_str(">\n");
                    xml.push_str(&format!(
                        "      <failure message=\"{}\" type=\"\">{}</failure>\n",
                        FAILURE_MESSAGE,
                        xml_escape(&test.output.join("\n"))
                    ));
                    xml.push_str("    </testcase>\n");
                }
                CaseOutcome::Skip => {
                    xml.push_str(&open);
                    xml.push_str(">\n");
                    xml.push_str(&format!(
                        "      <skipped message=\"{}\"></skipped>\n",
                        attr_escape(&test.output.join("\n"))
                    ));
                    xml.push_str("    </testcase>\n");
                }
            }
        }

        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

/// XML-escape text content.
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// XML-escape an attribute value, keeping line breaks and tabs intact.
fn attr_escape(s: &str) -> String {
    xml_escape(s)
        .replace('\n', "&#xA;")
        .replace('\r', "&#xD;")
        .replace('\t', "&#x9;")
}

/// Resolve the predefined and numeric entities. Unknown entities are kept
/// as written.
fn xml_unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = after.find(';') else {
            out.push_str(after);
            return out;
        };
        let entity = &after[1..end];
        let resolved = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .map(|hex| u32::from_str_radix(hex, 16))
                .or_else(|| entity.strip_prefix('#').map(|dec| dec.parse::<u32>()))
                .and_then(|n| n.ok())
                .and_then(char::from_u32),
        };
        match resolved {
            Some(c) => out.push(c),
            None => out.push_str(&after[..=end]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"<(/?)([A-Za-z_][\w:.-]*)((?:\s+[\w:.-]+\s*=\s*(?:"[^"]*"|'[^']*'))*)\s*(/?)>"#,
        )
        .expect("static regex")
    })
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([\w:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
    })
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    attr_re().captures_iter(attrs).find_map(|caps| {
        if &caps[1] != name {
            return None;
        }
        let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        Some(xml_unescape(value))
    })
}

fn attribute_secs(attrs: &str) -> f64 {
    attribute(attrs, "time")
        .and_then(|t| t.trim().parse().ok())
        .unwrap_or(0.0)
}

/// Split element text or an attribute value into output lines.
fn text_lines(text: &str) -> Vec<String> {
    let text = text.replace("<![CDATA[", "").replace("]]>", "");
    let text = text.trim_matches(|c| c == '\n' || c == '\r');
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.lines().map(str::to_string).collect()
}

/// Element whose text content is being collected.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Capture {
    Failure,
    Skipped,
}

struct OpenCase {
    case: TestCase,
    failure_message: Option<String>,
    capture: Option<Capture>,
    text: String,
}

impl OpenCase {
    /// Close the `<failure>`/`<skipped>` element currently collecting text.
    fn close_capture(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        let lines = text_lines(&xml_unescape(&std::mem::take(&mut self.text)));
        if !lines.is_empty() {
            self.case.output.extend(lines);
        } else if capture == Capture::Failure {
            // Runners that only report a message put the detail there.
            if let Some(message) = self.failure_message.take() {
                if message != FAILURE_MESSAGE {
                    self.case.output.extend(text_lines(&message));
                }
            }
        }
    }
}

/// Parse a JUnit XML document.
///
/// Every `<testsuite>` becomes a package. Nested suites are flattened.
pub fn parse_junit_xml(xml: &str) -> ReportResult<TestReport> {
    let mut report = TestReport::default();
    let mut suites: Vec<PackageReport> = Vec::new();
    let mut open: Option<OpenCase> = None;
    let mut saw_suite = false;
    let mut cursor = 0usize;

    for caps in tag_re().captures_iter(xml) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if let Some(case) = open.as_mut() {
            if case.capture.is_some() {
                case.text.push_str(&xml[cursor..whole.start()]);
            }
        }
        cursor = whole.end();

        let closing = !caps[1].is_empty();
        let name = &caps[2];
        let attrs = caps.get(3).map_or("", |m| m.as_str());
        let self_closing = !caps[4].is_empty();

        match (name, closing) {
            ("testsuite", false) => {
                saw_suite = true;
                let mut package = PackageReport::new(attribute(attrs, "name").unwrap_or_default());
                package.duration_secs = attribute_secs(attrs);
                if self_closing {
                    report.packages.push(package);
                } else {
                    suites.push(package);
                }
            }
            ("testsuite", true) => {
                if open.is_some() {
                    return Err(ReportError::InvalidJunit(
                        "testsuite closed inside an open testcase".to_string(),
                    ));
                }
                let package = suites.pop().ok_or_else(|| {
                    ReportError::InvalidJunit("unbalanced </testsuite>".to_string())
                })?;
                report.packages.push(package);
            }
            ("testcase", false) => {
                if open.is_some() {
                    return Err(ReportError::InvalidJunit("nested testcase".to_string()));
                }
                let suite = suites.last_mut().ok_or_else(|| {
                    ReportError::InvalidJunit("testcase outside of a testsuite".to_string())
                })?;
                let test_name = attribute(attrs, "name")
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        ReportError::InvalidJunit("testcase without a name".to_string())
                    })?;
                let case = TestCase::new(test_name, CaseOutcome::Pass, attribute_secs(attrs));
                if self_closing {
                    suite.tests.push(case);
                } else {
                    open = Some(OpenCase {
                        case,
                        failure_message: None,
                        capture: None,
                        text: String::new(),
                    });
                }
            }
            ("testcase", true) => {
                let mut case = open.take().ok_or_else(|| {
                    ReportError::InvalidJunit("unbalanced </testcase>".to_string())
                })?;
                case.close_capture();
                let suite = suites.last_mut().ok_or_else(|| {
                    ReportError::InvalidJunit("testcase outside of a testsuite".to_string())
                })?;
                suite.tests.push(case.case);
            }
            ("failure" | "error", false) => {
                if let Some(case) = open.as_mut() {
                    case.case.outcome = CaseOutcome::Fail;
                    case.failure_message = attribute(attrs, "message");
                    case.capture = Some(Capture::Failure);
                    if self_closing {
                        case.close_capture();
                    }
                }
            }
            ("skipped", false) => {
                if let Some(case) = open.as_mut() {
                    if case.case.outcome != CaseOutcome::Fail {
                        case.case.outcome = CaseOutcome::Skip;
                    }
                    if let Some(message) = attribute(attrs, "message") {
                        case.case.output.extend(text_lines(&message));
                    }
                    case.capture = Some(Capture::Skipped);
                    if self_closing {
                        case.close_capture();
                    }
                }
            }
            ("failure" | "error" | "skipped", true) => {
                if let Some(case) = open.as_mut() {
                    case.close_capture();
                }
            }
            _ => {}
        }
    }

    if open.is_some() {
        return Err(ReportError::InvalidJunit("unclosed testcase".to_string()));
    }
    if !suites.is_empty() {
        return Err(ReportError::InvalidJunit("unclosed testsuite".to_string()));
    }
    if !saw_suite {
        return Err(ReportError::InvalidJunit("no testsuite elements".to_string()));
    }

    Ok(report)
}
