//! Step kinds and the resources they describe.
//!
//! Field names serialize in the engine's PascalCase workflow format.

use std::collections::BTreeMap;

use serde::Serialize;

/// Source name of the agent binary run at boot.
pub const STARTUP_SOURCE: &str = "startup";

/// Storage scope granted to every test machine so the agent can read the
/// test binary and write its report.
pub const STORAGE_READ_WRITE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// Serial port watched by wait steps.
const CONSOLE_PORT: u32 = 1;

/// A disk to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Disk {
    pub name: String,
    pub source_image: String,
}

impl Disk {
    pub fn new(name: impl Into<String>, source_image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_image: source_image.into(),
        }
    }
}

/// Disk attachment of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttachedDisk {
    pub source: String,
}

/// A machine to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub name: String,
    pub disks: Vec<AttachedDisk>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Source name of the script run at boot.
    pub startup_script: String,
    pub scopes: Vec<String>,
}

impl Instance {
    /// A test machine booting from `boot_disk` and running the agent at startup.
    pub fn new(name: impl Into<String>, boot_disk: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disks: vec![AttachedDisk {
                source: boot_disk.into(),
            }],
            metadata: BTreeMap::new(),
            startup_script: STARTUP_SOURCE.to_string(),
            scopes: vec![STORAGE_READ_WRITE_SCOPE.to_string()],
        }
    }

    pub fn boot_disk(&self) -> Option<&str> {
        self.disks.first().map(|d| d.source.as_str())
    }
}

/// Console output patterns a wait step matches against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SerialOutputMatch {
    pub port: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_match: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_match: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_match: Option<String>,
}

impl SerialOutputMatch {
    /// Build a match from optional patterns. Empty patterns are dropped, and
    /// `None` is returned when nothing is left to match.
    pub fn from_patterns(success: &str, failure: &str, status: &str) -> Option<Self> {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let output = Self {
            port: CONSOLE_PORT,
            success_match: non_empty(success),
            failure_match: non_empty(failure).into_iter().collect(),
            status_match: non_empty(status),
        };
        if output.success_match.is_none()
            && output.failure_match.is_empty()
            && output.status_match.is_none()
        {
            None
        } else {
            Some(output)
        }
    }
}

/// The condition a wait step blocks on for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceSignal {
    pub name: String,
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_output: Option<SerialOutputMatch>,
}

impl InstanceSignal {
    /// Wait until the machine stops.
    pub fn stopped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stopped: true,
            serial_output: None,
        }
    }
}

/// One object copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectCopy {
    pub source: String,
    pub destination: String,
}

/// Instances created by one step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateInstances {
    pub instances: Vec<Instance>,
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepKind {
    CreateDisks(Vec<Disk>),
    CreateInstances(CreateInstances),
    WaitForInstancesSignal(Vec<InstanceSignal>),
    #[serde(rename = "CopyGCSObjects")]
    CopyObjects(Vec<ObjectCopy>),
}

impl StepKind {
    /// Short label used in logs and errors.
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::CreateDisks(_) => "create-disks",
            StepKind::CreateInstances(_) => "create-instances",
            StepKind::WaitForInstancesSignal(_) => "wait",
            StepKind::CopyObjects(_) => "copy-objects",
        }
    }
}

/// A node of the provisioning graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    #[serde(flatten)]
    pub kind: StepKind,
    /// Engine timeout, e.g. `"30m"`. The engine default applies when unset.
    #[serde(rename = "Timeout", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            timeout: None,
        }
    }

    pub fn disks(&self) -> &[Disk] {
        match &self.kind {
            StepKind::CreateDisks(disks) => disks,
            _ => &[],
        }
    }

    pub fn instances(&self) -> &[Instance] {
        match &self.kind {
            StepKind::CreateInstances(create) => &create.instances,
            _ => &[],
        }
    }

    pub fn signals(&self) -> &[InstanceSignal] {
        match &self.kind {
            StepKind::WaitForInstancesSignal(signals) => signals,
            _ => &[],
        }
    }
}
