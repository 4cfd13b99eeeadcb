//! Rule engine surface: rule identifiers, the rule trait, presets and the
//! per-stream [`Validator`].

use crate::issues::{Severity, ValidationIssue};
use crate::pipeline::ParseEvent;
use crate::reader::RandomAccessReader;
use crate::rules;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleId {
    #[serde(rename = "VR-001")]
    BoxSize,
    #[serde(rename = "VR-002")]
    ContainerBoundary,
    #[serde(rename = "VR-003")]
    VersionFlags,
    #[serde(rename = "VR-004")]
    FileTypeOrdering,
    #[serde(rename = "VR-005")]
    MovieDataOrdering,
    #[serde(rename = "VR-006")]
    UnknownBox,
    #[serde(rename = "VR-016")]
    FragmentSequence,
    #[serde(rename = "E3")]
    TopLevelOrdering,
}

impl RuleId {
    pub const ALL: [RuleId; 8] = [
        RuleId::BoxSize,
        RuleId::ContainerBoundary,
        RuleId::VersionFlags,
        RuleId::FileTypeOrdering,
        RuleId::MovieDataOrdering,
        RuleId::UnknownBox,
        RuleId::FragmentSequence,
        RuleId::TopLevelOrdering,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            RuleId::BoxSize => "VR-001",
            RuleId::ContainerBoundary => "VR-002",
            RuleId::VersionFlags => "VR-003",
            RuleId::FileTypeOrdering => "VR-004",
            RuleId::MovieDataOrdering => "VR-005",
            RuleId::UnknownBox => "VR-006",
            RuleId::FragmentSequence => "VR-016",
            RuleId::TopLevelOrdering => "E3",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RuleId::BoxSize => "Box Size Integrity",
            RuleId::ContainerBoundary => "Container Boundary Closure",
            RuleId::VersionFlags => "Version and Flags Consistency",
            RuleId::FileTypeOrdering => "File Type Ordering",
            RuleId::MovieDataOrdering => "Movie Data Ordering",
            RuleId::UnknownBox => "Unknown Box Advisory",
            RuleId::FragmentSequence => "Fragment Sequence",
            RuleId::TopLevelOrdering => "Top-Level Ordering Advisory",
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            RuleId::BoxSize => "Ensures declared sizes cover headers and remain within file bounds.",
            RuleId::ContainerBoundary => "Checks containers open and close at the exact declared offsets.",
            RuleId::VersionFlags => "Compares version and flag fields against catalog expectations.",
            RuleId::FileTypeOrdering => "Requires the ftyp box to appear before any media container.",
            RuleId::MovieDataOrdering => "Ensures moov precedes mdat unless streaming indicators allow otherwise.",
            RuleId::UnknownBox => "Notes box types that are absent from the catalog.",
            RuleId::FragmentSequence => "Checks mfhd sequence numbers start at 1 and strictly increase.",
            RuleId::TopLevelOrdering => "Flags unusual top-level boxes around ftyp and moov.",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            RuleId::BoxSize | RuleId::ContainerBoundary | RuleId::FileTypeOrdering => Severity::Error,
            RuleId::VersionFlags
            | RuleId::MovieDataOrdering
            | RuleId::FragmentSequence
            | RuleId::TopLevelOrdering => Severity::Warning,
            RuleId::UnknownBox => Severity::Info,
        }
    }

    /// Issue carrying this rule's id and default severity.
    pub fn issue(&self, message: impl Into<String>) -> ValidationIssue {
        ValidationIssue::new(self.code(), message, self.default_severity())
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PresetError {
    #[error("unknown rule id {0:?}")]
    UnknownRule(String),
    #[error("unknown preset {0:?}")]
    UnknownPreset(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid preset json: {0}")]
    Json(#[from] serde_json::Error),
}

impl FromStr for RuleId {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleId::ALL
            .into_iter()
            .find(|r| r.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| PresetError::UnknownRule(s.to_string()))
    }
}

/// A semantic check evaluated against every parse event.
///
/// Rules may keep state across events (ordering rules do); the validator
/// builds fresh instances for every stream.
pub trait ValidationRule: Send {
    fn id(&self) -> RuleId;

    fn check(&mut self, event: &ParseEvent, reader: &dyn RandomAccessReader) -> Vec<ValidationIssue>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetRule {
    pub rule_id: RuleId,
    pub enabled: bool,
}

/// Named set of rule toggles. Rules the preset does not mention stay enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPreset {
    pub id: String,
    pub name: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<PresetRule>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    presets: Vec<ValidationPreset>,
}

impl ValidationPreset {
    pub fn all_checks() -> Self {
        Self {
            id: "all-checks".to_string(),
            name: "All Checks".to_string(),
            summary: "Every built-in rule enabled.".to_string(),
            rules: Vec::new(),
        }
    }

    /// Size and boundary checks only.
    pub fn structural() -> Self {
        let off = [
            RuleId::VersionFlags,
            RuleId::FileTypeOrdering,
            RuleId::MovieDataOrdering,
            RuleId::UnknownBox,
            RuleId::FragmentSequence,
            RuleId::TopLevelOrdering,
        ];
        Self {
            id: "structural".to_string(),
            name: "Structural Only".to_string(),
            summary: "Box size and container boundary checks without ordering or advisory rules.".to_string(),
            rules: off.into_iter().map(|rule_id| PresetRule { rule_id, enabled: false }).collect(),
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::all_checks(), Self::structural()]
    }

    pub fn builtin_by_id(id: &str) -> Result<Self, PresetError> {
        Self::builtin()
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| PresetError::UnknownPreset(id.to_string()))
    }

    /// A single preset object, or a manifest `{"presets": [...]}` whose first
    /// entry is taken.
    pub fn from_json(json: &str) -> Result<Self, PresetError> {
        match serde_json::from_str::<ValidationPreset>(json) {
            Ok(p) => Ok(p),
            Err(single) => {
                let manifest: Manifest = serde_json::from_str(json).map_err(|_| single)?;
                manifest
                    .presets
                    .into_iter()
                    .next()
                    .ok_or_else(|| PresetError::UnknownPreset("<empty manifest>".to_string()))
            }
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PresetError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn is_rule_enabled(&self, rule: RuleId) -> bool {
        self.rules.iter().find(|r| r.rule_id == rule).is_none_or(|r| r.enabled)
    }
}

/// Which rules run for a parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub preset: Option<ValidationPreset>,
    #[serde(default)]
    pub disabled: BTreeSet<RuleId>,
}

impl ValidationConfig {
    pub fn with_preset(mut self, preset: ValidationPreset) -> Self {
        self.preset = Some(preset);
        self
    }

    pub fn disable(mut self, rule: RuleId) -> Self {
        self.disabled.insert(rule);
        self
    }

    pub fn is_enabled(&self, rule: RuleId) -> bool {
        !self.disabled.contains(&rule) && self.preset.as_ref().is_none_or(|p| p.is_rule_enabled(rule))
    }

    pub fn enabled_rules(&self) -> Vec<RuleId> {
        RuleId::ALL.into_iter().filter(|r| self.is_enabled(*r)).collect()
    }
}

/// Ordered set of rule instances for one stream.
#[derive(Default)]
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh built-in rules for every rule `config` enables.
    pub fn from_config(config: &ValidationConfig) -> Self {
        config
            .enabled_rules()
            .into_iter()
            .fold(Self::new(), |v, id| v.with_rule(rules::build(id)))
    }

    pub fn with_rule(mut self, rule: Box<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_ids(&self) -> Vec<RuleId> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule and append what they find to the event.
    pub fn annotate(&mut self, event: &mut ParseEvent, reader: &dyn RandomAccessReader) {
        for rule in &mut self.rules {
            let found = rule.check(event, reader);
            event.validation_issues.extend(found);
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator").field("rules", &self.rule_ids()).finish()
    }
}
