//! Extension manifest declaration and validation.
//!
//! # Responsibility
//! - Describe what an extension declares: identity, requested capabilities
//!   and contribution points.
//! - Parse `manifest.json` and reject declarations the host cannot honor.
//!
//! # Invariants
//! - A manifest is immutable once parsed; the registry never edits it.
//! - Every capability a command requires is also requested by the manifest.
//! - Unknown resource/action/context/template-type strings fail at load time.

use crate::extension::capability::{CapabilitySet, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// File name looked up inside every extension package directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// UI or automation surface a command may run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandContext {
    /// Sentinel matching every caller context.
    Global,
    Dashboard,
    PatientList,
    PatientDetail,
    ChartEditor,
    VisitList,
    VisitDetail,
    AppointmentCalendar,
    Automation,
}

impl CommandContext {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Dashboard => "dashboard",
            Self::PatientList => "patientList",
            Self::PatientDetail => "patientDetail",
            Self::ChartEditor => "chartEditor",
            Self::VisitList => "visitList",
            Self::VisitDetail => "visitDetail",
            Self::AppointmentCalendar => "appointmentCalendar",
            Self::Automation => "automation",
        }
    }

    pub fn all() -> &'static [CommandContext] {
        &[
            Self::Global,
            Self::Dashboard,
            Self::PatientList,
            Self::PatientDetail,
            Self::ChartEditor,
            Self::VisitList,
            Self::VisitDetail,
            Self::AppointmentCalendar,
            Self::Automation,
        ]
    }
}

impl Display for CommandContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a caller-supplied context token.
pub fn parse_command_context(value: &str) -> Option<CommandContext> {
    let normalized = value.trim();
    CommandContext::all()
        .iter()
        .copied()
        .find(|context| context.as_str() == normalized)
}

/// Output family of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Print,
    Export,
    Report,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Export => "export",
            Self::Report => "report",
        }
    }
}

/// User-triggered action contributed by an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandContribution {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub icon: Option<String>,
    /// Ordered list of surfaces the command may appear in.
    pub context: Vec<CommandContext>,
    #[serde(default)]
    pub required_capabilities: Option<CapabilitySet>,
    #[serde(default)]
    pub keybinding: Option<String>,
}

impl CommandContribution {
    /// Whether the command may run in `context` (directly or via `global`).
    pub fn runs_in(&self, context: CommandContext) -> bool {
        self.context
            .iter()
            .any(|allowed| *allowed == CommandContext::Global || *allowed == context)
    }
}

/// Print/export document contributed by an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateContribution {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TemplateKind,
    pub target_entity: ResourceKind,
    /// Path relative to the extension root.
    pub file: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Declaration-only contribution (exporters, integrations, views).
///
/// The host enumerates these for enabled extensions but never executes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveContribution {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// Contribution point lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributes {
    #[serde(default)]
    pub commands: Vec<CommandContribution>,
    #[serde(default)]
    pub templates: Vec<TemplateContribution>,
    #[serde(default)]
    pub exporters: Vec<PassiveContribution>,
    #[serde(default)]
    pub integrations: Vec<PassiveContribution>,
    #[serde(default)]
    pub views: Vec<PassiveContribution>,
}

/// Declarative extension manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Stable extension identifier, e.g. `acme.referral-letter`.
    pub id: String,
    pub name: String,
    /// Semantic version string (`major.minor.patch`).
    pub version: String,
    pub publisher: String,
    #[serde(default)]
    pub description: String,
    /// Requested capabilities.
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub contributes: Contributes,
}

impl ExtensionManifest {
    /// Parses and validates a manifest from JSON text.
    pub fn from_json_str(raw: &str) -> Result<Self, ManifestError> {
        let manifest: ExtensionManifest =
            serde_json::from_str(raw).map_err(|err| ManifestError::Parse(err.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reads `manifest.json` from an extension package directory.
    pub fn from_dir(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE_NAME);
        let raw = std::fs::read_to_string(&path).map_err(|err| ManifestError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    /// Validates declaration-level manifest invariants.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.id.trim().is_empty() {
            return Err(ManifestError::EmptyId);
        }
        if !is_valid_extension_id(&self.id) {
            return Err(ManifestError::InvalidId(self.id.clone()));
        }
        if self.version.trim().is_empty() {
            return Err(ManifestError::EmptyVersion);
        }
        if !is_semver_triplet(&self.version) {
            return Err(ManifestError::InvalidVersion(self.version.clone()));
        }
        if self.name.trim().is_empty() {
            return Err(ManifestError::EmptyField("name"));
        }
        if self.publisher.trim().is_empty() {
            return Err(ManifestError::EmptyField("publisher"));
        }

        let mut command_ids = BTreeSet::new();
        for command in &self.contributes.commands {
            if command.id.trim().is_empty() {
                return Err(ManifestError::EmptyContributionId("command"));
            }
            if !command_ids.insert(command.id.as_str()) {
                return Err(ManifestError::DuplicateContributionId(command.id.clone()));
            }
            if command.context.is_empty() {
                return Err(ManifestError::MissingCommandContext(command.id.clone()));
            }
            if let Some(required) = &command.required_capabilities {
                let undeclared = required.difference(&self.capabilities);
                if !undeclared.is_empty() {
                    return Err(ManifestError::UndeclaredCapability {
                        command_id: command.id.clone(),
                        capabilities: undeclared.to_string(),
                    });
                }
            }
        }

        let mut template_ids = BTreeSet::new();
        for template in &self.contributes.templates {
            if template.id.trim().is_empty() {
                return Err(ManifestError::EmptyContributionId("template"));
            }
            if !template_ids.insert(template.id.as_str()) {
                return Err(ManifestError::DuplicateContributionId(template.id.clone()));
            }
            if template.file.trim().is_empty() {
                return Err(ManifestError::EmptyTemplateFile(template.id.clone()));
            }
            if !template.target_entity.is_clinical() {
                return Err(ManifestError::InvalidTemplateTarget(template.id.clone()));
            }
        }

        for (kind, entries) in [
            ("exporter", &self.contributes.exporters),
            ("integration", &self.contributes.integrations),
            ("view", &self.contributes.views),
        ] {
            if entries.iter().any(|entry| entry.id.trim().is_empty()) {
                return Err(ManifestError::EmptyContributionId(kind));
            }
        }

        Ok(())
    }

    /// Placeholder used for packages whose manifest could not be loaded.
    pub(crate) fn unloadable(dir_name: &str) -> Self {
        Self {
            id: dir_name.to_string(),
            name: dir_name.to_string(),
            version: "0.0.0".to_string(),
            publisher: String::new(),
            description: String::new(),
            capabilities: CapabilitySet::new(),
            contributes: Contributes::default(),
        }
    }
}

fn is_valid_extension_id(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if c == '.' || c == '_' || c == '-' {
            if prev_separator {
                return false;
            }
            prev_separator = true;
            continue;
        }
        return false;
    }
    !prev_separator
}

fn is_semver_triplet(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// Manifest load and validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    Io { path: String, message: String },
    Parse(String),
    EmptyId,
    InvalidId(String),
    EmptyVersion,
    InvalidVersion(String),
    EmptyField(&'static str),
    EmptyContributionId(&'static str),
    DuplicateContributionId(String),
    MissingCommandContext(String),
    UndeclaredCapability {
        command_id: String,
        capabilities: String,
    },
    EmptyTemplateFile(String),
    InvalidTemplateTarget(String),
}

impl Display for ManifestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "failed to read manifest `{path}`: {message}"),
            Self::Parse(message) => write!(f, "manifest is not valid: {message}"),
            Self::EmptyId => write!(f, "manifest id must not be empty"),
            Self::InvalidId(value) => write!(f, "manifest id is invalid: {value}"),
            Self::EmptyVersion => write!(f, "manifest version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "manifest version is invalid: {value} (expected major.minor.patch)"
            ),
            Self::EmptyField(name) => write!(f, "manifest field must not be empty: {name}"),
            Self::EmptyContributionId(kind) => {
                write!(f, "manifest contains {kind} contribution without id")
            }
            Self::DuplicateContributionId(value) => {
                write!(f, "manifest contribution id is duplicated: {value}")
            }
            Self::MissingCommandContext(value) => {
                write!(f, "command declares no context: {value}")
            }
            Self::UndeclaredCapability {
                command_id,
                capabilities,
            } => write!(
                f,
                "command `{command_id}` requires capabilities not requested by the manifest: {capabilities}"
            ),
            Self::EmptyTemplateFile(value) => write!(f, "template declares no file: {value}"),
            Self::InvalidTemplateTarget(value) => {
                write!(f, "template target entity must be a clinical resource: {value}")
            }
        }
    }
}

impl Error for ManifestError {}

#[cfg(test)]
mod tests {
    use super::{
        parse_command_context, CommandContext, ExtensionManifest, ManifestError, TemplateKind,
    };
    use crate::extension::capability::{ActionKind, ResourceKind};

    const VALID: &str = r#"{
        "id": "acme.referral-letter",
        "name": "Referral Letter",
        "version": "1.2.0",
        "publisher": "Acme Medical",
        "description": "Prints referral letters",
        "capabilities": { "patient": ["read"], "chart": ["read", "print"], "network": ["read"] },
        "contributes": {
            "commands": [{
                "id": "acme.referral.open",
                "title": "Open referral",
                "context": ["patientDetail", "chartEditor"],
                "requiredCapabilities": { "patient": ["read"] },
                "keybinding": "Ctrl+Shift+R"
            }],
            "templates": [{
                "id": "acme.referral.letter",
                "name": "Referral letter",
                "type": "print",
                "targetEntity": "patient",
                "file": "templates/referral.html"
            }],
            "views": [{ "id": "acme.referral.panel", "name": "Referral panel", "slot": "sidebar" }]
        }
    }"#;

    fn valid_manifest() -> ExtensionManifest {
        ExtensionManifest::from_json_str(VALID).expect("valid manifest")
    }

    #[test]
    fn parses_full_manifest() {
        let manifest = valid_manifest();
        assert_eq!(manifest.id, "acme.referral-letter");
        assert!(manifest
            .capabilities
            .contains(ResourceKind::Chart, ActionKind::Print));

        let command = &manifest.contributes.commands[0];
        assert_eq!(
            command.context,
            vec![CommandContext::PatientDetail, CommandContext::ChartEditor]
        );
        assert_eq!(command.keybinding.as_deref(), Some("Ctrl+Shift+R"));

        let template = &manifest.contributes.templates[0];
        assert_eq!(template.kind, TemplateKind::Print);
        assert_eq!(template.target_entity, ResourceKind::Patient);

        let view = &manifest.contributes.views[0];
        assert_eq!(view.properties.get("slot"), Some(&serde_json::json!("sidebar")));
    }

    #[test]
    fn global_context_matches_every_surface() {
        let mut manifest = valid_manifest();
        let command = &mut manifest.contributes.commands[0];
        assert!(command.runs_in(CommandContext::ChartEditor));
        assert!(!command.runs_in(CommandContext::Dashboard));

        command.context = vec![CommandContext::Global];
        assert!(command.runs_in(CommandContext::Dashboard));
    }

    #[test]
    fn rejects_unknown_context_at_load_time() {
        let raw = VALID.replace("\"chartEditor\"", "\"billingScreen\"");
        let err = ExtensionManifest::from_json_str(&raw).expect_err("unknown context must fail");
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn rejects_command_capability_missing_from_request() {
        let mut manifest = valid_manifest();
        manifest.contributes.commands[0].required_capabilities =
            Some(crate::extension::capability::CapabilitySet::from_pairs([(
                ResourceKind::Visit,
                [ActionKind::Write],
            )]));
        let err = manifest.validate().expect_err("undeclared capability must fail");
        assert!(matches!(err, ManifestError::UndeclaredCapability { .. }));
    }

    #[test]
    fn rejects_duplicate_contribution_ids() {
        let mut manifest = valid_manifest();
        let duplicate = manifest.contributes.templates[0].clone();
        manifest.contributes.templates.push(duplicate);
        let err = manifest.validate().expect_err("duplicate template must fail");
        assert_eq!(
            err,
            ManifestError::DuplicateContributionId("acme.referral.letter".to_string())
        );
    }

    #[test]
    fn rejects_network_template_target() {
        let mut manifest = valid_manifest();
        manifest.contributes.templates[0].target_entity = ResourceKind::Network;
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::InvalidTemplateTarget(_))
        ));
    }

    #[test]
    fn rejects_invalid_id_and_version() {
        let mut manifest = valid_manifest();
        manifest.id = "Acme Referral".to_string();
        assert!(matches!(manifest.validate(), Err(ManifestError::InvalidId(_))));

        let mut manifest = valid_manifest();
        manifest.version = "v1".to_string();
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::InvalidVersion(_))
        ));
    }

    #[test]
    fn rejects_command_without_context() {
        let mut manifest = valid_manifest();
        manifest.contributes.commands[0].context.clear();
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::MissingCommandContext(
                "acme.referral.open".to_string()
            ))
        );
    }

    #[test]
    fn parses_context_tokens() {
        assert_eq!(
            parse_command_context("patientList"),
            Some(CommandContext::PatientList)
        );
        assert_eq!(parse_command_context("global"), Some(CommandContext::Global));
        assert_eq!(parse_command_context("PatientList"), None);
    }
}
