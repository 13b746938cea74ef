//! Capability declarations for extension security gates.
//!
//! # Responsibility
//! - Define the closed set of resource and action kinds an extension may
//!   request.
//! - Provide set algebra used by grant/revoke flows and access checks.
//!
//! # Invariants
//! - Resource/action strings are parsed strictly (case-sensitive, no aliases).
//! - A `CapabilitySet` never stores a resource with an empty action set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Clinical (or host) resource an extension may touch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Patient,
    Chart,
    Visit,
    TreatmentRecord,
    Appointment,
    /// Outbound network access. Informational for command gating.
    Network,
}

impl ResourceKind {
    /// Stable string id used in manifest declarations.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patient => RESOURCE_PATIENT,
            Self::Chart => RESOURCE_CHART,
            Self::Visit => RESOURCE_VISIT,
            Self::TreatmentRecord => RESOURCE_TREATMENT_RECORD,
            Self::Appointment => RESOURCE_APPOINTMENT,
            Self::Network => RESOURCE_NETWORK,
        }
    }

    /// User-facing short description.
    pub fn description(self) -> &'static str {
        match self {
            Self::Patient => "Patient demographics and contact details.",
            Self::Chart => "Clinical charts and progress notes.",
            Self::Visit => "Visit history and reception records.",
            Self::TreatmentRecord => "Treatment records and procedures performed.",
            Self::Appointment => "Appointment calendar entries.",
            Self::Network => "Outbound network access to remote services.",
        }
    }

    /// Whether this resource carries clinical data.
    pub fn is_clinical(self) -> bool {
        !matches!(self, Self::Network)
    }

    pub fn all() -> &'static [ResourceKind] {
        &[
            Self::Patient,
            Self::Chart,
            Self::Visit,
            Self::TreatmentRecord,
            Self::Appointment,
            Self::Network,
        ]
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation performed against a resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Read,
    Write,
    Delete,
    Export,
    Print,
}

impl ActionKind {
    /// Stable string id used in manifest declarations.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => ACTION_READ,
            Self::Write => ACTION_WRITE,
            Self::Delete => ACTION_DELETE,
            Self::Export => ACTION_EXPORT,
            Self::Print => ACTION_PRINT,
        }
    }

    pub fn all() -> &'static [ActionKind] {
        &[
            Self::Read,
            Self::Write,
            Self::Delete,
            Self::Export,
            Self::Print,
        ]
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const RESOURCE_PATIENT: &str = "patient";
pub const RESOURCE_CHART: &str = "chart";
pub const RESOURCE_VISIT: &str = "visit";
pub const RESOURCE_TREATMENT_RECORD: &str = "treatmentRecord";
pub const RESOURCE_APPOINTMENT: &str = "appointment";
pub const RESOURCE_NETWORK: &str = "network";

pub const ACTION_READ: &str = "read";
pub const ACTION_WRITE: &str = "write";
pub const ACTION_DELETE: &str = "delete";
pub const ACTION_EXPORT: &str = "export";
pub const ACTION_PRINT: &str = "print";

/// Parses one resource kind from its manifest string value.
pub fn parse_resource_kind(value: &str) -> Result<ResourceKind, CapabilityError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(CapabilityError::EmptyValue);
    }
    ResourceKind::all()
        .iter()
        .copied()
        .find(|kind| kind.as_str() == normalized)
        .ok_or_else(|| CapabilityError::UnsupportedResource(normalized.to_string()))
}

/// Parses one action kind from its manifest string value.
pub fn parse_action_kind(value: &str) -> Result<ActionKind, CapabilityError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(CapabilityError::EmptyValue);
    }
    ActionKind::all()
        .iter()
        .copied()
        .find(|kind| kind.as_str() == normalized)
        .ok_or_else(|| CapabilityError::UnsupportedAction(normalized.to_string()))
}

/// Parses `resource:action` shorthand, e.g. `patient:read`.
pub fn parse_capability_pair(value: &str) -> Result<(ResourceKind, ActionKind), CapabilityError> {
    let Some((resource, action)) = value.trim().split_once(':') else {
        return Err(CapabilityError::MalformedPair(value.to_string()));
    };
    Ok((parse_resource_kind(resource)?, parse_action_kind(action)?))
}

/// Mapping from resource kind to the set of permitted actions.
///
/// Used identically for the requested, granted and ungranted sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeMap<ResourceKind, BTreeSet<ActionKind>>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from `(resource, actions)` pairs, dropping empty entries.
    pub fn from_pairs<I, A>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (ResourceKind, A)>,
        A: IntoIterator<Item = ActionKind>,
    {
        let mut set = Self::new();
        for (resource, actions) in pairs {
            for action in actions {
                set.insert(resource, action);
            }
        }
        set
    }

    pub fn insert(&mut self, resource: ResourceKind, action: ActionKind) {
        self.0.entry(resource).or_default().insert(action);
    }

    pub fn contains(&self, resource: ResourceKind, action: ActionKind) -> bool {
        self.0
            .get(&resource)
            .is_some_and(|actions| actions.contains(&action))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    /// Number of `(resource, action)` pairs.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn actions(&self, resource: ResourceKind) -> Option<&BTreeSet<ActionKind>> {
        self.0.get(&resource).filter(|actions| !actions.is_empty())
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceKind, &BTreeSet<ActionKind>)> {
        self.0
            .iter()
            .filter(|(_, actions)| !actions.is_empty())
            .map(|(resource, actions)| (*resource, actions))
    }

    /// Flattened `(resource, action)` pairs in stable order.
    pub fn pairs(&self) -> impl Iterator<Item = (ResourceKind, ActionKind)> + '_ {
        self.0
            .iter()
            .flat_map(|(resource, actions)| actions.iter().map(move |action| (*resource, *action)))
    }

    pub fn intersection(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet::from_pairs(
            self.pairs()
                .filter(|(resource, action)| other.contains(*resource, *action))
                .map(|(resource, action)| (resource, [action])),
        )
    }

    pub fn difference(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet::from_pairs(
            self.pairs()
                .filter(|(resource, action)| !other.contains(*resource, *action))
                .map(|(resource, action)| (resource, [action])),
        )
    }

    pub fn is_subset(&self, other: &CapabilitySet) -> bool {
        self.pairs()
            .all(|(resource, action)| other.contains(resource, action))
    }
}

impl Display for CapabilitySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let rendered = self
            .pairs()
            .map(|(resource, action)| format!("{resource}:{action}"))
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&rendered)
    }
}

/// Capability parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    EmptyValue,
    UnsupportedResource(String),
    UnsupportedAction(String),
    MalformedPair(String),
}

impl Display for CapabilityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyValue => write!(f, "capability value must not be empty"),
            Self::UnsupportedResource(value) => {
                write!(f, "capability resource is unsupported: {value}")
            }
            Self::UnsupportedAction(value) => {
                write!(f, "capability action is unsupported: {value}")
            }
            Self::MalformedPair(value) => {
                write!(f, "capability must be `resource:action`, got `{value}`")
            }
        }
    }
}

impl Error for CapabilityError {}

#[cfg(test)]
mod tests {
    use super::{
        parse_action_kind, parse_capability_pair, parse_resource_kind, ActionKind,
        CapabilityError, CapabilitySet, ResourceKind,
    };

    fn sample() -> CapabilitySet {
        CapabilitySet::from_pairs([
            (ResourceKind::Patient, vec![ActionKind::Read, ActionKind::Write]),
            (ResourceKind::Chart, vec![ActionKind::Read]),
        ])
    }

    #[test]
    fn parses_supported_resource_and_action_strings() {
        assert_eq!(
            parse_resource_kind("treatmentRecord").expect("treatment record parse"),
            ResourceKind::TreatmentRecord
        );
        assert_eq!(
            parse_action_kind("export").expect("export parse"),
            ActionKind::Export
        );
    }

    #[test]
    fn rejects_unknown_and_non_canonical_values() {
        assert_eq!(
            parse_resource_kind("Patient").expect_err("capitalized resource must fail"),
            CapabilityError::UnsupportedResource("Patient".to_string())
        );
        assert_eq!(
            parse_action_kind("  ").expect_err("empty action must fail"),
            CapabilityError::EmptyValue
        );
        assert!(matches!(
            parse_capability_pair("patient"),
            Err(CapabilityError::MalformedPair(_))
        ));
    }

    #[test]
    fn parses_pair_shorthand() {
        assert_eq!(
            parse_capability_pair("visit:print").expect("pair parse"),
            (ResourceKind::Visit, ActionKind::Print)
        );
    }

    #[test]
    fn set_algebra_matches_expectations() {
        let requested = sample();
        let offered = CapabilitySet::from_pairs([
            (ResourceKind::Patient, vec![ActionKind::Read]),
            (ResourceKind::Network, vec![ActionKind::Read]),
        ]);

        let granted = requested.intersection(&offered);
        assert!(granted.contains(ResourceKind::Patient, ActionKind::Read));
        assert!(!granted.contains(ResourceKind::Network, ActionKind::Read));
        assert!(granted.is_subset(&requested));

        let ungranted = requested.difference(&granted);
        assert_eq!(ungranted.len(), 2);
        assert!(ungranted.contains(ResourceKind::Patient, ActionKind::Write));
        assert!(ungranted.contains(ResourceKind::Chart, ActionKind::Read));
    }

    #[test]
    fn empty_action_lists_do_not_count() {
        let set: CapabilitySet =
            serde_json::from_str(r#"{"patient": [], "chart": ["read"]}"#).expect("json parse");
        assert_eq!(set.len(), 1);
        assert!(set.actions(ResourceKind::Patient).is_none());
    }

    #[test]
    fn serializes_with_manifest_spelling() {
        let set = CapabilitySet::from_pairs([(ResourceKind::TreatmentRecord, [ActionKind::Read])]);
        let json = serde_json::to_string(&set).expect("serialize");
        assert_eq!(json, r#"{"treatmentRecord":["read"]}"#);
        assert_eq!(set.to_string(), "treatmentRecord:read");
    }

    #[test]
    fn rejects_unknown_resource_in_json() {
        let result = serde_json::from_str::<CapabilitySet>(r#"{"billing": ["read"]}"#);
        assert!(result.is_err());
    }
}
