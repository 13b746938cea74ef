//! Risk assessment derived from requested capabilities.
//!
//! The assessment is a pure function of a `CapabilitySet`; it is recomputed
//! on demand and never stored apart from the manifest it came from.

use crate::extension::capability::{ActionKind, CapabilitySet, ResourceKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One scored capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskEntry {
    pub resource: ResourceKind,
    pub action: ActionKind,
    pub risk: RiskLevel,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    pub overall: RiskLevel,
    pub entries: Vec<RiskEntry>,
}

impl RiskAssessment {
    /// Entries at or above `level`.
    pub fn at_least(&self, level: RiskLevel) -> impl Iterator<Item = &RiskEntry> {
        self.entries.iter().filter(move |entry| entry.risk >= level)
    }
}

/// Scores every requested capability; overall is the maximum entry.
pub fn assess_capabilities(capabilities: &CapabilitySet) -> RiskAssessment {
    let entries: Vec<RiskEntry> = capabilities
        .pairs()
        .map(|(resource, action)| {
            let (risk, reason) = score(resource, action);
            RiskEntry {
                resource,
                action,
                risk,
                reason,
            }
        })
        .collect();

    let overall = entries
        .iter()
        .map(|entry| entry.risk)
        .max()
        .unwrap_or(RiskLevel::Low);

    RiskAssessment { overall, entries }
}

fn score(resource: ResourceKind, action: ActionKind) -> (RiskLevel, &'static str) {
    if resource == ResourceKind::Network {
        return (
            RiskLevel::High,
            "Can send data to servers outside the clinic.",
        );
    }
    match action {
        ActionKind::Delete => (RiskLevel::High, "Can permanently delete clinical records."),
        ActionKind::Export => (
            RiskLevel::High,
            "Can export clinical records out of the application.",
        ),
        ActionKind::Write => (RiskLevel::Medium, "Can modify clinical records."),
        ActionKind::Read | ActionKind::Print if is_sensitive(resource) => (
            RiskLevel::Medium,
            "Can view personally identifiable or medical information.",
        ),
        ActionKind::Read | ActionKind::Print => {
            (RiskLevel::Low, "Can view scheduling or visit metadata.")
        }
    }
}

fn is_sensitive(resource: ResourceKind) -> bool {
    matches!(
        resource,
        ResourceKind::Patient | ResourceKind::Chart | ResourceKind::TreatmentRecord
    )
}

#[cfg(test)]
mod tests {
    use super::{assess_capabilities, RiskLevel};
    use crate::extension::capability::{ActionKind, CapabilitySet, ResourceKind};

    #[test]
    fn empty_set_is_low_risk() {
        let assessment = assess_capabilities(&CapabilitySet::new());
        assert_eq!(assessment.overall, RiskLevel::Low);
        assert!(assessment.entries.is_empty());
    }

    #[test]
    fn overall_is_highest_entry() {
        let caps = CapabilitySet::from_pairs([
            (ResourceKind::Appointment, vec![ActionKind::Read]),
            (ResourceKind::Chart, vec![ActionKind::Write]),
        ]);
        let assessment = assess_capabilities(&caps);
        assert_eq!(assessment.overall, RiskLevel::Medium);
        assert_eq!(assessment.entries.len(), 2);
        assert_eq!(assessment.at_least(RiskLevel::Medium).count(), 1);
    }

    #[test]
    fn network_and_export_are_high() {
        let caps = CapabilitySet::from_pairs([
            (ResourceKind::Network, vec![ActionKind::Read]),
            (ResourceKind::Visit, vec![ActionKind::Export]),
        ]);
        let assessment = assess_capabilities(&caps);
        assert_eq!(assessment.overall, RiskLevel::High);
        assert!(assessment
            .entries
            .iter()
            .all(|entry| entry.risk == RiskLevel::High));
    }

    #[test]
    fn assessment_is_deterministic() {
        let caps = CapabilitySet::from_pairs([(
            ResourceKind::Patient,
            vec![ActionKind::Read, ActionKind::Print],
        )]);
        assert_eq!(assess_capabilities(&caps), assess_capabilities(&caps));
    }
}
