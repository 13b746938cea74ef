use medext_core::{
    ActionKind, CapabilitySet, CommandContext, ExtensionHost, ExtensionRegistry, ExtensionState,
    HostError, RegistryError, ResourceKind, StaticLicenseGate,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn write_manifest(root: &Path, dir: &str, body: &str) {
    let package = root.join(dir);
    fs::create_dir_all(&package).expect("create package dir");
    fs::write(package.join("manifest.json"), body).expect("write manifest");
}

fn referral_manifest(version: &str, capabilities: &str) -> String {
    format!(
        r#"{{
            "id": "acme.referral",
            "name": "Referral Letter",
            "version": "{version}",
            "publisher": "Acme Medical",
            "description": "Creates referral letters",
            "capabilities": {capabilities},
            "contributes": {{
                "commands": [
                    {{
                        "id": "acme.referral.create",
                        "title": "Create referral",
                        "context": ["patientDetail"],
                        "requiredCapabilities": {{ "patient": ["read"] }}
                    }}
                ],
                "templates": [
                    {{
                        "id": "acme.referral.letter",
                        "name": "Referral letter",
                        "type": "print",
                        "targetEntity": "patient",
                        "file": "templates/letter.html"
                    }}
                ],
                "exporters": [{{ "id": "acme.referral.csv", "name": "CSV" }}]
            }}
        }}"#
    )
}

fn caps(pairs: &[(ResourceKind, &[ActionKind])]) -> CapabilitySet {
    CapabilitySet::from_pairs(
        pairs
            .iter()
            .map(|(resource, actions)| (*resource, actions.iter().copied())),
    )
}

#[test]
fn discovery_registers_valid_packages_and_flags_broken_ones() {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(
        root.path(),
        "referral",
        &referral_manifest("1.0.0", r#"{ "patient": ["read", "print"] }"#),
    );
    write_manifest(root.path(), "broken", "{ not json");
    fs::create_dir_all(root.path().join("empty")).expect("mkdir");

    let mut registry = ExtensionRegistry::new();
    let report = registry.discover(root.path()).expect("discover");

    assert_eq!(report.loaded, vec!["acme.referral".to_string()]);
    let failed: Vec<&str> = report.failed.iter().map(|(dir, _)| dir.as_str()).collect();
    assert_eq!(failed, vec!["broken", "empty"]);

    let broken = registry.get("broken").expect("error record");
    assert_eq!(broken.state(), ExtensionState::Error);
    assert!(broken.error().is_some());

    let referral = registry.get("acme.referral").expect("referral");
    assert_eq!(referral.state(), ExtensionState::Installed);
    assert!(referral.granted().is_empty());
}

#[test]
fn unknown_capability_strings_fail_at_load_time() {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(
        root.path(),
        "bad-caps",
        &referral_manifest("1.0.0", r#"{ "billing": ["read"] }"#),
    );

    let mut registry = ExtensionRegistry::new();
    let report = registry.discover(root.path()).expect("discover");
    assert!(report.loaded.is_empty());
    assert_eq!(report.failed.len(), 1);
}

#[test]
fn grant_is_clamped_to_requested_and_enable_requires_grant() {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(
        root.path(),
        "referral",
        &referral_manifest("1.0.0", r#"{ "patient": ["read", "print"] }"#),
    );
    let mut registry = ExtensionRegistry::new();
    registry.discover(root.path()).expect("discover");

    let err = registry.enable("acme.referral").expect_err("nothing granted");
    assert_eq!(err, RegistryError::NothingGranted("acme.referral".to_string()));
    assert_eq!(
        registry.get("acme.referral").expect("record").state(),
        ExtensionState::Installed
    );

    let offered = caps(&[
        (ResourceKind::Patient, &[ActionKind::Read, ActionKind::Delete]),
        (ResourceKind::Chart, &[ActionKind::Write]),
    ]);
    let record = registry.grant("acme.referral", &offered).expect("grant");
    assert_eq!(
        record.granted(),
        &caps(&[(ResourceKind::Patient, &[ActionKind::Read])])
    );
    assert!(record.granted().is_subset(record.requested()));
    assert_eq!(record.state(), ExtensionState::Installed);

    let enabled = registry.enable("acme.referral").expect("enable");
    assert_eq!(enabled.state(), ExtensionState::Enabled);
    assert!(enabled.enabled_at_ms().is_some());

    // Enabling twice is a no-op success.
    let again = registry.enable("acme.referral").expect("enable again");
    assert_eq!(again.state(), ExtensionState::Enabled);
}

#[test]
fn disable_keeps_grants_and_revoke_resets_everything() {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(
        root.path(),
        "referral",
        &referral_manifest("1.0.0", r#"{ "patient": ["read"] }"#),
    );
    let mut registry = ExtensionRegistry::new();
    registry.discover(root.path()).expect("discover");
    registry.grant_all("acme.referral").expect("grant");

    let err = registry.disable("acme.referral").expect_err("not enabled yet");
    assert!(matches!(err, RegistryError::InvalidTransition { .. }));

    registry.enable("acme.referral").expect("enable");
    let disabled = registry.disable("acme.referral").expect("disable");
    assert_eq!(disabled.state(), ExtensionState::Disabled);
    assert!(disabled.enabled_at_ms().is_none());
    assert!(!disabled.granted().is_empty());

    registry.enable("acme.referral").expect("re-enable");
    let revoked = registry.revoke("acme.referral").expect("revoke");
    assert_eq!(revoked.state(), ExtensionState::Installed);
    assert!(revoked.granted().is_empty());
    assert!(revoked.enabled_at_ms().is_none());
}

#[test]
fn contributions_are_listed_for_enabled_extensions_only() {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(
        root.path(),
        "referral",
        &referral_manifest("1.0.0", r#"{ "patient": ["read"] }"#),
    );
    let mut registry = ExtensionRegistry::new();
    registry.discover(root.path()).expect("discover");

    assert!(registry.all_commands().is_empty());
    assert!(registry.all_templates().is_empty());
    assert!(registry.find_command("acme.referral.create").is_none());

    registry.grant_all("acme.referral").expect("grant");
    registry.enable("acme.referral").expect("enable");
    assert_eq!(registry.all_commands().len(), 1);
    assert_eq!(registry.all_templates().len(), 1);
    assert_eq!(registry.all_exporters().len(), 1);
    assert_eq!(registry.get_enabled().len(), 1);

    registry.disable("acme.referral").expect("disable");
    assert!(registry.all_commands().is_empty());
    assert!(registry.find_template("acme.referral.letter").is_none());
}

#[test]
fn rediscovery_refreshes_version_and_clamps_grants() {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(
        root.path(),
        "referral",
        &referral_manifest("1.0.0", r#"{ "patient": ["read", "print"], "chart": ["read"] }"#),
    );
    let mut registry = ExtensionRegistry::new();
    registry.discover(root.path()).expect("discover");
    registry.grant_all("acme.referral").expect("grant");
    registry.enable("acme.referral").expect("enable");

    write_manifest(
        root.path(),
        "referral",
        &referral_manifest("1.1.0", r#"{ "patient": ["read"] }"#),
    );
    let report = registry.discover(root.path()).expect("rediscover");
    assert_eq!(report.refreshed, vec!["acme.referral".to_string()]);

    let record = registry.get("acme.referral").expect("record");
    assert_eq!(record.version(), "1.1.0");
    assert_eq!(
        record.granted(),
        &caps(&[(ResourceKind::Patient, &[ActionKind::Read])])
    );
    assert_eq!(record.state(), ExtensionState::Enabled);
}

#[test]
fn fixed_package_replaces_error_record_on_rediscovery() {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(root.path(), "referral", "{ broken");
    let mut registry = ExtensionRegistry::new();
    registry.discover(root.path()).expect("discover");
    assert_eq!(
        registry.get("referral").expect("error record").state(),
        ExtensionState::Error
    );
    assert!(registry.grant_all("referral").is_err());

    write_manifest(
        root.path(),
        "referral",
        &referral_manifest("1.0.0", r#"{ "patient": ["read"] }"#),
    );
    let report = registry.discover(root.path()).expect("rediscover");
    assert_eq!(report.loaded, vec!["acme.referral".to_string()]);
    assert!(registry.get("referral").is_none());
    assert_eq!(registry.len(), 1);
}

#[test]
fn duplicate_id_in_second_directory_is_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let body = referral_manifest("1.0.0", r#"{ "patient": ["read"] }"#);
    write_manifest(root.path(), "a-referral", &body);
    write_manifest(root.path(), "b-copy", &body);

    let host = ExtensionHost::builder(Arc::new(StaticLicenseGate::new(None))).build();
    let report = host.discover(root.path()).expect("discover");
    assert_eq!(report.loaded, vec!["acme.referral".to_string()]);
    let failed: Vec<&str> = report.failed.iter().map(|(dir, _)| dir.as_str()).collect();
    assert_eq!(failed, vec!["b-copy"]);
    assert!(report.failed[0].1.contains("acme.referral"));

    host.grant_all("acme.referral").expect("grant");
    host.enable("acme.referral").expect("enable");
    host.discover(root.path()).expect("rediscover");
    let record = host.get("acme.referral").expect("record");
    assert!(record.path().ends_with("a-referral"));
    assert_eq!(record.state(), ExtensionState::Enabled);
}

#[test]
fn broken_folder_named_like_an_id_keeps_admin_state() {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(
        root.path(),
        "vendor-pkg",
        &referral_manifest("1.0.0", r#"{ "patient": ["read"] }"#),
    );
    let host = ExtensionHost::builder(Arc::new(StaticLicenseGate::new(None))).build();
    host.discover(root.path()).expect("discover");
    host.grant_all("acme.referral").expect("grant");
    host.enable("acme.referral").expect("enable");

    write_manifest(root.path(), "acme.referral", "{not json");
    let report = host.discover(root.path()).expect("rediscover");
    let failed: Vec<&str> = report.failed.iter().map(|(dir, _)| dir.as_str()).collect();
    assert_eq!(failed, vec!["acme.referral"]);

    let record = host.get("acme.referral").expect("record");
    assert_eq!(record.state(), ExtensionState::Enabled);
    assert!(record.path().ends_with("vendor-pkg"));
    assert_eq!(
        record.granted(),
        &caps(&[(ResourceKind::Patient, &[ActionKind::Read])])
    );
}

#[test]
fn host_uninstall_removes_the_record() {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(
        root.path(),
        "referral",
        &referral_manifest("1.0.0", r#"{ "patient": ["read"] }"#),
    );
    let host = ExtensionHost::builder(Arc::new(StaticLicenseGate::new(None))).build();
    host.discover(root.path()).expect("discover");
    host.grant_all("acme.referral").expect("grant");
    host.enable("acme.referral").expect("enable");
    assert_eq!(host.available_commands(CommandContext::PatientDetail).len(), 1);

    let removed = host.uninstall("acme.referral").expect("uninstall");
    assert_eq!(removed.id(), "acme.referral");
    assert!(host.get("acme.referral").is_none());
    assert!(host.available_commands(CommandContext::PatientDetail).is_empty());
    assert!(matches!(
        host.uninstall("acme.referral"),
        Err(HostError::Registry(RegistryError::NotFound(_)))
    ));
}
