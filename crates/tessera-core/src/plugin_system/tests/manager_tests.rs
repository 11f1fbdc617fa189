#![cfg(test)]

use std::fs;
use std::time::Duration;

use semver::Version;
use serde_json::json;
use tempfile::TempDir;

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::instance::PluginState;
use crate::plugin_system::manager::UpdateOutcome;
use crate::plugin_system::resolver::ResolutionError;
use crate::plugin_system::sandbox::{FaultKind, SandboxConfig};
use crate::plugin_system::tests::common::{
    build_host, default_host, descriptor, events_contain, write_plugin, Behavior,
};

#[tokio::test]
async fn broken_manifest_never_blocks_siblings() {
    let mut host = default_host(&[("good", Behavior::Ok)]);
    write_plugin(&host.plugin_root, "good", &descriptor("good", "1.0.0", "good", ""));
    // Missing author: parse-time failure.
    fs::create_dir_all(host.plugin_root.join("broken")).unwrap();
    fs::write(
        host.plugin_root.join("broken/plugin.toml"),
        "id = \"broken\"\nversion = \"1.0.0\"\ndescription = \"d\"\n",
    )
    .unwrap();

    let report = host.manager.discover_and_load_all().await.unwrap();

    assert_eq!(report.activated, vec!["good"]);
    assert_eq!(report.manifest_errors.len(), 1);
    assert!(report.manifest_errors[0].0.ends_with("broken"));
    assert_eq!(host.manager.list_active(), vec!["good"]);
}

#[tokio::test]
async fn missing_dependency_scenario() {
    // A (no deps), B (depends on A), C (depends on D, absent).
    let mut host = default_host(&[("a", Behavior::Ok), ("b", Behavior::Ok), ("c", Behavior::Ok)]);
    write_plugin(&host.plugin_root, "a", &descriptor("a", "1.0.0", "a", ""));
    write_plugin(
        &host.plugin_root,
        "b",
        &descriptor("b", "1.0.0", "b", "\n[dependencies]\na = \"^1.0\"\n"),
    );
    write_plugin(
        &host.plugin_root,
        "c",
        &descriptor("c", "1.0.0", "c", "\n[dependencies]\nd = \"*\"\n"),
    );

    let report = host.manager.discover_and_load_all().await.unwrap();

    assert_eq!(report.activated, vec!["a", "b"]);
    assert_eq!(report.rejected.len(), 1);
    let (id, reason) = &report.rejected[0];
    assert_eq!(id, "c");
    assert!(matches!(
        reason,
        ResolutionError::MissingDependency { dependency } if dependency == "d"
    ));
    assert_eq!(host.manager.list_active(), vec!["a", "b"]);
}

#[tokio::test]
async fn dispatch_routes_to_active_plugin() {
    let mut host = default_host(&[("echoer", Behavior::Ok)]);
    write_plugin(&host.plugin_root, "echoer", &descriptor("echoer", "1.0.0", "echoer", ""));
    host.manager.discover_and_load_all().await.unwrap();

    let commands = host.commands.snapshot();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].plugin_id, "echoer");
    assert_eq!(commands[0].command_id, "t.echo");

    let value = host
        .manager
        .dispatch("echoer", "t.echo", json!({"n": 7}))
        .await
        .unwrap();
    assert_eq!(value["echo"]["n"], 7);
    assert!(events_contain(&host.events, "invoke:echoer:t.echo"));
}

#[tokio::test]
async fn dispatch_to_non_active_identifier_fails_without_invoking() {
    let mut host = default_host(&[("x", Behavior::FailInit)]);
    write_plugin(&host.plugin_root, "x", &descriptor("x", "1.0.0", "x", ""));
    host.manager.discover_and_load_all().await.unwrap();

    // Unknown identifier.
    let error = host.manager.dispatch("ghost", "t.echo", json!({})).await.unwrap_err();
    assert!(matches!(error, PluginSystemError::PluginNotActive(id) if id == "ghost"));

    // Known but faulted identifier.
    let error = host.manager.dispatch("x", "t.echo", json!({})).await.unwrap_err();
    assert!(matches!(error, PluginSystemError::PluginNotActive(id) if id == "x"));
    assert!(!events_contain(&host.events, "invoke:x:t.echo"));
}

#[tokio::test]
async fn empty_permission_set_yields_no_capability_handles() {
    let mut host = default_host(&[("noperm", Behavior::Ok)]);
    let toml = r#"
id = "noperm"
version = "1.0.0"
author = "a"
description = "declares nothing"
permissions = []

[entry]
path = "entry.txt"
symbol = "noperm"
"#;
    write_plugin(&host.plugin_root, "noperm", toml);
    host.manager.discover_and_load_all().await.unwrap();

    assert_eq!(host.manager.list_active(), vec!["noperm"]);
    assert!(events_contain(&host.events, "caps:noperm:none"));
    assert!(host.commands.snapshot().is_empty());
}

#[tokio::test]
async fn init_timeout_faults_only_the_slow_plugin() {
    let sandbox = SandboxConfig {
        init_budget: Duration::from_millis(100),
        cleanup_budget: Duration::from_millis(100),
    };
    let mut host = build_host(
        &[("slow", Behavior::SleepInit(Duration::from_secs(5))), ("quick", Behavior::Ok)],
        sandbox,
        Vec::new(),
    );
    write_plugin(&host.plugin_root, "slow", &descriptor("slow", "1.0.0", "slow", ""));
    write_plugin(&host.plugin_root, "quick", &descriptor("quick", "1.0.0", "quick", ""));

    let report = host.manager.discover_and_load_all().await.unwrap();

    assert_eq!(report.activated, vec!["quick"]);
    let fault = report.faults.iter().find(|f| f.plugin_id == "slow").unwrap();
    assert_eq!(fault.kind, FaultKind::Timeout);

    let statuses = host.manager.list();
    let slow = statuses.iter().find(|s| s.id == "slow").unwrap();
    assert_eq!(slow.state, PluginState::Faulted);
    assert_eq!(host.manager.list_active(), vec!["quick"]);
}

#[tokio::test]
async fn dependent_of_faulted_dependency_is_reported() {
    let mut host = default_host(&[("base", Behavior::FailInit), ("ext", Behavior::Ok)]);
    write_plugin(&host.plugin_root, "base", &descriptor("base", "1.0.0", "base", ""));
    write_plugin(
        &host.plugin_root,
        "ext",
        &descriptor("ext", "1.0.0", "ext", "\n[dependencies]\nbase = \"*\"\n"),
    );

    let report = host.manager.discover_and_load_all().await.unwrap();

    assert!(report.activated.is_empty());
    assert_eq!(report.faults.len(), 2);
    assert!(report.faults.iter().any(|f| f.plugin_id == "base"));
    let ext_fault = report.faults.iter().find(|f| f.plugin_id == "ext").unwrap();
    assert!(ext_fault.detail.contains("dependency"));
    // The dependent never started initializing.
    assert!(!events_contain(&host.events, "init:ext:0"));
}

#[tokio::test]
async fn reload_failure_leaves_identifier_faulted_with_one_instance() {
    let mut host = default_host(&[("flaky", Behavior::FailInitOnReload)]);
    write_plugin(&host.plugin_root, "flaky", &descriptor("flaky", "1.0.0", "flaky", ""));
    host.manager.discover_and_load_all().await.unwrap();
    assert_eq!(host.manager.list_active(), vec!["flaky"]);

    let error = host.manager.reload("flaky").await.unwrap_err();
    assert!(matches!(error, PluginSystemError::Fault(_)));

    // Cleanup of the old generation ran, the new one was attempted once,
    // and exactly one (faulted) instance remains.
    assert!(events_contain(&host.events, "cleanup:flaky"));
    assert!(events_contain(&host.events, "init:flaky:1"));
    let statuses = host.manager.list();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, PluginState::Faulted);
    assert!(host.manager.list_active().is_empty());
}

#[tokio::test]
async fn reload_success_bumps_the_generation() {
    let mut host = default_host(&[("stable", Behavior::Ok)]);
    write_plugin(&host.plugin_root, "stable", &descriptor("stable", "1.0.0", "stable", ""));
    host.manager.discover_and_load_all().await.unwrap();

    host.manager.reload("stable").await.unwrap();

    assert!(events_contain(&host.events, "init:stable:0"));
    assert!(events_contain(&host.events, "cleanup:stable"));
    assert!(events_contain(&host.events, "init:stable:1"));
    assert_eq!(host.manager.list_active(), vec!["stable"]);
}

#[tokio::test]
async fn unload_runs_cleanup_and_releases_commands() {
    let mut host = default_host(&[("gone", Behavior::Ok)]);
    write_plugin(&host.plugin_root, "gone", &descriptor("gone", "1.0.0", "gone", ""));
    host.manager.discover_and_load_all().await.unwrap();
    assert_eq!(host.commands.snapshot().len(), 1);

    host.manager.unload("gone").await.unwrap();

    assert!(events_contain(&host.events, "cleanup:gone"));
    assert!(host.manager.list().is_empty());
    assert!(host.commands.snapshot().is_empty());

    let error = host.manager.unload("gone").await.unwrap_err();
    assert!(matches!(error, PluginSystemError::PluginNotFound(_)));
}

#[tokio::test]
async fn invoke_fault_quarantines_until_reload() {
    let mut host = default_host(&[("brittle", Behavior::PanicInvoke)]);
    write_plugin(&host.plugin_root, "brittle", &descriptor("brittle", "1.0.0", "brittle", ""));
    host.manager.discover_and_load_all().await.unwrap();

    let error = host.manager.dispatch("brittle", "t.echo", json!({})).await.unwrap_err();
    match error {
        PluginSystemError::Fault(fault) => assert_eq!(fault.kind, FaultKind::Panic),
        other => panic!("expected Fault, got {:?}", other),
    }

    // Excluded from further dispatch until explicitly reloaded.
    let error = host.manager.dispatch("brittle", "t.echo", json!({})).await.unwrap_err();
    assert!(matches!(error, PluginSystemError::PluginNotActive(_)));

    host.manager.reload("brittle").await.unwrap();
    assert_eq!(host.manager.list_active(), vec!["brittle"]);
}

#[tokio::test]
async fn disabled_plugin_is_skipped_until_enabled() {
    let mut host = default_host(&[("sleepy", Behavior::Ok)]);
    write_plugin(&host.plugin_root, "sleepy", &descriptor("sleepy", "1.0.0", "sleepy", ""));

    host.manager.disable("sleepy").await.unwrap();
    let report = host.manager.discover_and_load_all().await.unwrap();
    assert_eq!(report.skipped_disabled, vec!["sleepy"]);
    assert!(host.manager.list_active().is_empty());

    host.manager.enable("sleepy").unwrap();
    let report = host.manager.discover_and_load_all().await.unwrap();
    assert_eq!(report.activated, vec!["sleepy"]);
}

#[tokio::test]
async fn install_update_uninstall_round_trip() {
    let source = TempDir::new().unwrap();
    write_plugin(source.path(), "pkg", &descriptor("pkg", "1.0.0", "pkg", ""));

    let mut host = build_host(
        &[("pkg", Behavior::Ok)],
        SandboxConfig::default(),
        vec![source.path().to_string_lossy().into_owned()],
    );

    // Install activates through the normal discovery path.
    let outcome = host.manager.install("pkg").await.unwrap();
    assert_eq!(outcome.id, "pkg");
    assert_eq!(outcome.version, Some(Version::parse("1.0.0").unwrap()));
    assert_eq!(host.manager.list_active(), vec!["pkg"]);

    // Remote publishes 2.0.0: update is an upgrade.
    fs::write(
        source.path().join("pkg/plugin.toml"),
        descriptor("pkg", "2.0.0", "pkg", ""),
    )
    .unwrap();
    assert_eq!(host.manager.outdated().await.unwrap(), vec!["pkg"]);

    match host.manager.update("pkg").await.unwrap() {
        UpdateOutcome::Updated { old, new, .. } => {
            assert_eq!(old, Version::parse("1.0.0").unwrap());
            assert_eq!(new, Version::parse("2.0.0").unwrap());
        }
        other => panic!("expected an upgrade, got {:?}", other),
    }
    let statuses = host.manager.list();
    assert_eq!(statuses[0].version, Version::parse("2.0.0").unwrap());

    // Remote and installed now match: update is a no-op.
    match host.manager.update("pkg").await.unwrap() {
        UpdateOutcome::UpToDate { current, .. } => {
            assert_eq!(current, Version::parse("2.0.0").unwrap());
        }
        other => panic!("expected up-to-date, got {:?}", other),
    }

    // Uninstall unloads implicitly and removes the tree.
    host.manager.uninstall("pkg").await.unwrap();
    assert!(events_contain(&host.events, "cleanup:pkg"));
    assert!(host.manager.list().is_empty());
    assert!(!host.plugin_root.join("pkg").exists());
}

#[tokio::test]
async fn shutdown_cleans_up_every_instance() {
    let mut host = default_host(&[("a", Behavior::Ok), ("b", Behavior::Ok)]);
    write_plugin(&host.plugin_root, "a", &descriptor("a", "1.0.0", "a", ""));
    write_plugin(
        &host.plugin_root,
        "b",
        &descriptor("b", "1.0.0", "b", "\n[dependencies]\na = \"*\"\n"),
    );
    host.manager.discover_and_load_all().await.unwrap();

    host.manager.shutdown().await;

    assert!(host.manager.list().is_empty());
    let events = host.events.lock().unwrap();
    let cleanup_b = events.iter().position(|e| e == "cleanup:b").unwrap();
    let cleanup_a = events.iter().position(|e| e == "cleanup:a").unwrap();
    // Dependents shut down before their dependencies.
    assert!(cleanup_b < cleanup_a);
}

#[tokio::test]
async fn manual_is_served_for_active_plugins() {
    let mut host = default_host(&[("doc", Behavior::Ok)]);
    write_plugin(&host.plugin_root, "doc", &descriptor("doc", "1.0.0", "doc", ""));
    host.manager.discover_and_load_all().await.unwrap();

    let manual = host.manager.manual("doc").await.unwrap();
    assert_eq!(manual.unwrap(), "# doc\n");

    let error = host.manager.manual("ghost").await.unwrap_err();
    assert!(matches!(error, PluginSystemError::PluginNotActive(_)));
}
