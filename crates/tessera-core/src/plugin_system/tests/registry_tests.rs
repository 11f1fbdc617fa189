#![cfg(test)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use semver::Version;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::plugin_system::discovery::CandidateKind;
use crate::plugin_system::registry::{identifier_from_source, RegistryClient, RegistryError};
use crate::plugin_system::tests::common::{descriptor, write_plugin};
use crate::plugin_system::{DESCRIPTOR_FILE, INSTALL_MARKER};

fn client_with(source: &Path) -> RegistryClient {
    RegistryClient::new(&[source.to_string_lossy().into_owned()], Duration::from_secs(5)).unwrap()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Lay out a registry source directory: `{base}/{id}/` tree plus
/// `{base}/{id}.json` metadata.
fn publish(base: &Path, id: &str, version: &str, checksum: Option<&str>) {
    write_plugin(base, id, &descriptor(id, version, id, ""));
    let checksum_field = match checksum {
        Some(value) => format!(",\n  \"checksum\": \"{}\"", value),
        None => String::new(),
    };
    fs::write(
        base.join(format!("{}.json", id)),
        format!(
            "{{\n  \"id\": \"{}\",\n  \"latest\": \"{}\"{}\n}}\n",
            id, version, checksum_field
        ),
    )
    .unwrap();
}

#[tokio::test]
async fn resolve_bare_identifier_from_source() {
    let source = TempDir::new().unwrap();
    publish(source.path(), "pkg", "1.3.0", None);

    let entry = client_with(source.path()).resolve("pkg").await.unwrap();
    assert_eq!(entry.id, "pkg");
    assert_eq!(entry.latest, Version::parse("1.3.0").unwrap());
}

#[tokio::test]
async fn resolve_unknown_identifier_is_not_found() {
    let source = TempDir::new().unwrap();
    let error = client_with(source.path()).resolve("ghost").await.unwrap_err();
    assert!(matches!(error, RegistryError::NotFound(_)));
}

#[tokio::test]
async fn resolve_tree_without_metadata_synthesizes_entry() {
    let source = TempDir::new().unwrap();
    // Tree only, no `{id}.json` next to it.
    write_plugin(source.path(), "raw", &descriptor("raw", "0.9.0", "raw", ""));

    let entry = client_with(source.path()).resolve("raw").await.unwrap();
    assert_eq!(entry.id, "raw");
    assert_eq!(entry.latest, Version::parse("0.9.0").unwrap());
}

#[tokio::test]
async fn resolve_explicit_directory_path() {
    let source = TempDir::new().unwrap();
    let tree = write_plugin(source.path(), "direct", &descriptor("direct", "2.0.0", "direct", ""));

    // No configured sources at all; the explicit path carries everything.
    let client = RegistryClient::new(&[], Duration::from_secs(5)).unwrap();
    let entry = client.resolve(&tree.to_string_lossy()).await.unwrap();
    assert_eq!(entry.id, "direct");
}

#[tokio::test]
async fn fetch_installs_under_identifier_with_marker() {
    let source = TempDir::new().unwrap();
    let plugin_root = TempDir::new().unwrap();
    publish(source.path(), "pkg", "1.0.0", None);

    let client = client_with(source.path());
    let entry = client.resolve("pkg").await.unwrap();
    let candidate = client.fetch(&entry, plugin_root.path()).await.unwrap();

    assert_eq!(candidate.kind, CandidateKind::Directory);
    assert_eq!(candidate.root, plugin_root.path().join("pkg"));
    assert!(candidate.root.join(DESCRIPTOR_FILE).is_file());
    assert!(candidate.root.join(INSTALL_MARKER).is_file());
    assert!(candidate.root.join("entry.txt").is_file());
}

#[tokio::test]
async fn fetch_refuses_foreign_destination() {
    let source = TempDir::new().unwrap();
    let plugin_root = TempDir::new().unwrap();
    publish(source.path(), "pkg", "1.0.0", None);

    // A hand-made, unmarked directory already sits at the target path.
    let foreign = plugin_root.path().join("pkg");
    fs::create_dir_all(&foreign).unwrap();
    fs::write(foreign.join("precious.txt"), "do not clobber").unwrap();

    let client = client_with(source.path());
    let entry = client.resolve("pkg").await.unwrap();
    let error = client.fetch(&entry, plugin_root.path()).await.unwrap_err();

    assert!(matches!(error, RegistryError::DestinationConflict { .. }));
    assert!(foreign.join("precious.txt").is_file());
}

#[tokio::test]
async fn fetch_replaces_marked_installation() {
    let source = TempDir::new().unwrap();
    let plugin_root = TempDir::new().unwrap();
    publish(source.path(), "pkg", "1.0.0", None);

    let client = client_with(source.path());
    let entry = client.resolve("pkg").await.unwrap();
    client.fetch(&entry, plugin_root.path()).await.unwrap();

    publish(source.path(), "pkg", "2.0.0", None);
    let entry = client.resolve("pkg").await.unwrap();
    let candidate = client.fetch(&entry, plugin_root.path()).await.unwrap();

    let text = fs::read_to_string(candidate.root.join(DESCRIPTOR_FILE)).unwrap();
    assert!(text.contains("2.0.0"));
}

#[tokio::test]
async fn fetch_verifies_checksum() {
    let source = TempDir::new().unwrap();
    let plugin_root = TempDir::new().unwrap();

    let toml = descriptor("pkg", "1.0.0", "pkg", "");
    publish(source.path(), "pkg", "1.0.0", Some(&sha256_hex(toml.as_bytes())));

    let client = client_with(source.path());
    let entry = client.resolve("pkg").await.unwrap();
    assert!(client.fetch(&entry, plugin_root.path()).await.is_ok());

    // Same metadata, tampered tree.
    fs::write(
        source.path().join("pkg").join(DESCRIPTOR_FILE),
        descriptor("pkg", "1.0.1", "pkg", ""),
    )
    .unwrap();
    fs::remove_dir_all(plugin_root.path().join("pkg")).unwrap();
    let error = client.fetch(&entry, plugin_root.path()).await.unwrap_err();
    assert!(matches!(error, RegistryError::ChecksumMismatch { .. }));
}

#[tokio::test]
async fn check_updates_compares_semver_strictly() {
    let source = TempDir::new().unwrap();
    publish(source.path(), "pkg", "2.0.0", None);
    publish(source.path(), "same", "1.3.0", None);

    let mut installed = BTreeMap::new();
    installed.insert("pkg".to_string(), Version::parse("1.3.0").unwrap());
    installed.insert("same".to_string(), Version::parse("1.3.0").unwrap());
    installed.insert("unknown".to_string(), Version::parse("0.1.0").unwrap());

    let outdated = client_with(source.path()).check_updates(&installed).await.unwrap();
    assert_eq!(outdated, vec!["pkg".to_string()]);
}

#[test]
fn identifier_derivation_strips_convention() {
    assert_eq!(identifier_from_source("https://example.com/u/tessera-plugin-clock"), "clock");
    assert_eq!(identifier_from_source("https://example.com/u/tessera-plugin-clock.git"), "clock");
    assert_eq!(identifier_from_source("plain-id"), "plain-id");
    assert_eq!(identifier_from_source("https://example.com/r/clock.json"), "clock");
}

#[test]
fn invalid_source_is_rejected_at_construction() {
    let error = RegistryClient::new(&["relative/missing/dir".to_string()], Duration::from_secs(5)).unwrap_err();
    assert!(matches!(error, RegistryError::InvalidSource(_)));
}
