#![cfg(test)]

use std::fs;

use tempfile::TempDir;
use tokio_stream::StreamExt;

use crate::plugin_system::discovery::{candidate_at, CandidateKind, DiscoveryScanner, PluginCandidate};
use crate::plugin_system::tests::common::{descriptor, write_plugin};

async fn collect(scanner: &DiscoveryScanner) -> Vec<PluginCandidate> {
    let stream = scanner.scan().await.unwrap();
    tokio::pin!(stream);
    let mut candidates = Vec::new();
    while let Some(candidate) = stream.next().await {
        candidates.push(candidate);
    }
    candidates.sort_by(|a, b| a.root.cmp(&b.root));
    candidates
}

#[tokio::test]
async fn scan_classifies_and_skips() {
    let root = TempDir::new().unwrap();

    // One directory plugin, one single-file plugin.
    write_plugin(root.path(), "alpha", &descriptor("alpha", "1.0.0", "alpha", ""));
    fs::write(
        root.path().join("beta.plugin"),
        "##@ id = \"beta\"\n##@ version = \"1.0.0\"\npayload line\n",
    )
    .unwrap();

    // Noise: a stray file, a directory without a descriptor, a nested
    // descriptor that must not count.
    fs::write(root.path().join("README.md"), "not a plugin").unwrap();
    fs::create_dir_all(root.path().join("not-a-plugin/deep")).unwrap();
    fs::write(root.path().join("not-a-plugin/deep/plugin.toml"), "id = \"nope\"").unwrap();

    let scanner = DiscoveryScanner::new(root.path());
    let candidates = collect(&scanner).await;

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].kind, CandidateKind::Directory);
    assert!(candidates[0].root.ends_with("alpha"));
    assert_eq!(candidates[1].kind, CandidateKind::SingleFile);
    assert!(candidates[1].root.ends_with("beta.plugin"));
}

#[tokio::test]
async fn single_file_descriptor_is_synthesized_from_header_lines() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("gamma.plugin"),
        "##@ id = \"gamma\"\n##@ version = \"2.0.0\"\nnot an annotation\n##@ author = \"a\"\n",
    )
    .unwrap();

    let scanner = DiscoveryScanner::new(root.path());
    let candidates = collect(&scanner).await;
    assert_eq!(candidates.len(), 1);

    let text = String::from_utf8(candidates[0].descriptor.clone()).unwrap();
    assert!(text.contains("id = \"gamma\""));
    assert!(text.contains("author = \"a\""));
    assert!(!text.contains("not an annotation"));
}

#[tokio::test]
async fn scan_is_restartable() {
    let root = TempDir::new().unwrap();
    write_plugin(root.path(), "alpha", &descriptor("alpha", "1.0.0", "alpha", ""));

    let scanner = DiscoveryScanner::new(root.path());
    let first = collect(&scanner).await;
    assert_eq!(first.len(), 1);

    // A plugin added between scans shows up on the next one.
    write_plugin(root.path(), "beta", &descriptor("beta", "1.0.0", "beta", ""));
    let second = collect(&scanner).await;
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn scan_of_missing_root_fails() {
    let root = TempDir::new().unwrap();
    let scanner = DiscoveryScanner::new(root.path().join("does-not-exist"));
    assert!(scanner.scan().await.is_err());
}

#[tokio::test]
async fn candidate_at_classifies_direct_paths() {
    let root = TempDir::new().unwrap();
    let dir = write_plugin(root.path(), "alpha", &descriptor("alpha", "1.0.0", "alpha", ""));
    fs::write(root.path().join("solo.plugin"), "##@ id = \"solo\"\n").unwrap();
    fs::write(root.path().join("junk.txt"), "junk").unwrap();

    let from_dir = candidate_at(&dir).await.unwrap();
    assert_eq!(from_dir.kind, CandidateKind::Directory);

    let from_file = candidate_at(&root.path().join("solo.plugin")).await.unwrap();
    assert_eq!(from_file.kind, CandidateKind::SingleFile);

    assert!(candidate_at(&root.path().join("junk.txt")).await.is_none());
    assert!(candidate_at(&root.path().join("missing")).await.is_none());
}
