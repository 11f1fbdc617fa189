//! # Registry Client
//!
//! Client side of the install/update protocol. A plugin is published as a
//! plain source tree plus a metadata document `<id>.json` describing its
//! latest version and file list; there is no custom wire protocol. Sources
//! are either HTTP bases (fetched with the host's request timeout) or local
//! directories, which also back the tests.
//!
//! Fetches are staged into a temporary directory and only renamed into the
//! plugin root once complete, so a failed download never leaves a
//! half-written plugin behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use semver::Version;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::plugin_system::discovery::{CandidateKind, PluginCandidate};
use crate::plugin_system::{DESCRIPTOR_FILE, INSTALL_MARKER};
use crate::utils::fs::{copy_dir_all, dir_is_empty};

/// Error produced by registry operations. No instance-state side effects —
/// a failed install or update leaves the manager untouched.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin '{0}' not found in any configured source")]
    NotFound(String),

    #[error("network error while {operation}: {detail}")]
    NetworkError { operation: String, detail: String },

    #[error("checksum mismatch for '{id}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("destination '{path}' already exists and was not installed by this client")]
    DestinationConflict { path: PathBuf },

    #[error("malformed registry entry for '{id}': {detail}")]
    MalformedEntry { id: String, detail: String },

    #[error("invalid registry source '{0}'")]
    InvalidSource(String),
}

impl RegistryError {
    fn network(operation: impl Into<String>, detail: impl ToString) -> Self {
        RegistryError::NetworkError {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }
}

/// Where a resolved entry's tree is fetched from.
#[derive(Debug, Clone)]
pub enum SourceLocation {
    /// Registry base URL; metadata at `{base}/{id}.json`, files at
    /// `{base}/{id}/{file}`
    HttpBase(String),
    /// Registry directory on disk, same layout as `HttpBase`
    LocalBase(PathBuf),
    /// A plugin tree referenced directly by path
    LocalTree(PathBuf),
}

/// Remote metadata snapshot for one plugin. Ephemeral — fetched on demand
/// and never persisted beyond the current operation.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    /// Latest published version
    pub latest: Version,
    /// Relative paths of the source tree
    #[serde(default)]
    pub files: Vec<String>,
    /// Hex SHA-256 over the descriptor file, when the publisher signs one
    #[serde(default)]
    pub checksum: Option<String>,
    /// Publication timestamp, informational only
    #[serde(default)]
    pub published: Option<String>,
    /// Filled in during resolution; never part of the wire format
    #[serde(skip)]
    pub source: Option<SourceLocation>,
}

/// Client for resolving, fetching, and update-checking plugins against a
/// configured list of registry sources.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    sources: Vec<SourceLocation>,
    http: reqwest::Client,
}

impl RegistryClient {
    /// Build a client from source strings (HTTP base URLs or local
    /// directories). `network_timeout` bounds every HTTP request.
    pub fn new(sources: &[String], network_timeout: Duration) -> Result<Self, RegistryError> {
        let sources = sources
            .iter()
            .map(|s| parse_source(s))
            .collect::<Result<Vec<_>, _>>()?;
        let http = reqwest::Client::builder()
            .timeout(network_timeout)
            .build()
            .map_err(|e| RegistryError::network("building http client", e))?;
        Ok(Self { sources, http })
    }

    /// Resolve a bare identifier or an explicit source location to a
    /// [`RegistryEntry`].
    pub async fn resolve(&self, spec: &str) -> Result<RegistryEntry, RegistryError> {
        if spec.starts_with("http://") || spec.starts_with("https://") {
            if spec.ends_with(".json") {
                return self.resolve_http_entry(spec).await;
            }
            // Repository-style URL: `{base}/{repo}`, where the repo segment
            // may carry the conventional `tessera-plugin-` prefix while the
            // metadata and files use the bare identifier.
            let id = identifier_from_source(spec);
            let base = spec
                .trim_end_matches('/')
                .rsplit_once('/')
                .map(|(base, _)| base.to_string())
                .unwrap_or_else(|| spec.to_string());
            return self.resolve_http_entry(&format!("{}/{}.json", base, id)).await;
        }

        let as_path = Path::new(spec);
        if as_path.is_dir() {
            return synthesize_entry_from_tree(as_path);
        }
        if as_path.is_file() && as_path.extension().and_then(|e| e.to_str()) == Some("json") {
            return read_local_entry(as_path, spec);
        }

        // Bare identifier: query each configured source in order.
        for source in &self.sources {
            match source {
                SourceLocation::HttpBase(base) => {
                    let url = format!("{}/{}.json", base.trim_end_matches('/'), spec);
                    match self.http_get(&url, "resolving entry").await? {
                        Some(bytes) => {
                            let mut entry = decode_entry(&bytes, spec)?;
                            entry.source = Some(SourceLocation::HttpBase(base.clone()));
                            return Ok(entry);
                        }
                        None => continue,
                    }
                }
                SourceLocation::LocalBase(base) => {
                    let metadata = base.join(format!("{}.json", spec));
                    if metadata.is_file() {
                        let mut entry = read_local_entry(&metadata, spec)?;
                        entry.source = Some(SourceLocation::LocalBase(base.clone()));
                        return Ok(entry);
                    }
                    let tree = base.join(spec);
                    if tree.is_dir() {
                        return synthesize_entry_from_tree(&tree);
                    }
                }
                SourceLocation::LocalTree(_) => {}
            }
        }

        Err(RegistryError::NotFound(spec.to_string()))
    }

    /// Fetch an entry's source tree into `{plugin_root}/{id}/`, returning
    /// the installed candidate.
    pub async fn fetch(&self, entry: &RegistryEntry, plugin_root: &Path) -> Result<PluginCandidate, RegistryError> {
        let source = entry
            .source
            .clone()
            .ok_or_else(|| RegistryError::MalformedEntry {
                id: entry.id.clone(),
                detail: "entry carries no source location".to_string(),
            })?;

        let destination = plugin_root.join(&entry.id);
        self.check_destination(&destination)?;

        fs::create_dir_all(plugin_root)
            .map_err(|e| RegistryError::network("creating plugin root", e))?;
        let stage = tempfile::tempdir_in(plugin_root)
            .map_err(|e| RegistryError::network("creating staging directory", e))?;

        match &source {
            SourceLocation::LocalTree(tree) => {
                copy_dir_all(tree, stage.path())
                    .map_err(|e| RegistryError::network("copying plugin tree", e))?;
            }
            SourceLocation::LocalBase(base) => {
                let tree = base.join(&entry.id);
                copy_dir_all(&tree, stage.path())
                    .map_err(|e| RegistryError::network("copying plugin tree", e))?;
            }
            SourceLocation::HttpBase(base) => {
                let files: Vec<&str> = if entry.files.is_empty() {
                    vec![DESCRIPTOR_FILE]
                } else {
                    entry.files.iter().map(String::as_str).collect()
                };
                for file in files {
                    let url = format!("{}/{}/{}", base.trim_end_matches('/'), entry.id, file);
                    let bytes = self
                        .http_get(&url, "fetching plugin file")
                        .await?
                        .ok_or_else(|| RegistryError::network("fetching plugin file", format!("missing file '{}'", url)))?;
                    let target = stage.path().join(file);
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)
                            .map_err(|e| RegistryError::network("staging plugin file", e))?;
                    }
                    fs::write(&target, bytes)
                        .map_err(|e| RegistryError::network("staging plugin file", e))?;
                }
            }
        }

        let descriptor_path = stage.path().join(DESCRIPTOR_FILE);
        let descriptor = fs::read(&descriptor_path).map_err(|_| RegistryError::MalformedEntry {
            id: entry.id.clone(),
            detail: format!("fetched tree has no {}", DESCRIPTOR_FILE),
        })?;

        if let Some(expected) = &entry.checksum {
            let actual = hex_digest(&descriptor);
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(RegistryError::ChecksumMismatch {
                    id: entry.id.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        fs::write(stage.path().join(INSTALL_MARKER), format!("{} {}\n", entry.id, entry.latest))
            .map_err(|e| RegistryError::network("writing install marker", e))?;

        // Replace an existing (marked) installation only after the new tree
        // is fully staged.
        if destination.exists() {
            fs::remove_dir_all(&destination)
                .map_err(|e| RegistryError::network("removing previous installation", e))?;
        }
        let staged = stage.into_path();
        fs::rename(&staged, &destination)
            .map_err(|e| RegistryError::network("moving plugin into place", e))?;

        log::info!("fetched plugin '{}' v{} into {}", entry.id, entry.latest, destination.display());
        Ok(PluginCandidate {
            root: destination,
            descriptor,
            kind: CandidateKind::Directory,
        })
    }

    /// The subset of installed plugins whose remote latest version strictly
    /// exceeds the installed one. Identifiers unknown to every source are
    /// skipped, not errors.
    pub async fn check_updates(&self, installed: &BTreeMap<String, Version>) -> Result<Vec<String>, RegistryError> {
        let mut outdated = Vec::new();
        for (id, version) in installed {
            match self.resolve(id).await {
                Ok(entry) if entry.latest > *version => outdated.push(id.clone()),
                Ok(_) => {}
                Err(RegistryError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(outdated)
    }

    async fn resolve_http_entry(&self, url: &str) -> Result<RegistryEntry, RegistryError> {
        let bytes = self
            .http_get(url, "resolving entry")
            .await?
            .ok_or_else(|| RegistryError::NotFound(url.to_string()))?;
        let mut entry = decode_entry(&bytes, url)?;
        // Metadata lives at {base}/{id}.json; the files sit next to it.
        let base = url
            .rsplit_once('/')
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| url.to_string());
        entry.source = Some(SourceLocation::HttpBase(base));
        Ok(entry)
    }

    /// GET a URL, mapping 404 to `None` and transport failures to
    /// [`RegistryError::NetworkError`].
    async fn http_get(&self, url: &str, operation: &str) -> Result<Option<Vec<u8>>, RegistryError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::network(operation, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| RegistryError::network(operation, e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RegistryError::network(operation, e))?;
        Ok(Some(bytes.to_vec()))
    }

    fn check_destination(&self, destination: &Path) -> Result<(), RegistryError> {
        if destination.exists() {
            let empty = dir_is_empty(destination)
                .map_err(|e| RegistryError::network("inspecting destination", e))?;
            if !empty && !destination.join(INSTALL_MARKER).exists() {
                return Err(RegistryError::DestinationConflict {
                    path: destination.to_path_buf(),
                });
            }
        }
        Ok(())
    }
}

/// Derive a plugin identifier from a source location, normalizing the
/// conventional `tessera-plugin-` repository prefix.
pub fn identifier_from_source(spec: &str) -> String {
    let tail = spec
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(spec);
    let tail = tail.strip_suffix(".git").unwrap_or(tail);
    let tail = tail.strip_suffix(".json").unwrap_or(tail);
    tail.strip_prefix("tessera-plugin-").unwrap_or(tail).to_string()
}

fn parse_source(spec: &str) -> Result<SourceLocation, RegistryError> {
    if spec.starts_with("http://") || spec.starts_with("https://") {
        return Ok(SourceLocation::HttpBase(spec.trim_end_matches('/').to_string()));
    }
    let path = PathBuf::from(spec);
    if path.is_dir() {
        return Ok(SourceLocation::LocalBase(path));
    }
    Err(RegistryError::InvalidSource(spec.to_string()))
}

fn decode_entry(bytes: &[u8], id_hint: &str) -> Result<RegistryEntry, RegistryError> {
    serde_json::from_slice(bytes).map_err(|e| RegistryError::MalformedEntry {
        id: id_hint.to_string(),
        detail: e.to_string(),
    })
}

fn read_local_entry(path: &Path, id_hint: &str) -> Result<RegistryEntry, RegistryError> {
    let bytes = fs::read(path).map_err(|e| RegistryError::network("reading entry", e))?;
    let mut entry = decode_entry(&bytes, id_hint)?;
    if entry.source.is_none() {
        if let Some(parent) = path.parent() {
            entry.source = Some(SourceLocation::LocalBase(parent.to_path_buf()));
        }
    }
    Ok(entry)
}

/// Build an entry for a plugin tree referenced directly by path, reading its
/// identity from the descriptor.
fn synthesize_entry_from_tree(tree: &Path) -> Result<RegistryEntry, RegistryError> {
    let descriptor = fs::read(tree.join(DESCRIPTOR_FILE)).map_err(|_| RegistryError::NotFound(tree.display().to_string()))?;
    let candidate = PluginCandidate {
        root: tree.to_path_buf(),
        descriptor,
        kind: CandidateKind::Directory,
    };
    let manifest = crate::plugin_system::manifest::parse(&candidate).map_err(|e| RegistryError::MalformedEntry {
        id: tree.display().to_string(),
        detail: e.to_string(),
    })?;
    Ok(RegistryEntry {
        id: manifest.id,
        latest: manifest.version,
        files: Vec::new(),
        checksum: None,
        published: None,
        source: Some(SourceLocation::LocalTree(tree.to_path_buf())),
    })
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
