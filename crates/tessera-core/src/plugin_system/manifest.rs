use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use semver::Version;
use serde::Deserialize;

use crate::plugin_system::capability::{Capability, CapabilitySet};
use crate::plugin_system::discovery::{CandidateKind, PluginCandidate};
use crate::plugin_system::version::VersionRange;
use crate::plugin_system::{DESCRIPTOR_FILE, MANIFEST_SCHEMA_VERSION, RESOURCES_DIR};

/// Error produced while parsing a candidate's descriptor.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed manifest at '{path}': {detail}")]
    MalformedManifest { path: PathBuf, detail: String },

    #[error("unsupported manifest schema {found} at '{path}' (supported: {supported})")]
    UnsupportedSchema { path: PathBuf, found: i64, supported: i64 },

    #[error("entry point '{entry}' does not resolve under '{root}'")]
    InvalidEntryPoint { root: PathBuf, entry: PathBuf },
}

impl ManifestError {
    fn malformed(path: &Path, detail: impl Into<String>) -> Self {
        ManifestError::MalformedManifest {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }
}

/// Reference to the code object activated for a plugin: a path inside the
/// plugin tree plus the registered symbol it resolves through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub path: PathBuf,
    pub symbol: String,
}

/// A dependency on another plugin.
#[derive(Debug, Clone)]
pub struct PluginDependency {
    /// Identifier of the required plugin
    pub id: String,
    /// Acceptable version range ("*" for any)
    pub range: VersionRange,
}

/// A host-compatibility requirement: the named host must satisfy the range.
#[derive(Debug, Clone)]
pub struct HostRequirement {
    pub host: String,
    pub range: VersionRange,
}

/// Declared binary artifact of a plugin, runnable under the `process`
/// capability.
#[derive(Debug, Clone)]
pub struct BinarySpec {
    pub enabled: bool,
    /// Path relative to the plugin root
    pub path: PathBuf,
    pub args: Vec<String>,
}

/// Validated, immutable metadata describing one plugin.
#[derive(Debug, Clone)]
pub struct PluginManifest {
    /// Unique identifier for the plugin
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Plugin version
    pub version: Version,
    /// Plugin author
    pub author: String,
    /// Plugin description
    pub description: String,
    /// Category for grouping in the host UI
    pub category: String,
    /// Tags for categorization
    pub tags: Vec<String>,
    /// Declared capability set (granted = declared ∩ host-approved)
    pub permissions: CapabilitySet,
    /// Plugin dependencies
    pub dependencies: Vec<PluginDependency>,
    /// Host-compatibility requirements
    pub compatibility: Vec<HostRequirement>,
    /// Entry point reference
    pub entry: EntryPoint,
    /// Optional binary artifact
    pub binary: Option<BinarySpec>,
    /// Whether the plugin wants to be loaded by default
    pub enabled: bool,
    /// License information
    pub license: String,
    /// Candidate root this manifest was parsed from
    pub root: PathBuf,
    /// Whether the candidate was a directory or a single file
    pub kind: CandidateKind,
}

impl PluginManifest {
    /// The descriptor file backing this manifest.
    pub fn descriptor_path(&self) -> PathBuf {
        match self.kind {
            CandidateKind::Directory => self.root.join(DESCRIPTOR_FILE),
            CandidateKind::SingleFile => self.root.clone(),
        }
    }

    /// The only directory a plugin may be granted filesystem access to.
    /// Single-file plugins have none.
    pub fn resources_dir(&self) -> Option<PathBuf> {
        match self.kind {
            CandidateKind::Directory => Some(self.root.join(RESOURCES_DIR)),
            CandidateKind::SingleFile => None,
        }
    }
}

// --- Intermediate structs for deserialization ---

#[derive(Debug, Deserialize)]
struct RawEntryPoint {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBinarySpec {
    #[serde(default)]
    enabled: bool,
    path: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(alias = "identifier")]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    version: Option<String>,
    author: Option<String>,
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    compatibility: BTreeMap<String, String>,
    #[serde(default)]
    entry: Option<RawEntryPoint>,
    #[serde(default)]
    binary: Option<RawBinarySpec>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    license: Option<String>,
}

// --- End Intermediate structs ---

/// Parse and validate a candidate's descriptor into a [`PluginManifest`].
pub fn parse(candidate: &PluginCandidate) -> Result<PluginManifest, ManifestError> {
    let root = candidate.root.as_path();

    let text = std::str::from_utf8(&candidate.descriptor)
        .map_err(|e| ManifestError::malformed(root, format!("descriptor is not valid UTF-8: {}", e)))?;
    let value: toml::Value = toml::from_str(text)
        .map_err(|e| ManifestError::malformed(root, format!("descriptor is not valid TOML: {}", e)))?;

    // Schema gate comes first so future descriptors fail with the right error
    // even when their field layout no longer deserializes.
    if let Some(schema) = value.get("schema") {
        match schema.as_integer() {
            Some(MANIFEST_SCHEMA_VERSION) => {}
            Some(found) => {
                return Err(ManifestError::UnsupportedSchema {
                    path: root.to_path_buf(),
                    found,
                    supported: MANIFEST_SCHEMA_VERSION,
                });
            }
            None => return Err(ManifestError::malformed(root, "`schema` must be an integer")),
        }
    }

    let raw: RawManifest = value
        .try_into()
        .map_err(|e| ManifestError::malformed(root, e.to_string()))?;

    let id = require(raw.id, "id", root)?;
    let author = require(raw.author, "author", root)?;
    let description = require(raw.description, "description", root)?;

    let version_str = require(raw.version, "version", root)?;
    let version = Version::parse(&version_str)
        .map_err(|e| ManifestError::malformed(root, format!("`version` is not a semantic version: {}", e)))?;

    let mut permissions = CapabilitySet::new();
    for tag in &raw.permissions {
        let capability = Capability::from_tag(tag)
            .ok_or_else(|| ManifestError::malformed(root, format!("unknown permission tag `{}`", tag)))?;
        permissions.insert(capability);
    }

    let mut dependencies = Vec::with_capacity(raw.dependencies.len());
    for (dep_id, constraint) in &raw.dependencies {
        let range = VersionRange::from_constraint(constraint).map_err(|e| {
            ManifestError::malformed(root, format!("dependency `{}`: {}", dep_id, e))
        })?;
        dependencies.push(PluginDependency {
            id: dep_id.clone(),
            range,
        });
    }

    let mut compatibility = Vec::with_capacity(raw.compatibility.len());
    for (host, constraint) in &raw.compatibility {
        let range = VersionRange::from_constraint(constraint).map_err(|e| {
            ManifestError::malformed(root, format!("compatibility `{}`: {}", host, e))
        })?;
        compatibility.push(HostRequirement {
            host: host.clone(),
            range,
        });
    }

    let entry = resolve_entry(raw.entry, candidate, &id)?;

    let binary = match raw.binary {
        None => None,
        Some(raw_binary) => {
            let path = PathBuf::from(&raw_binary.path);
            if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(ManifestError::malformed(
                    root,
                    "`binary.path` must be relative to the plugin root",
                ));
            }
            Some(BinarySpec {
                enabled: raw_binary.enabled,
                path,
                args: raw_binary.args,
            })
        }
    };

    Ok(PluginManifest {
        name: raw.name.unwrap_or_else(|| id.clone()),
        id,
        version,
        author,
        description,
        category: raw.category.unwrap_or_else(|| "other".to_string()),
        tags: raw.tags,
        permissions,
        dependencies,
        compatibility,
        entry,
        binary,
        enabled: raw.enabled.unwrap_or(true),
        license: raw.license.unwrap_or_else(|| "MIT".to_string()),
        root: candidate.root.clone(),
        kind: candidate.kind,
    })
}

fn require(field: Option<String>, name: &str, root: &Path) -> Result<String, ManifestError> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(ManifestError::malformed(root, format!("required field `{}` is empty", name))),
        None => Err(ManifestError::malformed(root, format!("missing required field `{}`", name))),
    }
}

fn resolve_entry(
    raw: Option<RawEntryPoint>,
    candidate: &PluginCandidate,
    id: &str,
) -> Result<EntryPoint, ManifestError> {
    let root = candidate.root.as_path();

    match candidate.kind {
        CandidateKind::SingleFile => {
            // The file itself is the entry point; only the symbol may be
            // overridden. Defaults to the file stem.
            let symbol = raw
                .and_then(|e| e.symbol)
                .or_else(|| root.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .unwrap_or_else(|| id.to_string());
            Ok(EntryPoint {
                path: root.to_path_buf(),
                symbol,
            })
        }
        CandidateKind::Directory => {
            let raw = raw.ok_or_else(|| ManifestError::malformed(root, "missing required field `entry`"))?;
            let path_str = raw
                .path
                .ok_or_else(|| ManifestError::malformed(root, "missing required field `entry.path`"))?;
            let path = PathBuf::from(&path_str);
            if path.is_absolute() || !root.join(&path).is_file() {
                return Err(ManifestError::InvalidEntryPoint {
                    root: root.to_path_buf(),
                    entry: path,
                });
            }
            Ok(EntryPoint {
                path,
                symbol: raw.symbol.unwrap_or_else(|| id.to_string()),
            })
        }
    }
}
