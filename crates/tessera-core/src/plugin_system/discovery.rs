use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;
use tokio_stream::{Stream, StreamExt};

use crate::plugin_system::{DESCRIPTOR_FILE, SINGLE_FILE_EXTENSION};

/// How a candidate was found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// A subdirectory with a top-level descriptor file
    Directory,
    /// A lone `*.plugin` file; its manifest is synthesized from in-file
    /// header lines (legacy compatibility path)
    SingleFile,
}

/// An unparsed plugin found by the scanner: its filesystem location plus the
/// raw descriptor bytes. Consumed by the manifest parser.
#[derive(Debug, Clone)]
pub struct PluginCandidate {
    /// Plugin directory, or the single file itself
    pub root: PathBuf,
    /// Raw descriptor bytes (synthesized for single-file candidates)
    pub descriptor: Vec<u8>,
    pub kind: CandidateKind,
}

/// Walks one plugin root directory and yields candidates.
///
/// Every call to [`DiscoveryScanner::scan`] performs a fresh scan; no state
/// is carried between invocations. Entries that are neither a descriptor
/// directory nor a single-file plugin are skipped silently — arbitrary
/// non-plugin files may share the directory.
#[derive(Debug, Clone)]
pub struct DiscoveryScanner {
    root: PathBuf,
}

impl DiscoveryScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily yield the candidates currently present under the root.
    pub async fn scan(&self) -> io::Result<impl Stream<Item = PluginCandidate> + Send> {
        let entries = fs::read_dir(&self.root).await?;
        Ok(ReadDirStream::new(entries)
            .filter_map(|entry| entry.ok())
            .then(|entry| classify_path(entry.path()))
            .filter_map(|candidate| candidate))
    }
}

/// Classify a single path the way the scanner would, without scanning its
/// siblings. Used when re-reading a known plugin from disk (reload, update).
pub async fn candidate_at(path: &Path) -> Option<PluginCandidate> {
    classify_path(path.to_path_buf()).await
}

async fn classify_path(path: PathBuf) -> Option<PluginCandidate> {
    let metadata = fs::metadata(&path).await.ok()?;

    if metadata.is_dir() {
        let descriptor_path = path.join(DESCRIPTOR_FILE);
        match fs::read(&descriptor_path).await {
            Ok(descriptor) => Some(PluginCandidate {
                root: path,
                descriptor,
                kind: CandidateKind::Directory,
            }),
            // No descriptor at the top level: not a plugin directory.
            Err(_) => None,
        }
    } else if metadata.is_file() && has_plugin_extension(&path) {
        match fs::read_to_string(&path).await {
            Ok(text) => Some(PluginCandidate {
                root: path,
                descriptor: synthesize_descriptor(&text).into_bytes(),
                kind: CandidateKind::SingleFile,
            }),
            Err(e) => {
                log::warn!("skipping unreadable plugin file '{}': {}", path.display(), e);
                None
            }
        }
    } else {
        None
    }
}

fn has_plugin_extension(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(SINGLE_FILE_EXTENSION)
}

/// Extract the `##@`-prefixed header lines of a single-file plugin as a
/// descriptor document.
fn synthesize_descriptor(text: &str) -> String {
    let mut descriptor = String::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("##@") {
            descriptor.push_str(rest.trim_start());
            descriptor.push('\n');
        }
    }
    descriptor
}
