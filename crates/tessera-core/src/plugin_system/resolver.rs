use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use semver::Version;

use crate::host::HostInfo;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::version::{HostVersion, VersionRange};

/// Why a manifest was rejected during resolution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("requires host {host} version '{required}', but version '{running}' is running")]
    IncompatibleHost {
        host: String,
        required: VersionRange,
        running: HostVersion,
    },

    #[error("missing dependency '{dependency}'")]
    MissingDependency { dependency: String },

    #[error("dependency '{dependency}' requires version '{required}' but found '{found}'")]
    VersionMismatch {
        dependency: String,
        required: VersionRange,
        found: Version,
    },

    #[error("circular dependency detected: {}", members.join(" -> "))]
    CyclicDependency { members: Vec<String> },
}

/// A dependency-ordered sequence of plugin identifiers, safe to activate in
/// order. Computed once per discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    order: Vec<String>,
}

impl LoadPlan {
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, id: &str) -> bool {
        self.order.iter().any(|member| member == id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The partitioned outcome of one resolution pass.
#[derive(Debug, Default)]
pub struct Resolution {
    pub plan: LoadPlan,
    pub rejected: Vec<(String, ResolutionError)>,
}

/// Resolve one discovery pass's manifests into a load plan.
///
/// `already_active` supplies the versions of plugins that are live from an
/// earlier pass; they satisfy dependencies without appearing in the plan.
/// A rejection only ever removes the affected manifests — the pass as a
/// whole always succeeds.
pub fn resolve(
    manifests: &[PluginManifest],
    host: &HostInfo,
    already_active: &BTreeMap<String, Version>,
) -> Resolution {
    let mut rejected: Vec<(String, ResolutionError)> = Vec::new();
    let mut accepted: BTreeMap<String, &PluginManifest> = manifests
        .iter()
        .map(|m| (m.id.clone(), m))
        .collect();

    // Host compatibility first: an incompatible plugin is rejected outright,
    // and anything depending on it falls out in the cascade below.
    let running = host.version.as_semver();
    let incompatible: Vec<(String, ResolutionError)> = accepted
        .iter()
        .filter_map(|(id, manifest)| {
            manifest
                .compatibility
                .iter()
                .find(|req| req.host == host.name && !req.range.includes(&running))
                .map(|req| {
                    (
                        id.clone(),
                        ResolutionError::IncompatibleHost {
                            host: req.host.clone(),
                            required: req.range.clone(),
                            running: host.version.clone(),
                        },
                    )
                })
        })
        .collect();
    for (id, error) in incompatible {
        accepted.remove(&id);
        rejected.push((id, error));
    }

    // Reject manifests with missing or version-incompatible dependencies,
    // iterating to a fixpoint so rejections cascade to dependents.
    loop {
        let mut round: Vec<(String, ResolutionError)> = Vec::new();
        for (id, manifest) in &accepted {
            for dep in &manifest.dependencies {
                let available: Option<&Version> = accepted
                    .get(&dep.id)
                    .map(|m| &m.version)
                    .or_else(|| already_active.get(&dep.id));
                match available {
                    None => {
                        round.push((
                            id.clone(),
                            ResolutionError::MissingDependency {
                                dependency: dep.id.clone(),
                            },
                        ));
                        break;
                    }
                    Some(found) if !dep.range.includes(found) => {
                        round.push((
                            id.clone(),
                            ResolutionError::VersionMismatch {
                                dependency: dep.id.clone(),
                                required: dep.range.clone(),
                                found: found.clone(),
                            },
                        ));
                        break;
                    }
                    Some(_) => {}
                }
            }
        }
        if round.is_empty() {
            break;
        }
        for (id, error) in round {
            accepted.remove(&id);
            rejected.push((id, error));
        }
    }

    // Topological order over the surviving set. Edges run from dependent to
    // dependency; Kahn's algorithm emits dependencies first. Nodes become
    // ready in lexicographic order so regenerating the plan from the same
    // candidate set is deterministic.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut unresolved: HashMap<&str, usize> = HashMap::new();
    for (id, manifest) in &accepted {
        let in_set: Vec<&str> = manifest
            .dependencies
            .iter()
            .filter(|dep| accepted.contains_key(&dep.id))
            .map(|dep| dep.id.as_str())
            .collect();
        unresolved.insert(id.as_str(), in_set.len());
        for dep_id in in_set {
            dependents.entry(dep_id).or_default().push(id.as_str());
        }
    }

    let mut ready: BinaryHeap<Reverse<&str>> = unresolved
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| Reverse(*id))
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(accepted.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id.to_string());
        for &dependent in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(count) = unresolved.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
    }

    // Anything not emitted is either on a cycle or (transitively) depends on
    // one. Cycle members are rejected together; dependents of a cycle are
    // rejected as missing their dependency.
    if order.len() != accepted.len() {
        let emitted: HashSet<&str> = order.iter().map(String::as_str).collect();
        let leftover: Vec<&str> = accepted
            .keys()
            .map(String::as_str)
            .filter(|id| !emitted.contains(id))
            .collect();

        let mut reachable: HashMap<&str, HashSet<&str>> = HashMap::new();
        for &id in &leftover {
            reachable.insert(id, reach_within(id, &accepted, &leftover));
        }

        for &id in &leftover {
            let self_reaching = reachable[id].contains(id);
            let error = if self_reaching {
                // The member's cycle is its mutual-reachability class.
                let mut members: Vec<String> = leftover
                    .iter()
                    .filter(|&&other| reachable[id].contains(other) && reachable[other].contains(id))
                    .map(|&other| other.to_string())
                    .collect();
                members.sort();
                ResolutionError::CyclicDependency { members }
            } else {
                let blocked_on = accepted[id]
                    .dependencies
                    .iter()
                    .find(|dep| leftover.contains(&dep.id.as_str()))
                    .map(|dep| dep.id.clone())
                    .unwrap_or_else(|| id.to_string());
                ResolutionError::MissingDependency {
                    dependency: blocked_on,
                }
            };
            rejected.push((id.to_string(), error));
        }
    }

    rejected.sort_by(|(a, _), (b, _)| a.cmp(b));
    Resolution {
        plan: LoadPlan { order },
        rejected,
    }
}

/// Identifiers reachable from `start` by following dependency edges that stay
/// inside the leftover set. `start` itself is included only when a cycle
/// leads back to it.
fn reach_within<'a>(
    start: &'a str,
    accepted: &BTreeMap<String, &PluginManifest>,
    leftover: &[&'a str],
) -> HashSet<&'a str> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![start];
    let mut reached: HashSet<&'a str> = HashSet::new();

    while let Some(current) = stack.pop() {
        if let Some(manifest) = accepted.get(current) {
            for dep in &manifest.dependencies {
                if let Some(&next) = leftover.iter().find(|&&l| l == dep.id) {
                    reached.insert(next);
                    if seen.insert(next) {
                        stack.push(next);
                    }
                }
            }
        }
    }

    reached
}
