//! Class-level dependency graph derived from an ABI snapshot.

use std::collections::{BTreeMap, BTreeSet};

use crate::abi::{AbiSnapshot, UnitName};

/// Edges of one node, split by how the dependency is visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassDependencies {
    pub internal: BTreeSet<UnitName>,
    pub exposed: BTreeSet<UnitName>,
}

impl ClassDependencies {
    pub const EMPTY: Self = Self {
        internal: BTreeSet::new(),
        exposed: BTreeSet::new(),
    };

    pub fn all(&self) -> impl Iterator<Item = &UnitName> {
        self.exposed.iter().chain(self.internal.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.exposed.is_empty()
    }

    pub fn contains(&self, name: &UnitName) -> bool {
        self.internal.contains(name) || self.exposed.contains(name)
    }
}

static NO_DEPENDENCIES: ClassDependencies = ClassDependencies::EMPTY;

/// Forward edges (what a class uses) and reverse edges (who uses a class).
///
/// The reverse index is built together with the forward map, so every
/// dependant query is a single lookup.
#[derive(Debug, Clone, Default)]
pub struct ClassDependencyGraph {
    forward: BTreeMap<UnitName, ClassDependencies>,
    reverse: BTreeMap<UnitName, ClassDependencies>,
}

impl ClassDependencyGraph {
    pub fn from_snapshot(snapshot: &AbiSnapshot) -> Self {
        let mut forward = BTreeMap::new();
        let mut reverse: BTreeMap<UnitName, ClassDependencies> = BTreeMap::new();

        for (name, abi) in snapshot.iter() {
            for target in &abi.exposed {
                reverse
                    .entry(target.clone())
                    .or_default()
                    .exposed
                    .insert(name.clone());
            }
            for target in &abi.internal {
                reverse
                    .entry(target.clone())
                    .or_default()
                    .internal
                    .insert(name.clone());
            }
            forward.insert(
                name.clone(),
                ClassDependencies {
                    internal: abi.internal.clone(),
                    exposed: abi.exposed.clone(),
                },
            );
        }

        Self { forward, reverse }
    }

    /// Classes `name` depends on. Unknown names have none.
    pub fn dependencies_of(&self, name: &UnitName) -> &ClassDependencies {
        self.forward.get(name).unwrap_or(&NO_DEPENDENCIES)
    }

    /// Classes depending on `name`, split by the kind of edge pointing at it.
    pub fn dependants_of(&self, name: &UnitName) -> &ClassDependencies {
        self.reverse.get(name).unwrap_or(&NO_DEPENDENCIES)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Builds a graph for the orchestrator. A seam so the graph source can be
/// swapped in tests.
pub trait DependencyGraphBuilder {
    fn build(&self, snapshot: &AbiSnapshot) -> ClassDependencyGraph;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotGraphBuilder;

impl DependencyGraphBuilder for SnapshotGraphBuilder {
    fn build(&self, snapshot: &AbiSnapshot) -> ClassDependencyGraph {
        ClassDependencyGraph::from_snapshot(snapshot)
    }
}
