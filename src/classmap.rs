//! Which source file produced which classes.

use std::collections::{BTreeMap, BTreeSet};

use crate::abi::UnitName;
use crate::error::{BuildError, Result};

/// Bidirectional registry between source files and the classes compiled from
/// them.
///
/// `source → classes` is authoritative; the `class → source` index is kept in
/// step with it for the units each mutation touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassMap {
    by_source: BTreeMap<String, BTreeSet<UnitName>>,
    by_unit: BTreeMap<UnitName, String>,
}

impl ClassMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a map from its persisted `class → source` form.
    pub fn from_unit_map(units: BTreeMap<UnitName, String>) -> Self {
        let mut by_source: BTreeMap<String, BTreeSet<UnitName>> = BTreeMap::new();
        for (unit, source) in &units {
            by_source.entry(source.clone()).or_default().insert(unit.clone());
        }
        Self {
            by_source,
            by_unit: units,
        }
    }

    pub fn to_unit_map(&self) -> &BTreeMap<UnitName, String> {
        &self.by_unit
    }

    pub fn classes_of(&self, source: &str) -> Result<&BTreeSet<UnitName>> {
        self.by_source
            .get(source)
            .ok_or_else(|| BuildError::UnregisteredSource(source.to_string()))
    }

    pub fn source_file_of(&self, unit: &UnitName) -> Result<&str> {
        self.by_unit
            .get(unit)
            .map(String::as_str)
            .ok_or_else(|| BuildError::UnregisteredUnit(unit.clone()))
    }

    /// Replaces everything `source` owns with `classes`. Returns the classes
    /// it owned before but not anymore; their binaries are stale.
    pub fn register_source_class_relationship(
        &mut self,
        source: &str,
        classes: BTreeSet<UnitName>,
    ) -> BTreeSet<UnitName> {
        for unit in &classes {
            match self.by_unit.insert(unit.clone(), source.to_string()) {
                Some(other) if other != source => self.release(&other, unit),
                _ => {}
            }
        }

        let previous = self
            .by_source
            .insert(source.to_string(), classes)
            .unwrap_or_default();
        let orphaned: BTreeSet<UnitName> = previous
            .difference(&self.by_source[source])
            .cloned()
            .collect();
        for unit in &orphaned {
            self.by_unit.remove(unit);
        }
        orphaned
    }

    /// Forgets `source`, returning the classes it owned.
    pub fn remove_source_file(&mut self, source: &str) -> BTreeSet<UnitName> {
        let owned = self.by_source.remove(source).unwrap_or_default();
        for unit in &owned {
            self.by_unit.remove(unit);
        }
        owned
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.by_source.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_unit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_unit.is_empty()
    }

    /// Takes `unit` away from `owner`, dropping the owner once it has nothing left.
    fn release(&mut self, owner: &str, unit: &UnitName) {
        if let Some(owned) = self.by_source.get_mut(owner) {
            owned.remove(unit);
            if owned.is_empty() {
                self.by_source.remove(owner);
            }
        }
    }
}
