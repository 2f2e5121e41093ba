//! Structural interface of a compiled class.
//!
//! A [`ClassAbi`] captures everything about a class file that other classes
//! can observe without looking at method bodies: modifiers, supertypes,
//! fields, method signatures and compile-time constants. It also records
//! which other classes the unit references, split into `exposed` (reachable
//! from the non-private surface) and `internal` (everything else).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use bitflags::bitflags;
use serde::Serialize;

use crate::descriptor::TypeDescriptor;

/// Package prefix of the runtime library; classes under it never take part
/// in dependency tracking.
pub const RUNTIME_NAMESPACE: &str = "java.";

pub const STATIC_INITIALIZER: &str = "<clinit>";
pub const CONSTRUCTOR: &str = "<init>";

/// Fully-qualified binary class name with dots as package separators,
/// e.g. `org.example.Outer$Inner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UnitName(String);

impl UnitName {
    pub fn new(qualified: impl Into<String>) -> Self {
        Self(qualified.into())
    }

    /// Converts a JVM internal name (`org/example/Foo`) into a unit name.
    pub fn from_internal(internal: &str) -> Self {
        Self(internal.replace('/', "."))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_runtime_library(&self) -> bool {
        self.0.starts_with(RUNTIME_NAMESPACE)
    }

    /// Package part of the name, empty for the default package.
    pub fn package(&self) -> &str {
        self.0.rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or("")
    }

    /// Path of the class file relative to a destination root.
    pub fn class_file_path(&self) -> PathBuf {
        let mut path: PathBuf = self.0.split('.').collect();
        path.set_extension("class");
        path
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

bitflags! {
    /// Access and property flags shared by classes, fields and methods.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

impl AccessFlags {
    pub fn access_level(self) -> AccessLevel {
        if self.contains(Self::PRIVATE) {
            AccessLevel::Private
        } else if self.contains(Self::PROTECTED) {
            AccessLevel::Protected
        } else if self.contains(Self::PUBLIC) {
            AccessLevel::Public
        } else {
            AccessLevel::Package
        }
    }

    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    pub fn was_added(self, new: Self, flag: Self) -> bool {
        !self.contains(flag) && new.contains(flag)
    }

    pub fn was_removed(self, new: Self, flag: Self) -> bool {
        self.contains(flag) && !new.contains(flag)
    }

    pub fn toggled(self, new: Self, flag: Self) -> bool {
        self.contains(flag) != new.contains(flag)
    }
}

/// Visibility, ordered from narrowest to widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    Private,
    Package,
    Protected,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ClassVersion {
    pub major: u16,
    pub minor: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAbi {
    pub flags: AccessFlags,
    pub name: String,
    pub field_type: TypeDescriptor,
}

impl FieldAbi {
    pub fn access_level(&self) -> AccessLevel {
        self.flags.access_level()
    }
}

/// Identity of a method across versions of its class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub name: String,
    pub parameters: Vec<TypeDescriptor>,
    pub return_type: TypeDescriptor,
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type, self.name)?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodAbi {
    pub flags: AccessFlags,
    pub signature: MethodSignature,
    pub exceptions: BTreeSet<UnitName>,
}

impl MethodAbi {
    pub fn name(&self) -> &str {
        &self.signature.name
    }
}

/// A compile-time constant that callers may have inlined. Only a fingerprint
/// of the value is kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantAbi {
    pub name: String,
    pub fingerprint: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassAbi {
    pub version: ClassVersion,
    pub flags: AccessFlags,
    pub name: UnitName,
    pub super_class: Option<UnitName>,
    pub interfaces: Vec<UnitName>,
    pub fields: Vec<FieldAbi>,
    pub methods: Vec<MethodAbi>,
    pub constants: Vec<ConstantAbi>,
    /// Classes reachable from the non-private surface.
    pub exposed: BTreeSet<UnitName>,
    /// Classes reachable only from private members, bodies or the constant pool.
    pub internal: BTreeSet<UnitName>,
}

impl ClassAbi {
    pub fn fields_by_name(&self) -> HashMap<&str, &FieldAbi> {
        self.fields.iter().map(|f| (f.name.as_str(), f)).collect()
    }

    pub fn methods_by_signature(&self) -> HashMap<&MethodSignature, &MethodAbi> {
        self.methods.iter().map(|m| (&m.signature, m)).collect()
    }

    pub fn constants_by_name(&self) -> HashMap<&str, u64> {
        self.constants
            .iter()
            .map(|c| (c.name.as_str(), c.fingerprint))
            .collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn has_method(&self, signature: &MethodSignature) -> bool {
        self.methods.iter().any(|m| &m.signature == signature)
    }

    /// Direct supertypes: the superclass followed by the interfaces.
    pub fn supertypes(&self) -> impl Iterator<Item = &UnitName> {
        self.super_class.iter().chain(self.interfaces.iter())
    }
}

/// Collects referenced classes while a unit is being read and enforces the
/// `exposed`/`internal` invariants when finished.
#[derive(Debug, Default)]
pub struct DependencySets {
    exposed: BTreeSet<UnitName>,
    internal: BTreeSet<UnitName>,
}

impl DependencySets {
    /// Records a reference made from a declaration with the given flags.
    pub fn declared(&mut self, owner: AccessFlags, ty: &TypeDescriptor) {
        if let Some(name) = ty.tracked_unit() {
            if owner.is_private() {
                self.internal.insert(name.clone());
            } else {
                self.exposed.insert(name.clone());
            }
        }
    }

    /// Records a reference found outside any declaration.
    pub fn incidental(&mut self, ty: &TypeDescriptor) {
        if let Some(name) = ty.tracked_unit() {
            self.internal.insert(name.clone());
        }
    }

    pub fn finish(mut self, own_name: &UnitName) -> (BTreeSet<UnitName>, BTreeSet<UnitName>) {
        self.exposed.remove(own_name);
        self.internal.remove(own_name);
        self.internal.retain(|n| !self.exposed.contains(n));
        (self.exposed, self.internal)
    }
}

/// ABI of every class found under one destination root at one point in time.
#[derive(Debug, Clone, Default)]
pub struct AbiSnapshot {
    units: BTreeMap<UnitName, ClassAbi>,
}

impl AbiSnapshot {
    pub fn get(&self, name: &UnitName) -> Option<&ClassAbi> {
        self.units.get(name)
    }

    pub fn contains(&self, name: &UnitName) -> bool {
        self.units.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UnitName, &ClassAbi)> {
        self.units.iter()
    }

    /// Supertypes of `name`, transitively, nearest first. Names missing from
    /// the snapshot end their branch of the walk.
    pub fn ancestors_of(&self, name: &UnitName) -> Vec<&ClassAbi> {
        let mut seen = BTreeSet::new();
        seen.insert(name);
        let mut queue: std::collections::VecDeque<&UnitName> = self
            .units
            .get(name)
            .map(|abi| abi.supertypes().collect())
            .unwrap_or_default();

        let mut ancestors = Vec::new();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(abi) = self.units.get(next) {
                ancestors.push(abi);
                queue.extend(abi.supertypes());
            }
        }
        ancestors
    }
}

impl FromIterator<ClassAbi> for AbiSnapshot {
    fn from_iter<I: IntoIterator<Item = ClassAbi>>(iter: I) -> Self {
        Self {
            units: iter.into_iter().map(|abi| (abi.name.clone(), abi)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::BaseType;

    fn class(name: &str, super_class: Option<&str>, interfaces: &[&str]) -> ClassAbi {
        ClassAbi {
            version: ClassVersion::default(),
            flags: AccessFlags::PUBLIC,
            name: UnitName::from(name),
            super_class: super_class.map(UnitName::from),
            interfaces: interfaces.iter().map(|i| UnitName::from(*i)).collect(),
            fields: Vec::new(),
            methods: Vec::new(),
            constants: Vec::new(),
            exposed: BTreeSet::new(),
            internal: BTreeSet::new(),
        }
    }

    #[test]
    fn unit_name_conversions() {
        let name = UnitName::from_internal("org/example/Outer$Inner");
        assert_eq!(name.as_str(), "org.example.Outer$Inner");
        assert_eq!(name.package(), "org.example");
        assert_eq!(
            name.class_file_path(),
            PathBuf::from("org/example/Outer$Inner.class")
        );
        assert_eq!(UnitName::from("A").package(), "");
        assert!(UnitName::from("java.util.List").is_runtime_library());
        assert!(!UnitName::from("javax.inject.Named").is_runtime_library());
    }

    #[test]
    fn access_level_is_ordered_by_visibility() {
        assert_eq!(AccessFlags::empty().access_level(), AccessLevel::Package);
        assert_eq!(AccessFlags::PRIVATE.access_level(), AccessLevel::Private);
        assert!(AccessLevel::Private < AccessLevel::Package);
        assert!(AccessLevel::Package < AccessLevel::Protected);
        assert!(AccessLevel::Protected < AccessLevel::Public);
    }

    #[test]
    fn dependency_sets_keep_exposed_and_internal_disjoint() {
        let own = UnitName::from("a.A");
        let mut deps = DependencySets::default();
        let b = TypeDescriptor::object(UnitName::from("a.B"));
        let c = TypeDescriptor::object(UnitName::from("a.C"));

        deps.declared(AccessFlags::PRIVATE, &b);
        deps.declared(AccessFlags::PUBLIC, &b);
        deps.incidental(&c);
        deps.incidental(&TypeDescriptor::object(own.clone()));
        deps.declared(AccessFlags::PUBLIC, &TypeDescriptor::object("java.lang.String".into()));
        deps.declared(AccessFlags::PUBLIC, &TypeDescriptor::primitive(BaseType::Int));

        let (exposed, internal) = deps.finish(&own);
        assert_eq!(exposed.into_iter().collect::<Vec<_>>(), vec![UnitName::from("a.B")]);
        assert_eq!(internal.into_iter().collect::<Vec<_>>(), vec![UnitName::from("a.C")]);
    }

    #[test]
    fn ancestors_walk_superclasses_and_interfaces_without_looping() {
        let snapshot: AbiSnapshot = [
            class("C", Some("B"), &["I"]),
            class("B", Some("A"), &[]),
            class("A", Some("java.lang.Object"), &[]),
            class("I", None, &["J"]),
            class("J", None, &["I"]),
        ]
        .into_iter()
        .collect();

        let names: Vec<&str> = snapshot
            .ancestors_of(&UnitName::from("C"))
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["B", "I", "A", "J"]);
        assert!(snapshot.ancestors_of(&UnitName::from("missing")).is_empty());
    }
}
