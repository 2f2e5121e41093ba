//! Binary compatibility between two versions of one class.
//!
//! The rules follow JLS §13.4, simplified conservatively where the exact
//! rule would need whole-program knowledge.

use std::collections::HashMap;

use tracing::debug;

use crate::abi::{
    AbiSnapshot, AccessFlags, ClassAbi, CONSTRUCTOR, FieldAbi, MethodAbi, MethodSignature,
    STATIC_INITIALIZER,
};

/// Severity of an ABI change, from harmless to "rebuild everything".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityLevel {
    /// Nothing that depends on the class needs recompiling.
    Compatible,
    /// Direct dependants must be recompiled.
    Incompatible,
    /// The change may be inlined at unknown sites; only a full rebuild is safe.
    GloballyIncompatible,
}

type ClassCheck = fn(&ClassAbi, &ClassAbi) -> Option<CompatibilityLevel>;
type FieldCheck = fn(&FieldAbi, &FieldAbi) -> Option<CompatibilityLevel>;
type MethodCheck = fn(&MethodAbi, &MethodAbi) -> Option<CompatibilityLevel>;

const CLASS_CHECKS: &[(&str, ClassCheck)] = &[
    ("abstract class", abstract_class),
    ("final class", final_class),
    ("public class", public_class),
    ("supertypes", supertypes),
    ("constants", constants),
    ("fields", fields),
    ("methods", methods),
];

const FIELD_CHECKS: &[FieldCheck] = &[
    field_access,
    field_static,
    field_final,
    field_type,
];

const METHOD_CHECKS: &[MethodCheck] = &[
    method_access,
    method_abstract,
    method_final,
    method_static,
];

/// Compares old and new versions of a class.
///
/// Ancestor lookups for member shadowing go through the snapshot taken
/// before the change.
#[derive(Debug, Clone, Copy)]
pub struct AbiCompatibilityChecker<'a> {
    ancestry: &'a AbiSnapshot,
}

impl<'a> AbiCompatibilityChecker<'a> {
    pub fn new(ancestry: &'a AbiSnapshot) -> Self {
        Self { ancestry }
    }

    pub fn compare(&self, old: Option<&ClassAbi>, new: Option<&ClassAbi>) -> CompatibilityLevel {
        match (old, new) {
            (None, _) => CompatibilityLevel::Compatible,
            (Some(old), None) => {
                if old.constants.is_empty() {
                    CompatibilityLevel::Incompatible
                } else {
                    CompatibilityLevel::GloballyIncompatible
                }
            }
            (Some(old), Some(new)) => self.compare_versions(old, new),
        }
    }

    fn compare_versions(&self, old: &ClassAbi, new: &ClassAbi) -> CompatibilityLevel {
        let mut level = CompatibilityLevel::Compatible;

        for (label, check) in CLASS_CHECKS {
            match check(old, new) {
                Some(CompatibilityLevel::GloballyIncompatible) => {
                    debug!(class = %new.name, check = label, "globally incompatible change");
                    return CompatibilityLevel::GloballyIncompatible;
                }
                Some(found) if found > level => {
                    debug!(class = %new.name, check = label, "incompatible change");
                    level = found;
                }
                _ => {}
            }
        }

        if self.shadows_inherited_member(old, new) {
            debug!(class = %new.name, check = "shadowing", "incompatible change");
            level = level.max(CompatibilityLevel::Incompatible);
        }

        level
    }

    /// A member added to `new` that an ancestor already declares changes how
    /// existing call sites resolve, whatever its visibility.
    fn shadows_inherited_member(&self, old: &ClassAbi, new: &ClassAbi) -> bool {
        let old_fields = old.fields_by_name();
        let old_methods = old.methods_by_signature();

        let added_fields: Vec<&FieldAbi> = new
            .fields
            .iter()
            .filter(|f| !old_fields.contains_key(f.name.as_str()))
            .collect();
        let added_methods: Vec<&MethodSignature> = new
            .methods
            .iter()
            .map(|m| &m.signature)
            .filter(|s| !old_methods.contains_key(s))
            .filter(|s| s.name != CONSTRUCTOR && s.name != STATIC_INITIALIZER)
            .collect();
        if added_fields.is_empty() && added_methods.is_empty() {
            return false;
        }

        self.ancestry.ancestors_of(&old.name).into_iter().any(|ancestor| {
            added_fields.iter().any(|f| ancestor.has_field(&f.name))
                || added_methods.iter().any(|s| ancestor.has_method(s))
        })
    }
}

fn flag_rule(
    old: AccessFlags,
    new: AccessFlags,
    flag: AccessFlags,
    on_added: CompatibilityLevel,
    on_removed: CompatibilityLevel,
) -> Option<CompatibilityLevel> {
    if old.was_added(new, flag) {
        Some(on_added)
    } else if old.was_removed(new, flag) {
        Some(on_removed)
    } else {
        None
    }
}

// JLS §13.4.1
fn abstract_class(old: &ClassAbi, new: &ClassAbi) -> Option<CompatibilityLevel> {
    flag_rule(
        old.flags,
        new.flags,
        AccessFlags::ABSTRACT,
        CompatibilityLevel::Incompatible,
        CompatibilityLevel::Compatible,
    )
}

// JLS §13.4.2
fn final_class(old: &ClassAbi, new: &ClassAbi) -> Option<CompatibilityLevel> {
    flag_rule(
        old.flags,
        new.flags,
        AccessFlags::FINAL,
        CompatibilityLevel::Incompatible,
        CompatibilityLevel::Compatible,
    )
}

// JLS §13.4.3
fn public_class(old: &ClassAbi, new: &ClassAbi) -> Option<CompatibilityLevel> {
    flag_rule(
        old.flags,
        new.flags,
        AccessFlags::PUBLIC,
        CompatibilityLevel::Compatible,
        CompatibilityLevel::Incompatible,
    )
}

// JLS §13.4.4 allows a changed supertype set as long as no member is lost.
// Any change is treated as incompatible.
fn supertypes(old: &ClassAbi, new: &ClassAbi) -> Option<CompatibilityLevel> {
    (old.super_class != new.super_class || old.interfaces != new.interfaces)
        .then_some(CompatibilityLevel::Incompatible)
}

// JLS §13.4.9: constant values are inlined by callers.
fn constants(old: &ClassAbi, new: &ClassAbi) -> Option<CompatibilityLevel> {
    let current = new.constants_by_name();
    old.constants
        .iter()
        .any(|c| current.get(c.name.as_str()) != Some(&c.fingerprint))
        .then_some(CompatibilityLevel::GloballyIncompatible)
}

// JLS §13.4.6 - §13.4.10
fn fields(old: &ClassAbi, new: &ClassAbi) -> Option<CompatibilityLevel> {
    let current = new.fields_by_name();
    members(
        old.fields.iter().filter(|f| !f.flags.is_private()),
        |f| current.get(f.name.as_str()).copied(),
        FIELD_CHECKS,
    )
}

// JLS §13.4.12 - §13.4.19
fn methods(old: &ClassAbi, new: &ClassAbi) -> Option<CompatibilityLevel> {
    let current: HashMap<&MethodSignature, &MethodAbi> = new.methods_by_signature();
    members(
        old.methods
            .iter()
            .filter(|m| !m.flags.is_private() && m.name() != STATIC_INITIALIZER),
        |m| current.get(&m.signature).copied(),
        METHOD_CHECKS,
    )
}

/// Shared shape of the field and method rules: a removed member is
/// incompatible, a retained one is run through every per-member check.
fn members<'m, M: 'm>(
    old: impl Iterator<Item = &'m M>,
    counterpart: impl Fn(&M) -> Option<&'m M>,
    checks: &[fn(&M, &M) -> Option<CompatibilityLevel>],
) -> Option<CompatibilityLevel> {
    let mut level = None;
    for old_member in old {
        let Some(new_member) = counterpart(old_member) else {
            return Some(CompatibilityLevel::Incompatible);
        };
        for check in checks {
            let found = check(old_member, new_member);
            if found == Some(CompatibilityLevel::GloballyIncompatible) {
                return found;
            }
            level = level.max(found);
        }
    }
    level
}

fn narrowed(old: AccessFlags, new: AccessFlags) -> Option<CompatibilityLevel> {
    (new.access_level() < old.access_level()).then_some(CompatibilityLevel::Incompatible)
}

fn toggled(old: AccessFlags, new: AccessFlags, flag: AccessFlags) -> Option<CompatibilityLevel> {
    old.toggled(new, flag)
        .then_some(CompatibilityLevel::Incompatible)
}

// JLS §13.4.7
fn field_access(old: &FieldAbi, new: &FieldAbi) -> Option<CompatibilityLevel> {
    narrowed(old.flags, new.flags)
}

// JLS §13.4.10
fn field_static(old: &FieldAbi, new: &FieldAbi) -> Option<CompatibilityLevel> {
    toggled(old.flags, new.flags, AccessFlags::STATIC)
}

// JLS §13.4.9
fn field_final(old: &FieldAbi, new: &FieldAbi) -> Option<CompatibilityLevel> {
    flag_rule(
        old.flags,
        new.flags,
        AccessFlags::FINAL,
        CompatibilityLevel::Incompatible,
        CompatibilityLevel::Compatible,
    )
}

// Field resolution matches on the descriptor, so a retyped field is gone for
// existing callers.
fn field_type(old: &FieldAbi, new: &FieldAbi) -> Option<CompatibilityLevel> {
    (old.field_type != new.field_type).then_some(CompatibilityLevel::Incompatible)
}

// JLS §13.4.7
fn method_access(old: &MethodAbi, new: &MethodAbi) -> Option<CompatibilityLevel> {
    narrowed(old.flags, new.flags)
}

// JLS §13.4.16
fn method_abstract(old: &MethodAbi, new: &MethodAbi) -> Option<CompatibilityLevel> {
    flag_rule(
        old.flags,
        new.flags,
        AccessFlags::ABSTRACT,
        CompatibilityLevel::Incompatible,
        CompatibilityLevel::Compatible,
    )
}

// JLS §13.4.17: a static method cannot be overridden, so making it final is harmless.
fn method_final(old: &MethodAbi, new: &MethodAbi) -> Option<CompatibilityLevel> {
    if old.flags.was_removed(new.flags, AccessFlags::FINAL) {
        return Some(CompatibilityLevel::Compatible);
    }
    (old.flags.was_added(new.flags, AccessFlags::FINAL) && !old.flags.contains(AccessFlags::STATIC))
        .then_some(CompatibilityLevel::Incompatible)
}

// JLS §13.4.19
fn method_static(old: &MethodAbi, new: &MethodAbi) -> Option<CompatibilityLevel> {
    toggled(old.flags, new.flags, AccessFlags::STATIC)
}
