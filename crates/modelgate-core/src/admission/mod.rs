//! Type admission policy.
//!
//! Every type reference the decoder meets is checked here before anything is
//! constructed from it. Rules are evaluated in a fixed order:
//!
//! 1. `module.name` is in the qualified allowlist: admitted.
//! 2. `module` is in the module allowlist and the lowercased `name` is not in
//!    the denylist: admitted.
//! 3. Anything else: rejected.
//!
//! The denylist stops a dangerous symbol from riding in on a module that is
//! allowed for its array or container types. A policy is immutable once built
//! and is shared by reference between decoders.

mod defaults;
mod table;

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

pub use defaults::{DANGEROUS_NAMES, SAFE_MODULES, SAFE_QUALIFIED_NAMES};
pub use table::{
    ActivationKind, AdmittedType, ArrayType, BuiltinType, KnownType, LayerKind,
};

/// A `(module, name)` pair read from a serialized stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TypeRef {
    pub module: String,
    pub name: String,
}

impl TypeRef {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// `module.name`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// Which rule rejected a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectRule {
    /// Neither the qualified name nor the module is allowlisted.
    NotAllowed,
    /// The module is allowlisted but the bare name is denylisted.
    DeniedName,
}

impl fmt::Display for RejectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAllowed => f.write_str("not in the allowlist"),
            Self::DeniedName => f.write_str("name is on the denylist"),
        }
    }
}

/// A type reference was refused by the admission policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("blocked unsafe type {reference}: {rule}")]
pub struct UnsafeTypeError {
    pub reference: TypeRef,
    pub rule: RejectRule,
}

/// Allowlist + denylist deciding which type references may be constructed.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    allowed_modules: HashSet<String>,
    allowed_qualified_names: HashSet<String>,
    denied_names: HashSet<String>,
    closed_world: bool,
    unrestricted: bool,
}

impl AdmissionPolicy {
    /// Build a policy from explicit lists. Denied names are lowercased.
    pub fn new<M, Q, D>(allowed_modules: M, allowed_qualified_names: Q, denied_names: D) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        Q: IntoIterator,
        Q::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            allowed_modules: allowed_modules.into_iter().map(Into::into).collect(),
            allowed_qualified_names: allowed_qualified_names
                .into_iter()
                .map(Into::into)
                .collect(),
            denied_names: denied_names
                .into_iter()
                .map(|n| n.into().to_lowercase())
                .collect(),
            closed_world: false,
            unrestricted: false,
        }
    }

    /// Only admit qualified names; the module rule is switched off.
    pub fn closed_world(mut self) -> Self {
        self.closed_world = true;
        self
    }

    /// Admits everything. Only reachable through `SecureLoader::unsafe_load`.
    pub(crate) fn unrestricted() -> Self {
        Self {
            unrestricted: true,
            ..Self::new(
                std::iter::empty::<String>(),
                std::iter::empty::<String>(),
                std::iter::empty::<String>(),
            )
        }
    }

    pub fn is_closed_world(&self) -> bool {
        self.closed_world
    }

    /// Decide whether `reference` may be resolved, and resolve it.
    pub fn admit(&self, reference: &TypeRef) -> Result<AdmittedType, UnsafeTypeError> {
        if self.unrestricted {
            return Ok(AdmittedType::resolve(reference.clone()));
        }

        if self
            .allowed_qualified_names
            .contains(&reference.qualified_name())
        {
            return Ok(AdmittedType::resolve(reference.clone()));
        }

        if !self.closed_world && self.allowed_modules.contains(&reference.module) {
            if self.is_denied(&reference.name) {
                return Err(UnsafeTypeError {
                    reference: reference.clone(),
                    rule: RejectRule::DeniedName,
                });
            }
            return Ok(AdmittedType::resolve(reference.clone()));
        }

        Err(UnsafeTypeError {
            reference: reference.clone(),
            rule: RejectRule::NotAllowed,
        })
    }

    /// Dotted names (attribute paths) are denied if any segment is.
    fn is_denied(&self, name: &str) -> bool {
        name.split('.')
            .any(|segment| self.denied_names.contains(&segment.to_lowercase()))
    }

    pub fn is_admitted(&self, reference: &TypeRef) -> bool {
        self.admit(reference).is_ok()
    }

    pub fn allowed_modules(&self) -> impl Iterator<Item = &str> {
        self.allowed_modules.iter().map(String::as_str)
    }

    pub fn allowed_qualified_names(&self) -> impl Iterator<Item = &str> {
        self.allowed_qualified_names.iter().map(String::as_str)
    }

    pub fn denied_names(&self) -> impl Iterator<Item = &str> {
        self.denied_names.iter().map(String::as_str)
    }
}

impl Default for AdmissionPolicy {
    /// Policy for the bundled model collection.
    fn default() -> Self {
        Self::new(
            SAFE_MODULES.iter().copied(),
            SAFE_QUALIFIED_NAMES.iter().copied(),
            DANGEROUS_NAMES.iter().copied(),
        )
    }
}
