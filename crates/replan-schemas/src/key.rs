//! Dependency keys: the addressable identities in the module dependency graph.
//!
//! A key is an `(aspect, designator)` pair. The aspect says whether a change
//! to the named declaration is externally visible (`Interface`) or confined
//! to the defining source (`Implementation`). The designator names the
//! declaration itself: a top-level name, a nominal type, a member, an
//! external file, or a source file in this module.
//!
//! Keys are totally ordered and hashable. Determinism matters here: the
//! tracer visits users in key order, and that order leaks into scheduling
//! order surfaced to humans. Derived `Ord` on the enums gives the required
//! tie-break (variant index first, then lexicographic content).

use std::fmt;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether a change to a declaration is visible outside its defining source.
///
/// `Interface`-aspect changes affect external users; `Implementation`-aspect
/// changes affect only the defining source. `Interface` orders first.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    /// Externally visible surface of a declaration.
    Interface,
    /// The body; changes here affect only the defining source.
    Implementation,
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aspect::Interface => write!(f, "interface"),
            Aspect::Implementation => write!(f, "implementation"),
        }
    }
}

/// The identity portion of a dependency key.
///
/// Declaration order doubles as the ordering tie-break, so reordering
/// variants is a behavioral change, not a cleanup.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Designator {
    /// A top-level declaration, identified by name.
    TopLevel { name: String },
    /// A nominal type, identified by its mangled context.
    Nominal { context: String },
    /// A potential member of a nominal context (e.g. extensions may add one).
    PotentialMember { context: String },
    /// A named member of a nominal context.
    Member { context: String, name: String },
    /// A name looked up dynamically (`AnyObject`-style dispatch).
    DynamicLookup { name: String },
    /// A module file outside the current module.
    ExternalDepend { path: PathBuf },
    /// A source file within the current module.
    SourceFileProvide { path: PathBuf },
}

impl fmt::Display for Designator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Designator::TopLevel { name } => write!(f, "top-level {name}"),
            Designator::Nominal { context } => write!(f, "type {context}"),
            Designator::PotentialMember { context } => {
                write!(f, "potential members of {context}")
            }
            Designator::Member { context, name } => {
                write!(f, "member {context}.{name}")
            }
            Designator::DynamicLookup { name } => {
                write!(f, "dynamic lookup {name}")
            }
            Designator::ExternalDepend { path } => {
                write!(f, "external {}", path.display())
            }
            Designator::SourceFileProvide { path } => {
                write!(f, "source file {}", path.display())
            }
        }
    }
}

/// An addressable identity in the dependency graph: `(aspect, designator)`.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct DependencyKey {
    pub aspect: Aspect,
    pub designator: Designator,
}

impl DependencyKey {
    /// Key for a top-level declaration.
    pub fn top_level(aspect: Aspect, name: impl Into<String>) -> Self {
        DependencyKey {
            aspect,
            designator: Designator::TopLevel { name: name.into() },
        }
    }

    /// Key for a nominal type.
    pub fn nominal(aspect: Aspect, context: impl Into<String>) -> Self {
        DependencyKey {
            aspect,
            designator: Designator::Nominal {
                context: context.into(),
            },
        }
    }

    /// Key for a named member of a nominal context.
    pub fn member(
        aspect: Aspect,
        context: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        DependencyKey {
            aspect,
            designator: Designator::Member {
                context: context.into(),
                name: name.into(),
            },
        }
    }

    /// Interface-aspect key for a module file outside the current module.
    ///
    /// External dependencies only exist in interface aspect: a module file
    /// has no implementation visible to us.
    pub fn external_depend(path: impl Into<PathBuf>) -> Self {
        DependencyKey {
            aspect: Aspect::Interface,
            designator: Designator::ExternalDepend { path: path.into() },
        }
    }

    /// Key for a source file in the current module.
    pub fn source_file_provide(aspect: Aspect, path: impl Into<PathBuf>) -> Self {
        DependencyKey {
            aspect,
            designator: Designator::SourceFileProvide { path: path.into() },
        }
    }

    /// The external-dependency path, if this key names one.
    pub fn as_external_depend(&self) -> Option<&Path> {
        match &self.designator {
            Designator::ExternalDepend { path } => Some(path),
            _ => None,
        }
    }

    /// True for interface-aspect keys.
    pub fn is_interface(&self) -> bool {
        self.aspect == Aspect::Interface
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.aspect, self.designator)
    }
}
