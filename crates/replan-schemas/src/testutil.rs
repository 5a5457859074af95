//! Shared proptest strategies for schema tests.

use proptest::prelude::*;

use crate::{
    Aspect, DefinedDecl, DependencyKey, Designator, Fingerprint, SourceSummary,
};

/// Strategy for generating arbitrary identifier-like names.
pub fn arb_name() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,15}"
}

/// Strategy for generating arbitrary source-ish file paths.
pub fn arb_file_path() -> impl Strategy<Value = std::path::PathBuf> {
    (arb_name(), arb_name())
        .prop_map(|(dir, file)| format!("{dir}/{file}.swift").into())
}

/// Strategy for generating arbitrary aspects.
pub fn arb_aspect() -> impl Strategy<Value = Aspect> {
    prop_oneof![Just(Aspect::Interface), Just(Aspect::Implementation)]
}

/// Strategy for generating arbitrary designators, covering every variant.
pub fn arb_designator() -> impl Strategy<Value = Designator> {
    prop_oneof![
        arb_name().prop_map(|name| Designator::TopLevel { name }),
        arb_name().prop_map(|context| Designator::Nominal { context }),
        arb_name().prop_map(|context| Designator::PotentialMember { context }),
        (arb_name(), arb_name())
            .prop_map(|(context, name)| Designator::Member { context, name }),
        arb_name().prop_map(|name| Designator::DynamicLookup { name }),
        arb_file_path().prop_map(|path| Designator::ExternalDepend { path }),
        arb_file_path().prop_map(|path| Designator::SourceFileProvide { path }),
    ]
}

/// Strategy for generating arbitrary dependency keys.
pub fn arb_key() -> impl Strategy<Value = DependencyKey> {
    (arb_aspect(), arb_designator())
        .prop_map(|(aspect, designator)| DependencyKey { aspect, designator })
}

/// Strategy for generating arbitrary fingerprints.
pub fn arb_fingerprint() -> impl Strategy<Value = Fingerprint> {
    "[a-f0-9]{8,16}".prop_map(Fingerprint)
}

/// Strategy for generating arbitrary summaries.
///
/// Definition keys are deduplicated so generated summaries satisfy the
/// integrator's no-duplicate-definitions requirement.
pub fn arb_summary() -> impl Strategy<Value = SourceSummary> {
    let defs = proptest::collection::btree_map(
        arb_key(),
        proptest::option::of(arb_fingerprint()),
        0..8,
    );
    let uses = proptest::collection::vec(arb_key(), 0..8);
    (defs, uses).prop_map(|(defs, uses)| SourceSummary {
        definitions: defs
            .into_iter()
            .map(|(key, fingerprint)| DefinedDecl { key, fingerprint })
            .collect(),
        uses,
    })
}
