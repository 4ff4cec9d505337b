//! Binary IR processing for SPIR-V shader modules.
//!
//! The crate parses a stream of 32-bit words into an instruction sequence,
//! recovers the symbolic metadata the binary format only encodes implicitly
//! (names, types, storage classes, built-ins, constants), assigns or remaps
//! input/output interface locations so successive pipeline stages agree on a
//! shared numbering, and rewrites the instruction stream in place to strip
//! debug information or flatten struct-typed interface variables. Everything
//! it emits stays a valid SPIR-V module (header, word counts, id bound).

use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

mod module;
mod reflect;
mod ty;

pub use module::{Parameter, SpirVModule, Stage};
pub use reflect::{DefKind, Definition, Definitions};
pub use ty::{StructMember, Type, TypeContext, TypeDef};

pub mod passes {
    // NOTE: inline `mod` to avoid adding APIs here, it's just namespacing.

    pub mod flatten;
    pub mod link;
}

pub mod spv;

/// Insertion-order-preserving map with a fast hasher, for tables whose
/// iteration order must follow declaration order.
pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Errors surfaced by parsing, linking and rewriting.
///
/// Structural problems all collapse into [`ModuleError::Malformed`] with a
/// human-readable reason; a failed module must be discarded, since passes do
/// not roll back partial edits.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The word stream is not a structurally valid module: bad magic or
    /// header, truncated instruction, or an annotation targeting an id that
    /// no instruction declares.
    #[error("malformed SPIR-V ({0})")]
    Malformed(String),

    /// `OpEntryPoint` declares a different pipeline stage than the host
    /// created this module for.
    #[error("entry point declares execution model {found}, expected {expected:?}")]
    StageMismatch { expected: Stage, found: u32 },

    /// An input matched an output of the previous stage by name, but the two
    /// interface types are incompatible.
    #[error("input/output type mismatch for \"{name}\"")]
    TypeMismatch { name: String },
}

impl ModuleError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ModuleError::Malformed(reason.into())
    }
}
