//! Semantic type descriptors consumed by reflection and linking.
//!
//! Types are interned: a [`Type`] is an index into a [`TypeContext`], and
//! two handles from the same context are equal exactly when the types are.
//! A context is shared across the modules of one pipeline (via `Rc`), so
//! the linker's type-mismatch check is a handle comparison; a structural
//! fallback covers modules built against separate contexts.

use elsa::FrozenIndexSet;
use std::ops::Index;

/// One member of a struct type.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct StructMember {
    pub name: Option<String>,
    pub ty: Type,
}

/// Structural description of a shader type.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeDef {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { element: Type, count: u32 },
    /// `columns` column vectors of type `column`.
    Matrix { column: Type, columns: u32 },
    Array { element: Type, count: u32 },
    RuntimeArray { element: Type },
    Struct { members: Vec<StructMember> },
    Image {
        sampled: Type,
        dim: u32,
        depth: u32,
        arrayed: bool,
        multisampled: bool,
        sampled_kind: u32,
        format: u32,
    },
    Sampler,
    SampledImage { image: Type },
}

/// Interned type handle. Only meaningful together with the [`TypeContext`]
/// that produced it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Type(u32);

/// Interner for [`TypeDef`]s. Interning takes `&self`; the backing store is
/// append-only, which also keeps every handed-out `&TypeDef` stable.
#[derive(Default)]
pub struct TypeContext {
    types: FrozenIndexSet<Box<TypeDef>>,
}

impl std::fmt::Debug for TypeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeContext").finish_non_exhaustive()
    }
}

impl TypeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `def`, returning the canonical handle for it.
    pub fn intern(&self, def: TypeDef) -> Type {
        if let Some((index, _)) = self.types.get_full(&def) {
            return Type(index as u32);
        }
        let (index, _) = self.types.insert_full(Box::new(def));
        Type(u32::try_from(index).expect("type interner overflowed u32"))
    }

    pub fn def(&self, ty: Type) -> &TypeDef {
        &self.types[ty.0 as usize]
    }

    /// Number of interface locations a value of `ty` occupies: one per
    /// scalar or vector, one per matrix column, element count times element
    /// slots for arrays, and the member sum for structs. Location
    /// assignment and struct flattening both use this, so the two can
    /// never disagree on a composite variable's span.
    pub fn location_count(&self, ty: Type) -> u32 {
        match self.def(ty) {
            TypeDef::Void | TypeDef::RuntimeArray { .. } => 0,
            TypeDef::Bool
            | TypeDef::Int { .. }
            | TypeDef::Float { .. }
            | TypeDef::Vector { .. }
            | TypeDef::Image { .. }
            | TypeDef::Sampler
            | TypeDef::SampledImage { .. } => 1,
            TypeDef::Matrix { columns, .. } => *columns,
            TypeDef::Array { element, count } => count * self.location_count(*element),
            TypeDef::Struct { members } => {
                members.iter().map(|member| self.location_count(member.ty)).sum()
            }
        }
    }

    /// Structural equality across (possibly distinct) contexts. Member
    /// names do not participate: linking cares about layout, not labels.
    pub fn structurally_eq(&self, a: Type, other: &TypeContext, b: Type) -> bool {
        if std::ptr::eq(self, other) {
            return a == b;
        }
        match (self.def(a), other.def(b)) {
            (TypeDef::Void, TypeDef::Void)
            | (TypeDef::Bool, TypeDef::Bool)
            | (TypeDef::Sampler, TypeDef::Sampler) => true,
            (
                TypeDef::Int { width: wa, signed: sa },
                TypeDef::Int { width: wb, signed: sb },
            ) => wa == wb && sa == sb,
            (TypeDef::Float { width: wa }, TypeDef::Float { width: wb }) => wa == wb,
            (
                TypeDef::Vector { element: ea, count: ca },
                TypeDef::Vector { element: eb, count: cb },
            ) => ca == cb && self.structurally_eq(*ea, other, *eb),
            (
                TypeDef::Matrix { column: la, columns: ca },
                TypeDef::Matrix { column: lb, columns: cb },
            ) => ca == cb && self.structurally_eq(*la, other, *lb),
            (
                TypeDef::Array { element: ea, count: ca },
                TypeDef::Array { element: eb, count: cb },
            ) => ca == cb && self.structurally_eq(*ea, other, *eb),
            (TypeDef::RuntimeArray { element: ea }, TypeDef::RuntimeArray { element: eb }) => {
                self.structurally_eq(*ea, other, *eb)
            }
            (TypeDef::Struct { members: ma }, TypeDef::Struct { members: mb }) => {
                ma.len() == mb.len()
                    && ma
                        .iter()
                        .zip(mb)
                        .all(|(x, y)| self.structurally_eq(x.ty, other, y.ty))
            }
            (
                TypeDef::Image {
                    sampled: sa,
                    dim: da,
                    depth: pa,
                    arrayed: aa,
                    multisampled: msa,
                    sampled_kind: ka,
                    format: fa,
                },
                TypeDef::Image {
                    sampled: sb,
                    dim: db,
                    depth: pb,
                    arrayed: ab,
                    multisampled: msb,
                    sampled_kind: kb,
                    format: fb,
                },
            ) => {
                da == db
                    && pa == pb
                    && aa == ab
                    && msa == msb
                    && ka == kb
                    && fa == fb
                    && self.structurally_eq(*sa, other, *sb)
            }
            (TypeDef::SampledImage { image: ia }, TypeDef::SampledImage { image: ib }) => {
                self.structurally_eq(*ia, other, *ib)
            }
            _ => false,
        }
    }
}

impl Index<Type> for TypeContext {
    type Output = TypeDef;

    fn index(&self, ty: Type) -> &TypeDef {
        self.def(ty)
    }
}
