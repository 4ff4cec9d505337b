//! The SPIR-V shader-module variant: stage identity, extracted parameters,
//! and the public parse → link → rewrite operations.

use crate::passes;
use crate::reflect::{self, DefKind, Definitions};
use crate::spv::spec::{BuiltIn, ExecutionModel, StorageClass};
use crate::spv::stream::InstructionStream;
use crate::spv::{print, Id, Word};
use crate::ty::{Type, TypeContext};
use crate::ModuleError;
use log::debug;
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Pipeline stage a module was compiled for.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Stage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl Stage {
    pub(crate) fn execution_model(self) -> ExecutionModel {
        match self {
            Stage::Vertex => ExecutionModel::Vertex,
            Stage::TessControl => ExecutionModel::TessellationControl,
            Stage::TessEvaluation => ExecutionModel::TessellationEvaluation,
            Stage::Geometry => ExecutionModel::Geometry,
            Stage::Fragment => ExecutionModel::Fragment,
            Stage::Compute => ExecutionModel::GLCompute,
        }
    }
}

/// One interface parameter recovered from the bytecode, reported to the
/// host so it can build a stage-agnostic parameter table.
#[derive(Clone, Debug)]
pub struct Parameter {
    pub id: Id,
    pub name: Option<String>,
    pub ty: Option<Type>,
    pub storage_class: StorageClass,
    pub location: Option<u32>,
    pub builtin: Option<BuiltIn>,
    /// Whether the bytecode actually exercises the variable (load, store,
    /// access chain, copy or call), or a cross-stage link matched it.
    pub used: bool,
}

/// A shader module holding compiled SPIR-V bytecode.
///
/// Construction recovers the interface parameters, gives every input and
/// output a location, and flattens struct-typed interface variables; the
/// module can then be linked against the previous pipeline stage, have its
/// locations renumbered, or be stripped for distribution. The word buffer
/// stays a valid module throughout.
#[derive(Debug)]
pub struct SpirVModule {
    cx: Rc<TypeContext>,
    stage: Stage,
    instructions: InstructionStream,
    parameters: Vec<Parameter>,
}

impl SpirVModule {
    /// Wrap compiled bytecode.
    ///
    /// Runs the whole ingest pipeline: header validation, the definition
    /// pass, default location assignment, struct flattening (re-parsing
    /// between structural edits — the definition table never survives
    /// one), and parameter extraction.
    ///
    /// Modules meant to link against each other should share `cx`.
    pub fn new(cx: Rc<TypeContext>, stage: Stage, words: Vec<Word>) -> Result<Self, ModuleError> {
        let mut instructions = InstructionStream::new(words);
        if !instructions.validate_header() {
            return Err(ModuleError::malformed("bad or missing header"));
        }

        let mut defs = reflect::parse(&cx, stage, &instructions)?;
        passes::link::assign_locations(&mut instructions, &mut defs, &cx);
        while let Some(var_id) = flatten_candidate(&defs, &cx) {
            passes::flatten::flatten_struct(&mut instructions, &defs, &cx, var_id);
            // Members of nested structs surface as fresh candidates on the
            // next round.
            defs = reflect::parse(&cx, stage, &instructions)?;
        }

        let parameters = extract_parameters(&defs);
        debug!(
            "{stage:?} module: {} interface parameters, id bound {}",
            parameters.len(),
            instructions.id_bound()
        );
        Ok(Self { cx, stage, instructions, parameters })
    }

    /// Wrap a byte buffer (endianness is normalized first).
    pub fn from_bytes(
        cx: Rc<TypeContext>,
        stage: Stage,
        bytes: &[u8],
    ) -> Result<Self, ModuleError> {
        let stream = InstructionStream::from_bytes(bytes)?;
        Self::new(cx, stage, stream.into_words())
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn words(&self) -> &[Word] {
        self.instructions.words()
    }

    pub fn into_words(self) -> Vec<Word> {
        self.instructions.into_words()
    }

    pub fn instructions(&self) -> &InstructionStream {
        &self.instructions
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|param| param.name.as_deref() == Some(name))
    }

    pub fn cx(&self) -> &Rc<TypeContext> {
        &self.cx
    }

    /// Renumber this module's inputs to match `previous`'s outputs, paired
    /// by exact symbolic name.
    ///
    /// Matched pairs must agree on their type (structurally, so modules
    /// built against separate contexts still link); a disagreement fails
    /// without rolling back locations already remapped in this pass. Both
    /// sides of every matched pair are marked used. Unmatched inputs keep
    /// their default numbering.
    pub fn link_inputs(&mut self, previous: &mut SpirVModule) -> Result<(), ModuleError> {
        let plan = passes::link::match_stage_interfaces(
            &self.cx,
            &self.parameters,
            &previous.cx,
            &previous.parameters,
        )?;
        passes::link::remap_locations(
            &mut self.instructions,
            &mut self.parameters,
            StorageClass::Input,
            &plan.remap,
        );
        for index in plan.matched {
            self.parameters[index].used = true;
        }
        for index in plan.prev_matched {
            previous.parameters[index].used = true;
        }
        Ok(())
    }

    /// Rewrite location decorations for variables of `storage_class` per
    /// `remap` (old location → new location), in place. Locations absent
    /// from the table are untouched; an identity table leaves the word
    /// sequence byte-identical.
    pub fn remap_locations(
        &mut self,
        storage_class: StorageClass,
        remap: &FxHashMap<u32, u32>,
    ) {
        passes::link::remap_locations(
            &mut self.instructions,
            &mut self.parameters,
            storage_class,
            remap,
        );
    }

    /// Renumber input locations to an externally chosen convention (e.g. a
    /// fixed vertex-attribute numbering).
    pub fn remap_parameter_locations(&mut self, remap: &FxHashMap<u32, u32>) {
        self.remap_locations(StorageClass::Input, remap);
    }

    /// Remove debug instructions for distribution. The id bound is
    /// preserved, so nothing referencing this module's numbering breaks.
    pub fn strip(&mut self) {
        self.instructions = self.instructions.strip();
    }

    /// Best-effort human-readable listing of the instruction stream; for
    /// diagnostics only, not guaranteed parseable.
    pub fn ir(&self) -> String {
        print::disassemble(&self.instructions)
    }
}

/// First interface variable whose pointee is a plain struct (no built-in
/// members), in declaration-id order.
fn flatten_candidate(defs: &Definitions, cx: &TypeContext) -> Option<Id> {
    defs.iter().find_map(|(id, def)| {
        if def.kind != DefKind::Variable || def.builtin.is_some() {
            return None;
        }
        if !matches!(
            def.storage_class,
            Some(StorageClass::Input) | Some(StorageClass::Output)
        ) {
            return None;
        }
        let ty = def.ty?;
        if !matches!(cx[ty], crate::ty::TypeDef::Struct { .. }) {
            return None;
        }
        let struct_id = defs.pointee_struct_id(def)?;
        if defs.get(struct_id)?.has_builtin_members {
            return None;
        }
        Some(id)
    })
}

/// Everything the host cares about: variables in any interface storage
/// class (module-private and function-local ones are not parameters).
fn extract_parameters(defs: &Definitions) -> Vec<Parameter> {
    let mut parameters = Vec::new();
    for (id, def) in defs.iter() {
        if def.kind != DefKind::Variable {
            continue;
        }
        let Some(storage_class) = def.storage_class else { continue };
        if storage_class == StorageClass::Function || storage_class == StorageClass::Private {
            continue;
        }
        parameters.push(Parameter {
            id,
            name: def.name.clone(),
            ty: def.ty,
            storage_class,
            location: def.location,
            builtin: def.builtin,
            used: def.used,
        });
    }
    parameters
}
