//! Reflection: a single forward pass over the instruction stream that
//! recovers the per-id metadata the binary format only encodes implicitly.
//!
//! The definition table is transient. It is rebuilt by every parse and must
//! be discarded after any structural edit to the stream; nothing in it
//! survives id renumbering.

use crate::module::Stage;
use crate::spv::spec::{BuiltIn, Decoration, ExecutionModel, Opcode, StorageClass};
use crate::spv::stream::{Inst, InstructionStream};
use crate::spv::{decode_literal_string, Id};
use crate::ty::{StructMember, Type, TypeContext, TypeDef};
use crate::ModuleError;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::ops::{Index, IndexMut};

/// What an id denotes. Set at most once: an id belongs to exactly one
/// category.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum DefKind {
    #[default]
    None,
    Type,
    TypePointer,
    Variable,
    Constant,
    ExtInst,
}

/// Recovered metadata for one id. Names and decorations may arrive before
/// the declaring instruction; the table tolerates either order.
#[derive(Clone, Default)]
pub struct Definition {
    pub kind: DefKind,
    pub name: Option<String>,
    /// Per-member names for struct types, sparse by member index.
    pub member_names: Vec<Option<String>>,
    /// Resolved semantic type; `None` for opaque declarations
    /// (`OpTypeFunction`, `OpTypeOpaque`, composite constants).
    pub ty: Option<Type>,
    /// Assigned interface location; `None` until decorated or assigned.
    pub location: Option<u32>,
    pub builtin: Option<BuiltIn>,
    /// Defined for `Variable` (the variable's class) and `TypePointer`
    /// (the pointee's class).
    pub storage_class: Option<StorageClass>,
    /// First literal word of a scalar constant.
    pub constant: Option<u32>,
    /// Set when the id is exercised by a load, store, access chain, copy or
    /// call; interface variables that are merely declared stay unused.
    pub used: bool,
    /// For `Variable`: the id of its pointer type. For `TypePointer`: the
    /// pointee type id.
    pub type_id: Option<Id>,
    /// For struct types: member type ids in member order.
    pub member_type_ids: SmallVec<[Id; 4]>,
    /// Set on a struct type id when any member carries a `BuiltIn`
    /// decoration; such blocks are exempt from assignment and flattening.
    pub has_builtin_members: bool,
}

impl Definition {
    fn set_kind(&mut self, kind: DefKind) {
        debug_assert_eq!(self.kind, DefKind::None, "id declared twice");
        self.kind = kind;
    }

    fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    fn set_member_name(&mut self, index: u32, name: String) {
        let index = index as usize;
        if self.member_names.len() <= index {
            self.member_names.resize(index + 1, None);
        }
        self.member_names[index] = Some(name);
    }

    fn set_type(&mut self, ty: Option<Type>) {
        self.set_kind(DefKind::Type);
        self.ty = ty;
    }

    fn set_type_pointer(&mut self, storage_class: StorageClass, ty: Option<Type>, pointee: Id) {
        self.set_kind(DefKind::TypePointer);
        self.storage_class = Some(storage_class);
        self.ty = ty;
        self.type_id = Some(pointee);
    }

    fn set_variable(&mut self, ty: Option<Type>, storage_class: StorageClass, pointer: Id) {
        self.set_kind(DefKind::Variable);
        self.ty = ty;
        self.storage_class = Some(storage_class);
        self.type_id = Some(pointer);
    }

    fn set_constant(&mut self, ty: Option<Type>, value: Option<u32>) {
        self.set_kind(DefKind::Constant);
        self.ty = ty;
        self.constant = value;
    }

    fn set_ext_inst(&mut self, name: String) {
        self.set_kind(DefKind::ExtInst);
        self.name = Some(name);
    }

    fn mark_used(&mut self) {
        self.used = true;
    }
}

/// Dense per-id definition table, indexed by id and sized by the module's
/// id bound.
pub struct Definitions {
    defs: Vec<Definition>,
}

impl Definitions {
    fn with_bound(bound: Id) -> Self {
        Self { defs: vec![Definition::default(); bound as usize] }
    }

    pub fn id_bound(&self) -> Id {
        self.defs.len() as Id
    }

    pub fn get(&self, id: Id) -> Option<&Definition> {
        self.defs.get(id as usize)
    }

    pub(crate) fn get_mut(&mut self, id: Id) -> Option<&mut Definition> {
        self.defs.get_mut(id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id, &Definition)> {
        self.defs.iter().enumerate().map(|(id, def)| (id as Id, def))
    }

    /// For a variable definition: the id of the struct type it points to,
    /// resolved through its pointer type.
    pub(crate) fn pointee_struct_id(&self, def: &Definition) -> Option<Id> {
        self.get(def.type_id?)?.type_id
    }
}

impl Index<Id> for Definitions {
    type Output = Definition;

    fn index(&self, id: Id) -> &Definition {
        &self.defs[id as usize]
    }
}

impl IndexMut<Id> for Definitions {
    fn index_mut(&mut self, id: Id) -> &mut Definition {
        &mut self.defs[id as usize]
    }
}

/// Build the definition table for `stream`.
///
/// Fails on a structurally invalid stream, an entry point for a different
/// stage, a type opcode referencing an undeclared component type, or a
/// name/location/built-in annotation whose target no instruction declares.
pub(crate) fn parse(
    cx: &TypeContext,
    stage: Stage,
    stream: &InstructionStream,
) -> Result<Definitions, ModuleError> {
    stream.validate()?;
    let mut parser = Parser {
        cx,
        stage,
        defs: Definitions::with_bound(stream.id_bound()),
        declared: FxHashSet::default(),
        annotated: Vec::new(),
    };
    for inst in stream.iter() {
        parser.instruction(&inst)?;
    }
    parser.finish()
}

struct Parser<'a> {
    cx: &'a TypeContext,
    stage: Stage,
    defs: Definitions,
    /// Every id declared as a result by a recognized instruction.
    declared: FxHashSet<Id>,
    /// Annotation targets to re-check once all declarations are known;
    /// names and decorations may legally precede the declaring instruction.
    annotated: Vec<(Opcode, Id)>,
}

impl Parser<'_> {
    fn instruction(&mut self, inst: &Inst<'_>) -> Result<(), ModuleError> {
        if let Some(layout) = inst.opcode.def() {
            if layout.has_result_id {
                let id = arg(inst, layout.has_result_type_id as usize)?;
                self.declare(inst, id)?;
            }
        }

        let opcode = inst.opcode;
        match opcode {
            Opcode::OpExtInstImport => {
                let id = arg(inst, 0)?;
                let (name, _) = decode_literal_string(&inst.args[1..])?;
                self.def_mut(inst, id)?.set_ext_inst(name);
            }

            Opcode::OpName => {
                let target = arg(inst, 0)?;
                let (name, _) = decode_literal_string(&inst.args[1..])?;
                self.annotated.push((opcode, target));
                self.def_mut(inst, target)?.set_name(name);
            }
            Opcode::OpMemberName => {
                let target = arg(inst, 0)?;
                let member = arg(inst, 1)?;
                let (name, _) = decode_literal_string(&inst.args[2..])?;
                self.annotated.push((opcode, target));
                self.def_mut(inst, target)?.set_member_name(member, name);
            }

            Opcode::OpDecorate => {
                let target = arg(inst, 0)?;
                match Decoration::from_u32(arg(inst, 1)?) {
                    Decoration::Location => {
                        self.annotated.push((opcode, target));
                        self.def_mut(inst, target)?.location = Some(arg(inst, 2)?);
                    }
                    Decoration::BuiltIn => {
                        self.annotated.push((opcode, target));
                        self.def_mut(inst, target)?.builtin =
                            Some(BuiltIn::from_u32(arg(inst, 2)?));
                    }
                    // Other decorations stay in the stream untouched; they
                    // carry no interface-linking information.
                    _ => {}
                }
            }
            Opcode::OpMemberDecorate => {
                let target = arg(inst, 0)?;
                if Decoration::from_u32(arg(inst, 2)?) == Decoration::BuiltIn {
                    self.annotated.push((opcode, target));
                    self.def_mut(inst, target)?.has_builtin_members = true;
                }
            }

            Opcode::OpTypeVoid => self.type_decl(inst, TypeDef::Void)?,
            Opcode::OpTypeBool => self.type_decl(inst, TypeDef::Bool)?,
            Opcode::OpTypeInt => {
                let def = TypeDef::Int { width: arg(inst, 1)?, signed: arg(inst, 2)? != 0 };
                self.type_decl(inst, def)?;
            }
            Opcode::OpTypeFloat => {
                let def = TypeDef::Float { width: arg(inst, 1)? };
                self.type_decl(inst, def)?;
            }
            Opcode::OpTypeVector => {
                let element = self.type_of(inst, arg(inst, 1)?)?;
                let def = TypeDef::Vector { element, count: arg(inst, 2)? };
                self.type_decl(inst, def)?;
            }
            Opcode::OpTypeMatrix => {
                let column = self.type_of(inst, arg(inst, 1)?)?;
                let def = TypeDef::Matrix { column, columns: arg(inst, 2)? };
                self.type_decl(inst, def)?;
            }
            Opcode::OpTypeArray => {
                let element = self.type_of(inst, arg(inst, 1)?)?;
                let length_id = arg(inst, 2)?;
                let count = self
                    .defs
                    .get(length_id)
                    .and_then(|def| def.constant)
                    .ok_or_else(|| {
                        ModuleError::malformed(format!(
                            "in {}: array length %{length_id} is not a scalar constant",
                            inst.opcode
                        ))
                    })?;
                self.type_decl(inst, TypeDef::Array { element, count })?;
            }
            Opcode::OpTypeRuntimeArray => {
                let element = self.type_of(inst, arg(inst, 1)?)?;
                self.type_decl(inst, TypeDef::RuntimeArray { element })?;
            }
            Opcode::OpTypeStruct => {
                let result = arg(inst, 0)?;
                let member_ids: SmallVec<[Id; 4]> = inst.args[1..].iter().copied().collect();
                let mut members = Vec::with_capacity(member_ids.len());
                for (index, &member_id) in member_ids.iter().enumerate() {
                    let ty = self.type_of(inst, member_id)?;
                    let name = self
                        .defs
                        .get(result)
                        .and_then(|def| def.member_names.get(index).cloned().flatten());
                    members.push(StructMember { name, ty });
                }
                let ty = self.cx.intern(TypeDef::Struct { members });
                let def = self.def_mut(inst, result)?;
                def.set_type(Some(ty));
                def.member_type_ids = member_ids;
            }
            Opcode::OpTypeImage => {
                let def = TypeDef::Image {
                    sampled: self.type_of(inst, arg(inst, 1)?)?,
                    dim: arg(inst, 2)?,
                    depth: arg(inst, 3)?,
                    arrayed: arg(inst, 4)? != 0,
                    multisampled: arg(inst, 5)? != 0,
                    sampled_kind: arg(inst, 6)?,
                    format: arg(inst, 7)?,
                };
                self.type_decl(inst, def)?;
            }
            Opcode::OpTypeSampler => self.type_decl(inst, TypeDef::Sampler)?,
            Opcode::OpTypeSampledImage => {
                let image = self.type_of(inst, arg(inst, 1)?)?;
                self.type_decl(inst, TypeDef::SampledImage { image })?;
            }
            Opcode::OpTypeOpaque | Opcode::OpTypeFunction => {
                let id = arg(inst, 0)?;
                self.def_mut(inst, id)?.set_type(None);
            }
            Opcode::OpTypePointer => {
                let id = arg(inst, 0)?;
                let storage_class = StorageClass::from_u32(arg(inst, 1)?);
                let pointee = arg(inst, 2)?;
                let ty = self
                    .defs
                    .get(pointee)
                    .filter(|def| matches!(def.kind, DefKind::Type | DefKind::TypePointer))
                    .ok_or_else(|| {
                        ModuleError::malformed(format!(
                            "in {}: undeclared pointee type %{pointee}",
                            inst.opcode
                        ))
                    })?
                    .ty;
                self.def_mut(inst, id)?.set_type_pointer(storage_class, ty, pointee);
            }

            Opcode::OpConstantTrue | Opcode::OpSpecConstantTrue => {
                self.constant_decl(inst, Some(1))?;
            }
            Opcode::OpConstantFalse | Opcode::OpSpecConstantFalse => {
                self.constant_decl(inst, Some(0))?;
            }
            Opcode::OpConstant | Opcode::OpSpecConstant => {
                // Only the first literal word is interpreted; that covers
                // the 32-bit scalars array sizes are made of. Wider
                // constants are recorded opaquely.
                let value = arg(inst, 2)?;
                self.constant_decl(inst, Some(value))?;
            }
            Opcode::OpConstantComposite
            | Opcode::OpConstantSampler
            | Opcode::OpConstantNull
            | Opcode::OpSpecConstantComposite
            | Opcode::OpSpecConstantOp => {
                self.constant_decl(inst, None)?;
            }

            Opcode::OpVariable => {
                let pointer = arg(inst, 0)?;
                let id = arg(inst, 1)?;
                let storage_class = StorageClass::from_u32(arg(inst, 2)?);
                let ty = self
                    .defs
                    .get(pointer)
                    .filter(|def| def.kind == DefKind::TypePointer)
                    .ok_or_else(|| {
                        ModuleError::malformed(format!(
                            "in {}: %{id} has undeclared pointer type %{pointer}",
                            inst.opcode
                        ))
                    })?
                    .ty;
                self.def_mut(inst, id)?.set_variable(ty, storage_class, pointer);
            }

            Opcode::OpEntryPoint => {
                let model = ExecutionModel::from_u32(arg(inst, 0)?);
                if model != self.stage.execution_model() {
                    return Err(ModuleError::StageMismatch {
                        expected: self.stage,
                        found: model.as_u32(),
                    });
                }
            }

            Opcode::OpLoad
            | Opcode::OpAccessChain
            | Opcode::OpInBoundsAccessChain
            | Opcode::OpPtrAccessChain
            | Opcode::OpImageTexelPointer
            | Opcode::OpArrayLength
            | Opcode::OpCopyObject => self.mark_used(arg(inst, 2)?),
            Opcode::OpStore => {
                self.mark_used(arg(inst, 0)?);
            }
            Opcode::OpCopyMemory => {
                self.mark_used(arg(inst, 0)?);
                self.mark_used(arg(inst, 1)?);
            }
            Opcode::OpFunctionCall => {
                for &id in inst.args.get(3..).unwrap_or(&[]) {
                    self.mark_used(id);
                }
            }

            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<Definitions, ModuleError> {
        for &(opcode, id) in &self.annotated {
            if !self.declared.contains(&id) {
                return Err(ModuleError::malformed(format!(
                    "{opcode} targets id %{id}, which no instruction declares"
                )));
            }
        }
        Ok(self.defs)
    }

    fn declare(&mut self, inst: &Inst<'_>, id: Id) -> Result<(), ModuleError> {
        if id == 0 || id >= self.defs.id_bound() {
            return Err(ModuleError::malformed(format!(
                "in {}: result id %{id} outside the id bound",
                inst.opcode
            )));
        }
        if !self.declared.insert(id) {
            return Err(ModuleError::malformed(format!(
                "id %{id} is a result of multiple instructions"
            )));
        }
        Ok(())
    }

    fn def_mut(&mut self, inst: &Inst<'_>, id: Id) -> Result<&mut Definition, ModuleError> {
        let opcode = inst.opcode;
        self.defs.get_mut(id).ok_or_else(|| {
            ModuleError::malformed(format!("in {opcode}: id %{id} outside the id bound"))
        })
    }

    fn type_decl(&mut self, inst: &Inst<'_>, def: TypeDef) -> Result<(), ModuleError> {
        let id = arg(inst, 0)?;
        let ty = self.cx.intern(def);
        self.def_mut(inst, id)?.set_type(Some(ty));
        Ok(())
    }

    fn constant_decl(&mut self, inst: &Inst<'_>, value: Option<u32>) -> Result<(), ModuleError> {
        let ty = self.defs.get(arg(inst, 0)?).and_then(|def| def.ty);
        let id = arg(inst, 1)?;
        self.def_mut(inst, id)?.set_constant(ty, value);
        Ok(())
    }

    /// Resolved type of a previously declared id; type opcodes referencing
    /// an unknown component are a parse failure.
    fn type_of(&self, inst: &Inst<'_>, id: Id) -> Result<Type, ModuleError> {
        self.defs.get(id).and_then(|def| def.ty).ok_or_else(|| {
            ModuleError::malformed(format!(
                "in {}: undeclared component type %{id}",
                inst.opcode
            ))
        })
    }

    fn mark_used(&mut self, id: Id) {
        if let Some(def) = self.defs.get_mut(id) {
            def.mark_used();
        }
    }
}

fn arg(inst: &Inst<'_>, index: usize) -> Result<u32, ModuleError> {
    inst.args.get(index).copied().ok_or_else(|| {
        ModuleError::malformed(format!("in {}: too few operands", inst.opcode))
    })
}
