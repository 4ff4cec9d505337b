//! Curated SPIR-V specification tables.
//!
//! Interface reflection only needs a small slice of the full Khronos
//! grammar: the opcodes that declare types, constants and variables, the
//! debug/annotation instructions, and a handful of enumerants. Everything
//! here is a newtype over the raw encoding so values outside the curated set
//! flow through rewriting passes undisturbed.

use lazy_static::lazy_static;
use rustc_hash::FxHashMap;
use std::fmt;

/// First word of every valid module.
pub const MAGIC: u32 = 0x0723_0203;

/// Words before the first instruction: magic, version, generator, id bound,
/// reserved schema.
pub const HEADER_LEN: usize = 5;

/// Operation code of one instruction (low 16 bits of its first word).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Opcode(u16);

/// Result-id layout of an instruction: whether its first argument words are
/// a result-type id and/or a result id.
#[derive(Copy, Clone, Debug)]
pub struct InstructionDef {
    pub has_result_type_id: bool,
    pub has_result_id: bool,
}

impl InstructionDef {
    const NONE: Self = Self { has_result_type_id: false, has_result_id: false };
    const RESULT: Self = Self { has_result_type_id: false, has_result_id: true };
    const TYPE_RESULT: Self = Self { has_result_type_id: true, has_result_id: true };
}

macro_rules! def_opcodes {
    ($($name:ident = $num:literal / $layout:ident),+ $(,)?) => {
        #[allow(non_upper_case_globals)]
        impl Opcode {
            $(pub const $name: Opcode = Opcode($num);)+
        }

        fn instruction_index() -> FxHashMap<u16, (&'static str, InstructionDef)> {
            let mut index = FxHashMap::default();
            $(index.insert($num, (stringify!($name), InstructionDef::$layout));)+
            index
        }
    };
}

def_opcodes! {
    OpNop = 0 / NONE,
    OpUndef = 1 / TYPE_RESULT,
    OpSourceContinued = 2 / NONE,
    OpSource = 3 / NONE,
    OpSourceExtension = 4 / NONE,
    OpName = 5 / NONE,
    OpMemberName = 6 / NONE,
    OpString = 7 / RESULT,
    OpLine = 8 / NONE,
    OpExtension = 10 / NONE,
    OpExtInstImport = 11 / RESULT,
    OpExtInst = 12 / TYPE_RESULT,
    OpMemoryModel = 14 / NONE,
    OpEntryPoint = 15 / NONE,
    OpExecutionMode = 16 / NONE,
    OpCapability = 17 / NONE,

    OpTypeVoid = 19 / RESULT,
    OpTypeBool = 20 / RESULT,
    OpTypeInt = 21 / RESULT,
    OpTypeFloat = 22 / RESULT,
    OpTypeVector = 23 / RESULT,
    OpTypeMatrix = 24 / RESULT,
    OpTypeImage = 25 / RESULT,
    OpTypeSampler = 26 / RESULT,
    OpTypeSampledImage = 27 / RESULT,
    OpTypeArray = 28 / RESULT,
    OpTypeRuntimeArray = 29 / RESULT,
    OpTypeStruct = 30 / RESULT,
    OpTypeOpaque = 31 / RESULT,
    OpTypePointer = 32 / RESULT,
    OpTypeFunction = 33 / RESULT,

    OpConstantTrue = 41 / TYPE_RESULT,
    OpConstantFalse = 42 / TYPE_RESULT,
    OpConstant = 43 / TYPE_RESULT,
    OpConstantComposite = 44 / TYPE_RESULT,
    OpConstantSampler = 45 / TYPE_RESULT,
    OpConstantNull = 46 / TYPE_RESULT,
    OpSpecConstantTrue = 48 / TYPE_RESULT,
    OpSpecConstantFalse = 49 / TYPE_RESULT,
    OpSpecConstant = 50 / TYPE_RESULT,
    OpSpecConstantComposite = 51 / TYPE_RESULT,
    OpSpecConstantOp = 52 / TYPE_RESULT,

    OpFunction = 54 / TYPE_RESULT,
    OpFunctionParameter = 55 / TYPE_RESULT,
    OpFunctionEnd = 56 / NONE,
    OpFunctionCall = 57 / TYPE_RESULT,

    OpVariable = 59 / TYPE_RESULT,
    OpImageTexelPointer = 60 / TYPE_RESULT,
    OpLoad = 61 / TYPE_RESULT,
    OpStore = 62 / NONE,
    OpCopyMemory = 63 / NONE,
    OpAccessChain = 65 / TYPE_RESULT,
    OpInBoundsAccessChain = 66 / TYPE_RESULT,
    OpPtrAccessChain = 67 / TYPE_RESULT,
    OpArrayLength = 68 / TYPE_RESULT,

    OpDecorate = 71 / NONE,
    OpMemberDecorate = 72 / NONE,
    OpDecorationGroup = 73 / RESULT,
    OpGroupDecorate = 74 / NONE,
    OpGroupMemberDecorate = 75 / NONE,

    OpCopyObject = 83 / TYPE_RESULT,

    OpPhi = 245 / TYPE_RESULT,
    OpLoopMerge = 246 / NONE,
    OpSelectionMerge = 247 / NONE,
    OpLabel = 248 / RESULT,
    OpBranch = 249 / NONE,
    OpBranchConditional = 250 / NONE,
    OpSwitch = 251 / NONE,
    OpKill = 252 / NONE,
    OpReturn = 253 / NONE,
    OpReturnValue = 254 / NONE,
    OpUnreachable = 255 / NONE,

    OpNoLine = 317 / NONE,
    OpModuleProcessed = 330 / NONE,
    OpExecutionModeId = 331 / NONE,
    OpDecorateId = 332 / NONE,
    OpDecorateString = 5632 / NONE,
    OpMemberDecorateString = 5633 / NONE,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Opcode {
        Opcode(value)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// Name for diagnostics; `None` outside the curated set.
    #[inline]
    pub fn name(self) -> Option<&'static str> {
        Spec::get().instructions.get(&self.0).map(|&(name, _)| name)
    }

    /// Result-id layout; `None` outside the curated set.
    #[inline]
    pub fn def(self) -> Option<&'static InstructionDef> {
        Spec::get().instructions.get(&self.0).map(|(_, def)| def)
    }

    /// Instructions stripped as debug information: source text, names,
    /// strings, line markers and processing notes.
    pub fn is_debug(self) -> bool {
        matches!(
            self,
            Opcode::OpSourceContinued
                | Opcode::OpSource
                | Opcode::OpSourceExtension
                | Opcode::OpName
                | Opcode::OpMemberName
                | Opcode::OpString
                | Opcode::OpLine
                | Opcode::OpNoLine
                | Opcode::OpModuleProcessed
        )
    }

    /// Decoration-class instructions (the module's annotation section).
    pub fn is_annotation(self) -> bool {
        matches!(
            self,
            Opcode::OpDecorate
                | Opcode::OpMemberDecorate
                | Opcode::OpDecorationGroup
                | Opcode::OpGroupDecorate
                | Opcode::OpGroupMemberDecorate
                | Opcode::OpDecorateId
                | Opcode::OpDecorateString
                | Opcode::OpMemberDecorateString
        )
    }

    /// Instructions that precede the debug/annotation sections in the
    /// module's fixed layout.
    pub fn is_preamble(self) -> bool {
        matches!(
            self,
            Opcode::OpCapability
                | Opcode::OpExtension
                | Opcode::OpExtInstImport
                | Opcode::OpMemoryModel
                | Opcode::OpEntryPoint
                | Opcode::OpExecutionMode
                | Opcode::OpExecutionModeId
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Op#{}", self.0),
        }
    }
}

macro_rules! def_enumerants {
    ($(#[$attr:meta])* $ty:ident { $($name:ident = $num:literal),+ $(,)? }) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
        pub struct $ty(u32);

        #[allow(non_upper_case_globals)]
        impl $ty {
            $(pub const $name: $ty = $ty($num);)+

            pub fn from_u32(value: u32) -> $ty {
                $ty(value)
            }

            pub fn as_u32(self) -> u32 {
                self.0
            }

            /// Name for diagnostics; `None` outside the curated set.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($num => Some(stringify!($name)),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, "{}", self.0),
                }
            }
        }
    };
}

def_enumerants! {
    /// The interface category of a variable.
    StorageClass {
        UniformConstant = 0,
        Input = 1,
        Uniform = 2,
        Output = 3,
        Workgroup = 4,
        CrossWorkgroup = 5,
        Private = 6,
        Function = 7,
        PushConstant = 9,
        AtomicCounter = 10,
        Image = 11,
        StorageBuffer = 12,
    }
}

def_enumerants! {
    /// Metadata attached to an id by `OpDecorate`/`OpMemberDecorate`.
    Decoration {
        RelaxedPrecision = 0,
        SpecId = 1,
        Block = 2,
        BufferBlock = 3,
        RowMajor = 4,
        ColMajor = 5,
        ArrayStride = 6,
        MatrixStride = 7,
        BuiltIn = 11,
        NoPerspective = 13,
        Flat = 14,
        Patch = 15,
        Centroid = 16,
        Sample = 17,
        NonWritable = 24,
        NonReadable = 25,
        Location = 30,
        Component = 31,
        Index = 32,
        Binding = 33,
        DescriptorSet = 34,
        Offset = 35,
    }
}

def_enumerants! {
    /// Pipeline-provided special variables.
    BuiltIn {
        Position = 0,
        PointSize = 1,
        ClipDistance = 3,
        CullDistance = 4,
        VertexId = 5,
        InstanceId = 6,
        PrimitiveId = 7,
        InvocationId = 8,
        Layer = 9,
        ViewportIndex = 10,
        TessLevelOuter = 11,
        TessLevelInner = 12,
        TessCoord = 13,
        PatchVertices = 14,
        FragCoord = 15,
        PointCoord = 16,
        FrontFacing = 17,
        SampleId = 18,
        SamplePosition = 19,
        SampleMask = 20,
        FragDepth = 22,
        HelperInvocation = 23,
        NumWorkgroups = 24,
        WorkgroupSize = 25,
        WorkgroupId = 26,
        LocalInvocationId = 27,
        GlobalInvocationId = 28,
        LocalInvocationIndex = 29,
        VertexIndex = 42,
        InstanceIndex = 43,
    }
}

def_enumerants! {
    /// The pipeline stage an entry point executes in.
    ExecutionModel {
        Vertex = 0,
        TessellationControl = 1,
        TessellationEvaluation = 2,
        Geometry = 3,
        Fragment = 4,
        GLCompute = 5,
    }
}

/// Extended instruction sets whose instructions carry no semantics and are
/// removed by stripping.
pub fn is_debug_ext_inst_set(name: &str) -> bool {
    name.starts_with("NonSemantic.") || name == "DebugInfo" || name.starts_with("OpenCL.DebugInfo")
}

/// Lazily built indexes over the curated tables.
pub struct Spec {
    pub magic: u32,
    instructions: FxHashMap<u16, (&'static str, InstructionDef)>,
}

impl Spec {
    #[inline]
    #[must_use]
    pub fn get() -> &'static Spec {
        lazy_static! {
            static ref SPEC: Spec = Spec { magic: MAGIC, instructions: instruction_index() };
        }
        &SPEC
    }
}
