//! Word-level SPIR-V module builder shared by the scenario tests.

use spv_weld::spv::encode_literal_string;
use spv_weld::spv::spec::{Decoration, Opcode, StorageClass, MAGIC};

pub struct ModuleBuilder {
    words: Vec<u32>,
    next_id: u32,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self { words: vec![MAGIC, 0x0001_0300, 0, 0, 0], next_id: 1 }
    }

    /// Reserve the next id; the bound is patched in by `finish`.
    pub fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn op(&mut self, opcode: Opcode, args: &[u32]) -> &mut Self {
        self.words.push(((1 + args.len() as u32) << 16) | u32::from(opcode.as_u16()));
        self.words.extend_from_slice(args);
        self
    }

    /// Emit an instruction whose operands are `pre`, then the literal
    /// string `s`, then `post`.
    pub fn op_str(&mut self, opcode: Opcode, pre: &[u32], s: &str, post: &[u32]) -> &mut Self {
        let mut args = pre.to_vec();
        args.extend(encode_literal_string(s));
        args.extend_from_slice(post);
        self.op(opcode, &args)
    }

    pub fn finish(mut self) -> Vec<u32> {
        self.words[3] = self.next_id;
        self.words
    }
}

pub const VERTEX: u32 = 0;
pub const FRAGMENT: u32 = 4;

/// Build a minimal stage module whose interface is the given variables:
/// `(name, storage class, component count, explicit location)`, where a
/// component count of 1 is a `float` and `n` is an n-component float
/// vector.
pub fn stage_module(model: u32, vars: &[(&str, StorageClass, u32, Option<u32>)]) -> Vec<u32> {
    let mut b = ModuleBuilder::new();
    let main_id = b.id();
    let void = b.id();
    let fn_ty = b.id();
    let float = b.id();
    let label = b.id();

    let mut vec_types: Vec<(u32, u32)> = Vec::new();
    let mut pointers: Vec<(u32, u32, u32)> = Vec::new();
    let mut var_ids: Vec<(u32, u32, u32)> = Vec::new();
    for &(_, class, count, _) in vars {
        let ty = if count == 1 {
            float
        } else {
            match vec_types.iter().find(|&&(c, _)| c == count) {
                Some(&(_, id)) => id,
                None => {
                    let id = b.id();
                    vec_types.push((count, id));
                    id
                }
            }
        };
        let class = class.as_u32();
        let pointer = match pointers.iter().find(|&&(c, t, _)| c == class && t == ty) {
            Some(&(_, _, id)) => id,
            None => {
                let id = b.id();
                pointers.push((class, ty, id));
                id
            }
        };
        let id = b.id();
        var_ids.push((id, pointer, class));
    }

    b.op(Opcode::OpCapability, &[1]);
    b.op(Opcode::OpMemoryModel, &[0, 1]);
    let interface: Vec<u32> = var_ids.iter().map(|&(id, _, _)| id).collect();
    b.op_str(Opcode::OpEntryPoint, &[model, main_id], "main", &interface);
    if model == FRAGMENT {
        b.op(Opcode::OpExecutionMode, &[main_id, 7]);
    }
    for (&(name, ..), &(id, ..)) in vars.iter().zip(&var_ids) {
        b.op_str(Opcode::OpName, &[id], name, &[]);
    }
    for (&(_, _, _, location), &(id, ..)) in vars.iter().zip(&var_ids) {
        if let Some(location) = location {
            b.op(Opcode::OpDecorate, &[id, Decoration::Location.as_u32(), location]);
        }
    }
    b.op(Opcode::OpTypeVoid, &[void]);
    b.op(Opcode::OpTypeFunction, &[fn_ty, void]);
    b.op(Opcode::OpTypeFloat, &[float, 32]);
    for &(count, id) in &vec_types {
        b.op(Opcode::OpTypeVector, &[id, float, count]);
    }
    for &(class, ty, id) in &pointers {
        b.op(Opcode::OpTypePointer, &[id, class, ty]);
    }
    for &(id, pointer, class) in &var_ids {
        b.op(Opcode::OpVariable, &[pointer, id, class]);
    }
    b.op(Opcode::OpFunction, &[void, main_id, 0, fn_ty]);
    b.op(Opcode::OpLabel, &[label]);
    b.op(Opcode::OpReturn, &[]);
    b.op(Opcode::OpFunctionEnd, &[]);
    b.finish()
}
