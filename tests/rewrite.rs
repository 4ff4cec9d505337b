//! Struct flattening and debug stripping scenarios.

mod common;

use common::{stage_module, ModuleBuilder, FRAGMENT, VERTEX};
use spv_weld::spv::spec::{Decoration, Opcode, StorageClass};
use spv_weld::{SpirVModule, Stage, TypeContext};
use std::rc::Rc;

enum Member {
    Float,
    Mat4,
}

/// Vertex module with a single output variable of struct type, one access
/// chain (plus a store for scalar members) per member.
fn struct_output_module(members: &[(&str, Member)], base: Option<u32>) -> (Vec<u32>, u32) {
    let output = StorageClass::Output.as_u32();
    let mut b = ModuleBuilder::new();
    let main_id = b.id();
    let void = b.id();
    let fn_ty = b.id();
    let float = b.id();
    let int = b.id();
    let needs_mat = members.iter().any(|(_, m)| matches!(m, Member::Mat4));
    let (vec4, mat4) = if needs_mat { (b.id(), b.id()) } else { (0, 0) };
    let struct_ty = b.id();
    let ptr_struct = b.id();
    let var = b.id();
    let ptr_float = b.id();
    let ptr_mat = if needs_mat { b.id() } else { 0 };
    let float_const = b.id();
    let consts: Vec<u32> = members.iter().map(|_| b.id()).collect();
    let chains: Vec<u32> = members.iter().map(|_| b.id()).collect();
    let label = b.id();

    b.op(Opcode::OpCapability, &[1]);
    b.op(Opcode::OpMemoryModel, &[0, 1]);
    b.op_str(Opcode::OpEntryPoint, &[VERTEX, main_id], "main", &[var]);
    b.op_str(Opcode::OpName, &[var], "v_data", &[]);
    for (index, &(name, _)) in members.iter().enumerate() {
        b.op_str(Opcode::OpMemberName, &[struct_ty, index as u32], name, &[]);
    }
    if let Some(base) = base {
        b.op(Opcode::OpDecorate, &[var, Decoration::Location.as_u32(), base]);
    }
    b.op(Opcode::OpTypeVoid, &[void]);
    b.op(Opcode::OpTypeFunction, &[fn_ty, void]);
    b.op(Opcode::OpTypeFloat, &[float, 32]);
    b.op(Opcode::OpTypeInt, &[int, 32, 1]);
    if needs_mat {
        b.op(Opcode::OpTypeVector, &[vec4, float, 4]);
        b.op(Opcode::OpTypeMatrix, &[mat4, vec4, 4]);
    }
    let member_tys: Vec<u32> = members
        .iter()
        .map(|(_, member)| match member {
            Member::Float => float,
            Member::Mat4 => mat4,
        })
        .collect();
    let mut struct_args = vec![struct_ty];
    struct_args.extend(&member_tys);
    b.op(Opcode::OpTypeStruct, &struct_args);
    b.op(Opcode::OpTypePointer, &[ptr_struct, output, struct_ty]);
    b.op(Opcode::OpTypePointer, &[ptr_float, output, float]);
    if needs_mat {
        b.op(Opcode::OpTypePointer, &[ptr_mat, output, mat4]);
    }
    b.op(Opcode::OpConstant, &[float, float_const, 0x3f80_0000]);
    for (index, &cid) in consts.iter().enumerate() {
        b.op(Opcode::OpConstant, &[int, cid, index as u32]);
    }
    b.op(Opcode::OpVariable, &[ptr_struct, var, output]);
    b.op(Opcode::OpFunction, &[void, main_id, 0, fn_ty]);
    b.op(Opcode::OpLabel, &[label]);
    for (index, (&cid, &chain)) in consts.iter().zip(&chains).enumerate() {
        let pointer = match members[index].1 {
            Member::Float => ptr_float,
            Member::Mat4 => ptr_mat,
        };
        b.op(Opcode::OpAccessChain, &[pointer, chain, var, cid]);
        if matches!(members[index].1, Member::Float) {
            b.op(Opcode::OpStore, &[chain, float_const]);
        }
    }
    b.op(Opcode::OpReturn, &[]);
    b.op(Opcode::OpFunctionEnd, &[]);
    (b.finish(), var)
}

#[test]
fn flatten_three_floats_at_base_4() {
    let (words, var) = struct_output_module(
        &[("m0", Member::Float), ("m1", Member::Float), ("m2", Member::Float)],
        Some(4),
    );
    let module = SpirVModule::new(Rc::new(TypeContext::new()), Stage::Vertex, words).unwrap();

    let locations: Vec<_> = ["m0", "m1", "m2"]
        .iter()
        .map(|name| module.parameter(name).unwrap().location)
        .collect();
    assert_eq!(locations, vec![Some(4), Some(5), Some(6)]);
    assert!(module.parameter("m0").unwrap().used);
    assert!(module.parameter("v_data").is_none());

    let member_ids: Vec<u32> =
        ["m0", "m1", "m2"].iter().map(|name| module.parameter(name).unwrap().id).collect();
    let mut chains = 0;
    for inst in module.instructions().iter() {
        match inst.opcode {
            // The original declaration is gone.
            Opcode::OpVariable => assert_ne!(inst.args[1], var),
            // Every chain is re-based onto a member variable, minus its
            // leading index.
            Opcode::OpAccessChain | Opcode::OpInBoundsAccessChain => {
                chains += 1;
                assert_ne!(inst.args[2], var);
                assert!(member_ids.contains(&inst.args[2]));
                assert_eq!(inst.args.len(), 3);
            }
            Opcode::OpEntryPoint => {
                assert!(!inst.args.contains(&var));
                for &id in &member_ids {
                    assert!(inst.args.contains(&id));
                }
            }
            _ => {}
        }
    }
    assert_eq!(chains, 3);
    assert!(!module.ir().contains("v_data"));
    module.instructions().validate().unwrap();
}

#[test]
fn flatten_slot_accounting_with_matrix_members() {
    let (words, _) =
        struct_output_module(&[("m_mat", Member::Mat4), ("m_f", Member::Float)], Some(0));
    let module = SpirVModule::new(Rc::new(TypeContext::new()), Stage::Vertex, words).unwrap();
    assert_eq!(module.parameter("m_mat").unwrap().location, Some(0));
    // A mat4 spans one location per column.
    assert_eq!(module.parameter("m_f").unwrap().location, Some(4));
}

/// Two unlocated struct outputs contending for the same default range, with
/// an explicitly decorated scalar sitting in the middle of it.
#[test]
fn contended_default_ranges_resolve_in_declaration_order() {
    let output = StorageClass::Output.as_u32();
    let mut b = ModuleBuilder::new();
    let main_id = b.id();
    let void = b.id();
    let fn_ty = b.id();
    let float = b.id();
    let struct_ty = b.id();
    let ptr_float = b.id();
    let ptr_struct = b.id();
    let explicit = b.id();
    let s1 = b.id();
    let s2 = b.id();
    let label = b.id();

    b.op(Opcode::OpCapability, &[1]);
    b.op(Opcode::OpMemoryModel, &[0, 1]);
    b.op_str(Opcode::OpEntryPoint, &[VERTEX, main_id], "main", &[explicit, s1, s2]);
    b.op_str(Opcode::OpName, &[explicit], "e", &[]);
    b.op_str(Opcode::OpName, &[s1], "s1", &[]);
    b.op_str(Opcode::OpName, &[s2], "s2", &[]);
    b.op(Opcode::OpDecorate, &[explicit, Decoration::Location.as_u32(), 1]);
    b.op(Opcode::OpTypeVoid, &[void]);
    b.op(Opcode::OpTypeFunction, &[fn_ty, void]);
    b.op(Opcode::OpTypeFloat, &[float, 32]);
    b.op(Opcode::OpTypeStruct, &[struct_ty, float, float, float]);
    b.op(Opcode::OpTypePointer, &[ptr_float, output, float]);
    b.op(Opcode::OpTypePointer, &[ptr_struct, output, struct_ty]);
    b.op(Opcode::OpVariable, &[ptr_float, explicit, output]);
    b.op(Opcode::OpVariable, &[ptr_struct, s1, output]);
    b.op(Opcode::OpVariable, &[ptr_struct, s2, output]);
    b.op(Opcode::OpFunction, &[void, main_id, 0, fn_ty]);
    b.op(Opcode::OpLabel, &[label]);
    b.op(Opcode::OpReturn, &[]);
    b.op(Opcode::OpFunctionEnd, &[]);

    let module =
        SpirVModule::new(Rc::new(TypeContext::new()), Stage::Vertex, b.finish()).unwrap();
    // s1 probes past the explicit slot at 1 to 2..5; s2 starts after it.
    for (name, location) in
        [("s1_0", 2), ("s1_1", 3), ("s1_2", 4), ("s2_0", 5), ("s2_1", 6), ("s2_2", 7)]
    {
        assert_eq!(module.parameter(name).unwrap().location, Some(location), "{name}");
    }
    assert_eq!(module.parameter("e").unwrap().location, Some(1));
}

#[test]
fn strip_is_idempotent_at_module_level() {
    let words = stage_module(
        FRAGMENT,
        &[
            ("in_a", StorageClass::Input, 4, None),
            ("out_a", StorageClass::Output, 4, None),
        ],
    );
    let mut module =
        SpirVModule::new(Rc::new(TypeContext::new()), Stage::Fragment, words).unwrap();
    let bound = module.instructions().id_bound();

    module.strip();
    let once = module.words().to_vec();
    assert_eq!(module.instructions().id_bound(), bound);
    assert!(!module.ir().contains("in_a"));

    module.strip();
    assert_eq!(module.words(), &once[..]);
}

#[test]
fn id_bound_exceeds_every_result_id_after_rewrites() {
    let (words, _) = struct_output_module(
        &[("m0", Member::Float), ("m1", Member::Float), ("m2", Member::Float)],
        None,
    );
    let module = SpirVModule::new(Rc::new(TypeContext::new()), Stage::Vertex, words).unwrap();
    let bound = module.instructions().id_bound();
    for inst in module.instructions().iter() {
        if let Some(layout) = inst.opcode.def() {
            if layout.has_result_id {
                let result = inst.args[layout.has_result_type_id as usize];
                assert!(result < bound, "%{result} escapes the id bound {bound}");
            }
        }
        if inst.opcode == Opcode::OpDecorate {
            assert!(inst.args[0] < bound);
        }
    }
}
