//! Flattening struct-typed interface variables into per-member variables.

use crate::reflect::{DefKind, Definitions};
use crate::spv::spec::{Decoration, Opcode, StorageClass};
use crate::spv::stream::InstructionStream;
use crate::spv::{decode_literal_string, encode_literal_string, Id};
use crate::ty::TypeContext;
use log::debug;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

struct MemberVar {
    id: Id,
    pointer_id: Id,
    pointer_is_new: bool,
    type_id: Id,
    location: u32,
    name: String,
}

/// Replace the struct-typed interface variable `var_id` with one variable
/// per member.
///
/// Each member variable gets a fresh id, the member's type, the original
/// storage class, and the original base location offset by the slot counts
/// of the members before it. Access chains into the struct are re-based
/// onto the member variable and lose their leading index (a single-index
/// chain becomes a zero-index chain, whose result type is unchanged);
/// entry-point interface lists are rebuilt; finally the original variable's
/// declaration, names and decorations are erased.
///
/// `defs` must describe the current stream and is stale afterwards; callers
/// re-parse before touching definitions again. Flattening anything but a
/// located struct-typed variable is a caller bug.
pub(crate) fn flatten_struct(
    stream: &mut InstructionStream,
    defs: &Definitions,
    cx: &TypeContext,
    var_id: Id,
) {
    let var = &defs[var_id];
    debug_assert_eq!(var.kind, DefKind::Variable);
    let storage_class = var.storage_class.expect("flatten target is not a variable");
    let pointer_id = var.type_id.expect("flatten target has no pointer type");
    let struct_id =
        defs[pointer_id].type_id.expect("flatten target's pointer has no pointee");
    let base_location = var.location.expect("flatten target has no base location");
    let member_type_ids = defs[struct_id].member_type_ids.clone();

    // Pointer types already declared for this storage class, reusable for
    // members; access chains into the struct already forced most of these
    // to exist.
    let mut pointer_for: FxHashMap<Id, Id> = FxHashMap::default();
    for (id, def) in defs.iter() {
        if def.kind == DefKind::TypePointer && def.storage_class == Some(storage_class) {
            if let Some(pointee) = def.type_id {
                pointer_for.entry(pointee).or_insert(id);
            }
        }
    }

    let struct_def = &defs[struct_id];
    let fallback = var.name.clone().unwrap_or_else(|| format!("id{var_id}"));
    let mut members: Vec<MemberVar> = Vec::with_capacity(member_type_ids.len());
    let mut location = base_location;
    for (index, &type_id) in member_type_ids.iter().enumerate() {
        let (pointer_id, pointer_is_new) = match pointer_for.get(&type_id) {
            Some(&existing) => (existing, false),
            None => {
                let fresh = stream.allocate_id();
                pointer_for.insert(type_id, fresh);
                (fresh, true)
            }
        };
        let name = struct_def
            .member_names
            .get(index)
            .cloned()
            .flatten()
            .unwrap_or_else(|| format!("{fallback}_{index}"));
        members.push(MemberVar {
            id: stream.allocate_id(),
            pointer_id,
            pointer_is_new,
            type_id,
            location,
            name,
        });
        location += defs[type_id].ty.map_or(1, |ty| cx.location_count(ty)).max(1);
    }

    // Declarations, inserted where the struct variable sits (member types
    // are declared earlier by construction).
    let declaration = stream
        .iter()
        .find(|inst| inst.opcode == Opcode::OpVariable && inst.args.get(1) == Some(&var_id))
        .expect("flatten target has no declaration")
        .offset;
    let mut at = declaration;
    for member in &members {
        if member.pointer_is_new {
            at = stream.insert(
                at,
                Opcode::OpTypePointer,
                &[member.pointer_id, storage_class.as_u32(), member.type_id],
            ) + 4;
        }
        at = stream.insert(
            at,
            Opcode::OpVariable,
            &[member.pointer_id, member.id, storage_class.as_u32()],
        ) + 4;
    }

    // Debug names, then location decorations, each into its own section.
    let mut at = stream.begin_annotations();
    for member in &members {
        let mut args: SmallVec<[u32; 8]> = SmallVec::new();
        args.push(member.id);
        args.extend(encode_literal_string(&member.name));
        at = stream.insert(at, Opcode::OpName, &args) + 1 + args.len();
    }
    let mut at = stream.begin_decorations();
    for member in &members {
        at = stream.insert(
            at,
            Opcode::OpDecorate,
            &[member.id, Decoration::Location.as_u32(), member.location],
        ) + 4;
    }

    // Re-base access chains onto the member variable selected by their
    // leading (constant) index, and drop that index.
    let mut offset = stream.begin();
    while offset < stream.end() {
        let inst = stream.inst_at(offset);
        let rebase = matches!(
            inst.opcode,
            Opcode::OpAccessChain | Opcode::OpInBoundsAccessChain
        ) && inst.args.get(2) == Some(&var_id);
        if rebase {
            let index = inst
                .args
                .get(3)
                .and_then(|&id| defs.get(id))
                .and_then(|def| def.constant)
                .expect("access chain into flattened struct lacks a constant member index");
            let member = &members[index as usize];
            stream.args_mut(offset)[2] = member.id;
            stream.erase_arg(offset, 3);
        }
        offset = stream.inst_at(offset).next_offset();
    }

    // Entry-point interface lists name the variable; list the members
    // instead.
    let mut offset = stream.begin();
    while offset < stream.end() {
        let inst = stream.inst_at(offset);
        let next = inst.next_offset();
        if inst.opcode == Opcode::OpEntryPoint && inst.args.len() > 2 {
            if let Ok((_, name_words)) = decode_literal_string(&inst.args[2..]) {
                let interface_start = 2 + name_words;
                if inst.args[interface_start..].contains(&var_id) {
                    let mut args: Vec<u32> = inst.args[..interface_start].to_vec();
                    args.extend(
                        inst.args[interface_start..].iter().copied().filter(|&id| id != var_id),
                    );
                    args.extend(members.iter().map(|member| member.id));
                    stream.erase(offset);
                    stream.insert(offset, Opcode::OpEntryPoint, &args);
                    offset += 1 + args.len();
                    continue;
                }
            }
        }
        offset = next;
    }

    // Erase the original declaration and everything annotating it.
    let mut offset = stream.begin();
    while offset < stream.end() {
        let inst = stream.inst_at(offset);
        let next = inst.next_offset();
        let erase = match inst.opcode {
            Opcode::OpVariable => inst.args.get(1) == Some(&var_id),
            Opcode::OpName | Opcode::OpDecorate | Opcode::OpDecorateId
            | Opcode::OpDecorateString => inst.args.first() == Some(&var_id),
            _ => false,
        };
        if erase {
            stream.erase(offset);
        } else {
            offset = next;
        }
    }

    debug!(
        "flattened %{var_id} into {} member variables at locations {base_location}..{location}",
        members.len()
    );
}
