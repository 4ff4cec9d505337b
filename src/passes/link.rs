//! Interface-location assignment, cross-stage matching, and remapping.

use crate::module::Parameter;
use crate::reflect::{DefKind, Definitions};
use crate::spv::spec::{Decoration, Opcode, StorageClass};
use crate::spv::stream::InstructionStream;
use crate::spv::Id;
use crate::ty::TypeContext;
use crate::{FxIndexMap, ModuleError};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

/// Allocate locations for every input/output variable that has none.
///
/// Candidates are served in ascending declaration-id order. Each takes the
/// lowest run of `location_count` slots not already claimed — explicitly
/// decorated variables claim their slots first, so the default numbering
/// skips them. Built-ins, and block variables with built-in members, never
/// take locations. A `OpDecorate ... Location` instruction is inserted for
/// every assignment, and `defs` is updated to match.
pub(crate) fn assign_locations(
    stream: &mut InstructionStream,
    defs: &mut Definitions,
    cx: &TypeContext,
) {
    let mut taken_inputs: FxHashSet<u32> = FxHashSet::default();
    let mut taken_outputs: FxHashSet<u32> = FxHashSet::default();

    let mut candidates: Vec<Id> = Vec::new();
    for (id, def) in defs.iter() {
        if def.kind != DefKind::Variable {
            continue;
        }
        let Some(taken) = direction(&mut taken_inputs, &mut taken_outputs, def.storage_class)
        else {
            continue;
        };
        if let Some(location) = def.location {
            let count = slot_count(defs, cx, id);
            taken.extend(location..location + count);
        } else if def.builtin.is_none() && !has_builtin_members(defs, id) {
            candidates.push(id);
        }
    }

    let mut at = stream.begin_decorations();
    for id in candidates {
        let count = slot_count(defs, cx, id);
        let taken =
            direction(&mut taken_inputs, &mut taken_outputs, defs[id].storage_class).unwrap();
        let mut base = 0u32;
        while (base..base + count).any(|slot| taken.contains(&slot)) {
            base += 1;
        }
        taken.extend(base..base + count);

        at = stream.insert(at, Opcode::OpDecorate, &[id, Decoration::Location.as_u32(), base]) + 4;
        defs[id].location = Some(base);
        debug!(
            "assigned location{} {base}..{} to %{id}",
            if count == 1 { "" } else { "s" },
            base + count
        );
    }
}

fn direction<'a>(
    inputs: &'a mut FxHashSet<u32>,
    outputs: &'a mut FxHashSet<u32>,
    storage_class: Option<StorageClass>,
) -> Option<&'a mut FxHashSet<u32>> {
    match storage_class {
        Some(StorageClass::Input) => Some(inputs),
        Some(StorageClass::Output) => Some(outputs),
        _ => None,
    }
}

/// Interface slots a variable spans; composite variables span one slot per
/// flattened leaf, matching what `flatten_struct` will produce.
fn slot_count(defs: &Definitions, cx: &TypeContext, id: Id) -> u32 {
    defs[id].ty.map_or(1, |ty| cx.location_count(ty)).max(1)
}

fn has_builtin_members(defs: &Definitions, id: Id) -> bool {
    defs.pointee_struct_id(&defs[id])
        .and_then(|struct_id| defs.get(struct_id))
        .is_some_and(|def| def.has_builtin_members)
}

/// The linker's verdict for one stage pair: a location remap for this
/// module's inputs, plus the parameter indices matched on either side.
pub(crate) struct LinkPlan {
    pub remap: FxHashMap<u32, u32>,
    pub matched: Vec<usize>,
    pub prev_matched: Vec<usize>,
}

/// Match this module's input parameters against the previous stage's
/// outputs by exact name. A matched pair with incompatible types is a
/// failure; nothing is rolled back, so the caller must discard the module.
pub(crate) fn match_stage_interfaces(
    cx: &TypeContext,
    parameters: &[Parameter],
    prev_cx: &TypeContext,
    prev_parameters: &[Parameter],
) -> Result<LinkPlan, ModuleError> {
    // Previous-stage outputs by name, in declaration order.
    let mut prev_outputs: FxIndexMap<&str, usize> = FxIndexMap::default();
    for (index, param) in prev_parameters.iter().enumerate() {
        if param.storage_class == StorageClass::Output && param.builtin.is_none() {
            if let Some(name) = param.name.as_deref() {
                prev_outputs.insert(name, index);
            }
        }
    }

    let mut plan = LinkPlan {
        remap: FxHashMap::default(),
        matched: Vec::new(),
        prev_matched: Vec::new(),
    };
    for (index, param) in parameters.iter().enumerate() {
        if param.storage_class != StorageClass::Input || param.builtin.is_some() {
            continue;
        }
        let Some(name) = param.name.as_deref() else { continue };
        let Some(&prev_index) = prev_outputs.get(name) else { continue };
        let prev = &prev_parameters[prev_index];

        match (param.ty, prev.ty) {
            (Some(ty), Some(prev_ty)) if cx.structurally_eq(ty, prev_cx, prev_ty) => {}
            _ => return Err(ModuleError::TypeMismatch { name: name.to_owned() }),
        }

        if let (Some(from), Some(to)) = (param.location, prev.location) {
            if from != to {
                plan.remap.insert(from, to);
            }
            debug!("linked input \"{name}\" to the previous stage's location {to}");
        }
        plan.matched.push(index);
        plan.prev_matched.push(prev_index);
    }
    Ok(plan)
}

/// Rewrite the location-decoration operand, in place, for every variable of
/// `storage_class` whose current location appears in `remap`. Variables not
/// present in the table are untouched; an identity entry rewrites a word to
/// its own value, leaving the stream byte-identical.
pub(crate) fn remap_locations(
    stream: &mut InstructionStream,
    parameters: &mut [Parameter],
    storage_class: StorageClass,
    remap: &FxHashMap<u32, u32>,
) {
    if remap.is_empty() {
        return;
    }
    let by_id: FxHashMap<Id, usize> = parameters
        .iter()
        .enumerate()
        .filter(|(_, param)| param.storage_class == storage_class)
        .map(|(index, param)| (param.id, index))
        .collect();

    let mut edits: Vec<(usize, u32)> = Vec::new();
    for inst in stream.iter() {
        if inst.opcode != Opcode::OpDecorate || inst.args.len() < 3 {
            continue;
        }
        if Decoration::from_u32(inst.args[1]) != Decoration::Location {
            continue;
        }
        let Some(&index) = by_id.get(&inst.args[0]) else { continue };
        if let Some(&new) = remap.get(&inst.args[2]) {
            edits.push((inst.offset, new));
            parameters[index].location = Some(new);
        }
    }
    for (at, new) in edits {
        stream.args_mut(at)[2] = new;
    }
}
