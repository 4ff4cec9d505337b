//! Best-effort disassembly for diagnostics.
//!
//! The listing names every curated opcode and decodes the operand shapes
//! that matter for reading interface metadata (strings, decorations,
//! storage classes); everything else is printed as raw words. Output is
//! informational only and not guaranteed parseable.

use crate::spv::spec::{BuiltIn, Decoration, Opcode, StorageClass};
use crate::spv::stream::{Inst, InstructionStream};
use crate::spv::{decode_literal_string, Word};
use itertools::Itertools;
use std::fmt::Write;

pub fn disassemble(stream: &InstructionStream) -> String {
    let mut out = String::new();
    if stream.validate_header() {
        let (major, minor) = stream.version();
        let _ = writeln!(out, "; SPIR-V {major}.{minor}, id bound {}", stream.id_bound());
    } else {
        out.push_str("; <missing or invalid header>\n");
    }
    for inst in stream.iter() {
        let _ = writeln!(out, "{}", line(&inst));
    }
    out
}

fn line(inst: &Inst<'_>) -> String {
    let mut out = String::new();
    let mut args = inst.args;

    let mut result_type = None;
    if let Some(layout) = inst.opcode.def() {
        if layout.has_result_type_id {
            result_type = args.first().copied();
            args = args.get(1..).unwrap_or(&[]);
        }
        if layout.has_result_id {
            if let Some(&id) = args.first() {
                let _ = write!(out, "%{id} = ");
            }
            args = args.get(1..).unwrap_or(&[]);
        }
    }
    let _ = write!(out, "{}", inst.opcode);
    if let Some(ty) = result_type {
        let _ = write!(out, " %{ty}");
    }
    operands(&mut out, inst.opcode, args);
    out
}

fn operands(out: &mut String, opcode: Opcode, args: &[Word]) {
    match opcode {
        Opcode::OpName => {
            id_then_string(out, args, 1);
        }
        Opcode::OpMemberName => {
            id_then_string(out, args, 2);
        }
        Opcode::OpString | Opcode::OpExtInstImport | Opcode::OpSourceExtension
        | Opcode::OpModuleProcessed => {
            string(out, args);
        }
        Opcode::OpEntryPoint => {
            if let Some(&model) = args.first() {
                let _ = write!(out, " {model}");
            }
            if let Some(&id) = args.get(1) {
                let _ = write!(out, " %{id}");
            }
            let consumed = string(out, args.get(2..).unwrap_or(&[]));
            for &id in args.get(2 + consumed..).unwrap_or(&[]) {
                let _ = write!(out, " %{id}");
            }
        }
        Opcode::OpDecorate => {
            decoration(out, args, 1);
        }
        Opcode::OpMemberDecorate => {
            decoration(out, args, 2);
        }
        Opcode::OpVariable => {
            if let Some(&class) = args.first() {
                let _ = write!(out, " {}", StorageClass::from_u32(class));
            }
            raw(out, args.get(1..).unwrap_or(&[]));
        }
        Opcode::OpTypePointer => {
            if let Some(&class) = args.first() {
                let _ = write!(out, " {}", StorageClass::from_u32(class));
            }
            for &id in args.get(1..).unwrap_or(&[]) {
                let _ = write!(out, " %{id}");
            }
        }
        // Everything else: raw words. Which of them are ids is not worth a
        // full grammar here.
        _ => raw(out, args),
    }
}

fn id_then_string(out: &mut String, args: &[Word], string_at: usize) {
    if let Some(&id) = args.first() {
        let _ = write!(out, " %{id}");
    }
    for &word in args.get(1..string_at).unwrap_or(&[]) {
        let _ = write!(out, " {word}");
    }
    string(out, args.get(string_at..).unwrap_or(&[]));
}

fn string(out: &mut String, args: &[Word]) -> usize {
    match decode_literal_string(args) {
        Ok((s, consumed)) => {
            let _ = write!(out, " {s:?}");
            consumed
        }
        Err(_) => {
            raw(out, args);
            args.len()
        }
    }
}

fn decoration(out: &mut String, args: &[Word], decoration_at: usize) {
    if let Some(&target) = args.first() {
        let _ = write!(out, " %{target}");
    }
    for &word in args.get(1..decoration_at).unwrap_or(&[]) {
        let _ = write!(out, " {word}");
    }
    let Some(&raw_decoration) = args.get(decoration_at) else { return };
    let decoration = Decoration::from_u32(raw_decoration);
    let _ = write!(out, " {decoration}");
    let extras = args.get(decoration_at + 1..).unwrap_or(&[]);
    if decoration == Decoration::BuiltIn {
        for &word in extras {
            let _ = write!(out, " {}", BuiltIn::from_u32(word));
        }
    } else {
        raw(out, extras);
    }
}

fn raw(out: &mut String, args: &[Word]) {
    if !args.is_empty() {
        let _ = write!(out, " {}", args.iter().format(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spv::encode_literal_string;
    use crate::spv::spec::MAGIC;

    #[test]
    fn listing_shapes() {
        let mut words = vec![MAGIC, 0x0001_0300, 0, 50, 0];
        let mut name_args = vec![9u32];
        name_args.extend(encode_literal_string("v_color"));
        for (opcode, args) in [
            (Opcode::OpName, name_args.as_slice()),
            (Opcode::OpDecorate, &[9, 30, 4]),
            (Opcode::OpTypeFloat, &[7, 32]),
            (Opcode::OpVariable, &[8, 9, 1]),
        ] {
            words.push(((1 + args.len() as u32) << 16) | u32::from(opcode.as_u16()));
            words.extend_from_slice(args);
        }
        let ir = disassemble(&InstructionStream::new(words));
        assert!(ir.contains("; SPIR-V 1.3, id bound 50"));
        assert!(ir.contains("OpName %9 \"v_color\""));
        assert!(ir.contains("OpDecorate %9 Location 4"));
        assert!(ir.contains("%7 = OpTypeFloat 32"));
        assert!(ir.contains("%9 = OpVariable %8 Input"));
    }
}
