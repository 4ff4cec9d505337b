//! The instruction stream: a flat word buffer viewed as variably-sized
//! instructions.
//!
//! Positions handed out by this module (`begin`, iteration offsets, the
//! return values of `insert`/`erase`) are *word offsets* into the buffer.
//! A structural edit shifts every offset at or after the edit point, so
//! callers must re-derive positions after mutating; for decoded [`Inst`]
//! views the borrow on the stream enforces this.

use crate::spv::spec::{self, Opcode};
use crate::spv::{Id, Word};
use crate::ModuleError;
use log::debug;
use smallvec::SmallVec;

/// A complete module: the 5-word header followed by encoded instructions.
#[derive(Clone, Default, Debug)]
pub struct InstructionStream {
    words: Vec<Word>,
}

/// One decoded instruction: a view into the stream, not a copy.
#[derive(Copy, Clone)]
pub struct Inst<'a> {
    pub opcode: Opcode,
    /// Word offset of the instruction's `(word-count | opcode)` word.
    pub offset: usize,
    /// Argument words, excluding the leading `(word-count | opcode)` word.
    pub args: &'a [Word],
}

impl Inst<'_> {
    pub fn word_count(&self) -> usize {
        1 + self.args.len()
    }

    /// Offset of the instruction that follows this one.
    pub fn next_offset(&self) -> usize {
        self.offset + self.word_count()
    }
}

impl InstructionStream {
    /// Take ownership of an existing word sequence.
    pub fn new(words: Vec<Word>) -> Self {
        Self { words }
    }

    pub fn from_words(words: &[Word]) -> Self {
        Self { words: words.to_vec() }
    }

    /// Wrap a byte buffer, normalizing endianness: when the magic reads
    /// byte-swapped, every word of the module is swapped.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModuleError> {
        if bytes.len() % 4 != 0 {
            return Err(ModuleError::malformed("not a multiple of 4 bytes"));
        }
        let mut words: Vec<Word> = bytes
            .chunks_exact(4)
            .map(|chunk| Word::from_ne_bytes(chunk.try_into().unwrap()))
            .collect();
        match words.first() {
            Some(&magic) if magic == spec::MAGIC => {}
            Some(&magic) if magic.swap_bytes() == spec::MAGIC => {
                for word in &mut words {
                    *word = word.swap_bytes();
                }
            }
            _ => return Err(ModuleError::malformed("incorrect magic number")),
        }
        Ok(Self { words })
    }

    /// `true` only when the buffer starts with a complete header whose first
    /// word is the magic constant. Nothing else may be trusted before this.
    pub fn validate_header(&self) -> bool {
        self.words.len() >= spec::HEADER_LEN && self.words[0] == spec::MAGIC
    }

    /// Check that the embedded word counts tile the buffer exactly: no zero
    /// counts, no instruction running past the end.
    pub fn validate(&self) -> Result<(), ModuleError> {
        if !self.validate_header() {
            return Err(ModuleError::malformed("bad or missing header"));
        }
        let mut offset = spec::HEADER_LEN;
        while offset < self.words.len() {
            let word_count = (self.words[offset] >> 16) as usize;
            if word_count == 0 {
                return Err(ModuleError::malformed(format!("zero word count at word {offset}")));
            }
            if offset + word_count > self.words.len() {
                return Err(ModuleError::malformed(format!("truncated instruction at word {offset}")));
            }
            offset += word_count;
        }
        Ok(())
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn into_words(self) -> Vec<Word> {
        self.words
    }

    /// (major, minor) from the header's version word.
    pub fn version(&self) -> (u8, u8) {
        let version = self.words[1];
        (((version >> 16) & 0xff) as u8, ((version >> 8) & 0xff) as u8)
    }

    /// Current ceiling on ids: strictly greater than every id in use.
    pub fn id_bound(&self) -> Id {
        self.words[3]
    }

    /// Bump the id bound and return the newly usable id. Ids are never
    /// recycled; decorations reference them by value, and reuse would
    /// silently retarget unrelated instructions.
    pub fn allocate_id(&mut self) -> Id {
        let id = self.words[3];
        self.words[3] += 1;
        id
    }

    /// Offset of the first instruction after the header.
    pub fn begin(&self) -> usize {
        spec::HEADER_LEN.min(self.words.len())
    }

    /// One-past-the-last word offset.
    pub fn end(&self) -> usize {
        self.words.len()
    }

    /// Offset of the first debug/annotation-class instruction, skipping the
    /// capability/extension/entry-point preamble. Passes that only read or
    /// edit metadata start here.
    pub fn begin_annotations(&self) -> usize {
        self.iter()
            .find(|inst| !inst.opcode.is_preamble())
            .map_or(self.end(), |inst| inst.offset)
    }

    /// Insertion point for `OpDecorate`-class instructions: past the debug
    /// (name/source) section, which must precede annotations in the
    /// module's fixed layout.
    pub(crate) fn begin_decorations(&self) -> usize {
        self.iter()
            .find(|inst| !inst.opcode.is_preamble() && !inst.opcode.is_debug())
            .map_or(self.end(), |inst| inst.offset)
    }

    /// Decode the instruction whose first word is at `offset`.
    pub fn inst_at(&self, offset: usize) -> Inst<'_> {
        let first = self.words[offset];
        let word_count = (first >> 16) as usize;
        assert!(word_count > 0 && offset + word_count <= self.words.len());
        Inst {
            opcode: Opcode::from_u16(first as u16),
            offset,
            args: &self.words[offset + 1..offset + word_count],
        }
    }

    pub fn iter(&self) -> Insts<'_> {
        Insts { words: &self.words, offset: self.begin() }
    }

    /// Insert a new instruction immediately before `at`, returning its
    /// offset. Offsets at or after `at` held by the caller are stale.
    pub fn insert(&mut self, at: usize, opcode: Opcode, args: &[Word]) -> usize {
        assert!(at >= spec::HEADER_LEN && at <= self.words.len());
        let word_count =
            u16::try_from(1 + args.len()).expect("instruction word count doesn't fit in 16 bits");
        let first = (u32::from(word_count) << 16) | u32::from(opcode.as_u16());
        self.words.splice(at..at, std::iter::once(first).chain(args.iter().copied()));
        at
    }

    /// Remove the instruction at `at`, returning the offset of the
    /// instruction that followed it (now at the same position).
    pub fn erase(&mut self, at: usize) -> usize {
        let word_count = (self.words[at] >> 16) as usize;
        assert!(word_count > 0 && at + word_count <= self.words.len());
        self.words.drain(at..at + word_count);
        at
    }

    /// Remove the argument at `index` from the instruction at `at`,
    /// decrementing the recorded word count. Erasing from a zero-argument
    /// instruction, or past the argument list, is a caller bug.
    pub fn erase_arg(&mut self, at: usize, index: usize) {
        let word_count = (self.words[at] >> 16) as usize;
        assert!(index + 1 < word_count, "argument {index} out of range");
        self.words.remove(at + 1 + index);
        self.words[at] -= 1 << 16;
    }

    /// Mutable view of the argument words of the instruction at `at`.
    pub(crate) fn args_mut(&mut self, at: usize) -> &mut [Word] {
        let word_count = (self.words[at] >> 16) as usize;
        &mut self.words[at + 1..at + word_count]
    }

    /// Produce a copy with all debug instructions removed: source text,
    /// names, line markers, and any extended-instruction set (plus its
    /// import) recognized as non-semantic. The id bound is preserved even
    /// when ids fall out of use, so external numbering stays valid.
    pub fn strip(&self) -> InstructionStream {
        let mut debug_sets: SmallVec<[Id; 2]> = SmallVec::new();
        for inst in self.iter() {
            if inst.opcode == Opcode::OpExtInstImport && !inst.args.is_empty() {
                if let Ok((name, _)) = super::decode_literal_string(&inst.args[1..]) {
                    if spec::is_debug_ext_inst_set(&name) {
                        debug_sets.push(inst.args[0]);
                    }
                }
            }
        }

        let mut words = Vec::with_capacity(self.words.len());
        words.extend_from_slice(&self.words[..spec::HEADER_LEN.min(self.words.len())]);
        let mut stripped = 0usize;
        for inst in self.iter() {
            let drop = inst.opcode.is_debug()
                || (inst.opcode == Opcode::OpExtInstImport
                    && inst.args.first().is_some_and(|id| debug_sets.contains(id)))
                || (inst.opcode == Opcode::OpExtInst
                    && inst.args.get(2).is_some_and(|id| debug_sets.contains(id)));
            if drop {
                stripped += inst.word_count();
                continue;
            }
            words.push(self.words[inst.offset]);
            words.extend_from_slice(inst.args);
        }
        if stripped > 0 {
            debug!("stripped {stripped} debug words of {}", self.words.len());
        }
        InstructionStream { words }
    }
}

pub struct Insts<'a> {
    words: &'a [Word],
    offset: usize,
}

impl<'a> Iterator for Insts<'a> {
    type Item = Inst<'a>;

    fn next(&mut self) -> Option<Inst<'a>> {
        let &first = self.words.get(self.offset)?;
        let word_count = (first >> 16) as usize;
        if word_count == 0 || self.offset + word_count > self.words.len() {
            // Malformed tails are diagnosed by `validate`; stop rather than spin.
            return None;
        }
        let inst = Inst {
            opcode: Opcode::from_u16(first as u16),
            offset: self.offset,
            args: &self.words[self.offset + 1..self.offset + word_count],
        };
        self.offset += word_count;
        Some(inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_with(insts: &[(Opcode, &[Word])]) -> InstructionStream {
        let mut words = vec![spec::MAGIC, 0x0001_0300, 0, 100, 0];
        for &(opcode, args) in insts {
            words.push(((1 + args.len() as u32) << 16) | u32::from(opcode.as_u16()));
            words.extend_from_slice(args);
        }
        InstructionStream::new(words)
    }

    #[test]
    fn header_validation() {
        assert!(stream_with(&[]).validate_header());
        assert!(!InstructionStream::new(vec![0xdead_beef, 0, 0, 4, 0]).validate_header());
        assert!(!InstructionStream::new(vec![spec::MAGIC]).validate_header());
    }

    #[test]
    fn endian_normalization() {
        let words = stream_with(&[(Opcode::OpCapability, &[1])]).into_words();
        let swapped: Vec<u8> =
            words.iter().flat_map(|word| word.swap_bytes().to_ne_bytes()).collect();
        let stream = InstructionStream::from_bytes(&swapped).unwrap();
        assert_eq!(stream.words(), &words[..]);
    }

    #[test]
    fn truncated_instruction_is_rejected() {
        let mut words = stream_with(&[]).into_words();
        words.push(4 << 16 | u32::from(Opcode::OpName.as_u16()));
        words.push(1);
        assert!(InstructionStream::new(words).validate().is_err());
    }

    #[test]
    fn iteration_decodes_offsets_and_args() {
        let stream =
            stream_with(&[(Opcode::OpCapability, &[1]), (Opcode::OpTypeVoid, &[2])]);
        let insts: Vec<_> = stream.iter().collect();
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].opcode, Opcode::OpCapability);
        assert_eq!(insts[0].offset, 5);
        assert_eq!(insts[1].args, &[2]);
        assert_eq!(insts[1].offset, 7);
    }

    #[test]
    fn insert_and_erase_keep_word_counts_consistent() {
        let mut stream = stream_with(&[(Opcode::OpTypeVoid, &[2])]);
        let at = stream.insert(stream.begin(), Opcode::OpCapability, &[1]);
        assert_eq!(at, 5);
        stream.validate().unwrap();
        assert_eq!(stream.iter().count(), 2);

        let next = stream.erase(at);
        assert_eq!(next, 5);
        stream.validate().unwrap();
        assert_eq!(stream.iter().next().unwrap().opcode, Opcode::OpTypeVoid);
    }

    #[test]
    fn erase_arg_drops_one_word() {
        let mut stream = stream_with(&[(Opcode::OpTypeStruct, &[7, 3, 4, 5])]);
        stream.erase_arg(5, 1);
        stream.validate().unwrap();
        let inst = stream.inst_at(5);
        assert_eq!(inst.args, &[7, 4, 5]);
    }

    #[test]
    fn allocate_id_bumps_the_bound() {
        let mut stream = stream_with(&[]);
        assert_eq!(stream.id_bound(), 100);
        assert_eq!(stream.allocate_id(), 100);
        assert_eq!(stream.id_bound(), 101);
    }

    #[test]
    fn begin_annotations_skips_the_preamble() {
        let stream = stream_with(&[
            (Opcode::OpCapability, &[1]),
            (Opcode::OpMemoryModel, &[0, 1]),
            (Opcode::OpName, &[9, 0]),
            (Opcode::OpTypeVoid, &[2]),
        ]);
        let inst = stream.inst_at(stream.begin_annotations());
        assert_eq!(inst.opcode, Opcode::OpName);
        let inst = stream.inst_at(stream.begin_decorations());
        assert_eq!(inst.opcode, Opcode::OpTypeVoid);
    }

    #[test]
    fn strip_removes_debug_and_preserves_the_bound() {
        let mut name_args = vec![9u32];
        name_args.extend(crate::spv::encode_literal_string("color"));
        let mut import_args = vec![20u32];
        import_args.extend(crate::spv::encode_literal_string("NonSemantic.Test"));
        let stream = stream_with(&[
            (Opcode::OpExtInstImport, &import_args),
            (Opcode::OpName, &name_args),
            (Opcode::OpTypeVoid, &[2]),
            (Opcode::OpExtInst, &[2, 21, 20, 1]),
        ]);
        let stripped = stream.strip();
        stripped.validate().unwrap();
        assert_eq!(stripped.id_bound(), 100);
        let opcodes: Vec<_> = stripped.iter().map(|inst| inst.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::OpTypeVoid]);
        // Idempotent: stripping twice equals stripping once.
        assert_eq!(stripped.strip().words(), stripped.words());
    }
}
