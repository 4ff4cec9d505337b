//! SPIR-V binary-format support: curated spec tables, the instruction
//! stream, and the diagnostic disassembler.

pub mod print;
pub mod spec;
pub mod stream;

use crate::ModuleError;
use smallvec::SmallVec;

/// One 32-bit unit of the binary form.
pub type Word = u32;

/// SPIR-V id: a numeric reference to a declared entity, bounded by the
/// module header's id bound. `0` never denotes anything.
pub type Id = u32;

/// Decode a NUL-terminated, word-packed UTF-8 literal string starting at
/// `words[0]`, returning the string and the number of words it occupied.
pub fn decode_literal_string(words: &[Word]) -> Result<(String, usize), ModuleError> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for (index, &word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                let s = String::from_utf8(bytes).map_err(|e| {
                    ModuleError::malformed(format!("literal string is not UTF-8: {e}"))
                })?;
                return Ok((s, index + 1));
            }
            bytes.push(byte);
        }
    }
    Err(ModuleError::malformed("missing NUL terminator in literal string"))
}

/// Encode `s` as a word-packed, NUL-terminated literal string.
pub fn encode_literal_string(s: &str) -> SmallVec<[Word; 4]> {
    debug_assert!(!s.contains('\0'), "literal strings cannot embed NUL");

    let bytes = s.as_bytes();
    let mut words: SmallVec<[Word; 4]> = bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            Word::from_le_bytes(word)
        })
        .collect();
    // The terminator needs a word of its own when the text fills the last one.
    if bytes.len() % 4 == 0 {
        words.push(0);
    }
    words
}
