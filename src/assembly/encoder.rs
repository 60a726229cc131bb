//! IL encoding.
//!
//! [`encode_instructions`] is the inverse of [`crate::assembly::decode_stream`]. String
//! literals are registered in the `#US` heap in a pre-pass, so every `ldstr` token is
//! known before the first byte is emitted. Branch targets are remapped from the offsets
//! recorded in the instructions to the offsets of the emitted layout.
//!
//! [`InstructionAssembler`] builds code from mnemonics and labels and hands the result
//! to the same encoder.

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{Instruction, Operand},
        opcodes::{OpCode, OperandType},
    },
    file::io::push_le,
    metadata::{
        streams::{HeapWrite, UserStringHeapBuilder},
        token::Token,
    },
    Error, Result,
};

/// Encode `instructions` into a code stream.
///
/// Branch and switch targets name the `offset` of an instruction in the list, or the
/// offset just past the last instruction. `ldstr` literals given as
/// [`Operand::String`] are registered in `strings`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if an operand does not fit its opcode,
/// [`Error::InvalidBranch`] if a target is not an instruction boundary or a short
/// branch cannot reach it.
pub fn encode_instructions(
    instructions: &[Instruction],
    strings: &mut UserStringHeapBuilder,
) -> Result<Vec<u8>> {
    let mut literals = HashMap::new();
    for instruction in instructions {
        if !instruction.operand_matches() {
            return Err(malformed_error!(
                "Operand {:?} does not fit {}",
                instruction.operand,
                instruction.opcode.name
            ));
        }
        if let Operand::String(text) = &instruction.operand {
            if !literals.contains_key(text.as_str()) {
                let offset = strings.register(Some(text.as_str()))?;
                literals.insert(text.as_str(), Token::user_string(offset));
            }
        }
    }

    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut position = 0usize;
    for instruction in instructions {
        offsets.push(position);
        position += instruction.size();
    }
    let code_size = position;

    let branches = instructions.iter().any(|instruction| instruction.opcode.is_branch());
    let mut remap = HashMap::with_capacity(instructions.len() + 1);
    let mut previous: Option<u32> = None;
    for (instruction, new_offset) in instructions.iter().zip(&offsets) {
        if branches && previous.is_some_and(|offset| offset >= instruction.offset) {
            return Err(Error::InvalidBranch(format!(
                "Instruction offsets must increase, found IL_{:04X} after IL_{:04X}",
                instruction.offset,
                previous.unwrap_or_default()
            )));
        }
        previous = Some(instruction.offset);
        remap.insert(instruction.offset, *new_offset);
    }
    if let Some(last) = instructions.last() {
        remap.insert(last.offset + last.size() as u32, code_size);
    }

    let resolve = |target: u32| -> Result<usize> {
        remap.get(&target).copied().ok_or_else(|| {
            Error::InvalidBranch(format!("IL_{target:04X} is not an instruction boundary"))
        })
    };

    let mut buffer = Vec::with_capacity(code_size);
    for (instruction, offset) in instructions.iter().zip(&offsets) {
        instruction.opcode.write(&mut buffer);
        let next = offset + instruction.size();

        match (&instruction.operand, instruction.opcode.operand) {
            (Operand::None, _) => {}
            (Operand::Int8(value), _) => push_le(&mut buffer, *value),
            (Operand::UInt8(value), _) => push_le(&mut buffer, *value),
            (Operand::UInt16(value), _) => push_le(&mut buffer, *value),
            (Operand::Int32(value), _) => push_le(&mut buffer, *value),
            (Operand::Int64(value), _) => push_le(&mut buffer, *value),
            (Operand::Float32(value), _) => push_le(&mut buffer, *value),
            (Operand::Float64(value), _) => push_le(&mut buffer, *value),
            (Operand::Token(token), _) => push_le(&mut buffer, token.value()),
            (Operand::String(text), _) => {
                let token = literals.get(text.as_str()).copied().unwrap_or_default();
                push_le(&mut buffer, token.value());
            }
            (Operand::Target(target), OperandType::ShortBranch) => {
                let delta = relative(resolve(*target)?, next)?;
                let Ok(short) = i8::try_from(delta) else {
                    return Err(Error::InvalidBranch(format!(
                        "{} at IL_{:04X} cannot reach IL_{:04X}",
                        instruction.opcode.name, offset, target
                    )));
                };
                push_le(&mut buffer, short);
            }
            (Operand::Target(target), _) => {
                push_le(&mut buffer, relative(resolve(*target)?, next)?);
            }
            (Operand::Switch(targets), _) => {
                push_le(&mut buffer, targets.len() as u32);
                for target in targets {
                    push_le(&mut buffer, relative(resolve(*target)?, next)?);
                }
            }
        }
    }

    Ok(buffer)
}

fn relative(target: usize, next: usize) -> Result<i32> {
    let delta = target as i64 - next as i64;
    i32::try_from(delta).map_err(|_| Error::InvalidBranch(format!("Branch distance {delta} too large")))
}

/// A branch target that may be defined after it is used
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Clone, Debug)]
enum Pending {
    Ready(Instruction),
    Branch(&'static OpCode, Label),
    Switch(Vec<Label>),
}

/// Builds IL from mnemonics and labels.
///
/// # Examples
///
/// ```rust
/// use cilpe::assembly::{InstructionAssembler, Operand};
/// use cilpe::metadata::streams::UserStringHeapBuilder;
///
/// let mut asm = InstructionAssembler::new();
/// let done = asm.define_label();
/// asm.emit("ldarg.0", Operand::None)?
///     .branch("brfalse.s", done)?
///     .emit("ldstr", Operand::String("yes".into()))?
///     .emit("pop", Operand::None)?;
/// asm.mark_label(done)?;
/// asm.emit("ret", Operand::None)?;
///
/// let code = asm.finish(&mut UserStringHeapBuilder::new())?;
/// assert_eq!(code, [0x02, 0x2C, 0x06, 0x72, 0x01, 0x00, 0x00, 0x70, 0x26, 0x2A]);
/// # Ok::<(), cilpe::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct InstructionAssembler {
    pending: Vec<Pending>,
    labels: Vec<Option<usize>>,
}

impl InstructionAssembler {
    /// An empty assembler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn opcode(mnemonic: &str) -> Result<&'static OpCode> {
        OpCode::from_mnemonic(mnemonic).ok_or_else(|| Error::InvalidMnemonic(mnemonic.to_string()))
    }

    /// Append an instruction by mnemonic.
    ///
    /// # Errors
    /// Returns [`Error::InvalidMnemonic`] for unknown mnemonics, or
    /// [`crate::Error::Malformed`] if the operand does not fit, including branch
    /// opcodes, which go through [`Self::branch`] and [`Self::switch`].
    pub fn emit(&mut self, mnemonic: &str, operand: Operand) -> Result<&mut Self> {
        let opcode = Self::opcode(mnemonic)?;
        self.emit_opcode(opcode, operand)
    }

    /// Append an instruction.
    ///
    /// # Errors
    /// See [`Self::emit`].
    pub fn emit_opcode(&mut self, opcode: &'static OpCode, operand: Operand) -> Result<&mut Self> {
        let instruction = Instruction::new(opcode, operand);
        if opcode.is_branch() || !instruction.operand_matches() {
            return Err(malformed_error!(
                "Operand {:?} does not fit {}",
                instruction.operand,
                opcode.name
            ));
        }
        self.pending.push(Pending::Ready(instruction));
        Ok(self)
    }

    /// Append a branch to `label`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidMnemonic`] if `mnemonic` is not a branch opcode.
    pub fn branch(&mut self, mnemonic: &str, label: Label) -> Result<&mut Self> {
        let opcode = Self::opcode(mnemonic)?;
        if !matches!(opcode.operand, OperandType::ShortBranch | OperandType::Branch) {
            return Err(Error::InvalidMnemonic(format!("{mnemonic} is not a branch")));
        }
        self.pending.push(Pending::Branch(opcode, label));
        Ok(self)
    }

    /// Append a `switch` over `labels`
    pub fn switch(&mut self, labels: &[Label]) -> &mut Self {
        self.pending.push(Pending::Switch(labels.to_vec()));
        self
    }

    /// Create a new, not yet placed label
    pub fn define_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Place `label` at the next instruction.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBranch`] if the label is unknown or already placed.
    pub fn mark_label(&mut self, label: Label) -> Result<()> {
        match self.labels.get_mut(label.0) {
            Some(slot @ None) => {
                *slot = Some(self.pending.len());
                Ok(())
            }
            Some(Some(_)) => Err(Error::InvalidBranch(format!("Label {} placed twice", label.0))),
            None => Err(Error::InvalidBranch(format!("Unknown label {}", label.0))),
        }
    }

    /// Lay out the instructions and resolve all labels to offsets.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBranch`] for labels that were never placed.
    pub fn instructions(&self) -> Result<Vec<Instruction>> {
        let switch = Self::opcode("switch")?;

        let mut offsets = Vec::with_capacity(self.pending.len() + 1);
        let mut position = 0u32;
        for pending in &self.pending {
            offsets.push(position);
            position += match pending {
                Pending::Ready(instruction) => instruction.size(),
                Pending::Branch(opcode, _) => opcode.size() + opcode.operand.size().unwrap_or(4),
                Pending::Switch(labels) => switch.size() + 4 + 4 * labels.len(),
            } as u32;
        }
        offsets.push(position);

        let target = |label: &Label| -> Result<u32> {
            match self.labels.get(label.0) {
                Some(Some(index)) => Ok(offsets[*index]),
                _ => Err(Error::InvalidBranch(format!("Label {} was never placed", label.0))),
            }
        };

        self.pending
            .iter()
            .zip(&offsets)
            .map(|(pending, offset)| {
                let mut instruction = match pending {
                    Pending::Ready(instruction) => instruction.clone(),
                    Pending::Branch(opcode, label) => {
                        Instruction::new(*opcode, Operand::Target(target(label)?))
                    }
                    Pending::Switch(labels) => Instruction::new(
                        switch,
                        Operand::Switch(labels.iter().map(&target).collect::<Result<_>>()?),
                    ),
                };
                instruction.offset = *offset;
                Ok(instruction)
            })
            .collect()
    }

    /// Encode the code stream, registering literals in `strings`.
    ///
    /// # Errors
    /// See [`Self::instructions`] and [`encode_instructions`].
    pub fn finish(&self, strings: &mut UserStringHeapBuilder) -> Result<Vec<u8>> {
        encode_instructions(&self.instructions()?, strings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::decode_stream;

    #[test]
    fn decode_encode_is_identity() {
        #[rustfmt::skip]
        let code = [
            0x2B, 0x01,
            0x00,
            0x45, 0x02, 0x00, 0x00, 0x00, 0xF0, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
            0x38, 0xEB, 0xFF, 0xFF, 0xFF,
            0x21, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
            0x23, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF0, 0x3F,
            0xFE, 0x0C, 0x01, 0x01,
            0x72, 0x09, 0x00, 0x00, 0x70,
            0x2A,
        ];

        let instructions = decode_stream(&code, None).unwrap();
        let encoded = encode_instructions(&instructions, &mut UserStringHeapBuilder::new()).unwrap();
        assert_eq!(encoded, code);
    }

    #[test]
    fn targets_follow_inserted_instructions() {
        let code = [0x2B, 0x01, 0x00, 0x2A];
        let nop = OpCode::from_mnemonic("nop").unwrap();

        let mut instructions = decode_stream(&code, None).unwrap();
        let mut inserted = Instruction::new(nop, Operand::None);
        inserted.offset = 1;
        instructions[1].offset = 2;
        instructions[2].offset = 3;
        instructions.insert(1, inserted);
        instructions[2].offset = 2;
        let encoded = encode_instructions(&instructions, &mut UserStringHeapBuilder::new()).unwrap();
        assert_eq!(encoded, [0x2B, 0x02, 0x00, 0x00, 0x2A]);

        let mut instructions = decode_stream(&code, None).unwrap();
        instructions.remove(1);
        let encoded = encode_instructions(&instructions, &mut UserStringHeapBuilder::new()).unwrap();
        assert_eq!(encoded, [0x2B, 0x00, 0x2A]);

        let mut instructions = decode_stream(&code, None).unwrap();
        instructions[2].offset = 1;
        assert!(matches!(
            encode_instructions(&instructions, &mut UserStringHeapBuilder::new()),
            Err(Error::InvalidBranch(_))
        ));
    }

    #[test]
    fn strings_are_registered_once() {
        let mut asm = InstructionAssembler::new();
        asm.emit("ldstr", Operand::String("a".into()))
            .unwrap()
            .emit("ldstr", Operand::String("a".into()))
            .unwrap()
            .emit("ret", Operand::None)
            .unwrap();

        let mut strings = UserStringHeapBuilder::new();
        let code = asm.finish(&mut strings).unwrap();
        assert_eq!(code, [0x72, 0x01, 0x00, 0x00, 0x70, 0x72, 0x01, 0x00, 0x00, 0x70, 0x2A]);
        assert_eq!(strings.data(), [0x00, 0x03, b'a', 0x00, 0x00]);
    }

    #[test]
    fn labels_and_switch() {
        let mut asm = InstructionAssembler::new();
        let first = asm.define_label();
        let second = asm.define_label();
        asm.emit("ldarg.0", Operand::None).unwrap();
        asm.switch(&[first, second]);
        asm.mark_label(first).unwrap();
        asm.emit("ldc.i4.0", Operand::None).unwrap();
        asm.branch("br", second).unwrap();
        asm.mark_label(second).unwrap();
        asm.emit("ret", Operand::None).unwrap();

        let code = asm.finish(&mut UserStringHeapBuilder::new()).unwrap();
        #[rustfmt::skip]
        let expected = [
            0x02,
            0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00,
            0x16,
            0x38, 0x00, 0x00, 0x00, 0x00,
            0x2A,
        ];
        assert_eq!(code, expected);
    }

    #[test]
    fn errors() {
        let mut asm = InstructionAssembler::new();
        assert!(matches!(asm.emit("bogus", Operand::None), Err(Error::InvalidMnemonic(_))));
        assert!(asm.emit("ldc.i4", Operand::Int8(1)).is_err());
        assert!(asm.emit("br", Operand::Target(0)).is_err());
        assert!(matches!(asm.branch("add", Label(0)), Err(Error::InvalidMnemonic(_))));

        let label = asm.define_label();
        asm.branch("br.s", label).unwrap();
        assert!(matches!(asm.instructions(), Err(Error::InvalidBranch(_))));

        asm.mark_label(label).unwrap();
        assert!(asm.mark_label(label).is_err());

        let mut far = InstructionAssembler::new();
        let end = far.define_label();
        far.branch("br.s", end).unwrap();
        for _ in 0..200 {
            far.emit("nop", Operand::None).unwrap();
        }
        far.mark_label(end).unwrap();
        far.emit("ret", Operand::None).unwrap();
        assert!(matches!(
            far.finish(&mut UserStringHeapBuilder::new()),
            Err(Error::InvalidBranch(_))
        ));
    }
}
