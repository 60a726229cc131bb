//! Decoded instructions.

use std::fmt;

use crate::{
    assembly::opcodes::{OpCode, OperandType},
    metadata::token::Token,
};

/// Operand of an instruction.
///
/// Branch targets are absolute offsets from the start of the method code, so a decoded
/// instruction list stays meaningful when instructions are inserted or removed.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Signed 8-bit immediate
    Int8(i8),
    /// Unsigned 8-bit immediate or index
    UInt8(u8),
    /// Unsigned 16-bit index
    UInt16(u16),
    /// Signed 32-bit immediate
    Int32(i32),
    /// Signed 64-bit immediate
    Int64(i64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
    /// Metadata token; also an unresolved `ldstr` heap token
    Token(Token),
    /// `ldstr` literal resolved through the `#US` heap
    String(String),
    /// Branch target offset
    Target(u32),
    /// `switch` target offsets
    Switch(Vec<u32>),
}

/// One instruction of a method body.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// Offset from the start of the method code
    pub offset: u32,
    /// The opcode
    pub opcode: &'static OpCode,
    /// The operand
    pub operand: Operand,
}

impl Instruction {
    /// An instruction without a known position, for encoding
    #[must_use]
    pub fn new(opcode: &'static OpCode, operand: Operand) -> Self {
        Instruction {
            offset: 0,
            opcode,
            operand,
        }
    }

    /// Encoded size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        let operand = match (&self.operand, self.opcode.operand.size()) {
            (Operand::Switch(targets), None) => 4 + 4 * targets.len(),
            (_, Some(size)) => size,
            (_, None) => 4,
        };
        self.opcode.size() + operand
    }

    /// Mnemonic of the opcode
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.name
    }

    /// Whether the operand agrees with the opcode's operand shape
    #[must_use]
    pub fn operand_matches(&self) -> bool {
        matches!(
            (self.opcode.operand, &self.operand),
            (OperandType::None, Operand::None)
                | (OperandType::Int8, Operand::Int8(_))
                | (OperandType::UInt8, Operand::UInt8(_))
                | (OperandType::UInt16, Operand::UInt16(_))
                | (OperandType::Int32, Operand::Int32(_))
                | (OperandType::Int64, Operand::Int64(_))
                | (OperandType::Float32, Operand::Float32(_))
                | (OperandType::Float64, Operand::Float64(_))
                | (OperandType::Token, Operand::Token(_))
                | (OperandType::String, Operand::String(_) | Operand::Token(_))
                | (OperandType::ShortBranch | OperandType::Branch, Operand::Target(_))
                | (OperandType::Switch, Operand::Switch(_))
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04X}: {}", self.offset, self.opcode.name)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int8(value) => write!(f, " {value}"),
            Operand::UInt8(value) => write!(f, " {value}"),
            Operand::UInt16(value) => write!(f, " {value}"),
            Operand::Int32(value) => write!(f, " {value}"),
            Operand::Int64(value) => write!(f, " {value}"),
            Operand::Float32(value) => write!(f, " {value}"),
            Operand::Float64(value) => write!(f, " {value}"),
            Operand::Token(token) => write!(f, " {token}"),
            Operand::String(value) => write!(f, " {value:?}"),
            Operand::Target(target) => write!(f, " IL_{target:04X}"),
            Operand::Switch(targets) => {
                write!(f, " (")?;
                for (index, target) in targets.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "IL_{target:04X}")?;
                }
                write!(f, ")")
            }
        }
    }
}
