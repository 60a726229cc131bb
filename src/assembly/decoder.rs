//! IL decoding.
//!
//! Decoding reads opcode by opcode until the code is exhausted. Any failure aborts the
//! whole stream; a partially decoded body is never returned.

use crate::{
    assembly::{
        instruction::{Instruction, Operand},
        opcodes::{OpCode, OperandType, TWO_BYTE_PREFIX},
    },
    file::parser::Parser,
    metadata::{
        streams::{HeapRead, UserStrings},
        token::Token,
    },
    Error, Result,
};

/// Decode the instruction at the current position of `parser`.
///
/// `ldstr` operands are looked up in `strings` when given; literals that cannot be
/// resolved stay [`Operand::Token`].
///
/// # Errors
/// Returns [`Error::InvalidOpcode`] for undefined opcodes and
/// [`crate::Error::OutOfBounds`] for truncated operands.
pub fn decode_instruction(parser: &mut Parser, strings: Option<&UserStrings>) -> Result<Instruction> {
    let start = parser.pos();
    let first = parser.read_le::<u8>()?;
    let opcode = if first == TWO_BYTE_PREFIX {
        let second = parser.read_le::<u8>()?;
        OpCode::two_byte(second)
            .ok_or(Error::InvalidOpcode(u16::from_be_bytes([first, second])))?
    } else {
        OpCode::one_byte(first).ok_or(Error::InvalidOpcode(u16::from(first)))?
    };

    let operand = match opcode.operand {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Int8(parser.read_le::<i8>()?),
        OperandType::UInt8 => Operand::UInt8(parser.read_le::<u8>()?),
        OperandType::UInt16 => Operand::UInt16(parser.read_le::<u16>()?),
        OperandType::Int32 => Operand::Int32(parser.read_le::<i32>()?),
        OperandType::Int64 => Operand::Int64(parser.read_le::<i64>()?),
        OperandType::Float32 => Operand::Float32(parser.read_le::<f32>()?),
        OperandType::Float64 => Operand::Float64(parser.read_le::<f64>()?),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::String => {
            let token = Token::new(parser.read_le::<u32>()?);
            if !token.is_user_string() {
                return Err(malformed_error!("ldstr operand {} is not a user string", token));
            }
            match strings.and_then(|heap| heap.get(token.row())) {
                Some(text) => Operand::String(text),
                None => Operand::Token(token),
            }
        }
        OperandType::ShortBranch => {
            let delta = i64::from(parser.read_le::<i8>()?);
            Operand::Target(branch_target(parser.pos(), delta)?)
        }
        OperandType::Branch => {
            let delta = i64::from(parser.read_le::<i32>()?);
            Operand::Target(branch_target(parser.pos(), delta)?)
        }
        OperandType::Switch => {
            let count = parser.read_le::<u32>()? as usize;
            if count.saturating_mul(4) > parser.remaining() {
                return Err(out_of_bounds_error!());
            }

            let mut deltas = Vec::with_capacity(count);
            for _ in 0..count {
                deltas.push(i64::from(parser.read_le::<i32>()?));
            }

            let next = parser.pos();
            let targets = deltas
                .into_iter()
                .map(|delta| branch_target(next, delta))
                .collect::<Result<Vec<_>>>()?;
            Operand::Switch(targets)
        }
    };

    Ok(Instruction {
        offset: u32::try_from(start).map_err(|_| out_of_bounds_error!())?,
        opcode,
        operand,
    })
}

fn branch_target(next: usize, delta: i64) -> Result<u32> {
    let target = next as i64 + delta;
    u32::try_from(target)
        .map_err(|_| Error::InvalidBranch(format!("Branch from {next} by {delta} leaves the method")))
}

/// Decode a whole code stream.
///
/// # Errors
/// Returns the first decoding error; see [`decode_instruction`].
pub fn decode_stream(code: &[u8], strings: Option<&UserStrings>) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser, strings)?);
    }
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_instructions() {
        #[rustfmt::skip]
        let code = [
            0x02,
            0x1F, 0xF6,
            0xFE, 0x01,
            0x20, 0x78, 0x56, 0x34, 0x12,
            0x28, 0x01, 0x00, 0x00, 0x0A,
            0x2A,
        ];

        let instructions = decode_stream(&code, None).unwrap();
        let names: Vec<_> = instructions.iter().map(Instruction::mnemonic).collect();
        assert_eq!(names, ["ldarg.0", "ldc.i4.s", "ceq", "ldc.i4", "call", "ret"]);
        assert_eq!(instructions[1].operand, Operand::Int8(-10));
        assert_eq!(instructions[2].offset, 3);
        assert_eq!(instructions[3].operand, Operand::Int32(0x1234_5678));
        assert_eq!(instructions[4].operand, Operand::Token(Token::new(0x0A00_0001)));
        assert_eq!(instructions[5].offset, 15);
        assert_eq!(
            instructions.iter().map(Instruction::size).sum::<usize>(),
            code.len()
        );
    }

    #[test]
    fn branches_are_absolute() {
        #[rustfmt::skip]
        let code = [
            0x2B, 0x01,
            0x00,
            0x45, 0x02, 0x00, 0x00, 0x00, 0xF0, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
            0x38, 0xEB, 0xFF, 0xFF, 0xFF,
        ];

        let instructions = decode_stream(&code, None).unwrap();
        assert_eq!(instructions[0].operand, Operand::Target(3));
        assert_eq!(instructions[2].operand, Operand::Switch(vec![0, 16]));
        assert_eq!(instructions[3].operand, Operand::Target(0));
        assert_eq!(instructions[3].to_string(), "IL_0010: br IL_0000");
    }

    #[test]
    fn user_strings() {
        #[rustfmt::skip]
        let heap = [
            0x00,
            0x05, b'h', 0x00, b'i', 0x00, 0x00,
        ];
        let strings = UserStrings::from(&heap).unwrap();

        let code = [0x72, 0x01, 0x00, 0x00, 0x70];
        let resolved = decode_stream(&code, Some(&strings)).unwrap();
        assert_eq!(resolved[0].operand, Operand::String("hi".into()));

        let unresolved = decode_stream(&code, None).unwrap();
        assert_eq!(unresolved[0].operand, Operand::Token(Token::user_string(1)));

        assert!(decode_stream(&[0x72, 0x01, 0x00, 0x00, 0x0A], None).is_err());
    }

    #[test]
    fn failures_abort() {
        assert!(matches!(decode_stream(&[0x00, 0x24], None), Err(Error::InvalidOpcode(0x24))));
        assert!(matches!(
            decode_stream(&[0xFE, 0x08], None),
            Err(Error::InvalidOpcode(0xFE08))
        ));
        assert!(decode_stream(&[0x20, 0x01], None).is_err());
        assert!(decode_stream(&[0x45, 0xFF, 0xFF, 0xFF, 0x0F], None).is_err());
        assert!(matches!(decode_stream(&[0x2B, 0x80], None), Err(Error::InvalidBranch(_))));
    }
}
