//! CIL instruction encoding and decoding (ECMA-335 III).
//!
//! - [`opcodes`] holds the static opcode table with operand shapes, flow control and
//!   stack behaviour.
//! - [`decode_stream`] turns method code into [`Instruction`]s, with branch targets as
//!   absolute offsets.
//! - [`encode_instructions`] and [`InstructionAssembler`] go the other way.
//!
//! # Examples
//!
//! ```rust
//! use cilpe::assembly::{decode_stream, encode_instructions};
//! use cilpe::metadata::streams::UserStringHeapBuilder;
//!
//! let code = [0x16, 0x2D, 0x01, 0x00, 0x2A]; // ldc.i4.0; brtrue.s +1; nop; ret
//! let instructions = decode_stream(&code, None)?;
//! assert_eq!(instructions[1].to_string(), "IL_0001: brtrue.s IL_0004");
//! assert_eq!(encode_instructions(&instructions, &mut UserStringHeapBuilder::new())?, code);
//! # Ok::<(), cilpe::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
pub mod opcodes;

pub use decoder::{decode_instruction, decode_stream};
pub use encoder::{encode_instructions, InstructionAssembler, Label};
pub use instruction::{Instruction, Operand};
pub use opcodes::{FlowControl, OpCode, OperandType, StackCount, OPCODES};
