//! The CIL opcode table (ECMA-335 III).
//!
//! [`OPCODES`] is a compile-time table holding every defined opcode. The two lookup
//! indexes used by the decoder are derived from it at compile time as well, so nothing
//! is registered or mutated at runtime.

/// Prefix byte of two-byte opcodes
pub const TWO_BYTE_PREFIX: u8 = 0xFE;

/// Shape of the operand following an opcode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit immediate (`ldc.i4.s`)
    Int8,
    /// Unsigned 8-bit immediate (short argument or local index, `unaligned.`, `no.`)
    UInt8,
    /// Unsigned 16-bit argument or local index
    UInt16,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// `#US` heap token (`ldstr`)
    String,
    /// Metadata token
    Token,
    /// Signed 8-bit branch offset
    ShortBranch,
    /// Signed 32-bit branch offset
    Branch,
    /// Jump table of signed 32-bit offsets
    Switch,
}

impl OperandType {
    /// Encoded operand size; `None` for `switch`, whose size depends on the table
    #[must_use]
    pub fn size(self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 | OperandType::ShortBranch => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32
            | OperandType::Float32
            | OperandType::String
            | OperandType::Token
            | OperandType::Branch => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// How an instruction affects control flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowControl {
    /// Falls through to the next instruction
    Next,
    /// Debugger break
    Break,
    /// Unconditional branch
    Branch,
    /// Conditional branch, including `switch`
    CondBranch,
    /// Method call
    Call,
    /// Leaves the method, a finally/fault or a filter
    Return,
    /// Raises an exception
    Throw,
    /// Prefix modifying the next instruction
    Meta,
}

/// Number of evaluation stack slots popped or pushed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StackCount {
    /// Fixed count
    Fixed(u8),
    /// Depends on the signature of the operand (calls, `ret`)
    Variable,
}

/// One opcode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OpCode {
    /// Assembler mnemonic
    pub name: &'static str,
    /// Encoding; two-byte opcodes carry the `0xFE` prefix in the high byte
    pub value: u16,
    /// Operand shape
    pub operand: OperandType,
    /// Control flow class
    pub flow: FlowControl,
    /// Stack slots consumed
    pub pops: StackCount,
    /// Stack slots produced
    pub pushes: StackCount,
}

impl OpCode {
    /// Whether the opcode is encoded with the `0xFE` prefix
    #[must_use]
    pub fn is_two_byte(&self) -> bool {
        self.value >> 8 == u16::from(TWO_BYTE_PREFIX)
    }

    /// Encoded opcode size
    #[must_use]
    pub fn size(&self) -> usize {
        if self.is_two_byte() {
            2
        } else {
            1
        }
    }

    /// Whether the operand is a branch target
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.operand,
            OperandType::ShortBranch | OperandType::Branch | OperandType::Switch
        )
    }

    /// Append the opcode bytes
    #[allow(clippy::cast_possible_truncation)]
    pub fn write(&self, buffer: &mut Vec<u8>) {
        if self.is_two_byte() {
            buffer.push(TWO_BYTE_PREFIX);
        }
        buffer.push(self.value as u8);
    }

    /// Look up a one-byte opcode
    #[must_use]
    pub fn one_byte(value: u8) -> Option<&'static OpCode> {
        lookup(&ONE_BYTE_INDEX, value)
    }

    /// Look up the opcode following a `0xFE` prefix
    #[must_use]
    pub fn two_byte(value: u8) -> Option<&'static OpCode> {
        lookup(&TWO_BYTE_INDEX, value)
    }

    /// Look up an opcode by its full encoding
    #[must_use]
    pub fn from_value(value: u16) -> Option<&'static OpCode> {
        let [high, low] = value.to_be_bytes();
        match high {
            0 => Self::one_byte(low),
            TWO_BYTE_PREFIX => Self::two_byte(low),
            _ => None,
        }
    }

    /// Look up an opcode by mnemonic, ignoring ASCII case
    #[must_use]
    pub fn from_mnemonic(name: &str) -> Option<&'static OpCode> {
        OPCODES
            .iter()
            .find(|opcode| opcode.name.eq_ignore_ascii_case(name))
    }
}

fn lookup(index: &[u16; 256], value: u8) -> Option<&'static OpCode> {
    match index[usize::from(value)] {
        NO_OPCODE => None,
        position => OPCODES.get(usize::from(position)),
    }
}

const NO_OPCODE: u16 = u16::MAX;

const fn build_index(two_byte: bool) -> [u16; 256] {
    let mut index = [NO_OPCODE; 256];
    let mut position = 0;
    while position < OPCODE_LIST.len() {
        let value = OPCODE_LIST[position].value;
        if (value >> 8 == TWO_BYTE_PREFIX as u16) == two_byte {
            index[(value & 0xFF) as usize] = position as u16;
        }
        position += 1;
    }
    index
}

static ONE_BYTE_INDEX: [u16; 256] = build_index(false);
static TWO_BYTE_INDEX: [u16; 256] = build_index(true);

const fn op(
    value: u16,
    name: &'static str,
    operand: OperandType,
    flow: FlowControl,
    pops: StackCount,
    pushes: StackCount,
) -> OpCode {
    OpCode {
        name,
        value,
        operand,
        flow,
        pops,
        pushes,
    }
}

use FlowControl as F;
use OperandType as O;
use StackCount::{Fixed, Variable as V};

const P0: StackCount = Fixed(0);
const P1: StackCount = Fixed(1);
const P2: StackCount = Fixed(2);
const P3: StackCount = Fixed(3);

/// Every defined opcode
pub static OPCODES: [OpCode; OPCODE_LIST.len()] = OPCODE_LIST;

#[rustfmt::skip]
const OPCODE_LIST: [OpCode; 219] = [
    op(0x00, "nop", O::None, F::Next, P0, P0),
    op(0x01, "break", O::None, F::Break, P0, P0),
    op(0x02, "ldarg.0", O::None, F::Next, P0, P1),
    op(0x03, "ldarg.1", O::None, F::Next, P0, P1),
    op(0x04, "ldarg.2", O::None, F::Next, P0, P1),
    op(0x05, "ldarg.3", O::None, F::Next, P0, P1),
    op(0x06, "ldloc.0", O::None, F::Next, P0, P1),
    op(0x07, "ldloc.1", O::None, F::Next, P0, P1),
    op(0x08, "ldloc.2", O::None, F::Next, P0, P1),
    op(0x09, "ldloc.3", O::None, F::Next, P0, P1),
    op(0x0A, "stloc.0", O::None, F::Next, P1, P0),
    op(0x0B, "stloc.1", O::None, F::Next, P1, P0),
    op(0x0C, "stloc.2", O::None, F::Next, P1, P0),
    op(0x0D, "stloc.3", O::None, F::Next, P1, P0),
    op(0x0E, "ldarg.s", O::UInt8, F::Next, P0, P1),
    op(0x0F, "ldarga.s", O::UInt8, F::Next, P0, P1),
    op(0x10, "starg.s", O::UInt8, F::Next, P1, P0),
    op(0x11, "ldloc.s", O::UInt8, F::Next, P0, P1),
    op(0x12, "ldloca.s", O::UInt8, F::Next, P0, P1),
    op(0x13, "stloc.s", O::UInt8, F::Next, P1, P0),
    op(0x14, "ldnull", O::None, F::Next, P0, P1),
    op(0x15, "ldc.i4.m1", O::None, F::Next, P0, P1),
    op(0x16, "ldc.i4.0", O::None, F::Next, P0, P1),
    op(0x17, "ldc.i4.1", O::None, F::Next, P0, P1),
    op(0x18, "ldc.i4.2", O::None, F::Next, P0, P1),
    op(0x19, "ldc.i4.3", O::None, F::Next, P0, P1),
    op(0x1A, "ldc.i4.4", O::None, F::Next, P0, P1),
    op(0x1B, "ldc.i4.5", O::None, F::Next, P0, P1),
    op(0x1C, "ldc.i4.6", O::None, F::Next, P0, P1),
    op(0x1D, "ldc.i4.7", O::None, F::Next, P0, P1),
    op(0x1E, "ldc.i4.8", O::None, F::Next, P0, P1),
    op(0x1F, "ldc.i4.s", O::Int8, F::Next, P0, P1),
    op(0x20, "ldc.i4", O::Int32, F::Next, P0, P1),
    op(0x21, "ldc.i8", O::Int64, F::Next, P0, P1),
    op(0x22, "ldc.r4", O::Float32, F::Next, P0, P1),
    op(0x23, "ldc.r8", O::Float64, F::Next, P0, P1),
    op(0x25, "dup", O::None, F::Next, P1, P2),
    op(0x26, "pop", O::None, F::Next, P1, P0),
    op(0x27, "jmp", O::Token, F::Call, P0, P0),
    op(0x28, "call", O::Token, F::Call, V, V),
    op(0x29, "calli", O::Token, F::Call, V, V),
    op(0x2A, "ret", O::None, F::Return, V, P0),
    op(0x2B, "br.s", O::ShortBranch, F::Branch, P0, P0),
    op(0x2C, "brfalse.s", O::ShortBranch, F::CondBranch, P1, P0),
    op(0x2D, "brtrue.s", O::ShortBranch, F::CondBranch, P1, P0),
    op(0x2E, "beq.s", O::ShortBranch, F::CondBranch, P2, P0),
    op(0x2F, "bge.s", O::ShortBranch, F::CondBranch, P2, P0),
    op(0x30, "bgt.s", O::ShortBranch, F::CondBranch, P2, P0),
    op(0x31, "ble.s", O::ShortBranch, F::CondBranch, P2, P0),
    op(0x32, "blt.s", O::ShortBranch, F::CondBranch, P2, P0),
    op(0x33, "bne.un.s", O::ShortBranch, F::CondBranch, P2, P0),
    op(0x34, "bge.un.s", O::ShortBranch, F::CondBranch, P2, P0),
    op(0x35, "bgt.un.s", O::ShortBranch, F::CondBranch, P2, P0),
    op(0x36, "ble.un.s", O::ShortBranch, F::CondBranch, P2, P0),
    op(0x37, "blt.un.s", O::ShortBranch, F::CondBranch, P2, P0),
    op(0x38, "br", O::Branch, F::Branch, P0, P0),
    op(0x39, "brfalse", O::Branch, F::CondBranch, P1, P0),
    op(0x3A, "brtrue", O::Branch, F::CondBranch, P1, P0),
    op(0x3B, "beq", O::Branch, F::CondBranch, P2, P0),
    op(0x3C, "bge", O::Branch, F::CondBranch, P2, P0),
    op(0x3D, "bgt", O::Branch, F::CondBranch, P2, P0),
    op(0x3E, "ble", O::Branch, F::CondBranch, P2, P0),
    op(0x3F, "blt", O::Branch, F::CondBranch, P2, P0),
    op(0x40, "bne.un", O::Branch, F::CondBranch, P2, P0),
    op(0x41, "bge.un", O::Branch, F::CondBranch, P2, P0),
    op(0x42, "bgt.un", O::Branch, F::CondBranch, P2, P0),
    op(0x43, "ble.un", O::Branch, F::CondBranch, P2, P0),
    op(0x44, "blt.un", O::Branch, F::CondBranch, P2, P0),
    op(0x45, "switch", O::Switch, F::CondBranch, P1, P0),
    op(0x46, "ldind.i1", O::None, F::Next, P1, P1),
    op(0x47, "ldind.u1", O::None, F::Next, P1, P1),
    op(0x48, "ldind.i2", O::None, F::Next, P1, P1),
    op(0x49, "ldind.u2", O::None, F::Next, P1, P1),
    op(0x4A, "ldind.i4", O::None, F::Next, P1, P1),
    op(0x4B, "ldind.u4", O::None, F::Next, P1, P1),
    op(0x4C, "ldind.i8", O::None, F::Next, P1, P1),
    op(0x4D, "ldind.i", O::None, F::Next, P1, P1),
    op(0x4E, "ldind.r4", O::None, F::Next, P1, P1),
    op(0x4F, "ldind.r8", O::None, F::Next, P1, P1),
    op(0x50, "ldind.ref", O::None, F::Next, P1, P1),
    op(0x51, "stind.ref", O::None, F::Next, P2, P0),
    op(0x52, "stind.i1", O::None, F::Next, P2, P0),
    op(0x53, "stind.i2", O::None, F::Next, P2, P0),
    op(0x54, "stind.i4", O::None, F::Next, P2, P0),
    op(0x55, "stind.i8", O::None, F::Next, P2, P0),
    op(0x56, "stind.r4", O::None, F::Next, P2, P0),
    op(0x57, "stind.r8", O::None, F::Next, P2, P0),
    op(0x58, "add", O::None, F::Next, P2, P1),
    op(0x59, "sub", O::None, F::Next, P2, P1),
    op(0x5A, "mul", O::None, F::Next, P2, P1),
    op(0x5B, "div", O::None, F::Next, P2, P1),
    op(0x5C, "div.un", O::None, F::Next, P2, P1),
    op(0x5D, "rem", O::None, F::Next, P2, P1),
    op(0x5E, "rem.un", O::None, F::Next, P2, P1),
    op(0x5F, "and", O::None, F::Next, P2, P1),
    op(0x60, "or", O::None, F::Next, P2, P1),
    op(0x61, "xor", O::None, F::Next, P2, P1),
    op(0x62, "shl", O::None, F::Next, P2, P1),
    op(0x63, "shr", O::None, F::Next, P2, P1),
    op(0x64, "shr.un", O::None, F::Next, P2, P1),
    op(0x65, "neg", O::None, F::Next, P1, P1),
    op(0x66, "not", O::None, F::Next, P1, P1),
    op(0x67, "conv.i1", O::None, F::Next, P1, P1),
    op(0x68, "conv.i2", O::None, F::Next, P1, P1),
    op(0x69, "conv.i4", O::None, F::Next, P1, P1),
    op(0x6A, "conv.i8", O::None, F::Next, P1, P1),
    op(0x6B, "conv.r4", O::None, F::Next, P1, P1),
    op(0x6C, "conv.r8", O::None, F::Next, P1, P1),
    op(0x6D, "conv.u4", O::None, F::Next, P1, P1),
    op(0x6E, "conv.u8", O::None, F::Next, P1, P1),
    op(0x6F, "callvirt", O::Token, F::Call, V, V),
    op(0x70, "cpobj", O::Token, F::Next, P2, P0),
    op(0x71, "ldobj", O::Token, F::Next, P1, P1),
    op(0x72, "ldstr", O::String, F::Next, P0, P1),
    op(0x73, "newobj", O::Token, F::Call, V, P1),
    op(0x74, "castclass", O::Token, F::Next, P1, P1),
    op(0x75, "isinst", O::Token, F::Next, P1, P1),
    op(0x76, "conv.r.un", O::None, F::Next, P1, P1),
    op(0x79, "unbox", O::Token, F::Next, P1, P1),
    op(0x7A, "throw", O::None, F::Throw, P1, P0),
    op(0x7B, "ldfld", O::Token, F::Next, P1, P1),
    op(0x7C, "ldflda", O::Token, F::Next, P1, P1),
    op(0x7D, "stfld", O::Token, F::Next, P2, P0),
    op(0x7E, "ldsfld", O::Token, F::Next, P0, P1),
    op(0x7F, "ldsflda", O::Token, F::Next, P0, P1),
    op(0x80, "stsfld", O::Token, F::Next, P1, P0),
    op(0x81, "stobj", O::Token, F::Next, P2, P0),
    op(0x82, "conv.ovf.i1.un", O::None, F::Next, P1, P1),
    op(0x83, "conv.ovf.i2.un", O::None, F::Next, P1, P1),
    op(0x84, "conv.ovf.i4.un", O::None, F::Next, P1, P1),
    op(0x85, "conv.ovf.i8.un", O::None, F::Next, P1, P1),
    op(0x86, "conv.ovf.u1.un", O::None, F::Next, P1, P1),
    op(0x87, "conv.ovf.u2.un", O::None, F::Next, P1, P1),
    op(0x88, "conv.ovf.u4.un", O::None, F::Next, P1, P1),
    op(0x89, "conv.ovf.u8.un", O::None, F::Next, P1, P1),
    op(0x8A, "conv.ovf.i.un", O::None, F::Next, P1, P1),
    op(0x8B, "conv.ovf.u.un", O::None, F::Next, P1, P1),
    op(0x8C, "box", O::Token, F::Next, P1, P1),
    op(0x8D, "newarr", O::Token, F::Next, P1, P1),
    op(0x8E, "ldlen", O::None, F::Next, P1, P1),
    op(0x8F, "ldelema", O::Token, F::Next, P2, P1),
    op(0x90, "ldelem.i1", O::None, F::Next, P2, P1),
    op(0x91, "ldelem.u1", O::None, F::Next, P2, P1),
    op(0x92, "ldelem.i2", O::None, F::Next, P2, P1),
    op(0x93, "ldelem.u2", O::None, F::Next, P2, P1),
    op(0x94, "ldelem.i4", O::None, F::Next, P2, P1),
    op(0x95, "ldelem.u4", O::None, F::Next, P2, P1),
    op(0x96, "ldelem.i8", O::None, F::Next, P2, P1),
    op(0x97, "ldelem.i", O::None, F::Next, P2, P1),
    op(0x98, "ldelem.r4", O::None, F::Next, P2, P1),
    op(0x99, "ldelem.r8", O::None, F::Next, P2, P1),
    op(0x9A, "ldelem.ref", O::None, F::Next, P2, P1),
    op(0x9B, "stelem.i", O::None, F::Next, P3, P0),
    op(0x9C, "stelem.i1", O::None, F::Next, P3, P0),
    op(0x9D, "stelem.i2", O::None, F::Next, P3, P0),
    op(0x9E, "stelem.i4", O::None, F::Next, P3, P0),
    op(0x9F, "stelem.i8", O::None, F::Next, P3, P0),
    op(0xA0, "stelem.r4", O::None, F::Next, P3, P0),
    op(0xA1, "stelem.r8", O::None, F::Next, P3, P0),
    op(0xA2, "stelem.ref", O::None, F::Next, P3, P0),
    op(0xA3, "ldelem", O::Token, F::Next, P2, P1),
    op(0xA4, "stelem", O::Token, F::Next, P3, P0),
    op(0xA5, "unbox.any", O::Token, F::Next, P1, P1),
    op(0xB3, "conv.ovf.i1", O::None, F::Next, P1, P1),
    op(0xB4, "conv.ovf.u1", O::None, F::Next, P1, P1),
    op(0xB5, "conv.ovf.i2", O::None, F::Next, P1, P1),
    op(0xB6, "conv.ovf.u2", O::None, F::Next, P1, P1),
    op(0xB7, "conv.ovf.i4", O::None, F::Next, P1, P1),
    op(0xB8, "conv.ovf.u4", O::None, F::Next, P1, P1),
    op(0xB9, "conv.ovf.i8", O::None, F::Next, P1, P1),
    op(0xBA, "conv.ovf.u8", O::None, F::Next, P1, P1),
    op(0xC2, "refanyval", O::Token, F::Next, P1, P1),
    op(0xC3, "ckfinite", O::None, F::Next, P1, P1),
    op(0xC6, "mkrefany", O::Token, F::Next, P1, P1),
    op(0xD0, "ldtoken", O::Token, F::Next, P0, P1),
    op(0xD1, "conv.u2", O::None, F::Next, P1, P1),
    op(0xD2, "conv.u1", O::None, F::Next, P1, P1),
    op(0xD3, "conv.i", O::None, F::Next, P1, P1),
    op(0xD4, "conv.ovf.i", O::None, F::Next, P1, P1),
    op(0xD5, "conv.ovf.u", O::None, F::Next, P1, P1),
    op(0xD6, "add.ovf", O::None, F::Next, P2, P1),
    op(0xD7, "add.ovf.un", O::None, F::Next, P2, P1),
    op(0xD8, "mul.ovf", O::None, F::Next, P2, P1),
    op(0xD9, "mul.ovf.un", O::None, F::Next, P2, P1),
    op(0xDA, "sub.ovf", O::None, F::Next, P2, P1),
    op(0xDB, "sub.ovf.un", O::None, F::Next, P2, P1),
    op(0xDC, "endfinally", O::None, F::Return, P0, P0),
    op(0xDD, "leave", O::Branch, F::Branch, P0, P0),
    op(0xDE, "leave.s", O::ShortBranch, F::Branch, P0, P0),
    op(0xDF, "stind.i", O::None, F::Next, P2, P0),
    op(0xE0, "conv.u", O::None, F::Next, P1, P1),
    op(0xFE00, "arglist", O::None, F::Next, P0, P1),
    op(0xFE01, "ceq", O::None, F::Next, P2, P1),
    op(0xFE02, "cgt", O::None, F::Next, P2, P1),
    op(0xFE03, "cgt.un", O::None, F::Next, P2, P1),
    op(0xFE04, "clt", O::None, F::Next, P2, P1),
    op(0xFE05, "clt.un", O::None, F::Next, P2, P1),
    op(0xFE06, "ldftn", O::Token, F::Next, P0, P1),
    op(0xFE07, "ldvirtftn", O::Token, F::Next, P1, P1),
    op(0xFE09, "ldarg", O::UInt16, F::Next, P0, P1),
    op(0xFE0A, "ldarga", O::UInt16, F::Next, P0, P1),
    op(0xFE0B, "starg", O::UInt16, F::Next, P1, P0),
    op(0xFE0C, "ldloc", O::UInt16, F::Next, P0, P1),
    op(0xFE0D, "ldloca", O::UInt16, F::Next, P0, P1),
    op(0xFE0E, "stloc", O::UInt16, F::Next, P1, P0),
    op(0xFE0F, "localloc", O::None, F::Next, P1, P1),
    op(0xFE11, "endfilter", O::None, F::Return, P1, P0),
    op(0xFE12, "unaligned.", O::UInt8, F::Meta, P0, P0),
    op(0xFE13, "volatile.", O::None, F::Meta, P0, P0),
    op(0xFE14, "tail.", O::None, F::Meta, P0, P0),
    op(0xFE15, "initobj", O::Token, F::Next, P1, P0),
    op(0xFE16, "constrained.", O::Token, F::Meta, P0, P0),
    op(0xFE17, "cpblk", O::None, F::Next, P3, P0),
    op(0xFE18, "initblk", O::None, F::Next, P3, P0),
    op(0xFE19, "no.", O::UInt8, F::Meta, P0, P0),
    op(0xFE1A, "rethrow", O::None, F::Throw, P0, P0),
    op(0xFE1C, "sizeof", O::Token, F::Next, P0, P1),
    op(0xFE1D, "refanytype", O::None, F::Next, P1, P1),
    op(0xFE1E, "readonly.", O::None, F::Meta, P0, P0),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn table_is_consistent() {
        let mut values = HashSet::new();
        let mut names = HashSet::new();
        for opcode in &OPCODES {
            assert!(values.insert(opcode.value), "duplicate {:04X}", opcode.value);
            assert!(names.insert(opcode.name), "duplicate {}", opcode.name);
            assert_eq!(OpCode::from_value(opcode.value), Some(opcode));
            assert_eq!(OpCode::from_mnemonic(opcode.name), Some(opcode));
        }
    }

    #[test]
    fn lookups() {
        assert_eq!(OpCode::one_byte(0x2A).unwrap().name, "ret");
        assert_eq!(OpCode::two_byte(0x01).unwrap().name, "ceq");
        assert_eq!(OpCode::from_mnemonic("LDSTR").unwrap().operand, OperandType::String);
        assert!(OpCode::one_byte(0x24).is_none());
        assert!(OpCode::one_byte(TWO_BYTE_PREFIX).is_none());
        assert!(OpCode::two_byte(0x08).is_none());
        assert!(OpCode::from_value(0x1234).is_none());
        assert!(OpCode::from_mnemonic("nope").is_none());

        let ceq = OpCode::from_mnemonic("ceq").unwrap();
        assert_eq!(ceq.size(), 2);
        let mut buffer = Vec::new();
        ceq.write(&mut buffer);
        assert_eq!(buffer, [0xFE, 0x01]);
    }
}
