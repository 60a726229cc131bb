//! Method body framing (ECMA-335 II.25.4).
//!
//! A body is a tiny or fat header, the IL code, and for fat bodies optional data
//! sections holding exception clauses. The header format is a pure function of the
//! content: [`MethodBody::is_tiny`] decides it, so [`MethodBody::encoded_size`] is known
//! before the body is placed anywhere.
//!
//! # Examples
//!
//! ```rust
//! use cilpe::metadata::method::MethodBody;
//!
//! // ldarg.0; ret
//! let body = MethodBody::new(vec![0x02, 0x2A]);
//! assert!(body.is_tiny());
//! assert_eq!(body.to_bytes()?, [0x0A, 0x02, 0x2A]);
//!
//! let parsed = MethodBody::from(&[0x0A, 0x02, 0x2A])?;
//! assert_eq!(parsed, body);
//! # Ok::<(), cilpe::Error>(())
//! ```

use crate::{
    assembly::{decode_stream, encode_instructions, Instruction},
    file::{io::push_le, parser::Parser},
    metadata::{
        method::{
            exception_sections_size, read_exception_sections, write_exception_sections,
            ExceptionHandler, MethodBodyFlags,
        },
        streams::{UserStringHeapBuilder, UserStrings},
        token::Token,
    },
    Result,
};

/// Largest code size a tiny header can describe
pub const MAX_TINY_CODE_SIZE: usize = 63;
/// Evaluation stack depth implied by a tiny header
pub const TINY_MAX_STACK: u16 = 8;
/// Size of a fat header in bytes
pub const FAT_HEADER_SIZE: usize = 12;

/// One method body, fully in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Maximum number of items on the operand stack
    pub max_stack: u16,
    /// Zero-initialize all locals
    pub init_locals: bool,
    /// `StandAloneSig` token of the locals signature, null if there are no locals
    pub local_var_sig_token: Token,
    /// The IL code
    pub code: Vec<u8>,
    /// Exception handling clauses
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// A body without locals or exception handlers
    #[must_use]
    pub fn new(code: Vec<u8>) -> Self {
        MethodBody {
            max_stack: TINY_MAX_STACK,
            init_locals: false,
            local_var_sig_token: Token::new(0),
            code,
            exception_handlers: Vec::new(),
        }
    }

    /// Build a body from instructions, registering `ldstr` literals in `strings`.
    ///
    /// # Errors
    /// See [`encode_instructions`].
    pub fn from_instructions(
        instructions: &[Instruction],
        strings: &mut UserStringHeapBuilder,
    ) -> Result<Self> {
        Ok(Self::new(encode_instructions(instructions, strings)?))
    }

    /// Parse the body at the start of `data`.
    ///
    /// # Errors
    /// Returns an error if the header is invalid or the body is truncated.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        Ok(Self::read(data)?.0)
    }

    /// Parse the body at the start of `data`, also returning how many bytes it spans.
    ///
    /// # Errors
    /// Returns an error if the header is invalid or the body is truncated.
    pub fn read(data: &[u8]) -> Result<(MethodBody, usize)> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let mut parser = Parser::new(data);
        let first = parser.peek_byte()?;
        match first & 0b11 {
            0b10 => {
                parser.advance_by(1)?;
                let code = parser.read_bytes(usize::from(first >> 2))?.to_vec();
                Ok((Self::new(code), parser.pos()))
            }
            0b11 => {
                let first_duo = parser.read_le::<u16>()?;
                let header_size = usize::from(first_duo >> 12) * 4;
                if header_size < FAT_HEADER_SIZE {
                    return Err(malformed_error!(
                        "Fat method header of {} bytes",
                        header_size
                    ));
                }

                let flags = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
                let max_stack = parser.read_le::<u16>()?;
                let code_size = parser.read_le::<u32>()? as usize;
                let local_var_sig_token = Token::new(parser.read_le::<u32>()?);
                parser.seek(header_size)?;

                let code = parser.read_bytes(code_size)?.to_vec();
                let exception_handlers = if flags.contains(MethodBodyFlags::MORE_SECTS) {
                    read_exception_sections(&mut parser)?
                } else {
                    Vec::new()
                };

                let body = MethodBody {
                    max_stack,
                    init_locals: flags.contains(MethodBodyFlags::INIT_LOCALS),
                    local_var_sig_token,
                    code,
                    exception_handlers,
                };
                Ok((body, parser.pos()))
            }
            _ => Err(malformed_error!("Invalid method header format 0x{:02X}", first)),
        }
    }

    /// Whether the body is written with a tiny header
    #[must_use]
    pub fn is_tiny(&self) -> bool {
        self.code.len() <= MAX_TINY_CODE_SIZE
            && self.exception_handlers.is_empty()
            && self.local_var_sig_token.is_null()
            && !self.init_locals
            && self.max_stack <= TINY_MAX_STACK
    }

    /// Size of the header in bytes
    #[must_use]
    pub fn header_size(&self) -> usize {
        if self.is_tiny() {
            1
        } else {
            FAT_HEADER_SIZE
        }
    }

    /// Total encoded size, including padding before the exception sections
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        let size = self.header_size() + self.code.len();
        if self.exception_handlers.is_empty() {
            size
        } else {
            size.next_multiple_of(4) + exception_sections_size(&self.exception_handlers)
        }
    }

    /// Encode the body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the code does not fit a fat header.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.encoded_size());

        if self.is_tiny() {
            #[allow(clippy::cast_possible_truncation)]
            let header = ((self.code.len() as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8;
            buffer.push(header);
            buffer.extend_from_slice(&self.code);
            return Ok(buffer);
        }

        let Ok(code_size) = u32::try_from(self.code.len()) else {
            return Err(malformed_error!("Method code of {} bytes", self.code.len()));
        };

        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if self.init_locals {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }
        if !self.exception_handlers.is_empty() {
            flags |= MethodBodyFlags::MORE_SECTS;
        }

        #[allow(clippy::cast_possible_truncation)]
        let header_words = (FAT_HEADER_SIZE / 4) as u16;
        push_le(&mut buffer, flags.bits() | (header_words << 12));
        push_le(&mut buffer, self.max_stack);
        push_le(&mut buffer, code_size);
        push_le(&mut buffer, self.local_var_sig_token.value());
        buffer.extend_from_slice(&self.code);

        if !self.exception_handlers.is_empty() {
            buffer.resize(buffer.len().next_multiple_of(4), 0);
            write_exception_sections(&self.exception_handlers, &mut buffer)?;
        }

        Ok(buffer)
    }

    /// Append the encoded body to `buffer`.
    ///
    /// # Errors
    /// See [`Self::to_bytes`].
    pub fn write(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.extend_from_slice(&self.to_bytes()?);
        Ok(())
    }

    /// Decode the code into instructions.
    ///
    /// # Errors
    /// See [`decode_stream`].
    pub fn instructions(&self, strings: Option<&UserStrings>) -> Result<Vec<Instruction>> {
        decode_stream(&self.code, strings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{InstructionAssembler, Operand},
        metadata::method::{needs_fat_sections, ExceptionHandlerFlags},
        Error,
    };

    fn round_trip(body: &MethodBody) -> MethodBody {
        let bytes = body.to_bytes().unwrap();
        assert_eq!(bytes.len(), body.encoded_size());

        let (parsed, size) = MethodBody::read(&bytes).unwrap();
        assert_eq!(size, bytes.len());
        assert_eq!(parsed.instructions(None).unwrap(), body.instructions(None).unwrap());
        parsed
    }

    #[test]
    fn tiny_body() {
        let mut asm = InstructionAssembler::new();
        asm.emit("ldarg.0", Operand::None)
            .unwrap()
            .emit("ldarg.1", Operand::None)
            .unwrap()
            .emit("add", Operand::None)
            .unwrap()
            .emit("stloc.0", Operand::None)
            .unwrap()
            .emit("ret", Operand::None)
            .unwrap();
        let body = MethodBody::new(asm.finish(&mut UserStringHeapBuilder::new()).unwrap());

        assert!(body.is_tiny());
        assert_eq!(body.to_bytes().unwrap(), [0x16, 0x02, 0x03, 0x58, 0x0A, 0x2A]);
        assert_eq!(round_trip(&body), body);
        assert_eq!(body.instructions(None).unwrap().len(), 5);
    }

    #[test]
    fn fat_body_without_handlers() {
        let mut code = vec![0x00; 8999];
        code.push(0x2A);
        let mut body = MethodBody::new(code);
        body.max_stack = 2;

        assert!(!body.is_tiny());
        let bytes = body.to_bytes().unwrap();
        assert_eq!(&bytes[..12], &[0x03, 0x30, 0x02, 0x00, 0x28, 0x23, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(bytes.len(), 12 + 9000);

        let parsed = round_trip(&body);
        assert_eq!(parsed, body);
        assert_eq!(parsed.instructions(None).unwrap().len(), 9000);
    }

    #[test]
    fn fat_body_with_handlers() {
        let mut code = vec![0x00; 0x1_0400];
        code.push(0x2A);

        let mut body = MethodBody::new(code);
        body.max_stack = 4;
        body.init_locals = true;
        body.local_var_sig_token = Token::new(0x1100_0001);
        body.exception_handlers = (0..25)
            .map(|index| {
                ExceptionHandler::catch(Token::new(0x0100_0002), (index * 8, 4), (index * 8 + 4, 4))
            })
            .collect();
        assert!(!needs_fat_sections(&body.exception_handlers));

        let small = round_trip(&body);
        assert_eq!(small, body);

        body.exception_handlers.push(ExceptionHandler::finally((0x1_0000, 0x100), (0x1_0100, 0x10)));
        assert!(needs_fat_sections(&body.exception_handlers));

        let bytes = body.to_bytes().unwrap();
        let sections = (12 + body.code.len()).next_multiple_of(4);
        assert_eq!(bytes[sections], 0x41);
        assert_eq!(bytes[0], 0x1B);

        let fat = round_trip(&body);
        assert_eq!(fat, body);
        assert_eq!(fat.exception_handlers[25].flags, ExceptionHandlerFlags::FINALLY);
        assert_eq!(fat.exception_handlers[25].try_offset, 0x1_0000);
    }

    #[test]
    fn header_choice() {
        assert!(MethodBody::new(vec![0x00; 63]).is_tiny());
        assert!(!MethodBody::new(vec![0x00; 64]).is_tiny());

        let mut body = MethodBody::new(vec![0x2A]);
        body.max_stack = 9;
        assert!(!body.is_tiny());
        assert_eq!(body.encoded_size(), 13);
    }

    #[test]
    fn malformed() {
        assert!(MethodBody::from(&[]).is_err());
        assert!(matches!(MethodBody::from(&[0x01]), Err(Error::Malformed { .. })));
        assert!(matches!(MethodBody::from(&[0x0E, 0x00]), Err(Error::OutOfBounds { .. })));

        #[rustfmt::skip]
        let short_header = [0x03, 0x10, 0x08, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2A];
        assert!(MethodBody::from(&short_header).is_err());
    }
}
