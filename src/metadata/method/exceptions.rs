//! Exception handling clauses and their data sections (ECMA-335 II.25.4.5, II.25.4.6).
//!
//! Clauses follow the code of a fat method body in one or more data sections. A section
//! is either small (1-byte size, 12-byte clauses) or fat (3-byte size, 24-byte clauses).
//! The writer picks one format for all clauses of a method: fat as soon as any offset or
//! length leaves the small ranges.

use bitflags::bitflags;

use crate::{
    file::{io::push_le, parser::Parser},
    metadata::{method::SectionFlags, token::Token},
    Result,
};

/// Size of a small clause
pub const SMALL_CLAUSE_SIZE: usize = 12;
/// Size of a fat clause
pub const FAT_CLAUSE_SIZE: usize = 24;
/// Clauses per small section; the 1-byte size field caps it
pub const MAX_SMALL_CLAUSES_PER_SECTION: usize = 20;
/// Clauses per fat section
pub const MAX_FAT_CLAUSES_PER_SECTION: usize = 0x2AAA;

bitflags! {
    /// Kind of an exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception)
        const FAULT = 0x0004;
    }
}

/// One exception handling clause.
///
/// Offsets and lengths are in bytes relative to the first IL instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Start of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Exception type token for typed clauses, start of the filter for filter clauses
    pub class_token_or_filter: u32,
}

impl ExceptionHandler {
    /// A `catch` clause for `class`
    #[must_use]
    pub fn catch(class: Token, try_range: (u32, u32), handler_range: (u32, u32)) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_offset: try_range.0,
            try_length: try_range.1,
            handler_offset: handler_range.0,
            handler_length: handler_range.1,
            class_token_or_filter: class.value(),
        }
    }

    /// A `finally` clause
    #[must_use]
    pub fn finally(try_range: (u32, u32), handler_range: (u32, u32)) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_offset: try_range.0,
            try_length: try_range.1,
            handler_offset: handler_range.0,
            handler_length: handler_range.1,
            class_token_or_filter: 0,
        }
    }

    /// A filter clause whose filter starts at `filter_offset`
    #[must_use]
    pub fn filter(filter_offset: u32, try_range: (u32, u32), handler_range: (u32, u32)) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::FILTER,
            try_offset: try_range.0,
            try_length: try_range.1,
            handler_offset: handler_range.0,
            handler_length: handler_range.1,
            class_token_or_filter: filter_offset,
        }
    }

    /// The caught type of a typed clause
    #[must_use]
    pub fn class_token(&self) -> Option<Token> {
        if self.flags == ExceptionHandlerFlags::EXCEPTION {
            Some(Token::new(self.class_token_or_filter))
        } else {
            None
        }
    }

    /// Start of the filter of a filter clause
    #[must_use]
    pub fn filter_offset(&self) -> Option<u32> {
        if self.flags.contains(ExceptionHandlerFlags::FILTER) {
            Some(self.class_token_or_filter)
        } else {
            None
        }
    }

    /// Whether the clause fits the small format
    #[must_use]
    pub fn fits_small(&self) -> bool {
        self.try_offset <= u32::from(u16::MAX)
            && self.try_length <= u32::from(u8::MAX)
            && self.handler_offset <= u32::from(u16::MAX)
            && self.handler_length <= u32::from(u8::MAX)
    }

    fn read_small(parser: &mut Parser) -> Result<Self> {
        Ok(ExceptionHandler {
            flags: ExceptionHandlerFlags::from_bits_retain(parser.read_le::<u16>()?),
            try_offset: u32::from(parser.read_le::<u16>()?),
            try_length: u32::from(parser.read_le::<u8>()?),
            handler_offset: u32::from(parser.read_le::<u16>()?),
            handler_length: u32::from(parser.read_le::<u8>()?),
            class_token_or_filter: parser.read_le::<u32>()?,
        })
    }

    fn read_fat(parser: &mut Parser) -> Result<Self> {
        let flags = parser.read_le::<u32>()?;
        let Ok(flags) = u16::try_from(flags) else {
            return Err(malformed_error!("Invalid exception clause flags - 0x{:08X}", flags));
        };

        Ok(ExceptionHandler {
            flags: ExceptionHandlerFlags::from_bits_retain(flags),
            try_offset: parser.read_le::<u32>()?,
            try_length: parser.read_le::<u32>()?,
            handler_offset: parser.read_le::<u32>()?,
            handler_length: parser.read_le::<u32>()?,
            class_token_or_filter: parser.read_le::<u32>()?,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_small(&self, buffer: &mut Vec<u8>) {
        push_le(buffer, self.flags.bits());
        push_le(buffer, self.try_offset as u16);
        push_le(buffer, self.try_length as u8);
        push_le(buffer, self.handler_offset as u16);
        push_le(buffer, self.handler_length as u8);
        push_le(buffer, self.class_token_or_filter);
    }

    fn write_fat(&self, buffer: &mut Vec<u8>) {
        push_le(buffer, u32::from(self.flags.bits()));
        push_le(buffer, self.try_offset);
        push_le(buffer, self.try_length);
        push_le(buffer, self.handler_offset);
        push_le(buffer, self.handler_length);
        push_le(buffer, self.class_token_or_filter);
    }
}

/// Whether `handlers` must be written in the fat format
#[must_use]
pub fn needs_fat_sections(handlers: &[ExceptionHandler]) -> bool {
    handlers.iter().any(|handler| !handler.fits_small())
}

/// Encoded size of the data sections holding `handlers`
#[must_use]
pub fn exception_sections_size(handlers: &[ExceptionHandler]) -> usize {
    if handlers.is_empty() {
        return 0;
    }

    let (per_section, clause_size) = if needs_fat_sections(handlers) {
        (MAX_FAT_CLAUSES_PER_SECTION, FAT_CLAUSE_SIZE)
    } else {
        (MAX_SMALL_CLAUSES_PER_SECTION, SMALL_CLAUSE_SIZE)
    };

    handlers.len().div_ceil(per_section) * 4 + handlers.len() * clause_size
}

/// Append the data sections for `handlers`. The buffer must be 4-byte aligned.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the buffer is not aligned.
pub fn write_exception_sections(handlers: &[ExceptionHandler], buffer: &mut Vec<u8>) -> Result<()> {
    if buffer.len() % 4 != 0 {
        return Err(malformed_error!(
            "Exception sections must start 4-byte aligned, buffer is at {}",
            buffer.len()
        ));
    }

    let fat = needs_fat_sections(handlers);
    let per_section = if fat {
        MAX_FAT_CLAUSES_PER_SECTION
    } else {
        MAX_SMALL_CLAUSES_PER_SECTION
    };

    let chunks = handlers.chunks(per_section);
    let last = chunks.len().saturating_sub(1);
    for (index, chunk) in chunks.enumerate() {
        let mut flags = SectionFlags::EHTABLE;
        if fat {
            flags |= SectionFlags::FAT_FORMAT;
        }
        if index != last {
            flags |= SectionFlags::MORE_SECTS;
        }
        push_le(buffer, flags.bits());

        if fat {
            let size = (4 + chunk.len() * FAT_CLAUSE_SIZE) as u32;
            buffer.extend_from_slice(&size.to_le_bytes()[..3]);
            for handler in chunk {
                handler.write_fat(buffer);
            }
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let size = (4 + chunk.len() * SMALL_CLAUSE_SIZE) as u8;
            push_le(buffer, size);
            push_le(buffer, 0u16);
            for handler in chunk {
                handler.write_small(buffer);
            }
        }
    }

    Ok(())
}

/// Read the data sections starting at the current (4-byte aligned) position of `parser`.
///
/// Sections other than exception tables are skipped.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for a section size that is not a whole number of
/// clauses, or [`crate::Error::OutOfBounds`] for truncated sections.
pub fn read_exception_sections(parser: &mut Parser) -> Result<Vec<ExceptionHandler>> {
    let mut handlers = Vec::new();

    loop {
        parser.align(4)?;
        let flags = SectionFlags::from_bits_retain(parser.read_le::<u8>()?);
        let fat = flags.contains(SectionFlags::FAT_FORMAT);

        let size = if fat {
            let bytes = parser.read_bytes(3)?;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) as usize
        } else {
            let size = usize::from(parser.read_le::<u8>()?);
            parser.advance_by(2)?;
            size
        };

        if size < 4 {
            return Err(malformed_error!("Method data section of {} bytes", size));
        }

        if flags.contains(SectionFlags::EHTABLE) {
            let clause_size = if fat { FAT_CLAUSE_SIZE } else { SMALL_CLAUSE_SIZE };
            if (size - 4) % clause_size != 0 {
                return Err(malformed_error!(
                    "Exception section of {} bytes does not hold whole clauses",
                    size
                ));
            }

            for _ in 0..(size - 4) / clause_size {
                handlers.push(if fat {
                    ExceptionHandler::read_fat(parser)?
                } else {
                    ExceptionHandler::read_small(parser)?
                });
            }
        } else {
            parser.advance_by(size - 4)?;
        }

        if !flags.contains(SectionFlags::MORE_SECTS) {
            break;
        }
    }

    Ok(handlers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clauses(count: u32) -> Vec<ExceptionHandler> {
        (0..count)
            .map(|index| {
                ExceptionHandler::catch(
                    Token::new(0x0100_0001 + index),
                    (index * 4, 2),
                    (index * 4 + 2, 2),
                )
            })
            .collect()
    }

    #[test]
    fn small_single_section() {
        let handlers = vec![ExceptionHandler::finally((0x08, 0x1B), (0x23, 0x0A))];
        let mut buffer = Vec::new();
        write_exception_sections(&handlers, &mut buffer).unwrap();

        #[rustfmt::skip]
        let expected = [
            0x01, 0x10, 0x00, 0x00,
            0x02, 0x00, 0x08, 0x00, 0x1B, 0x23, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(buffer, expected);
        assert_eq!(exception_sections_size(&handlers), expected.len());

        let read = read_exception_sections(&mut Parser::new(&buffer)).unwrap();
        assert_eq!(read, handlers);
    }

    #[test]
    fn small_sections_are_chunked() {
        let handlers = clauses(25);
        assert!(!needs_fat_sections(&handlers));

        let mut buffer = Vec::new();
        write_exception_sections(&handlers, &mut buffer).unwrap();
        assert_eq!(buffer.len(), 2 * 4 + 25 * SMALL_CLAUSE_SIZE);
        assert_eq!(buffer.len(), exception_sections_size(&handlers));
        assert_eq!(buffer[0], 0x81);
        assert_eq!(buffer[1], 244);
        assert_eq!(buffer[244], 0x01);

        assert_eq!(read_exception_sections(&mut Parser::new(&buffer)).unwrap(), handlers);
    }

    #[test]
    fn one_large_offset_makes_all_fat() {
        let mut handlers = clauses(25);
        handlers.push(ExceptionHandler::filter(
            0x1_0010,
            (0x1_0000, 4),
            (0x1_0004, 0x300),
        ));
        assert!(needs_fat_sections(&handlers));

        let mut buffer = Vec::new();
        write_exception_sections(&handlers, &mut buffer).unwrap();
        assert_eq!(buffer.len(), 4 + 26 * FAT_CLAUSE_SIZE);
        assert_eq!(buffer[0], 0x41);

        let read = read_exception_sections(&mut Parser::new(&buffer)).unwrap();
        assert_eq!(read, handlers);
        assert_eq!(read[25].filter_offset(), Some(0x1_0010));
        assert_eq!(read[0].class_token(), Some(Token::new(0x0100_0001)));
    }

    #[test]
    fn truncated_or_broken() {
        assert!(read_exception_sections(&mut Parser::new(&[0x01, 0x10, 0x00, 0x00])).is_err());
        assert!(read_exception_sections(&mut Parser::new(&[0x01, 0x02, 0x00, 0x00])).is_err());

        let mut unaligned = vec![0];
        assert!(write_exception_sections(&clauses(1), &mut unaligned).is_err());
    }
}
