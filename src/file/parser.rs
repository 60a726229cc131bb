//! Cursor-based reader over a byte slice.
//!
//! [`Parser`] is the read side of the primitive codec. Besides fixed-width little-endian
//! values it decodes the ECMA-335 compressed integers (II.23.2) used by signatures, blob
//! length prefixes and custom attribute blobs:
//!
//! | First byte   | Width | Range                 |
//! |--------------|-------|-----------------------|
//! | `0xxxxxxx`   | 1     | `0x00..=0x7F`         |
//! | `10xxxxxx`   | 2     | `0x80..=0x3FFF`       |
//! | `110xxxxx`   | 4     | `0x4000..=0x1FFFFFFF` |
//!
//! A first byte of `111xxxxx` is rejected as malformed; no bytes past the buffer end are
//! ever touched.
//!
//! # Examples
//!
//! ```rust
//! use cilpe::Parser;
//!
//! let data = [0x03, 0xBF, 0xFF, 0x7B];
//! let mut parser = Parser::new(&data);
//! assert_eq!(parser.read_compressed_uint()?, 3);
//! assert_eq!(parser.read_compressed_uint()?, 0x3FFF);
//! assert_eq!(parser.read_compressed_int()?, -3);
//! assert!(!parser.has_more_data());
//! # Ok::<(), cilpe::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilPrimitive},
    metadata::token::Token,
    Result,
};

/// A forward-moving reader over borrowed bytes.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a parser positioned at the start of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying buffer
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the underlying buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if unread bytes remain
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of unread bytes
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Current position
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The full underlying buffer
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Move to an absolute position. Seeking to the end is allowed.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Skip `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self.end_of(step)?;
        self.position = end;
        Ok(())
    }

    /// Skip forward to the next multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the padding crosses the end.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Look at the next byte without consuming it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the buffer.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Read a fixed-width little-endian value.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value crosses the end.
    pub fn read_le<T: CilPrimitive>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Decode an ECMA-335 compressed unsigned integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid width tag and
    /// [`crate::Error::OutOfBounds`] for truncated input.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first = self.peek_byte()?;

        if first & 0x80 == 0 {
            self.position += 1;
            return Ok(u32::from(first));
        }

        if first & 0xC0 == 0x80 {
            let bytes = self.read_bytes(2)?;
            return Ok((u32::from(bytes[0] & 0x3F) << 8) | u32::from(bytes[1]));
        }

        if first & 0xE0 == 0xC0 {
            let bytes = self.read_bytes(4)?;
            return Ok((u32::from(bytes[0] & 0x1F) << 24)
                | (u32::from(bytes[1]) << 16)
                | (u32::from(bytes[2]) << 8)
                | u32::from(bytes[3]));
        }

        Err(malformed_error!("Invalid compressed uint - 0x{:02X}", first))
    }

    /// Decode an ECMA-335 compressed signed integer.
    ///
    /// The payload is the two's complement value rotated left by one bit inside the
    /// 7-, 14- or 29-bit field, so the sign lands in the lowest bit.
    ///
    /// # Errors
    /// Same failure modes as [`Parser::read_compressed_uint`].
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        let start = self.position;
        let raw = self.read_compressed_uint()?;

        let bias: i32 = match self.position - start {
            1 => 0x40,
            2 => 0x2000,
            _ => 0x1000_0000,
        };

        #[allow(clippy::cast_possible_wrap)]
        let magnitude = (raw >> 1) as i32;
        if raw & 1 == 0 {
            Ok(magnitude)
        } else {
            Ok(magnitude - bias)
        }
    }

    /// Decode a compressed `TypeDefOrRefOrSpec` token as used in signatures.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag selects no table.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let encoded = self.read_compressed_uint()?;
        Token::from_type_def_or_ref(encoded)
    }

    /// Borrow the next `length` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.end_of(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a string prefixed by its compressed byte length (`SerString`).
    ///
    /// A leading `0xFF` denotes a null string and yields `None`.
    ///
    /// # Errors
    /// Returns an error for truncated data or invalid UTF-8.
    pub fn read_ser_string(&mut self) -> Result<Option<&'a str>> {
        if self.peek_byte()? == 0xFF {
            self.position += 1;
            return Ok(None);
        }

        let length = self.read_compressed_uint()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(length)?;
        std::str::from_utf8(bytes)
            .map(Some)
            .map_err(|e| malformed_error!("Invalid UTF-8 string at offset {} - {}", start, e))
    }

    /// Run `f`, restoring the position if it fails.
    ///
    /// # Errors
    /// Propagates the error returned by `f`.
    pub fn transactional<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved = self.position;
        let result = f(self);
        if result.is_err() {
            self.position = saved;
        }
        result
    }

    fn end_of(&self, length: usize) -> Result<usize> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(out_of_bounds_error!())?;

        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn compressed_uint() {
        #[rustfmt::skip]
        let cases: Vec<(Vec<u8>, u32)> = vec![
            (vec![0x03], 0x03),
            (vec![0x7F], 0x7F),
            (vec![0x80, 0x80], 0x80),
            (vec![0xAE, 0x57], 0x2E57),
            (vec![0xBF, 0xFF], 0x3FFF),
            (vec![0xC0, 0x00, 0x40, 0x00], 0x4000),
            (vec![0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF),
        ];

        for (input, expected) in cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_uint().unwrap(), expected);
            assert_eq!(parser.pos(), input.len());
        }
    }

    #[test]
    fn compressed_uint_invalid_tag() {
        let mut parser = Parser::new(&[0xE0, 0x00, 0x00, 0x00]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn compressed_uint_truncated() {
        let mut parser = Parser::new(&[0xC0, 0x00]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn compressed_int() {
        #[rustfmt::skip]
        let cases: Vec<(Vec<u8>, i32)> = vec![
            (vec![0x06], 3),
            (vec![0x7B], -3),
            (vec![0x80, 0x80], 64),
            (vec![0x01], -64),
            (vec![0xC0, 0x00, 0x40, 0x00], 8192),
            (vec![0x80, 0x01], -8192),
            (vec![0xDF, 0xFF, 0xFF, 0xFE], 268_435_455),
            (vec![0xC0, 0x00, 0x00, 0x01], -268_435_456),
        ];

        for (input, expected) in cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_int().unwrap(), expected, "{input:02X?}");
        }
    }

    #[test]
    fn compressed_token() {
        let mut parser = Parser::new(&[0x49, 0x0A, 0x10]);
        assert_eq!(parser.read_compressed_token().unwrap().value(), 0x0100_0012);
        assert_eq!(parser.read_compressed_token().unwrap().value(), 0x1B00_0002);
        assert_eq!(parser.read_compressed_token().unwrap().value(), 0x0200_0004);
    }

    #[test]
    fn ser_string() {
        let data = [0xFF, 0x03, b'a', b'b', b'c'];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_ser_string().unwrap(), None);
        assert_eq!(parser.read_ser_string().unwrap(), Some("abc"));
    }

    #[test]
    fn align_and_seek() {
        let data = [0u8; 8];
        let mut parser = Parser::new(&data);
        parser.advance_by(1).unwrap();
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 4);
        parser.seek(8).unwrap();
        assert!(!parser.has_more_data());
        assert!(parser.seek(9).is_err());
    }

    #[test]
    fn transactional_restores_position() {
        let data = [0x01, 0x02];
        let mut parser = Parser::new(&data);
        let result: Result<u32> = parser.transactional(|p| {
            p.read_le::<u8>()?;
            p.read_le::<u32>()
        });
        assert!(result.is_err());
        assert_eq!(parser.pos(), 0);
    }
}
