//! Stream headers of the metadata root (ECMA-335 II.24.2.2).

use crate::{
    file::{io::push_le, parser::Parser},
    Result,
};

/// Longest stream name, including its terminator
const MAX_NAME_LENGTH: usize = 32;

/// Location and name of one metadata stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset from the start of the metadata root
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
    /// Stream name such as `#~` or `#Strings`
    pub name: String,
}

impl StreamHeader {
    /// Parse a header at the current position of `parser`, leaving it after the
    /// 4-byte aligned name.
    ///
    /// # Errors
    /// Returns an error for truncated input or names that are not NUL-terminated ASCII.
    pub fn read(parser: &mut Parser) -> Result<StreamHeader> {
        let offset = parser.read_le::<u32>()?;
        let size = parser.read_le::<u32>()?;

        let start = parser.pos();
        let window = &parser.data()[start..];
        let Some(length) = window
            .iter()
            .take(MAX_NAME_LENGTH)
            .position(|byte| *byte == 0)
        else {
            return Err(malformed_error!("Stream name at {} is not terminated", start));
        };

        let name_bytes = &window[..length];
        if !name_bytes.is_ascii() {
            return Err(malformed_error!("Stream name at {} is not ASCII", start));
        }
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        parser.seek(start + padded_name_length(length))?;

        Ok(StreamHeader { offset, size, name })
    }

    /// Parse a single header from the start of `data`.
    ///
    /// # Errors
    /// See [`StreamHeader::read`].
    pub fn from(data: &[u8]) -> Result<StreamHeader> {
        let mut parser = Parser::new(data);
        Self::read(&mut parser)
    }

    /// Serialized size of this header
    #[must_use]
    pub fn size_on_disk(&self) -> usize {
        8 + padded_name_length(self.name.len())
    }

    /// Append the header to `buffer`.
    ///
    /// # Errors
    /// Returns an error if the name is too long or contains NUL.
    pub fn write(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if self.name.len() >= MAX_NAME_LENGTH || self.name.as_bytes().contains(&0) {
            return Err(malformed_error!("Invalid stream name - {}", self.name));
        }

        push_le(buffer, self.offset);
        push_le(buffer, self.size);
        buffer.extend_from_slice(self.name.as_bytes());
        let padding = padded_name_length(self.name.len()) - self.name.len();
        buffer.resize(buffer.len() + padding, 0);
        Ok(())
    }

    /// Check that the stream fits inside a metadata blob of `metadata_len` bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if it does not.
    pub fn check_bounds(&self, metadata_len: usize) -> Result<()> {
        let end = u64::from(self.offset) + u64::from(self.size);
        if end > metadata_len as u64 {
            return Err(out_of_bounds_error!());
        }
        Ok(())
    }
}

/// Name length including the terminator, rounded up to 4
fn padded_name_length(length: usize) -> usize {
    (length + 1 + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let header_bytes = [
            0x6C, 0x00, 0x00, 0x00,
            0xA4, 0x45, 0x00, 0x00,
            0x23, 0x7E, 0x00, 0x00,
        ];

        let header = StreamHeader::from(&header_bytes).unwrap();
        assert_eq!(header.offset, 0x6C);
        assert_eq!(header.size, 0x45A4);
        assert_eq!(header.name, "#~");
        assert_eq!(header.size_on_disk(), 12);
    }

    #[test]
    fn consecutive_headers() {
        let mut bytes = Vec::new();
        let strings = StreamHeader {
            offset: 0x100,
            size: 0x20,
            name: "#Strings".to_string(),
        };
        let us = StreamHeader {
            offset: 0x120,
            size: 0x8,
            name: "#US".to_string(),
        };
        strings.write(&mut bytes).unwrap();
        us.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 8 + 12 + 8 + 4);

        let mut parser = Parser::new(&bytes);
        assert_eq!(StreamHeader::read(&mut parser).unwrap(), strings);
        assert_eq!(StreamHeader::read(&mut parser).unwrap(), us);
        assert!(!parser.has_more_data());
    }

    #[test]
    fn unterminated() {
        let mut bytes = vec![0u8; 8];
        bytes.extend_from_slice(b"#Strings");
        assert!(StreamHeader::from(&bytes).is_err());
    }

    #[test]
    fn bounds() {
        let header = StreamHeader {
            offset: 0x10,
            size: 0x10,
            name: "#Blob".to_string(),
        };
        assert!(header.check_bounds(0x20).is_ok());
        assert!(header.check_bounds(0x1F).is_err());
    }
}
