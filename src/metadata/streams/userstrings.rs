//! `#US` heap (ECMA-335 II.24.2.4).
//!
//! Each entry is a compressed byte length followed by UTF-16LE code units and one
//! trailing flag byte. The flag is 1 when any character needs more than plain
//! byte-wise comparison (a non-zero high byte, or a low byte in
//! `0x01..=0x08`, `0x0E..=0x1F`, `0x27`, `0x2D`, `0x7F`).

use std::collections::HashMap;

use dashmap::DashMap;
use widestring::U16Str;

use crate::{
    file::{parser::Parser, writer::write_compressed_uint},
    metadata::streams::{HeapRead, HeapWrite},
    Result,
};

/// Largest offset reachable through a user-string token
const MAX_USER_STRING_OFFSET: usize = 0x00FF_FFFF;

/// Reader over a `#US` heap.
pub struct UserStrings<'a> {
    data: &'a [u8],
    cache: DashMap<u32, Option<String>>,
}

impl<'a> UserStrings<'a> {
    /// Wrap heap bytes. An empty slice is accepted for modules without the stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with a null entry.
    pub fn from(data: &'a [u8]) -> Result<UserStrings<'a>> {
        if !data.is_empty() && data[0] != 0 {
            return Err(malformed_error!("#US heap does not start with a null entry"));
        }

        Ok(UserStrings {
            data,
            cache: DashMap::new(),
        })
    }

    /// Raw heap bytes
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// The raw entry at `index`: UTF-16 code units and the trailing flag byte.
    ///
    /// # Errors
    /// Returns an error for out-of-range offsets or inconsistent length prefixes.
    pub fn entry(&self, index: u32) -> Result<(Vec<u16>, u8)> {
        let index = index as usize;
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(&self.data[index..]);
        let length = parser.read_compressed_uint()? as usize;
        if length == 0 {
            return Ok((Vec::new(), 0));
        }
        if length % 2 == 0 {
            return Err(malformed_error!(
                "User string at index {} has even length {}",
                index,
                length
            ));
        }

        let bytes = parser.read_bytes(length)?;
        let units = bytes[..length - 1]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok((units, bytes[length - 1]))
    }
}

impl HeapRead for UserStrings<'_> {
    type Value = String;
    const NAME: &'static str = "#US";

    fn decode(&self, index: u32) -> Result<String> {
        let (units, _) = self.entry(index)?;
        U16Str::from_slice(&units)
            .to_string()
            .map_err(|_| malformed_error!("Invalid UTF-16 user string at index - {}", index))
    }

    fn cache(&self) -> &DashMap<u32, Option<String>> {
        &self.cache
    }
}

/// Builder of a `#US` heap.
#[derive(Clone, Debug)]
pub struct UserStringHeapBuilder {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl Default for UserStringHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStringHeapBuilder {
    /// A heap holding only the null entry
    #[must_use]
    pub fn new() -> Self {
        UserStringHeapBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Start from existing heap bytes, keeping every existing offset valid.
    #[must_use]
    pub fn from_existing(data: &[u8]) -> Self {
        if data.is_empty() {
            return Self::new();
        }

        let mut builder = UserStringHeapBuilder {
            data: data.to_vec(),
            index: HashMap::new(),
        };

        let reader = UserStrings { data, cache: DashMap::new() };
        let mut position = 1;
        while position < data.len() {
            let mut parser = Parser::new(&data[position..]);
            let Ok(length) = parser.read_compressed_uint() else {
                break;
            };
            if length == 0 {
                // trailing padding
                position += 1;
                continue;
            }
            if let Ok(text) = reader.decode(position as u32) {
                builder.index.entry(text).or_insert(position as u32);
            }
            position += parser.pos() + length as usize;
        }

        builder
    }

    /// The trailing flag byte for `units`
    #[must_use]
    pub fn special_flag(units: &[u16]) -> u8 {
        let special = units.iter().any(|unit| {
            *unit > 0xFF
                || matches!(*unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
        });
        u8::from(special)
    }
}

impl HeapWrite for UserStringHeapBuilder {
    type Value = str;

    fn register(&mut self, value: Option<&str>) -> Result<u32> {
        let Some(text) = value else {
            return Ok(0);
        };

        if let Some(offset) = self.index.get(text) {
            return Ok(*offset);
        }

        let offset = self.data.len();
        if offset > MAX_USER_STRING_OFFSET {
            return Err(malformed_error!("#US heap exceeds the user-string token range"));
        }

        let units: Vec<u16> = text.encode_utf16().collect();
        let Ok(length) = u32::try_from(units.len() * 2 + 1) else {
            return Err(malformed_error!("User string too long"));
        };

        write_compressed_uint(length, &mut self.data)?;
        for unit in &units {
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        self.data.push(Self::special_flag(&units));

        self.index.insert(text.to_string(), offset as u32);
        Ok(offset as u32)
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data: [u8; 32] = [
            0x00, 0x1b, 0x48, 0x00, 0x65, 0x00, 0x6c, 0x00, 0x6c, 0x00, 0x6f, 0x00, 0x2c, 0x00, 0x20, 0x00,
            0x57, 0x00, 0x6f, 0x00, 0x72, 0x00, 0x6c, 0x00, 0x64, 0x00, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let strings = UserStrings::from(&data).unwrap();
        assert_eq!(strings.get(1).as_deref(), Some("Hello, World!"));
        assert_eq!(strings.entry(1).unwrap().1, 0);
        assert_eq!(strings.get(0).as_deref(), Some(""));
    }

    #[test]
    fn invalid() {
        assert!(UserStrings::from(&[0x22, 0x00]).is_err());

        let strings = UserStrings::from(&[0x00, 0x09, 0x41, 0x00]).unwrap();
        assert_eq!(strings.get(1), None);
        assert_eq!(strings.get(100), None);

        let strings = UserStrings::from(&[0x00, 0x04, 0x41, 0x00, 0x42, 0x00]).unwrap();
        assert!(strings.decode(1).is_err());
    }

    #[test]
    fn register_and_read_back() {
        let mut builder = UserStringHeapBuilder::new();
        let hello = builder.register(Some("Hello")).unwrap();
        let quote = builder.register(Some("it's")).unwrap();
        let greek = builder.register(Some("\u{3a9}mega")).unwrap();
        assert_eq!(builder.register(Some("Hello")).unwrap(), hello);
        assert_eq!(builder.register(None).unwrap(), 0);

        assert_eq!(hello, 1);
        assert_eq!(builder.data()[1], 11);
        assert_eq!(builder.data()[12], 0);

        let strings = UserStrings::from(builder.data()).unwrap();
        assert_eq!(strings.get(hello).as_deref(), Some("Hello"));
        assert_eq!(strings.get(quote).as_deref(), Some("it's"));
        assert_eq!(strings.entry(quote).unwrap().1, 1);
        assert_eq!(strings.get(greek).as_deref(), Some("\u{3a9}mega"));
        assert_eq!(strings.entry(greek).unwrap().1, 1);
    }

    #[test]
    fn empty_string_is_an_entry() {
        let mut builder = UserStringHeapBuilder::new();
        let empty = builder.register(Some("")).unwrap();
        assert_eq!(empty, 1);
        assert_eq!(builder.data(), &[0x00, 0x01, 0x00]);
    }

    #[test]
    fn seeded() {
        let mut original = UserStringHeapBuilder::new();
        let first = original.register(Some("first")).unwrap();
        let second = original.register(Some("second")).unwrap();

        let mut builder = UserStringHeapBuilder::from_existing(&original.to_stream());
        assert_eq!(builder.register(Some("second")).unwrap(), second);
        assert_eq!(builder.register(Some("first")).unwrap(), first);
    }
}
