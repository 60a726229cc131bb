//! `#Strings` heap (ECMA-335 II.24.2.3).
//!
//! NUL-terminated UTF-8 identifiers. Offset 0 is the empty string. Entries may share
//! suffixes, so an offset can point into the middle of another string.

use std::{collections::HashMap, ffi::CStr};

use dashmap::DashMap;

use crate::{
    metadata::streams::{HeapRead, HeapWrite},
    Result,
};

/// Reader over a `#Strings` heap.
///
/// # Examples
///
/// ```rust
/// use cilpe::metadata::streams::{HeapRead, Strings};
///
/// let data = [0x00, b'F', b'o', b'o', 0x00];
/// let strings = Strings::from(&data)?;
/// assert_eq!(strings.get(1), Some("Foo"));
/// assert_eq!(strings.get(2), Some("oo"));
/// assert_eq!(strings.get(9), None);
/// # Ok::<(), cilpe::Error>(())
/// ```
pub struct Strings<'a> {
    data: &'a [u8],
    cache: DashMap<u32, Option<&'a str>>,
}

impl<'a> Strings<'a> {
    /// Wrap heap bytes. An empty slice is accepted for modules without the stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the empty string.
    pub fn from(data: &'a [u8]) -> Result<Strings<'a>> {
        if !data.is_empty() && data[0] != 0 {
            return Err(malformed_error!("#Strings heap does not start with a NUL byte"));
        }

        Ok(Strings {
            data,
            cache: DashMap::new(),
        })
    }

    /// Raw heap bytes
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> HeapRead for Strings<'a> {
    type Value = &'a str;
    const NAME: &'static str = "#Strings";

    fn decode(&self, index: u32) -> Result<&'a str> {
        let index = index as usize;
        if index == 0 && self.data.is_empty() {
            return Ok("");
        }
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let Ok(c_str) = CStr::from_bytes_until_nul(&self.data[index..]) else {
            return Err(malformed_error!("Unterminated string at index - {}", index));
        };

        c_str
            .to_str()
            .map_err(|_| malformed_error!("Invalid UTF-8 string at index - {}", index))
    }

    fn cache(&self) -> &DashMap<u32, Option<&'a str>> {
        &self.cache
    }
}

/// Builder of a `#Strings` heap.
#[derive(Clone, Debug)]
pub struct StringHeapBuilder {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl Default for StringHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StringHeapBuilder {
    /// A heap holding only the empty string
    #[must_use]
    pub fn new() -> Self {
        StringHeapBuilder {
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

        let mut builder = StringHeapBuilder {
            data: data.to_vec(),
            index: HashMap::new(),
        };

        let mut start = 1;
        while start < data.len() {
            let Some(length) = data[start..].iter().position(|byte| *byte == 0) else {
                break;
            };
            if let Ok(text) = std::str::from_utf8(&data[start..start + length]) {
                builder.index.entry(text.to_string()).or_insert(start as u32);
            }
            start += length + 1;
        }

        builder
    }
}

impl HeapWrite for StringHeapBuilder {
    type Value = str;

    fn register(&mut self, value: Option<&str>) -> Result<u32> {
        let Some(text) = value.filter(|text| !text.is_empty()) else {
            return Ok(0);
        };

        if let Some(offset) = self.index.get(text) {
            return Ok(*offset);
        }

        if text.as_bytes().contains(&0) {
            return Err(malformed_error!("Identifier '{}' contains a NUL byte", text.escape_debug()));
        }

        let Ok(offset) = u32::try_from(self.data.len()) else {
            return Err(malformed_error!("#Strings heap overflow"));
        };

        self.data.extend_from_slice(text.as_bytes());
        self.data.push(0);
        self.index.insert(text.to_string(), offset);
        Ok(offset)
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}
