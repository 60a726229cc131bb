//! `#Blob` heap (ECMA-335 II.24.2.4).
//!
//! Binary entries prefixed by a compressed length: signatures, constants,
//! custom-attribute values, marshal and permission-set descriptors. Offset 0 is the
//! empty blob.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::{
    file::{parser::Parser, writer::write_compressed_uint},
    metadata::streams::{HeapRead, HeapWrite},
    Result,
};

/// Reader over a `#Blob` heap.
pub struct Blob<'a> {
    data: &'a [u8],
    cache: DashMap<u32, Option<&'a [u8]>>,
}

impl<'a> Blob<'a> {
    /// Wrap heap bytes. An empty slice is accepted for modules without the stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the empty blob.
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        if !data.is_empty() && data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #Blob heap"));
        }

        Ok(Blob {
            data,
            cache: DashMap::new(),
        })
    }

    /// Raw heap bytes
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Iterate over all entries in heap order, as `(offset, bytes)`
    #[must_use]
    pub fn iter(&self) -> BlobIterator<'_, 'a> {
        BlobIterator {
            blob: self,
            position: 1,
        }
    }
}

impl<'a> HeapRead for Blob<'a> {
    type Value = &'a [u8];
    const NAME: &'static str = "#Blob";

    fn decode(&self, index: u32) -> Result<&'a [u8]> {
        let index = index as usize;
        if index == 0 && self.data.is_empty() {
            return Ok(&[]);
        }
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        parser.read_bytes(len)
    }

    fn cache(&self) -> &DashMap<u32, Option<&'a [u8]>> {
        &self.cache
    }
}

/// Iterator over the entries of a [`Blob`] heap.
///
/// Stops after the first malformed entry, which is yielded as an error.
pub struct BlobIterator<'b, 'a> {
    blob: &'b Blob<'a>,
    position: usize,
}

impl<'a> Iterator for BlobIterator<'_, 'a> {
    type Item = Result<(u32, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.blob.data.len() {
            return None;
        }

        let start = self.position;
        let mut parser = Parser::new(&self.blob.data[start..]);
        let entry = parser
            .read_compressed_uint()
            .and_then(|len| parser.read_bytes(len as usize));

        match entry {
            Ok(bytes) => {
                self.position += parser.pos();
                Some(Ok((start as u32, bytes)))
            }
            Err(error) => {
                self.position = self.blob.data.len();
                Some(Err(error))
            }
        }
    }
}

/// Builder of a `#Blob` heap.
#[derive(Clone, Debug)]
pub struct BlobHeapBuilder {
    data: Vec<u8>,
    index: HashMap<Vec<u8>, u32>,
}

impl Default for BlobHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobHeapBuilder {
    /// A heap holding only the empty blob
    #[must_use]
    pub fn new() -> Self {
        BlobHeapBuilder {
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

        let mut builder = BlobHeapBuilder {
            data: data.to_vec(),
            index: HashMap::new(),
        };

        let reader = Blob {
            data,
            cache: DashMap::new(),
        };
        for (offset, bytes) in reader.iter().flatten() {
            if !bytes.is_empty() {
                builder.index.entry(bytes.to_vec()).or_insert(offset);
            }
        }

        builder
    }
}

impl HeapWrite for BlobHeapBuilder {
    type Value = [u8];

    fn register(&mut self, value: Option<&[u8]>) -> Result<u32> {
        let Some(bytes) = value.filter(|bytes| !bytes.is_empty()) else {
            return Ok(0);
        };

        if let Some(offset) = self.index.get(bytes) {
            return Ok(*offset);
        }

        let (Ok(offset), Ok(len)) = (u32::try_from(self.data.len()), u32::try_from(bytes.len()))
        else {
            return Err(malformed_error!("#Blob heap overflow"));
        };

        write_compressed_uint(len, &mut self.data)?;
        self.data.extend_from_slice(bytes);
        self.index.insert(bytes.to_vec(), offset);
        Ok(offset)
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
        let data = {
            let mut data = vec![0xCC; 66080];
            /* i - 0    - empty blob       */ data[0]          = 0b_00000000_u8;

            /* i - 1    - len 10           */ data[1]          = 0b_00001010_u8;
            /* i - 1    - len 10           */ data[2..12]      .copy_from_slice(&[0x0A; 10]);

            /* i - 12   - len 5            */ data[12]         = 0b_00000101_u8;
            /* i - 12   - len 5            */ data[13..18]     .copy_from_slice(&[0xAB; 5]);

            /* i - 18   - invalid prefix   */ data[18]         = 0b_11111111_u8;

            /* i - 19   - len 257          */ data[19]         = 0b_10000001_u8;
            /* i - 19   - len 257          */ data[20]         = 0b_00000001_u8;
            /* i - 19   - len 257          */ data[21..278]    .copy_from_slice(&[0xBA; 257]);

            /* i - 278  - len 65793        */ data[278]        = 0b_11000000_u8;
            /* i - 278  - len 65793        */ data[279]        = 0b_00000001_u8;
            /* i - 278  - len 65793        */ data[280]        = 0b_00000001_u8;
            /* i - 278  - len 65793        */ data[281]        = 0b_00000001_u8;
            /* i - 278  - len 65793        */ data[282..66075] .copy_from_slice(&[0xBA; 65793]);

            data
        };

        let blob = Blob::from(&data).unwrap();

        assert_eq!(blob.get(0).unwrap().len(), 0);
        assert_eq!(blob.get(1).unwrap(), &[0x0A; 10]);
        assert_eq!(blob.get(12).unwrap(), &[0xAB; 5]);
        assert!(blob.decode(18).is_err());
        assert_eq!(blob.get(18), None);
        assert_eq!(blob.get(19).unwrap(), &[0xBA; 257]);
        assert_eq!(blob.get(278).unwrap().len(), 65793);
        assert_eq!(blob.get(66080), None);
    }

    #[test]
    fn iterator() {
        let data = [0x00, 0x02, 0x41, 0x42, 0x00, 0x01, 0x43];
        let blob = Blob::from(&data).unwrap();

        let entries: Vec<_> = blob.iter().map(|entry| entry.unwrap()).collect();
        assert_eq!(
            entries,
            vec![(1, &[0x41, 0x42][..]), (4, &[][..]), (5, &[0x43][..])]
        );
    }

    #[test]
    fn iterator_truncated() {
        let data = [0x00, 0x05, 0x41, 0x42, 0x43];
        let blob = Blob::from(&data).unwrap();
        let mut iter = blob.iter();

        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn dedup() {
        let mut builder = BlobHeapBuilder::new();
        let first = builder.register(Some(&[0x20, 0x00, 0x01])).unwrap();
        let second = builder.register(Some(&[0x06, 0x08])).unwrap();
        assert_eq!(builder.register(Some(&[0x20, 0x00, 0x01])).unwrap(), first);
        assert_eq!(builder.register(Some(&[])).unwrap(), 0);
        assert_eq!(builder.register(None).unwrap(), 0);

        assert_eq!(first, 1);
        assert_eq!(second, 5);
        assert_eq!(builder.data(), &[0x00, 0x03, 0x20, 0x00, 0x01, 0x02, 0x06, 0x08]);
    }

    #[test]
    fn long_entries() {
        let mut builder = BlobHeapBuilder::new();
        let payload = vec![0x5A; 0x4000];
        let offset = builder.register(Some(&payload)).unwrap();
        assert_eq!(&builder.data()[1..5], &[0xC0, 0x00, 0x40, 0x00]);

        let blob = Blob::from(builder.data()).unwrap();
        assert_eq!(blob.get(offset).unwrap(), &payload[..]);
    }

    #[test]
    fn seeded() {
        let mut original = BlobHeapBuilder::new();
        let sig = original.register(Some(&[0x00, 0x00, 0x01])).unwrap();

        let mut builder = BlobHeapBuilder::from_existing(&original.to_stream());
        assert_eq!(builder.register(Some(&[0x00, 0x00, 0x01])).unwrap(), sig);
        assert!(builder.register(Some(&[0x07])).unwrap() > sig);
    }
}
