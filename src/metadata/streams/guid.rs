//! `#GUID` heap (ECMA-335 II.24.2.5).
//!
//! A packed array of 16-byte GUIDs addressed by 1-based index; index 0 is the null GUID.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::{
    metadata::streams::{HeapRead, HeapWrite, SMALL_HEAP_LIMIT},
    Result,
};

const GUID_SIZE: usize = 16;

/// Reader over a `#GUID` heap.
pub struct Guid<'a> {
    data: &'a [u8],
    cache: DashMap<u32, Option<uguid::Guid>>,
}

impl<'a> Guid<'a> {
    /// Wrap heap bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap is not a whole number of GUIDs.
    pub fn from(data: &'a [u8]) -> Result<Guid<'a>> {
        if data.len() % GUID_SIZE != 0 {
            return Err(malformed_error!(
                "#GUID heap size {} is not a multiple of 16",
                data.len()
            ));
        }

        Ok(Guid {
            data,
            cache: DashMap::new(),
        })
    }

    /// Number of GUIDs stored
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.len() / GUID_SIZE
    }
}

impl HeapRead for Guid<'_> {
    type Value = uguid::Guid;
    const NAME: &'static str = "#GUID";

    fn decode(&self, index: u32) -> Result<uguid::Guid> {
        let index = index as usize;
        if index == 0 {
            return Ok(uguid::Guid::ZERO);
        }
        if index > self.count() {
            return Err(out_of_bounds_error!());
        }

        let start = (index - 1) * GUID_SIZE;
        let mut buffer = [0u8; GUID_SIZE];
        buffer.copy_from_slice(&self.data[start..start + GUID_SIZE]);

        Ok(uguid::Guid::from_bytes(buffer))
    }

    fn cache(&self) -> &DashMap<u32, Option<uguid::Guid>> {
        &self.cache
    }
}

/// Builder of a `#GUID` heap.
#[derive(Clone, Debug, Default)]
pub struct GuidHeapBuilder {
    data: Vec<u8>,
    index: HashMap<[u8; GUID_SIZE], u32>,
}

impl GuidHeapBuilder {
    /// An empty heap
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing heap bytes, keeping every existing index valid.
    #[must_use]
    pub fn from_existing(data: &[u8]) -> Self {
        let mut builder = GuidHeapBuilder::new();
        for chunk in data.chunks_exact(GUID_SIZE) {
            let mut bytes = [0u8; GUID_SIZE];
            bytes.copy_from_slice(chunk);
            builder.data.extend_from_slice(chunk);
            let index = builder.count() as u32;
            builder.index.entry(bytes).or_insert(index);
        }
        builder
    }

    /// Number of GUIDs stored
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.len() / GUID_SIZE
    }
}

impl HeapWrite for GuidHeapBuilder {
    type Value = uguid::Guid;

    fn register(&mut self, value: Option<&uguid::Guid>) -> Result<u32> {
        let Some(guid) = value else {
            return Ok(0);
        };

        let bytes = guid.to_bytes();
        if let Some(index) = self.index.get(&bytes) {
            return Ok(*index);
        }

        let Ok(index) = u32::try_from(self.count() + 1) else {
            return Err(malformed_error!("#GUID heap overflow"));
        };

        self.data.extend_from_slice(&bytes);
        self.index.insert(bytes, index);
        Ok(index)
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn is_wide(&self) -> bool {
        self.count() > SMALL_HEAP_LIMIT
    }
}
