//! Metadata streams.
//!
//! The metadata root lists its streams by name. Four of them are heaps referenced by
//! offset (or 1-based index for GUIDs) from table columns and IL operands:
//!
//! | Stream     | Reader          | Builder                    | Content                          |
//! |------------|-----------------|----------------------------|----------------------------------|
//! | `#Strings` | [`Strings`]     | [`StringHeapBuilder`]      | NUL-terminated UTF-8 identifiers |
//! | `#US`      | [`UserStrings`] | [`UserStringHeapBuilder`]  | length-prefixed UTF-16 literals  |
//! | `#Blob`    | [`Blob`]        | [`BlobHeapBuilder`]        | length-prefixed byte ranges      |
//! | `#GUID`    | [`Guid`]        | [`GuidHeapBuilder`]        | 16-byte GUIDs, 1-based           |
//!
//! Readers share [`HeapRead`]: lookups decode lazily, memoize per offset, and report
//! broken entries as `None` so one bad entry does not prevent loading a module.
//! Builders share [`HeapWrite`]: registering equal content twice returns the same
//! offset, and `None` always maps to the reserved null entry 0.

mod blob;
mod guid;
mod streamheader;
mod strings;
mod userstrings;

pub use blob::{Blob, BlobHeapBuilder, BlobIterator};
pub use guid::{Guid, GuidHeapBuilder};
pub use streamheader::StreamHeader;
pub use strings::{StringHeapBuilder, Strings};
pub use userstrings::{UserStringHeapBuilder, UserStrings};

use dashmap::DashMap;
use tracing::warn;

use crate::Result;

/// Largest heap size addressable with 2-byte indexes
pub const SMALL_HEAP_LIMIT: usize = 0xFFFF;

/// Read side of a heap.
pub trait HeapRead {
    /// Decoded value type
    type Value: Clone;

    /// Name of the stream, for diagnostics
    const NAME: &'static str;

    /// Decode the entry at `index` without consulting the cache.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range or the entry is malformed.
    fn decode(&self, index: u32) -> Result<Self::Value>;

    /// The memo cache backing [`HeapRead::get`]
    fn cache(&self) -> &DashMap<u32, Option<Self::Value>>;

    /// Memoized lookup. Failures are cached as `None` as well.
    fn get(&self, index: u32) -> Option<Self::Value> {
        if let Some(cached) = self.cache().get(&index) {
            return cached.value().clone();
        }

        let value = match self.decode(index) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(heap = Self::NAME, index, %error, "unresolved heap entry");
                None
            }
        };

        self.cache().insert(index, value.clone());
        value
    }
}

/// Write side of a heap.
pub trait HeapWrite {
    /// Registered value type
    type Value: ?Sized;

    /// Register `value` and return its offset (or index for GUIDs).
    ///
    /// `None` returns 0 without touching the heap; equal content returns the offset of
    /// its first registration.
    ///
    /// # Errors
    /// Returns an error if the value cannot be stored or the heap overflows.
    fn register(&mut self, value: Option<&Self::Value>) -> Result<u32>;

    /// Raw heap bytes as built so far
    fn data(&self) -> &[u8];

    /// True once the heap needs 4-byte indexes
    fn is_wide(&self) -> bool {
        self.data().len() > SMALL_HEAP_LIMIT
    }

    /// Heap bytes padded to a 4-byte boundary, ready to be placed in the metadata
    fn to_stream(&self) -> Vec<u8> {
        let mut bytes = self.data().to_vec();
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
    }
}
