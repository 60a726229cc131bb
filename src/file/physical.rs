//! Memory-mapped backend for images on disk.

use std::{fs, path::Path};

use memmap2::Mmap;

use super::Backend;
use crate::Result;

/// A [`Backend`] over a read-only memory map of a file.
///
/// Pages are loaded on demand, so opening a large image is cheap even when only the
/// metadata is read.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;

        // SAFETY: the map is read-only; modifying the file while it is mapped is outside
        // what this crate can guard against, as with every mmap-based reader.
        let data = unsafe { Mmap::map(&file) }?;

        Ok(Physical { data })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if offset_end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
