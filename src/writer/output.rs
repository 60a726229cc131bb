//! Memory-mapped output file.
//!
//! [`Output`] creates the target file at its final size, maps it and hands out
//! bounds-checked writes. A file that is dropped without [`Output::finalize`] is
//! removed again, so a failed write never leaves a truncated image on disk.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilpe::writer::Output;
//!
//! let mut output = Output::create("out.dll", 4096)?;
//! output.write_at(0, b"MZ")?;
//! output.finalize()?;
//! # Ok::<(), cilpe::Error>(())
//! ```

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use crate::Result;

/// A memory-mapped file that deletes itself unless finalized.
pub struct Output {
    mmap: MmapMut,
    target_path: PathBuf,
    finalized: bool,
}

impl Output {
    /// Create `target_path` with `size` zero bytes and map it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] if the file cannot be created, sized or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target_path)?;
        file.set_len(size)?;

        // SAFETY: the file was just created and truncated by us; the map is the only
        // writer for its lifetime.
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }?;

        Ok(Self {
            mmap,
            target_path,
            finalized: false,
        })
    }

    /// The whole file
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// Write `data` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the write would exceed the file.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let Ok(start) = usize::try_from(offset) else {
            return Err(out_of_bounds_error!());
        };
        let Some(end) = start.checked_add(data.len()) else {
            return Err(out_of_bounds_error!());
        };
        if end > self.mmap.len() {
            return Err(out_of_bounds_error!());
        }

        self.mmap[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Size of the file
    #[must_use]
    pub fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Where the file lives
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Flush the map and keep the file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] if flushing fails; the file is then removed.
    pub fn finalize(mut self) -> Result<()> {
        self.mmap.flush()?;
        self.finalized = true;
        debug!(path = %self.target_path.display(), size = self.mmap.len(), "finalized output");
        Ok(())
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = std::fs::remove_file(&self.target_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_and_finalize() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image.bin");

        let mut output = Output::create(&path, 16).unwrap();
        assert_eq!(output.size(), 16);
        output.write_at(0, b"MZ").unwrap();
        output.write_at(12, &0x1234_5678u32.to_le_bytes()).unwrap();
        output.as_mut_slice()[2] = 0x90;
        output.finalize().unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(&contents[..3], &[b'M', b'Z', 0x90]);
        assert_eq!(&contents[12..], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn bounds() {
        let dir = tempdir().unwrap();
        let mut output = Output::create(dir.path().join("image.bin"), 10).unwrap();
        assert!(output.write_at(8, b"too long").is_err());
        assert!(output.write_at(u64::MAX, b"x").is_err());
        output.write_at(8, b"ok").unwrap();
    }

    #[test]
    fn unfinalized_file_is_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image.bin");
        {
            let mut output = Output::create(&path, 8).unwrap();
            output.write_at(0, b"partial").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
