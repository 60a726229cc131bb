//! PE input and the primitive byte codec.
//!
//! [`File`] wraps a PE image held by a [`Backend`], either an owned buffer
//! ([`Memory`]) or a memory-mapped file ([`Physical`]). Headers are parsed once with
//! `goblin` when the file is loaded; the CLR runtime header directory must be present.
//! Section headers feed an [`RvaConverter`], which all RVA-bearing reads go through.
//!
//! The codec primitives live in submodules:
//! - [`io`] fixed-width little-endian reads and writes
//! - [`parser`] a read cursor with ECMA-335 compressed integers
//! - [`writer`] the compressed encodings on the write side
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilpe::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("tests/samples/hello.dll"))?;
//! let (clr_rva, clr_size) = file.clr();
//! let offset = file.rva_to_offset(clr_rva)?;
//! println!("CLI header at 0x{offset:X}, {clr_size} bytes");
//! # Ok::<(), cilpe::Error>(())
//! ```

pub mod io;
mod memory;
pub mod parser;
mod physical;
mod rva;
pub mod writer;

pub use memory::Memory;
pub use physical::Physical;
pub use rva::{
    RvaConverter, Section, SCN_CNT_CODE, SCN_CNT_INITIALIZED_DATA, SCN_MEM_DISCARDABLE,
    SCN_MEM_EXECUTE, SCN_MEM_READ, SECTION_HEADER_SIZE,
};

use std::path::Path;

use goblin::pe::{
    data_directories::{DataDirectory, DataDirectoryType},
    PE,
};
use tracing::debug;

use crate::{Error, Result};

/// Magic of a PE32 optional header
pub const PE32_MAGIC: u16 = 0x10B;
/// Magic of a PE32+ optional header
pub const PE32_PLUS_MAGIC: u16 = 0x20B;

/// A source of image bytes.
pub trait Backend: Send + Sync {
    /// A bounds-checked slice of the data.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// All data
    fn data(&self) -> &[u8];

    /// Length of the data
    fn len(&self) -> usize;
}

/// A loaded PE image carrying a CLI header.
pub struct File {
    data: Box<dyn Backend>,
    is_pe32_plus: bool,
    machine: u16,
    timestamp: u32,
    characteristics: u16,
    image_base: u64,
    file_alignment: u32,
    section_alignment: u32,
    subsystem: u16,
    checksum: u32,
    directories: Vec<(DataDirectoryType, DataDirectory)>,
    imports: Vec<(String, String)>,
    converter: RvaConverter,
}

impl File {
    /// Load and map the image at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] if the file cannot be mapped, [`crate::Error::Goblin`]
    /// if it is not a PE image, or [`crate::Error::Malformed`] if it has no CLR header.
    pub fn from_file(path: &Path) -> Result<File> {
        Self::load(Physical::new(path)?)
    }

    /// Load an image from memory.
    ///
    /// # Errors
    /// See [`Self::from_file`]; also [`crate::Error::Empty`] for empty input.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        Self::load(Memory::new(data))
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Error::Empty);
        }

        let pe = PE::parse(data.data())?;
        let Some(optional_header) = pe.header.optional_header else {
            return Err(malformed_error!("File does not have an OptionalHeader"));
        };

        let directories: Vec<_> = optional_header.data_directories.dirs().collect();
        if !directories.iter().any(|(directory_type, directory)| {
            *directory_type == DataDirectoryType::ClrRuntimeHeader && directory.virtual_address != 0
        }) {
            return Err(malformed_error!("File does not have a CLR runtime header directory"));
        }

        let sections = pe
            .sections
            .iter()
            .map(|section| Section {
                name: String::from_utf8_lossy(&section.name)
                    .trim_end_matches('\0')
                    .to_string(),
                virtual_size: section.virtual_size,
                virtual_address: section.virtual_address,
                size_of_raw_data: section.size_of_raw_data,
                pointer_to_raw_data: section.pointer_to_raw_data,
                characteristics: section.characteristics,
            })
            .collect::<Vec<_>>();

        let imports = pe
            .imports
            .iter()
            .map(|import| (import.dll.to_string(), import.name.to_string()))
            .collect();

        debug!(
            size = data.len(),
            sections = sections.len(),
            pe32_plus = pe.is_64,
            "loaded PE image"
        );

        let file = File {
            is_pe32_plus: optional_header.standard_fields.magic == PE32_PLUS_MAGIC,
            machine: pe.header.coff_header.machine,
            timestamp: pe.header.coff_header.time_date_stamp,
            characteristics: pe.header.coff_header.characteristics,
            image_base: optional_header.windows_fields.image_base,
            file_alignment: optional_header.windows_fields.file_alignment,
            section_alignment: optional_header.windows_fields.section_alignment,
            subsystem: optional_header.windows_fields.subsystem,
            checksum: optional_header.windows_fields.check_sum,
            directories,
            imports,
            converter: RvaConverter::new(sections),
            data: Box::new(data),
        };
        Ok(file)
    }

    /// Size of the image in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty; loading rejects empty images, so this is `false`
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// All bytes of the image
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// A bounds-checked slice of the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// RVA and size of the CLI header
    #[must_use]
    pub fn clr(&self) -> (u32, u32) {
        self.data_directory(DataDirectoryType::ClrRuntimeHeader)
            .unwrap_or_default()
    }

    /// RVA and size of a data directory, if present and non-empty
    #[must_use]
    pub fn data_directory(&self, dir_type: DataDirectoryType) -> Option<(u32, u32)> {
        self.directories
            .iter()
            .find(|(directory_type, directory)| {
                *directory_type == dir_type && directory.virtual_address != 0 && directory.size != 0
            })
            .map(|(_, directory)| (directory.virtual_address, directory.size))
    }

    /// Imported functions as `(dll, name)` pairs
    #[must_use]
    pub fn imports(&self) -> &[(String, String)] {
        &self.imports
    }

    /// Section headers in file order
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        self.converter.sections()
    }

    /// The offset/RVA mapping of this image
    #[must_use]
    pub fn converter(&self) -> &RvaConverter {
        &self.converter
    }

    /// Convert an RVA to a file offset.
    ///
    /// # Errors
    /// See [`RvaConverter::rva_to_offset`].
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        self.converter.rva_to_offset(rva)
    }

    /// Convert a file offset to an RVA.
    ///
    /// # Errors
    /// See [`RvaConverter::offset_to_rva`].
    pub fn offset_to_rva(&self, offset: usize) -> Result<u32> {
        self.converter.offset_to_rva(offset)
    }

    /// Whether the optional header is PE32+
    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.is_pe32_plus
    }

    /// `IMAGE_FILE_MACHINE_*` of the COFF header
    #[must_use]
    pub fn machine(&self) -> u16 {
        self.machine
    }

    /// COFF timestamp
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// `IMAGE_FILE_*` characteristics
    #[must_use]
    pub fn characteristics(&self) -> u16 {
        self.characteristics
    }

    /// Whether the image is a DLL
    #[must_use]
    pub fn is_dll(&self) -> bool {
        self.characteristics & goblin::pe::characteristic::IMAGE_FILE_DLL != 0
    }

    /// Preferred load address
    #[must_use]
    pub fn image_base(&self) -> u64 {
        self.image_base
    }

    /// File alignment of section raw data
    #[must_use]
    pub fn file_alignment(&self) -> u32 {
        self.file_alignment
    }

    /// Alignment of sections once loaded
    #[must_use]
    pub fn section_alignment(&self) -> u32 {
        self.section_alignment
    }

    /// `IMAGE_SUBSYSTEM_*` value
    #[must_use]
    pub fn subsystem(&self) -> u16 {
        self.subsystem
    }

    /// Checksum stored in the optional header
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_invalid() {
        assert!(matches!(File::from_mem(Vec::new()), Err(Error::Empty)));
        assert!(matches!(File::from_mem(vec![0x4D, 0x5A, 0x00]), Err(Error::Goblin(_))));
    }
}
