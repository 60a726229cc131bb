//! DOS, PE, COFF and optional headers followed by the section table.
//!
//! The DOS header and its stub occupy the first 0x80 bytes, so the PE signature sits at
//! 0x80, the COFF header at 0x84 and the optional header at 0x98. Header space is
//! reserved for two sections (`.text` and `.reloc`) regardless of how many survive the
//! layout.

use crate::{
    file::{io::push_le, Section, SECTION_HEADER_SIZE},
    writer::{config::WriterConfig, layout::Layout},
    Result,
};

/// File offset of the PE signature
pub const PE_SIGNATURE_OFFSET: usize = 0x80;
/// File offset of the optional header
pub const OPTIONAL_HEADER_OFFSET: usize = PE_SIGNATURE_OFFSET + 4 + 20;
/// File offset of the optional header checksum
pub const CHECKSUM_OFFSET: usize = OPTIONAL_HEADER_OFFSET + 64;
/// Number of section headers space is reserved for
pub const MAX_SECTIONS: usize = 2;
/// Number of data directory entries
const DATA_DIRECTORY_COUNT: u32 = 16;

/// `IMAGE_FILE_EXECUTABLE_IMAGE`
const FILE_EXECUTABLE_IMAGE: u16 = 0x0002;
/// `IMAGE_FILE_LARGE_ADDRESS_AWARE`
const FILE_LARGE_ADDRESS_AWARE: u16 = 0x0020;
/// `IMAGE_FILE_32BIT_MACHINE`
const FILE_32BIT_MACHINE: u16 = 0x0100;
/// `IMAGE_FILE_DLL`
const FILE_DLL: u16 = 0x2000;

/// Dynamic base, NX compatible, no SEH, terminal server aware
const DLL_CHARACTERISTICS: u16 = 0x8540;
/// `IMAGE_DLLCHARACTERISTICS_HIGH_ENTROPY_VA`
const DLL_HIGH_ENTROPY_VA: u16 = 0x0020;

const STACK_RESERVE: u64 = 0x10_0000;
const STACK_COMMIT: u64 = 0x1000;
const HEAP_RESERVE: u64 = 0x10_0000;
const HEAP_COMMIT: u64 = 0x1000;

#[rustfmt::skip]
const DOS_HEADER: [u8; PE_SIGNATURE_OFFSET] = [
    0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00,
    0xB8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00,
    0x0E, 0x1F, 0xBA, 0x0E, 0x00, 0xB4, 0x09, 0xCD, 0x21, 0xB8, 0x01, 0x4C, 0xCD, 0x21, 0x54, 0x68,
    0x69, 0x73, 0x20, 0x70, 0x72, 0x6F, 0x67, 0x72, 0x61, 0x6D, 0x20, 0x63, 0x61, 0x6E, 0x6E, 0x6F,
    0x74, 0x20, 0x62, 0x65, 0x20, 0x72, 0x75, 0x6E, 0x20, 0x69, 0x6E, 0x20, 0x44, 0x4F, 0x53, 0x20,
    0x6D, 0x6F, 0x64, 0x65, 0x2E, 0x0D, 0x0D, 0x0A, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Size of the optional header including the data directories
#[must_use]
pub fn optional_header_size(pe32_plus: bool) -> u16 {
    if pe32_plus {
        240
    } else {
        224
    }
}

/// Unaligned size of all headers
#[must_use]
pub fn headers_size(pe32_plus: bool) -> u32 {
    (OPTIONAL_HEADER_OFFSET
        + usize::from(optional_header_size(pe32_plus))
        + MAX_SECTIONS * SECTION_HEADER_SIZE) as u32
}

/// File offset of the certificate table directory entry
#[must_use]
pub fn certificate_entry_offset(pe32_plus: bool) -> usize {
    let directories = if pe32_plus { 112 } else { 96 };
    OPTIONAL_HEADER_OFFSET + directories + 4 * 8
}

/// The data directories a managed image fills in; each is `(rva, size)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataDirectories {
    /// `[1]` import directory
    pub import: (u32, u32),
    /// `[5]` base relocations
    pub base_relocation: (u32, u32),
    /// `[6]` debug directory
    pub debug: (u32, u32),
    /// `[12]` import address table
    pub iat: (u32, u32),
    /// `[14]` CLR runtime header
    pub clr: (u32, u32),
}

impl DataDirectories {
    fn entries(&self) -> [(u32, u32); DATA_DIRECTORY_COUNT as usize] {
        let mut entries = [(0, 0); DATA_DIRECTORY_COUNT as usize];
        entries[1] = self.import;
        entries[5] = self.base_relocation;
        entries[6] = self.debug;
        entries[12] = self.iat;
        entries[14] = self.clr;
        entries
    }
}

fn push_word(buffer: &mut Vec<u8>, pe32_plus: bool, value: u64) {
    if pe32_plus {
        push_le(buffer, value);
    } else {
        #[allow(clippy::cast_possible_truncation)]
        let value = value as u32;
        push_le(buffer, value);
    }
}

/// Encode all headers, padded to the first section's file offset.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a section name does not fit its header.
pub fn write_headers(
    config: &WriterConfig,
    layout: &Layout,
    directories: &DataDirectories,
    entry_point_rva: u32,
) -> Result<Vec<u8>> {
    let pe32_plus = config.is_pe32_plus();
    let mut buffer = Vec::with_capacity(layout.sections.first().map_or(0x400, |s| s.offset as usize));

    buffer.extend_from_slice(&DOS_HEADER);
    buffer.extend_from_slice(b"PE\0\0");

    let mut characteristics = FILE_EXECUTABLE_IMAGE;
    characteristics |= if pe32_plus {
        FILE_LARGE_ADDRESS_AWARE
    } else {
        FILE_32BIT_MACHINE
    };
    if config.is_dll {
        characteristics |= FILE_DLL;
    }

    #[allow(clippy::cast_possible_truncation)]
    let section_count = layout.sections.len() as u16;
    push_le(&mut buffer, config.machine.value());
    push_le(&mut buffer, section_count);
    push_le(&mut buffer, config.timestamp);
    push_le(&mut buffer, 0u32);
    push_le(&mut buffer, 0u32);
    push_le(&mut buffer, optional_header_size(pe32_plus));
    push_le(&mut buffer, characteristics);

    let code = layout.sections.iter().find(|s| s.characteristics & crate::file::SCN_CNT_CODE != 0);
    let size_of_code = code.map_or(0, |s| s.raw_size);
    let base_of_code = code.map_or(0, |s| s.rva);
    let data_sections = layout
        .sections
        .iter()
        .filter(|s| s.characteristics & crate::file::SCN_CNT_INITIALIZED_DATA != 0);
    let size_of_data: u32 = data_sections.clone().map(|s| s.raw_size).sum();
    let base_of_data = data_sections.map(|s| s.rva).next().unwrap_or(0);

    push_le(
        &mut buffer,
        if pe32_plus {
            crate::file::PE32_PLUS_MAGIC
        } else {
            crate::file::PE32_MAGIC
        },
    );
    // linker version 8.0
    buffer.extend_from_slice(&[8, 0]);
    push_le(&mut buffer, size_of_code);
    push_le(&mut buffer, size_of_data);
    push_le(&mut buffer, 0u32);
    push_le(&mut buffer, entry_point_rva);
    push_le(&mut buffer, base_of_code);
    if pe32_plus {
        push_le(&mut buffer, config.image_base);
    } else {
        push_le(&mut buffer, base_of_data);
        #[allow(clippy::cast_possible_truncation)]
        let image_base = config.image_base as u32;
        push_le(&mut buffer, image_base);
    }
    push_le(&mut buffer, config.section_alignment);
    push_le(&mut buffer, config.file_alignment);
    push_le(&mut buffer, config.os_version.0);
    push_le(&mut buffer, config.os_version.1);
    push_le(&mut buffer, 0u16);
    push_le(&mut buffer, 0u16);
    push_le(&mut buffer, config.subsystem_version.0);
    push_le(&mut buffer, config.subsystem_version.1);
    push_le(&mut buffer, 0u32);
    push_le(&mut buffer, layout.size_of_image);
    push_le(
        &mut buffer,
        layout.sections.first().map_or(headers_size(pe32_plus), |s| s.offset),
    );
    // checksum, patched once the image is complete
    push_le(&mut buffer, 0u32);
    push_le(&mut buffer, config.subsystem);
    let mut dll_characteristics = DLL_CHARACTERISTICS;
    if pe32_plus {
        dll_characteristics |= DLL_HIGH_ENTROPY_VA;
    }
    push_le(&mut buffer, dll_characteristics);
    push_word(&mut buffer, pe32_plus, STACK_RESERVE);
    push_word(&mut buffer, pe32_plus, STACK_COMMIT);
    push_word(&mut buffer, pe32_plus, HEAP_RESERVE);
    push_word(&mut buffer, pe32_plus, HEAP_COMMIT);
    push_le(&mut buffer, 0u32);
    push_le(&mut buffer, DATA_DIRECTORY_COUNT);
    for (rva, size) in directories.entries() {
        push_le(&mut buffer, rva);
        push_le(&mut buffer, size);
    }

    for section in &layout.sections {
        Section {
            name: section.name.to_string(),
            virtual_size: section.virtual_size,
            virtual_address: section.rva,
            size_of_raw_data: section.raw_size,
            pointer_to_raw_data: section.offset,
            characteristics: section.characteristics,
        }
        .write(&mut buffer)?;
    }

    let end = layout
        .sections
        .first()
        .map_or(buffer.len(), |s| s.offset as usize)
        .max(buffer.len());
    buffer.resize(end, 0);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file::{io::read_le, File},
        writer::{
            config::Machine,
            layout::SectionLayout,
            parts::{PartKind, Placement},
        },
    };

    fn layout() -> Layout {
        Layout {
            sections: vec![SectionLayout {
                name: ".text",
                characteristics: 0x6000_0020,
                rva: 0x2000,
                offset: 0x200,
                virtual_size: 0x50,
                raw_size: 0x200,
                parts: vec![(PartKind::CliHeader, Placement { padding: 0, size: 0x48, offset: 0x200, rva: 0x2000 })],
            }],
            size_of_image: 0x4000,
            file_size: 0x400,
        }
    }

    #[test]
    fn offsets() {
        assert_eq!(CHECKSUM_OFFSET, 0xD8);
        assert_eq!(headers_size(false), 0x178);
        assert_eq!(headers_size(true), 0x188);
        assert_eq!(certificate_entry_offset(false), 0x98 + 128);
        assert_eq!(certificate_entry_offset(true), 0x98 + 144);
    }

    #[test]
    fn pe32_headers() {
        let config = WriterConfig::default().with_dll(true);
        let directories = DataDirectories {
            clr: (0x2000, 0x48),
            ..DataDirectories::default()
        };
        let headers = write_headers(&config, &layout(), &directories, 0).unwrap();
        assert_eq!(headers.len(), 0x200);
        assert_eq!(&headers[..2], b"MZ");
        assert_eq!(&headers[0x80..0x84], b"PE\0\0");
        assert_eq!(read_le::<u16>(&headers[0x84..]).unwrap(), 0x014C);
        assert_eq!(read_le::<u16>(&headers[0x86..]).unwrap(), 1);
        assert_eq!(read_le::<u16>(&headers[0x94..]).unwrap(), 224);
        assert_eq!(read_le::<u16>(&headers[0x96..]).unwrap(), 0x2102);
        assert_eq!(read_le::<u16>(&headers[0x98..]).unwrap(), 0x10B);
        assert_eq!(read_le::<u32>(&headers[0x98 + 28..]).unwrap(), 0x40_0000);
        assert_eq!(read_le::<u32>(&headers[0x98 + 56..]).unwrap(), 0x4000);
        assert_eq!(read_le::<u32>(&headers[0x98 + 60..]).unwrap(), 0x200);
        assert_eq!(read_le::<u32>(&headers[0x98 + 96 + 14 * 8..]).unwrap(), 0x2000);
        assert_eq!(&headers[0x178..0x17D], b".text");
    }

    #[test]
    fn pe32_plus_headers_parse() {
        let config = WriterConfig::default().with_machine(Machine::Amd64);
        let directories = DataDirectories {
            clr: (0x2000, 0x48),
            ..DataDirectories::default()
        };
        let mut image = write_headers(&config, &layout(), &directories, 0).unwrap();
        image.resize(0x400, 0);
        assert_eq!(read_le::<u16>(&image[0x96..]).unwrap(), 0x22);
        assert_eq!(read_le::<u16>(&image[0x98 + 70..]).unwrap(), 0x8560);

        let file = File::from_mem(image).unwrap();
        assert!(file.is_pe32_plus());
        assert_eq!(file.image_base(), 0x1_4000_0000);
        assert_eq!(file.clr(), (0x2000, 0x48));
        assert_eq!(file.sections().len(), 1);
        assert_eq!(file.rva_to_offset(0x2010).unwrap(), 0x210);
    }
}
