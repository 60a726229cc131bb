//! Section headers and the offset/RVA mapping derived from them.

use crate::{
    file::{io::push_le, parser::Parser},
    Result,
};

/// Size of one `IMAGE_SECTION_HEADER`
pub const SECTION_HEADER_SIZE: usize = 40;

/// `IMAGE_SCN_CNT_CODE`
pub const SCN_CNT_CODE: u32 = 0x0000_0020;
/// `IMAGE_SCN_CNT_INITIALIZED_DATA`
pub const SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;
/// `IMAGE_SCN_MEM_DISCARDABLE`
pub const SCN_MEM_DISCARDABLE: u32 = 0x0200_0000;
/// `IMAGE_SCN_MEM_EXECUTE`
pub const SCN_MEM_EXECUTE: u32 = 0x2000_0000;
/// `IMAGE_SCN_MEM_READ`
pub const SCN_MEM_READ: u32 = 0x4000_0000;

/// One section header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Name, at most 8 bytes
    pub name: String,
    /// Size of the section once loaded
    pub virtual_size: u32,
    /// RVA of the section
    pub virtual_address: u32,
    /// Size of the raw data in the file, a multiple of the file alignment
    pub size_of_raw_data: u32,
    /// File offset of the raw data
    pub pointer_to_raw_data: u32,
    /// `IMAGE_SCN_*` flags
    pub characteristics: u32,
}

impl Section {
    /// Read a 40-byte section header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header is truncated.
    pub fn read(parser: &mut Parser) -> Result<Section> {
        let raw_name = parser.read_bytes(8)?;
        let end = raw_name.iter().position(|byte| *byte == 0).unwrap_or(8);
        let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();

        let virtual_size = parser.read_le::<u32>()?;
        let virtual_address = parser.read_le::<u32>()?;
        let size_of_raw_data = parser.read_le::<u32>()?;
        let pointer_to_raw_data = parser.read_le::<u32>()?;
        // relocations, line numbers and their counts
        parser.advance_by(12)?;
        let characteristics = parser.read_le::<u32>()?;

        Ok(Section {
            name,
            virtual_size,
            virtual_address,
            size_of_raw_data,
            pointer_to_raw_data,
            characteristics,
        })
    }

    /// Append the 40-byte header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the name is longer than 8 bytes.
    pub fn write(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if self.name.len() > 8 {
            return Err(malformed_error!("Section name '{}' exceeds 8 bytes", self.name));
        }

        let mut name = [0u8; 8];
        name[..self.name.len()].copy_from_slice(self.name.as_bytes());
        buffer.extend_from_slice(&name);
        push_le(buffer, self.virtual_size);
        push_le(buffer, self.virtual_address);
        push_le(buffer, self.size_of_raw_data);
        push_le(buffer, self.pointer_to_raw_data);
        buffer.extend_from_slice(&[0u8; 12]);
        push_le(buffer, self.characteristics);
        Ok(())
    }

    /// Bytes of the section addressable by RVA
    fn mapped_size(&self) -> u32 {
        if self.virtual_size == 0 {
            self.size_of_raw_data
        } else {
            self.virtual_size
        }
    }

    /// Bytes of the section backed by file data
    fn backed_size(&self) -> u32 {
        self.mapped_size().min(self.size_of_raw_data)
    }

    /// Whether `rva` falls inside this section
    #[must_use]
    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address
            && u64::from(rva) < u64::from(self.virtual_address) + u64::from(self.mapped_size())
    }
}

/// Bidirectional offset/RVA mapping over a list of sections.
///
/// An RVA maps to `rva - section.virtual_address + section.pointer_to_raw_data` of the
/// one section containing it. RVAs in the zero-filled tail of a section past its raw
/// data have no file offset.
#[derive(Debug, Clone, Default)]
pub struct RvaConverter {
    sections: Vec<Section>,
}

impl RvaConverter {
    /// A converter over `sections`
    #[must_use]
    pub fn new(sections: Vec<Section>) -> Self {
        RvaConverter { sections }
    }

    /// The sections in header order
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The section containing `rva`
    #[must_use]
    pub fn section_of(&self, rva: u32) -> Option<&Section> {
        self.sections.iter().find(|section| section.contains_rva(rva))
    }

    /// Convert an RVA into a file offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section backs `rva` with file data.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        let Some(section) = self.section_of(rva) else {
            return Err(malformed_error!("RVA 0x{:08X} is outside all sections", rva));
        };

        let delta = rva - section.virtual_address;
        if delta >= section.backed_size() {
            return Err(malformed_error!(
                "RVA 0x{:08X} lies in the uninitialized part of '{}'",
                rva,
                section.name
            ));
        }

        Ok(section.pointer_to_raw_data as usize + delta as usize)
    }

    /// Convert a file offset into an RVA.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `offset` is not inside any section's raw data.
    pub fn offset_to_rva(&self, offset: usize) -> Result<u32> {
        let Ok(offset) = u32::try_from(offset) else {
            return Err(malformed_error!("Offset {} too large for a PE image", offset));
        };

        self.sections
            .iter()
            .find(|section| {
                offset >= section.pointer_to_raw_data
                    && u64::from(offset)
                        < u64::from(section.pointer_to_raw_data) + u64::from(section.backed_size())
            })
            .map(|section| offset - section.pointer_to_raw_data + section.virtual_address)
            .ok_or_else(|| malformed_error!("Offset 0x{:08X} is outside all sections", offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> RvaConverter {
        RvaConverter::new(vec![
            Section {
                name: ".text".to_string(),
                virtual_size: 0x1234,
                virtual_address: 0x2000,
                size_of_raw_data: 0x1400,
                pointer_to_raw_data: 0x200,
                characteristics: SCN_CNT_CODE | SCN_MEM_EXECUTE | SCN_MEM_READ,
            },
            Section {
                name: ".bss".to_string(),
                virtual_size: 0x1000,
                virtual_address: 0x4000,
                size_of_raw_data: 0x200,
                pointer_to_raw_data: 0x1600,
                characteristics: SCN_CNT_INITIALIZED_DATA | SCN_MEM_READ,
            },
        ])
    }

    #[test]
    fn conversions() {
        let converter = converter();

        assert_eq!(converter.rva_to_offset(0x2000).unwrap(), 0x200);
        assert_eq!(converter.rva_to_offset(0x2050).unwrap(), 0x250);
        assert_eq!(converter.offset_to_rva(0x250).unwrap(), 0x2050);
        assert_eq!(converter.rva_to_offset(0x4010).unwrap(), 0x1610);

        // past the virtual size, inside the raw padding
        assert!(converter.rva_to_offset(0x3234).is_err());
        // zero-filled tail
        assert!(converter.rva_to_offset(0x4200).is_err());
        assert!(converter.rva_to_offset(0x1000).is_err());
        assert!(converter.offset_to_rva(0x100).is_err());
        assert_eq!(converter.section_of(0x4FFF).unwrap().name, ".bss");
    }

    #[test]
    fn header_bytes() {
        let binding = converter();
        let section = &binding.sections()[0];
        let mut buffer = Vec::new();
        section.write(&mut buffer).unwrap();

        #[rustfmt::skip]
        let expected = [
            b'.', b't', b'e', b'x', b't', 0x00, 0x00, 0x00,
            0x34, 0x12, 0x00, 0x00,
            0x00, 0x20, 0x00, 0x00,
            0x00, 0x14, 0x00, 0x00,
            0x00, 0x02, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x20, 0x00, 0x00, 0x60,
        ];
        assert_eq!(buffer, expected);
        assert_eq!(Section::read(&mut Parser::new(&buffer)).unwrap(), *section);

        let long = Section { name: ".toolongname".to_string(), ..section.clone() };
        assert!(long.write(&mut Vec::new()).is_err());
    }
}
