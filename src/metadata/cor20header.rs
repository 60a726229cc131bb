//! CLI header (ECMA-335 II.25.3.3).
//!
//! The 72-byte header the CLR runtime data directory points at. It locates the
//! metadata, the embedded resources and the strong-name signature, and holds the
//! entry point token.

use bitflags::bitflags;

use crate::{
    file::{io::push_le, parser::Parser},
    Result,
};

/// Size of the header in bytes
pub const COR20_HEADER_SIZE: u32 = 72;

bitflags! {
    /// Runtime flags of the CLI header
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CorFlags: u32 {
        /// Image contains only IL
        const ILONLY = 0x0000_0001;
        /// Image may only be loaded into a 32-bit process
        const REQUIRE_32BIT = 0x0000_0002;
        /// Image is a library with IL only
        const IL_LIBRARY = 0x0000_0004;
        /// Image carries a strong-name signature
        const STRONGNAMESIGNED = 0x0000_0008;
        /// The entry point field holds an RVA of a native function
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        /// Debug tracking is enabled
        const TRACKDEBUGDATA = 0x0001_0000;
        /// Prefer running as a 32-bit process
        const PREFER_32BIT = 0x0002_0000;
    }
}

/// Decoded CLI header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cor20Header {
    /// Header size, always 72
    pub cb: u32,
    /// Minimum runtime major version, 2
    pub major_runtime_version: u16,
    /// Minimum runtime minor version, 5
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub meta_data_rva: u32,
    /// Size of the metadata
    pub meta_data_size: u32,
    /// Raw flags, see [`CorFlags`]
    pub flags: u32,
    /// Entry point MethodDef/File token, or an RVA with [`CorFlags::NATIVE_ENTRYPOINT`]
    pub entry_point_token: u32,
    /// RVA of the embedded resources
    pub resource_rva: u32,
    /// Size of the embedded resources
    pub resource_size: u32,
    /// RVA of the strong-name signature
    pub strong_name_signature_rva: u32,
    /// Size of the strong-name signature
    pub strong_name_signature_size: u32,
    /// Reserved, 0
    pub code_manager_table_rva: u32,
    /// Reserved, 0
    pub code_manager_table_size: u32,
    /// RVA of the VTable fixups
    pub vtable_fixups_rva: u32,
    /// Size of the VTable fixups
    pub vtable_fixups_size: u32,
    /// Reserved, 0
    pub export_address_table_jmp_rva: u32,
    /// Reserved, 0
    pub export_address_table_jmp_size: u32,
    /// Precompiled image header, 0 for IL images
    pub managed_native_header_rva: u32,
    /// Size of the precompiled image header
    pub managed_native_header_size: u32,
}

impl Default for Cor20Header {
    fn default() -> Self {
        Cor20Header {
            cb: COR20_HEADER_SIZE,
            major_runtime_version: 2,
            minor_runtime_version: 5,
            meta_data_rva: 0,
            meta_data_size: 0,
            flags: CorFlags::ILONLY.bits(),
            entry_point_token: 0,
            resource_rva: 0,
            resource_size: 0,
            strong_name_signature_rva: 0,
            strong_name_signature_size: 0,
            code_manager_table_rva: 0,
            code_manager_table_size: 0,
            vtable_fixups_rva: 0,
            vtable_fixups_size: 0,
            export_address_table_jmp_rva: 0,
            export_address_table_jmp_size: 0,
            managed_native_header_rva: 0,
            managed_native_header_size: 0,
        }
    }
}

impl Cor20Header {
    /// Parse the header at the start of `data`.
    ///
    /// # Errors
    /// Returns an error for truncated input, a wrong `cb`, a missing metadata directory
    /// or inconsistent RVA/size pairs.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_HEADER_SIZE as usize {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;

        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 {
            return Err(malformed_error!("Image has no metadata directory"));
        }

        let flags = parser.read_le::<u32>()?;
        let entry_point_token = parser.read_le::<u32>()?;

        let resource_rva = parser.read_le::<u32>()?;
        let resource_size = parser.read_le::<u32>()?;
        if (resource_rva == 0) != (resource_size == 0) {
            return Err(malformed_error!("Resource values are invalid"));
        }

        let strong_name_signature_rva = parser.read_le::<u32>()?;
        let strong_name_signature_size = parser.read_le::<u32>()?;
        if (strong_name_signature_rva == 0) != (strong_name_signature_size == 0) {
            return Err(malformed_error!("Strong name values are invalid"));
        }

        let code_manager_table_rva = parser.read_le::<u32>()?;
        let code_manager_table_size = parser.read_le::<u32>()?;
        let vtable_fixups_rva = parser.read_le::<u32>()?;
        let vtable_fixups_size = parser.read_le::<u32>()?;
        let export_address_table_jmp_rva = parser.read_le::<u32>()?;
        let export_address_table_jmp_size = parser.read_le::<u32>()?;
        let managed_native_header_rva = parser.read_le::<u32>()?;
        let managed_native_header_size = parser.read_le::<u32>()?;

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
            code_manager_table_rva,
            code_manager_table_size,
            vtable_fixups_rva,
            vtable_fixups_size,
            export_address_table_jmp_rva,
            export_address_table_jmp_size,
            managed_native_header_rva,
            managed_native_header_size,
        })
    }

    /// Known flags; unknown bits are dropped
    #[must_use]
    pub fn cor_flags(&self) -> CorFlags {
        CorFlags::from_bits_truncate(self.flags)
    }

    /// Append the 72 header bytes to `buffer`
    pub fn write(&self, buffer: &mut Vec<u8>) {
        push_le(buffer, self.cb);
        push_le(buffer, self.major_runtime_version);
        push_le(buffer, self.minor_runtime_version);
        for value in [
            self.meta_data_rva,
            self.meta_data_size,
            self.flags,
            self.entry_point_token,
            self.resource_rva,
            self.resource_size,
            self.strong_name_signature_rva,
            self.strong_name_signature_size,
            self.code_manager_table_rva,
            self.code_manager_table_size,
            self.vtable_fixups_rva,
            self.vtable_fixups_size,
            self.export_address_table_jmp_rva,
            self.export_address_table_jmp_size,
            self.managed_native_header_rva,
            self.managed_native_header_size,
        ] {
            push_le(buffer, value);
        }
    }
}
