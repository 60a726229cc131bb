//! Writer configuration.

use crate::metadata::{cor20header::CorFlags, token::Token};

/// Default file alignment of section raw data
pub const DEFAULT_FILE_ALIGNMENT: u32 = 0x200;
/// Default alignment of sections in memory
pub const DEFAULT_SECTION_ALIGNMENT: u32 = 0x2000;
/// Default image base of PE32 images
pub const DEFAULT_IMAGE_BASE_PE32: u64 = 0x0040_0000;
/// Default image base of PE32+ images
pub const DEFAULT_IMAGE_BASE_PE32_PLUS: u64 = 0x1_4000_0000;
/// Size of an RSA-1024 strong-name signature
pub const DEFAULT_STRONG_NAME_SIZE: u32 = 128;
/// `IMAGE_SUBSYSTEM_WINDOWS_CUI`
pub const SUBSYSTEM_CONSOLE: u16 = 3;
/// `IMAGE_SUBSYSTEM_WINDOWS_GUI`
pub const SUBSYSTEM_GUI: u16 = 2;
/// `IMAGE_DEBUG_TYPE_CODEVIEW`
pub const DEBUG_TYPE_CODEVIEW: u32 = 2;

/// Target machine of the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Machine {
    /// x86, PE32
    #[default]
    I386,
    /// x64, PE32+
    Amd64,
    /// ARM64, PE32+
    Arm64,
}

impl Machine {
    /// `IMAGE_FILE_MACHINE_*` value
    #[must_use]
    pub fn value(self) -> u16 {
        match self {
            Machine::I386 => 0x014C,
            Machine::Amd64 => 0x8664,
            Machine::Arm64 => 0xAA64,
        }
    }

    /// Map an `IMAGE_FILE_MACHINE_*` value
    #[must_use]
    pub fn from_value(value: u16) -> Option<Machine> {
        match value {
            0x014C => Some(Machine::I386),
            0x8664 => Some(Machine::Amd64),
            0xAA64 => Some(Machine::Arm64),
            _ => None,
        }
    }

    /// Whether images for this machine use the PE32+ optional header
    #[must_use]
    pub fn is_pe32_plus(self) -> bool {
        !matches!(self, Machine::I386)
    }

    /// Whether the image carries an `FF 25` startup stub jumping through the IAT
    #[must_use]
    pub fn has_startup_stub(self) -> bool {
        matches!(self, Machine::I386 | Machine::Amd64)
    }
}

/// One debug directory entry and its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugPayload {
    /// `IMAGE_DEBUG_TYPE_*`
    pub kind: u32,
    /// Major version of the entry
    pub major_version: u16,
    /// Minor version of the entry
    pub minor_version: u16,
    /// Raw payload placed right after the directory entry
    pub data: Vec<u8>,
}

impl DebugPayload {
    /// A CodeView `RSDS` entry pointing at a PDB.
    #[must_use]
    pub fn codeview(guid: [u8; 16], age: u32, pdb_path: &str) -> Self {
        let mut data = Vec::with_capacity(24 + pdb_path.len() + 1);
        data.extend_from_slice(b"RSDS");
        data.extend_from_slice(&guid);
        data.extend_from_slice(&age.to_le_bytes());
        data.extend_from_slice(pdb_path.as_bytes());
        data.push(0);

        DebugPayload {
            kind: DEBUG_TYPE_CODEVIEW,
            major_version: 0,
            minor_version: 0,
            data,
        }
    }
}

/// Everything about the produced image that is not module content.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    /// Target machine; decides PE32 versus PE32+
    pub machine: Machine,
    /// Alignment of section raw data in the file
    pub file_alignment: u32,
    /// Alignment of sections in memory
    pub section_alignment: u32,
    /// Preferred load address
    pub image_base: u64,
    /// Produce a DLL
    pub is_dll: bool,
    /// `IMAGE_SUBSYSTEM_*`
    pub subsystem: u16,
    /// Subsystem version (major, minor)
    pub subsystem_version: (u16, u16),
    /// Operating system version (major, minor)
    pub os_version: (u16, u16),
    /// Version string of the metadata root
    pub runtime_version: String,
    /// CLI header flags
    pub cor_flags: CorFlags,
    /// Entry point `MethodDef` or `File` token
    pub entry_point: Token,
    /// COFF timestamp
    pub timestamp: u32,
    /// Bytes reserved for the strong-name signature, 0 for none
    pub strong_name_size: u32,
    /// Debug directory entry
    pub debug: Option<DebugPayload>,
    /// Compute the optional header checksum
    pub checksum: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            machine: Machine::I386,
            file_alignment: DEFAULT_FILE_ALIGNMENT,
            section_alignment: DEFAULT_SECTION_ALIGNMENT,
            image_base: DEFAULT_IMAGE_BASE_PE32,
            is_dll: false,
            subsystem: SUBSYSTEM_CONSOLE,
            subsystem_version: (4, 0),
            os_version: (4, 0),
            runtime_version: "v4.0.30319".to_string(),
            cor_flags: CorFlags::ILONLY,
            entry_point: Token::new(0),
            timestamp: 0,
            strong_name_size: 0,
            debug: None,
            checksum: true,
        }
    }
}

impl WriterConfig {
    /// Whether the optional header is PE32+
    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.machine.is_pe32_plus()
    }

    /// Target `machine`; moves the image base to the default of the new format if it
    /// still holds the default of the old one
    #[must_use]
    pub fn with_machine(mut self, machine: Machine) -> Self {
        let default_base = |plus: bool| {
            if plus {
                DEFAULT_IMAGE_BASE_PE32_PLUS
            } else {
                DEFAULT_IMAGE_BASE_PE32
            }
        };
        if self.image_base == default_base(self.machine.is_pe32_plus()) {
            self.image_base = default_base(machine.is_pe32_plus());
        }
        self.machine = machine;
        self
    }

    /// Set both alignments
    #[must_use]
    pub fn with_alignment(mut self, file_alignment: u32, section_alignment: u32) -> Self {
        self.file_alignment = file_alignment;
        self.section_alignment = section_alignment;
        self
    }

    /// Set the preferred load address
    #[must_use]
    pub fn with_image_base(mut self, image_base: u64) -> Self {
        self.image_base = image_base;
        self
    }

    /// Produce a DLL instead of an EXE
    #[must_use]
    pub fn with_dll(mut self, is_dll: bool) -> Self {
        self.is_dll = is_dll;
        self
    }

    /// Set the subsystem and its version
    #[must_use]
    pub fn with_subsystem(mut self, subsystem: u16, version: (u16, u16)) -> Self {
        self.subsystem = subsystem;
        self.subsystem_version = version;
        self
    }

    /// Set the operating system version
    #[must_use]
    pub fn with_os_version(mut self, version: (u16, u16)) -> Self {
        self.os_version = version;
        self
    }

    /// Set the runtime version string
    #[must_use]
    pub fn with_runtime_version(mut self, version: impl Into<String>) -> Self {
        self.runtime_version = version.into();
        self
    }

    /// Set the CLI header flags
    #[must_use]
    pub fn with_cor_flags(mut self, flags: CorFlags) -> Self {
        self.cor_flags = flags;
        self
    }

    /// Set the entry point token
    #[must_use]
    pub fn with_entry_point(mut self, token: Token) -> Self {
        self.entry_point = token;
        self
    }

    /// Set the COFF timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Reserve `size` bytes for a strong-name signature and mark the image signed
    #[must_use]
    pub fn with_strong_name_size(mut self, size: u32) -> Self {
        self.strong_name_size = size;
        self.cor_flags.set(CorFlags::STRONGNAMESIGNED, size != 0);
        self
    }

    /// Attach a debug directory entry
    #[must_use]
    pub fn with_debug(mut self, debug: DebugPayload) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Enable or disable the optional header checksum
    #[must_use]
    pub fn with_checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    /// Check the values the layout depends on.
    ///
    /// # Errors
    /// Returns [`crate::Error::LayoutFailed`] for alignments that are not powers of two,
    /// a file alignment above the section alignment, or an image base unsuited to the
    /// format.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.file_alignment.is_power_of_two() || !self.section_alignment.is_power_of_two() {
            return Err(crate::Error::LayoutFailed(format!(
                "Alignments must be powers of two, got file 0x{:X} and section 0x{:X}",
                self.file_alignment, self.section_alignment
            )));
        }
        if self.file_alignment > self.section_alignment {
            return Err(crate::Error::LayoutFailed(format!(
                "File alignment 0x{:X} exceeds section alignment 0x{:X}",
                self.file_alignment, self.section_alignment
            )));
        }
        if !self.is_pe32_plus() && self.image_base > u64::from(u32::MAX) {
            return Err(crate::Error::LayoutFailed(format!(
                "Image base 0x{:X} does not fit a PE32 image",
                self.image_base
            )));
        }
        if self.image_base % 0x1_0000 != 0 {
            return Err(crate::Error::LayoutFailed(format!(
                "Image base 0x{:X} is not 64 KiB aligned",
                self.image_base
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = WriterConfig::default();
        assert!(!config.is_pe32_plus());
        assert_eq!(config.image_base, 0x40_0000);
        assert_eq!(config.file_alignment, 0x200);
        assert_eq!(config.section_alignment, 0x2000);
        assert_eq!(config.runtime_version, "v4.0.30319");
        assert_eq!(config.cor_flags, CorFlags::ILONLY);
        assert!(config.checksum);
        config.validate().unwrap();
    }

    #[test]
    fn machine_moves_default_base() {
        let config = WriterConfig::default().with_machine(Machine::Amd64);
        assert!(config.is_pe32_plus());
        assert_eq!(config.image_base, 0x1_4000_0000);

        let config = WriterConfig::default()
            .with_image_base(0x1000_0000)
            .with_machine(Machine::Arm64);
        assert_eq!(config.image_base, 0x1000_0000);
        assert_eq!(Machine::from_value(config.machine.value()), Some(Machine::Arm64));
    }

    #[test]
    fn strong_name_flag() {
        let config = WriterConfig::default().with_strong_name_size(DEFAULT_STRONG_NAME_SIZE);
        assert!(config.cor_flags.contains(CorFlags::STRONGNAMESIGNED | CorFlags::ILONLY));
        let config = config.with_strong_name_size(0);
        assert!(!config.cor_flags.contains(CorFlags::STRONGNAMESIGNED));
    }

    #[test]
    fn invalid() {
        assert!(WriterConfig::default().with_alignment(0x300, 0x2000).validate().is_err());
        assert!(WriterConfig::default().with_alignment(0x4000, 0x2000).validate().is_err());
        assert!(WriterConfig::default().with_image_base(0x1_0000_0000).validate().is_err());
        assert!(WriterConfig::default().with_image_base(0x40_1000).validate().is_err());
    }
}
