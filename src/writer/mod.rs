//! PE image writer.
//!
//! [`ImageWriter`] turns sized module content into a complete managed PE image:
//!
//! 1. [`ImageWriter::new`] builds the section parts, lays them out and fixes every
//!    RVA. Method bodies, field data and resources are already encoded at this point,
//!    and the metadata size is known because no metadata column width depends on an
//!    RVA value.
//! 2. The caller reads the laid-out addresses with [`ImageWriter::entry_rvas`] and
//!    patches them into the tables.
//! 3. [`ImageWriter::write_before_metadata`], [`ImageWriter::write_metadata`] and
//!    [`ImageWriter::write_after_metadata`] fill the image in that order; calling them
//!    out of order fails with [`crate::Error::InvalidState`].
//! 4. [`ImageWriter::finish`] signs the image and computes its checksum.
//!
//! Every part is checked against the size it was laid out with. A mismatch is fatal
//! and no image is returned.

mod checksum;
mod config;
mod headers;
mod layout;
mod native;
mod output;
mod parts;
mod state;

pub use checksum::pe_checksum;
pub use config::{
    DebugPayload, Machine, WriterConfig, DEBUG_TYPE_CODEVIEW, DEFAULT_FILE_ALIGNMENT,
    DEFAULT_IMAGE_BASE_PE32, DEFAULT_IMAGE_BASE_PE32_PLUS, DEFAULT_SECTION_ALIGNMENT,
    DEFAULT_STRONG_NAME_SIZE, SUBSYSTEM_CONSOLE, SUBSYSTEM_GUI,
};
pub use headers::{certificate_entry_offset, headers_size, CHECKSUM_OFFSET};
pub use layout::{Layout, LayoutEngine, SectionLayout};
pub use output::Output;
pub use parts::{align_up, EntryGroup, Part, PartKind, PartSize, Placement, SectionPart};
pub use state::WriteState;

use tracing::{debug, trace};

use crate::{
    file::{
        io::write_le_at, SCN_CNT_CODE, SCN_CNT_INITIALIZED_DATA, SCN_MEM_DISCARDABLE,
        SCN_MEM_EXECUTE, SCN_MEM_READ,
    },
    metadata::{
        cor20header::{Cor20Header, COR20_HEADER_SIZE},
        rawvalue::RawValueKind,
    },
    signer::{strong_name_digest, StrongNameSigner},
    Error, Result,
};

/// Name of the code and data section
pub const TEXT_SECTION: &str = ".text";
/// Name of the base relocation section
pub const RELOC_SECTION: &str = ".reloc";

const TEXT_CHARACTERISTICS: u32 = SCN_CNT_CODE | SCN_MEM_EXECUTE | SCN_MEM_READ;
const RELOC_CHARACTERISTICS: u32 = SCN_CNT_INITIALIZED_DATA | SCN_MEM_DISCARDABLE | SCN_MEM_READ;

/// Alignment of method bodies with a fat header
pub const FAT_BODY_ALIGNMENT: u32 = 4;
/// Alignment of tiny method bodies
pub const TINY_BODY_ALIGNMENT: u32 = 1;
/// Alignment of field initial data
pub const FIELD_DATA_ALIGNMENT: u32 = 8;
/// Alignment of embedded resources
pub const RESOURCE_ALIGNMENT: u32 = 8;

/// Module content handed to the writer.
#[derive(Clone, Debug, Default)]
pub struct ImageContent {
    /// Encoded method bodies, one entry per `MethodDef` with a body
    pub method_bodies: EntryGroup,
    /// Field initial data, one entry per `FieldRVA` row
    pub field_data: EntryGroup,
    /// Length-prefixed resources, one entry per embedded `ManifestResource`
    pub resources: EntryGroup,
    /// Exact size of the metadata blob
    pub metadata_size: u32,
}

/// Lays out and fills one PE image.
pub struct ImageWriter {
    config: WriterConfig,
    content: ImageContent,
    layout: Layout,
    image: Vec<u8>,
    state: WriteState,
    body_rvas: Vec<u32>,
    field_rvas: Vec<u32>,
    resource_offsets: Vec<u32>,
}

impl ImageWriter {
    /// Lay out `content` according to `config`.
    ///
    /// # Errors
    /// Returns [`Error::LayoutFailed`] for an invalid configuration or an image that
    /// does not fit the 32-bit address space.
    pub fn new(config: WriterConfig, content: ImageContent) -> Result<Self> {
        config.validate()?;
        let pe32_plus = config.is_pe32_plus();

        let text = [
            Part::fixed(PartKind::ImportAddressTable, 8, native::iat_size(pe32_plus)),
            Part::fixed(PartKind::CliHeader, 4, COR20_HEADER_SIZE),
            Part::fixed(PartKind::StrongNameSignature, 4, config.strong_name_size),
            Part::group(PartKind::MethodBodies, FAT_BODY_ALIGNMENT, content.method_bodies.clone()),
            Part::group(PartKind::FieldData, FIELD_DATA_ALIGNMENT, content.field_data.clone()),
            Part::group(PartKind::Resources, RESOURCE_ALIGNMENT, content.resources.clone()),
            Part::fixed(PartKind::Metadata, 4, content.metadata_size),
            Part::fixed(
                PartKind::ImportDirectory,
                4,
                native::import_directory_size(pe32_plus, config.is_dll),
            ),
            Part::fixed(PartKind::StartupStub, 4, native::startup_stub_size(config.machine)),
            Part::fixed(
                PartKind::DebugDirectory,
                4,
                native::debug_directory_size(config.debug.as_ref()),
            ),
        ];
        let reloc = [Part::fixed(
            PartKind::Relocations,
            4,
            native::relocations_size(config.machine),
        )];

        let mut engine = LayoutEngine::new(
            config.file_alignment,
            config.section_alignment,
            headers::headers_size(pe32_plus),
        )?;
        let text_parts: Vec<&dyn SectionPart> = text.iter().map(|part| part as &dyn SectionPart).collect();
        engine.section(TEXT_SECTION, TEXT_CHARACTERISTICS, &text_parts)?;
        engine.section(RELOC_SECTION, RELOC_CHARACTERISTICS, &[&reloc[0]])?;
        let layout = engine.finish();

        let group_rvas = |kind: PartKind, group: &EntryGroup| -> Result<Vec<u32>> {
            match layout.placement(kind) {
                Some(placement) => Ok(group.entry_rvas(placement.rva)?.0),
                None => Ok(Vec::new()),
            }
        };
        let body_rvas = group_rvas(PartKind::MethodBodies, &content.method_bodies)?;
        let field_rvas = group_rvas(PartKind::FieldData, &content.field_data)?;
        let resources_rva = layout.placement(PartKind::Resources).map_or(0, |p| p.rva);
        let resource_offsets = group_rvas(PartKind::Resources, &content.resources)?
            .into_iter()
            .map(|rva| rva - resources_rva)
            .collect();

        debug!(
            size_of_image = layout.size_of_image,
            file_size = layout.file_size,
            sections = layout.sections.len(),
            "image laid out"
        );

        Ok(ImageWriter {
            image: vec![0u8; layout.file_size as usize],
            config,
            content,
            layout,
            state: WriteState::BeforeMetadata,
            body_rvas,
            field_rvas,
            resource_offsets,
        })
    }

    /// The computed layout
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The configuration the image is written with
    #[must_use]
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Current position in the write sequence
    #[must_use]
    pub fn state(&self) -> WriteState {
        self.state
    }

    /// Laid-out address of every entry of `kind`, by slot.
    ///
    /// Method bodies and field data are RVAs; resources are offsets from the start of
    /// the resources directory.
    #[must_use]
    pub fn entry_rvas(&self, kind: RawValueKind) -> &[u32] {
        match kind {
            RawValueKind::MethodBody => &self.body_rvas,
            RawValueKind::FieldData => &self.field_rvas,
            RawValueKind::Resource => &self.resource_offsets,
        }
    }

    /// RVA of the metadata blob
    ///
    /// # Errors
    /// Returns [`Error::LayoutFailed`] if no metadata was laid out.
    pub fn metadata_rva(&self) -> Result<u32> {
        Ok(self.layout.require(PartKind::Metadata)?.rva)
    }

    fn advance(&mut self) {
        let next = self.state.next();
        debug!(from = %self.state, to = %next, "write state");
        self.state = next;
    }

    /// Copy `bytes` into the slot laid out for `kind`.
    fn put(&mut self, kind: PartKind, bytes: &[u8]) -> Result<()> {
        let Some(placement) = self.layout.placement(kind) else {
            if bytes.is_empty() {
                return Ok(());
            }
            return Err(Error::LayoutMismatch {
                part: kind.name(),
                expected: 0,
                actual: bytes.len() as u64,
            });
        };

        if bytes.len() as u64 != u64::from(placement.size) {
            return Err(Error::LayoutMismatch {
                part: kind.name(),
                expected: u64::from(placement.size),
                actual: bytes.len() as u64,
            });
        }

        let start = placement.offset as usize;
        let Some(target) = self.image.get_mut(start..start + bytes.len()) else {
            return Err(out_of_bounds_error!());
        };
        target.copy_from_slice(bytes);
        trace!(part = %kind, offset = placement.offset, size = placement.size, "wrote part");
        Ok(())
    }

    fn range(&self, kind: PartKind) -> (u32, u32) {
        self.layout
            .placement(kind)
            .map_or((0, 0), |placement| (placement.rva, placement.size))
    }

    fn entry_point_rva(&self) -> u32 {
        match self.layout.placement(PartKind::StartupStub) {
            Some(stub) => native::stub_entry_rva(&stub),
            None => 0,
        }
    }

    /// Write the headers and every part in front of the metadata.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] if called out of order, or
    /// [`Error::LayoutMismatch`] if a part's bytes do not match its layout.
    pub fn write_before_metadata(&mut self) -> Result<()> {
        self.state.expect(WriteState::BeforeMetadata)?;
        let pe32_plus = self.config.is_pe32_plus();

        let iat = self.layout.require(PartKind::ImportAddressTable)?;
        let directories = headers::DataDirectories {
            import: self.range(PartKind::ImportDirectory),
            base_relocation: self.range(PartKind::Relocations),
            debug: self
                .layout
                .placement(PartKind::DebugDirectory)
                .map_or((0, 0), |p| (p.rva, native::DEBUG_DIRECTORY_SIZE)),
            iat: (iat.rva, iat.size),
            clr: (self.layout.require(PartKind::CliHeader)?.rva, COR20_HEADER_SIZE),
        };
        let headers = headers::write_headers(&self.config, &self.layout, &directories, self.entry_point_rva())?;
        let Some(target) = self.image.get_mut(..headers.len()) else {
            return Err(Error::LayoutMismatch {
                part: "headers",
                expected: self.image.len() as u64,
                actual: headers.len() as u64,
            });
        };
        target.copy_from_slice(&headers);

        let import_rva = self.layout.placement(PartKind::ImportDirectory).map_or(0, |p| p.rva);
        let iat_bytes = native::import_address_table(
            pe32_plus,
            native::hint_name_rva(import_rva, pe32_plus, self.config.is_dll),
        );
        self.put(PartKind::ImportAddressTable, &iat_bytes)?;

        let (meta_data_rva, meta_data_size) = self.range(PartKind::Metadata);
        let (resource_rva, resource_size) = self.range(PartKind::Resources);
        let (strong_name_signature_rva, strong_name_signature_size) =
            self.range(PartKind::StrongNameSignature);
        let cli = Cor20Header {
            meta_data_rva,
            meta_data_size,
            flags: self.config.cor_flags.bits(),
            entry_point_token: self.config.entry_point.value(),
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
            ..Cor20Header::default()
        };
        let mut cli_bytes = Vec::with_capacity(COR20_HEADER_SIZE as usize);
        cli.write(&mut cli_bytes);
        self.put(PartKind::CliHeader, &cli_bytes)?;

        let signature = vec![0u8; self.config.strong_name_size as usize];
        self.put(PartKind::StrongNameSignature, &signature)?;

        let mut groups = Vec::with_capacity(3);
        for (kind, group) in [
            (PartKind::MethodBodies, &self.content.method_bodies),
            (PartKind::FieldData, &self.content.field_data),
            (PartKind::Resources, &self.content.resources),
        ] {
            let bytes = match self.layout.placement(kind) {
                Some(placement) => group.to_bytes(placement.rva)?,
                None => Vec::new(),
            };
            groups.push((kind, bytes));
        }
        for (kind, bytes) in groups {
            self.put(kind, &bytes)?;
        }

        self.advance();
        Ok(())
    }

    /// Write the metadata blob.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] if called out of order, or
    /// [`Error::LayoutMismatch`] if `metadata` differs in size from what was laid out.
    pub fn write_metadata(&mut self, metadata: &[u8]) -> Result<()> {
        self.state.expect(WriteState::EmittingMetadata)?;
        self.put(PartKind::Metadata, metadata)?;
        self.advance();
        Ok(())
    }

    /// Write every part behind the metadata.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] if called out of order, or
    /// [`Error::LayoutMismatch`] / [`Error::LayoutFailed`] if a native part cannot be
    /// built for its slot.
    pub fn write_after_metadata(&mut self) -> Result<()> {
        self.state.expect(WriteState::AfterMetadata)?;
        let pe32_plus = self.config.is_pe32_plus();
        let iat = self.layout.require(PartKind::ImportAddressTable)?;

        if let Some(import) = self.layout.placement(PartKind::ImportDirectory) {
            let bytes = native::import_directory(import.rva, iat.rva, pe32_plus, self.config.is_dll);
            self.put(PartKind::ImportDirectory, &bytes)?;
        }

        if let Some(stub) = self.layout.placement(PartKind::StartupStub) {
            let bytes = native::startup_stub(self.config.machine, self.config.image_base, stub.rva, iat.rva)?;
            self.put(PartKind::StartupStub, &bytes)?;

            if self.layout.placement(PartKind::Relocations).is_some() {
                self.put(PartKind::Relocations, &native::relocations(stub.rva))?;
            }
        }

        if let (Some(debug), Some(payload)) = (
            self.layout.placement(PartKind::DebugDirectory),
            self.config.debug.as_ref(),
        ) {
            let bytes = native::debug_directory(payload, &debug, self.config.timestamp);
            self.put(PartKind::DebugDirectory, &bytes)?;
        }

        self.advance();
        Ok(())
    }

    /// Sign the image if a signer is given, then compute the checksum.
    ///
    /// Without a signer the strong-name reservation stays zeroed (delay signing).
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] if not all parts were written, or
    /// [`Error::Signing`] if the signer fails or returns a signature that does not fit
    /// the reservation.
    pub fn finish(mut self, signer: Option<&dyn StrongNameSigner>) -> Result<Vec<u8>> {
        self.state.expect(WriteState::Done)?;
        let pe32_plus = self.config.is_pe32_plus();

        if let Some(signer) = signer {
            let Some(reserved) = self.layout.placement(PartKind::StrongNameSignature) else {
                return Err(Error::Signing(
                    "No space was reserved for a strong-name signature".to_string(),
                ));
            };

            let certificate = certificate_entry_offset(pe32_plus);
            let signature_start = reserved.offset as usize;
            let digest = strong_name_digest(
                &self.image,
                &[
                    CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4,
                    certificate..certificate + 8,
                    signature_start..signature_start + reserved.size as usize,
                ],
            );

            let signature = signer.sign(&digest)?;
            if signature.len() != reserved.size as usize {
                return Err(Error::Signing(format!(
                    "Signature is {} bytes, {} were reserved",
                    signature.len(),
                    reserved.size
                )));
            }
            self.image[signature_start..signature_start + signature.len()].copy_from_slice(&signature);
            debug!(size = signature.len(), "strong-name signed");
        }

        if self.config.checksum {
            let checksum = pe_checksum(&self.image, CHECKSUM_OFFSET);
            let mut offset = CHECKSUM_OFFSET;
            write_le_at(&mut self.image, &mut offset, checksum)?;
            debug!(checksum, "computed checksum");
        }

        debug!(size = self.image.len(), "image complete");
        Ok(self.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file::File, metadata::token::Token};

    fn content() -> ImageContent {
        let mut method_bodies = EntryGroup::new();
        method_bodies.push(vec![0x0A, 0x2A], TINY_BODY_ALIGNMENT);
        let mut field_data = EntryGroup::new();
        field_data.push(vec![1, 2, 3, 4], FIELD_DATA_ALIGNMENT);

        ImageContent {
            method_bodies,
            field_data,
            resources: EntryGroup::new(),
            metadata_size: 0x20,
        }
    }

    fn write_all(writer: &mut ImageWriter, metadata: &[u8]) -> Result<()> {
        writer.write_before_metadata()?;
        writer.write_metadata(metadata)?;
        writer.write_after_metadata()
    }

    struct FixedSigner(u32);

    impl StrongNameSigner for FixedSigner {
        fn signature_size(&self) -> u32 {
            self.0
        }

        fn sign(&self, digest: &[u8; 20]) -> Result<Vec<u8>> {
            Ok(digest.iter().copied().cycle().take(self.0 as usize).collect())
        }
    }

    #[test]
    fn pe32_image() {
        let config = WriterConfig::default().with_entry_point(Token::new(0x0600_0001));
        let mut writer = ImageWriter::new(config, content()).unwrap();

        assert_eq!(writer.entry_rvas(RawValueKind::MethodBody), &[0x2050]);
        assert_eq!(writer.entry_rvas(RawValueKind::FieldData), &[0x2058]);
        assert!(writer.entry_rvas(RawValueKind::Resource).is_empty());
        assert_eq!(writer.metadata_rva().unwrap(), 0x205C);
        assert!(writer.layout().section(RELOC_SECTION).is_some());

        write_all(&mut writer, &[0x42; 0x20]).unwrap();
        let image = writer.finish(None).unwrap();

        let file = File::from_mem(image.clone()).unwrap();
        assert!(!file.is_pe32_plus());
        assert_eq!(file.sections().len(), 2);
        assert_eq!(file.clr(), (0x2008, 72));
        assert_eq!(file.imports(), &[("mscoree.dll".to_string(), "_CorExeMain".to_string())]);
        assert_eq!(file.checksum(), pe_checksum(&image, CHECKSUM_OFFSET));

        let cli = Cor20Header::read(&image[file.rva_to_offset(0x2008).unwrap()..]).unwrap();
        assert_eq!(cli.meta_data_rva, 0x205C);
        assert_eq!(cli.meta_data_size, 0x20);
        assert_eq!(cli.entry_point_token, 0x0600_0001);

        let body = file.rva_to_offset(0x2050).unwrap();
        assert_eq!(&image[body..body + 2], &[0x0A, 0x2A]);
    }

    #[test]
    fn arm64_has_no_stub_or_relocations() {
        let config = WriterConfig::default().with_machine(Machine::Arm64).with_dll(true);
        let mut writer = ImageWriter::new(config, content()).unwrap();
        assert!(writer.layout().placement(PartKind::StartupStub).is_none());
        assert!(writer.layout().section(RELOC_SECTION).is_none());

        write_all(&mut writer, &[0; 0x20]).unwrap();
        let file = File::from_mem(writer.finish(None).unwrap()).unwrap();
        assert!(file.is_pe32_plus());
        assert!(file.is_dll());
        assert_eq!(file.sections().len(), 1);
    }

    #[test]
    fn state_order_is_enforced() {
        let mut writer = ImageWriter::new(WriterConfig::default(), content()).unwrap();
        assert!(matches!(
            writer.write_metadata(&[0; 0x20]),
            Err(Error::InvalidState { .. })
        ));
        writer.write_before_metadata().unwrap();
        assert!(matches!(
            writer.write_after_metadata(),
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(writer.state(), WriteState::EmittingMetadata);
        assert!(matches!(
            writer.finish(None),
            Err(Error::InvalidState { expected: "Done", .. })
        ));
    }

    #[test]
    fn metadata_size_mismatch() {
        let mut writer = ImageWriter::new(WriterConfig::default(), content()).unwrap();
        writer.write_before_metadata().unwrap();
        assert!(matches!(
            writer.write_metadata(&[0; 0x24]),
            Err(Error::LayoutMismatch {
                part: "metadata",
                expected: 0x20,
                actual: 0x24
            })
        ));
    }

    #[test]
    fn signing() {
        let config = WriterConfig::default().with_strong_name_size(128);
        let mut writer = ImageWriter::new(config.clone(), content()).unwrap();
        write_all(&mut writer, &[0; 0x20]).unwrap();
        let image = writer.finish(Some(&FixedSigner(128))).unwrap();

        let file = File::from_mem(image.clone()).unwrap();
        let cli_offset = file.rva_to_offset(file.clr().0).unwrap();
        let cli = Cor20Header::read(&image[cli_offset..]).unwrap();
        assert_eq!(cli.strong_name_signature_size, 128);
        let signature = file.rva_to_offset(cli.strong_name_signature_rva).unwrap();
        assert!(image[signature..signature + 128].iter().any(|byte| *byte != 0));

        let mut writer = ImageWriter::new(config, content()).unwrap();
        write_all(&mut writer, &[0; 0x20]).unwrap();
        assert!(matches!(
            writer.finish(Some(&FixedSigner(64))),
            Err(Error::Signing(_))
        ));
    }
}
