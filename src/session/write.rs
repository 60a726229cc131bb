//! Write side: collect tables, heaps and out-of-line content, then emit an image.

use std::path::Path;

use tracing::{debug, trace};

use crate::{
    file::io::push_le,
    metadata::{
        cor20header::CorFlags,
        method::{MethodBody, MethodImplCodeType},
        rawvalue::{RawValueKey, RawValueKind, RawValueMap},
        root::Root,
        streams::{
            BlobHeapBuilder, GuidHeapBuilder, HeapWrite, StreamHeader, StringHeapBuilder,
            UserStringHeapBuilder,
        },
        tables::{
            tableinfo::{HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS},
            Row, TableId, TablesStream,
        },
        token::Token,
    },
    session::ReadSession,
    signer::StrongNameSigner,
    writer::{
        ImageContent, ImageWriter, Output, WriterConfig, FAT_BODY_ALIGNMENT,
        FIELD_DATA_ALIGNMENT, RESOURCE_ALIGNMENT, TINY_BODY_ALIGNMENT,
    },
    Error, Result,
};

/// A module being built for writing.
///
/// Rows and heap entries are added directly. Columns that hold an address of
/// out-of-line content are never set by hand: [`WriteSession::add_method_body`],
/// [`WriteSession::add_field_data`] and [`WriteSession::add_resource`] record them as
/// deferred and they are filled in once the image has been laid out.
///
/// # Examples
///
/// ```rust,no_run
/// use cilpe::metadata::{method::MethodBody, streams::HeapWrite, tables::{Row, TableId}};
/// use cilpe::{WriteSession, WriterConfig};
///
/// let mut session = WriteSession::new(WriterConfig::default());
/// let name = session.strings_mut().register(Some("Main"))?;
/// let method = session.add_row(TableId::MethodDef, Row::new(vec![0, 0, 0x16, name, 0, 1]))?;
/// session.add_method_body(method.row(), &MethodBody::new(vec![0x2A]))?;
/// session.write_to_file("out.exe")?;
/// # Ok::<(), cilpe::Error>(())
/// ```
pub struct WriteSession {
    config: WriterConfig,
    tables: TablesStream,
    strings: StringHeapBuilder,
    user_strings: UserStringHeapBuilder,
    guids: GuidHeapBuilder,
    blobs: BlobHeapBuilder,
    raw_values: RawValueMap,
    content: ImageContent,
    signer: Option<Box<dyn StrongNameSigner>>,
}

impl WriteSession {
    /// An empty module.
    #[must_use]
    pub fn new(config: WriterConfig) -> Self {
        WriteSession {
            config,
            tables: TablesStream::new(),
            strings: StringHeapBuilder::new(),
            user_strings: UserStringHeapBuilder::new(),
            guids: GuidHeapBuilder::new(),
            blobs: BlobHeapBuilder::new(),
            raw_values: RawValueMap::new(),
            content: ImageContent::default(),
            signer: None,
        }
    }

    /// A module holding everything `source` contains.
    ///
    /// Tables are copied row by row and heaps keep their existing offsets, so every
    /// column value except the layout-dependent ones is reproduced. Method bodies, field
    /// data and embedded resources are re-added and get fresh addresses. Methods that are
    /// not IL keep their original address.
    ///
    /// # Errors
    /// Returns [`Error::MissingReference`] if static field data cannot be sized, or any
    /// error from resolving the source's raw values.
    pub fn from_read(source: &ReadSession<'_>, config: WriterConfig) -> Result<Self> {
        let heap = |name: &str| source.heap_data(name).unwrap_or_default();
        let mut session = WriteSession {
            config,
            tables: source.tables().clone(),
            strings: StringHeapBuilder::from_existing(heap("#Strings")),
            user_strings: UserStringHeapBuilder::from_existing(heap("#US")),
            guids: GuidHeapBuilder::from_existing(heap("#GUID")),
            blobs: BlobHeapBuilder::from_existing(heap("#Blob")),
            raw_values: RawValueMap::new(),
            content: ImageContent::default(),
            signer: None,
        };

        for rid in 1..=source.tables().row_count(TableId::MethodDef) {
            if let Some(body) = source.method_body(rid)? {
                session.add_method_body(rid, &body)?;
                continue;
            }

            // Native and runtime bodies are opaque; their address is carried over as is.
            let rva = if source.method_code_type(rid)? == MethodImplCodeType::IL {
                0
            } else {
                source
                    .tables()
                    .row(TableId::MethodDef, rid)
                    .and_then(|row| row.get(0))
                    .unwrap_or(0)
            };
            session.raw_values.set_literal(
                RawValueKey {
                    table: TableId::MethodDef,
                    rid,
                },
                rva,
            );
        }

        for rid in 1..=source.tables().row_count(TableId::FieldRVA) {
            let Some(data) = source.field_data(rid)? else {
                return Err(Error::MissingReference(format!(
                    "FieldRVA[{rid}] has data of unknown size"
                )));
            };
            session.add_field_data(rid, data)?;
        }

        for rid in 1..=source.tables().row_count(TableId::ManifestResource) {
            if let Some(data) = source.resource(rid)? {
                session.add_resource(rid, &data)?;
            }
        }

        debug!(
            tables = session.tables.present().count(),
            bodies = session.content.method_bodies.len(),
            field_data = session.content.field_data.len(),
            resources = session.content.resources.len(),
            "copied module for writing"
        );
        Ok(session)
    }

    /// Sign the image with `signer`.
    ///
    /// Reserves [`StrongNameSigner::signature_size`] bytes and marks the CLI header as
    /// strong-name signed.
    #[must_use]
    pub fn with_signer(mut self, signer: Box<dyn StrongNameSigner>) -> Self {
        self.config.strong_name_size = signer.signature_size();
        self.config.cor_flags.insert(CorFlags::STRONGNAMESIGNED);
        self.signer = Some(signer);
        self
    }

    /// The writer configuration
    #[must_use]
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Mutable writer configuration
    pub fn config_mut(&mut self) -> &mut WriterConfig {
        &mut self.config
    }

    /// All rows added so far
    #[must_use]
    pub fn tables(&self) -> &TablesStream {
        &self.tables
    }

    /// Mutable access to the rows
    pub fn tables_mut(&mut self) -> &mut TablesStream {
        &mut self.tables
    }

    /// The `#Strings` builder
    pub fn strings_mut(&mut self) -> &mut StringHeapBuilder {
        &mut self.strings
    }

    /// The `#US` builder
    pub fn user_strings_mut(&mut self) -> &mut UserStringHeapBuilder {
        &mut self.user_strings
    }

    /// The `#GUID` builder
    pub fn guids_mut(&mut self) -> &mut GuidHeapBuilder {
        &mut self.guids
    }

    /// The `#Blob` builder
    pub fn blobs_mut(&mut self) -> &mut BlobHeapBuilder {
        &mut self.blobs
    }

    /// Deferred columns recorded so far
    #[must_use]
    pub fn raw_values(&self) -> &RawValueMap {
        &self.raw_values
    }

    /// Append `row` to `table`.
    ///
    /// # Errors
    /// Returns an error if the row does not match the table's column count.
    pub fn add_row(&mut self, table: TableId, row: Row) -> Result<Token> {
        self.tables.push(table, row)
    }

    fn require_row(&self, table: TableId, rid: u32) -> Result<RawValueKey> {
        if self.tables.row(table, rid).is_none() {
            return Err(Error::MissingReference(format!(
                "{}[{}] does not exist",
                table.name(),
                rid
            )));
        }
        Ok(RawValueKey { table, rid })
    }

    /// Attach `body` to `MethodDef` row `rid`.
    ///
    /// # Errors
    /// Returns [`Error::MissingReference`] for an unknown row, or an error if the body
    /// cannot be encoded.
    pub fn add_method_body(&mut self, rid: u32, body: &MethodBody) -> Result<()> {
        let key = self.require_row(TableId::MethodDef, rid)?;
        let alignment = if body.is_tiny() {
            TINY_BODY_ALIGNMENT
        } else {
            FAT_BODY_ALIGNMENT
        };

        let slot = self.content.method_bodies.push(body.to_bytes()?, alignment);
        self.raw_values.defer(key, RawValueKind::MethodBody, slot)?;
        trace!(rid, slot, tiny = body.is_tiny(), "added method body");
        Ok(())
    }

    /// Attach static initial `data` to `FieldRVA` row `rid`.
    ///
    /// # Errors
    /// Returns [`Error::MissingReference`] for an unknown row.
    pub fn add_field_data(&mut self, rid: u32, data: Vec<u8>) -> Result<()> {
        let key = self.require_row(TableId::FieldRVA, rid)?;
        let slot = self.content.field_data.push(data, FIELD_DATA_ALIGNMENT);
        self.raw_values.defer(key, RawValueKind::FieldData, slot)?;
        trace!(rid, slot, "added field data");
        Ok(())
    }

    /// Embed `data` as the content of `ManifestResource` row `rid`.
    ///
    /// # Errors
    /// Returns [`Error::MissingReference`] for an unknown row, or
    /// [`Error::LayoutFailed`] if the resource exceeds 4 GiB.
    pub fn add_resource(&mut self, rid: u32, data: &[u8]) -> Result<()> {
        let key = self.require_row(TableId::ManifestResource, rid)?;
        let Ok(length) = u32::try_from(data.len()) else {
            return Err(Error::LayoutFailed(format!(
                "ManifestResource[{rid}] is too large"
            )));
        };

        let mut record = Vec::with_capacity(data.len() + 4);
        push_le(&mut record, length);
        record.extend_from_slice(data);

        let slot = self.content.resources.push(record, RESOURCE_ALIGNMENT);
        self.raw_values.defer(key, RawValueKind::Resource, slot)?;
        trace!(rid, slot, length, "added resource");
        Ok(())
    }

    fn heap_flags(&self) -> u8 {
        let mut flags = 0;
        if self.strings.is_wide() {
            flags |= HEAP_LARGE_STRINGS;
        }
        if self.guids.is_wide() {
            flags |= HEAP_LARGE_GUID;
        }
        if self.blobs.is_wide() {
            flags |= HEAP_LARGE_BLOB;
        }
        flags
    }

    /// Lay out and emit the complete image.
    ///
    /// # Errors
    /// Returns [`Error::LayoutFailed`] if the image cannot be placed or a deferred
    /// column stays unresolved, [`Error::LayoutMismatch`] if any part differs from its
    /// laid-out size, or [`Error::Signing`] if signing fails. No bytes are returned on
    /// failure.
    pub fn write_to_vec(mut self) -> Result<Vec<u8>> {
        let heap_flags = self.heap_flags();
        let tables_size = self.tables.size(&self.tables.table_info(heap_flags));
        let heaps = [
            ("#Strings", self.strings.to_stream()),
            ("#US", self.user_strings.to_stream()),
            ("#GUID", self.guids.to_stream()),
            ("#Blob", self.blobs.to_stream()),
        ];

        let mut sizes = vec![("#~", tables_size)];
        sizes.extend(heaps.iter().map(|(name, data)| (*name, data.len())));

        let mut root = Root::new(
            &self.config.runtime_version,
            sizes
                .iter()
                .map(|(name, size)| StreamHeader {
                    offset: 0,
                    size: *size as u32,
                    name: (*name).to_string(),
                })
                .collect(),
        );
        let mut offset = root.size();
        for header in &mut root.stream_headers {
            header.offset = offset as u32;
            offset += header.size as usize;
        }
        let Ok(metadata_size) = u32::try_from(offset) else {
            return Err(Error::LayoutFailed("Metadata exceeds 4 GiB".to_string()));
        };
        debug!(metadata_size, heap_flags, "sized metadata");

        let content = std::mem::take(&mut self.content);
        let mut writer = ImageWriter::new(
            self.config.clone(),
            ImageContent {
                metadata_size,
                ..content
            },
        )?;

        let pending: Vec<_> = self.raw_values.pending().collect();
        for (key, kind, slot) in pending {
            let Some(&address) = writer.entry_rvas(kind).get(slot) else {
                return Err(Error::LayoutFailed(format!(
                    "{}[{}] points at missing slot {}",
                    key.table.name(),
                    key.rid,
                    slot
                )));
            };
            self.raw_values.resolve(key, address)?;
        }
        let applied = self.raw_values.apply(&mut self.tables)?;
        debug!(applied, "resolved raw values");

        writer.write_before_metadata()?;

        let mut metadata = Vec::with_capacity(metadata_size as usize);
        root.write(&mut metadata)?;
        metadata.extend_from_slice(&self.tables.write(heap_flags)?);
        for (_, data) in &heaps {
            metadata.extend_from_slice(data);
        }
        writer.write_metadata(&metadata)?;

        writer.write_after_metadata()?;
        writer.finish(self.signer.as_deref())
    }

    /// Emit the image to `path`.
    ///
    /// The image is built in memory first; the file is only created once that succeeded
    /// and is removed again if writing it fails.
    ///
    /// # Errors
    /// See [`WriteSession::write_to_vec`]; also [`Error::Io`] for file failures.
    pub fn write_to_file<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let image = self.write_to_vec()?;
        let mut output = Output::create(path, image.len() as u64)?;
        output.write_at(0, &image)?;
        output.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file::File, metadata::streams::HeapWrite, writer::Machine};

    struct ZeroSigner;

    impl StrongNameSigner for ZeroSigner {
        fn signature_size(&self) -> u32 {
            16
        }

        fn sign(&self, digest: &[u8; 20]) -> Result<Vec<u8>> {
            Ok(digest[..16].to_vec())
        }
    }

    fn module(config: WriterConfig) -> WriteSession {
        let mut session = WriteSession::new(config);
        let name = session.strings_mut().register(Some("Main")).unwrap();
        let signature = session.blobs_mut().register(Some(&[0x00, 0x00, 0x01][..])).unwrap();
        session
            .add_row(TableId::MethodDef, Row::new(vec![0, 0, 0x0016, name, signature, 1]))
            .unwrap();
        session
    }

    #[test]
    fn body_rva_is_patched() {
        let mut session = module(WriterConfig::default());
        session.add_method_body(1, &MethodBody::new(vec![0x2A])).unwrap();
        let image = session.write_to_vec().unwrap();

        let file = File::from_mem(image).unwrap();
        let read = ReadSession::new(&file).unwrap();
        let rva = read.tables().row(TableId::MethodDef, 1).unwrap().get(0).unwrap();
        assert_ne!(rva, 0);
        assert_eq!(read.method_body(1).unwrap().unwrap().code, vec![0x2A]);
    }

    #[test]
    fn native_method_keeps_its_address() {
        let mut session = module(WriterConfig::default());
        session.add_method_body(1, &MethodBody::new(vec![0x2A])).unwrap();
        let name = session.strings_mut().register(Some("Native")).unwrap();
        let signature = session.blobs_mut().register(Some(&[0x00, 0x00, 0x01][..])).unwrap();
        session
            .add_row(TableId::MethodDef, Row::new(vec![0x2008, 0x0001, 0x0016, name, signature, 1]))
            .unwrap();

        let file = File::from_mem(session.write_to_vec().unwrap()).unwrap();
        let read = ReadSession::new(&file).unwrap();
        assert_eq!(read.method_code_type(2).unwrap(), MethodImplCodeType::NATIVE);
        assert!(read.method_body(2).unwrap().is_none());
        assert!(read.method_body(1).unwrap().is_some());

        let rewrite = WriteSession::from_read(&read, read.writer_config()).unwrap();
        let file = File::from_mem(rewrite.write_to_vec().unwrap()).unwrap();
        let reread = ReadSession::new(&file).unwrap();
        assert_eq!(reread.tables().row(TableId::MethodDef, 2).unwrap().get(0), Some(0x2008));
        assert_eq!(reread.method_body(1).unwrap().unwrap().code, vec![0x2A]);
    }

    #[test]
    fn unknown_rows_are_rejected() {
        let mut session = module(WriterConfig::default());
        assert!(matches!(
            session.add_method_body(2, &MethodBody::new(vec![0x2A])),
            Err(Error::MissingReference(_))
        ));
        assert!(matches!(
            session.add_field_data(1, vec![0; 4]),
            Err(Error::MissingReference(_))
        ));
    }

    #[test]
    fn signer_reserves_and_flags() {
        let session = module(WriterConfig::default().with_machine(Machine::Amd64))
            .with_signer(Box::new(ZeroSigner));
        assert_eq!(session.config().strong_name_size, 16);
        assert!(session.config().cor_flags.contains(CorFlags::STRONGNAMESIGNED));

        let image = session.write_to_vec().unwrap();
        let file = File::from_mem(image).unwrap();
        let read = ReadSession::new(&file).unwrap();
        assert_eq!(read.cor20_header().strong_name_signature_size, 16);
        assert!(read.cor20_header().cor_flags().contains(CorFlags::STRONGNAMESIGNED));
    }
}
