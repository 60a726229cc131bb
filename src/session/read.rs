//! Read side: decode a loaded image's metadata and resolve its raw values.

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::{
    assembly::Instruction,
    file::{io::read_le, File},
    metadata::{
        cor20header::{Cor20Header, CorFlags, COR20_HEADER_SIZE},
        method::{MethodBody, MethodImplCodeType},
        rawvalue::RawValueKey,
        root::Root,
        signatures::{SignatureParser, TypeSignature, MAX_RECURSION_DEPTH},
        streams::{Blob, Guid, HeapRead, Strings, UserStrings},
        tables::{TableId, TablesStream},
        token::Token,
    },
    writer::{Machine, WriterConfig},
    Error, Result,
};

/// Options controlling how a [`ReadSession`] loads a module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    /// Resolve method bodies, field data and resources while loading
    pub eager_raw_values: bool,
    /// Resolve raw values on the rayon thread pool
    pub parallel: bool,
    /// Nesting limit for signature decoding
    pub max_signature_depth: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            eager_raw_values: false,
            parallel: false,
            max_signature_depth: MAX_RECURSION_DEPTH,
        }
    }
}

impl ReadOptions {
    /// Resolve raw values during load
    #[must_use]
    pub fn with_eager_raw_values(mut self, eager: bool) -> Self {
        self.eager_raw_values = eager;
        self
    }

    /// Resolve raw values in parallel
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the signature nesting limit
    #[must_use]
    pub fn with_max_signature_depth(mut self, depth: usize) -> Self {
        self.max_signature_depth = depth;
        self
    }
}

/// Out-of-line content addressed by a raw-value column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawContent {
    /// A decoded method body
    MethodBody(MethodBody),
    /// Initial data of a static field
    FieldData(Vec<u8>),
    /// Bytes of an embedded resource
    Resource(Vec<u8>),
}

/// A module opened for reading.
///
/// Construction decodes the CLI header, the metadata root and every stream. Raw-value
/// columns (method bodies, field data, resources) are followed either during
/// construction or on first access, depending on [`ReadOptions::eager_raw_values`];
/// each resolved value is cached.
pub struct ReadSession<'a> {
    file: &'a File,
    options: ReadOptions,
    cor20: Cor20Header,
    root: Root,
    tables: TablesStream,
    strings: Option<Strings<'a>>,
    user_strings: Option<UserStrings<'a>>,
    blobs: Option<Blob<'a>>,
    guids: Option<Guid<'a>>,
    heaps: Vec<(String, &'a [u8])>,
    resolved: DashMap<RawValueKey, Option<RawContent>>,
}

impl<'a> ReadSession<'a> {
    /// Open `file` with default options.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for images without a CLI header, or
    /// [`Error::Malformed`] if the CLI header, the metadata root or the tables stream
    /// cannot be decoded.
    pub fn new(file: &'a File) -> Result<Self> {
        Self::with_options(file, ReadOptions::default())
    }

    /// Open `file` with `options`.
    ///
    /// # Errors
    /// See [`ReadSession::new`]; with eager resolution also any error of
    /// [`ReadSession::resolve_raw_values`].
    pub fn with_options(file: &'a File, options: ReadOptions) -> Result<Self> {
        let (clr_rva, clr_size) = file.clr();
        if clr_rva == 0 || clr_size < COR20_HEADER_SIZE {
            return Err(Error::NotSupported);
        }
        let clr_offset = file.rva_to_offset(clr_rva)?;
        let cor20 = Cor20Header::read(file.data_slice(clr_offset, COR20_HEADER_SIZE as usize)?)?;

        let metadata_offset = file.rva_to_offset(cor20.meta_data_rva)?;
        let metadata = file.data_slice(metadata_offset, cor20.meta_data_size as usize)?;
        let root = Root::read(metadata)?;

        let mut tables = None;
        let mut strings = None;
        let mut user_strings = None;
        let mut blobs = None;
        let mut guids = None;
        let mut heaps = Vec::new();

        for header in &root.stream_headers {
            let start = header.offset as usize;
            let Some(data) = metadata.get(start..start + header.size as usize) else {
                return Err(malformed_error!("Stream {} exceeds the metadata", header.name));
            };

            match header.name.as_str() {
                "#~" | "#-" => tables = Some(TablesStream::read(data)?),
                "#Strings" => strings = Some(Strings::from(data)?),
                "#US" => user_strings = Some(UserStrings::from(data)?),
                "#Blob" => blobs = Some(Blob::from(data)?),
                "#GUID" => guids = Some(Guid::from(data)?),
                other => {
                    trace!(stream = other, "skipping unknown stream");
                    continue;
                }
            }
            if header.name != "#~" && header.name != "#-" {
                heaps.push((header.name.clone(), data));
            }
        }

        let Some(tables) = tables else {
            return Err(malformed_error!("Metadata has no tables stream"));
        };

        debug!(
            version = %root.version,
            tables = tables.present().count(),
            flags = cor20.flags,
            "loaded metadata"
        );

        let session = ReadSession {
            file,
            options,
            cor20,
            root,
            tables,
            strings,
            user_strings,
            blobs,
            guids,
            heaps,
            resolved: DashMap::new(),
        };

        if session.options.eager_raw_values {
            session.resolve_raw_values()?;
        }
        Ok(session)
    }

    /// The underlying image
    #[must_use]
    pub fn file(&self) -> &'a File {
        self.file
    }

    /// The options the session was opened with
    #[must_use]
    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// The CLI header
    #[must_use]
    pub fn cor20_header(&self) -> &Cor20Header {
        &self.cor20
    }

    /// The metadata root
    #[must_use]
    pub fn root(&self) -> &Root {
        &self.root
    }

    /// All table rows
    #[must_use]
    pub fn tables(&self) -> &TablesStream {
        &self.tables
    }

    /// The `#Strings` heap
    #[must_use]
    pub fn strings(&self) -> Option<&Strings<'a>> {
        self.strings.as_ref()
    }

    /// The `#US` heap
    #[must_use]
    pub fn user_strings(&self) -> Option<&UserStrings<'a>> {
        self.user_strings.as_ref()
    }

    /// The `#Blob` heap
    #[must_use]
    pub fn blobs(&self) -> Option<&Blob<'a>> {
        self.blobs.as_ref()
    }

    /// The `#GUID` heap
    #[must_use]
    pub fn guids(&self) -> Option<&Guid<'a>> {
        self.guids.as_ref()
    }

    /// Raw bytes of the heap stream called `name`
    #[must_use]
    pub fn heap_data(&self, name: &str) -> Option<&'a [u8]> {
        self.heaps
            .iter()
            .find(|(heap, _)| heap == name)
            .map(|(_, data)| *data)
    }

    /// The entry point token of the CLI header
    #[must_use]
    pub fn entry_point(&self) -> Token {
        Token::new(self.cor20.entry_point_token)
    }

    /// A writer configuration reproducing this image's headers.
    ///
    /// The strong-name flag is cleared; attach a signer to the write session to sign
    /// again.
    #[must_use]
    pub fn writer_config(&self) -> WriterConfig {
        let mut flags = self.cor20.cor_flags();
        flags.remove(CorFlags::STRONGNAMESIGNED);

        let machine = Machine::from_value(self.file.machine()).unwrap_or(if self.file.is_pe32_plus() {
            Machine::Amd64
        } else {
            Machine::I386
        });

        WriterConfig::default()
            .with_machine(machine)
            .with_alignment(self.file.file_alignment(), self.file.section_alignment())
            .with_image_base(self.file.image_base())
            .with_subsystem(self.file.subsystem(), (4, 0))
            .with_dll(self.file.is_dll())
            .with_runtime_version(self.root.version.clone())
            .with_cor_flags(flags)
            .with_entry_point(self.entry_point())
            .with_timestamp(self.file.timestamp())
    }

    fn raw_value_keys(&self) -> Vec<RawValueKey> {
        [TableId::MethodDef, TableId::FieldRVA, TableId::ManifestResource]
            .into_iter()
            .flat_map(|table| (1..=self.tables.row_count(table)).map(move |rid| RawValueKey { table, rid }))
            .collect()
    }

    /// Follow every raw-value column and cache the content.
    ///
    /// Returns the number of columns that point at content.
    ///
    /// # Errors
    /// Returns the first error of [`ReadSession::raw_value`].
    pub fn resolve_raw_values(&self) -> Result<usize> {
        let keys = self.raw_value_keys();
        let resolved: Vec<Option<RawContent>> = if self.options.parallel {
            keys.par_iter().map(|key| self.raw_value(*key)).collect::<Result<_>>()?
        } else {
            keys.iter().map(|key| self.raw_value(*key)).collect::<Result<_>>()?
        };

        let count = resolved.iter().filter(|content| content.is_some()).count();
        debug!(columns = keys.len(), resolved = count, parallel = self.options.parallel, "resolved raw values");
        Ok(count)
    }

    /// Content behind the raw-value column of `key`, `None` if the column is empty or
    /// points outside this image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the addressed content cannot be decoded.
    pub fn raw_value(&self, key: RawValueKey) -> Result<Option<RawContent>> {
        if let Some(cached) = self.resolved.get(&key) {
            return Ok(cached.value().clone());
        }

        let content = match key.table {
            TableId::MethodDef => self.decode_method_body(key.rid)?.map(RawContent::MethodBody),
            TableId::FieldRVA => self.decode_field_data(key.rid)?.map(RawContent::FieldData),
            TableId::ManifestResource => self.decode_resource(key.rid)?.map(RawContent::Resource),
            other => {
                return Err(malformed_error!("{} has no raw-value column", other.name()));
            }
        };

        trace!(table = key.table.name(), rid = key.rid, found = content.is_some(), "resolved raw value");
        self.resolved.insert(key, content.clone());
        Ok(content)
    }

    /// Body of `MethodDef` row `rid`, `None` for methods without IL.
    ///
    /// # Errors
    /// See [`ReadSession::raw_value`].
    pub fn method_body(&self, rid: u32) -> Result<Option<MethodBody>> {
        match self.raw_value(RawValueKey { table: TableId::MethodDef, rid })? {
            Some(RawContent::MethodBody(body)) => Ok(Some(body)),
            _ => Ok(None),
        }
    }

    /// Implementation kind of `MethodDef` row `rid`, from its `ImplFlags` column.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the row does not exist.
    pub fn method_code_type(&self, rid: u32) -> Result<MethodImplCodeType> {
        Ok(MethodImplCodeType::from_impl_flags(self.column(
            TableId::MethodDef,
            rid,
            1,
        )?))
    }

    /// Decoded IL of `MethodDef` row `rid`.
    ///
    /// # Errors
    /// See [`ReadSession::raw_value`] and [`MethodBody::instructions`].
    pub fn instructions(&self, rid: u32) -> Result<Option<Vec<Instruction>>> {
        match self.method_body(rid)? {
            Some(body) => Ok(Some(body.instructions(self.user_strings.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Initial data of `FieldRVA` row `rid`, `None` if its size cannot be determined.
    ///
    /// # Errors
    /// See [`ReadSession::raw_value`].
    pub fn field_data(&self, rid: u32) -> Result<Option<Vec<u8>>> {
        match self.raw_value(RawValueKey { table: TableId::FieldRVA, rid })? {
            Some(RawContent::FieldData(data)) => Ok(Some(data)),
            _ => Ok(None),
        }
    }

    /// Bytes of `ManifestResource` row `rid`, `None` if it lives in another file.
    ///
    /// # Errors
    /// See [`ReadSession::raw_value`].
    pub fn resource(&self, rid: u32) -> Result<Option<Vec<u8>>> {
        match self.raw_value(RawValueKey { table: TableId::ManifestResource, rid })? {
            Some(RawContent::Resource(data)) => Ok(Some(data)),
            _ => Ok(None),
        }
    }

    fn column(&self, table: TableId, rid: u32, column: usize) -> Result<u32> {
        self.tables
            .row(table, rid)
            .and_then(|row| row.get(column))
            .ok_or_else(|| malformed_error!("{}[{}] does not exist", table.name(), rid))
    }

    fn decode_method_body(&self, rid: u32) -> Result<Option<MethodBody>> {
        let rva = self.column(TableId::MethodDef, rid, 0)?;
        if rva == 0 {
            return Ok(None);
        }

        let code_type = self.method_code_type(rid)?;
        if code_type != MethodImplCodeType::IL {
            trace!(rid, rva, ?code_type, "skipping non-IL method body");
            return Ok(None);
        }

        let offset = self.file.rva_to_offset(rva)?;
        let Some(data) = self.file.data().get(offset..) else {
            return Err(out_of_bounds_error!());
        };
        let (body, _) = MethodBody::read(data)?;
        Ok(Some(body))
    }

    fn decode_field_data(&self, rid: u32) -> Result<Option<Vec<u8>>> {
        let rva = self.column(TableId::FieldRVA, rid, 0)?;
        let field = self.column(TableId::FieldRVA, rid, 1)?;
        if rva == 0 {
            return Ok(None);
        }

        let Some(size) = self.field_size(field)? else {
            warn!(field, "cannot size static field data");
            return Ok(None);
        };

        let offset = self.file.rva_to_offset(rva)?;
        Ok(Some(self.file.data_slice(offset, size as usize)?.to_vec()))
    }

    fn decode_resource(&self, rid: u32) -> Result<Option<Vec<u8>>> {
        let offset = self.column(TableId::ManifestResource, rid, 0)?;
        let implementation = self.column(TableId::ManifestResource, rid, 3)?;
        if implementation != 0 {
            return Ok(None);
        }
        if self.cor20.resource_rva == 0 {
            return Err(malformed_error!(
                "ManifestResource[{}] is embedded but the image has no resources",
                rid
            ));
        }
        if offset >= self.cor20.resource_size {
            return Err(malformed_error!(
                "ManifestResource[{}] offset 0x{:X} exceeds the resources directory",
                rid,
                offset
            ));
        }

        let start = self.file.rva_to_offset(self.cor20.resource_rva + offset)?;
        let length = read_le::<u32>(self.file.data_slice(start, 4)?)?;
        let end = u64::from(offset) + 4 + u64::from(length);
        if end > u64::from(self.cor20.resource_size) {
            return Err(malformed_error!(
                "ManifestResource[{}] of {} bytes overruns the resources directory",
                rid,
                length
            ));
        }

        Ok(Some(self.file.data_slice(start + 4, length as usize)?.to_vec()))
    }

    /// Size of the static data of `Field` row `field`, from its signature.
    fn field_size(&self, field: u32) -> Result<Option<u32>> {
        let signature = self.column(TableId::Field, field, 2)?;
        let Some(blob) = self.blobs.as_ref().and_then(|blobs| blobs.get(signature)) else {
            warn!(field, signature, "unresolved field signature");
            return Ok(None);
        };

        let mut parser = SignatureParser::with_max_depth(blob, self.options.max_signature_depth);
        let signature = parser.parse_field_signature()?;
        Ok(self.value_size(&signature.base))
    }

    fn value_size(&self, ty: &TypeSignature) -> Option<u32> {
        if let Some(size) = ty.fixed_size() {
            return Some(size);
        }

        match ty {
            TypeSignature::I | TypeSignature::U | TypeSignature::Ptr(_) | TypeSignature::FnPtr(_) => {
                Some(if self.file.is_pe32_plus() { 8 } else { 4 })
            }
            TypeSignature::ValueType(token) if token.table_id() == Some(TableId::TypeDef) => self
                .tables
                .rows(TableId::ClassLayout)
                .iter()
                .find(|layout| layout.get(2) == Some(token.row()))
                .and_then(|layout| layout.get(1)),
            TypeSignature::Modified(_, inner) => self.value_size(inner),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{streams::HeapWrite, tables::Row},
        session::WriteSession,
    };

    #[test]
    fn options() {
        let options = ReadOptions::default();
        assert!(!options.eager_raw_values);
        assert!(!options.parallel);
        assert_eq!(options.max_signature_depth, 50);

        let options = options.with_parallel(true).with_max_signature_depth(8);
        assert!(options.parallel);
        assert_eq!(options.max_signature_depth, 8);
    }

    /// A value-type field sized through `ClassLayout`, and a resource living in
    /// another file.
    fn image() -> Vec<u8> {
        let mut session = WriteSession::new(WriterConfig::default().with_machine(Machine::Amd64));
        let name = session.strings_mut().register(Some("Blob12")).unwrap();
        session
            .add_row(TableId::TypeDef, Row::new(vec![0x0100, name, 0, 0, 1, 1]))
            .unwrap();
        session
            .add_row(TableId::ClassLayout, Row::new(vec![1, 12, 1]))
            .unwrap();

        #[rustfmt::skip]
        let valuetype = [0x06, 0x11, 0x04];
        let blob12 = session.blobs_mut().register(Some(&valuetype[..])).unwrap();
        let native_int = session.blobs_mut().register(Some(&[0x06, 0x18][..])).unwrap();
        session.add_row(TableId::Field, Row::new(vec![0x0113, name, blob12])).unwrap();
        session.add_row(TableId::Field, Row::new(vec![0x0113, name, native_int])).unwrap();
        session.add_row(TableId::FieldRVA, Row::new(vec![0, 1])).unwrap();
        session.add_row(TableId::FieldRVA, Row::new(vec![0, 2])).unwrap();
        session.add_field_data(1, (1..=12).collect()).unwrap();
        session.add_field_data(2, vec![0xAA; 8]).unwrap();

        session.add_row(TableId::File, Row::new(vec![0, name, 0])).unwrap();
        session
            .add_row(TableId::ManifestResource, Row::new(vec![0, 1, name, 0x2600_0001]))
            .unwrap();
        session.write_to_vec().unwrap()
    }

    #[test]
    fn field_sizes() {
        let file = File::from_mem(image()).unwrap();
        let session = ReadSession::new(&file).unwrap();

        assert_eq!(session.field_data(1).unwrap(), Some((1..=12).collect()));
        assert_eq!(session.field_data(2).unwrap(), Some(vec![0xAA; 8]));
        assert_eq!(session.resource(1).unwrap(), None);
        assert!(session.method_body(1).is_err());
    }

    #[test]
    fn resource_bounded_by_directory() {
        let mut session = WriteSession::new(WriterConfig::default());
        let name = session.strings_mut().register(Some("Payload")).unwrap();
        session
            .add_row(TableId::ManifestResource, Row::new(vec![0, 1, name, 0]))
            .unwrap();
        session.add_resource(1, &[0x5A; 16]).unwrap();
        let mut data = session.write_to_vec().unwrap();

        let file = File::from_mem(data.clone()).unwrap();
        let session = ReadSession::new(&file).unwrap();
        assert_eq!(session.resource(1).unwrap(), Some(vec![0x5A; 16]));

        // Shrink the directory so the entry's payload runs past its end.
        let header = file.rva_to_offset(file.clr().0).unwrap();
        data[header + 28..header + 32].copy_from_slice(&12u32.to_le_bytes());
        let file = File::from_mem(data).unwrap();
        let session = ReadSession::new(&file).unwrap();
        assert_eq!(session.cor20_header().resource_size, 12);
        assert!(matches!(session.resource(1), Err(Error::Malformed { .. })));
    }

    #[test]
    fn eager_matches_lazy() {
        let file = File::from_mem(image()).unwrap();
        let lazy = ReadSession::new(&file).unwrap();
        let eager = ReadSession::with_options(
            &file,
            ReadOptions::default().with_eager_raw_values(true).with_parallel(true),
        )
        .unwrap();

        for rid in 1..=2 {
            assert_eq!(lazy.field_data(rid).unwrap(), eager.field_data(rid).unwrap());
        }
        assert_eq!(eager.resolve_raw_values().unwrap(), 2);
    }

    #[test]
    fn writer_config_roundtrip() {
        let file = File::from_mem(image()).unwrap();
        let session = ReadSession::new(&file).unwrap();
        let config = session.writer_config();

        assert_eq!(config.machine, Machine::Amd64);
        assert_eq!(config.image_base, 0x1_4000_0000);
        assert_eq!(config.runtime_version, "v4.0.30319");
        assert!(!config.cor_flags.contains(CorFlags::STRONGNAMESIGNED));
    }
}
