//! Column layouts of every metadata table.
//!
//! Instead of one hand-written reader and writer per table, each [`TableId`] maps to a
//! static list of [`Column`]s. Row decoding and encoding then become a loop over that
//! list, with the byte width of each column taken from a [`TableInfo`].
//!
//! Values are stored as `u32` regardless of the column kind: fixed scalars verbatim,
//! heap columns as heap offsets, simple indexes as 1-based rows and coded indexes as
//! the decoded token (`table << 24 | row`). Column values are thereby independent of
//! the 2/4-byte widths, which lets a row read from one image be written into another
//! with different widths.

use crate::{
    file::io::{push_le, push_le_dyn, read_le_at, read_le_at_dyn},
    metadata::{
        rawvalue::RawValueKind,
        tables::{CodedIndexType, TableId, TableInfo},
        token::Token,
    },
    Result,
};

/// The four metadata heaps a column can index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// `#Strings`
    String,
    /// `#GUID`
    Guid,
    /// `#Blob`
    Blob,
}

/// How a column is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    /// 2-byte scalar
    U16,
    /// 4-byte scalar
    U32,
    /// Index into a heap
    Heap(HeapKind),
    /// Simple index into one table
    Table(TableId),
    /// Coded index into one of several tables
    Coded(CodedIndexType),
    /// 4-byte RVA or offset that is only known once the image is laid out
    Raw(RawValueKind),
}

/// One column of a table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: &'static str,
    /// Storage kind
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

use ColumnKind::{Coded, Heap, Raw, Table, U16, U32};
use HeapKind::{Blob, Guid, String as Str};

#[rustfmt::skip]
static MODULE: [Column; 5] = [
    col("Generation", U16),
    col("Name", Heap(Str)),
    col("Mvid", Heap(Guid)),
    col("EncId", Heap(Guid)),
    col("EncBaseId", Heap(Guid)),
];

#[rustfmt::skip]
static TYPE_REF: [Column; 3] = [
    col("ResolutionScope", Coded(CodedIndexType::ResolutionScope)),
    col("TypeName", Heap(Str)),
    col("TypeNamespace", Heap(Str)),
];

#[rustfmt::skip]
static TYPE_DEF: [Column; 6] = [
    col("Flags", U32),
    col("TypeName", Heap(Str)),
    col("TypeNamespace", Heap(Str)),
    col("Extends", Coded(CodedIndexType::TypeDefOrRef)),
    col("FieldList", Table(TableId::Field)),
    col("MethodList", Table(TableId::MethodDef)),
];

static FIELD_PTR: [Column; 1] = [col("Field", Table(TableId::Field))];

#[rustfmt::skip]
static FIELD: [Column; 3] = [
    col("Flags", U16),
    col("Name", Heap(Str)),
    col("Signature", Heap(Blob)),
];

static METHOD_PTR: [Column; 1] = [col("Method", Table(TableId::MethodDef))];

#[rustfmt::skip]
static METHOD_DEF: [Column; 6] = [
    col("RVA", Raw(RawValueKind::MethodBody)),
    col("ImplFlags", U16),
    col("Flags", U16),
    col("Name", Heap(Str)),
    col("Signature", Heap(Blob)),
    col("ParamList", Table(TableId::Param)),
];

static PARAM_PTR: [Column; 1] = [col("Param", Table(TableId::Param))];

#[rustfmt::skip]
static PARAM: [Column; 3] = [
    col("Flags", U16),
    col("Sequence", U16),
    col("Name", Heap(Str)),
];

#[rustfmt::skip]
static INTERFACE_IMPL: [Column; 2] = [
    col("Class", Table(TableId::TypeDef)),
    col("Interface", Coded(CodedIndexType::TypeDefOrRef)),
];

#[rustfmt::skip]
static MEMBER_REF: [Column; 3] = [
    col("Class", Coded(CodedIndexType::MemberRefParent)),
    col("Name", Heap(Str)),
    col("Signature", Heap(Blob)),
];

// The element type byte is followed by a padding byte; both live in one 2-byte column.
#[rustfmt::skip]
static CONSTANT: [Column; 3] = [
    col("Type", U16),
    col("Parent", Coded(CodedIndexType::HasConstant)),
    col("Value", Heap(Blob)),
];

#[rustfmt::skip]
static CUSTOM_ATTRIBUTE: [Column; 3] = [
    col("Parent", Coded(CodedIndexType::HasCustomAttribute)),
    col("Type", Coded(CodedIndexType::CustomAttributeType)),
    col("Value", Heap(Blob)),
];

#[rustfmt::skip]
static FIELD_MARSHAL: [Column; 2] = [
    col("Parent", Coded(CodedIndexType::HasFieldMarshal)),
    col("NativeType", Heap(Blob)),
];

#[rustfmt::skip]
static DECL_SECURITY: [Column; 3] = [
    col("Action", U16),
    col("Parent", Coded(CodedIndexType::HasDeclSecurity)),
    col("PermissionSet", Heap(Blob)),
];

#[rustfmt::skip]
static CLASS_LAYOUT: [Column; 3] = [
    col("PackingSize", U16),
    col("ClassSize", U32),
    col("Parent", Table(TableId::TypeDef)),
];

#[rustfmt::skip]
static FIELD_LAYOUT: [Column; 2] = [
    col("Offset", U32),
    col("Field", Table(TableId::Field)),
];

static STAND_ALONE_SIG: [Column; 1] = [col("Signature", Heap(Blob))];

#[rustfmt::skip]
static EVENT_MAP: [Column; 2] = [
    col("Parent", Table(TableId::TypeDef)),
    col("EventList", Table(TableId::Event)),
];

static EVENT_PTR: [Column; 1] = [col("Event", Table(TableId::Event))];

#[rustfmt::skip]
static EVENT: [Column; 3] = [
    col("EventFlags", U16),
    col("Name", Heap(Str)),
    col("EventType", Coded(CodedIndexType::TypeDefOrRef)),
];

#[rustfmt::skip]
static PROPERTY_MAP: [Column; 2] = [
    col("Parent", Table(TableId::TypeDef)),
    col("PropertyList", Table(TableId::Property)),
];

static PROPERTY_PTR: [Column; 1] = [col("Property", Table(TableId::Property))];

#[rustfmt::skip]
static PROPERTY: [Column; 3] = [
    col("Flags", U16),
    col("Name", Heap(Str)),
    col("Type", Heap(Blob)),
];

#[rustfmt::skip]
static METHOD_SEMANTICS: [Column; 3] = [
    col("Semantics", U16),
    col("Method", Table(TableId::MethodDef)),
    col("Association", Coded(CodedIndexType::HasSemantics)),
];

#[rustfmt::skip]
static METHOD_IMPL: [Column; 3] = [
    col("Class", Table(TableId::TypeDef)),
    col("MethodBody", Coded(CodedIndexType::MethodDefOrRef)),
    col("MethodDeclaration", Coded(CodedIndexType::MethodDefOrRef)),
];

static MODULE_REF: [Column; 1] = [col("Name", Heap(Str))];

static TYPE_SPEC: [Column; 1] = [col("Signature", Heap(Blob))];

#[rustfmt::skip]
static IMPL_MAP: [Column; 4] = [
    col("MappingFlags", U16),
    col("MemberForwarded", Coded(CodedIndexType::MemberForwarded)),
    col("ImportName", Heap(Str)),
    col("ImportScope", Table(TableId::ModuleRef)),
];

#[rustfmt::skip]
static FIELD_RVA: [Column; 2] = [
    col("RVA", Raw(RawValueKind::FieldData)),
    col("Field", Table(TableId::Field)),
];

#[rustfmt::skip]
static ENC_LOG: [Column; 2] = [
    col("Token", U32),
    col("FuncCode", U32),
];

static ENC_MAP: [Column; 1] = [col("Token", U32)];

#[rustfmt::skip]
static ASSEMBLY: [Column; 9] = [
    col("HashAlgId", U32),
    col("MajorVersion", U16),
    col("MinorVersion", U16),
    col("BuildNumber", U16),
    col("RevisionNumber", U16),
    col("Flags", U32),
    col("PublicKey", Heap(Blob)),
    col("Name", Heap(Str)),
    col("Culture", Heap(Str)),
];

static ASSEMBLY_PROCESSOR: [Column; 1] = [col("Processor", U32)];

#[rustfmt::skip]
static ASSEMBLY_OS: [Column; 3] = [
    col("OSPlatformID", U32),
    col("OSMajorVersion", U32),
    col("OSMinorVersion", U32),
];

#[rustfmt::skip]
static ASSEMBLY_REF: [Column; 9] = [
    col("MajorVersion", U16),
    col("MinorVersion", U16),
    col("BuildNumber", U16),
    col("RevisionNumber", U16),
    col("Flags", U32),
    col("PublicKeyOrToken", Heap(Blob)),
    col("Name", Heap(Str)),
    col("Culture", Heap(Str)),
    col("HashValue", Heap(Blob)),
];

#[rustfmt::skip]
static ASSEMBLY_REF_PROCESSOR: [Column; 2] = [
    col("Processor", U32),
    col("AssemblyRef", Table(TableId::AssemblyRef)),
];

#[rustfmt::skip]
static ASSEMBLY_REF_OS: [Column; 4] = [
    col("OSPlatformId", U32),
    col("OSMajorVersion", U32),
    col("OSMinorVersion", U32),
    col("AssemblyRef", Table(TableId::AssemblyRef)),
];

#[rustfmt::skip]
static FILE: [Column; 3] = [
    col("Flags", U32),
    col("Name", Heap(Str)),
    col("HashValue", Heap(Blob)),
];

#[rustfmt::skip]
static EXPORTED_TYPE: [Column; 5] = [
    col("Flags", U32),
    col("TypeDefId", U32),
    col("TypeName", Heap(Str)),
    col("TypeNamespace", Heap(Str)),
    col("Implementation", Coded(CodedIndexType::Implementation)),
];

#[rustfmt::skip]
static MANIFEST_RESOURCE: [Column; 4] = [
    col("Offset", Raw(RawValueKind::Resource)),
    col("Flags", U32),
    col("Name", Heap(Str)),
    col("Implementation", Coded(CodedIndexType::Implementation)),
];

#[rustfmt::skip]
static NESTED_CLASS: [Column; 2] = [
    col("NestedClass", Table(TableId::TypeDef)),
    col("EnclosingClass", Table(TableId::TypeDef)),
];

#[rustfmt::skip]
static GENERIC_PARAM: [Column; 4] = [
    col("Number", U16),
    col("Flags", U16),
    col("Owner", Coded(CodedIndexType::TypeOrMethodDef)),
    col("Name", Heap(Str)),
];

#[rustfmt::skip]
static METHOD_SPEC: [Column; 2] = [
    col("Method", Coded(CodedIndexType::MethodDefOrRef)),
    col("Instantiation", Heap(Blob)),
];

#[rustfmt::skip]
static GENERIC_PARAM_CONSTRAINT: [Column; 2] = [
    col("Owner", Table(TableId::GenericParam)),
    col("Constraint", Coded(CodedIndexType::TypeDefOrRef)),
];

impl TableId {
    /// The column layout of this table
    #[must_use]
    pub fn columns(self) -> &'static [Column] {
        match self {
            TableId::Module => &MODULE,
            TableId::TypeRef => &TYPE_REF,
            TableId::TypeDef => &TYPE_DEF,
            TableId::FieldPtr => &FIELD_PTR,
            TableId::Field => &FIELD,
            TableId::MethodPtr => &METHOD_PTR,
            TableId::MethodDef => &METHOD_DEF,
            TableId::ParamPtr => &PARAM_PTR,
            TableId::Param => &PARAM,
            TableId::InterfaceImpl => &INTERFACE_IMPL,
            TableId::MemberRef => &MEMBER_REF,
            TableId::Constant => &CONSTANT,
            TableId::CustomAttribute => &CUSTOM_ATTRIBUTE,
            TableId::FieldMarshal => &FIELD_MARSHAL,
            TableId::DeclSecurity => &DECL_SECURITY,
            TableId::ClassLayout => &CLASS_LAYOUT,
            TableId::FieldLayout => &FIELD_LAYOUT,
            TableId::StandAloneSig => &STAND_ALONE_SIG,
            TableId::EventMap => &EVENT_MAP,
            TableId::EventPtr => &EVENT_PTR,
            TableId::Event => &EVENT,
            TableId::PropertyMap => &PROPERTY_MAP,
            TableId::PropertyPtr => &PROPERTY_PTR,
            TableId::Property => &PROPERTY,
            TableId::MethodSemantics => &METHOD_SEMANTICS,
            TableId::MethodImpl => &METHOD_IMPL,
            TableId::ModuleRef => &MODULE_REF,
            TableId::TypeSpec => &TYPE_SPEC,
            TableId::ImplMap => &IMPL_MAP,
            TableId::FieldRVA => &FIELD_RVA,
            TableId::EncLog => &ENC_LOG,
            TableId::EncMap => &ENC_MAP,
            TableId::Assembly => &ASSEMBLY,
            TableId::AssemblyProcessor => &ASSEMBLY_PROCESSOR,
            TableId::AssemblyOS => &ASSEMBLY_OS,
            TableId::AssemblyRef => &ASSEMBLY_REF,
            TableId::AssemblyRefProcessor => &ASSEMBLY_REF_PROCESSOR,
            TableId::AssemblyRefOS => &ASSEMBLY_REF_OS,
            TableId::File => &FILE,
            TableId::ExportedType => &EXPORTED_TYPE,
            TableId::ManifestResource => &MANIFEST_RESOURCE,
            TableId::NestedClass => &NESTED_CLASS,
            TableId::GenericParam => &GENERIC_PARAM,
            TableId::MethodSpec => &METHOD_SPEC,
            TableId::GenericParamConstraint => &GENERIC_PARAM_CONSTRAINT,
        }
    }

    /// Index of the column called `name`
    #[must_use]
    pub fn column_index(self, name: &str) -> Option<usize> {
        self.columns().iter().position(|column| column.name == name)
    }

    /// The column holding a layout-dependent value, if this table has one
    #[must_use]
    pub fn raw_value_column(self) -> Option<(usize, RawValueKind)> {
        self.columns()
            .iter()
            .enumerate()
            .find_map(|(index, column)| match column.kind {
                ColumnKind::Raw(kind) => Some((index, kind)),
                _ => None,
            })
    }

    /// Byte size of one row given the column widths in `info`
    #[must_use]
    pub fn row_size(self, info: &TableInfo) -> usize {
        self.columns()
            .iter()
            .map(|column| column.kind.size(info))
            .sum()
    }
}

impl ColumnKind {
    /// Byte width of the column
    #[must_use]
    pub fn size(&self, info: &TableInfo) -> usize {
        usize::from(match self {
            ColumnKind::U16 => 2,
            ColumnKind::U32 | ColumnKind::Raw(_) => 4,
            ColumnKind::Heap(HeapKind::String) => info.str_bytes(),
            ColumnKind::Heap(HeapKind::Guid) => info.guid_bytes(),
            ColumnKind::Heap(HeapKind::Blob) => info.blob_bytes(),
            ColumnKind::Table(table) => info.table_index_bytes(*table),
            ColumnKind::Coded(coded) => info.coded_index_bytes(*coded),
        })
    }

    /// Read one column value.
    ///
    /// # Errors
    /// Returns an error for truncated data or an invalid coded-index tag.
    pub fn read(&self, data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<u32> {
        match self {
            ColumnKind::U16 => Ok(u32::from(read_le_at::<u16>(data, offset)?)),
            ColumnKind::U32 | ColumnKind::Raw(_) => read_le_at::<u32>(data, offset),
            ColumnKind::Coded(coded) => {
                let raw = read_le_at_dyn(data, offset, self.size(info) == 4)?;
                Ok(coded.decode(raw)?.value())
            }
            _ => read_le_at_dyn(data, offset, self.size(info) == 4),
        }
    }

    /// Append one column value.
    ///
    /// # Errors
    /// Returns an error if the value does not fit the column width or a coded index
    /// refers to a table that is not one of its candidates.
    pub fn write(&self, buffer: &mut Vec<u8>, value: u32, info: &TableInfo) -> Result<()> {
        match self {
            ColumnKind::U16 => {
                let Ok(small) = u16::try_from(value) else {
                    return Err(malformed_error!("Value {} does not fit a 2-byte column", value));
                };
                push_le(buffer, small);
                Ok(())
            }
            ColumnKind::U32 | ColumnKind::Raw(_) => {
                push_le(buffer, value);
                Ok(())
            }
            ColumnKind::Coded(coded) => {
                let encoded = coded.encode(Token::new(value))?;
                push_le_dyn(buffer, encoded, self.size(info) == 4)
            }
            _ => push_le_dyn(buffer, value, self.size(info) == 4),
        }
    }
}
