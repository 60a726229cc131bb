use strum::{EnumCount, EnumIter, FromRepr, IntoStaticStr};

/// Identifiers of the metadata tables (ECMA-335 II.22).
///
/// The discriminant is the table number used in tokens and in the `valid` bit
/// vector of the tables stream header. Every number from `0x00` to `0x2C` is
/// assigned, including the `*Ptr` indirection tables and the edit-and-continue
/// tables that only appear in unoptimized (`#-`) metadata.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, EnumIter, EnumCount, FromRepr,
    IntoStaticStr,
)]
#[repr(u8)]
pub enum TableId {
    /// The single row describing the current module
    Module = 0x00,
    /// References to types defined in other modules or assemblies
    TypeRef = 0x01,
    /// Types defined in this module
    TypeDef = 0x02,
    /// Indirection into `Field`
    FieldPtr = 0x03,
    /// Field definitions
    Field = 0x04,
    /// Indirection into `MethodDef`
    MethodPtr = 0x05,
    /// Method definitions, carrying the RVA of each body
    MethodDef = 0x06,
    /// Indirection into `Param`
    ParamPtr = 0x07,
    /// Parameter definitions
    Param = 0x08,
    /// Interfaces implemented by a type
    InterfaceImpl = 0x09,
    /// References to fields and methods of other types
    MemberRef = 0x0A,
    /// Compile-time constants of fields, params and properties
    Constant = 0x0B,
    /// Custom attribute instances
    CustomAttribute = 0x0C,
    /// Marshaling descriptors of fields and params
    FieldMarshal = 0x0D,
    /// Declarative security permission sets
    DeclSecurity = 0x0E,
    /// Explicit type layout
    ClassLayout = 0x0F,
    /// Explicit field offsets
    FieldLayout = 0x10,
    /// Standalone signatures (locals, `calli`)
    StandAloneSig = 0x11,
    /// Maps types to their event ranges
    EventMap = 0x12,
    /// Indirection into `Event`
    EventPtr = 0x13,
    /// Event definitions
    Event = 0x14,
    /// Maps types to their property ranges
    PropertyMap = 0x15,
    /// Indirection into `Property`
    PropertyPtr = 0x16,
    /// Property definitions
    Property = 0x17,
    /// Links events and properties to their accessor methods
    MethodSemantics = 0x18,
    /// Explicit method overrides
    MethodImpl = 0x19,
    /// References to other modules of the assembly
    ModuleRef = 0x1A,
    /// Type specifications (generic instances, arrays, ...)
    TypeSpec = 0x1B,
    /// P/Invoke mappings
    ImplMap = 0x1C,
    /// Fields with static initial data, carrying its RVA
    FieldRVA = 0x1D,
    /// Edit-and-continue log
    EncLog = 0x1E,
    /// Edit-and-continue token map
    EncMap = 0x1F,
    /// The assembly manifest
    Assembly = 0x20,
    /// Unused processor declaration
    AssemblyProcessor = 0x21,
    /// Unused operating system declaration
    AssemblyOS = 0x22,
    /// Referenced assemblies
    AssemblyRef = 0x23,
    /// Unused processor declaration of a reference
    AssemblyRefProcessor = 0x24,
    /// Unused operating system declaration of a reference
    AssemblyRefOS = 0x25,
    /// Files of a multi-file assembly
    File = 0x26,
    /// Types exported from other modules
    ExportedType = 0x27,
    /// Manifest resources, carrying the offset of embedded data
    ManifestResource = 0x28,
    /// Nesting relationships between types
    NestedClass = 0x29,
    /// Generic parameters of types and methods
    GenericParam = 0x2A,
    /// Generic method instantiations
    MethodSpec = 0x2B,
    /// Constraints on generic parameters
    GenericParamConstraint = 0x2C,
}

impl TableId {
    /// Look up a table by its number
    #[must_use]
    pub fn from_u8(value: u8) -> Option<TableId> {
        TableId::from_repr(value)
    }

    /// The table name as listed in ECMA-335 II.22
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn numbering_is_contiguous() {
        assert_eq!(TableId::COUNT, 0x2D);
        for (index, id) in TableId::iter().enumerate() {
            assert_eq!(id as usize, index);
            assert_eq!(TableId::from_u8(index as u8), Some(id));
        }
        assert_eq!(TableId::from_u8(0x2D), None);
    }

    #[test]
    fn names() {
        assert_eq!(TableId::FieldRVA.name(), "FieldRVA");
        assert_eq!(TableId::GenericParamConstraint.name(), "GenericParamConstraint");
    }
}
