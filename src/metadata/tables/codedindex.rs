use strum::{EnumCount, EnumIter};

use crate::{
    metadata::{tables::TableId, token::Token},
    Result,
};

/// The coded index kinds of ECMA-335 II.24.2.6.
///
/// A coded index packs a tag selecting one of several candidate tables into its low
/// bits and the row into the remaining bits. Its column width depends on the largest
/// candidate table and on the number of tag bits.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[repr(usize)]
pub enum CodedIndexType {
    /// `TypeDef`, `TypeRef`, `TypeSpec`
    TypeDefOrRef,
    /// `Field`, `Param`, `Property`
    HasConstant,
    /// Any table a custom attribute can be attached to
    HasCustomAttribute,
    /// `Field`, `Param`
    HasFieldMarshal,
    /// `TypeDef`, `MethodDef`, `Assembly`
    HasDeclSecurity,
    /// Parents of member references
    MemberRefParent,
    /// `Event`, `Property`
    HasSemantics,
    /// `MethodDef`, `MemberRef`
    MethodDefOrRef,
    /// `Field`, `MethodDef`
    MemberForwarded,
    /// `File`, `AssemblyRef`, `ExportedType`
    Implementation,
    /// Constructors of custom attributes (tags 2 and 3 only)
    CustomAttributeType,
    /// Scopes of type references
    ResolutionScope,
    /// Owners of generic parameters
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// Candidate tables, indexed by tag. `None` marks a reserved tag.
    ///
    /// Only `CustomAttributeType` has reserved tags (0, 1 and 4); they still count
    /// towards its tag width.
    #[must_use]
    pub fn slots(&self) -> &'static [Option<TableId>] {
        match self {
            CodedIndexType::TypeDefOrRef => {
                &[
                    Some(TableId::TypeDef),
                    Some(TableId::TypeRef),
                    Some(TableId::TypeSpec),
                ]
            }
            CodedIndexType::HasConstant => &[
                Some(TableId::Field),
                Some(TableId::Param),
                Some(TableId::Property),
            ],
            CodedIndexType::HasCustomAttribute => &[
                Some(TableId::MethodDef),
                Some(TableId::Field),
                Some(TableId::TypeRef),
                Some(TableId::TypeDef),
                Some(TableId::Param),
                Some(TableId::InterfaceImpl),
                Some(TableId::MemberRef),
                Some(TableId::Module),
                Some(TableId::DeclSecurity),
                Some(TableId::Property),
                Some(TableId::Event),
                Some(TableId::StandAloneSig),
                Some(TableId::ModuleRef),
                Some(TableId::TypeSpec),
                Some(TableId::Assembly),
                Some(TableId::AssemblyRef),
                Some(TableId::File),
                Some(TableId::ExportedType),
                Some(TableId::ManifestResource),
                Some(TableId::GenericParam),
                Some(TableId::GenericParamConstraint),
                Some(TableId::MethodSpec),
            ],
            CodedIndexType::HasFieldMarshal => &[Some(TableId::Field), Some(TableId::Param)],
            CodedIndexType::HasDeclSecurity => {
                &[Some(TableId::TypeDef), Some(TableId::MethodDef), Some(TableId::Assembly)]
            }
            CodedIndexType::MemberRefParent => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::ModuleRef),
                Some(TableId::MethodDef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexType::HasSemantics => &[Some(TableId::Event), Some(TableId::Property)],
            CodedIndexType::MethodDefOrRef => &[Some(TableId::MethodDef), Some(TableId::MemberRef)],
            CodedIndexType::MemberForwarded => &[Some(TableId::Field), Some(TableId::MethodDef)],
            CodedIndexType::Implementation => {
                &[Some(TableId::File), Some(TableId::AssemblyRef), Some(TableId::ExportedType)]
            }
            CodedIndexType::CustomAttributeType => &[
                None,
                None,
                Some(TableId::MethodDef),
                Some(TableId::MemberRef),
                None,
            ],
            CodedIndexType::ResolutionScope => &[
                Some(TableId::Module),
                Some(TableId::ModuleRef),
                Some(TableId::AssemblyRef),
                Some(TableId::TypeRef),
            ],
            CodedIndexType::TypeOrMethodDef => &[Some(TableId::TypeDef), Some(TableId::MethodDef)],
        }
    }

    /// The tables a value of this kind may reference
    pub fn tables(&self) -> impl Iterator<Item = TableId> {
        self.slots().iter().flatten().copied()
    }

    /// Number of low bits holding the tag
    #[must_use]
    pub fn tag_bits(&self) -> u8 {
        let count = self.slots().len();
        // ceil(log2(count)) for count >= 2
        (usize::BITS - (count - 1).leading_zeros()) as u8
    }

    /// The tag under which `table` is encoded, if it is a candidate
    #[must_use]
    pub fn tag_of(&self, table: TableId) -> Option<u32> {
        self.slots()
            .iter()
            .position(|candidate| *candidate == Some(table))
            .map(|position| position as u32)
    }

    /// Split an encoded value into the referenced token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag is reserved or outside the candidate
    /// list.
    pub fn decode(&self, value: u32) -> Result<Token> {
        let tag_bits = self.tag_bits();
        let tag = (value & ((1 << tag_bits) - 1)) as usize;

        let Some(table) = self.slots().get(tag).copied().flatten() else {
            return Err(malformed_error!(
                "Invalid tag {} for coded index {:?}",
                tag,
                self
            ));
        };

        Ok(Token::from_parts(table, value >> tag_bits))
    }

    /// Pack a token into its encoded value. A null token encodes as 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::MissingReference`] if the token's table is not a candidate.
    pub fn encode(&self, token: Token) -> Result<u32> {
        if token.is_null() {
            return Ok(0);
        }

        let tag = token
            .table_id()
            .and_then(|table| self.tag_of(table))
            .ok_or_else(|| {
                crate::Error::MissingReference(format!(
                    "token {token} cannot be stored in a {self:?} coded index"
                ))
            })?;

        Ok((token.row() << self.tag_bits()) | tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_bits() {
        assert_eq!(CodedIndexType::TypeDefOrRef.tag_bits(), 2);
        assert_eq!(CodedIndexType::HasFieldMarshal.tag_bits(), 1);
        assert_eq!(CodedIndexType::HasCustomAttribute.tag_bits(), 5);
        assert_eq!(CodedIndexType::CustomAttributeType.tag_bits(), 3);
        assert_eq!(CodedIndexType::ResolutionScope.tag_bits(), 2);
        assert_eq!(CodedIndexType::MemberRefParent.tag_bits(), 3);
    }

    #[test]
    fn decode_encode() {
        let token = CodedIndexType::TypeDefOrRef.decode(0x0D).unwrap();
        assert_eq!(token, Token::from_parts(TableId::TypeRef, 3));
        assert_eq!(CodedIndexType::TypeDefOrRef.encode(token).unwrap(), 0x0D);

        let ctor = CodedIndexType::CustomAttributeType.decode(0x1B).unwrap();
        assert_eq!(ctor, Token::from_parts(TableId::MemberRef, 3));
        assert_eq!(CodedIndexType::CustomAttributeType.encode(ctor).unwrap(), 0x1B);

        let method = Token::from_parts(TableId::MethodDef, 1);
        assert_eq!(CodedIndexType::CustomAttributeType.encode(method).unwrap(), 0x0A);
    }

    #[test]
    fn invalid_tag() {
        assert!(CodedIndexType::TypeDefOrRef.decode(0x03).is_err());
        assert!(CodedIndexType::HasSemantics
            .encode(Token::from_parts(TableId::Field, 1))
            .is_err());
    }

    #[test]
    fn reserved_tags_are_rejected() {
        let ctor = CodedIndexType::CustomAttributeType;
        for tag in [0, 1, 4] {
            assert!(ctor.decode((5 << 3) | tag).is_err());
        }
        assert!(ctor.decode((5 << 3) | 5).is_err());
        assert_eq!(ctor.tables().collect::<Vec<_>>(), [TableId::MethodDef, TableId::MemberRef]);
        assert_eq!(ctor.tag_of(TableId::MethodDef), Some(2));
        assert_eq!(ctor.tag_of(TableId::TypeDef), None);
    }

    #[test]
    fn null_encodes_as_zero() {
        let null = Token::from_parts(TableId::MethodDef, 0);
        assert_eq!(CodedIndexType::CustomAttributeType.encode(null).unwrap(), 0);
    }
}
