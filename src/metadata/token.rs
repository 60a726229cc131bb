//! Metadata tokens.
//!
//! A token packs a table id into the top byte and a 1-based row index into the lower
//! 24 bits. Row 0 never exists, so a token with row 0 is a null reference. User-string
//! tokens (table byte `0x70`) carry a `#US` heap offset instead of a row.

use std::fmt;

use crate::{metadata::tables::TableId, Result};

/// Table byte used by `ldstr` operands to address the user-string heap.
pub const USER_STRING_TABLE: u8 = 0x70;

/// A metadata token (`table << 24 | row`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Wrap a raw token value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Build a token from a table and 1-based row
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Build a user-string token for a `#US` heap offset
    #[must_use]
    pub fn user_string(offset: u32) -> Self {
        Token((u32::from(USER_STRING_TABLE) << 24) | (offset & 0x00FF_FFFF))
    }

    /// The raw value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The table byte
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The table byte as a [`TableId`], if it names a metadata table
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_u8(self.table())
    }

    /// The 1-based row (or heap offset for user strings)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// True when the row part is zero
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.row() == 0
    }

    /// True for `#US` heap references
    #[must_use]
    pub fn is_user_string(&self) -> bool {
        self.table() == USER_STRING_TABLE
    }

    /// Decode the compressed `TypeDefOrRefOrSpec` form used inside signatures
    /// (row << 2 | tag, tag 0 = TypeDef, 1 = TypeRef, 2 = TypeSpec).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for tag 3.
    pub fn from_type_def_or_ref(encoded: u32) -> Result<Self> {
        let table = match encoded & 0x3 {
            0 => TableId::TypeDef,
            1 => TableId::TypeRef,
            2 => TableId::TypeSpec,
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - 0x{:X}",
                    encoded
                ))
            }
        };

        Ok(Token::from_parts(table, encoded >> 2))
    }

    /// Encode into the compressed `TypeDefOrRefOrSpec` form.
    ///
    /// # Errors
    /// Returns [`crate::Error::SignatureEncoding`] if the token points elsewhere.
    pub fn to_type_def_or_ref(&self) -> Result<u32> {
        let tag = match self.table_id() {
            Some(TableId::TypeDef) => 0,
            Some(TableId::TypeRef) => 1,
            Some(TableId::TypeSpec) => 2,
            _ => {
                return Err(crate::Error::SignatureEncoding(format!(
                    "token {self} is not a TypeDef, TypeRef or TypeSpec"
                )))
            }
        };

        Ok((self.row() << 2) | tag)
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
