//! Column widths of the tables stream.
//!
//! Every index column is 2 or 4 bytes wide depending on the row counts of the tables
//! it can point into and on the heap-size flags of the stream header.

use std::sync::Arc;
use strum::{EnumCount, IntoEnumIterator};

use crate::metadata::tables::{CodedIndexType, TableId};

/// Heap-size flag: `#Strings` indexes are 4 bytes wide
pub const HEAP_LARGE_STRINGS: u8 = 0x01;
/// Heap-size flag: `#GUID` indexes are 4 bytes wide
pub const HEAP_LARGE_GUID: u8 = 0x02;
/// Heap-size flag: `#Blob` indexes are 4 bytes wide
pub const HEAP_LARGE_BLOB: u8 = 0x04;

/// Row count of one table plus the derived index width.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct TableRowInfo {
    /// Number of rows
    pub rows: u32,
    /// Bits needed to store the largest row index
    pub bits: u8,
    /// True if simple indexes into this table need 4 bytes
    pub is_large: bool,
}

impl TableRowInfo {
    /// Derive the index width for a table holding `rows` rows
    #[must_use]
    pub fn new(rows: u32) -> Self {
        let bits = if rows == 0 {
            1
        } else {
            (32 - rows.leading_zeros()) as u8
        };

        Self {
            rows,
            bits,
            is_large: rows > u32::from(u16::MAX),
        }
    }
}

/// Column widths of a tables stream.
///
/// Every heap index, simple table index and coded index is either 2 or 4 bytes. The
/// widths depend on the heap-size flags and on the row counts of all tables, so they
/// are computed once, before any row is read or written.
#[derive(Clone, Debug)]
pub struct TableInfo {
    rows: Vec<TableRowInfo>,
    coded_indexes: Vec<u8>,
    heap_flags: u8,
}

/// Shared [`TableInfo`]
pub type TableInfoRef = Arc<TableInfo>;

impl TableInfo {
    /// Build from per-table row counts (indexed by [`TableId`]) and the heap-size flags.
    #[must_use]
    pub fn new(row_counts: &[u32], heap_flags: u8) -> Self {
        let mut rows = vec![TableRowInfo::default(); TableId::COUNT];
        for (slot, count) in rows.iter_mut().zip(row_counts) {
            *slot = TableRowInfo::new(*count);
        }

        let mut info = TableInfo {
            rows,
            coded_indexes: vec![0; CodedIndexType::COUNT],
            heap_flags,
        };

        for coded_index in CodedIndexType::iter() {
            info.coded_indexes[coded_index as usize] = info.coded_index_size(coded_index);
        }

        info
    }

    #[cfg(test)]
    pub(crate) fn new_test(valid_tables: &[(TableId, u32)], heap_flags: u8) -> Self {
        let mut counts = vec![0u32; TableId::COUNT];
        for (table, rows) in valid_tables {
            counts[*table as usize] = *rows;
        }
        TableInfo::new(&counts, heap_flags)
    }

    /// The raw heap-size flags byte
    #[must_use]
    pub fn heap_flags(&self) -> u8 {
        self.heap_flags
    }

    /// Row information of `table`
    #[must_use]
    pub fn get(&self, table: TableId) -> &TableRowInfo {
        &self.rows[table as usize]
    }

    /// True if indexes into `table` are 4 bytes
    #[must_use]
    pub fn is_large(&self, table: TableId) -> bool {
        self.rows[table as usize].is_large
    }

    /// True if `#Strings` indexes are 4 bytes
    #[must_use]
    pub fn is_large_str(&self) -> bool {
        self.heap_flags & HEAP_LARGE_STRINGS != 0
    }

    /// True if `#GUID` indexes are 4 bytes
    #[must_use]
    pub fn is_large_guid(&self) -> bool {
        self.heap_flags & HEAP_LARGE_GUID != 0
    }

    /// True if `#Blob` indexes are 4 bytes
    #[must_use]
    pub fn is_large_blob(&self) -> bool {
        self.heap_flags & HEAP_LARGE_BLOB != 0
    }

    /// Width of a `#Strings` index
    #[must_use]
    pub fn str_bytes(&self) -> u8 {
        if self.is_large_str() {
            4
        } else {
            2
        }
    }

    /// Width of a `#GUID` index
    #[must_use]
    pub fn guid_bytes(&self) -> u8 {
        if self.is_large_guid() {
            4
        } else {
            2
        }
    }

    /// Width of a `#Blob` index
    #[must_use]
    pub fn blob_bytes(&self) -> u8 {
        if self.is_large_blob() {
            4
        } else {
            2
        }
    }

    /// Width of a simple index into `table`
    #[must_use]
    pub fn table_index_bytes(&self, table: TableId) -> u8 {
        if self.rows[table as usize].bits > 16 {
            4
        } else {
            2
        }
    }

    /// Total bits needed by a coded index (row bits of the largest candidate + tag bits)
    #[must_use]
    pub fn coded_index_bits(&self, coded_index_type: CodedIndexType) -> u8 {
        self.coded_indexes[coded_index_type as usize]
    }

    /// Width of a coded index
    #[must_use]
    pub fn coded_index_bytes(&self, coded_index_type: CodedIndexType) -> u8 {
        if self.coded_indexes[coded_index_type as usize] > 16 {
            4
        } else {
            2
        }
    }

    fn coded_index_size(&self, coded_index_type: CodedIndexType) -> u8 {
        let max_bits = coded_index_type
            .tables()
            .map(|table| self.rows[table as usize].bits)
            .max()
            .unwrap_or(1);

        max_bits + coded_index_type.tag_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_everything() {
        let info = TableInfo::new_test(&[(TableId::TypeDef, 10), (TableId::MethodDef, 200)], 0);
        assert_eq!(info.str_bytes(), 2);
        assert_eq!(info.guid_bytes(), 2);
        assert_eq!(info.blob_bytes(), 2);
        assert_eq!(info.table_index_bytes(TableId::MethodDef), 2);
        assert_eq!(info.coded_index_bytes(CodedIndexType::TypeDefOrRef), 2);
        assert_eq!(info.get(TableId::MethodDef).rows, 200);
    }

    #[test]
    fn heap_flags() {
        let info = TableInfo::new_test(&[], HEAP_LARGE_STRINGS | HEAP_LARGE_BLOB);
        assert_eq!(info.str_bytes(), 4);
        assert_eq!(info.guid_bytes(), 2);
        assert_eq!(info.blob_bytes(), 4);
    }

    #[test]
    fn coded_index_threshold() {
        // TypeDefOrRef has 2 tag bits: 2^14 rows still fit in 2 bytes, one more does not
        let info = TableInfo::new_test(&[(TableId::TypeRef, 0x3FFF)], 0);
        assert_eq!(info.coded_index_bytes(CodedIndexType::TypeDefOrRef), 2);

        let info = TableInfo::new_test(&[(TableId::TypeRef, 0x4000)], 0);
        assert_eq!(info.coded_index_bytes(CodedIndexType::TypeDefOrRef), 4);
        assert_eq!(info.table_index_bytes(TableId::TypeRef), 2);
        assert_eq!(info.coded_index_bytes(CodedIndexType::HasSemantics), 2);
    }

    #[test]
    fn large_table() {
        let info = TableInfo::new_test(&[(TableId::Field, 0x1_0000)], 0);
        assert!(info.is_large(TableId::Field));
        assert_eq!(info.table_index_bytes(TableId::Field), 4);
    }
}
