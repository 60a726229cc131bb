//! The `#~` tables stream (ECMA-335 II.24.2.6).
//!
//! ```text
//! offset  size  field
//! 0       4     reserved (0)
//! 4       1     major version (2)
//! 5       1     minor version (0)
//! 6       1     heap-size flags
//! 7       1     reserved (1)
//! 8       8     valid tables bit vector
//! 16      8     sorted tables bit vector
//! 24      4*n   row count of every present table
//!         ...   rows, table by table in id order
//! ```
//!
//! Reading decodes the header, derives all column widths, then decodes every row.
//! Writing mirrors this: widths are derived from the row counts and the heap-size
//! flags first, then the header and all rows are emitted.

use strum::{EnumCount, IntoEnumIterator};
use tracing::{debug, trace};

use crate::{
    file::io::{push_le, read_le_at},
    metadata::{
        tables::{Row, TableId, TableInfo},
        token::Token,
    },
    Result,
};

/// Sorted-table mask emitted by common compilers
pub const DEFAULT_SORTED_MASK: u64 = 0x0000_1600_3301_FA00;

/// Heap-size flag announcing 4 bytes of extra data after the row counts
const HEAP_EXTRA_DATA: u8 = 0x40;

/// All rows of all tables of a module.
#[derive(Clone, Debug, PartialEq)]
pub struct TablesStream {
    /// Schema major version
    pub major_version: u8,
    /// Schema minor version
    pub minor_version: u8,
    /// Bit vector of tables flagged as sorted
    pub sorted: u64,
    /// Heap-size flags found while reading (informational, recomputed on write)
    pub heap_flags: u8,
    tables: Vec<Vec<Row>>,
}

impl Default for TablesStream {
    fn default() -> Self {
        Self::new()
    }
}

impl TablesStream {
    /// An empty version 2.0 tables stream
    #[must_use]
    pub fn new() -> Self {
        TablesStream {
            major_version: 2,
            minor_version: 0,
            sorted: DEFAULT_SORTED_MASK,
            heap_flags: 0,
            tables: vec![Vec::new(); TableId::COUNT],
        }
    }

    /// Decode a complete tables stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown tables, or if the declared row
    /// counts need more bytes than the stream holds.
    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < 24 {
            return Err(malformed_error!(
                "Tables stream of {} bytes is shorter than its header",
                data.len()
            ));
        }

        let mut offset = 4;
        let major_version = read_le_at::<u8>(data, &mut offset)?;
        let minor_version = read_le_at::<u8>(data, &mut offset)?;
        let heap_flags = read_le_at::<u8>(data, &mut offset)?;
        offset += 1;
        let valid = read_le_at::<u64>(data, &mut offset)?;
        let sorted = read_le_at::<u64>(data, &mut offset)?;

        if valid >> TableId::COUNT != 0 {
            return Err(malformed_error!(
                "Tables stream declares unsupported tables - valid mask 0x{:016X}",
                valid
            ));
        }

        let mut row_counts = vec![0u32; TableId::COUNT];
        for table in TableId::iter() {
            if valid & (1 << table as u64) != 0 {
                row_counts[table as usize] = read_le_at::<u32>(data, &mut offset)?;
            }
        }

        if heap_flags & HEAP_EXTRA_DATA != 0 {
            offset += 4;
        }

        let info = TableInfo::new(&row_counts, heap_flags);
        let mut tables = vec![Vec::new(); TableId::COUNT];

        for table in TableId::iter() {
            let count = row_counts[table as usize] as usize;
            if count == 0 {
                continue;
            }

            let needed = table.row_size(&info).saturating_mul(count);
            if offset.saturating_add(needed) > data.len() {
                return Err(malformed_error!(
                    "{} declares {} rows ({} bytes) but only {} bytes remain",
                    table.name(),
                    count,
                    needed,
                    data.len().saturating_sub(offset)
                ));
            }

            let rows = &mut tables[table as usize];
            rows.reserve(count);
            for _ in 0..count {
                rows.push(Row::read(table, data, &mut offset, &info)?);
            }
            trace!(table = table.name(), rows = count, "decoded table");
        }

        debug!(
            tables = valid.count_ones(),
            heap_flags, "decoded tables stream"
        );

        Ok(TablesStream {
            major_version,
            minor_version,
            sorted,
            heap_flags,
            tables,
        })
    }

    /// Rows of `table`
    #[must_use]
    pub fn rows(&self, table: TableId) -> &[Row] {
        &self.tables[table as usize]
    }

    /// Row `rid` (1-based) of `table`
    #[must_use]
    pub fn row(&self, table: TableId, rid: u32) -> Option<&Row> {
        let index = rid.checked_sub(1)? as usize;
        self.tables[table as usize].get(index)
    }

    /// Mutable access to row `rid` (1-based) of `table`
    pub fn row_mut(&mut self, table: TableId, rid: u32) -> Option<&mut Row> {
        let index = rid.checked_sub(1)? as usize;
        self.tables[table as usize].get_mut(index)
    }

    /// Number of rows in `table`
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.tables[table as usize].len() as u32
    }

    /// Row counts of all tables, indexed by [`TableId`]
    #[must_use]
    pub fn row_counts(&self) -> Vec<u32> {
        self.tables.iter().map(|rows| rows.len() as u32).collect()
    }

    /// Tables holding at least one row
    pub fn present(&self) -> impl Iterator<Item = TableId> + '_ {
        TableId::iter().filter(|table| !self.tables[*table as usize].is_empty())
    }

    /// The `valid` bit vector for the current contents
    #[must_use]
    pub fn valid_mask(&self) -> u64 {
        self.present()
            .fold(0u64, |mask, table| mask | (1 << table as u64))
    }

    /// Append a row and return its token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not match the table's schema
    /// or the table is full.
    pub fn push(&mut self, table: TableId, row: Row) -> Result<Token> {
        let expected = table.columns().len();
        if row.values().len() != expected {
            return Err(malformed_error!(
                "{} row has {} values, expected {}",
                table.name(),
                row.values().len(),
                expected
            ));
        }

        let rows = &mut self.tables[table as usize];
        if rows.len() >= 0x00FF_FFFF {
            return Err(malformed_error!("{} is full", table.name()));
        }

        rows.push(row);
        Ok(Token::from_parts(table, rows.len() as u32))
    }

    /// Column widths for the current row counts and the given heap-size flags
    #[must_use]
    pub fn table_info(&self, heap_flags: u8) -> TableInfo {
        TableInfo::new(&self.row_counts(), heap_flags)
    }

    /// Encoded size in bytes, padded to 4
    #[must_use]
    pub fn size(&self, info: &TableInfo) -> usize {
        let header = 24 + 4 * self.present().count();
        let rows: usize = self
            .present()
            .map(|table| table.row_size(info) * self.tables[table as usize].len())
            .sum();
        (header + rows + 3) & !3
    }

    /// Encode the stream with the given heap-size flags.
    ///
    /// # Errors
    /// Returns an error if any row does not fit the derived column widths.
    pub fn write(&self, heap_flags: u8) -> Result<Vec<u8>> {
        let info = self.table_info(heap_flags & !HEAP_EXTRA_DATA);
        let mut buffer = Vec::with_capacity(self.size(&info));

        push_le(&mut buffer, 0u32);
        push_le(&mut buffer, self.major_version);
        push_le(&mut buffer, self.minor_version);
        push_le(&mut buffer, info.heap_flags());
        push_le(&mut buffer, 1u8);
        push_le(&mut buffer, self.valid_mask());
        push_le(&mut buffer, self.sorted);

        for table in self.present() {
            push_le(&mut buffer, self.row_count(table));
        }

        for table in self.present() {
            for row in &self.tables[table as usize] {
                row.write(table, &mut buffer, &info)?;
            }
        }

        while buffer.len() % 4 != 0 {
            buffer.push(0);
        }

        debug!(
            bytes = buffer.len(),
            tables = self.present().count(),
            "encoded tables stream"
        );
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tables::tableinfo::HEAP_LARGE_STRINGS;

    fn sample() -> TablesStream {
        let mut stream = TablesStream::new();
        stream
            .push(TableId::Module, Row::new(vec![0, 1, 1, 0, 0]))
            .unwrap();
        stream
            .push(TableId::TypeDef, Row::new(vec![0, 8, 0, 0, 1, 1]))
            .unwrap();
        let token = stream
            .push(TableId::MethodDef, Row::new(vec![0x2050, 0, 0x96, 10, 1, 1]))
            .unwrap();
        assert_eq!(token, Token::from_parts(TableId::MethodDef, 1));
        stream
    }

    #[test]
    fn write_read() {
        let stream = sample();
        let bytes = stream.write(0).unwrap();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[7], 1);

        let decoded = TablesStream::read(&bytes).unwrap();
        assert_eq!(decoded.valid_mask(), (1 << 0) | (1 << 2) | (1 << 6));
        assert_eq!(decoded.row_count(TableId::MethodDef), 1);
        assert_eq!(decoded.row(TableId::MethodDef, 1).unwrap().get(0), Some(0x2050));
        assert_eq!(decoded.rows(TableId::TypeDef), stream.rows(TableId::TypeDef));
        assert!(decoded.row(TableId::MethodDef, 0).is_none());
    }

    #[test]
    fn wide_strings() {
        let stream = sample();
        let narrow = stream.write(0).unwrap();
        let wide = stream.write(HEAP_LARGE_STRINGS).unwrap();
        assert_eq!(wide[6], HEAP_LARGE_STRINGS);
        assert!(wide.len() > narrow.len());

        let decoded = TablesStream::read(&wide).unwrap();
        assert_eq!(decoded.rows(TableId::MethodDef), stream.rows(TableId::MethodDef));
    }

    #[test]
    fn truncated_rows() {
        let bytes = sample().write(0).unwrap();
        let cut = &bytes[..bytes.len() - 8];
        assert!(matches!(
            TablesStream::read(cut),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn schema_mismatch() {
        let mut stream = TablesStream::new();
        assert!(stream.push(TableId::Field, Row::new(vec![0])).is_err());
    }

    #[test]
    fn unknown_table() {
        let mut bytes = sample().write(0).unwrap();
        bytes[8 + 6] |= 0x80; // bit 0x37
        assert!(TablesStream::read(&bytes).is_err());
    }
}
