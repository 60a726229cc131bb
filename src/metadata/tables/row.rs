use crate::{
    metadata::{
        tables::{ColumnKind, TableId, TableInfo},
        token::Token,
    },
    Result,
};

/// One row of a metadata table.
///
/// Columns are addressed by position in [`TableId::columns`]. See
/// [`crate::metadata::tables::schema`] for how each kind is stored.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Row {
    values: Vec<u32>,
}

impl Row {
    /// Build a row from its column values
    #[must_use]
    pub fn new(values: Vec<u32>) -> Self {
        Row { values }
    }

    /// All column values in schema order
    #[must_use]
    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// Value of column `column`
    #[must_use]
    pub fn get(&self, column: usize) -> Option<u32> {
        self.values.get(column).copied()
    }

    /// Value of column `column` interpreted as a token (coded index columns)
    #[must_use]
    pub fn token(&self, column: usize) -> Option<Token> {
        self.get(column).map(Token::new)
    }

    /// Replace the value of column `column`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the column does not exist.
    pub fn set(&mut self, column: usize, value: u32) -> Result<()> {
        let Some(slot) = self.values.get_mut(column) else {
            return Err(malformed_error!("Row has no column {}", column));
        };
        *slot = value;
        Ok(())
    }

    /// Decode a row of `table` at `offset`.
    ///
    /// # Errors
    /// Returns an error for truncated data or invalid coded indexes.
    pub fn read(table: TableId, data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        let columns = table.columns();
        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            values.push(column.kind.read(data, offset, info)?);
        }

        Ok(Row { values })
    }

    /// Encode this row of `table`.
    ///
    /// # Errors
    /// Returns an error if the value count does not match the schema or a value does
    /// not fit its column.
    pub fn write(&self, table: TableId, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        let columns = table.columns();
        if columns.len() != self.values.len() {
            return Err(malformed_error!(
                "{} row has {} values, expected {}",
                table.name(),
                self.values.len(),
                columns.len()
            ));
        }

        for (column, value) in columns.iter().zip(&self.values) {
            column.kind.write(buffer, *value, info)?;
        }
        Ok(())
    }

    /// True if any simple index column of this row points past the end of its target table.
    ///
    /// List columns (`FieldList`, `MethodList`, ...) may legitimately equal `rows + 1`.
    #[must_use]
    pub fn has_dangling_index(&self, table: TableId, info: &TableInfo) -> bool {
        table
            .columns()
            .iter()
            .zip(&self.values)
            .any(|(column, value)| match column.kind {
                ColumnKind::Table(target) => *value > info.get(target).rows + 1,
                _ => false,
            })
    }
}
