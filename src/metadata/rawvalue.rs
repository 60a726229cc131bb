//! Layout-dependent table columns.
//!
//! `MethodDef.RVA`, `FieldRVA.RVA` and `ManifestResource.Offset` point at out-of-line
//! content whose position is only known once the image has been laid out. On the write
//! side such columns are registered in a [`RawValueMap`] as pending entries while the
//! content is sized, resolved once the layout engine has assigned addresses, and
//! finally applied to the table rows. Applying fails if any entry is still pending, so
//! a table stream is never emitted with a placeholder in it.
//!
//! On the read side the same columns are followed in a second pass after the rows have
//! been decoded; see [`crate::ReadSession`].

use std::collections::BTreeMap;

use crate::{
    metadata::tables::{TableId, TablesStream},
    Error, Result,
};

/// The kind of content a raw-value column points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RawValueKind {
    /// IL method body, addressed by RVA
    MethodBody,
    /// Static field initial data, addressed by RVA
    FieldData,
    /// Embedded resource, addressed by offset from the resources directory
    Resource,
}

impl RawValueKind {
    /// The table carrying columns of this kind
    #[must_use]
    pub fn table(self) -> TableId {
        match self {
            RawValueKind::MethodBody => TableId::MethodDef,
            RawValueKind::FieldData => TableId::FieldRVA,
            RawValueKind::Resource => TableId::ManifestResource,
        }
    }
}

/// Identifies a raw-value column by table and row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawValueKey {
    /// Table holding the column
    pub table: TableId,
    /// 1-based row
    pub rid: u32,
}

/// State of one raw-value column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredValue {
    /// Value known up front (e.g. an abstract method with RVA 0)
    Literal(u32),
    /// Waiting for layout; `slot` indexes the content inside its section part
    Pending {
        /// Content kind
        kind: RawValueKind,
        /// Index of the content inside its part
        slot: usize,
    },
    /// Address assigned by the layout engine
    Resolved(u32),
}

/// Side table of all raw-value columns of a module being written.
#[derive(Clone, Debug, Default)]
pub struct RawValueMap {
    entries: BTreeMap<RawValueKey, DeferredValue>,
}

impl RawValueMap {
    /// An empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a column whose value does not depend on layout
    pub fn set_literal(&mut self, key: RawValueKey, value: u32) {
        self.entries.insert(key, DeferredValue::Literal(value));
    }

    /// Record a column that must be resolved after layout.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the table has no raw-value column of `kind`.
    pub fn defer(&mut self, key: RawValueKey, kind: RawValueKind, slot: usize) -> Result<()> {
        if kind.table() != key.table {
            return Err(malformed_error!(
                "{} holds no {:?} column",
                key.table.name(),
                kind
            ));
        }

        self.entries
            .insert(key, DeferredValue::Pending { kind, slot });
        Ok(())
    }

    /// Current state of `key`
    #[must_use]
    pub fn get(&self, key: &RawValueKey) -> Option<DeferredValue> {
        self.entries.get(key).copied()
    }

    /// All entries still waiting for layout, as `(key, kind, slot)`
    pub fn pending(&self) -> impl Iterator<Item = (RawValueKey, RawValueKind, usize)> + '_ {
        self.entries.iter().filter_map(|(key, value)| match value {
            DeferredValue::Pending { kind, slot } => Some((*key, *kind, *slot)),
            _ => None,
        })
    }

    /// Number of recorded columns
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Assign the laid-out address of a pending column.
    ///
    /// # Errors
    /// Returns [`Error::LayoutFailed`] if the column is unknown or not pending; every
    /// deferred column is resolved exactly once.
    pub fn resolve(&mut self, key: RawValueKey, value: u32) -> Result<()> {
        match self.entries.get_mut(&key) {
            Some(entry @ DeferredValue::Pending { .. }) => {
                *entry = DeferredValue::Resolved(value);
                Ok(())
            }
            Some(other) => Err(Error::LayoutFailed(format!(
                "raw value {}[{}] is not pending ({:?})",
                key.table.name(),
                key.rid,
                other
            ))),
            None => Err(Error::LayoutFailed(format!(
                "raw value {}[{}] was never deferred",
                key.table.name(),
                key.rid
            ))),
        }
    }

    /// Write all values into their rows.
    ///
    /// # Errors
    /// Returns [`Error::LayoutFailed`] if any column is still pending, or
    /// [`Error::MissingReference`] if a key names a row that does not exist.
    pub fn apply(&self, tables: &mut TablesStream) -> Result<usize> {
        if let Some((key, kind, _)) = self.pending().next() {
            return Err(Error::LayoutFailed(format!(
                "{:?} for {}[{}] was never resolved",
                kind,
                key.table.name(),
                key.rid
            )));
        }

        for (key, value) in &self.entries {
            let (DeferredValue::Literal(value) | DeferredValue::Resolved(value)) = *value else {
                continue;
            };

            let Some((column, _)) = key.table.raw_value_column() else {
                return Err(malformed_error!("{} has no raw-value column", key.table.name()));
            };

            let Some(row) = tables.row_mut(key.table, key.rid) else {
                return Err(Error::MissingReference(format!(
                    "{}[{}] does not exist",
                    key.table.name(),
                    key.rid
                )));
            };
            row.set(column, value)?;
        }

        Ok(self.entries.len())
    }
}
