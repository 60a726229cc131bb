//! Metadata tables.
//!
//! The tables stream holds one table per entity kind. Tables are append-only arrays of
//! rows and a row is identified by its 1-based position. This module provides:
//!
//! - [`TableId`] - the 45 table numbers
//! - [`CodedIndexType`] - the multi-table reference encodings
//! - [`TableInfo`] - column widths derived from row counts and heap sizes
//! - [`schema`] - the static column layout of every table
//! - [`Row`] and [`TablesStream`] - decoded rows and the `#~` stream codec

mod codedindex;
mod row;
pub mod schema;
mod stream;
mod tableid;
pub mod tableinfo;

pub use codedindex::{CodedIndexType, CodedIndexTypeIter};
pub use row::Row;
pub use schema::{Column, ColumnKind, HeapKind};
pub use stream::{TablesStream, DEFAULT_SORTED_MASK};
pub use tableid::{TableId, TableIdIter};
pub use tableinfo::{TableInfo, TableInfoRef, TableRowInfo};
