//! Metadata of a managed image.
//!
//! - [`cor20header`] - the CLI header pointing at everything else
//! - [`root`] - the metadata root and its stream directory
//! - [`streams`] - `#Strings`, `#US`, `#GUID` and `#Blob` heaps
//! - [`tables`] - the `#~` tables stream and the schema of every table
//! - [`signatures`], [`customattributes`], [`marshalling`], [`security`] - blob formats
//! - [`method`] - IL method bodies and exception clauses
//! - [`rawvalue`] - columns whose value depends on the image layout
//! - [`token`] - table/row references

pub mod cor20header;
pub mod customattributes;
pub mod marshalling;
pub mod method;
pub mod rawvalue;
pub mod root;
pub mod security;
pub mod signatures;
pub mod streams;
pub mod tables;
pub mod token;
