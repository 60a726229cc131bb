//! Method bodies: header framing, IL code and exception handling clauses.
//!
//! - [`MethodBody`] parses and encodes tiny and fat bodies.
//! - [`ExceptionHandler`] and the section helpers handle the small and fat clause
//!   formats.
//! - [`types`](MethodBodyFlags) holds the header and section flags.

mod body;
mod exceptions;
mod types;

pub use body::{MethodBody, FAT_HEADER_SIZE, MAX_TINY_CODE_SIZE, TINY_MAX_STACK};
pub use exceptions::{
    exception_sections_size, needs_fat_sections, read_exception_sections,
    write_exception_sections, ExceptionHandler, ExceptionHandlerFlags, FAT_CLAUSE_SIZE,
    MAX_FAT_CLAUSES_PER_SECTION, MAX_SMALL_CLAUSES_PER_SECTION, SMALL_CLAUSE_SIZE,
};
pub use types::*;
