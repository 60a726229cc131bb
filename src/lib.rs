// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'file/physical.rs' and 'writer/output.rs' use mmap to map files into memory

//! # cilpe
//!
//! A reader and writer for .NET managed PE images, written in pure Rust.
//!
//! `cilpe` decodes the CLI header, the metadata root, all ECMA-335 metadata tables and
//! heaps, signatures, custom-attribute blobs, marshaling descriptors, security
//! permission sets and IL method bodies. The same data model is written back out: the
//! writer lays out a `.text` and `.reloc` section, emits PE32 or PE32+ headers, the
//! `mscoree.dll` import, the native startup stub, an optional debug directory, and
//! finishes with strong-name signing and the PE checksum.
//!
//! ## Features
//!
//! - **Memory-mapped input** - images are mapped with `memmap2` or read from memory
//! - **Complete metadata** - every table 0x00..0x2C with typed schemas and coded indexes
//! - **IL assembly** - opcode table, decoder, label-resolving encoder
//! - **Deterministic layout** - section parts placed once, sizes verified on write
//! - **Separate sessions** - [`ReadSession`] and [`WriteSession`] expose only the
//!   operations valid for reading or writing
//!
//! ## Reading
//!
//! ```rust,no_run
//! use cilpe::{File, ReadSession};
//! use cilpe::metadata::tables::TableId;
//!
//! let file = File::from_file(std::path::Path::new("app.dll"))?;
//! let session = ReadSession::new(&file)?;
//!
//! for rid in 1..=session.tables().row_count(TableId::MethodDef) {
//!     if let Some(instructions) = session.instructions(rid)? {
//!         println!("method {rid}: {} instructions", instructions.len());
//!     }
//! }
//! # Ok::<(), cilpe::Error>(())
//! ```
//!
//! ## Writing
//!
//! ```rust,no_run
//! use cilpe::{File, ReadSession, WriteSession};
//!
//! let file = File::from_file(std::path::Path::new("app.dll"))?;
//! let read = ReadSession::new(&file)?;
//! WriteSession::from_read(&read, read.writer_config())?.write_to_file("copy.dll")?;
//! # Ok::<(), cilpe::Error>(())
//! ```
//!
//! ## Diagnostics
//!
//! The crate logs through `tracing`: `debug` at load, layout and write stage
//! boundaries, `trace` per row and per section part, `warn` for heap entries that
//! cannot be resolved. No subscriber is installed.

#[macro_use]
pub(crate) mod error;

/// IL opcodes, instructions, decoding and encoding.
pub mod assembly;

/// PE input, RVA conversion and the primitive little-endian codec.
pub mod file;

/// CLI header, metadata root, streams, tables, signatures and method bodies.
pub mod metadata;

/// Read and write sessions.
pub mod session;

/// Strong-name signing contract.
pub mod signer;

/// Layout engine and PE image emission.
pub mod writer;

/// `cilpe` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilpe` Error type
///
/// ```rust,no_run
/// use cilpe::{Error, File};
///
/// match File::from_file(std::path::Path::new("notes.txt")) {
///     Ok(_) => println!("Loaded successfully"),
///     Err(Error::NotSupported) => println!("Not a managed image"),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {message}"),
///     Err(e) => println!("Error: {e}"),
/// }
/// ```
pub use error::Error;

pub use file::{parser::Parser, File};
pub use metadata::streams::{Blob, Guid, StreamHeader, Strings, UserStrings};
pub use session::{ReadOptions, ReadSession, WriteSession};
pub use writer::WriterConfig;
