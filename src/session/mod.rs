//! Read and write sessions.
//!
//! A module is either being read or being written, never both. [`ReadSession`] borrows
//! a loaded [`crate::File`] and exposes decoded tables, heaps and the content behind
//! layout-dependent columns. [`WriteSession`] owns builders for the same data and
//! turns them into a new image. [`WriteSession::from_read`] bridges the two for
//! round trips.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilpe::{File, ReadOptions, ReadSession, WriteSession};
//!
//! let file = File::from_file(std::path::Path::new("app.dll"))?;
//! let read = ReadSession::with_options(&file, ReadOptions::default().with_eager_raw_values(true))?;
//! let write = WriteSession::from_read(&read, read.writer_config())?;
//! let image = write.write_to_vec()?;
//! # Ok::<(), cilpe::Error>(())
//! ```

mod read;
mod write;

pub use read::{RawContent, ReadOptions, ReadSession};
pub use write::WriteSession;
