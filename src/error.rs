use thiserror::Error;

/// Builds an [`Error::Malformed`] that records the source location of the failing check.
///
/// # Examples
///
/// ```rust,ignore
/// return Err(malformed_error!("Invalid stream header - {}", name));
/// ```
macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Builds an [`Error::OutOfBounds`] carrying the location of the failed bounds check.
macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can
/// potentially return.
///
/// Read-side structural failures surface as [`Error::Malformed`] or
/// [`Error::OutOfBounds`]. Heap lookups never produce errors; they return `None`
/// instead so a single broken entry does not prevent loading the rest of a module.
/// Write-side failures abort the whole image, the caller must discard any output.
///
/// # Examples
///
/// ```rust,no_run
/// use cilpe::{Error, File, ReadSession};
///
/// let file = File::from_file(std::path::Path::new("tests/samples/app.dll"))?;
/// match ReadSession::new(&file) {
///     Ok(session) => println!("{} tables", session.tables().present().count()),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("malformed input: {message} ({file}:{line})");
///     }
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// # Ok::<(), cilpe::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input violates the binary format at a structural level.
    ///
    /// Raised for broken headers, unknown signature tags, inconsistent
    /// table row counts and similar defects that make the item unreadable.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// Description of the defect
        message: String,
        /// Source file that detected it
        file: &'static str,
        /// Source line that detected it
        line: u32,
    },

    /// A read or write would have crossed the end of the buffer.
    #[error("Out of bounds - {file}:{line}")]
    OutOfBounds {
        /// Source file that detected it
        file: &'static str,
        /// Source line that detected it
        line: u32,
    },

    /// The input uses a feature this library does not handle.
    #[error("This file type is not supported")]
    NotSupported,

    /// The provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// Wrapper around I/O failures of the file backends and output sinks.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Wrapper around PE header parsing failures.
    #[error("{0}")]
    Goblin(#[from] goblin::error::Error),

    /// Signature nesting exceeded the configured depth.
    #[error("Reached the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// An IL opcode that is not part of the instruction set.
    #[error("Invalid opcode - 0x{0:04X}")]
    InvalidOpcode(u16),

    /// An instruction mnemonic unknown to the encoder.
    #[error("Invalid instruction mnemonic - {0}")]
    InvalidMnemonic(String),

    /// A branch references an undefined label or does not fit its operand.
    #[error("Invalid branch - {0}")]
    InvalidBranch(String),

    /// A signature could not be encoded.
    #[error("Signature encoding failed - {0}")]
    SignatureEncoding(String),

    /// A custom attribute blob could not be encoded or decoded against its constructor.
    #[error("Custom attribute - {0}")]
    CustomAttribute(String),

    /// A required cross-reference is missing at write time.
    #[error("Missing reference - {0}")]
    MissingReference(String),

    /// The layout engine could not place the image.
    #[error("Layout failed - {0}")]
    LayoutFailed(String),

    /// A section part produced a different number of bytes than it reserved during layout.
    #[error("Section part '{part}' reserved {expected} bytes but wrote {actual}")]
    LayoutMismatch {
        /// Name of the offending part
        part: &'static str,
        /// Size reported during layout
        expected: u64,
        /// Size actually written
        actual: u64,
    },

    /// A writer stage was invoked in the wrong state.
    #[error("Invalid writer state - expected {expected}, found {actual}")]
    InvalidState {
        /// Required state
        expected: &'static str,
        /// Current state
        actual: &'static str,
    },

    /// The strong-name signer failed or returned a signature of the wrong size.
    #[error("Signing failed - {0}")]
    Signing(String),
}
