//! Progress of an image write.

use std::fmt;

use crate::{Error, Result};

/// Where an [`crate::writer::ImageWriter`] is in its write sequence.
///
/// Parts placed before the metadata are written first, then the metadata blob, whose
/// table contents depend on the RVAs of those parts, then everything after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteState {
    /// Layout done; the parts in front of the metadata are next
    BeforeMetadata,
    /// The metadata blob is next
    EmittingMetadata,
    /// The parts after the metadata are next
    AfterMetadata,
    /// All parts written; the image can be finished
    Done,
}

impl WriteState {
    /// Name used in diagnostics
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            WriteState::BeforeMetadata => "BeforeMetadata",
            WriteState::EmittingMetadata => "EmittingMetadata",
            WriteState::AfterMetadata => "AfterMetadata",
            WriteState::Done => "Done",
        }
    }

    /// The state following this one
    #[must_use]
    pub fn next(self) -> WriteState {
        match self {
            WriteState::BeforeMetadata => WriteState::EmittingMetadata,
            WriteState::EmittingMetadata => WriteState::AfterMetadata,
            WriteState::AfterMetadata | WriteState::Done => WriteState::Done,
        }
    }

    /// Check that the writer is in `expected`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] otherwise.
    pub fn expect(self, expected: WriteState) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected: expected.name(),
                actual: self.name(),
            })
        }
    }
}

impl fmt::Display for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
