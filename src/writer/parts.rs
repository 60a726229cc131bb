//! Section parts: the regions the layout engine places.
//!
//! `.text` holds, in this order, the import address table, the CLI header, the
//! strong-name signature, method bodies, field data, resources, the metadata, the
//! import directory, the startup stub and the debug directory. `.reloc` holds the base
//! relocations. A part reports its size for a given position; parts of size 0 are not
//! placed.

use std::fmt;

use crate::Result;

/// Identity of a part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartKind {
    /// Import address table with the single `mscoree` thunk
    ImportAddressTable,
    /// The 72-byte CLI header
    CliHeader,
    /// Space reserved for the strong-name signature
    StrongNameSignature,
    /// All method bodies
    MethodBodies,
    /// Static data of `FieldRVA` rows
    FieldData,
    /// Embedded manifest resources
    Resources,
    /// Metadata root and streams
    Metadata,
    /// Import directory, lookup table and names
    ImportDirectory,
    /// Native entry stub jumping through the IAT
    StartupStub,
    /// Debug directory entry and payload
    DebugDirectory,
    /// Base relocation blocks
    Relocations,
}

impl PartKind {
    /// Name used in diagnostics and errors
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PartKind::ImportAddressTable => "import address table",
            PartKind::CliHeader => "CLI header",
            PartKind::StrongNameSignature => "strong-name signature",
            PartKind::MethodBodies => "method bodies",
            PartKind::FieldData => "field data",
            PartKind::Resources => "resources",
            PartKind::Metadata => "metadata",
            PartKind::ImportDirectory => "import directory",
            PartKind::StartupStub => "startup stub",
            PartKind::DebugDirectory => "debug directory",
            PartKind::Relocations => "relocations",
        }
    }

    /// Whether a size of 0 is a normal outcome for this part
    #[must_use]
    pub fn may_be_empty(self) -> bool {
        !matches!(
            self,
            PartKind::ImportAddressTable | PartKind::CliHeader | PartKind::Metadata
        )
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something the layout engine can place.
pub trait SectionPart {
    /// Identity of the part
    fn kind(&self) -> PartKind;

    /// Required RVA alignment of the first byte
    fn alignment(&self) -> u32;

    /// Size in bytes when placed at `offset` / `rva`, which are already aligned.
    ///
    /// # Errors
    /// Returns [`crate::Error::LayoutFailed`] if the part cannot be sized.
    fn size(&self, offset: u32, rva: u32) -> Result<u32>;
}

/// Position and size of a placed part.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Placement {
    /// Padding inserted before the part to reach its alignment
    pub padding: u32,
    /// Size of the part
    pub size: u32,
    /// File offset of the first byte
    pub offset: u32,
    /// RVA of the first byte
    pub rva: u32,
}

impl Placement {
    /// RVA one past the last byte
    #[must_use]
    pub fn end_rva(&self) -> u32 {
        self.rva + self.size
    }
}

/// Out-of-line entries of one raw-value column, each individually aligned.
///
/// Method bodies, field data and resources are placed back to back; the RVA of every
/// entry is what the corresponding table column receives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryGroup {
    entries: Vec<(Vec<u8>, u32)>,
}

impl EntryGroup {
    /// An empty group
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` aligned to `alignment` and return the slot index
    pub fn push(&mut self, bytes: Vec<u8>, alignment: u32) -> usize {
        self.entries.push((bytes, alignment.max(1)));
        self.entries.len() - 1
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the group holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// RVA of every entry when the group starts at `rva`, and the group's end RVA
    ///
    /// # Errors
    /// Returns [`crate::Error::LayoutFailed`] if the entries overflow the address space.
    pub fn entry_rvas(&self, rva: u32) -> Result<(Vec<u32>, u32)> {
        let mut cursor = rva;
        let mut rvas = Vec::with_capacity(self.entries.len());
        for (bytes, alignment) in &self.entries {
            let start = align_up(cursor, *alignment)?;
            rvas.push(start);
            cursor = u32::try_from(bytes.len())
                .ok()
                .and_then(|len| start.checked_add(len))
                .ok_or_else(|| crate::Error::LayoutFailed("Entry group overflows".to_string()))?;
        }
        Ok((rvas, cursor))
    }

    /// Encode the group as placed at `rva`
    ///
    /// # Errors
    /// See [`Self::entry_rvas`].
    pub fn to_bytes(&self, rva: u32) -> Result<Vec<u8>> {
        let (rvas, end) = self.entry_rvas(rva)?;
        let mut buffer = vec![0u8; (end - rva) as usize];
        for ((bytes, _), entry_rva) in self.entries.iter().zip(rvas) {
            let start = (entry_rva - rva) as usize;
            buffer[start..start + bytes.len()].copy_from_slice(bytes);
        }
        Ok(buffer)
    }
}

/// Size of a part, either fixed or derived from a group's placement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PartSize {
    /// Known up front
    Fixed(u32),
    /// Depends on where the entries land
    Group(EntryGroup),
}

/// A part as handed to the layout engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    /// Identity
    pub kind: PartKind,
    /// RVA alignment
    pub alignment: u32,
    /// How the size is determined
    pub size: PartSize,
}

impl Part {
    /// A part of known size
    #[must_use]
    pub fn fixed(kind: PartKind, alignment: u32, size: u32) -> Self {
        Part {
            kind,
            alignment,
            size: PartSize::Fixed(size),
        }
    }

    /// A part made of individually aligned entries
    #[must_use]
    pub fn group(kind: PartKind, alignment: u32, group: EntryGroup) -> Self {
        Part {
            kind,
            alignment,
            size: PartSize::Group(group),
        }
    }
}

impl SectionPart for Part {
    fn kind(&self) -> PartKind {
        self.kind
    }

    fn alignment(&self) -> u32 {
        self.alignment
    }

    fn size(&self, _offset: u32, rva: u32) -> Result<u32> {
        match &self.size {
            PartSize::Fixed(size) => Ok(*size),
            PartSize::Group(group) => {
                let (_, end) = group.entry_rvas(rva)?;
                Ok(end - rva)
            }
        }
    }
}

/// Round `value` up to a multiple of `alignment`, which must be a power of two.
///
/// # Errors
/// Returns [`crate::Error::LayoutFailed`] on overflow.
pub fn align_up(value: u32, alignment: u32) -> Result<u32> {
    if alignment <= 1 {
        return Ok(value);
    }
    value
        .checked_next_multiple_of(alignment)
        .ok_or_else(|| crate::Error::LayoutFailed(format!("0x{value:X} cannot be aligned to 0x{alignment:X}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_alignment() {
        let mut group = EntryGroup::new();
        assert_eq!(group.push(vec![0x0A, 0x02, 0x2A], 1), 0);
        assert_eq!(group.push(vec![0x03; 13], 4), 1);
        group.push(vec![0x0A, 0x00, 0x2A], 1);

        let (rvas, end) = group.entry_rvas(0x2050).unwrap();
        assert_eq!(rvas, vec![0x2050, 0x2054, 0x2061]);
        assert_eq!(end, 0x2064);

        let part = Part::group(PartKind::MethodBodies, 4, group.clone());
        assert_eq!(part.size(0x250, 0x2050).unwrap(), 0x14);

        let bytes = group.to_bytes(0x2050).unwrap();
        assert_eq!(bytes.len(), 0x14);
        assert_eq!(&bytes[..4], &[0x0A, 0x02, 0x2A, 0x00]);
        assert_eq!(bytes[0x11], 0x0A);
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(7, 4).unwrap(), 8);
        assert_eq!(align_up(8, 4).unwrap(), 8);
        assert_eq!(align_up(5, 1).unwrap(), 5);
        assert!(align_up(u32::MAX, 0x200).is_err());
    }
}
