//! Sequential section layout.
//!
//! Sections follow the headers, each starting on a section-alignment boundary in
//! memory and a file-alignment boundary in the file. Inside a section the file offset
//! and the RVA advance together: every part is aligned by RVA, asked for its size at
//! that position and then appended. Parts reporting size 0 are dropped, and so are
//! sections left without parts.

use tracing::{debug, trace, warn};

use crate::{
    writer::parts::{align_up, PartKind, Placement, SectionPart},
    Error, Result,
};

/// A laid out section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionLayout {
    /// Section name
    pub name: &'static str,
    /// `IMAGE_SCN_*` flags
    pub characteristics: u32,
    /// RVA of the section
    pub rva: u32,
    /// File offset of the raw data
    pub offset: u32,
    /// Bytes used by the parts
    pub virtual_size: u32,
    /// `virtual_size` rounded up to the file alignment
    pub raw_size: u32,
    /// Placed parts in order
    pub parts: Vec<(PartKind, Placement)>,
}

/// Places sections one after another.
#[derive(Clone, Debug)]
pub struct LayoutEngine {
    file_alignment: u32,
    section_alignment: u32,
    next_offset: u32,
    next_rva: u32,
    sections: Vec<SectionLayout>,
}

impl LayoutEngine {
    /// Start laying out after `headers_size` bytes of headers.
    ///
    /// # Errors
    /// Returns [`Error::LayoutFailed`] if the headers cannot be aligned.
    pub fn new(file_alignment: u32, section_alignment: u32, headers_size: u32) -> Result<Self> {
        Ok(LayoutEngine {
            file_alignment,
            section_alignment,
            next_offset: align_up(headers_size, file_alignment)?,
            next_rva: align_up(headers_size, section_alignment)?,
            sections: Vec::new(),
        })
    }

    /// Lay out one section holding `parts`.
    ///
    /// Returns `false` if every part was empty and the section was dropped.
    ///
    /// # Errors
    /// Returns [`Error::LayoutFailed`] if a part cannot be sized or the image
    /// overflows the 32-bit address space.
    pub fn section(
        &mut self,
        name: &'static str,
        characteristics: u32,
        parts: &[&dyn SectionPart],
    ) -> Result<bool> {
        let section_rva = self.next_rva;
        let section_offset = self.next_offset;
        let overflow = || Error::LayoutFailed(format!("Section {name} overflows the image"));

        let mut cursor = section_rva;
        let mut placed = Vec::with_capacity(parts.len());
        for part in parts {
            let rva = align_up(cursor, part.alignment())?;
            let offset = section_offset
                .checked_add(rva - section_rva)
                .ok_or_else(overflow)?;
            let size = part.size(offset, rva)?;

            if size == 0 {
                if part.kind().may_be_empty() {
                    trace!(part = %part.kind(), "dropped empty part");
                } else {
                    warn!(part = %part.kind(), "dropped empty part");
                }
                continue;
            }

            let placement = Placement {
                padding: rva - cursor,
                size,
                offset,
                rva,
            };
            trace!(part = %part.kind(), ?placement, "placed part");
            placed.push((part.kind(), placement));
            cursor = rva.checked_add(size).ok_or_else(overflow)?;
        }

        if placed.is_empty() {
            debug!(section = name, "dropped empty section");
            return Ok(false);
        }

        let virtual_size = cursor - section_rva;
        let raw_size = align_up(virtual_size, self.file_alignment)?;
        self.next_offset = section_offset.checked_add(raw_size).ok_or_else(overflow)?;
        self.next_rva = section_rva
            .checked_add(align_up(virtual_size, self.section_alignment)?)
            .ok_or_else(overflow)?;

        debug!(
            section = name,
            rva = section_rva,
            offset = section_offset,
            virtual_size,
            parts = placed.len(),
            "laid out section"
        );

        self.sections.push(SectionLayout {
            name,
            characteristics,
            rva: section_rva,
            offset: section_offset,
            virtual_size,
            raw_size,
            parts: placed,
        });
        Ok(true)
    }

    /// Finish the layout
    #[must_use]
    pub fn finish(self) -> Layout {
        Layout {
            size_of_image: self.next_rva,
            file_size: self.next_offset,
            sections: self.sections,
        }
    }
}

/// The complete placement of all sections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Laid out sections in order
    pub sections: Vec<SectionLayout>,
    /// `SizeOfImage`: end of the last section, section-aligned
    pub size_of_image: u32,
    /// Total file size
    pub file_size: u32,
}

impl Layout {
    /// Where `kind` was placed, if it was
    #[must_use]
    pub fn placement(&self, kind: PartKind) -> Option<Placement> {
        self.sections
            .iter()
            .flat_map(|section| section.parts.iter())
            .find(|(part, _)| *part == kind)
            .map(|(_, placement)| *placement)
    }

    /// Where `kind` was placed.
    ///
    /// # Errors
    /// Returns [`Error::LayoutFailed`] if the part was dropped.
    pub fn require(&self, kind: PartKind) -> Result<Placement> {
        self.placement(kind)
            .ok_or_else(|| Error::LayoutFailed(format!("{kind} was not placed")))
    }

    /// The section called `name`
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&SectionLayout> {
        self.sections.iter().find(|section| section.name == name)
    }
}
