//! Metadata root (ECMA-335 II.24.2.1).
//!
//! The root starts with the `BSJB` signature, carries the runtime version string and
//! lists the streams that follow it. All stream offsets are relative to the start of
//! the root.

use tracing::debug;

use crate::{
    file::{io::push_le, parser::Parser},
    metadata::streams::StreamHeader,
    Result,
};

/// `BSJB`
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// Longest version string the format allows, padding included
const MAX_VERSION_LENGTH: u32 = 255;

/// Decoded metadata root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Root {
    /// Always [`CIL_HEADER_MAGIC`]
    pub signature: u32,
    /// Major format version (1)
    pub major_version: u16,
    /// Minor format version (1)
    pub minor_version: u16,
    /// Reserved, 0
    pub reserved: u32,
    /// Runtime version such as `v4.0.30319`
    pub version: String,
    /// Reserved, 0
    pub flags: u16,
    /// Stream directory
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// A root for `version` with the given streams.
    #[must_use]
    pub fn new(version: &str, stream_headers: Vec<StreamHeader>) -> Root {
        Root {
            signature: CIL_HEADER_MAGIC,
            major_version: 1,
            minor_version: 1,
            reserved: 0,
            version: version.to_string(),
            flags: 0,
            stream_headers,
        }
    }

    /// Parse the root at the start of `data`, which must span the whole metadata.
    ///
    /// # Errors
    /// Returns an error for a wrong signature, an oversized version string, or streams
    /// reaching past the end of `data`.
    pub fn read(data: &[u8]) -> Result<Root> {
        let mut parser = Parser::new(data);

        let signature = parser.read_le::<u32>()?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {:#x}",
                signature
            ));
        }

        let major_version = parser.read_le::<u16>()?;
        let minor_version = parser.read_le::<u16>()?;
        let reserved = parser.read_le::<u32>()?;

        let version_length = parser.read_le::<u32>()?;
        if version_length > MAX_VERSION_LENGTH {
            return Err(malformed_error!(
                "Version string length {} is too large",
                version_length
            ));
        }
        let version_bytes = parser.read_bytes(version_length as usize)?;
        let end = version_bytes
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(version_bytes.len());
        let version = String::from_utf8_lossy(&version_bytes[..end]).into_owned();

        let flags = parser.read_le::<u16>()?;
        let stream_count = parser.read_le::<u16>()?;
        if stream_count == 0 {
            return Err(malformed_error!("No valid streams have been found"));
        }

        let mut stream_headers = Vec::with_capacity(usize::from(stream_count));
        for _ in 0..stream_count {
            let header = StreamHeader::read(&mut parser)?;
            header.check_bounds(data.len())?;
            if stream_headers
                .iter()
                .any(|existing: &StreamHeader| existing.name == header.name)
            {
                return Err(malformed_error!("Duplicate stream - {}", header.name));
            }
            stream_headers.push(header);
        }

        debug!(
            version = %version,
            streams = stream_headers.len(),
            "parsed metadata root"
        );

        Ok(Root {
            signature,
            major_version,
            minor_version,
            reserved,
            version,
            flags,
            stream_headers,
        })
    }

    /// Find a stream by name
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|header| header.name == name)
    }

    /// Length of the version field including its padding
    #[must_use]
    pub fn padded_version_length(&self) -> usize {
        (self.version.len() + 1 + 3) & !3
    }

    /// Serialized size of the root and its stream directory
    #[must_use]
    pub fn size(&self) -> usize {
        16 + self.padded_version_length()
            + 4
            + self
                .stream_headers
                .iter()
                .map(StreamHeader::size_on_disk)
                .sum::<usize>()
    }

    /// Serialize the root and its stream directory.
    ///
    /// # Errors
    /// Returns an error for an oversized version string or invalid stream names.
    pub fn write(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let padded = self.padded_version_length();
        let Ok(padded_u32) = u32::try_from(padded) else {
            return Err(malformed_error!("Version string too long"));
        };
        if padded_u32 > MAX_VERSION_LENGTH {
            return Err(malformed_error!("Version string too long"));
        }
        let Ok(stream_count) = u16::try_from(self.stream_headers.len()) else {
            return Err(malformed_error!("Too many streams"));
        };

        push_le(buffer, self.signature);
        push_le(buffer, self.major_version);
        push_le(buffer, self.minor_version);
        push_le(buffer, self.reserved);
        push_le(buffer, padded_u32);
        buffer.extend_from_slice(self.version.as_bytes());
        buffer.resize(buffer.len() + padded - self.version.len(), 0);
        push_le(buffer, self.flags);
        push_le(buffer, stream_count);

        for header in &self.stream_headers {
            header.write(buffer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let header_bytes = [
            0x42, 0x53, 0x4A, 0x42,
            0x01, 0x00,
            0x01, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            b'H', b'E', b'L', b'L', b'O', 0x00, 0x00, 0x00,
            0x00, 0x00,
            0x01, 0x00,

            0x28, 0x00, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00,
            0x23, 0x7E, 0x00, 0x00,

            0x00, 0x00, 0x00, 0x00,
        ];

        let root = Root::read(&header_bytes).unwrap();
        assert_eq!(root.signature, CIL_HEADER_MAGIC);
        assert_eq!(root.major_version, 1);
        assert_eq!(root.version, "HELLO");
        assert_eq!(root.stream_headers.len(), 1);
        assert_eq!(root.stream("#~").unwrap().offset, 0x28);
        assert_eq!(root.size(), 0x28);

        let mut written = Vec::new();
        root.write(&mut written).unwrap();
        assert_eq!(written, header_bytes[..0x28]);
    }

    #[test]
    fn bad_signature() {
        let mut bytes = vec![0u8; 40];
        bytes[..4].copy_from_slice(b"BSJA");
        assert!(Root::read(&bytes).is_err());
    }

    #[test]
    fn stream_past_end() {
        let root = Root::new(
            "v4.0.30319",
            vec![StreamHeader {
                offset: 0x40,
                size: 0x100,
                name: "#Blob".to_string(),
            }],
        );
        let mut bytes = Vec::new();
        root.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), root.size());
        assert!(Root::read(&bytes).is_err());

        bytes.resize(0x140, 0);
        let parsed = Root::read(&bytes).unwrap();
        assert_eq!(parsed.version, "v4.0.30319");
        assert_eq!(parsed.padded_version_length(), 12);
    }

    #[test]
    fn duplicate_streams() {
        let header = StreamHeader {
            offset: 0,
            size: 0,
            name: "#US".to_string(),
        };
        let root = Root::new("v4.0.30319", vec![header.clone(), header]);
        let mut bytes = Vec::new();
        root.write(&mut bytes).unwrap();
        assert!(Root::read(&bytes).is_err());
    }
}
