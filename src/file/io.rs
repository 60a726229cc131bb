//! Fixed-width little-endian reads and writes.
//!
//! Every integer and float stored in a PE image or in metadata is little-endian. The
//! [`CilPrimitive`] trait ties each primitive to its byte array representation so the
//! helpers below can be generic over the width while staying bounds checked.
//!
//! Variable-width heap and table indexes (2 or 4 bytes, depending on heap and table
//! sizes) go through [`read_le_at_dyn`] and [`write_le_at_dyn`].
//!
//! # Examples
//!
//! ```rust
//! use cilpe::file::io::{read_le_at, write_le_at};
//!
//! let mut buffer = [0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut buffer, &mut offset, 0x1234u16)?;
//! write_le_at(&mut buffer, &mut offset, 0xDEADBEEFu32)?;
//!
//! let mut offset = 0;
//! assert_eq!(read_le_at::<u16>(&buffer, &mut offset)?, 0x1234);
//! assert_eq!(read_le_at::<u32>(&buffer, &mut offset)?, 0xDEADBEEF);
//! # Ok::<(), cilpe::Error>(())
//! ```

use crate::Result;

/// A primitive with a fixed little-endian byte representation.
pub trait CilPrimitive: Sized + Copy {
    /// Byte array type matching the width of the primitive
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Number of bytes occupied by the primitive
    const SIZE: usize;

    /// Decode from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode to little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_primitive {
    ($($ty:ty => $size:literal),* $(,)?) => {
        $(
            impl CilPrimitive for $ty {
                type Bytes = [u8; $size];
                const SIZE: usize = $size;

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_primitive!(
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f32 => 4, f64 => 8,
);

/// Reads a value from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the value.
pub fn read_le<T: CilPrimitive>(data: &[u8]) -> Result<T> {
    let mut offset = 0;
    read_le_at(data, &mut offset)
}

/// Reads a value at `offset` and advances `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value crosses the end of `data`.
pub fn read_le_at<T: CilPrimitive>(data: &[u8], offset: &mut usize) -> Result<T> {
    let Some(end) = offset.checked_add(T::SIZE) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(bytes) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;
    Ok(T::from_le_bytes(bytes))
}

/// Reads a 2- or 4-byte index, selected by `is_large`, widened to `u32`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the index crosses the end of `data`.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    if is_large {
        read_le_at::<u32>(data, offset)
    } else {
        Ok(u32::from(read_le_at::<u16>(data, offset)?))
    }
}

/// Writes `value` at `offset` and advances `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit in `data`.
pub fn write_le_at<T: CilPrimitive>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let Some(end) = offset.checked_add(T::SIZE) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;
    Ok(())
}

/// Writes a 2- or 4-byte index selected by `is_large`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the index does not fit in `data`, or
/// [`crate::Error::Malformed`] if a small index is asked to hold a value above `u16::MAX`.
pub fn write_le_at_dyn(data: &mut [u8], offset: &mut usize, value: u32, is_large: bool) -> Result<()> {
    if is_large {
        write_le_at::<u32>(data, offset, value)
    } else {
        let Ok(small) = u16::try_from(value) else {
            return Err(malformed_error!(
                "Index {} does not fit a 2-byte column",
                value
            ));
        };
        write_le_at::<u16>(data, offset, small)
    }
}

/// Appends `value` to a growable buffer.
pub fn push_le<T: CilPrimitive>(buffer: &mut Vec<u8>, value: T) {
    buffer.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Appends a 2- or 4-byte index to a growable buffer.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a small index is asked to hold a value above `u16::MAX`.
pub fn push_le_dyn(buffer: &mut Vec<u8>, value: u32, is_large: bool) -> Result<()> {
    if is_large {
        push_le(buffer, value);
    } else {
        let Ok(small) = u16::try_from(value) else {
            return Err(malformed_error!(
                "Index {} does not fit a 2-byte column",
                value
            ));
        };
        push_le(buffer, small);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[rustfmt::skip]
    const TEST_BUFFER: [u8; 8] = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
    ];

    #[test]
    fn read_widths() {
        assert_eq!(read_le::<u8>(&TEST_BUFFER).unwrap(), 0x01);
        assert_eq!(read_le::<i8>(&TEST_BUFFER).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&TEST_BUFFER).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&TEST_BUFFER).unwrap(), 0x04030201);
        assert_eq!(read_le::<u64>(&TEST_BUFFER).unwrap(), 0x0807060504030201);
    }

    #[test]
    fn read_advances_offset() {
        let mut offset = 2;
        assert_eq!(read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap(), 0x0403);
        assert_eq!(offset, 4);
        assert_eq!(read_le_at::<u32>(&TEST_BUFFER, &mut offset).unwrap(), 0x08070605);
        assert_eq!(offset, 8);
    }

    #[test]
    fn read_dyn() {
        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&TEST_BUFFER, &mut offset, false).unwrap(), 0x0201);
        assert_eq!(read_le_at_dyn(&TEST_BUFFER, &mut offset, true).unwrap(), 0x06050403);
        assert_eq!(offset, 6);
    }

    #[test]
    fn read_out_of_bounds() {
        let mut offset = 6;
        assert!(matches!(
            read_le_at::<u32>(&TEST_BUFFER, &mut offset),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(offset, 6);

        let mut offset = usize::MAX;
        assert!(read_le_at::<u8>(&TEST_BUFFER, &mut offset).is_err());
    }

    #[test]
    fn floats() {
        let mut buffer = [0u8; 12];
        let mut offset = 0;
        write_le_at(&mut buffer, &mut offset, 1.5f32).unwrap();
        write_le_at(&mut buffer, &mut offset, -2.25f64).unwrap();

        let mut offset = 0;
        assert_eq!(read_le_at::<f32>(&buffer, &mut offset).unwrap(), 1.5);
        assert_eq!(read_le_at::<f64>(&buffer, &mut offset).unwrap(), -2.25);
    }

    #[test]
    fn write_dyn_rejects_overflowing_small_index() {
        let mut buffer = [0u8; 4];
        let mut offset = 0;
        assert!(write_le_at_dyn(&mut buffer, &mut offset, 0x1_0000, false).is_err());
        write_le_at_dyn(&mut buffer, &mut offset, 0x1_0000, true).unwrap();
        assert_eq!(buffer, [0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn push() {
        let mut buffer = Vec::new();
        push_le(&mut buffer, 0xABCDu16);
        push_le_dyn(&mut buffer, 7, true).unwrap();
        assert_eq!(buffer, vec![0xCD, 0xAB, 0x07, 0x00, 0x00, 0x00]);
    }
}
