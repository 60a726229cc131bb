//! Write side of the compressed integer codec.
//!
//! Encoders always pick the narrowest width that holds the value, so a value sitting
//! exactly on a width boundary (`0x7F`, `0x3FFF`) uses the smaller form.

use crate::{metadata::token::Token, Result};

/// Largest value representable as a compressed unsigned integer.
pub const COMPRESSED_UINT_MAX: u32 = 0x1FFF_FFFF;

/// Number of bytes [`write_compressed_uint`] emits for `value`.
#[must_use]
pub fn compressed_uint_size(value: u32) -> usize {
    if value < 0x80 {
        1
    } else if value < 0x4000 {
        2
    } else {
        4
    }
}

/// Append `value` as a compressed unsigned integer.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `value` exceeds [`COMPRESSED_UINT_MAX`].
pub fn write_compressed_uint(value: u32, buffer: &mut Vec<u8>) -> Result<()> {
    match compressed_uint_size(value) {
        1 => buffer.push(value as u8),
        2 => {
            buffer.push(0x80 | (value >> 8) as u8);
            buffer.push(value as u8);
        }
        _ => {
            if value > COMPRESSED_UINT_MAX {
                return Err(malformed_error!(
                    "Value 0x{:X} exceeds compressed uint range",
                    value
                ));
            }
            buffer.push(0xC0 | (value >> 24) as u8);
            buffer.push((value >> 16) as u8);
            buffer.push((value >> 8) as u8);
            buffer.push(value as u8);
        }
    }
    Ok(())
}

/// Append `value` as a compressed signed integer.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `value` lies outside the 29-bit signed range.
pub fn write_compressed_int(value: i32, buffer: &mut Vec<u8>) -> Result<()> {
    #[allow(clippy::cast_sign_loss)]
    let bits = value as u32;
    let sign = u32::from(value < 0);

    let (raw, width) = if (-0x40..0x40).contains(&value) {
        (((bits & 0x3F) << 1) | sign, 1)
    } else if (-0x2000..0x2000).contains(&value) {
        (((bits & 0x1FFF) << 1) | sign, 2)
    } else if (-0x1000_0000..0x1000_0000).contains(&value) {
        (((bits & 0x0FFF_FFFF) << 1) | sign, 4)
    } else {
        return Err(malformed_error!(
            "Value {} exceeds compressed int range",
            value
        ));
    };

    match width {
        1 => buffer.push(raw as u8),
        2 => {
            buffer.push(0x80 | (raw >> 8) as u8);
            buffer.push(raw as u8);
        }
        _ => {
            buffer.push(0xC0 | (raw >> 24) as u8);
            buffer.push((raw >> 16) as u8);
            buffer.push((raw >> 8) as u8);
            buffer.push(raw as u8);
        }
    }
    Ok(())
}

/// Append a `TypeDefOrRefOrSpec` token in its compressed signature form.
///
/// # Errors
/// Returns [`crate::Error::SignatureEncoding`] if the token does not point at a
/// TypeDef, TypeRef or TypeSpec row.
pub fn write_compressed_token(token: Token, buffer: &mut Vec<u8>) -> Result<()> {
    let encoded = token.to_type_def_or_ref()?;
    write_compressed_uint(encoded, buffer)
}

/// Append a `SerString`: compressed length plus UTF-8 bytes, or `0xFF` for `None`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the string is too long to prefix.
pub fn write_ser_string(value: Option<&str>, buffer: &mut Vec<u8>) -> Result<()> {
    match value {
        None => buffer.push(0xFF),
        Some(text) => {
            let Ok(length) = u32::try_from(text.len()) else {
                return Err(malformed_error!("String of {} bytes is too long", text.len()));
            };
            write_compressed_uint(length, buffer)?;
            buffer.extend_from_slice(text.as_bytes());
        }
    }
    Ok(())
}
