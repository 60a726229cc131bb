//! Marshalling descriptors (ECMA-335 II.23.4).
//!
//! `FieldMarshal` rows point at a blob describing how a field or parameter is converted
//! when crossing into native code. The first byte selects the native type; some types are
//! followed by a fixed sequence of optional fields, each present only while bytes remain.
//!
//! # Examples
//!
//! ```rust
//! use cilpe::metadata::marshalling::{
//!     encode_marshalling_descriptor, parse_marshalling_descriptor, NativeType, NATIVE_TYPE,
//! };
//!
//! // Array of I4, size taken from parameter 2
//! let blob = [NATIVE_TYPE::ARRAY, NATIVE_TYPE::I4, 0x02];
//! let info = parse_marshalling_descriptor(&blob)?;
//! assert_eq!(
//!     info.native_type,
//!     NativeType::Array {
//!         element_type: Some(NATIVE_TYPE::I4),
//!         size_param_index: Some(2),
//!         num_elements: None,
//!         size_param_multiplier: None,
//!     }
//! );
//! assert_eq!(encode_marshalling_descriptor(&info)?, blob);
//! # Ok::<(), cilpe::Error>(())
//! ```

use crate::{
    file::{
        parser::Parser,
        writer::{write_compressed_uint, write_ser_string},
    },
    Error, Result,
};

#[allow(non_snake_case, missing_docs)]
/// Native type tags
pub mod NATIVE_TYPE {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const I1: u8 = 0x03;
    pub const U1: u8 = 0x04;
    pub const I2: u8 = 0x05;
    pub const U2: u8 = 0x06;
    pub const I4: u8 = 0x07;
    pub const U4: u8 = 0x08;
    pub const I8: u8 = 0x09;
    pub const U8: u8 = 0x0a;
    pub const R4: u8 = 0x0b;
    pub const R8: u8 = 0x0c;
    pub const SYSCHAR: u8 = 0x0d;
    pub const VARIANT: u8 = 0x0e;
    pub const CURRENCY: u8 = 0x0f;
    pub const PTR: u8 = 0x10;
    pub const DECIMAL: u8 = 0x11;
    pub const DATE: u8 = 0x12;
    pub const BSTR: u8 = 0x13;
    pub const LPSTR: u8 = 0x14;
    pub const LPWSTR: u8 = 0x15;
    pub const LPTSTR: u8 = 0x16;
    pub const FIXEDSYSSTRING: u8 = 0x17;
    pub const OBJECTREF: u8 = 0x18;
    pub const IUNKNOWN: u8 = 0x19;
    pub const IDISPATCH: u8 = 0x1a;
    pub const STRUCT: u8 = 0x1b;
    pub const INTERFACE: u8 = 0x1c;
    pub const SAFEARRAY: u8 = 0x1d;
    pub const FIXEDARRAY: u8 = 0x1e;
    pub const INT: u8 = 0x1f;
    pub const UINT: u8 = 0x20;
    pub const NESTEDSTRUCT: u8 = 0x21;
    pub const BYVALSTR: u8 = 0x22;
    pub const ANSIBSTR: u8 = 0x23;
    pub const TBSTR: u8 = 0x24;
    pub const VARIANTBOOL: u8 = 0x25;
    pub const FUNC: u8 = 0x26;
    pub const ASANY: u8 = 0x28;
    pub const ARRAY: u8 = 0x2a;
    pub const LPSTRUCT: u8 = 0x2b;
    pub const CUSTOMMARSHALER: u8 = 0x2c;
    pub const ERROR: u8 = 0x2d;
    pub const IINSPECTABLE: u8 = 0x2e;
    pub const HSTRING: u8 = 0x2f;
    pub const LPUTF8STR: u8 = 0x30;
    /// Unspecified array element type
    pub const MAX: u8 = 0x50;
}

#[allow(non_snake_case, missing_docs)]
/// `VARTYPE` values used by safe arrays
pub mod VARIANT_TYPE {
    pub const EMPTY: u32 = 0;
    pub const NULL: u32 = 1;
    pub const I2: u32 = 2;
    pub const I4: u32 = 3;
    pub const R4: u32 = 4;
    pub const R8: u32 = 5;
    pub const CY: u32 = 6;
    pub const DATE: u32 = 7;
    pub const BSTR: u32 = 8;
    pub const DISPATCH: u32 = 9;
    pub const ERROR: u32 = 10;
    pub const BOOL: u32 = 11;
    pub const VARIANT: u32 = 12;
    pub const UNKNOWN: u32 = 13;
    pub const DECIMAL: u32 = 14;
    pub const I1: u32 = 16;
    pub const UI1: u32 = 17;
    pub const UI2: u32 = 18;
    pub const UI4: u32 = 19;
    pub const I8: u32 = 20;
    pub const UI8: u32 = 21;
    pub const INT: u32 = 22;
    pub const UINT: u32 = 23;
    pub const RECORD: u32 = 36;
}

/// A native type with its type specific fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeType {
    /// A type that carries no further fields, by its `NATIVE_TYPE` tag
    Simple(u8),
    /// Fixed length string embedded in a structure
    FixedSysString {
        /// Length in characters
        size: Option<u32>,
    },
    /// COM safe array
    SafeArray {
        /// `VARTYPE` of the elements
        variant_type: Option<u32>,
        /// Name of a user defined element type
        user_defined_subtype: Option<String>,
    },
    /// Fixed size array embedded in a structure
    FixedArray {
        /// Number of elements
        size: Option<u32>,
        /// Element `NATIVE_TYPE` tag
        element_type: Option<u8>,
    },
    /// C style array
    Array {
        /// Element `NATIVE_TYPE` tag, `None` when written as `NATIVE_TYPE::MAX`
        element_type: Option<u8>,
        /// Parameter holding the element count
        size_param_index: Option<u32>,
        /// Constant element count (added to the parameter value)
        num_elements: Option<u32>,
        /// Flags word; 1 when `size_param_index` was given explicitly
        size_param_multiplier: Option<u32>,
    },
    /// COM interface pointer
    Interface {
        /// Tag, one of `IUNKNOWN`, `IDISPATCH`, `INTERFACE` or `IINSPECTABLE`
        kind: u8,
        /// Parameter holding the interface IID
        iid_param_index: Option<u32>,
    },
    /// Structure with explicit layout
    Struct {
        /// Packing size
        packing_size: Option<u32>,
        /// Total size
        class_size: Option<u32>,
    },
    /// User defined marshaler
    CustomMarshaler {
        /// GUID string of the marshaler, usually empty
        guid: String,
        /// Unmanaged type name, usually empty
        native_type_name: String,
        /// Fully qualified managed type of the marshaler
        managed_type: String,
        /// Cookie passed to the marshaler
        cookie: String,
    },
}

impl NativeType {
    /// The `NATIVE_TYPE` tag of this type
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            NativeType::Simple(tag) | NativeType::Interface { kind: tag, .. } => *tag,
            NativeType::FixedSysString { .. } => NATIVE_TYPE::FIXEDSYSSTRING,
            NativeType::SafeArray { .. } => NATIVE_TYPE::SAFEARRAY,
            NativeType::FixedArray { .. } => NATIVE_TYPE::FIXEDARRAY,
            NativeType::Array { .. } => NATIVE_TYPE::ARRAY,
            NativeType::Struct { .. } => NATIVE_TYPE::STRUCT,
            NativeType::CustomMarshaler { .. } => NATIVE_TYPE::CUSTOMMARSHALER,
        }
    }
}

/// A complete `FieldMarshal` blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshallingInfo {
    /// The described native type
    pub native_type: NativeType,
    /// Bytes following a complete descriptor, preserved verbatim
    pub extra_data: Vec<u8>,
}

impl From<NativeType> for MarshallingInfo {
    fn from(native_type: NativeType) -> Self {
        MarshallingInfo {
            native_type,
            extra_data: Vec::new(),
        }
    }
}

/// Decode a marshalling descriptor blob.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unknown tags or truncated fields.
pub fn parse_marshalling_descriptor(data: &[u8]) -> Result<MarshallingInfo> {
    let mut parser = MarshallingParser::new(data);
    parser.parse_descriptor()
}

/// Encode a marshalling descriptor blob.
///
/// # Errors
/// Returns [`crate::Error::SignatureEncoding`] when an optional field is set while an
/// earlier optional field of the same type is not; such a descriptor has no encoding.
pub fn encode_marshalling_descriptor(info: &MarshallingInfo) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    encode_native_type(&info.native_type, &mut buffer)?;
    buffer.extend_from_slice(&info.extra_data);
    Ok(buffer)
}

/// Writes optional trailing fields in order, rejecting gaps
struct OptionalFields<'b> {
    buffer: &'b mut Vec<u8>,
    closed: bool,
}

impl OptionalFields<'_> {
    fn uint(&mut self, value: Option<u32>) -> Result<()> {
        match value {
            Some(value) if !self.closed => write_compressed_uint(value, self.buffer),
            Some(_) => Err(Error::SignatureEncoding(
                "Marshalling descriptor field follows an absent field".into(),
            )),
            None => {
                self.closed = true;
                Ok(())
            }
        }
    }

    fn tag(&mut self, value: Option<u8>, absent: Option<u8>) -> Result<()> {
        match (value, absent) {
            (Some(tag), _) if !self.closed => {
                self.buffer.push(tag);
                Ok(())
            }
            (Some(_), _) => Err(Error::SignatureEncoding(
                "Marshalling descriptor field follows an absent field".into(),
            )),
            (None, Some(placeholder)) if !self.closed => {
                self.buffer.push(placeholder);
                Ok(())
            }
            (None, _) => {
                self.closed = true;
                Ok(())
            }
        }
    }

    fn string(&mut self, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) if !self.closed => write_ser_string(Some(value), self.buffer),
            Some(_) => Err(Error::SignatureEncoding(
                "Marshalling descriptor field follows an absent field".into(),
            )),
            None => {
                self.closed = true;
                Ok(())
            }
        }
    }
}

fn encode_native_type(native: &NativeType, buffer: &mut Vec<u8>) -> Result<()> {
    buffer.push(native.tag());
    let mut fields = OptionalFields {
        buffer,
        closed: false,
    };

    match native {
        NativeType::Simple(_) => {}
        NativeType::FixedSysString { size } => fields.uint(*size)?,
        NativeType::SafeArray {
            variant_type,
            user_defined_subtype,
        } => {
            fields.uint(*variant_type)?;
            fields.string(user_defined_subtype.as_deref())?;
        }
        NativeType::FixedArray { size, element_type } => {
            fields.uint(*size)?;
            fields.tag(*element_type, None)?;
        }
        NativeType::Array {
            element_type,
            size_param_index,
            num_elements,
            size_param_multiplier,
        } => {
            // The element type is always written for arrays
            fields.tag(*element_type, Some(NATIVE_TYPE::MAX))?;
            fields.uint(*size_param_index)?;
            fields.uint(*num_elements)?;
            fields.uint(*size_param_multiplier)?;
        }
        NativeType::Interface {
            iid_param_index, ..
        } => fields.uint(*iid_param_index)?,
        NativeType::Struct {
            packing_size,
            class_size,
        } => {
            fields.uint(*packing_size)?;
            fields.uint(*class_size)?;
        }
        NativeType::CustomMarshaler {
            guid,
            native_type_name,
            managed_type,
            cookie,
        } => {
            for value in [guid, native_type_name, managed_type, cookie] {
                write_ser_string(Some(value), fields.buffer)?;
            }
        }
    }

    Ok(())
}

/// Decoder for marshalling descriptors
pub struct MarshallingParser<'a> {
    parser: Parser<'a>,
}

impl<'a> MarshallingParser<'a> {
    /// Create a parser over `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        MarshallingParser {
            parser: Parser::new(data),
        }
    }

    /// Decode a whole blob, keeping trailing bytes
    ///
    /// # Errors
    /// See [`parse_marshalling_descriptor`].
    pub fn parse_descriptor(&mut self) -> Result<MarshallingInfo> {
        let native_type = self.parse_native_type()?;
        let remaining = self.parser.remaining();
        let extra_data = self.parser.read_bytes(remaining)?.to_vec();
        Ok(MarshallingInfo {
            native_type,
            extra_data,
        })
    }

    fn optional_uint(&mut self) -> Result<Option<u32>> {
        if self.parser.has_more_data() {
            Ok(Some(self.parser.read_compressed_uint()?))
        } else {
            Ok(None)
        }
    }

    fn string(&mut self) -> Result<String> {
        Ok(self
            .parser
            .read_ser_string()?
            .map(str::to_string)
            .unwrap_or_default())
    }

    /// Decode a single native type
    ///
    /// # Errors
    /// See [`parse_marshalling_descriptor`].
    pub fn parse_native_type(&mut self) -> Result<NativeType> {
        let tag = self.parser.read_le::<u8>()?;
        Ok(match tag {
            NATIVE_TYPE::FIXEDSYSSTRING => NativeType::FixedSysString {
                size: self.optional_uint()?,
            },
            NATIVE_TYPE::SAFEARRAY => {
                let variant_type = self.optional_uint()?;
                let user_defined_subtype = if self.parser.has_more_data() {
                    Some(self.string()?)
                } else {
                    None
                };
                NativeType::SafeArray {
                    variant_type,
                    user_defined_subtype,
                }
            }
            NATIVE_TYPE::FIXEDARRAY => {
                let size = self.optional_uint()?;
                let element_type = if self.parser.has_more_data() {
                    Some(self.parser.read_le::<u8>()?)
                } else {
                    None
                };
                NativeType::FixedArray { size, element_type }
            }
            NATIVE_TYPE::ARRAY => {
                let element_type = match self.parser.read_le::<u8>()? {
                    NATIVE_TYPE::MAX => None,
                    element => Some(element),
                };
                NativeType::Array {
                    element_type,
                    size_param_index: self.optional_uint()?,
                    num_elements: self.optional_uint()?,
                    size_param_multiplier: self.optional_uint()?,
                }
            }
            NATIVE_TYPE::IUNKNOWN
            | NATIVE_TYPE::IDISPATCH
            | NATIVE_TYPE::INTERFACE
            | NATIVE_TYPE::IINSPECTABLE => NativeType::Interface {
                kind: tag,
                iid_param_index: self.optional_uint()?,
            },
            NATIVE_TYPE::STRUCT => NativeType::Struct {
                packing_size: self.optional_uint()?,
                class_size: self.optional_uint()?,
            },
            NATIVE_TYPE::CUSTOMMARSHALER => NativeType::CustomMarshaler {
                guid: self.string()?,
                native_type_name: self.string()?,
                managed_type: self.string()?,
                cookie: self.string()?,
            },
            NATIVE_TYPE::VOID..=NATIVE_TYPE::LPTSTR
            | NATIVE_TYPE::OBJECTREF
            | NATIVE_TYPE::INT..=NATIVE_TYPE::FUNC
            | NATIVE_TYPE::ASANY
            | NATIVE_TYPE::LPSTRUCT
            | NATIVE_TYPE::ERROR
            | NATIVE_TYPE::HSTRING
            | NATIVE_TYPE::LPUTF8STR => NativeType::Simple(tag),
            _ => return Err(malformed_error!("Invalid NATIVE_TYPE byte - 0x{:02X}", tag)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(blob: &[u8]) -> MarshallingInfo {
        let info = parse_marshalling_descriptor(blob).unwrap();
        assert_eq!(encode_marshalling_descriptor(&info).unwrap(), blob);
        info
    }

    #[test]
    fn simple_types() {
        for tag in [
            NATIVE_TYPE::BOOLEAN,
            NATIVE_TYPE::I4,
            NATIVE_TYPE::R8,
            NATIVE_TYPE::LPSTR,
            NATIVE_TYPE::LPWSTR,
            NATIVE_TYPE::BYVALSTR,
            NATIVE_TYPE::VARIANTBOOL,
            NATIVE_TYPE::HSTRING,
            NATIVE_TYPE::LPUTF8STR,
        ] {
            assert_eq!(roundtrip(&[tag]).native_type, NativeType::Simple(tag));
        }
    }

    #[test]
    fn arrays() {
        let info = roundtrip(&[NATIVE_TYPE::ARRAY, NATIVE_TYPE::MAX]);
        assert_eq!(
            info.native_type,
            NativeType::Array {
                element_type: None,
                size_param_index: None,
                num_elements: None,
                size_param_multiplier: None,
            }
        );

        // size_param_index 0 is a real value, not a terminator
        let info = roundtrip(&[NATIVE_TYPE::ARRAY, NATIVE_TYPE::LPWSTR, 0x00, 0x81, 0x00, 0x01]);
        assert_eq!(
            info.native_type,
            NativeType::Array {
                element_type: Some(NATIVE_TYPE::LPWSTR),
                size_param_index: Some(0),
                num_elements: Some(0x100),
                size_param_multiplier: Some(1),
            }
        );

        let info = roundtrip(&[NATIVE_TYPE::FIXEDARRAY, 0x10, NATIVE_TYPE::U1]);
        assert_eq!(
            info.native_type,
            NativeType::FixedArray {
                size: Some(16),
                element_type: Some(NATIVE_TYPE::U1),
            }
        );
    }

    #[test]
    fn safe_array_and_interfaces() {
        let info = roundtrip(&[NATIVE_TYPE::SAFEARRAY, 0x08]);
        assert_eq!(
            info.native_type,
            NativeType::SafeArray {
                variant_type: Some(VARIANT_TYPE::BSTR),
                user_defined_subtype: None,
            }
        );

        let info = roundtrip(&[NATIVE_TYPE::SAFEARRAY, 0x24, 0x03, b'R', b'e', b'c']);
        assert_eq!(
            info.native_type,
            NativeType::SafeArray {
                variant_type: Some(VARIANT_TYPE::RECORD),
                user_defined_subtype: Some("Rec".into()),
            }
        );

        let info = roundtrip(&[NATIVE_TYPE::INTERFACE, 0x01]);
        assert_eq!(
            info.native_type,
            NativeType::Interface {
                kind: NATIVE_TYPE::INTERFACE,
                iid_param_index: Some(1),
            }
        );
    }

    #[test]
    fn custom_marshaler() {
        #[rustfmt::skip]
        let blob = [
            NATIVE_TYPE::CUSTOMMARSHALER,
            0x00,
            0x00,
            0x04, b'M', b'a', b'r', b's',
            0x02, b'c', b'k',
        ];
        let info = roundtrip(&blob);
        assert_eq!(
            info.native_type,
            NativeType::CustomMarshaler {
                guid: String::new(),
                native_type_name: String::new(),
                managed_type: "Mars".into(),
                cookie: "ck".into(),
            }
        );
    }

    #[test]
    fn trailing_bytes_preserved() {
        let info = roundtrip(&[NATIVE_TYPE::I4, 0x00, 0x00]);
        assert_eq!(info.native_type, NativeType::Simple(NATIVE_TYPE::I4));
        assert_eq!(info.extra_data, vec![0x00, 0x00]);
    }

    #[test]
    fn errors() {
        assert!(parse_marshalling_descriptor(&[]).is_err());
        assert!(parse_marshalling_descriptor(&[0x27]).is_err());
        assert!(parse_marshalling_descriptor(&[NATIVE_TYPE::CUSTOMMARSHALER, 0x00]).is_err());
        assert!(parse_marshalling_descriptor(&[NATIVE_TYPE::ARRAY]).is_err());

        let gap = MarshallingInfo::from(NativeType::Struct {
            packing_size: None,
            class_size: Some(8),
        });
        assert!(encode_marshalling_descriptor(&gap).is_err());
    }
}
