//! Custom attribute blobs (ECMA-335 II.23.3).
//!
//! A `CustomAttribute` row points at a constructor and a blob. The blob holds the
//! constructor arguments, typed by the constructor signature, followed by named field and
//! property assignments that carry their own types.
//!
//! # Examples
//!
//! ```rust
//! use cilpe::metadata::customattributes::{
//!     encode_custom_attribute_value, parse_custom_attribute_data, CustomAttributeArgument,
//!     NoTypeResolver,
//! };
//! use cilpe::metadata::signatures::parse_method_signature;
//!
//! // instance void .ctor(string)
//! let ctor = parse_method_signature(&[0x20, 0x01, 0x01, 0x0E])?;
//! let blob = [0x01, 0x00, 0x02, b'h', b'i', 0x00, 0x00];
//!
//! let value = parse_custom_attribute_data(&blob, &ctor, &NoTypeResolver)?;
//! assert_eq!(value.fixed_args[0], CustomAttributeArgument::String(Some("hi".into())));
//! assert_eq!(encode_custom_attribute_value(&value, &ctor, &NoTypeResolver)?, blob);
//! # Ok::<(), cilpe::Error>(())
//! ```

mod encoder;
mod parser;
mod types;

pub use encoder::{
    encode_custom_attribute_value, encode_field_or_prop_type, encode_named_arguments,
};
pub use parser::{
    declared_type, parse_custom_attribute_blob, parse_custom_attribute_data,
    parse_named_arguments, CustomAttributeParser,
};
pub use types::*;
