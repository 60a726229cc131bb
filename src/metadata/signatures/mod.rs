//! Method and type signatures (ECMA-335 II.23.2).
//!
//! Signatures are stored in the `#Blob` heap and describe the types of fields, method
//! parameters and return values, properties, locals, type specifications and method
//! instantiations. This module decodes them into [`TypeSignature`] trees and encodes
//! those trees back into the identical byte sequence.
//!
//! # Examples
//!
//! ```rust
//! use cilpe::metadata::signatures::{encode_method_signature, parse_method_signature};
//!
//! let blob = [0x20, 0x01, 0x01, 0x0E]; // instance void (string)
//! let method = parse_method_signature(&blob)?;
//! assert!(method.has_this);
//! assert_eq!(encode_method_signature(&method)?, blob);
//! # Ok::<(), cilpe::Error>(())
//! ```
//!
//! Some producers over-allocate signature blobs. [`SignatureBlob`] keeps whatever
//! follows the signature so that it can be written back verbatim.

mod encoder;
mod parser;
mod types;

pub use encoder::*;
pub use parser::*;
pub use types::*;

use crate::Result;

#[allow(non_snake_case, dead_code, missing_docs)]
/// Element type tags used in signatures and custom attribute blobs
pub mod ELEMENT_TYPE {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    // Followed by type
    pub const PTR: u8 = 0x0f;
    // Followed by type
    pub const BYREF: u8 = 0x10;
    // Followed by TypeDef or TypeRef token
    pub const VALUETYPE: u8 = 0x11;
    // Followed by TypeDef or TypeRef token
    pub const CLASS: u8 = 0x12;
    // Generic parameter in a generic type definition, represented as number
    pub const VAR: u8 = 0x13;
    // type rank boundsCount bound1 … loCount lo1 …
    pub const ARRAY: u8 = 0x14;
    // Generic type instantiation. Followed by type type-arg-count type-1 ... type-n
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    // System.IntPtr
    pub const I: u8 = 0x18;
    // System.UIntPtr
    pub const U: u8 = 0x19;
    // Followed by full method signature
    pub const FNPTR: u8 = 0x1b;
    // System.Object
    pub const OBJECT: u8 = 0x1c;
    // Single-dim array with 0 lower bound
    pub const SZARRAY: u8 = 0x1d;
    // Generic parameter in a generic method definition, represented as number
    pub const MVAR: u8 = 0x1e;
    // Required modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_REQD: u8 = 0x1f;
    // Optional modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_OPT: u8 = 0x20;
    // Implemented within the CLI
    pub const INTERNAL: u8 = 0x21;
    // Or'd with following element types
    pub const MODIFIER: u8 = 0x40;
    // Sentinel for vararg method signature
    pub const SENTINEL: u8 = 0x41;
    // Denotes a local variable that points at a pinned object
    pub const PINNED: u8 = 0x45;
    // System.Type in custom attributes
    pub const TYPE: u8 = 0x50;
    // Boxed object in custom attributes
    pub const BOXED: u8 = 0x51;
    // Custom attribute named field
    pub const FIELD: u8 = 0x53;
    // Custom attribute named property
    pub const PROPERTY: u8 = 0x54;
    // Enum in custom attributes, followed by the type name
    pub const ENUM: u8 = 0x55;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Calling convention byte of method signatures
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const C: u8 = 0x01;
    pub const STDCALL: u8 = 0x02;
    pub const THISCALL: u8 = 0x03;
    pub const FASTCALL: u8 = 0x04;
    pub const VARARG: u8 = 0x05;
    pub const KIND_MASK: u8 = 0x0F;
    pub const GENERIC: u8 = 0x10;
    pub const HASTHIS: u8 = 0x20;
    pub const EXPLICITTHIS: u8 = 0x40;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Leading byte of non-method signatures
pub mod SIGNATURE_HEADER {
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const PROPERTY: u8 = 0x08;
    pub const METHOD_SPEC: u8 = 0x0A;
}

/// Parse a `MethodSignature` from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_method_signature(data: &[u8]) -> Result<SignatureMethod> {
    let mut parser = SignatureParser::new(data);
    parser.parse_method_signature()
}

/// Parse a `FieldSignature` from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_field_signature(data: &[u8]) -> Result<SignatureField> {
    let mut parser = SignatureParser::new(data);
    parser.parse_field_signature()
}

/// Parse a `PropertySignature` from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_property_signature(data: &[u8]) -> Result<SignatureProperty> {
    let mut parser = SignatureParser::new(data);
    parser.parse_property_signature()
}

/// Parse a `LocalVarSignature` from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_local_var_signature(data: &[u8]) -> Result<SignatureLocalVariables> {
    let mut parser = SignatureParser::new(data);
    parser.parse_local_var_signature()
}

/// Parse a `TypeSpecSignature` from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_type_spec_signature(data: &[u8]) -> Result<SignatureTypeSpec> {
    let mut parser = SignatureParser::new(data);
    parser.parse_type_spec_signature()
}

/// Parse a `MethodSpecSignature` from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_method_spec_signature(data: &[u8]) -> Result<SignatureMethodSpec> {
    let mut parser = SignatureParser::new(data);
    parser.parse_method_spec_signature()
}

/// A signature kind that can be read from and written to a blob.
pub trait BlobSignature: Sized {
    /// Read one signature of this kind
    ///
    /// # Errors
    /// Returns an error if the data does not hold a signature of this kind.
    fn read(parser: &mut SignatureParser<'_>) -> Result<Self>;

    /// Encode the signature
    ///
    /// # Errors
    /// Returns an error if the signature has no valid encoding.
    fn encode(&self) -> Result<Vec<u8>>;
}

macro_rules! impl_blob_signature {
    ($($ty:ty => $read:ident, $encode:ident;)*) => {
        $(
            impl BlobSignature for $ty {
                fn read(parser: &mut SignatureParser<'_>) -> Result<Self> {
                    parser.$read()
                }

                fn encode(&self) -> Result<Vec<u8>> {
                    $encode(self)
                }
            }
        )*
    };
}

impl_blob_signature! {
    SignatureMethod => parse_method_signature, encode_method_signature;
    SignatureField => parse_field_signature, encode_field_signature;
    SignatureProperty => parse_property_signature, encode_property_signature;
    SignatureLocalVariables => parse_local_var_signature, encode_local_var_signature;
    SignatureTypeSpec => parse_type_spec_signature, encode_typespec_signature;
    SignatureMethodSpec => parse_method_spec_signature, encode_method_spec_signature;
}

/// A decoded signature plus the bytes that followed it inside its blob.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureBlob<T> {
    /// The decoded signature
    pub signature: T,
    /// Trailing bytes, preserved verbatim
    pub extra_data: Vec<u8>,
}

impl<T: BlobSignature> SignatureBlob<T> {
    /// Decode `data`, keeping anything after the signature as extra data.
    ///
    /// # Errors
    /// Returns an error if `data` does not start with a valid signature.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_with_depth(data, MAX_RECURSION_DEPTH)
    }

    /// Like [`SignatureBlob::parse`] with a custom nesting limit.
    ///
    /// # Errors
    /// Returns an error if `data` does not start with a valid signature.
    pub fn parse_with_depth(data: &[u8], max_depth: usize) -> Result<Self> {
        let mut parser = SignatureParser::with_max_depth(data, max_depth);
        let signature = T::read(&mut parser)?;
        Ok(SignatureBlob {
            signature,
            extra_data: parser.remaining().to_vec(),
        })
    }

    /// Encode the signature followed by the preserved extra data.
    ///
    /// # Errors
    /// Returns an error if the signature has no valid encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = self.signature.encode()?;
        bytes.extend_from_slice(&self.extra_data);
        Ok(bytes)
    }
}
