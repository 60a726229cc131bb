//! Custom attribute blob decoding (ECMA-335 II.23.3).
//!
//! Fixed arguments carry no type tags; their types come from the constructor signature.
//! Classes and value types in that signature are resolved through a [`TypeResolver`].
//! Named arguments and values stored in `object` slots carry their own `FieldOrPropType`.

use crate::{
    file::parser::Parser,
    metadata::{
        customattributes::types::{
            CustomAttributeArgument, CustomAttributeNamedArgument, CustomAttributeType,
            CustomAttributeValue, TypeResolver,
        },
        signatures::{SignatureMethod, TypeSignature, ELEMENT_TYPE},
        streams::{Blob, HeapRead},
    },
    Error, Result,
};

/// Maximum nesting of arrays and boxed values inside one argument
pub(crate) const MAX_NESTING_DEPTH: usize = 64;

/// Blob prolog of every custom attribute
pub(crate) const CUSTOM_ATTRIBUTE_PROLOG: u16 = 0x0001;

/// Parse the custom attribute blob at `index` of the `#Blob` heap.
///
/// Index 0 is the empty attribute.
///
/// # Errors
/// Returns an error if the blob entry cannot be read or does not match `constructor`.
pub fn parse_custom_attribute_blob(
    blob: &Blob,
    index: u32,
    constructor: &SignatureMethod,
    resolver: &dyn TypeResolver,
) -> Result<CustomAttributeValue> {
    if index == 0 {
        return Ok(CustomAttributeValue::default());
    }

    let Some(data) = blob.get(index) else {
        return Err(malformed_error!(
            "Custom attribute blob at index {} is unresolved",
            index
        ));
    };

    parse_custom_attribute_data(data, constructor, resolver)
}

/// Parse custom attribute blob bytes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for a wrong prolog, truncated data or unknown type
/// tags, and [`crate::Error::CustomAttribute`] when a constructor parameter type is not
/// valid in a custom attribute or cannot be resolved.
pub fn parse_custom_attribute_data(
    data: &[u8],
    constructor: &SignatureMethod,
    resolver: &dyn TypeResolver,
) -> Result<CustomAttributeValue> {
    if data.is_empty() {
        return Ok(CustomAttributeValue::default());
    }

    let mut parser = CustomAttributeParser::new(data, resolver);
    parser.parse_custom_attribute(constructor)
}

/// Decode `count` named arguments that are not preceded by a prolog, as found in
/// security attribute blobs.
///
/// # Errors
/// Returns an error if any argument is malformed.
pub fn parse_named_arguments(
    data: &[u8],
    count: u32,
    resolver: &dyn TypeResolver,
) -> Result<Vec<CustomAttributeNamedArgument>> {
    let mut parser = CustomAttributeParser::new(data, resolver);
    let mut arguments = Vec::with_capacity((count as usize).min(64));
    for _ in 0..count {
        arguments.push(parser.parse_named_argument()?);
    }
    Ok(arguments)
}

/// Map a constructor parameter type to its serialized form.
///
/// # Errors
/// Returns [`crate::Error::CustomAttribute`] for types that cannot appear in a custom
/// attribute, and for classes or value types `resolver` does not know.
pub fn declared_type(
    signature: &TypeSignature,
    resolver: &dyn TypeResolver,
) -> Result<CustomAttributeType> {
    Ok(match signature {
        TypeSignature::Boolean => CustomAttributeType::Boolean,
        TypeSignature::Char => CustomAttributeType::Char,
        TypeSignature::I1 => CustomAttributeType::I1,
        TypeSignature::U1 => CustomAttributeType::U1,
        TypeSignature::I2 => CustomAttributeType::I2,
        TypeSignature::U2 => CustomAttributeType::U2,
        TypeSignature::I4 => CustomAttributeType::I4,
        TypeSignature::U4 => CustomAttributeType::U4,
        TypeSignature::I8 => CustomAttributeType::I8,
        TypeSignature::U8 => CustomAttributeType::U8,
        TypeSignature::R4 => CustomAttributeType::R4,
        TypeSignature::R8 => CustomAttributeType::R8,
        TypeSignature::String => CustomAttributeType::String,
        TypeSignature::Object => CustomAttributeType::Object,
        TypeSignature::SzArray(array) => {
            CustomAttributeType::SzArray(Box::new(declared_type(&array.base, resolver)?))
        }
        TypeSignature::Modified(_, inner) => declared_type(inner, resolver)?,
        TypeSignature::Class(token) => resolver.resolve_type(*token, false).ok_or_else(|| {
            Error::CustomAttribute(format!("Cannot resolve class {token} of constructor"))
        })?,
        TypeSignature::ValueType(token) => {
            resolver.resolve_type(*token, true).ok_or_else(|| {
                Error::CustomAttribute(format!("Cannot resolve value type {token} of constructor"))
            })?
        }
        other => {
            return Err(Error::CustomAttribute(format!(
                "Type {other:?} is not valid in a custom attribute"
            )))
        }
    })
}

/// Decoder for one custom attribute blob
pub struct CustomAttributeParser<'a> {
    parser: Parser<'a>,
    resolver: &'a dyn TypeResolver,
    depth: usize,
}

impl<'a> CustomAttributeParser<'a> {
    /// Create a parser over `data`
    #[must_use]
    pub fn new(data: &'a [u8], resolver: &'a dyn TypeResolver) -> Self {
        CustomAttributeParser {
            parser: Parser::new(data),
            resolver,
            depth: 0,
        }
    }

    /// Decode prolog, fixed arguments and named arguments.
    ///
    /// # Errors
    /// See [`parse_custom_attribute_data`].
    pub fn parse_custom_attribute(
        &mut self,
        constructor: &SignatureMethod,
    ) -> Result<CustomAttributeValue> {
        let prolog = self.parser.read_le::<u16>()?;
        if prolog != CUSTOM_ATTRIBUTE_PROLOG {
            return Err(malformed_error!(
                "Invalid custom attribute prolog - expected 0x0001, got 0x{:04X}",
                prolog
            ));
        }

        let mut fixed_args = Vec::with_capacity(constructor.params.len());
        for param in &constructor.params {
            if param.by_ref {
                return Err(Error::CustomAttribute(
                    "By-ref constructor parameters are not valid in a custom attribute".into(),
                ));
            }

            let declared = declared_type(&param.base, self.resolver)?;
            fixed_args.push(self.parse_value(&declared)?);
        }

        let named_count = self.parser.read_le::<u16>()?;
        let mut named_args = Vec::with_capacity(usize::from(named_count).min(64));
        for _ in 0..named_count {
            named_args.push(self.parse_named_argument()?);
        }

        Ok(CustomAttributeValue {
            fixed_args,
            named_args,
        })
    }

    fn parse_named_argument(&mut self) -> Result<CustomAttributeNamedArgument> {
        let is_field = match self.parser.read_le::<u8>()? {
            ELEMENT_TYPE::FIELD => true,
            ELEMENT_TYPE::PROPERTY => false,
            other => {
                return Err(malformed_error!(
                    "Invalid field/property indicator: 0x{:02X}",
                    other
                ))
            }
        };

        let arg_type = self.parse_field_or_prop_type()?;
        let Some(name) = self.parser.read_ser_string()? else {
            return Err(malformed_error!("Named argument without a name"));
        };
        let name = name.to_string();
        let value = self.parse_value(&arg_type)?;

        Ok(CustomAttributeNamedArgument {
            is_field,
            name,
            arg_type,
            value,
        })
    }

    /// Decode a `FieldOrPropType`
    fn parse_field_or_prop_type(&mut self) -> Result<CustomAttributeType> {
        self.enter()?;
        let result = self.parse_field_or_prop_type_inner();
        self.depth -= 1;
        result
    }

    fn parse_field_or_prop_type_inner(&mut self) -> Result<CustomAttributeType> {
        let tag = self.parser.read_le::<u8>()?;
        Ok(match tag {
            ELEMENT_TYPE::BOOLEAN => CustomAttributeType::Boolean,
            ELEMENT_TYPE::CHAR => CustomAttributeType::Char,
            ELEMENT_TYPE::I1 => CustomAttributeType::I1,
            ELEMENT_TYPE::U1 => CustomAttributeType::U1,
            ELEMENT_TYPE::I2 => CustomAttributeType::I2,
            ELEMENT_TYPE::U2 => CustomAttributeType::U2,
            ELEMENT_TYPE::I4 => CustomAttributeType::I4,
            ELEMENT_TYPE::U4 => CustomAttributeType::U4,
            ELEMENT_TYPE::I8 => CustomAttributeType::I8,
            ELEMENT_TYPE::U8 => CustomAttributeType::U8,
            ELEMENT_TYPE::R4 => CustomAttributeType::R4,
            ELEMENT_TYPE::R8 => CustomAttributeType::R8,
            ELEMENT_TYPE::STRING => CustomAttributeType::String,
            ELEMENT_TYPE::TYPE => CustomAttributeType::Type,
            ELEMENT_TYPE::BOXED => CustomAttributeType::Object,
            ELEMENT_TYPE::SZARRAY => {
                CustomAttributeType::SzArray(Box::new(self.parse_field_or_prop_type()?))
            }
            ELEMENT_TYPE::ENUM => {
                let Some(name) = self.parser.read_ser_string()? else {
                    return Err(malformed_error!("Enum type without a name"));
                };
                // Width is not part of the blob; int is by far the most common base
                let underlying = self
                    .resolver
                    .enum_underlying_type(name)
                    .unwrap_or(CustomAttributeType::I4);
                CustomAttributeType::Enum(name.to_string(), Box::new(underlying))
            }
            _ => {
                return Err(malformed_error!(
                    "Unsupported serialization type tag: 0x{:02X}",
                    tag
                ))
            }
        })
    }

    /// Decode one value of type `ty`
    fn parse_value(&mut self, ty: &CustomAttributeType) -> Result<CustomAttributeArgument> {
        self.enter()?;
        let result = self.parse_value_inner(ty);
        self.depth -= 1;
        result
    }

    fn parse_value_inner(&mut self, ty: &CustomAttributeType) -> Result<CustomAttributeArgument> {
        let parser = &mut self.parser;
        Ok(match ty {
            CustomAttributeType::Boolean => CustomAttributeArgument::Bool(parser.read_le::<u8>()? != 0),
            CustomAttributeType::Char => {
                let unit = parser.read_le::<u16>()?;
                CustomAttributeArgument::Char(char::from_u32(u32::from(unit)).unwrap_or('\u{FFFD}'))
            }
            CustomAttributeType::I1 => CustomAttributeArgument::I1(parser.read_le::<i8>()?),
            CustomAttributeType::U1 => CustomAttributeArgument::U1(parser.read_le::<u8>()?),
            CustomAttributeType::I2 => CustomAttributeArgument::I2(parser.read_le::<i16>()?),
            CustomAttributeType::U2 => CustomAttributeArgument::U2(parser.read_le::<u16>()?),
            CustomAttributeType::I4 => CustomAttributeArgument::I4(parser.read_le::<i32>()?),
            CustomAttributeType::U4 => CustomAttributeArgument::U4(parser.read_le::<u32>()?),
            CustomAttributeType::I8 => CustomAttributeArgument::I8(parser.read_le::<i64>()?),
            CustomAttributeType::U8 => CustomAttributeArgument::U8(parser.read_le::<u64>()?),
            CustomAttributeType::R4 => CustomAttributeArgument::R4(parser.read_le::<f32>()?),
            CustomAttributeType::R8 => CustomAttributeArgument::R8(parser.read_le::<f64>()?),
            CustomAttributeType::String => {
                CustomAttributeArgument::String(parser.read_ser_string()?.map(str::to_string))
            }
            CustomAttributeType::Type => {
                CustomAttributeArgument::Type(parser.read_ser_string()?.map(str::to_string))
            }
            CustomAttributeType::Object => {
                let boxed = self.parse_field_or_prop_type()?;
                self.parse_value(&boxed)?
            }
            CustomAttributeType::Enum(name, underlying) => {
                if !underlying.is_integral() {
                    return Err(Error::CustomAttribute(format!(
                        "Enum '{name}' has non-integral base {underlying:?}"
                    )));
                }
                let value = self.parse_value(underlying)?;
                CustomAttributeArgument::Enum(name.clone(), Box::new(value))
            }
            CustomAttributeType::SzArray(element) => {
                let length = parser.read_le::<i32>()?;
                match length {
                    -1 => CustomAttributeArgument::Array((**element).clone(), None),
                    length if length < 0 => {
                        return Err(malformed_error!("Invalid array length: {}", length))
                    }
                    length => {
                        #[allow(clippy::cast_sign_loss)]
                        let length = length as usize;
                        if length > self.parser.remaining() {
                            return Err(out_of_bounds_error!());
                        }

                        let mut items = Vec::with_capacity(length);
                        for _ in 0..length {
                            items.push(self.parse_value(element)?);
                        }
                        CustomAttributeArgument::Array((**element).clone(), Some(items))
                    }
                }
            }
        })
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(Error::RecursionLimit(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }
}
