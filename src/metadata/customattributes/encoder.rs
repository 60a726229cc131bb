//! Custom attribute blob encoding.
//!
//! The inverse of the parser: each fixed argument is written with the routine chosen by
//! the constructor's declared parameter type. Values in `object` slots are preceded by
//! the type deduced from the value itself.

use crate::{
    file::{io::push_le, writer::write_ser_string},
    metadata::{
        customattributes::{
            parser::{declared_type, CUSTOM_ATTRIBUTE_PROLOG, MAX_NESTING_DEPTH},
            types::{
                CustomAttributeArgument, CustomAttributeNamedArgument, CustomAttributeType,
                CustomAttributeValue, TypeResolver,
            },
        },
        signatures::{SignatureMethod, ELEMENT_TYPE},
    },
    Error, Result,
};

/// Encode `value` as a custom attribute blob for `constructor`.
///
/// # Errors
/// Returns [`crate::Error::CustomAttribute`] if the number of fixed arguments differs
/// from the constructor's parameter count, a parameter type cannot be resolved, or a
/// value does not match its declared type.
pub fn encode_custom_attribute_value(
    value: &CustomAttributeValue,
    constructor: &SignatureMethod,
    resolver: &dyn TypeResolver,
) -> Result<Vec<u8>> {
    if value.fixed_args.len() != constructor.params.len() {
        return Err(Error::CustomAttribute(format!(
            "Constructor takes {} arguments, {} given",
            constructor.params.len(),
            value.fixed_args.len()
        )));
    }

    let mut buffer = Vec::new();
    push_le(&mut buffer, CUSTOM_ATTRIBUTE_PROLOG);

    for (param, argument) in constructor.params.iter().zip(&value.fixed_args) {
        let declared = declared_type(&param.base, resolver)?;
        encode_value(argument, &declared, &mut buffer, 0)?;
    }

    let Ok(named_count) = u16::try_from(value.named_args.len()) else {
        return Err(Error::CustomAttribute(format!(
            "Too many named arguments: {}",
            value.named_args.len()
        )));
    };
    push_le(&mut buffer, named_count);
    for named in &value.named_args {
        encode_named_argument(named, &mut buffer)?;
    }

    Ok(buffer)
}

/// Append named arguments without count or prolog, as used by security attribute blobs.
///
/// # Errors
/// Returns an error if a value does not match its declared type.
pub fn encode_named_arguments(
    arguments: &[CustomAttributeNamedArgument],
    buffer: &mut Vec<u8>,
) -> Result<()> {
    for named in arguments {
        encode_named_argument(named, buffer)?;
    }
    Ok(())
}

fn encode_named_argument(named: &CustomAttributeNamedArgument, buffer: &mut Vec<u8>) -> Result<()> {
    buffer.push(if named.is_field {
        ELEMENT_TYPE::FIELD
    } else {
        ELEMENT_TYPE::PROPERTY
    });
    encode_field_or_prop_type(&named.arg_type, buffer)?;
    write_ser_string(Some(&named.name), buffer)?;
    encode_value(&named.value, &named.arg_type, buffer, 0)
}

/// Append the `FieldOrPropType` encoding of `ty`.
///
/// # Errors
/// Returns an error if an enum name cannot be length-prefixed.
pub fn encode_field_or_prop_type(ty: &CustomAttributeType, buffer: &mut Vec<u8>) -> Result<()> {
    match ty {
        CustomAttributeType::Boolean => buffer.push(ELEMENT_TYPE::BOOLEAN),
        CustomAttributeType::Char => buffer.push(ELEMENT_TYPE::CHAR),
        CustomAttributeType::I1 => buffer.push(ELEMENT_TYPE::I1),
        CustomAttributeType::U1 => buffer.push(ELEMENT_TYPE::U1),
        CustomAttributeType::I2 => buffer.push(ELEMENT_TYPE::I2),
        CustomAttributeType::U2 => buffer.push(ELEMENT_TYPE::U2),
        CustomAttributeType::I4 => buffer.push(ELEMENT_TYPE::I4),
        CustomAttributeType::U4 => buffer.push(ELEMENT_TYPE::U4),
        CustomAttributeType::I8 => buffer.push(ELEMENT_TYPE::I8),
        CustomAttributeType::U8 => buffer.push(ELEMENT_TYPE::U8),
        CustomAttributeType::R4 => buffer.push(ELEMENT_TYPE::R4),
        CustomAttributeType::R8 => buffer.push(ELEMENT_TYPE::R8),
        CustomAttributeType::String => buffer.push(ELEMENT_TYPE::STRING),
        CustomAttributeType::Type => buffer.push(ELEMENT_TYPE::TYPE),
        CustomAttributeType::Object => buffer.push(ELEMENT_TYPE::BOXED),
        CustomAttributeType::SzArray(element) => {
            buffer.push(ELEMENT_TYPE::SZARRAY);
            encode_field_or_prop_type(element, buffer)?;
        }
        CustomAttributeType::Enum(name, _) => {
            buffer.push(ELEMENT_TYPE::ENUM);
            write_ser_string(Some(name), buffer)?;
        }
    }
    Ok(())
}

fn mismatch(argument: &CustomAttributeArgument, ty: &CustomAttributeType) -> Error {
    Error::CustomAttribute(format!("Value {argument:?} does not match type {ty:?}"))
}

fn encode_value(
    argument: &CustomAttributeArgument,
    ty: &CustomAttributeType,
    buffer: &mut Vec<u8>,
    depth: usize,
) -> Result<()> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(Error::RecursionLimit(MAX_NESTING_DEPTH));
    }

    match (ty, argument) {
        (CustomAttributeType::Boolean, CustomAttributeArgument::Bool(value)) => {
            buffer.push(u8::from(*value));
        }
        (CustomAttributeType::Char, CustomAttributeArgument::Char(value)) => {
            let Ok(unit) = u16::try_from(u32::from(*value)) else {
                return Err(Error::CustomAttribute(format!(
                    "Character {value:?} is outside the basic multilingual plane"
                )));
            };
            push_le(buffer, unit);
        }
        (CustomAttributeType::I1, CustomAttributeArgument::I1(value)) => push_le(buffer, *value),
        (CustomAttributeType::U1, CustomAttributeArgument::U1(value)) => push_le(buffer, *value),
        (CustomAttributeType::I2, CustomAttributeArgument::I2(value)) => push_le(buffer, *value),
        (CustomAttributeType::U2, CustomAttributeArgument::U2(value)) => push_le(buffer, *value),
        (CustomAttributeType::I4, CustomAttributeArgument::I4(value)) => push_le(buffer, *value),
        (CustomAttributeType::U4, CustomAttributeArgument::U4(value)) => push_le(buffer, *value),
        (CustomAttributeType::I8, CustomAttributeArgument::I8(value)) => push_le(buffer, *value),
        (CustomAttributeType::U8, CustomAttributeArgument::U8(value)) => push_le(buffer, *value),
        (CustomAttributeType::R4, CustomAttributeArgument::R4(value)) => push_le(buffer, *value),
        (CustomAttributeType::R8, CustomAttributeArgument::R8(value)) => push_le(buffer, *value),
        (CustomAttributeType::String, CustomAttributeArgument::String(value))
        | (CustomAttributeType::Type, CustomAttributeArgument::Type(value)) => {
            write_ser_string(value.as_deref(), buffer)?;
        }
        (CustomAttributeType::Object, value) => {
            let boxed = value.boxed_type()?;
            encode_field_or_prop_type(&boxed, buffer)?;
            encode_value(value, &boxed, buffer, depth + 1)?;
        }
        (
            CustomAttributeType::Enum(declared, underlying),
            CustomAttributeArgument::Enum(name, value),
        ) => {
            if declared != name {
                return Err(mismatch(argument, ty));
            }
            encode_value(value, underlying, buffer, depth + 1)?;
        }
        (CustomAttributeType::SzArray(element), CustomAttributeArgument::Array(items_type, items)) => {
            if element.as_ref() != items_type {
                return Err(mismatch(argument, ty));
            }

            match items {
                None => push_le(buffer, -1_i32),
                Some(items) => {
                    let Ok(length) = i32::try_from(items.len()) else {
                        return Err(Error::CustomAttribute(format!(
                            "Array of {} elements is too long",
                            items.len()
                        )));
                    };
                    push_le(buffer, length);
                    for item in items {
                        encode_value(item, element, buffer, depth + 1)?;
                    }
                }
            }
        }
        _ => return Err(mismatch(argument, ty)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        customattributes::{parse_custom_attribute_data, NoTypeResolver, TypeTable},
        signatures::{SignatureParameter, SignatureSzArray, TypeSignature},
        token::Token,
    };

    fn constructor(params: Vec<TypeSignature>) -> SignatureMethod {
        SignatureMethod {
            has_this: true,
            default: true,
            return_type: SignatureParameter::new(TypeSignature::Void),
            params: params.into_iter().map(SignatureParameter::new).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn roundtrip() {
        let enum_token = Token::new(0x0200_0005);
        let resolver = TypeTable::new().with_type(
            enum_token,
            CustomAttributeType::Enum("Flags".into(), Box::new(CustomAttributeType::U1)),
        );
        let ctor = constructor(vec![
            TypeSignature::String,
            TypeSignature::ValueType(enum_token),
            TypeSignature::SzArray(SignatureSzArray {
                modifiers: vec![],
                base: Box::new(TypeSignature::Object),
            }),
        ]);

        let value = CustomAttributeValue {
            fixed_args: vec![
                CustomAttributeArgument::String(Some("name".into())),
                CustomAttributeArgument::Enum("Flags".into(), Box::new(CustomAttributeArgument::U1(3))),
                CustomAttributeArgument::Array(
                    CustomAttributeType::Object,
                    Some(vec![
                        CustomAttributeArgument::Enum(
                            "Other".into(),
                            Box::new(CustomAttributeArgument::I4(9)),
                        ),
                        CustomAttributeArgument::Array(CustomAttributeType::String, None),
                        CustomAttributeArgument::Char('x'),
                    ]),
                ),
            ],
            named_args: vec![CustomAttributeNamedArgument {
                is_field: false,
                name: "Level".into(),
                arg_type: CustomAttributeType::I8,
                value: CustomAttributeArgument::I8(-5),
            }],
        };

        let bytes = encode_custom_attribute_value(&value, &ctor, &resolver).unwrap();

        #[rustfmt::skip]
        let expected = [
            0x01, 0x00,
            0x04, b'n', b'a', b'm', b'e',
            0x03,
            0x03, 0x00, 0x00, 0x00,
            0x55, 0x05, b'O', b't', b'h', b'e', b'r', 0x09, 0x00, 0x00, 0x00,
            0x1D, 0x0E, 0xFF, 0xFF, 0xFF, 0xFF,
            0x03, b'x', 0x00,
            0x01, 0x00,
            0x54, 0x0A, 0x05, b'L', b'e', b'v', b'e', b'l',
            0xFB, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        assert_eq!(bytes, expected);

        let decoded = parse_custom_attribute_data(&bytes, &ctor, &resolver).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn argument_count_mismatch() {
        let ctor = constructor(vec![TypeSignature::I4]);
        let result =
            encode_custom_attribute_value(&CustomAttributeValue::default(), &ctor, &NoTypeResolver);
        assert!(matches!(result, Err(Error::CustomAttribute(_))));
    }

    #[test]
    fn unresolvable_types_fail() {
        let ctor = constructor(vec![TypeSignature::Class(Token::new(0x0100_0001))]);
        let value = CustomAttributeValue {
            fixed_args: vec![CustomAttributeArgument::Type(Some("System.Int32".into()))],
            named_args: vec![],
        };
        assert!(encode_custom_attribute_value(&value, &ctor, &NoTypeResolver).is_err());

        let ctor = constructor(vec![TypeSignature::I4]);
        let value = CustomAttributeValue {
            fixed_args: vec![CustomAttributeArgument::String(None)],
            named_args: vec![],
        };
        assert!(encode_custom_attribute_value(&value, &ctor, &NoTypeResolver).is_err());

        let ctor = constructor(vec![TypeSignature::Object]);
        let value = CustomAttributeValue {
            fixed_args: vec![CustomAttributeArgument::Enum(
                "Broken".into(),
                Box::new(CustomAttributeArgument::R4(1.5)),
            )],
            named_args: vec![],
        };
        assert!(encode_custom_attribute_value(&value, &ctor, &NoTypeResolver).is_err());
    }
}
