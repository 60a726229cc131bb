//! Signature encoders, the inverse of [`super::SignatureParser`].
//!
//! Every encoder writes the exact ECMA-335 II.23.2 layout. Parsing a blob and encoding
//! the result yields the original bytes, trailing extra data aside.

use crate::{
    file::writer::{write_compressed_int, write_compressed_token, write_compressed_uint},
    metadata::signatures::{
        CustomModifier, SignatureArray, SignatureField, SignatureLocalVariables, SignatureMethod,
        SignatureMethodSpec, SignatureParameter, SignatureProperty, SignatureTypeSpec,
        TypeSignature, CALLING_CONVENTION, ELEMENT_TYPE, SIGNATURE_HEADER,
    },
    Error, Result,
};

fn encode_custom_modifiers(modifiers: &[CustomModifier], buffer: &mut Vec<u8>) -> Result<()> {
    for modifier in modifiers {
        buffer.push(if modifier.is_required {
            ELEMENT_TYPE::CMOD_REQD
        } else {
            ELEMENT_TYPE::CMOD_OPT
        });
        write_compressed_token(modifier.modifier_type, buffer)?;
    }
    Ok(())
}

fn encode_array(array: &SignatureArray, buffer: &mut Vec<u8>) -> Result<()> {
    if array.sizes.len() > array.rank as usize || array.lower_bounds.len() > array.rank as usize {
        return Err(Error::SignatureEncoding(format!(
            "array of rank {} lists {} sizes and {} lower bounds",
            array.rank,
            array.sizes.len(),
            array.lower_bounds.len()
        )));
    }

    encode_type_signature(&array.base, buffer)?;
    write_compressed_uint(array.rank, buffer)?;

    write_compressed_uint(array.sizes.len() as u32, buffer)?;
    for size in &array.sizes {
        write_compressed_uint(*size, buffer)?;
    }

    write_compressed_uint(array.lower_bounds.len() as u32, buffer)?;
    for bound in &array.lower_bounds {
        write_compressed_int(*bound, buffer)?;
    }
    Ok(())
}

/// Encode a single type into `buffer`.
///
/// # Errors
/// Returns [`Error::SignatureEncoding`] for shapes that have no valid encoding, such as a
/// generic instantiation of something other than a class or value type.
pub fn encode_type_signature(signature: &TypeSignature, buffer: &mut Vec<u8>) -> Result<()> {
    match signature {
        TypeSignature::Void => buffer.push(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => buffer.push(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => buffer.push(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => buffer.push(ELEMENT_TYPE::I1),
        TypeSignature::U1 => buffer.push(ELEMENT_TYPE::U1),
        TypeSignature::I2 => buffer.push(ELEMENT_TYPE::I2),
        TypeSignature::U2 => buffer.push(ELEMENT_TYPE::U2),
        TypeSignature::I4 => buffer.push(ELEMENT_TYPE::I4),
        TypeSignature::U4 => buffer.push(ELEMENT_TYPE::U4),
        TypeSignature::I8 => buffer.push(ELEMENT_TYPE::I8),
        TypeSignature::U8 => buffer.push(ELEMENT_TYPE::U8),
        TypeSignature::R4 => buffer.push(ELEMENT_TYPE::R4),
        TypeSignature::R8 => buffer.push(ELEMENT_TYPE::R8),
        TypeSignature::String => buffer.push(ELEMENT_TYPE::STRING),
        TypeSignature::TypedByRef => buffer.push(ELEMENT_TYPE::TYPEDBYREF),
        TypeSignature::I => buffer.push(ELEMENT_TYPE::I),
        TypeSignature::U => buffer.push(ELEMENT_TYPE::U),
        TypeSignature::Object => buffer.push(ELEMENT_TYPE::OBJECT),
        TypeSignature::Ptr(pointer) => {
            buffer.push(ELEMENT_TYPE::PTR);
            encode_custom_modifiers(&pointer.modifiers, buffer)?;
            encode_type_signature(&pointer.base, buffer)?;
        }
        TypeSignature::ByRef(inner) => {
            buffer.push(ELEMENT_TYPE::BYREF);
            encode_type_signature(inner, buffer)?;
        }
        TypeSignature::ValueType(token) => {
            buffer.push(ELEMENT_TYPE::VALUETYPE);
            write_compressed_token(*token, buffer)?;
        }
        TypeSignature::Class(token) => {
            buffer.push(ELEMENT_TYPE::CLASS);
            write_compressed_token(*token, buffer)?;
        }
        TypeSignature::GenericParamType(index) => {
            buffer.push(ELEMENT_TYPE::VAR);
            write_compressed_uint(*index, buffer)?;
        }
        TypeSignature::GenericParamMethod(index) => {
            buffer.push(ELEMENT_TYPE::MVAR);
            write_compressed_uint(*index, buffer)?;
        }
        TypeSignature::Array(array) => {
            buffer.push(ELEMENT_TYPE::ARRAY);
            encode_array(array, buffer)?;
        }
        TypeSignature::GenericInst(base, args) => {
            if !matches!(
                base.as_ref(),
                TypeSignature::Class(_) | TypeSignature::ValueType(_)
            ) {
                return Err(Error::SignatureEncoding(format!(
                    "generic instantiation of {base:?}"
                )));
            }
            if args.is_empty() {
                return Err(Error::SignatureEncoding(
                    "generic instantiation without arguments".to_string(),
                ));
            }

            buffer.push(ELEMENT_TYPE::GENERICINST);
            encode_type_signature(base, buffer)?;
            write_compressed_uint(args.len() as u32, buffer)?;
            for arg in args {
                encode_type_signature(arg, buffer)?;
            }
        }
        TypeSignature::FnPtr(method) => {
            buffer.push(ELEMENT_TYPE::FNPTR);
            write_method_signature(method, buffer)?;
        }
        TypeSignature::SzArray(array) => {
            buffer.push(ELEMENT_TYPE::SZARRAY);
            encode_custom_modifiers(&array.modifiers, buffer)?;
            encode_type_signature(&array.base, buffer)?;
        }
        TypeSignature::Modified(modifiers, inner) => {
            if modifiers.is_empty() {
                return Err(Error::SignatureEncoding(
                    "modified type without modifiers".to_string(),
                ));
            }
            encode_custom_modifiers(modifiers, buffer)?;
            encode_type_signature(inner, buffer)?;
        }
        TypeSignature::Pinned(inner) => {
            buffer.push(ELEMENT_TYPE::PINNED);
            encode_type_signature(inner, buffer)?;
        }
    }

    Ok(())
}

/// `Param ::= CustomMod* [BYREF] Type`
fn encode_parameter(parameter: &SignatureParameter, buffer: &mut Vec<u8>) -> Result<()> {
    encode_custom_modifiers(&parameter.modifiers, buffer)?;
    if parameter.by_ref {
        buffer.push(ELEMENT_TYPE::BYREF);
    }
    encode_type_signature(&parameter.base, buffer)
}

/// The calling convention byte of `signature`
#[must_use]
pub fn calling_convention(signature: &SignatureMethod) -> u8 {
    let mut convention = if signature.vararg {
        CALLING_CONVENTION::VARARG
    } else if signature.fastcall {
        CALLING_CONVENTION::FASTCALL
    } else if signature.thiscall {
        CALLING_CONVENTION::THISCALL
    } else if signature.stdcall {
        CALLING_CONVENTION::STDCALL
    } else if signature.cdecl {
        CALLING_CONVENTION::C
    } else {
        CALLING_CONVENTION::DEFAULT
    };

    if signature.has_this {
        convention |= CALLING_CONVENTION::HASTHIS;
    }
    if signature.explicit_this {
        convention |= CALLING_CONVENTION::EXPLICITTHIS;
    }
    if signature.param_count_generic > 0 {
        convention |= CALLING_CONVENTION::GENERIC;
    }
    convention
}

fn write_method_signature(signature: &SignatureMethod, buffer: &mut Vec<u8>) -> Result<()> {
    if !signature.varargs.is_empty() && !signature.vararg && !signature.cdecl {
        return Err(Error::SignatureEncoding(
            "vararg parameters on a non-vararg signature".to_string(),
        ));
    }

    buffer.push(calling_convention(signature));
    if signature.param_count_generic > 0 {
        write_compressed_uint(signature.param_count_generic, buffer)?;
    }

    let Ok(param_count) = u32::try_from(signature.params.len() + signature.varargs.len()) else {
        return Err(Error::SignatureEncoding(
            "too many parameters in method signature".to_string(),
        ));
    };
    write_compressed_uint(param_count, buffer)?;

    encode_parameter(&signature.return_type, buffer)?;
    for param in &signature.params {
        encode_parameter(param, buffer)?;
    }
    if !signature.varargs.is_empty() {
        buffer.push(ELEMENT_TYPE::SENTINEL);
        for param in &signature.varargs {
            encode_parameter(param, buffer)?;
        }
    }

    Ok(())
}

/// Encodes a method signature (`MethodDefSig`, `MethodRefSig`, `StandAloneMethodSig`).
///
/// Vararg parameters are written after a sentinel.
///
/// # Errors
/// Returns an error if any parameter type cannot be encoded.
pub fn encode_method_signature(signature: &SignatureMethod) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_method_signature(signature, &mut buffer)?;
    Ok(buffer)
}

/// Encodes a field signature.
///
/// # Errors
/// Returns an error if the field type cannot be encoded.
pub fn encode_field_signature(signature: &SignatureField) -> Result<Vec<u8>> {
    let mut buffer = vec![SIGNATURE_HEADER::FIELD];
    encode_custom_modifiers(&signature.modifiers, &mut buffer)?;
    encode_type_signature(&signature.base, &mut buffer)?;
    Ok(buffer)
}

/// Encodes a property signature.
///
/// # Errors
/// Returns an error if the property or parameter types cannot be encoded.
pub fn encode_property_signature(signature: &SignatureProperty) -> Result<Vec<u8>> {
    let mut header = SIGNATURE_HEADER::PROPERTY;
    if signature.has_this {
        header |= CALLING_CONVENTION::HASTHIS;
    }

    let mut buffer = vec![header];
    write_compressed_uint(signature.params.len() as u32, &mut buffer)?;
    encode_custom_modifiers(&signature.modifiers, &mut buffer)?;
    encode_type_signature(&signature.base, &mut buffer)?;
    for param in &signature.params {
        encode_parameter(param, &mut buffer)?;
    }
    Ok(buffer)
}

/// Encodes a local variable signature.
///
/// # Errors
/// Returns an error if a local type cannot be encoded.
pub fn encode_local_var_signature(signature: &SignatureLocalVariables) -> Result<Vec<u8>> {
    let mut buffer = vec![SIGNATURE_HEADER::LOCAL_SIG];
    write_compressed_uint(signature.locals.len() as u32, &mut buffer)?;

    for local in &signature.locals {
        if local.base == TypeSignature::TypedByRef
            && local.modifiers.is_empty()
            && !local.is_byref
            && !local.is_pinned
        {
            buffer.push(ELEMENT_TYPE::TYPEDBYREF);
            continue;
        }

        encode_custom_modifiers(&local.modifiers, &mut buffer)?;
        if local.is_pinned {
            buffer.push(ELEMENT_TYPE::PINNED);
        }
        if local.is_byref {
            buffer.push(ELEMENT_TYPE::BYREF);
        }
        encode_type_signature(&local.base, &mut buffer)?;
    }

    Ok(buffer)
}

/// Encodes a type specification signature.
///
/// # Errors
/// Returns an error if the type cannot be encoded.
pub fn encode_typespec_signature(signature: &SignatureTypeSpec) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    encode_type_signature(&signature.base, &mut buffer)?;
    Ok(buffer)
}

/// Encodes a method instantiation signature.
///
/// # Errors
/// Returns an error if a type argument cannot be encoded.
pub fn encode_method_spec_signature(signature: &SignatureMethodSpec) -> Result<Vec<u8>> {
    let mut buffer = vec![SIGNATURE_HEADER::METHOD_SPEC];
    write_compressed_uint(signature.generic_args.len() as u32, &mut buffer)?;
    for arg in &signature.generic_args {
        encode_type_signature(arg, &mut buffer)?;
    }
    Ok(buffer)
}
