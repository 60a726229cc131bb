use crate::{
    file::parser::Parser,
    metadata::signatures::{
        CustomModifier, SignatureArray, SignatureField, SignatureLocalVariable,
        SignatureLocalVariables, SignatureMethod, SignatureMethodSpec, SignatureParameter,
        SignaturePointer, SignatureProperty, SignatureSzArray, SignatureTypeSpec, TypeSignature,
        CALLING_CONVENTION, ELEMENT_TYPE, SIGNATURE_HEADER,
    },
    Error::RecursionLimit,
    Result,
};

/// Default maximum nesting depth of a type signature
pub const MAX_RECURSION_DEPTH: usize = 50;

/// Signature parser that handles all signature types in ECMA-335
///
/// # Example
///
/// ```rust
/// use cilpe::metadata::signatures::SignatureParser;
/// let data = &[0x20, 0x01, 0x01, 0x0E];
/// let mut parser = SignatureParser::new(data);
/// let sig = parser.parse_method_signature()?;
/// assert_eq!(sig.params.len(), 1);
/// assert!(parser.remaining().is_empty());
/// # Ok::<(), cilpe::Error>(())
/// ```
///
/// A parser instance reads one signature. Bytes after it stay available through
/// [`SignatureParser::remaining`] so that over-allocated blobs can be written back
/// unchanged.
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
    depth: usize,
    max_depth: usize,
}

impl<'a> SignatureParser<'a> {
    /// Create a new `SignatureParser` from a byte slice
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_max_depth(data, MAX_RECURSION_DEPTH)
    }

    /// Create a parser that fails with [`crate::Error::RecursionLimit`] once types nest
    /// deeper than `max_depth`
    #[must_use]
    pub fn with_max_depth(data: &'a [u8], max_depth: usize) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
            max_depth,
        }
    }

    /// Bytes not consumed by the signature read so far
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.parser.data()[self.parser.pos()..]
    }

    /// Parse a single type from the signature blob
    ///
    /// # Errors
    /// Returns an error for unknown element types, truncated data or excessive nesting.
    pub fn parse_type(&mut self) -> Result<TypeSignature> {
        if self.depth >= self.max_depth {
            return Err(RecursionLimit(self.max_depth));
        }
        self.depth += 1;

        let result = self.parse_type_inner();
        self.depth -= 1;
        result
    }

    fn parse_type_inner(&mut self) -> Result<TypeSignature> {
        let current_byte = self.parser.read_le::<u8>()?;
        match current_byte {
            ELEMENT_TYPE::VOID => Ok(TypeSignature::Void),
            ELEMENT_TYPE::BOOLEAN => Ok(TypeSignature::Boolean),
            ELEMENT_TYPE::CHAR => Ok(TypeSignature::Char),
            ELEMENT_TYPE::I1 => Ok(TypeSignature::I1),
            ELEMENT_TYPE::U1 => Ok(TypeSignature::U1),
            ELEMENT_TYPE::I2 => Ok(TypeSignature::I2),
            ELEMENT_TYPE::U2 => Ok(TypeSignature::U2),
            ELEMENT_TYPE::I4 => Ok(TypeSignature::I4),
            ELEMENT_TYPE::U4 => Ok(TypeSignature::U4),
            ELEMENT_TYPE::I8 => Ok(TypeSignature::I8),
            ELEMENT_TYPE::U8 => Ok(TypeSignature::U8),
            ELEMENT_TYPE::R4 => Ok(TypeSignature::R4),
            ELEMENT_TYPE::R8 => Ok(TypeSignature::R8),
            ELEMENT_TYPE::STRING => Ok(TypeSignature::String),
            ELEMENT_TYPE::PTR => Ok(TypeSignature::Ptr(SignaturePointer {
                modifiers: self.parse_custom_mods()?,
                base: Box::new(self.parse_type()?),
            })),
            ELEMENT_TYPE::BYREF => Ok(TypeSignature::ByRef(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::VALUETYPE => Ok(TypeSignature::ValueType(
                self.parser.read_compressed_token()?,
            )),
            ELEMENT_TYPE::CLASS => Ok(TypeSignature::Class(self.parser.read_compressed_token()?)),
            ELEMENT_TYPE::VAR => Ok(TypeSignature::GenericParamType(
                self.parser.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::ARRAY => {
                let base = self.parse_type()?;
                let rank = self.parser.read_compressed_uint()?;

                let num_sizes = self.parser.read_compressed_uint()?;
                if num_sizes > rank {
                    return Err(malformed_error!(
                        "ARRAY - {} sizes for rank {}",
                        num_sizes,
                        rank
                    ));
                }
                let mut sizes = Vec::with_capacity(num_sizes.min(32) as usize);
                for _ in 0..num_sizes {
                    sizes.push(self.parser.read_compressed_uint()?);
                }

                let num_lo_bounds = self.parser.read_compressed_uint()?;
                if num_lo_bounds > rank {
                    return Err(malformed_error!(
                        "ARRAY - {} lower bounds for rank {}",
                        num_lo_bounds,
                        rank
                    ));
                }
                let mut lower_bounds = Vec::with_capacity(num_lo_bounds.min(32) as usize);
                for _ in 0..num_lo_bounds {
                    lower_bounds.push(self.parser.read_compressed_int()?);
                }

                Ok(TypeSignature::Array(SignatureArray {
                    base: Box::new(base),
                    rank,
                    sizes,
                    lower_bounds,
                }))
            }
            ELEMENT_TYPE::GENERICINST => {
                let peek_byte = self.parser.peek_byte()?;
                if peek_byte != ELEMENT_TYPE::CLASS && peek_byte != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        peek_byte
                    ));
                }

                let base_type = self.parse_type()?;
                let arg_count = self.parser.read_compressed_uint()?;
                if arg_count == 0 {
                    return Err(malformed_error!("GENERICINST - no type arguments"));
                }

                let mut type_args = Vec::with_capacity(arg_count.min(64) as usize);
                for _ in 0..arg_count {
                    type_args.push(self.parse_type()?);
                }

                Ok(TypeSignature::GenericInst(Box::new(base_type), type_args))
            }
            ELEMENT_TYPE::TYPEDBYREF => Ok(TypeSignature::TypedByRef),
            ELEMENT_TYPE::I => Ok(TypeSignature::I),
            ELEMENT_TYPE::U => Ok(TypeSignature::U),
            ELEMENT_TYPE::FNPTR => Ok(TypeSignature::FnPtr(Box::new(
                self.parse_method_signature()?,
            ))),
            ELEMENT_TYPE::OBJECT => Ok(TypeSignature::Object),
            ELEMENT_TYPE::SZARRAY => Ok(TypeSignature::SzArray(SignatureSzArray {
                modifiers: self.parse_custom_mods()?,
                base: Box::new(self.parse_type()?),
            })),
            ELEMENT_TYPE::MVAR => Ok(TypeSignature::GenericParamMethod(
                self.parser.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                let mut modifiers = vec![CustomModifier {
                    is_required: current_byte == ELEMENT_TYPE::CMOD_REQD,
                    modifier_type: self.parser.read_compressed_token()?,
                }];
                modifiers.extend(self.parse_custom_mods()?);

                Ok(TypeSignature::Modified(
                    modifiers,
                    Box::new(self.parse_type()?),
                ))
            }
            ELEMENT_TYPE::PINNED => Ok(TypeSignature::Pinned(Box::new(self.parse_type()?))),
            _ => Err(malformed_error!(
                "Unsupported ELEMENT_TYPE - {:#04x}",
                current_byte
            )),
        }
    }

    /// Parse custom modifiers (`CMOD_OPT` or `CMOD_REQD`)
    fn parse_custom_mods(&mut self) -> Result<Vec<CustomModifier>> {
        let mut mods = Vec::new();

        while self.parser.has_more_data() {
            let next_byte = self.parser.peek_byte()?;
            if next_byte != ELEMENT_TYPE::CMOD_REQD && next_byte != ELEMENT_TYPE::CMOD_OPT {
                break;
            }

            self.parser.advance_by(1)?;
            mods.push(CustomModifier {
                is_required: next_byte == ELEMENT_TYPE::CMOD_REQD,
                modifier_type: self.parser.read_compressed_token()?,
            });
        }

        Ok(mods)
    }

    /// Parse a parameter including custom modifiers (`return_type` counts as parameter)
    fn parse_param(&mut self) -> Result<SignatureParameter> {
        let modifiers = self.parse_custom_mods()?;

        let mut by_ref = false;
        if self.parser.peek_byte()? == ELEMENT_TYPE::BYREF {
            self.parser.advance_by(1)?;
            by_ref = true;
        }

        Ok(SignatureParameter {
            modifiers,
            by_ref,
            base: self.parse_type()?,
        })
    }

    /// Parse a method signature - `MethodDefSig`, `MethodRefSig`, `StandAloneMethodSig`
    ///
    /// # Errors
    /// Returns an error if the signature data is malformed or if reading beyond the buffer bounds.
    pub fn parse_method_signature(&mut self) -> Result<SignatureMethod> {
        let convention_byte = self.parser.read_le::<u8>()?;
        let kind = convention_byte & CALLING_CONVENTION::KIND_MASK;
        if kind > CALLING_CONVENTION::VARARG {
            return Err(malformed_error!(
                "SignatureMethod - invalid calling convention - {:#04x}",
                convention_byte
            ));
        }

        let mut method = SignatureMethod {
            has_this: convention_byte & CALLING_CONVENTION::HASTHIS != 0,
            explicit_this: convention_byte & CALLING_CONVENTION::EXPLICITTHIS != 0,
            default: kind == CALLING_CONVENTION::DEFAULT,
            vararg: kind == CALLING_CONVENTION::VARARG,
            cdecl: kind == CALLING_CONVENTION::C,
            stdcall: kind == CALLING_CONVENTION::STDCALL,
            thiscall: kind == CALLING_CONVENTION::THISCALL,
            fastcall: kind == CALLING_CONVENTION::FASTCALL,
            param_count_generic: if convention_byte & CALLING_CONVENTION::GENERIC != 0 {
                self.parser.read_compressed_uint()?
            } else {
                0
            },
            ..SignatureMethod::default()
        };

        let param_count = self.parser.read_compressed_uint()?;
        method.return_type = self.parse_param()?;

        let mut after_sentinel = false;
        for _ in 0..param_count {
            if !after_sentinel && self.parser.peek_byte()? == ELEMENT_TYPE::SENTINEL {
                if !method.vararg && !method.cdecl {
                    return Err(malformed_error!(
                        "SignatureMethod - sentinel outside a vararg signature"
                    ));
                }
                self.parser.advance_by(1)?;
                after_sentinel = true;
            }

            let param = self.parse_param()?;
            if after_sentinel {
                method.varargs.push(param);
            } else {
                method.params.push(param);
            }
        }

        Ok(method)
    }

    /// Parse a field signature from the blob (II.23.2.4)
    ///
    /// # Errors
    /// Returns an error if the signature header is invalid or if the field type cannot be parsed.
    pub fn parse_field_signature(&mut self) -> Result<SignatureField> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::FIELD {
            return Err(malformed_error!(
                "SignatureField - invalid start - {}",
                head_byte
            ));
        }

        let modifiers = self.parse_custom_mods()?;
        let base = self.parse_type()?;

        Ok(SignatureField { modifiers, base })
    }

    /// Parse a property signature from the blob (II.23.2.5)
    ///
    /// # Errors
    /// Returns an error if the property signature header is invalid or if the property type cannot be parsed.
    pub fn parse_property_signature(&mut self) -> Result<SignatureProperty> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte & CALLING_CONVENTION::KIND_MASK != SIGNATURE_HEADER::PROPERTY {
            return Err(malformed_error!(
                "SignatureProperty - invalid start - {}",
                head_byte
            ));
        }

        let has_this = head_byte & CALLING_CONVENTION::HASTHIS != 0;

        let param_count = self.parser.read_compressed_uint()?;
        let modifiers = self.parse_custom_mods()?;
        let base = self.parse_type()?;

        let mut params = Vec::with_capacity(param_count.min(64) as usize);
        for _ in 0..param_count {
            params.push(self.parse_param()?);
        }

        Ok(SignatureProperty {
            has_this,
            modifiers,
            base,
            params,
        })
    }

    /// Parse a local variable signature from the blob (II.23.2.6)
    ///
    /// # Errors
    /// Returns an error if the local variable signature header is invalid or if variable types cannot be parsed.
    pub fn parse_local_var_signature(&mut self) -> Result<SignatureLocalVariables> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::LOCAL_SIG {
            return Err(malformed_error!(
                "SignatureLocalVar - invalid start - {}",
                head_byte
            ));
        }

        let count = self.parser.read_compressed_uint()?;

        let mut locals = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            if self.parser.peek_byte()? == ELEMENT_TYPE::TYPEDBYREF {
                self.parser.advance_by(1)?;
                locals.push(SignatureLocalVariable {
                    base: TypeSignature::TypedByRef,
                    ..SignatureLocalVariable::default()
                });
                continue;
            }

            let mut modifiers = Vec::new();
            let mut is_pinned = false;
            while self.parser.has_more_data() {
                match self.parser.peek_byte()? {
                    ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                        modifiers.extend(self.parse_custom_mods()?);
                    }
                    ELEMENT_TYPE::PINNED => {
                        self.parser.advance_by(1)?;
                        is_pinned = true;
                    }
                    _ => break,
                }
            }

            let is_byref = if self.parser.peek_byte()? == ELEMENT_TYPE::BYREF {
                self.parser.advance_by(1)?;
                true
            } else {
                false
            };

            let base = self.parse_type()?;

            locals.push(SignatureLocalVariable {
                modifiers,
                is_byref,
                is_pinned,
                base,
            });
        }

        Ok(SignatureLocalVariables { locals })
    }

    /// Parse a type specification signature from the blob (II.23.2.14)
    ///
    /// # Errors
    /// Returns an error if the type specification cannot be parsed.
    pub fn parse_type_spec_signature(&mut self) -> Result<SignatureTypeSpec> {
        let base = self.parse_type()?;
        Ok(SignatureTypeSpec { base })
    }

    /// Parse a method specification signature from the blob (II.23.2.15)
    ///
    /// # Errors
    /// Returns an error if the method specification header is invalid or if the type arguments cannot be parsed.
    pub fn parse_method_spec_signature(&mut self) -> Result<SignatureMethodSpec> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::METHOD_SPEC {
            return Err(malformed_error!(
                "SignatureMethodSpec - invalid start - {}",
                head_byte
            ));
        }

        let arg_count = self.parser.read_compressed_uint()?;
        let mut generic_args = Vec::with_capacity(arg_count.min(64) as usize);
        for _ in 0..arg_count {
            generic_args.push(self.parse_type()?);
        }

        Ok(SignatureMethodSpec { generic_args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::token::Token, Error};

    #[test]
    fn primitive_types() {
        let test_cases = [
            (vec![0x01], TypeSignature::Void),
            (vec![0x02], TypeSignature::Boolean),
            (vec![0x03], TypeSignature::Char),
            (vec![0x04], TypeSignature::I1),
            (vec![0x05], TypeSignature::U1),
            (vec![0x06], TypeSignature::I2),
            (vec![0x07], TypeSignature::U2),
            (vec![0x08], TypeSignature::I4),
            (vec![0x09], TypeSignature::U4),
            (vec![0x0A], TypeSignature::I8),
            (vec![0x0B], TypeSignature::U8),
            (vec![0x0C], TypeSignature::R4),
            (vec![0x0D], TypeSignature::R8),
            (vec![0x0E], TypeSignature::String),
            (vec![0x16], TypeSignature::TypedByRef),
            (vec![0x18], TypeSignature::I),
            (vec![0x19], TypeSignature::U),
            (vec![0x1C], TypeSignature::Object),
        ];

        for (input, expected) in test_cases {
            let mut parser = SignatureParser::new(&input);
            assert_eq!(parser.parse_type().unwrap(), expected);
        }
    }

    #[test]
    fn class_and_generic_instance() {
        // List<int>
        let mut parser = SignatureParser::new(&[0x15, 0x12, 0x49, 0x01, 0x08]);
        assert_eq!(
            parser.parse_type().unwrap(),
            TypeSignature::GenericInst(
                Box::new(TypeSignature::Class(Token::new(0x0100_0012))),
                vec![TypeSignature::I4]
            )
        );

        let mut parser = SignatureParser::new(&[0x15, 0x08, 0x01, 0x08]);
        assert!(parser.parse_type().is_err());
    }

    #[test]
    fn general_array_with_negative_bound() {
        // int32[-1...2, 0...]
        #[rustfmt::skip]
        let data = [
            0x14, 0x08,
            0x02,
            0x01, 0x04,
            0x02, 0x7F, 0x00,
        ];
        let mut parser = SignatureParser::new(&data);
        let TypeSignature::Array(array) = parser.parse_type().unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(array.rank, 2);
        assert_eq!(array.sizes, vec![4]);
        assert_eq!(array.lower_bounds, vec![-1, 0]);
        assert_eq!(array.dimensions(), vec![(Some(4), Some(-1)), (None, Some(0))]);
    }

    #[test]
    fn method_signatures() {
        // instance void (int32, string)
        let mut parser = SignatureParser::new(&[0x20, 0x02, 0x01, 0x08, 0x0E]);
        let method = parser.parse_method_signature().unwrap();
        assert!(method.has_this);
        assert!(method.default);
        assert!(!method.vararg);
        assert_eq!(method.return_type.base, TypeSignature::Void);
        assert_eq!(method.params.len(), 2);

        // static !!0 Foo<T>(!!0)
        let mut parser = SignatureParser::new(&[0x10, 0x01, 0x01, 0x1E, 0x00, 0x1E, 0x00]);
        let method = parser.parse_method_signature().unwrap();
        assert_eq!(method.param_count_generic, 1);
        assert_eq!(method.return_type.base, TypeSignature::GenericParamMethod(0));

        // vararg void (int32, ..., string)
        let mut parser = SignatureParser::new(&[0x05, 0x02, 0x01, 0x08, 0x41, 0x0E]);
        let method = parser.parse_method_signature().unwrap();
        assert!(method.vararg);
        assert_eq!(method.params.len(), 1);
        assert_eq!(method.varargs.len(), 1);

        // sentinel outside vararg
        let mut parser = SignatureParser::new(&[0x00, 0x02, 0x01, 0x08, 0x41, 0x0E]);
        assert!(parser.parse_method_signature().is_err());

        // unknown calling convention
        let mut parser = SignatureParser::new(&[0x0B, 0x00, 0x01]);
        assert!(parser.parse_method_signature().is_err());
    }

    #[test]
    fn byref_and_modifiers() {
        // void (modreq(TypeRef 1) int32&)
        let mut parser = SignatureParser::new(&[0x00, 0x01, 0x01, 0x1F, 0x05, 0x10, 0x08]);
        let method = parser.parse_method_signature().unwrap();
        let param = &method.params[0];
        assert!(param.by_ref);
        assert_eq!(
            param.modifiers,
            vec![CustomModifier::required(Token::new(0x0100_0001))]
        );
        assert_eq!(param.base, TypeSignature::I4);
    }

    #[test]
    fn field_property_locals() {
        let mut parser = SignatureParser::new(&[0x06, 0x20, 0x05, 0x08]);
        let field = parser.parse_field_signature().unwrap();
        assert_eq!(field.modifiers.len(), 1);
        assert_eq!(field.base, TypeSignature::I4);

        let mut parser = SignatureParser::new(&[0x28, 0x01, 0x0E, 0x08]);
        let property = parser.parse_property_signature().unwrap();
        assert!(property.has_this);
        assert_eq!(property.base, TypeSignature::String);
        assert_eq!(property.params.len(), 1);

        let mut parser = SignatureParser::new(&[0x07, 0x03, 0x08, 0x45, 0x10, 0x0E, 0x16]);
        let locals = parser.parse_local_var_signature().unwrap();
        assert_eq!(locals.locals.len(), 3);
        assert!(locals.locals[1].is_pinned);
        assert!(locals.locals[1].is_byref);
        assert_eq!(locals.locals[2].base, TypeSignature::TypedByRef);

        let mut parser = SignatureParser::new(&[0x0A, 0x02, 0x08, 0x0E]);
        let spec = parser.parse_method_spec_signature().unwrap();
        assert_eq!(spec.generic_args, vec![TypeSignature::I4, TypeSignature::String]);

        assert!(SignatureParser::new(&[0x07, 0x01, 0x08])
            .parse_field_signature()
            .is_err());
    }

    #[test]
    fn function_pointer() {
        let mut parser = SignatureParser::new(&[0x1B, 0x00, 0x01, 0x01, 0x08]);
        let TypeSignature::FnPtr(method) = parser.parse_type().unwrap() else {
            panic!("expected a function pointer");
        };
        assert_eq!(method.params.len(), 1);
    }

    #[test]
    fn recursion_limit() {
        let mut data = vec![0x0F; 100];
        data.push(0x08);
        let mut parser = SignatureParser::new(&data);
        assert!(matches!(parser.parse_type(), Err(Error::RecursionLimit(50))));

        let mut parser = SignatureParser::with_max_depth(&data, 200);
        assert!(parser.parse_type().is_ok());
    }

    #[test]
    fn many_flat_parameters() {
        let mut data = vec![0x00, 0x3C, 0x01];
        data.extend(std::iter::repeat(0x08).take(60));
        let mut parser = SignatureParser::new(&data);
        assert_eq!(parser.parse_method_signature().unwrap().params.len(), 60);
    }

    #[test]
    fn trailing_bytes() {
        let data = [0x06, 0x08, 0xDE, 0xAD];
        let mut parser = SignatureParser::new(&data);
        parser.parse_field_signature().unwrap();
        assert_eq!(parser.remaining(), &[0xDE, 0xAD]);
    }

    #[test]
    fn truncated() {
        assert!(SignatureParser::new(&[0x20, 0x02, 0x01, 0x08])
            .parse_method_signature()
            .is_err());
        assert!(SignatureParser::new(&[0x1D]).parse_type().is_err());
    }

    #[test]
    fn unknown_element_type() {
        assert!(SignatureParser::new(&[0x17]).parse_type().is_err());
        assert!(SignatureParser::new(&[0x41]).parse_type().is_err());
    }
}
