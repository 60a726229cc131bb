//! Custom attribute value model (ECMA-335 II.23.3).

use crate::metadata::token::Token;

/// A decoded custom attribute blob
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomAttributeValue {
    /// Fixed arguments, in constructor parameter order
    pub fixed_args: Vec<CustomAttributeArgument>,
    /// Named arguments (fields and properties)
    pub named_args: Vec<CustomAttributeNamedArgument>,
}

/// The serialized type of an argument, `FieldOrPropType` in ECMA-335 terms
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CustomAttributeType {
    /// bool
    Boolean,
    /// char
    Char,
    /// sbyte
    I1,
    /// byte
    U1,
    /// short
    I2,
    /// ushort
    U2,
    /// int
    I4,
    /// uint
    U4,
    /// long
    I8,
    /// ulong
    U8,
    /// float
    R4,
    /// double
    R8,
    /// System.String
    String,
    /// System.Type, serialized as the type name
    Type,
    /// System.Object, every value is preceded by its own type
    Object,
    /// An enum, by its serialized type name and underlying type
    Enum(String, Box<CustomAttributeType>),
    /// A single dimension array
    SzArray(Box<CustomAttributeType>),
}

/// Single custom attribute argument value
#[derive(Debug, Clone, PartialEq)]
pub enum CustomAttributeArgument {
    /// Boolean value
    Bool(bool),
    /// Character value (UTF-16 code unit)
    Char(char),
    /// Signed 8-bit integer
    I1(i8),
    /// Unsigned 8-bit integer
    U1(u8),
    /// Signed 16-bit integer
    I2(i16),
    /// Unsigned 16-bit integer
    U2(u16),
    /// Signed 32-bit integer
    I4(i32),
    /// Unsigned 32-bit integer
    U4(u32),
    /// Signed 64-bit integer
    I8(i64),
    /// Unsigned 64-bit integer
    U8(u64),
    /// 32-bit floating point
    R4(f32),
    /// 64-bit floating point
    R8(f64),
    /// String, `None` for a null reference
    String(Option<String>),
    /// Type name, `None` for a null reference
    Type(Option<String>),
    /// Enum value: serialized type name plus the value of the underlying type
    Enum(String, Box<CustomAttributeArgument>),
    /// Array of `element` typed values, `None` for a null array
    Array(CustomAttributeType, Option<Vec<CustomAttributeArgument>>),
}

/// Named argument (field or property) of a custom attribute
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeNamedArgument {
    /// Whether this is a field (true) or property (false)
    pub is_field: bool,
    /// Name of the field or property
    pub name: String,
    /// Declared type of the argument
    pub arg_type: CustomAttributeType,
    /// Value of the argument
    pub value: CustomAttributeArgument,
}

/// Answers the type questions a custom attribute blob cannot answer by itself.
///
/// Constructor signatures reference classes and value types by token, the blob only
/// carries values. Enum typed named arguments carry the enum name but not its width.
pub trait TypeResolver {
    /// Serialized type of the class (`value_type == false`) or value type behind `token`.
    ///
    /// `System.Type` resolves to [`CustomAttributeType::Type`], `System.Object` to
    /// [`CustomAttributeType::Object`] and enums to [`CustomAttributeType::Enum`].
    fn resolve_type(&self, token: Token, value_type: bool) -> Option<CustomAttributeType>;

    /// Underlying type of the enum with the given serialized name
    fn enum_underlying_type(&self, name: &str) -> Option<CustomAttributeType>;
}

/// A [`TypeResolver`] that knows nothing; only primitive, string and object arguments decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTypeResolver;

impl TypeResolver for NoTypeResolver {
    fn resolve_type(&self, _token: Token, _value_type: bool) -> Option<CustomAttributeType> {
        None
    }

    fn enum_underlying_type(&self, _name: &str) -> Option<CustomAttributeType> {
        None
    }
}

/// A table driven [`TypeResolver`]
#[derive(Debug, Default, Clone)]
pub struct TypeTable {
    types: std::collections::HashMap<Token, CustomAttributeType>,
    enums: std::collections::HashMap<String, CustomAttributeType>,
}

impl TypeTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `token` to `ty`. Enums are registered by name as well.
    #[must_use]
    pub fn with_type(mut self, token: Token, ty: CustomAttributeType) -> Self {
        if let CustomAttributeType::Enum(name, underlying) = &ty {
            self.enums.insert(name.clone(), (**underlying).clone());
        }
        self.types.insert(token, ty);
        self
    }

    /// Register an enum by its serialized name only
    #[must_use]
    pub fn with_enum(mut self, name: &str, underlying: CustomAttributeType) -> Self {
        self.enums.insert(name.to_string(), underlying);
        self
    }
}

impl TypeResolver for TypeTable {
    fn resolve_type(&self, token: Token, _value_type: bool) -> Option<CustomAttributeType> {
        self.types.get(&token).cloned()
    }

    fn enum_underlying_type(&self, name: &str) -> Option<CustomAttributeType> {
        self.enums.get(name).cloned()
    }
}

impl CustomAttributeType {
    /// Whether this is an integer type an enum can be based on
    #[must_use]
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            CustomAttributeType::Boolean
                | CustomAttributeType::Char
                | CustomAttributeType::I1
                | CustomAttributeType::U1
                | CustomAttributeType::I2
                | CustomAttributeType::U2
                | CustomAttributeType::I4
                | CustomAttributeType::U4
                | CustomAttributeType::I8
                | CustomAttributeType::U8
        )
    }
}

impl CustomAttributeArgument {
    /// The serialized type this value carries when boxed into an `object` slot.
    ///
    /// # Errors
    /// Returns [`crate::Error::CustomAttribute`] for an enum whose value is not an integer.
    pub fn boxed_type(&self) -> crate::Result<CustomAttributeType> {
        Ok(match self {
            CustomAttributeArgument::Bool(_) => CustomAttributeType::Boolean,
            CustomAttributeArgument::Char(_) => CustomAttributeType::Char,
            CustomAttributeArgument::I1(_) => CustomAttributeType::I1,
            CustomAttributeArgument::U1(_) => CustomAttributeType::U1,
            CustomAttributeArgument::I2(_) => CustomAttributeType::I2,
            CustomAttributeArgument::U2(_) => CustomAttributeType::U2,
            CustomAttributeArgument::I4(_) => CustomAttributeType::I4,
            CustomAttributeArgument::U4(_) => CustomAttributeType::U4,
            CustomAttributeArgument::I8(_) => CustomAttributeType::I8,
            CustomAttributeArgument::U8(_) => CustomAttributeType::U8,
            CustomAttributeArgument::R4(_) => CustomAttributeType::R4,
            CustomAttributeArgument::R8(_) => CustomAttributeType::R8,
            CustomAttributeArgument::String(_) => CustomAttributeType::String,
            CustomAttributeArgument::Type(_) => CustomAttributeType::Type,
            CustomAttributeArgument::Enum(name, value) => {
                let underlying = value.boxed_type()?;
                if !underlying.is_integral() {
                    return Err(crate::Error::CustomAttribute(format!(
                        "Enum '{name}' has a non-integral value {value:?}"
                    )));
                }
                CustomAttributeType::Enum(name.clone(), Box::new(underlying))
            }
            CustomAttributeArgument::Array(element, _) => {
                CustomAttributeType::SzArray(Box::new(element.clone()))
            }
        })
    }
}
