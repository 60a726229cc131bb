use crate::metadata::token::Token;

/// A required (`modreq`) or optional (`modopt`) custom modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CustomModifier {
    /// `modreq` if true, `modopt` otherwise
    pub is_required: bool,
    /// The modifier type - `TypeDefOrRefOrSpecEncoded`
    pub modifier_type: Token,
}

impl CustomModifier {
    /// A `modreq` of `modifier_type`
    #[must_use]
    pub fn required(modifier_type: Token) -> Self {
        CustomModifier {
            is_required: true,
            modifier_type,
        }
    }

    /// A `modopt` of `modifier_type`
    #[must_use]
    pub fn optional(modifier_type: Token) -> Self {
        CustomModifier {
            is_required: false,
            modifier_type,
        }
    }
}

/// Represents a parsed type in various signatures
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TypeSignature {
    /// void
    #[default]
    Void,
    /// bool
    Boolean,
    /// char
    Char,
    /// signed 8bit integer
    I1,
    /// unsigned 8bit integer
    U1,
    /// signed 16bit integer
    I2,
    /// unsigned 16bit integer
    U2,
    /// signed 32bit integer
    I4,
    /// unsigned 32bit integer
    U4,
    /// signed 64bit integer
    I8,
    /// unsigned 64bit integer
    U8,
    /// 32bit floating-point
    R4,
    /// 64bit floating-point
    R8,
    /// System.String
    String,
    /// A pointer to a type
    Ptr(SignaturePointer),
    /// Type by reference
    ByRef(Box<TypeSignature>),
    /// CIL value-type - `TypeDefOrRefOrSpecEncoded`
    ValueType(Token),
    /// CIL class - `TypeDefOrRefOrSpecEncoded`
    Class(Token),
    /// Generic type parameter, by position
    GenericParamType(u32),
    /// General array with explicit rank
    Array(SignatureArray),
    /// Generic type and its arguments
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// Type is referenced during runtime
    TypedByRef,
    /// signed integer, sized to executing platform
    I,
    /// unsigned integer, sized to executing platform
    U,
    /// Function pointer
    FnPtr(Box<SignatureMethod>),
    /// System.Object
    Object,
    /// Single dimension array with lower bound 0
    SzArray(SignatureSzArray),
    /// Generic method parameter, by position
    GenericParamMethod(u32),
    /// Custom modifiers in front of a nested type
    Modified(Vec<CustomModifier>, Box<TypeSignature>),
    /// A pinned type
    Pinned(Box<TypeSignature>),
}

/// General array: rank, known sizes and known lower bounds.
///
/// Sizes and lower bounds are listed separately because either list may be shorter
/// than the rank (and than each other).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureArray {
    /// The type in the array
    pub base: Box<TypeSignature>,
    /// The number of dimensions
    pub rank: u32,
    /// Sizes of the leading dimensions
    pub sizes: Vec<u32>,
    /// Lower bounds of the leading dimensions
    pub lower_bounds: Vec<i32>,
}

impl SignatureArray {
    /// Per-dimension `(size, lower_bound)` pairs for all `rank` dimensions
    #[must_use]
    pub fn dimensions(&self) -> Vec<(Option<u32>, Option<i32>)> {
        (0..self.rank as usize)
            .map(|dimension| {
                (
                    self.sizes.get(dimension).copied(),
                    self.lower_bounds.get(dimension).copied(),
                )
            })
            .collect()
    }
}

/// A single dimension array (vector)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureSzArray {
    /// Custom modifiers of the element type
    pub modifiers: Vec<CustomModifier>,
    /// The type in the array
    pub base: Box<TypeSignature>,
}

/// A pointer to a type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignaturePointer {
    /// Custom modifiers of the pointee
    pub modifiers: Vec<CustomModifier>,
    /// The type pointed to
    pub base: Box<TypeSignature>,
}

/// Parameter with optional custom modifiers
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureParameter {
    /// Custom modifiers of the parameter
    pub modifiers: Vec<CustomModifier>,
    /// Parameter is passed by reference
    pub by_ref: bool,
    /// The type of the parameter
    pub base: TypeSignature,
}

impl SignatureParameter {
    /// A plain parameter of type `base`
    #[must_use]
    pub fn new(base: TypeSignature) -> Self {
        SignatureParameter {
            modifiers: Vec::new(),
            by_ref: false,
            base,
        }
    }
}

/// Represents a method signature (II.23.2.1 - II.23.2.3)
///
/// `params` holds the fixed parameters. For a vararg call site the parameters after
/// the sentinel are kept in `varargs`; the parameter count on disk is the sum of both.
#[derive(Debug, Clone, PartialEq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SignatureMethod {
    /// Instance method, `this` is passed implicitly
    pub has_this: bool,
    /// `this` is listed explicitly as the first parameter
    pub explicit_this: bool,
    /// Managed default calling convention
    pub default: bool,
    /// Managed vararg calling convention
    pub vararg: bool,
    /// Native `cdecl`
    pub cdecl: bool,
    /// Native `stdcall`
    pub stdcall: bool,
    /// Native `thiscall`
    pub thiscall: bool,
    /// Native `fastcall`
    pub fastcall: bool,
    /// Number of generic parameters, 0 if the method is not generic
    pub param_count_generic: u32,
    /// The return type of this method
    pub return_type: SignatureParameter,
    /// Fixed parameters
    pub params: Vec<SignatureParameter>,
    /// Parameters following the sentinel
    pub varargs: Vec<SignatureParameter>,
}

/// Field signature (II.23.2.4)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureField {
    /// Custom modifiers of the field type
    pub modifiers: Vec<CustomModifier>,
    /// The field type
    pub base: TypeSignature,
}

/// Property signature (II.23.2.5)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureProperty {
    /// Indicates the passing of a 'this' pointer
    pub has_this: bool,
    /// Custom modifiers of the property type
    pub modifiers: Vec<CustomModifier>,
    /// The property type
    pub base: TypeSignature,
    /// Indexer parameters
    pub params: Vec<SignatureParameter>,
}

/// Local variable signature (II.23.2.6)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureLocalVariables {
    /// The local variables
    pub locals: Vec<SignatureLocalVariable>,
}

/// A local variable in a method body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureLocalVariable {
    /// Custom modifiers
    pub modifiers: Vec<CustomModifier>,
    /// Is passed by reference
    pub is_byref: bool,
    /// This variable is pinned
    pub is_pinned: bool,
    /// The variable type
    pub base: TypeSignature,
}

/// Type specification signature (II.23.2.14)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureTypeSpec {
    /// Signature of this type
    pub base: TypeSignature,
}

/// Method instantiation signature (II.23.2.15)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureMethodSpec {
    /// Types of the generic arguments
    pub generic_args: Vec<TypeSignature>,
}

impl TypeSignature {
    /// Size in bytes of a value of this type when stored inline, if it is fixed.
    ///
    /// Used to size static field data. Pointer-sized types depend on the target and
    /// return `None`, as do value types whose size comes from `ClassLayout`.
    #[must_use]
    pub fn fixed_size(&self) -> Option<u32> {
        match self {
            TypeSignature::Boolean | TypeSignature::I1 | TypeSignature::U1 => Some(1),
            TypeSignature::Char | TypeSignature::I2 | TypeSignature::U2 => Some(2),
            TypeSignature::I4 | TypeSignature::U4 | TypeSignature::R4 => Some(4),
            TypeSignature::I8 | TypeSignature::U8 | TypeSignature::R8 => Some(8),
            TypeSignature::Modified(_, inner) => inner.fixed_size(),
            _ => None,
        }
    }
}
