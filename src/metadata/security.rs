//! Declarative security blobs (ECMA-335 II.22.11, II.23.1.3).
//!
//! A `DeclSecurity` row pairs a [`SecurityAction`] with a permission set blob. Two wire
//! formats exist and are told apart by the first byte:
//!
//! - `.` starts the binary format: a compressed attribute count, then per attribute the
//!   serialized type name, a compressed byte count and the named arguments.
//! - Anything else is a legacy XML permission set stored as UTF-16LE text.
//!
//! # Examples
//!
//! ```rust
//! use cilpe::metadata::security::{PermissionSet, SecurityAttribute};
//!
//! let set = PermissionSet::Attributes(vec![SecurityAttribute::new(
//!     "System.Security.Permissions.SecurityPermissionAttribute, mscorlib",
//!     0,
//!     Vec::new(),
//! )]);
//! let blob = set.encode()?;
//! assert_eq!(blob[0], b'.');
//! assert_eq!(PermissionSet::parse(&blob)?, set);
//! # Ok::<(), cilpe::Error>(())
//! ```

use std::borrow::Cow;

use quick_xml::events::Event;
use widestring::U16Str;

use crate::{
    file::{
        parser::Parser,
        writer::{write_compressed_uint, write_ser_string},
    },
    metadata::customattributes::{
        encode_named_arguments, parse_named_arguments, CustomAttributeNamedArgument, TypeResolver,
    },
    Error, Result,
};

/// First byte of the binary permission set format
pub const BINARY_FORMAT_MARKER: u8 = b'.';

/// Action column of a `DeclSecurity` row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityAction {
    /// Refuse demands for the permission
    Deny,
    /// All callers must hold the permission
    Demand,
    /// Satisfy demands for the permission
    Assert,
    /// Non-CAS demand
    NonCasDemand,
    /// The immediate caller must hold the permission
    LinkDemand,
    /// Derived types and overrides must hold the permission
    InheritanceDemand,
    /// Minimum permissions required to run
    RequestMinimum,
    /// Optional permissions
    RequestOptional,
    /// Permissions that must not be granted
    RequestRefuse,
    /// Reserved, prejit grant set
    PrejitGrant,
    /// Reserved, prejit denied set
    PrejitDeny,
    /// Non-CAS link demand
    NonCasLinkDemand,
    /// Non-CAS inheritance demand
    NonCasInheritance,
    /// Link demand choice
    LinkDemandChoice,
    /// Inheritance demand choice
    InheritanceDemandChoice,
    /// Demand choice
    DemandChoice,
    /// Refuse demands for everything but the permission
    PermitOnly,
    /// Any other value
    Unknown(u16),
}

impl From<u16> for SecurityAction {
    fn from(value: u16) -> Self {
        match value {
            0x0001 => SecurityAction::Deny,
            0x0002 => SecurityAction::Demand,
            0x0003 => SecurityAction::Assert,
            0x0004 => SecurityAction::NonCasDemand,
            0x0005 => SecurityAction::LinkDemand,
            0x0006 => SecurityAction::InheritanceDemand,
            0x0007 => SecurityAction::RequestMinimum,
            0x0008 => SecurityAction::RequestOptional,
            0x0009 => SecurityAction::RequestRefuse,
            0x000A => SecurityAction::PrejitGrant,
            0x000B => SecurityAction::PrejitDeny,
            0x000C => SecurityAction::NonCasLinkDemand,
            0x000D => SecurityAction::NonCasInheritance,
            0x000E => SecurityAction::LinkDemandChoice,
            0x000F => SecurityAction::InheritanceDemandChoice,
            0x0010 => SecurityAction::DemandChoice,
            0x0011 => SecurityAction::PermitOnly,
            _ => SecurityAction::Unknown(value),
        }
    }
}

impl From<SecurityAction> for u16 {
    fn from(action: SecurityAction) -> Self {
        match action {
            SecurityAction::Deny => 0x0001,
            SecurityAction::Demand => 0x0002,
            SecurityAction::Assert => 0x0003,
            SecurityAction::NonCasDemand => 0x0004,
            SecurityAction::LinkDemand => 0x0005,
            SecurityAction::InheritanceDemand => 0x0006,
            SecurityAction::RequestMinimum => 0x0007,
            SecurityAction::RequestOptional => 0x0008,
            SecurityAction::RequestRefuse => 0x0009,
            SecurityAction::PrejitGrant => 0x000A,
            SecurityAction::PrejitDeny => 0x000B,
            SecurityAction::NonCasLinkDemand => 0x000C,
            SecurityAction::NonCasInheritance => 0x000D,
            SecurityAction::LinkDemandChoice => 0x000E,
            SecurityAction::InheritanceDemandChoice => 0x000F,
            SecurityAction::DemandChoice => 0x0010,
            SecurityAction::PermitOnly => 0x0011,
            SecurityAction::Unknown(value) => value,
        }
    }
}

/// One security attribute of a binary permission set.
///
/// The named arguments are kept as the raw bytes that follow the argument count, since
/// decoding enum typed arguments needs type knowledge the blob does not carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityAttribute {
    /// Assembly qualified name of the attribute type
    pub type_name: String,
    /// Number of named arguments in `arguments`
    pub argument_count: u32,
    /// Encoded named arguments
    pub arguments: Vec<u8>,
}

impl SecurityAttribute {
    /// Create an attribute from already encoded arguments
    #[must_use]
    pub fn new(type_name: &str, argument_count: u32, arguments: Vec<u8>) -> Self {
        SecurityAttribute {
            type_name: type_name.to_string(),
            argument_count,
            arguments,
        }
    }

    /// Create an attribute by encoding `named` arguments.
    ///
    /// # Errors
    /// Returns an error if an argument value does not match its type.
    pub fn with_named_arguments(
        type_name: &str,
        named: &[CustomAttributeNamedArgument],
    ) -> Result<Self> {
        let Ok(argument_count) = u32::try_from(named.len()) else {
            return Err(Error::CustomAttribute("Too many named arguments".into()));
        };
        let mut arguments = Vec::new();
        encode_named_arguments(named, &mut arguments)?;
        Ok(SecurityAttribute::new(type_name, argument_count, arguments))
    }

    /// Decode the named arguments.
    ///
    /// # Errors
    /// Returns an error if the argument bytes are malformed.
    pub fn named_arguments(
        &self,
        resolver: &dyn TypeResolver,
    ) -> Result<Vec<CustomAttributeNamedArgument>> {
        parse_named_arguments(&self.arguments, self.argument_count, resolver)
    }
}

/// A decoded permission set blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionSet {
    /// Legacy XML permission set
    Xml(String),
    /// Binary list of security attributes
    Attributes(Vec<SecurityAttribute>),
}

impl PermissionSet {
    /// Decode a permission set blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob is empty, a binary record is
    /// truncated, or XML text is not valid UTF-16.
    pub fn parse(data: &[u8]) -> Result<PermissionSet> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        if data[0] != BINARY_FORMAT_MARKER {
            return Self::parse_xml(data);
        }

        let mut parser = Parser::new(data);
        parser.advance_by(1)?;

        let count = parser.read_compressed_uint()?;
        let mut attributes = Vec::with_capacity((count as usize).min(64));
        for _ in 0..count {
            let Some(type_name) = parser.read_ser_string()? else {
                return Err(malformed_error!("Security attribute without a type name"));
            };

            let length = parser.read_compressed_uint()? as usize;
            let body = parser.read_bytes(length)?;

            let mut body_parser = Parser::new(body);
            let argument_count = body_parser.read_compressed_uint()?;
            let arguments = body[body_parser.pos()..].to_vec();

            attributes.push(SecurityAttribute {
                type_name: type_name.to_string(),
                argument_count,
                arguments,
            });
        }

        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} bytes follow the last security attribute",
                parser.remaining()
            ));
        }

        Ok(PermissionSet::Attributes(attributes))
    }

    fn parse_xml(data: &[u8]) -> Result<PermissionSet> {
        if data.len() % 2 != 0 {
            return Err(malformed_error!(
                "XML permission set has odd length {}",
                data.len()
            ));
        }

        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let text = U16Str::from_slice(&units)
            .to_string()
            .map_err(|e| malformed_error!("XML permission set is not UTF-16 - {}", e))?;

        Ok(PermissionSet::Xml(text))
    }

    /// Encode the permission set blob.
    ///
    /// # Errors
    /// Returns an error if a count or length does not fit its compressed encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        match self {
            PermissionSet::Xml(text) => {
                for unit in text.encode_utf16() {
                    buffer.extend_from_slice(&unit.to_le_bytes());
                }
            }
            PermissionSet::Attributes(attributes) => {
                buffer.push(BINARY_FORMAT_MARKER);
                let Ok(count) = u32::try_from(attributes.len()) else {
                    return Err(malformed_error!("Too many security attributes"));
                };
                write_compressed_uint(count, &mut buffer)?;

                for attribute in attributes {
                    write_ser_string(Some(&attribute.type_name), &mut buffer)?;

                    let mut body = Vec::with_capacity(attribute.arguments.len() + 1);
                    write_compressed_uint(attribute.argument_count, &mut body)?;
                    body.extend_from_slice(&attribute.arguments);

                    let Ok(length) = u32::try_from(body.len()) else {
                        return Err(malformed_error!("Security attribute is too large"));
                    };
                    write_compressed_uint(length, &mut buffer)?;
                    buffer.extend_from_slice(&body);
                }
            }
        }
        Ok(buffer)
    }

    /// Class names of the permissions in the set.
    ///
    /// For XML sets these are the `class` attributes of the `IPermission` elements, for
    /// binary sets the attribute type names.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the XML cannot be parsed.
    pub fn permission_classes(&self) -> Result<Vec<String>> {
        match self {
            PermissionSet::Attributes(attributes) => Ok(attributes
                .iter()
                .map(|attribute| attribute.type_name.clone())
                .collect()),
            PermissionSet::Xml(text) => {
                let mut reader = quick_xml::Reader::from_str(text);
                let mut classes = Vec::new();
                loop {
                    match reader.read_event() {
                        Ok(Event::Start(element) | Event::Empty(element))
                            if element.name().as_ref() == b"IPermission" =>
                        {
                            for attribute in element.attributes() {
                                let attribute = attribute.map_err(|e| {
                                    malformed_error!("Invalid XML attribute - {}", e)
                                })?;
                                if attribute.key.as_ref() == b"class" {
                                    let value: Cow<'_, str> =
                                        attribute.unescape_value().map_err(|e| {
                                            malformed_error!("Invalid XML attribute value - {}", e)
                                        })?;
                                    classes.push(value.into_owned());
                                }
                            }
                        }
                        Ok(Event::Eof) => break,
                        Ok(_) => {}
                        Err(e) => {
                            return Err(malformed_error!(
                                "Invalid XML permission set at {} - {}",
                                reader.buffer_position(),
                                e
                            ))
                        }
                    }
                }
                Ok(classes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::customattributes::{
        CustomAttributeArgument, CustomAttributeType, NoTypeResolver,
    };

    #[test]
    fn actions() {
        assert_eq!(SecurityAction::from(2), SecurityAction::Demand);
        assert_eq!(SecurityAction::from(0x42), SecurityAction::Unknown(0x42));
        assert_eq!(u16::from(SecurityAction::PermitOnly), 0x11);
    }

    #[test]
    fn binary_format() {
        #[rustfmt::skip]
        let blob = [
            b'.',
            0x01,
            0x04, b'P', b'e', b'r', b'm',
            0x11,
            0x01,
            0x54, 0x02, 0x0C, b'U', b'n', b'r', b'e', b's', b't', b'r', b'i', b'c', b't', b'e', b'd',
            0x01,
        ];

        let set = PermissionSet::parse(&blob).unwrap();
        let PermissionSet::Attributes(attributes) = &set else {
            panic!("expected binary format");
        };
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].type_name, "Perm");
        assert_eq!(attributes[0].argument_count, 1);

        let named = attributes[0].named_arguments(&NoTypeResolver).unwrap();
        assert_eq!(named[0].name, "Unrestricted");
        assert_eq!(named[0].arg_type, CustomAttributeType::Boolean);
        assert_eq!(named[0].value, CustomAttributeArgument::Bool(true));

        assert_eq!(set.encode().unwrap(), blob);
        assert_eq!(set.permission_classes().unwrap(), vec!["Perm".to_string()]);

        let rebuilt = SecurityAttribute::with_named_arguments("Perm", &named).unwrap();
        assert_eq!(rebuilt, attributes[0]);
    }

    #[test]
    fn xml_format() {
        let xml = r#"<PermissionSet class="System.Security.PermissionSet" version="1"><IPermission class="System.Security.Permissions.FileIOPermission, mscorlib" version="1" Read="C:\"/><IPermission class="System.Security.Permissions.UIPermission, mscorlib" version="1"/></PermissionSet>"#;
        let set = PermissionSet::Xml(xml.to_string());
        let blob = set.encode().unwrap();
        assert_eq!(&blob[..4], &[b'<', 0x00, b'P', 0x00]);
        assert_eq!(PermissionSet::parse(&blob).unwrap(), set);
        assert_eq!(
            set.permission_classes().unwrap(),
            vec![
                "System.Security.Permissions.FileIOPermission, mscorlib".to_string(),
                "System.Security.Permissions.UIPermission, mscorlib".to_string(),
            ]
        );
    }

    #[test]
    fn malformed() {
        assert!(PermissionSet::parse(&[]).is_err());
        assert!(PermissionSet::parse(&[b'.', 0x01, 0x04, b'P']).is_err());
        assert!(PermissionSet::parse(&[b'.', 0x00, 0x00]).is_err());
        assert!(PermissionSet::parse(&[b'<', 0x00, b'P']).is_err());
    }
}
