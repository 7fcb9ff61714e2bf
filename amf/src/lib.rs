//! This crate provides functionality for serializing and deserializing data
//! based on the Adobe AMF0 and AMF3 encoding specifications located at
//! <https://wwwimages2.adobe.com/content/dam/acom/en/devnet/pdf/amf0-file-format-specification.pdf>
//! and
//! <https://wwwimages2.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf>
//!
//! Object properties keep the order they were declared in, both when decoding
//! and when encoding, since RTMP peers are sensitive to property ordering in
//! command objects.
//!
//! # Examples
//! ```
//! use std::io::Cursor;
//! use cinder_amf::{Amf0Value, serialize, deserialize};
//!
//! let object = Amf0Value::Object(vec![
//!     ("app".to_string(), Amf0Value::Utf8String("live".to_string())),
//!     ("capabilities".to_string(), Amf0Value::Number(31.0)),
//! ]);
//!
//! let input = vec![Amf0Value::Number(32.0), object, Amf0Value::Boolean(true)];
//!
//! // Serialize the values into a vector of bytes
//! let serialized_data = serialize(&input).unwrap();
//!
//! // Deserialize the vector of bytes back into Amf0Value types
//! let mut serialized_cursor = Cursor::new(serialized_data);
//! let results = deserialize(&mut serialized_cursor).unwrap();
//!
//! assert_eq!(input, results);
//! ```

mod amf3;
mod deserialization;
mod errors;
mod serialization;

pub use amf3::{decode_amf3, encode_amf3, Amf3Properties, Amf3Value};
pub use deserialization::deserialize;
pub use errors::{
    Amf0DeserializationError, Amf0SerializationError, Amf3DeserializationError,
    Amf3SerializationError,
};
pub use serialization::serialize;

/// An ordered list of named properties, as they appear inside an AMF0 object body.
pub type Amf0Properties = Vec<(String, Amf0Value)>;

/// An Enum representing the different supported types of Amf0 values
#[derive(PartialEq, Debug, Clone)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    Utf8String(String),
    Object(Amf0Properties),
    Null,
    Undefined,
    /// An index into the peer's reference table.  The referenced value is not
    /// resolved, only carried through.
    Reference(u16),
    /// An associative array.  Kept distinct from `Object` so values round-trip
    /// through their original marker, but anything that accepts an object body
    /// should accept this as well (several encoders use the two interchangeably).
    EcmaArray(Amf0Properties),
    StrictArray(Vec<Amf0Value>),
    Date {
        time_zone: i16,
        unix_time_ms: f64,
    },
    LongUtf8String(String),
    XmlDocument(String),
    TypedObject {
        class_name: String,
        properties: Amf0Properties,
    },
    /// The 0x11 marker: the remainder of this value is AMF3 encoded.
    AvmPlus(Amf3Value),
}

impl Amf0Value {
    pub fn get_number(self) -> Option<f64> {
        match self {
            Amf0Value::Number(value) => Some(value),
            _ => None,
        }
    }

    pub fn get_boolean(self) -> Option<bool> {
        match self {
            Amf0Value::Boolean(value) => Some(value),
            _ => None,
        }
    }

    pub fn get_string(self) -> Option<String> {
        match self {
            Amf0Value::Utf8String(value) => Some(value),
            Amf0Value::LongUtf8String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the property list of an object-shaped value.  Accepts plain
    /// objects, associative arrays, and typed objects.
    pub fn get_object_properties(self) -> Option<Amf0Properties> {
        match self {
            Amf0Value::Object(properties) => Some(properties),
            Amf0Value::EcmaArray(properties) => Some(properties),
            Amf0Value::TypedObject { properties, .. } => Some(properties),
            _ => None,
        }
    }

    /// Looks up a property by name in an object-shaped value.
    pub fn get_property(&self, name: &str) -> Option<&Amf0Value> {
        let properties = match self {
            Amf0Value::Object(properties) => properties,
            Amf0Value::EcmaArray(properties) => properties,
            Amf0Value::TypedObject { properties, .. } => properties,
            _ => return None,
        };

        properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

mod markers {
    pub const NUMBER_MARKER: u8 = 0;
    pub const BOOLEAN_MARKER: u8 = 1;
    pub const STRING_MARKER: u8 = 2;
    pub const OBJECT_MARKER: u8 = 3;
    pub const NULL_MARKER: u8 = 5;
    pub const UNDEFINED_MARKER: u8 = 6;
    pub const REFERENCE_MARKER: u8 = 7;
    pub const ECMA_ARRAY_MARKER: u8 = 8;
    pub const OBJECT_END_MARKER: u8 = 9;
    pub const STRICT_ARRAY_MARKER: u8 = 10;
    pub const DATE_MARKER: u8 = 11;
    pub const LONG_STRING_MARKER: u8 = 12;
    pub const XML_DOCUMENT_MARKER: u8 = 15;
    pub const TYPED_OBJECT_MARKER: u8 = 16;
    pub const AVMPLUS_OBJECT_MARKER: u8 = 17;
    pub const UTF_8_EMPTY_MARKER: u16 = 0;
}
