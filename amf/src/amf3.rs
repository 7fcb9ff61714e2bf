//! Decoding and encoding of AMF3 values, as used by RTMP peers that negotiate
//! object encoding 3.
//!
//! Reference tables (strings, objects, traits) are intentionally not kept:
//! RTMP command payloads are self-contained single messages, and a reference
//! marker decodes to an explicit error instead of a silently wrong value.

use crate::errors::{Amf3DeserializationError, Amf3SerializationError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;

/// Ordered named members of an AMF3 object or associative array portion.
pub type Amf3Properties = Vec<(String, Amf3Value)>;

/// An Enum representing the different supported types of Amf3 values
#[derive(PartialEq, Debug, Clone)]
pub enum Amf3Value {
    Undefined,
    Null,
    Boolean(bool),
    /// A 29 bit integer.  Values above 0x0FFFFFFF wrap into two's complement.
    Integer(i32),
    Double(f64),
    Utf8String(String),
    XmlDocument(String),
    Xml(String),
    /// Milliseconds since the unix epoch.  AMF3 dates carry no time zone.
    Date(f64),
    Array {
        associative: Amf3Properties,
        dense: Vec<Amf3Value>,
    },
    Object {
        class_name: Option<String>,
        sealed: Amf3Properties,
        dynamic: Amf3Properties,
    },
    ByteArray(Vec<u8>),
}

mod markers {
    pub const UNDEFINED_MARKER: u8 = 0x00;
    pub const NULL_MARKER: u8 = 0x01;
    pub const FALSE_MARKER: u8 = 0x02;
    pub const TRUE_MARKER: u8 = 0x03;
    pub const INTEGER_MARKER: u8 = 0x04;
    pub const DOUBLE_MARKER: u8 = 0x05;
    pub const STRING_MARKER: u8 = 0x06;
    pub const XML_DOCUMENT_MARKER: u8 = 0x07;
    pub const DATE_MARKER: u8 = 0x08;
    pub const ARRAY_MARKER: u8 = 0x09;
    pub const OBJECT_MARKER: u8 = 0x0a;
    pub const XML_MARKER: u8 = 0x0b;
    pub const BYTE_ARRAY_MARKER: u8 = 0x0c;
}

const U29_MAX: u32 = 0x1fffffff;

/// Decodes a single AMF3 value from the byte stream
pub fn decode_amf3<R: Read>(bytes: &mut R) -> Result<Amf3Value, Amf3DeserializationError> {
    let marker = bytes.read_u8()?;

    match marker {
        markers::UNDEFINED_MARKER => Ok(Amf3Value::Undefined),
        markers::NULL_MARKER => Ok(Amf3Value::Null),
        markers::FALSE_MARKER => Ok(Amf3Value::Boolean(false)),
        markers::TRUE_MARKER => Ok(Amf3Value::Boolean(true)),
        markers::INTEGER_MARKER => decode_integer(bytes),
        markers::DOUBLE_MARKER => Ok(Amf3Value::Double(bytes.read_f64::<BigEndian>()?)),
        markers::STRING_MARKER => Ok(Amf3Value::Utf8String(decode_string(bytes)?)),
        markers::XML_DOCUMENT_MARKER => Ok(Amf3Value::XmlDocument(decode_string(bytes)?)),
        markers::DATE_MARKER => decode_date(bytes),
        markers::ARRAY_MARKER => decode_array(bytes),
        markers::OBJECT_MARKER => decode_object(bytes),
        markers::XML_MARKER => Ok(Amf3Value::Xml(decode_string(bytes)?)),
        markers::BYTE_ARRAY_MARKER => decode_byte_array(bytes),
        _ => Err(Amf3DeserializationError::UnknownMarker { marker }),
    }
}

/// Encodes a single AMF3 value into the byte vector
pub fn encode_amf3(value: &Amf3Value, bytes: &mut Vec<u8>) -> Result<(), Amf3SerializationError> {
    match *value {
        Amf3Value::Undefined => bytes.push(markers::UNDEFINED_MARKER),
        Amf3Value::Null => bytes.push(markers::NULL_MARKER),
        Amf3Value::Boolean(false) => bytes.push(markers::FALSE_MARKER),
        Amf3Value::Boolean(true) => bytes.push(markers::TRUE_MARKER),
        Amf3Value::Integer(val) => encode_integer(val, bytes)?,
        Amf3Value::Double(val) => {
            bytes.push(markers::DOUBLE_MARKER);
            bytes.write_f64::<BigEndian>(val)?;
        }
        Amf3Value::Utf8String(ref val) => {
            bytes.push(markers::STRING_MARKER);
            encode_string(val, bytes)?;
        }
        Amf3Value::XmlDocument(ref val) => {
            bytes.push(markers::XML_DOCUMENT_MARKER);
            encode_string(val, bytes)?;
        }
        Amf3Value::Xml(ref val) => {
            bytes.push(markers::XML_MARKER);
            encode_string(val, bytes)?;
        }
        Amf3Value::Date(unix_time_ms) => {
            bytes.push(markers::DATE_MARKER);
            write_u29(1, bytes)?;
            bytes.write_f64::<BigEndian>(unix_time_ms)?;
        }
        Amf3Value::Array {
            ref associative,
            ref dense,
        } => encode_array(associative, dense, bytes)?,
        Amf3Value::Object {
            ref class_name,
            ref sealed,
            ref dynamic,
        } => encode_object(class_name.as_deref(), sealed, dynamic, bytes)?,
        Amf3Value::ByteArray(ref val) => {
            bytes.push(markers::BYTE_ARRAY_MARKER);
            write_u29(((val.len() as u32) << 1) | 1, bytes)?;
            bytes.extend(val);
        }
    }

    Ok(())
}

/// Reads a variable-length 29 bit integer.  The first three bytes carry seven
/// bits each with a continuation flag in the high bit, the fourth byte (when
/// present) carries a full eight bits.
fn read_u29<R: Read>(bytes: &mut R) -> Result<u32, Amf3DeserializationError> {
    let mut value: u32 = 0;

    for byte_count in 0..4 {
        let byte = bytes.read_u8()? as u32;
        if byte_count == 3 {
            return Ok((value << 8) | byte);
        }

        value = (value << 7) | (byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }

    unreachable!()
}

fn write_u29(value: u32, bytes: &mut Vec<u8>) -> Result<(), Amf3SerializationError> {
    let value = value & U29_MAX;

    if value < 0x80 {
        bytes.push(value as u8);
    } else if value < 0x4000 {
        bytes.push((0x80 | (value >> 7)) as u8);
        bytes.push((value & 0x7f) as u8);
    } else if value < 0x200000 {
        bytes.push((0x80 | (value >> 14)) as u8);
        bytes.push((0x80 | ((value >> 7) & 0x7f)) as u8);
        bytes.push((value & 0x7f) as u8);
    } else {
        bytes.push((0x80 | (value >> 22)) as u8);
        bytes.push((0x80 | ((value >> 15) & 0x7f)) as u8);
        bytes.push((0x80 | ((value >> 8) & 0x7f)) as u8);
        bytes.push((value & 0xff) as u8);
    }

    Ok(())
}

fn decode_integer<R: Read>(bytes: &mut R) -> Result<Amf3Value, Amf3DeserializationError> {
    let raw = read_u29(bytes)?;

    // 29 bit two's complement
    let value = if raw > 0x0fffffff {
        (raw as i32) - 0x20000000
    } else {
        raw as i32
    };

    Ok(Amf3Value::Integer(value))
}

fn encode_integer(value: i32, bytes: &mut Vec<u8>) -> Result<(), Amf3SerializationError> {
    if (-0x10000000..=0x0fffffff).contains(&value) {
        bytes.push(markers::INTEGER_MARKER);
        write_u29((value as u32) & U29_MAX, bytes)?;
    } else {
        // Out of 29 bit range, promote to a double as flash runtimes do
        bytes.push(markers::DOUBLE_MARKER);
        bytes.write_f64::<BigEndian>(value as f64)?;
    }

    Ok(())
}

fn decode_string<R: Read>(bytes: &mut R) -> Result<String, Amf3DeserializationError> {
    let header = read_u29(bytes)?;
    if header & 1 == 0 {
        return Err(Amf3DeserializationError::UnsupportedReference);
    }

    let length = (header >> 1) as usize;
    let mut buffer = vec![0_u8; length];
    bytes.read_exact(&mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

fn encode_string(value: &str, bytes: &mut Vec<u8>) -> Result<(), Amf3SerializationError> {
    write_u29(((value.len() as u32) << 1) | 1, bytes)?;
    bytes.extend(value.as_bytes());
    Ok(())
}

fn decode_date<R: Read>(bytes: &mut R) -> Result<Amf3Value, Amf3DeserializationError> {
    let header = read_u29(bytes)?;
    if header & 1 == 0 {
        return Err(Amf3DeserializationError::UnsupportedReference);
    }

    let unix_time_ms = bytes.read_f64::<BigEndian>()?;
    Ok(Amf3Value::Date(unix_time_ms))
}

fn decode_array<R: Read>(bytes: &mut R) -> Result<Amf3Value, Amf3DeserializationError> {
    let header = read_u29(bytes)?;
    if header & 1 == 0 {
        return Err(Amf3DeserializationError::UnsupportedReference);
    }

    let dense_count = (header >> 1) as usize;

    // The associative portion comes first, terminated by the empty key
    let mut associative = Amf3Properties::new();
    loop {
        let key = decode_string(bytes)?;
        if key.is_empty() {
            break;
        }

        let value = decode_amf3(bytes)?;
        associative.push((key, value));
    }

    let mut dense = Vec::with_capacity(dense_count.min(64));
    for _ in 0..dense_count {
        dense.push(decode_amf3(bytes)?);
    }

    Ok(Amf3Value::Array { associative, dense })
}

fn encode_array(
    associative: &Amf3Properties,
    dense: &[Amf3Value],
    bytes: &mut Vec<u8>,
) -> Result<(), Amf3SerializationError> {
    bytes.push(markers::ARRAY_MARKER);
    write_u29(((dense.len() as u32) << 1) | 1, bytes)?;

    for (key, value) in associative {
        encode_string(key, bytes)?;
        encode_amf3(value, bytes)?;
    }
    encode_string("", bytes)?;

    for value in dense {
        encode_amf3(value, bytes)?;
    }

    Ok(())
}

fn decode_object<R: Read>(bytes: &mut R) -> Result<Amf3Value, Amf3DeserializationError> {
    let header = read_u29(bytes)?;
    if header & 1 == 0 {
        return Err(Amf3DeserializationError::UnsupportedReference);
    }

    if header & 2 == 0 {
        // Traits reference into a table we do not keep
        return Err(Amf3DeserializationError::UnsupportedReference);
    }

    let class_name = decode_string(bytes)?;

    if header & 4 != 0 {
        return Err(Amf3DeserializationError::UnsupportedExternalizable { class_name });
    }

    let is_dynamic = header & 8 != 0;
    let sealed_count = (header >> 4) as usize;

    let mut sealed_names = Vec::with_capacity(sealed_count.min(64));
    for _ in 0..sealed_count {
        sealed_names.push(decode_string(bytes)?);
    }

    let mut sealed = Amf3Properties::new();
    for name in sealed_names {
        let value = decode_amf3(bytes)?;
        sealed.push((name, value));
    }

    let mut dynamic = Amf3Properties::new();
    if is_dynamic {
        loop {
            let key = decode_string(bytes)?;
            if key.is_empty() {
                break;
            }

            let value = decode_amf3(bytes)?;
            dynamic.push((key, value));
        }
    }

    let class_name = if class_name.is_empty() {
        None
    } else {
        Some(class_name)
    };

    Ok(Amf3Value::Object {
        class_name,
        sealed,
        dynamic,
    })
}

fn encode_object(
    class_name: Option<&str>,
    sealed: &Amf3Properties,
    dynamic: &Amf3Properties,
    bytes: &mut Vec<u8>,
) -> Result<(), Amf3SerializationError> {
    bytes.push(markers::OBJECT_MARKER);

    // Inline traits: not-a-reference, traits-inline, not externalizable,
    // dynamic flag, then the sealed member count
    let header = 0x03 | 0x08 | ((sealed.len() as u32) << 4);
    write_u29(header, bytes)?;
    encode_string(class_name.unwrap_or(""), bytes)?;

    for (name, _) in sealed {
        encode_string(name, bytes)?;
    }

    for (_, value) in sealed {
        encode_amf3(value, bytes)?;
    }

    for (key, value) in dynamic {
        encode_string(key, bytes)?;
        encode_amf3(value, bytes)?;
    }
    encode_string("", bytes)?;

    Ok(())
}

fn decode_byte_array<R: Read>(bytes: &mut R) -> Result<Amf3Value, Amf3DeserializationError> {
    let header = read_u29(bytes)?;
    if header & 1 == 0 {
        return Err(Amf3DeserializationError::UnsupportedReference);
    }

    let length = (header >> 1) as usize;
    let mut buffer = vec![0_u8; length];
    bytes.read_exact(&mut buffer)?;

    Ok(Amf3Value::ByteArray(buffer))
}
