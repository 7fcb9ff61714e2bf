//! Module contains functionality for serializing values into bytes
//! based on the AMF0 specification
//! (http://wwwimages.adobe.com/content/dam/Adobe/en/devnet/amf/pdf/amf0-file-format-specification.pdf)

use crate::amf3;
use crate::errors::Amf0SerializationError;
use crate::markers;
use crate::{Amf0Properties, Amf0Value};
use byteorder::{BigEndian, WriteBytesExt};

/// Serializes values into an amf0 encoded vector of bytes
pub fn serialize(values: &[Amf0Value]) -> Result<Vec<u8>, Amf0SerializationError> {
    let mut bytes = vec![];
    for value in values {
        serialize_value(value, &mut bytes)?;
    }

    Ok(bytes)
}

fn serialize_value(value: &Amf0Value, bytes: &mut Vec<u8>) -> Result<(), Amf0SerializationError> {
    match *value {
        Amf0Value::Boolean(val) => Ok(serialize_bool(val, bytes)),
        Amf0Value::Null => Ok(serialize_null(bytes)),
        Amf0Value::Undefined => Ok(serialize_undefined(bytes)),
        Amf0Value::Number(val) => serialize_number(val, bytes),
        Amf0Value::Utf8String(ref val) => serialize_string(val, bytes),
        Amf0Value::Object(ref val) => serialize_object(val, bytes),
        Amf0Value::Reference(val) => serialize_reference(val, bytes),
        Amf0Value::EcmaArray(ref val) => serialize_ecma_array(val, bytes),
        Amf0Value::StrictArray(ref val) => serialize_strict_array(val, bytes),
        Amf0Value::Date {
            time_zone,
            unix_time_ms,
        } => serialize_date(time_zone, unix_time_ms, bytes),
        Amf0Value::LongUtf8String(ref val) => serialize_long_string(val, bytes),
        Amf0Value::XmlDocument(ref val) => serialize_xml_document(val, bytes),
        Amf0Value::TypedObject {
            ref class_name,
            ref properties,
        } => serialize_typed_object(class_name, properties, bytes),
        Amf0Value::AvmPlus(ref val) => serialize_avmplus(val, bytes),
    }
}

fn serialize_number(value: f64, bytes: &mut Vec<u8>) -> Result<(), Amf0SerializationError> {
    bytes.push(markers::NUMBER_MARKER);
    bytes.write_f64::<BigEndian>(value)?;
    Ok(())
}

fn serialize_bool(value: bool, bytes: &mut Vec<u8>) {
    bytes.push(markers::BOOLEAN_MARKER);
    bytes.push(value as u8);
}

fn serialize_string(value: &str, bytes: &mut Vec<u8>) -> Result<(), Amf0SerializationError> {
    if value.len() > (u16::MAX as usize) {
        return Err(Amf0SerializationError::NormalStringTooLong);
    }

    bytes.push(markers::STRING_MARKER);
    bytes.write_u16::<BigEndian>(value.len() as u16)?;
    bytes.extend(value.as_bytes());
    Ok(())
}

fn serialize_null(bytes: &mut Vec<u8>) {
    bytes.push(markers::NULL_MARKER);
}

fn serialize_undefined(bytes: &mut Vec<u8>) {
    bytes.push(markers::UNDEFINED_MARKER);
}

fn serialize_reference(index: u16, bytes: &mut Vec<u8>) -> Result<(), Amf0SerializationError> {
    bytes.push(markers::REFERENCE_MARKER);
    bytes.write_u16::<BigEndian>(index)?;
    Ok(())
}

fn serialize_object_properties(
    properties: &Amf0Properties,
    bytes: &mut Vec<u8>,
) -> Result<(), Amf0SerializationError> {
    for (name, value) in properties {
        if name.len() > (u16::MAX as usize) {
            return Err(Amf0SerializationError::NormalStringTooLong);
        }

        bytes.write_u16::<BigEndian>(name.len() as u16)?;
        bytes.extend(name.as_bytes());
        serialize_value(value, bytes)?;
    }

    bytes.write_u16::<BigEndian>(markers::UTF_8_EMPTY_MARKER)?;
    bytes.push(markers::OBJECT_END_MARKER);
    Ok(())
}

fn serialize_object(
    properties: &Amf0Properties,
    bytes: &mut Vec<u8>,
) -> Result<(), Amf0SerializationError> {
    bytes.push(markers::OBJECT_MARKER);
    serialize_object_properties(properties, bytes)
}

fn serialize_ecma_array(
    properties: &Amf0Properties,
    bytes: &mut Vec<u8>,
) -> Result<(), Amf0SerializationError> {
    bytes.push(markers::ECMA_ARRAY_MARKER);
    bytes.write_u32::<BigEndian>(properties.len() as u32)?;
    serialize_object_properties(properties, bytes)
}

fn serialize_strict_array(
    array: &Vec<Amf0Value>,
    bytes: &mut Vec<u8>,
) -> Result<(), Amf0SerializationError> {
    bytes.push(markers::STRICT_ARRAY_MARKER);

    bytes.write_u32::<BigEndian>(array.len() as u32)?;

    for value in array {
        serialize_value(value, bytes)?;
    }

    Ok(())
}

fn serialize_date(
    time_zone: i16,
    unix_time_ms: f64,
    bytes: &mut Vec<u8>,
) -> Result<(), Amf0SerializationError> {
    bytes.push(markers::DATE_MARKER);
    bytes.write_i16::<BigEndian>(time_zone)?;
    bytes.write_f64::<BigEndian>(unix_time_ms)?;
    Ok(())
}

fn serialize_long_string(value: &str, bytes: &mut Vec<u8>) -> Result<(), Amf0SerializationError> {
    bytes.push(markers::LONG_STRING_MARKER);
    bytes.write_u32::<BigEndian>(value.len() as u32)?;
    bytes.extend(value.as_bytes());
    Ok(())
}

fn serialize_xml_document(value: &str, bytes: &mut Vec<u8>) -> Result<(), Amf0SerializationError> {
    bytes.push(markers::XML_DOCUMENT_MARKER);
    bytes.write_u32::<BigEndian>(value.len() as u32)?;
    bytes.extend(value.as_bytes());
    Ok(())
}

fn serialize_typed_object(
    class_name: &str,
    properties: &Amf0Properties,
    bytes: &mut Vec<u8>,
) -> Result<(), Amf0SerializationError> {
    if class_name.len() > (u16::MAX as usize) {
        return Err(Amf0SerializationError::NormalStringTooLong);
    }

    bytes.push(markers::TYPED_OBJECT_MARKER);
    bytes.write_u16::<BigEndian>(class_name.len() as u16)?;
    bytes.extend(class_name.as_bytes());
    serialize_object_properties(properties, bytes)
}

fn serialize_avmplus(
    value: &amf3::Amf3Value,
    bytes: &mut Vec<u8>,
) -> Result<(), Amf0SerializationError> {
    bytes.push(markers::AVMPLUS_OBJECT_MARKER);
    amf3::encode_amf3(value, bytes)?;
    Ok(())
}
