//! This module contains functionality to deserialize values from bytes
//! that were encoded via the AMF0 specification
//! (http://wwwimages.adobe.com/content/dam/Adobe/en/devnet/amf/pdf/amf0-file-format-specification.pdf)

use crate::amf3;
use crate::errors::Amf0DeserializationError;
use crate::markers;
use crate::{Amf0Properties, Amf0Value};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

struct ObjectProperty {
    label: String,
    value: Amf0Value,
}

/// Turns any readable byte stream into an array of AMF0 values
pub fn deserialize<R: Read>(bytes: &mut R) -> Result<Vec<Amf0Value>, Amf0DeserializationError> {
    let mut results = vec![];

    loop {
        match read_next_value(bytes)? {
            Some(x) => results.push(x),
            None => break,
        };
    }

    Ok(results)
}

fn read_next_value<R: Read>(bytes: &mut R) -> Result<Option<Amf0Value>, Amf0DeserializationError> {
    let mut buffer: [u8; 1] = [0];
    let bytes_read = bytes.read(&mut buffer)?;

    if bytes_read == 0 {
        return Ok(None);
    }

    if buffer[0] == markers::OBJECT_END_MARKER {
        return Ok(None);
    }

    match buffer[0] {
        markers::BOOLEAN_MARKER => parse_bool(bytes).map(Some),
        markers::NULL_MARKER => Ok(Some(Amf0Value::Null)),
        markers::UNDEFINED_MARKER => Ok(Some(Amf0Value::Undefined)),
        markers::NUMBER_MARKER => parse_number(bytes).map(Some),
        markers::OBJECT_MARKER => parse_object(bytes).map(Some),
        markers::REFERENCE_MARKER => parse_reference(bytes).map(Some),
        markers::ECMA_ARRAY_MARKER => parse_ecma_array(bytes).map(Some),
        markers::STRING_MARKER => parse_string(bytes).map(Some),
        markers::STRICT_ARRAY_MARKER => parse_strict_array(bytes).map(Some),
        markers::DATE_MARKER => parse_date(bytes).map(Some),
        markers::LONG_STRING_MARKER => parse_long_string(bytes).map(Some),
        markers::XML_DOCUMENT_MARKER => parse_xml_document(bytes).map(Some),
        markers::TYPED_OBJECT_MARKER => parse_typed_object(bytes).map(Some),
        markers::AVMPLUS_OBJECT_MARKER => parse_avmplus(bytes).map(Some),
        _ => Err(Amf0DeserializationError::UnknownMarker { marker: buffer[0] }),
    }
}

fn parse_number<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    let number = bytes.read_f64::<BigEndian>()?;
    let value = Amf0Value::Number(number);

    Ok(value)
}

fn parse_bool<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    let value = bytes.read_u8()?;

    Ok(Amf0Value::Boolean(value == 1))
}

fn read_utf8(bytes: &mut impl Read, length: usize) -> Result<String, Amf0DeserializationError> {
    let mut buffer: Vec<u8> = vec![0_u8; length];
    bytes.read_exact(&mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

fn parse_string<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    let length = bytes.read_u16::<BigEndian>()?;
    let value = read_utf8(bytes, length as usize)?;
    Ok(Amf0Value::Utf8String(value))
}

fn parse_long_string<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    let length = bytes.read_u32::<BigEndian>()?;
    let value = read_utf8(bytes, length as usize)?;
    Ok(Amf0Value::LongUtf8String(value))
}

fn parse_xml_document<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    let length = bytes.read_u32::<BigEndian>()?;
    let value = read_utf8(bytes, length as usize)?;
    Ok(Amf0Value::XmlDocument(value))
}

fn parse_reference<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    // The index points into a reference table this codec does not keep, so
    // the value is surfaced as-is and not followed further.
    let index = bytes.read_u16::<BigEndian>()?;
    Ok(Amf0Value::Reference(index))
}

fn parse_object_properties<R: Read>(
    bytes: &mut R,
) -> Result<Amf0Properties, Amf0DeserializationError> {
    let mut properties = Amf0Properties::new();

    loop {
        match parse_object_property(bytes)? {
            Some(property) => properties.push((property.label, property.value)),
            None => break,
        };
    }

    Ok(properties)
}

fn parse_object<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    let properties = parse_object_properties(bytes)?;
    Ok(Amf0Value::Object(properties))
}

fn parse_ecma_array<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    // While the spec says it gives you the count of items in the array, it is vague about if
    // the object end marker is used.  In real world usages the associative array
    // actually ends with a 0x000009 ending (same as objects do).  If we don't consume this
    // then the buffer will start at that ending and funky things will happen.  So
    // ignore the associative count and read exactly as we would an object body.

    let _associative_count = bytes.read_u32::<BigEndian>()?;
    let properties = parse_object_properties(bytes)?;
    Ok(Amf0Value::EcmaArray(properties))
}

fn parse_strict_array<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    let array_count = bytes.read_u32::<BigEndian>()?;
    let mut values: Vec<Amf0Value> = Vec::new();

    for _ in 0..array_count {
        match read_next_value(bytes)? {
            Some(value) => {
                values.push(value);
            }
            None => break,
        };
    }

    Ok(Amf0Value::StrictArray(values))
}

fn parse_date<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    let time_zone = bytes.read_i16::<BigEndian>()?;
    let unix_time_ms = bytes.read_f64::<BigEndian>()?;

    Ok(Amf0Value::Date {
        time_zone,
        unix_time_ms,
    })
}

fn parse_typed_object<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    let name_length = bytes.read_u16::<BigEndian>()?;
    let class_name = read_utf8(bytes, name_length as usize)?;
    let properties = parse_object_properties(bytes)?;

    Ok(Amf0Value::TypedObject {
        class_name,
        properties,
    })
}

fn parse_avmplus<R: Read>(bytes: &mut R) -> Result<Amf0Value, Amf0DeserializationError> {
    let value = amf3::decode_amf3(bytes)?;
    Ok(Amf0Value::AvmPlus(value))
}

fn parse_object_property<R: Read>(
    bytes: &mut R,
) -> Result<Option<ObjectProperty>, Amf0DeserializationError> {
    let label_length = bytes.read_u16::<BigEndian>()?;
    if label_length == 0 {
        // Next byte should be the end of object marker.  We need to read this
        // to make sure we progress the current position.
        let byte = bytes.read_u8()?;
        if byte != markers::OBJECT_END_MARKER {
            return Err(Amf0DeserializationError::UnexpectedEmptyObjectPropertyName);
        }

        return Ok(None);
    }

    let label = read_utf8(bytes, label_length as usize)?;

    match read_next_value(bytes)? {
        None => Err(Amf0DeserializationError::UnexpectedEof),
        Some(property_value) => Ok(Some(ObjectProperty {
            label,
            value: property_value,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::deserialize;
    use crate::markers;
    use crate::serialize;
    use crate::Amf0Value;
    use byteorder::{BigEndian, WriteBytesExt};
    use std::io::Cursor;

    #[test]
    fn can_deserialize_number() {
        let number: f64 = 332.0;

        let mut vector = vec![];
        vector.write_u8(markers::NUMBER_MARKER).unwrap();
        vector.write_f64::<BigEndian>(number).unwrap();

        let mut input = Cursor::new(vector);
        let result = deserialize(&mut input).unwrap();

        let expected = vec![Amf0Value::Number(number)];
        assert_eq!(result, expected);
    }

    #[test]
    fn can_deserialize_true_boolean() {
        let mut vector = vec![];
        vector.write_u8(markers::BOOLEAN_MARKER).unwrap();
        vector.write_u8(1).unwrap();

        let mut input = Cursor::new(vector);
        let result = deserialize(&mut input).unwrap();

        let expected = vec![Amf0Value::Boolean(true)];
        assert_eq!(result, expected);
    }

    #[test]
    fn can_deserialize_false_boolean() {
        let mut vector = vec![];
        vector.write_u8(markers::BOOLEAN_MARKER).unwrap();
        vector.write_u8(0).unwrap();

        let mut input = Cursor::new(vector);
        let result = deserialize(&mut input).unwrap();

        let expected = vec![Amf0Value::Boolean(false)];
        assert_eq!(result, expected);
    }

    #[test]
    fn can_deserialize_string() {
        let value = "test";

        let mut vector = vec![];
        vector.write_u8(markers::STRING_MARKER).unwrap();
        vector.write_u16::<BigEndian>(value.len() as u16).unwrap();
        vector.extend(value.as_bytes());

        let mut input = Cursor::new(vector);
        let result = deserialize(&mut input).unwrap();

        let expected = vec![Amf0Value::Utf8String(value.to_string())];
        assert_eq!(result, expected);
    }

    #[test]
    fn can_deserialize_null() {
        let mut vector = vec![];
        vector.write_u8(markers::NULL_MARKER).unwrap();

        let mut input = Cursor::new(vector);
        let result = deserialize(&mut input).unwrap();

        let expected = vec![Amf0Value::Null];
        assert_eq!(result, expected);
    }

    #[test]
    fn can_deserialize_undefined() {
        let mut vector = vec![];
        vector.write_u8(markers::UNDEFINED_MARKER).unwrap();

        let mut input = Cursor::new(vector);
        let result = deserialize(&mut input).unwrap();

        let expected = vec![Amf0Value::Undefined];
        assert_eq!(result, expected);
    }

    #[test]
    fn can_deserialize_object_preserving_property_order() {
        const NUMBER: f64 = 332.0;

        let mut vector = vec![];
        vector.push(markers::OBJECT_MARKER);
        vector.write_u16::<BigEndian>(4).unwrap();
        vector.extend("zzzz".as_bytes());
        vector.push(markers::NUMBER_MARKER);
        vector.write_f64::<BigEndian>(NUMBER).unwrap();
        vector.write_u16::<BigEndian>(4).unwrap();
        vector.extend("aaaa".as_bytes());
        vector.push(markers::BOOLEAN_MARKER);
        vector.push(1);
        vector
            .write_u16::<BigEndian>(markers::UTF_8_EMPTY_MARKER)
            .unwrap();
        vector.push(markers::OBJECT_END_MARKER);

        let mut input = Cursor::new(vector);
        let result = deserialize(&mut input).unwrap();

        let expected = vec![Amf0Value::Object(vec![
            ("zzzz".to_string(), Amf0Value::Number(NUMBER)),
            ("aaaa".to_string(), Amf0Value::Boolean(true)),
        ])];

        assert_eq!(result, expected);
    }

    #[test]
    fn can_deserialize_emca_array() {
        let mut vector = vec![];
        vector.push(markers::ECMA_ARRAY_MARKER);
        vector.write_u32::<BigEndian>(2).unwrap();
        vector.write_u16::<BigEndian>(5).unwrap();
        vector.extend("test1".as_bytes());
        vector.push(markers::NUMBER_MARKER);
        vector.write_f64::<BigEndian>(1.0).unwrap();
        vector.write_u16::<BigEndian>(5).unwrap();
        vector.extend("test2".as_bytes());
        vector.write_u8(markers::STRING_MARKER).unwrap();
        vector.write_u16::<BigEndian>(6).unwrap();
        vector.extend("second".as_bytes());
        vector
            .write_u16::<BigEndian>(markers::UTF_8_EMPTY_MARKER)
            .unwrap();
        vector.push(markers::OBJECT_END_MARKER);

        let mut input = Cursor::new(vector);
        let result = deserialize(&mut input).unwrap();

        let expected = vec![Amf0Value::EcmaArray(vec![
            ("test1".to_string(), Amf0Value::Number(1.0)),
            (
                "test2".to_string(),
                Amf0Value::Utf8String("second".to_string()),
            ),
        ])];

        assert_eq!(result, expected);
    }

    #[test]
    fn can_deserialize_strict_array() {
        let mut vector = vec![];
        vector.push(markers::STRICT_ARRAY_MARKER);
        vector.write_u32::<BigEndian>(2).unwrap();
        vector.push(markers::NUMBER_MARKER);
        vector.write_f64::<BigEndian>(1.0).unwrap();
        vector.push(markers::NUMBER_MARKER);
        vector.write_f64::<BigEndian>(2.0).unwrap();

        let mut input = Cursor::new(vector);
        let result = deserialize(&mut input).unwrap();

        let expected = vec![Amf0Value::StrictArray(vec![
            Amf0Value::Number(1.0),
            Amf0Value::Number(2.0),
        ])];
        assert_eq!(result, expected);
    }

    #[test]
    fn can_deserialize_reference() {
        let mut vector = vec![];
        vector.push(markers::REFERENCE_MARKER);
        vector.write_u16::<BigEndian>(5).unwrap();

        let mut input = Cursor::new(vector);
        let result = deserialize(&mut input).unwrap();

        assert_eq!(result, vec![Amf0Value::Reference(5)]);
    }

    #[test]
    fn roundtrips_every_value_kind() {
        let values = vec![
            Amf0Value::Number(45.2),
            Amf0Value::Boolean(true),
            Amf0Value::Utf8String("stream1".to_string()),
            Amf0Value::Null,
            Amf0Value::Undefined,
            Amf0Value::Object(vec![
                ("b".to_string(), Amf0Value::Number(1.0)),
                ("a".to_string(), Amf0Value::Null),
            ]),
            Amf0Value::EcmaArray(vec![("x".to_string(), Amf0Value::Boolean(false))]),
            Amf0Value::StrictArray(vec![Amf0Value::Number(1.0), Amf0Value::Undefined]),
            Amf0Value::Date {
                time_zone: 0,
                unix_time_ms: 1234567890.0,
            },
            Amf0Value::LongUtf8String("long".to_string()),
            Amf0Value::XmlDocument("<a/>".to_string()),
            Amf0Value::TypedObject {
                class_name: "SomeClass".to_string(),
                properties: vec![("p".to_string(), Amf0Value::Number(2.0))],
            },
            Amf0Value::Reference(3),
        ];

        let bytes = serialize(&values).unwrap();
        let mut cursor = Cursor::new(bytes);
        let result = deserialize(&mut cursor).unwrap();

        assert_eq!(result, values);
    }
}
