//! AMF3 decoder
//!
//! AMF3 shows up in two places: after an avmplus marker (0x11) inside an
//! AMF0 sequence, and in the payload of `CommandAmf3`/`DataAmf3` messages.
//! The server never writes AMF3, so only decoding lives here.
//!
//! Strings, objects and traits are reference-counted through three
//! per-message tables indexed by the U29 header (low bit clear = reference).

use bytes::{Buf, Bytes};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

const MARKER_UNDEFINED: u8 = 0x00;
const MARKER_NULL: u8 = 0x01;
const MARKER_FALSE: u8 = 0x02;
const MARKER_TRUE: u8 = 0x03;
const MARKER_INTEGER: u8 = 0x04;
const MARKER_DOUBLE: u8 = 0x05;
const MARKER_STRING: u8 = 0x06;
const MARKER_XML_DOC: u8 = 0x07;
const MARKER_DATE: u8 = 0x08;
const MARKER_ARRAY: u8 = 0x09;
const MARKER_OBJECT: u8 = 0x0A;
const MARKER_XML: u8 = 0x0B;
const MARKER_BYTE_ARRAY: u8 = 0x0C;

const MAX_NESTING_DEPTH: usize = 64;

#[derive(Clone, Debug)]
struct Traits {
    class_name: String,
    dynamic: bool,
    sealed: Vec<String>,
}

/// AMF3 decoder with its reference tables
pub struct Amf3Decoder {
    strings: Vec<String>,
    objects: Vec<AmfValue>,
    traits: Vec<Traits>,
    depth: usize,
}

impl Amf3Decoder {
    pub fn new() -> Self {
        Self {
            strings: Vec::new(),
            objects: Vec::new(),
            traits: Vec::new(),
            depth: 0,
        }
    }

    pub fn reset(&mut self) {
        self.strings.clear();
        self.objects.clear();
        self.traits.clear();
        self.depth = 0;
    }

    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }
        let marker = buf.get_u8();
        let result = self.decode_marker(marker, buf);
        self.depth -= 1;
        result
    }

    fn decode_marker(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_UNDEFINED => Ok(AmfValue::Undefined),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_FALSE => Ok(AmfValue::Boolean(false)),
            MARKER_TRUE => Ok(AmfValue::Boolean(true)),
            MARKER_INTEGER => {
                let raw = read_u29(buf)?;
                // Sign-extend from 29 bits
                Ok(AmfValue::Integer(((raw << 3) as i32) >> 3))
            }
            MARKER_DOUBLE => {
                if buf.remaining() < 8 {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_STRING => Ok(AmfValue::String(self.read_string(buf)?)),
            MARKER_XML | MARKER_XML_DOC => {
                let header = read_u29(buf)?;
                if let Some(value) = self.object_reference(header)? {
                    return Ok(value);
                }
                let raw = read_exact(buf, (header >> 1) as usize)?;
                let xml = String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidUtf8)?;
                Ok(self.remember(AmfValue::Xml(xml)))
            }
            MARKER_DATE => {
                let header = read_u29(buf)?;
                if let Some(value) = self.object_reference(header)? {
                    return Ok(value);
                }
                if buf.remaining() < 8 {
                    return Err(AmfError::UnexpectedEof);
                }
                let millis = buf.get_f64();
                Ok(self.remember(AmfValue::Date(millis)))
            }
            MARKER_BYTE_ARRAY => {
                let header = read_u29(buf)?;
                if let Some(value) = self.object_reference(header)? {
                    return Ok(value);
                }
                let raw = read_exact(buf, (header >> 1) as usize)?;
                Ok(self.remember(AmfValue::ByteArray(raw.to_vec())))
            }
            MARKER_ARRAY => self.decode_array(buf),
            MARKER_OBJECT => self.decode_object(buf),
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    fn decode_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf)?;
        if let Some(value) = self.object_reference(header)? {
            return Ok(value);
        }
        let dense_len = (header >> 1) as usize;
        let slot = self.reserve();

        let mut assoc = AmfObject::new();
        loop {
            let key = self.read_string(buf)?;
            if key.is_empty() {
                break;
            }
            let value = self.decode(buf)?;
            assoc.insert(key, value);
        }

        let mut dense = Vec::with_capacity(dense_len.min(1024));
        for _ in 0..dense_len {
            dense.push(self.decode(buf)?);
        }

        let value = if assoc.is_empty() {
            AmfValue::Array(dense)
        } else {
            for (index, item) in dense.into_iter().enumerate() {
                assoc.insert(index.to_string(), item);
            }
            AmfValue::EcmaArray(assoc)
        };
        self.objects[slot] = value.clone();
        Ok(value)
    }

    fn decode_object(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf)?;
        if let Some(value) = self.object_reference(header)? {
            return Ok(value);
        }
        let slot = self.reserve();

        let traits = if header & 0b10 == 0 {
            let index = (header >> 2) as usize;
            self.traits
                .get(index)
                .cloned()
                .ok_or(AmfError::InvalidReference(index as u16))?
        } else {
            // Externalizable objects (bit 2) carry opaque class-specific data
            if header & 0b100 != 0 {
                return Err(AmfError::UnknownMarker(MARKER_OBJECT));
            }
            let dynamic = header & 0b1000 != 0;
            let sealed_count = (header >> 4) as usize;
            let class_name = self.read_string(buf)?;
            let mut sealed = Vec::with_capacity(sealed_count.min(256));
            for _ in 0..sealed_count {
                sealed.push(self.read_string(buf)?);
            }
            let traits = Traits {
                class_name,
                dynamic,
                sealed,
            };
            self.traits.push(traits.clone());
            traits
        };

        let mut props = AmfObject::new();
        for name in &traits.sealed {
            let value = self.decode(buf)?;
            props.insert(name.clone(), value);
        }
        if traits.dynamic {
            loop {
                let key = self.read_string(buf)?;
                if key.is_empty() {
                    break;
                }
                let value = self.decode(buf)?;
                props.insert(key, value);
            }
        }

        let value = if traits.class_name.is_empty() {
            AmfValue::Object(props)
        } else {
            AmfValue::TypedObject {
                class_name: traits.class_name,
                properties: props,
            }
        };
        self.objects[slot] = value.clone();
        Ok(value)
    }

    fn read_string(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        let header = read_u29(buf)?;
        if header & 1 == 0 {
            let index = (header >> 1) as usize;
            return self
                .strings
                .get(index)
                .cloned()
                .ok_or(AmfError::InvalidReference(index as u16));
        }
        let raw = read_exact(buf, (header >> 1) as usize)?;
        let s = String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidUtf8)?;
        // The empty string is never added to the table
        if !s.is_empty() {
            self.strings.push(s.clone());
        }
        Ok(s)
    }

    fn object_reference(&self, header: u32) -> Result<Option<AmfValue>, AmfError> {
        if header & 1 != 0 {
            return Ok(None);
        }
        let index = (header >> 1) as usize;
        self.objects
            .get(index)
            .cloned()
            .map(Some)
            .ok_or(AmfError::InvalidReference(index as u16))
    }

    fn reserve(&mut self) -> usize {
        self.objects.push(AmfValue::Null);
        self.objects.len() - 1
    }

    fn remember(&mut self, value: AmfValue) -> AmfValue {
        self.objects.push(value.clone());
        value
    }
}

impl Default for Amf3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Variable-length 29-bit unsigned integer
fn read_u29(buf: &mut Bytes) -> Result<u32, AmfError> {
    let mut value = 0u32;
    for i in 0..4 {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }
        let byte = buf.get_u8();
        if i == 3 {
            return Ok((value << 8) | byte as u32);
        }
        value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(value)
}

fn read_exact(buf: &mut Bytes, len: usize) -> Result<Bytes, AmfError> {
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    Ok(buf.split_to(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &'static [u8]) -> Result<AmfValue, AmfError> {
        let mut buf = Bytes::from_static(raw);
        Amf3Decoder::new().decode(&mut buf)
    }

    #[test]
    fn test_u29_forms() {
        assert_eq!(decode(&[0x04, 0x7F]).unwrap(), AmfValue::Integer(127));
        assert_eq!(decode(&[0x04, 0x81, 0x00]).unwrap(), AmfValue::Integer(128));
        // Four-byte form with the sign bit set
        assert_eq!(
            decode(&[0x04, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap(),
            AmfValue::Integer(-1)
        );
    }

    #[test]
    fn test_string_reference_table() {
        // Array with two dense strings: "ab" then a reference to index 0
        let raw: &'static [u8] = &[0x09, 0x05, 0x01, 0x06, 0x05, b'a', b'b', 0x06, 0x00];
        assert_eq!(
            decode(raw).unwrap(),
            AmfValue::Array(vec![AmfValue::from("ab"), AmfValue::from("ab")])
        );
    }

    #[test]
    fn test_dynamic_anonymous_object() {
        // Inline traits, dynamic, no sealed members, empty class name
        let raw: &'static [u8] = &[
            0x0A, 0x0B, 0x01, // header, class ""
            0x07, b'a', b'p', b'p', 0x06, 0x09, b'l', b'i', b'v', b'e', 0x01, // app: "live", end
        ];
        let value = decode(raw).unwrap();
        assert_eq!(value.get_string("app"), Some("live"));
    }

    #[test]
    fn test_bad_reference() {
        assert!(matches!(
            decode(&[0x06, 0x04]),
            Err(AmfError::InvalidReference(2))
        ));
        assert!(matches!(decode(&[0x05, 0x00]), Err(AmfError::UnexpectedEof)));
    }
}
