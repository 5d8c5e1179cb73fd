//! AMF0 encoder and decoder
//!
//! Every command on the wire is an AMF0 sequence. The decoder is lenient
//! by default: encoders in the wild drop object end markers and emit
//! reserved markers, and rejecting those would reject real clients.
//!
//! ```text
//! 0x00 Number       0x06 Undefined     0x0B Date
//! 0x01 Boolean      0x07 Reference     0x0C Long string
//! 0x02 String       0x08 ECMA array    0x0D Unsupported
//! 0x03 Object       0x09 Object end    0x0F XML document
//! 0x05 Null         0x0A Strict array  0x10 Typed object
//!                                      0x11 Switch to AMF3
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::amf3::Amf3Decoder;
use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;
const MARKER_AVMPLUS: u8 = 0x11;

/// Objects nested deeper than this are refused
const MAX_NESTING_DEPTH: usize = 64;

/// AMF0 decoder
///
/// Holds the reference table for one message; call [`Amf0Decoder::reset`]
/// before reusing it on the next one.
pub struct Amf0Decoder {
    references: Vec<AmfValue>,
    amf3: Amf3Decoder,
    lenient: bool,
    depth: usize,
}

impl Amf0Decoder {
    pub fn new() -> Self {
        Self::with_lenient(true)
    }

    pub fn with_lenient(lenient: bool) -> Self {
        Self {
            references: Vec::new(),
            amf3: Amf3Decoder::new(),
            lenient,
            depth: 0,
        }
    }

    pub fn reset(&mut self) {
        self.references.clear();
        self.amf3.reset();
        self.depth = 0;
    }

    /// Decode one value. An empty buffer yields `UnexpectedEof`.
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

    /// Decode values until the buffer is exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    fn decode_marker(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => {
                ensure(buf, 8)?;
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_BOOLEAN => {
                ensure(buf, 1)?;
                Ok(AmfValue::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(AmfValue::String(read_utf8(buf)?)),
            MARKER_LONG_STRING => Ok(AmfValue::String(read_utf8_long(buf)?)),
            MARKER_OBJECT => {
                let slot = self.reserve_reference();
                let props = self.read_properties(buf)?;
                Ok(self.fill_reference(slot, AmfValue::Object(props)))
            }
            MARKER_ECMA_ARRAY => {
                // The count is only a hint; the end marker terminates
                ensure(buf, 4)?;
                let _count = buf.get_u32();
                let slot = self.reserve_reference();
                let props = self.read_properties(buf)?;
                Ok(self.fill_reference(slot, AmfValue::EcmaArray(props)))
            }
            MARKER_TYPED_OBJECT => {
                let class_name = read_utf8(buf)?;
                let slot = self.reserve_reference();
                let properties = self.read_properties(buf)?;
                Ok(self.fill_reference(slot, AmfValue::TypedObject { class_name, properties }))
            }
            MARKER_STRICT_ARRAY => {
                ensure(buf, 4)?;
                let count = buf.get_u32() as usize;
                let slot = self.reserve_reference();
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.decode(buf)?);
                }
                Ok(self.fill_reference(slot, AmfValue::Array(items)))
            }
            MARKER_REFERENCE => {
                ensure(buf, 2)?;
                let index = buf.get_u16();
                self.references
                    .get(index as usize)
                    .cloned()
                    .ok_or(AmfError::InvalidReference(index))
            }
            MARKER_DATE => {
                ensure(buf, 10)?;
                let millis = buf.get_f64();
                let _timezone = buf.get_i16();
                Ok(AmfValue::Date(millis))
            }
            MARKER_XML_DOCUMENT => Ok(AmfValue::Xml(read_utf8_long(buf)?)),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED | MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
            MARKER_AVMPLUS => self.amf3.decode(buf),
            _ if self.lenient => Ok(AmfValue::Undefined),
            _ => Err(AmfError::UnknownMarker(marker)),
        }
    }

    /// Read `key: value` pairs up to the empty-key terminator
    fn read_properties(&mut self, buf: &mut Bytes) -> Result<AmfObject, AmfError> {
        let mut props = AmfObject::new();
        loop {
            if buf.is_empty() && self.lenient {
                // Some encoders cut the object short at the end of a message
                return Ok(props);
            }
            let key = read_utf8(buf)?;
            if key.is_empty() {
                match buf.first() {
                    Some(&MARKER_OBJECT_END) => {
                        buf.advance(1);
                        return Ok(props);
                    }
                    _ if self.lenient => return Ok(props),
                    Some(_) => return Err(AmfError::InvalidObjectEnd),
                    None => return Err(AmfError::UnexpectedEof),
                }
            }
            let value = self.decode(buf)?;
            props.insert(key, value);
        }
    }

    fn reserve_reference(&mut self) -> usize {
        self.references.push(AmfValue::Null);
        self.references.len() - 1
    }

    fn fill_reference(&mut self, slot: usize, value: AmfValue) -> AmfValue {
        self.references[slot] = value.clone();
        value
    }
}

impl Default for Amf0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure(buf: &Bytes, needed: usize) -> Result<(), AmfError> {
    if buf.remaining() < needed {
        Err(AmfError::UnexpectedEof)
    } else {
        Ok(())
    }
}

fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    ensure(buf, 2)?;
    let len = buf.get_u16() as usize;
    read_utf8_bytes(buf, len)
}

fn read_utf8_long(buf: &mut Bytes) -> Result<String, AmfError> {
    ensure(buf, 4)?;
    let len = buf.get_u32() as usize;
    read_utf8_bytes(buf, len)
}

fn read_utf8_bytes(buf: &mut Bytes, len: usize) -> Result<String, AmfError> {
    ensure(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder
///
/// Only AMF0 is ever written; AMF3-only values degrade to their nearest
/// AMF0 shape.
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Take the encoded bytes, leaving the encoder empty
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Null => self.buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(*b as u8);
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::Integer(i) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*i as f64);
            }
            AmfValue::String(s) => {
                if s.len() > u16::MAX as usize {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.buf.put_u16(s.len() as u16);
                }
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_properties(props);
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props);
            }
            AmfValue::TypedObject {
                class_name,
                properties,
            } => {
                self.buf.put_u8(MARKER_TYPED_OBJECT);
                self.write_key(class_name);
                self.write_properties(properties);
            }
            AmfValue::Array(items) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(items.len() as u32);
                for item in items {
                    self.encode(item);
                }
            }
            AmfValue::Date(millis) => {
                self.buf.put_u8(MARKER_DATE);
                self.buf.put_f64(*millis);
                self.buf.put_i16(0);
            }
            AmfValue::Xml(s) => {
                self.buf.put_u8(MARKER_XML_DOCUMENT);
                self.buf.put_u32(s.len() as u32);
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::ByteArray(_) => self.buf.put_u8(MARKER_NULL),
        }
    }

    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    fn write_properties(&mut self, props: &AmfObject) {
        for (key, value) in props {
            self.write_key(key);
            self.encode(value);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }

    fn write_key(&mut self, key: &str) {
        let len = key.len().min(u16::MAX as usize);
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&key.as_bytes()[..len]);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a sequence of values into one buffer
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

/// Decode every value in `data`
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    let mut buf = Bytes::copy_from_slice(data);
    Amf0Decoder::new().decode_all(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_command_roundtrip() {
        let values = vec![
            AmfValue::from("connect"),
            AmfValue::Number(1.0),
            AmfValue::object([
                ("app", AmfValue::from("live")),
                ("tcUrl", AmfValue::from("rtmp://localhost/live")),
                ("fpad", AmfValue::from(false)),
            ]),
        ];
        let encoded = encode_all(&values);
        assert_eq!(decode_all(&encoded).unwrap(), values);
    }

    #[test]
    fn test_metadata_ecma_array() {
        let mut props = AmfObject::new();
        props.insert("width".into(), AmfValue::Number(1920.0));
        props.insert("encoder".into(), AmfValue::from("obs-output module"));
        let values = vec![AmfValue::from("onMetaData"), AmfValue::EcmaArray(props)];

        let decoded = decode_all(&encode_all(&values)).unwrap();
        assert_eq!(decoded[1].get_number("width"), Some(1920.0));
        assert!(matches!(decoded[1], AmfValue::EcmaArray(_)));
    }

    #[test]
    fn test_long_string_switches_marker() {
        let long = "x".repeat(70_000);
        let encoded = encode_all(&[AmfValue::from(long.as_str())]);
        assert_eq!(encoded[0], MARKER_LONG_STRING);
        assert_eq!(decode_all(&encoded).unwrap(), vec![AmfValue::String(long)]);
    }

    #[test]
    fn test_missing_object_end_is_tolerated() {
        // { "a": 1.0 } followed by an empty key but no 0x09
        let mut raw = BytesMut::new();
        raw.put_u8(MARKER_OBJECT);
        raw.put_u16(1);
        raw.put_slice(b"a");
        raw.put_u8(MARKER_NUMBER);
        raw.put_f64(1.0);
        raw.put_u16(0);
        raw.put_u8(MARKER_NULL);

        let decoded = decode_all(&raw).unwrap();
        assert_eq!(decoded[0].get_number("a"), Some(1.0));
        // The byte after the empty key is not swallowed
        assert_eq!(decoded[1], AmfValue::Null);
    }

    #[test]
    fn test_strict_mode_rejects_bad_end_marker() {
        let mut raw = BytesMut::new();
        raw.put_u8(MARKER_OBJECT);
        raw.put_u16(0);
        raw.put_u8(0x42);

        let mut buf = raw.freeze();
        let err = Amf0Decoder::with_lenient(false).decode(&mut buf).unwrap_err();
        assert!(matches!(err, AmfError::InvalidObjectEnd));
    }

    #[test]
    fn test_reference_resolves_earlier_object() {
        let mut raw = BytesMut::new();
        raw.put_u8(MARKER_OBJECT);
        raw.put_u16(1);
        raw.put_slice(b"k");
        raw.put_u8(MARKER_BOOLEAN);
        raw.put_u8(1);
        raw.put_u16(0);
        raw.put_u8(MARKER_OBJECT_END);
        raw.put_u8(MARKER_REFERENCE);
        raw.put_u16(0);

        let decoded = decode_all(&raw).unwrap();
        assert_eq!(decoded[0], decoded[1]);

        let mut bad = Bytes::from_static(&[MARKER_REFERENCE, 0x00, 0x05]);
        assert!(matches!(
            Amf0Decoder::new().decode(&mut bad),
            Err(AmfError::InvalidReference(5))
        ));
    }

    #[test]
    fn test_avmplus_switches_to_amf3() {
        // 0x11 followed by an AMF3 string "hi"
        let raw = [MARKER_AVMPLUS, 0x06, 0x05, b'h', b'i'];
        assert_eq!(decode_all(&raw).unwrap(), vec![AmfValue::from("hi")]);
    }

    #[test]
    fn test_truncated_number() {
        let mut buf = Bytes::from_static(&[MARKER_NUMBER, 0x40, 0x00]);
        assert!(matches!(
            Amf0Decoder::new().decode(&mut buf),
            Err(AmfError::UnexpectedEof)
        ));
    }
}
